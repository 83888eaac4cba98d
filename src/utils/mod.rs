pub mod evaluation;
pub mod ss;
