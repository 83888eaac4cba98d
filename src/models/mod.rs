pub mod base_model;
pub mod iforest;
pub mod scaler;
