//! outlier-handler CLI
//!
//! # Commands
//!
//! - `train` - Fit and persist the scaler and outlier model
//! - `invoke` - Run one event through the handler
//! - `serve` - Handle newline-delimited events from stdin

use std::error::Error;
use std::io::{self, Read};

use clap::{Parser, Subcommand};
use outlier_handler::{
    config::{HandlerConfig, TrainArgs},
    logging::init_logging,
    training::train,
    PredictionHandler,
};
use tracing::info;

/// Outlier-detection prediction handler
#[derive(Parser)]
#[command(name = "outlier-handler")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on synthetic (or supplied) data and write scaler.json and model.json
    ///
    /// Examples:
    ///   outlier-handler train
    ///   outlier-handler train --data rows.json --classifier-input scaled
    Train(TrainArgs),

    /// Handle one event and print the response
    ///
    /// Examples:
    ///   outlier-handler invoke '{"body": "{\"features\": [1.0, 2.0, 3.0, 4.0]}"}'
    ///   cat event.json | outlier-handler invoke
    Invoke {
        #[command(flatten)]
        handler: HandlerConfig,

        /// Event JSON; read from stdin when omitted
        #[arg(value_name = "EVENT")]
        event: Option<String>,
    },

    /// Handle one event per stdin line, one response per stdout line
    Serve {
        #[command(flatten)]
        handler: HandlerConfig,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => {
            let store = args.handler.store();
            let report = train(&args.to_training_config(), &store)?;
            info!(model_dir = %store.root().display(), "models saved");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Invoke { handler, event } => {
            let prediction =
                PredictionHandler::from_store(&handler.store(), handler.classifier_input)?;
            let event = match event {
                Some(event) => event,
                None => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let response = prediction.handle_raw(&event);
            println!("{}", serde_json::to_string(&response)?);
        }
        Commands::Serve { handler } => {
            // Loaded once; every line below reuses the same state.
            let prediction =
                PredictionHandler::from_store(&handler.store(), handler.classifier_input)?;
            info!(
                n_features = prediction.state().n_features(),
                classifier_input = %prediction.state().classifier_input(),
                "serving events from stdin"
            );

            let served = prediction.serve(io::stdin().lock(), io::stdout().lock())?;
            info!(served, "stdin closed");
        }
    }

    Ok(())
}
