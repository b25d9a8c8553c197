pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::{BatchClientArgs, ServeArgs};

pub use adapters::client::PredictClient;
pub use adapters::http::router;
pub use adapters::storage::LocalStorage;
pub use app::{BatchRunner, DigitServer};
pub use config::ServerConfig;
pub use core::network::{DigitModel, DigitNet, InferenceBackend};
pub use core::predictor::DigitPredictor;
pub use core::weights::{LoadSummary, WeightSource};
pub use utils::error::{Result, ServeError};
