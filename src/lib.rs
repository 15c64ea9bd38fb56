pub mod config;
pub mod core;
pub mod db;
pub mod driver;
pub mod error;
pub mod logging;
pub mod training;
pub mod workers;

pub use error::{EngineError, ErrorBody};
pub use training::TrainingEngine;
