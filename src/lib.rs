pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod outbound;
pub mod task;

pub use client::{Prediction, PredictionStream, SenseClient};
pub use error::{Result, SenseError};
pub use sense_protos::{Input, Output};
