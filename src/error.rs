use crate::config::ConfigError;
use crate::task::Mode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SenseError>;

#[derive(Error, Debug)]
pub enum SenseError {
    #[error("Invalid {mode} task: '{task}'")]
    InvalidTask { task: String, mode: Mode },

    #[error("Invalid subtask for '{task}': {subtask:?}")]
    InvalidSubtask {
        task: String,
        subtask: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::Status),

    #[error("Audio capture error: {0}")]
    Capture(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Prediction is not valid JSON: {0}")]
    Prediction(#[from] serde_json::Error),
}
