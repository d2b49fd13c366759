use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Sensor error: {0}")]
    Sensor(String),
    #[error("Upload error: {0}")]
    Upload(String),
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}
