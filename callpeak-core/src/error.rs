use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallpeakError {
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Invalid chunk size: chunk_days must be at least 1")]
    InvalidChunkSize,
}
