use thiserror::Error;

#[derive(Error, Debug)]
pub enum MpFlashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Image(#[from] firmware::ImageError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MpFlashError {
    fn from(err: serde_json::Error) -> Self {
        MpFlashError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MpFlashError>;
