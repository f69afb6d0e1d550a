mod allocator;
mod module;
mod region;
mod store;

pub use allocator::{ChunkAllocator, ChunkIndex};
pub use module::{classify, classify_source, Classification, MODULE_MARKER};
pub use region::{
    chunks_needed, StorageRegion, CHUNK_DATA_LEN, CHUNK_SIZE, FILE_HEADER_LEN, MAX_CHUNKS,
    MAX_FILENAME_LEN,
};
pub use store::{FileEntry, FileStore, ENTRY_POINT};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub used_chunks: usize,
    pub total_bytes: usize,
    pub used_bytes: usize,
    pub remaining_capacity: usize,
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("There is no storage space left: {needed} chunks needed, {available} available")]
    OutOfSpace { needed: usize, available: usize },

    #[error("File {0} has to contain data")]
    EmptyContent(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),
}
