pub mod config;
pub mod error;
pub mod session;

pub use config::Config;
pub use error::{MpFlashError, Result};
pub use session::{FileListing, HexLoad, PyLoad, Session, StorageUsage};

// Re-export key types from workspace crates
pub use firmware;
pub use storage;
