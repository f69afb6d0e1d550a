mod codec;
mod layout;
mod legacy;
mod memory;
mod record;

pub use codec::{decode, fingerprint, scan_appended_script, Decoded, FirmwareImage, LoadSource};
pub use layout::FlashLayout;
pub use legacy::{append_script, APPENDED_SCRIPT_MAGIC};
pub use memory::{MemoryMap, ParsedImage};
pub use record::{Record, RecordType};

use storage::StorageError;

pub type Result<T> = std::result::Result<T, ImageError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("Malformed image at line {line}: {reason}")]
    MalformedImage { line: usize, reason: String },

    #[error("Could not find a valid Python script in the image")]
    NoScriptFound,

    #[error("Firmware already has data inside the filesystem region at {address:#07x}")]
    RegionOverlap { address: u32 },

    #[error("Script of {len} bytes does not fit the {max} byte appended region")]
    ScriptTooLarge { len: usize, max: usize },

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
