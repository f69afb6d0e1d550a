use serde::{Deserialize, Serialize};
use storage::{CHUNK_SIZE, MAX_CHUNKS};

use crate::{ImageError, Result};

/// Where the filesystem and the legacy script live in device flash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashLayout {
    pub fs_start: u32,
    pub chunk_count: usize,
    pub appended_script_address: u32,
    pub appended_script_max_len: usize,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            fs_start: 0x37400,
            chunk_count: 216, // 27 KiB of 128 byte chunks
            appended_script_address: 0x3E000,
            appended_script_max_len: 8 * 1024,
        }
    }
}

impl FlashLayout {
    pub fn fs_size(&self) -> usize {
        self.chunk_count * CHUNK_SIZE
    }

    pub fn fs_end(&self) -> u64 {
        self.fs_start as u64 + self.fs_size() as u64
    }

    pub fn appended_script_end(&self) -> u64 {
        self.appended_script_address as u64 + self.appended_script_max_len as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_count == 0 || self.chunk_count > MAX_CHUNKS {
            return Err(ImageError::InvalidLayout(format!(
                "chunk_count {} outside 1..={}",
                self.chunk_count, MAX_CHUNKS
            )));
        }
        if self.fs_start as usize % CHUNK_SIZE != 0 {
            return Err(ImageError::InvalidLayout(format!(
                "fs_start {:#x} is not {} byte aligned",
                self.fs_start, CHUNK_SIZE
            )));
        }
        if self.appended_script_address % 16 != 0 {
            return Err(ImageError::InvalidLayout(format!(
                "appended_script_address {:#x} is not 16 byte aligned",
                self.appended_script_address
            )));
        }
        if self.fs_end() > u32::MAX as u64 + 1 || self.appended_script_end() > u32::MAX as u64 + 1
        {
            return Err(ImageError::InvalidLayout(
                "regions extend past the 32-bit address space".to_string(),
            ));
        }

        if (self.fs_start as u64) < self.appended_script_end()
            && (self.appended_script_address as u64) < self.fs_end()
        {
            return Err(ImageError::InvalidLayout(
                "filesystem overlaps the appended script region".to_string(),
            ));
        }
        Ok(())
    }
}
