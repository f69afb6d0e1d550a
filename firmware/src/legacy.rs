//! Scripts appended after the firmware in the pre-filesystem image format.
//!
//! The script sits at a fixed address, framed as `b"MP"`, a little-endian
//! `u16` length, then the script bytes padded with NULs.

use storage::{StorageError, ENTRY_POINT};

use crate::codec::FirmwareImage;
use crate::layout::FlashLayout;
use crate::memory::MemoryMap;
use crate::record::{data_records, Record, DATA_RECORD_LEN};
use crate::{ImageError, Result};

pub const APPENDED_SCRIPT_MAGIC: &[u8; 2] = b"MP";
const HEADER_LEN: usize = 4;

pub(crate) fn read_appended(memory: &MemoryMap, layout: &FlashLayout) -> Option<Vec<u8>> {
    let (bytes, covered) = memory.read(
        layout.appended_script_address,
        layout.appended_script_max_len,
    );
    if covered < HEADER_LEN || bytes.len() < HEADER_LEN || &bytes[..2] != APPENDED_SCRIPT_MAGIC {
        return None;
    }

    let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
    let end = (HEADER_LEN + len).min(bytes.len());
    let mut script = bytes[HEADER_LEN..end].to_vec();
    while matches!(script.last(), Some(0x00) | Some(0xFF)) {
        script.pop();
    }

    (!script.is_empty()).then_some(script)
}

/// Builds an image in the legacy format: firmware, then `script` at the
/// appended script address, and no filesystem.
pub fn append_script(firmware: &FirmwareImage, script: &[u8]) -> Result<String> {
    let layout = firmware.layout();
    if script.is_empty() {
        return Err(StorageError::EmptyContent(ENTRY_POINT.to_string()).into());
    }
    let max = layout
        .appended_script_max_len
        .saturating_sub(HEADER_LEN)
        .min(u16::MAX as usize);
    if script.len() > max {
        return Err(ImageError::ScriptTooLarge { len: script.len(), max });
    }

    let mut bytes = Vec::with_capacity(HEADER_LEN + script.len() + DATA_RECORD_LEN);
    bytes.extend_from_slice(APPENDED_SCRIPT_MAGIC);
    bytes.extend_from_slice(&(script.len() as u16).to_le_bytes());
    bytes.extend_from_slice(script);
    let padded = bytes.len().div_ceil(DATA_RECORD_LEN) * DATA_RECORD_LEN;
    bytes.resize(padded, 0x00);

    let mut lines = firmware.prefix_lines().to_vec();
    lines.extend(
        data_records(layout.appended_script_address, &bytes)
            .iter()
            .map(Record::to_line),
    );
    lines.push(Record::end_of_file().to_line());

    tracing::info!("Appended {} byte script in legacy format", script.len());
    Ok(lines.join("\n") + "\n")
}
