use std::collections::BTreeMap;

use crate::record::{Record, RecordType};
use crate::Result;

/// Sparse view of the bytes described by an image's data records, keyed by
/// absolute address.
#[derive(Debug, Clone, Default)]
pub struct MemoryMap {
    blocks: BTreeMap<u32, Vec<u8>>,
}

impl MemoryMap {
    pub fn insert(&mut self, address: u32, data: Vec<u8>) {
        if !data.is_empty() {
            self.blocks.insert(address, data);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Copies `len` bytes starting at `start`. Bytes no record covers read as
    /// erased flash (`0xFF`). Also returns how many bytes were covered.
    pub fn read(&self, start: u32, len: usize) -> (Vec<u8>, usize) {
        let mut out = vec![0xFF; len];
        let mut covered = 0;
        let start = start as u64;
        let end = start + len as u64;

        for (&address, data) in &self.blocks {
            let block_start = address as u64;
            let block_end = block_start + data.len() as u64;
            if block_end <= start || block_start >= end {
                continue;
            }
            let from = block_start.max(start);
            let to = block_end.min(end);
            let src = (from - block_start) as usize..(to - block_start) as usize;
            let dst = (from - start) as usize..(to - start) as usize;
            out[dst].copy_from_slice(&data[src]);
            covered += (to - from) as usize;
        }
        (out, covered)
    }

    /// Lowest address inside `start..start + len` that some record writes to.
    pub fn first_overlap(&self, start: u32, len: usize) -> Option<u32> {
        let start = start as u64;
        let end = start + len as u64;
        self.blocks.iter().find_map(|(&address, data)| {
            let block_start = address as u64;
            let block_end = block_start + data.len() as u64;
            (block_end > start && block_start < end).then(|| block_start.max(start) as u32)
        })
    }
}

/// An image split into its record lines, memory contents and any text that
/// follows the end-of-file record.
#[derive(Debug, Clone, Default)]
pub struct ParsedImage {
    /// Trimmed record lines before the end-of-file record.
    pub lines: Vec<String>,
    pub memory: MemoryMap,
    pub trailing_text: String,
    pub saw_end_of_file: bool,
}

impl ParsedImage {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parsed = ParsedImage::default();
        let mut base = 0u32;
        let mut trailing = Vec::new();

        for (i, raw) in text.lines().enumerate() {
            if parsed.saw_end_of_file {
                trailing.push(raw);
                continue;
            }

            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let record = Record::parse(line, i + 1)?;
            match record.record_type {
                RecordType::Data => {
                    let address = base.wrapping_add(record.offset as u32);
                    parsed.memory.insert(address, record.data);
                }
                RecordType::EndOfFile => {
                    parsed.saw_end_of_file = true;
                    continue;
                }
                RecordType::ExtendedLinearAddress | RecordType::ExtendedSegmentAddress => {
                    base = record.address_base().unwrap_or(base);
                }
                RecordType::StartLinearAddress | RecordType::StartSegmentAddress => {}
            }
            parsed.lines.push(line.to_string());
        }

        let is_blank = |line: &&str| line.trim().is_empty();
        let start = trailing.iter().position(|line| !is_blank(line));
        let end = trailing.iter().rposition(|line| !is_blank(line));
        if let (Some(start), Some(end)) = (start, end) {
            parsed.trailing_text = trailing[start..=end].join("\n");
        }
        Ok(parsed)
    }

    pub fn trailing_script(&self) -> Option<&str> {
        (!self.trailing_text.is_empty()).then_some(self.trailing_text.as_str())
    }
}
