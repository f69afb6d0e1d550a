//! Raw chunk layout of the MicroPython micro:bit filesystem.
//!
//! Every chunk is [`CHUNK_SIZE`] bytes:
//!
//! ```text
//! byte 0        0xFE on the first chunk of a file, otherwise the id of the
//!               previous chunk (0xFF = never written, 0x00 = freed)
//! bytes 1..127  payload
//! byte 127      id of the next chunk, 0xFF on the last one
//! ```
//!
//! The payload of a file's first chunk opens with the file header
//! `end_offset, name_len, name`. Chunk ids on flash are one-based.

use std::collections::BTreeSet;

use crate::allocator::ChunkIndex;
use crate::{Result, StorageError};

pub const CHUNK_SIZE: usize = 128;
pub const CHUNK_DATA_LEN: usize = CHUNK_SIZE - 2;
pub const FILE_HEADER_LEN: usize = 2;
pub const MAX_FILENAME_LEN: usize = 120;
/// Ids 0x00, 0xFD, 0xFE and 0xFF are markers, leaving 252 addressable chunks.
pub const MAX_CHUNKS: usize = 252;

const MARKER_FREED: u8 = 0x00;
const MARKER_FILE_START: u8 = 0xFE;
const MARKER_UNUSED: u8 = 0xFF;
const LAST_CHUNK: u8 = 0xFF;

/// A file chain found by following links from a start chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChainInfo {
    pub name: String,
    pub chain: Vec<ChunkIndex>,
    pub byte_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRegion {
    chunk_count: usize,
    bytes: Vec<u8>,
}

impl StorageRegion {
    pub fn new(chunk_count: usize) -> Result<Self> {
        validate_chunk_count(chunk_count)?;
        Ok(Self {
            chunk_count,
            bytes: vec![MARKER_UNUSED; chunk_count * CHUNK_SIZE],
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() % CHUNK_SIZE != 0 {
            return Err(StorageError::InvalidLayout(format!(
                "region length {} is not a multiple of {}",
                bytes.len(),
                CHUNK_SIZE
            )));
        }
        let chunk_count = bytes.len() / CHUNK_SIZE;
        validate_chunk_count(chunk_count)?;
        Ok(Self { chunk_count, bytes })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn chunk(&self, index: ChunkIndex) -> &[u8] {
        &self.bytes[index * CHUNK_SIZE..(index + 1) * CHUNK_SIZE]
    }

    fn chunk_mut(&mut self, index: ChunkIndex) -> &mut [u8] {
        &mut self.bytes[index * CHUNK_SIZE..(index + 1) * CHUNK_SIZE]
    }

    pub(crate) fn is_file_start(&self, index: ChunkIndex) -> bool {
        self.chunk(index)[0] == MARKER_FILE_START
    }

    /// True for chunks that hold no live data (never written or freed).
    pub(crate) fn is_vacant(&self, index: ChunkIndex) -> bool {
        matches!(self.chunk(index)[0], MARKER_UNUSED | MARKER_FREED)
    }

    pub(crate) fn erase(&mut self, chain: &[ChunkIndex]) {
        for &index in chain {
            self.chunk_mut(index).fill(MARKER_UNUSED);
        }
    }

    /// Lays `name` and `content` out over `chain`, which must hold exactly
    /// [`chunks_needed`] chunks.
    pub(crate) fn write_file(&mut self, chain: &[ChunkIndex], name: &str, content: &[u8]) {
        let record_len = FILE_HEADER_LEN + name.len() + content.len();
        let end_offset = record_len - (chain.len() - 1) * CHUNK_DATA_LEN;

        let mut record = Vec::with_capacity(record_len);
        record.push(end_offset as u8);
        record.push(name.len() as u8);
        record.extend_from_slice(name.as_bytes());
        record.extend_from_slice(content);

        for (position, (&index, payload)) in
            chain.iter().zip(record.chunks(CHUNK_DATA_LEN)).enumerate()
        {
            let previous = if position == 0 {
                MARKER_FILE_START
            } else {
                chunk_id(chain[position - 1])
            };
            let next = chain.get(position + 1).map_or(LAST_CHUNK, |&n| chunk_id(n));

            let chunk = self.chunk_mut(index);
            chunk.fill(MARKER_UNUSED);
            chunk[0] = previous;
            chunk[1..1 + payload.len()].copy_from_slice(payload);
            chunk[CHUNK_SIZE - 1] = next;
        }
    }

    /// Follows the links from `first` and validates the chain framing.
    pub(crate) fn walk(&self, first: ChunkIndex) -> Result<ChainInfo> {
        let start = self.chunk(first);
        if start[0] != MARKER_FILE_START {
            return Err(corrupt(first, "missing file start marker"));
        }

        let end_offset = start[1] as usize;
        let name_len = start[2] as usize;
        if name_len == 0 || name_len > MAX_FILENAME_LEN {
            return Err(corrupt(first, "bad file name length"));
        }
        if end_offset == 0 || end_offset > CHUNK_DATA_LEN {
            return Err(corrupt(first, "bad end offset"));
        }
        let name = std::str::from_utf8(&start[3..3 + name_len])
            .map_err(|_| corrupt(first, "file name is not UTF-8"))?
            .to_string();

        let mut chain = vec![first];
        let mut visited = BTreeSet::from([first]);
        let mut current = first;
        loop {
            let next = self.chunk(current)[CHUNK_SIZE - 1];
            if next == LAST_CHUNK {
                break;
            }
            let next_index = (next as usize)
                .checked_sub(1)
                .filter(|&index| index < self.chunk_count)
                .ok_or_else(|| corrupt(current, "link points outside the region"))?;
            if !visited.insert(next_index) {
                return Err(corrupt(next_index, "chain loops back on itself"));
            }
            if self.chunk(next_index)[0] != chunk_id(current) {
                return Err(corrupt(next_index, "back link does not match"));
            }
            chain.push(next_index);
            current = next_index;
        }

        let stored = (chain.len() - 1) * CHUNK_DATA_LEN + end_offset;
        let header = FILE_HEADER_LEN + name_len;
        if stored < header {
            return Err(corrupt(first, "file shorter than its header"));
        }

        Ok(ChainInfo {
            name,
            chain,
            byte_length: stored - header,
        })
    }

    /// Concatenated content of a walked chain, header stripped.
    pub(crate) fn read_content(&self, info: &ChainInfo) -> Vec<u8> {
        let mut payload = Vec::with_capacity(info.chain.len() * CHUNK_DATA_LEN);
        for &index in &info.chain {
            payload.extend_from_slice(&self.chunk(index)[1..CHUNK_SIZE - 1]);
        }

        let header = FILE_HEADER_LEN + info.name.len();
        payload.drain(..header);
        payload.truncate(info.byte_length);
        payload
    }
}

/// Chunks required to store a file with the given name and content length.
pub fn chunks_needed(name_len: usize, content_len: usize) -> usize {
    (FILE_HEADER_LEN + name_len + content_len).div_ceil(CHUNK_DATA_LEN)
}

fn chunk_id(index: ChunkIndex) -> u8 {
    (index + 1) as u8
}

fn validate_chunk_count(chunk_count: usize) -> Result<()> {
    if chunk_count == 0 || chunk_count > MAX_CHUNKS {
        return Err(StorageError::InvalidLayout(format!(
            "chunk count {} outside 1..={}",
            chunk_count, MAX_CHUNKS
        )));
    }
    Ok(())
}

fn corrupt(index: ChunkIndex, reason: &str) -> StorageError {
    StorageError::Corruption(format!("chunk {}: {}", index, reason))
}
