use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::allocator::{ChunkAllocator, ChunkIndex};
use crate::region::{chunks_needed, StorageRegion, CHUNK_DATA_LEN, CHUNK_SIZE, MAX_FILENAME_LEN};
use crate::{Result, StorageError, StorageStats};

/// The script MicroPython runs on boot. Hidden from user-facing listings.
pub const ENTRY_POINT: &str = "main.py";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub chunk_chain: Vec<ChunkIndex>,
    pub byte_length: usize,
}

impl FileEntry {
    /// Bytes of flash the file occupies, including header and padding.
    pub fn storage_size(&self) -> usize {
        self.chunk_chain.len() * CHUNK_SIZE
    }
}

/// Named files over a fixed set of chunks.
///
/// All mutation goes through `&mut self`; the store assumes a single writer
/// and has no internal locking.
#[derive(Debug, Clone)]
pub struct FileStore {
    region: StorageRegion,
    allocator: ChunkAllocator,
    files: BTreeMap<String, FileEntry>,
}

impl FileStore {
    pub fn new(chunk_count: usize) -> Result<Self> {
        let region = StorageRegion::new(chunk_count)?;
        Ok(Self {
            allocator: ChunkAllocator::new(chunk_count),
            region,
            files: BTreeMap::new(),
        })
    }

    /// Rebuilds a store from raw region bytes.
    ///
    /// Chains that fail validation are skipped and reported in the returned
    /// warnings; their chunks, like any chunk no file reaches, become free.
    pub fn from_region(bytes: Vec<u8>) -> Result<(Self, Vec<String>)> {
        let region = StorageRegion::from_bytes(bytes)?;
        let chunk_count = region.chunk_count();
        let mut store = Self {
            allocator: ChunkAllocator::new(chunk_count),
            region,
            files: BTreeMap::new(),
        };
        let mut warnings = Vec::new();

        for index in 0..chunk_count {
            if !store.region.is_file_start(index) {
                continue;
            }

            let info = match store.region.walk(index) {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!("Skipping unreadable file chain: {}", e);
                    warnings.push(format!("Skipped unreadable file: {}", e));
                    continue;
                }
            };

            if store.files.contains_key(&info.name) {
                warnings.push(format!("Skipped duplicate copy of {}", info.name));
                continue;
            }
            if let Err(e) = store.allocator.claim(&info.chain) {
                warnings.push(format!("Skipped {}: {}", info.name, e));
                continue;
            }

            store.files.insert(
                info.name.clone(),
                FileEntry {
                    name: info.name,
                    chunk_chain: info.chain,
                    byte_length: info.byte_length,
                },
            );
        }

        let unclaimed: Vec<ChunkIndex> = (0..chunk_count)
            .filter(|&index| store.allocator.is_free(index))
            .collect();
        let stale = unclaimed
            .iter()
            .filter(|&&index| !store.region.is_vacant(index))
            .count();
        if stale > 0 {
            tracing::debug!("Reclaiming {} orphaned chunks", stale);
        }
        store.region.erase(&unclaimed);

        tracing::info!(
            "Recovered {} files from region ({} chunks used)",
            store.files.len(),
            store.allocator.used_count()
        );
        Ok((store, warnings))
    }

    /// Creates or replaces `name`. On failure the store is left untouched,
    /// including any previous version of the file.
    pub fn write(&mut self, name: &str, content: &[u8]) -> Result<()> {
        validate_name(name)?;
        if content.is_empty() {
            return Err(StorageError::EmptyContent(name.to_string()));
        }

        let needed = chunks_needed(name.len(), content.len());
        let released = self.files.get(name).map_or(0, |entry| entry.chunk_chain.len());
        let available = self.allocator.free_count() + released;
        if needed > available {
            return Err(StorageError::OutOfSpace { needed, available });
        }

        if let Some(old) = self.files.remove(name) {
            self.allocator.free(&old.chunk_chain);
            self.region.erase(&old.chunk_chain);
        }

        let chain = self.allocator.allocate(needed)?;
        self.region.write_file(&chain, name, content);

        tracing::info!(
            "Stored file: {} ({} bytes, {} chunks)",
            name,
            content.len(),
            chain.len()
        );

        self.files.insert(
            name.to_string(),
            FileEntry {
                name: name.to_string(),
                chunk_chain: chain,
                byte_length: content.len(),
            },
        );
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<Bytes> {
        let entry = self.entry(name)?;
        let first = entry
            .chunk_chain
            .first()
            .copied()
            .ok_or_else(|| StorageError::Corruption(format!("{} has no chunks", name)))?;

        let info = self.region.walk(first)?;
        Ok(Bytes::from(self.region.read_content(&info)))
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        let entry = self
            .files
            .remove(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        self.allocator.free(&entry.chunk_chain);
        self.region.erase(&entry.chunk_chain);

        tracing::info!("Removed file: {}", name);
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// User-visible files, without the entry point.
    pub fn list(&self) -> Vec<String> {
        self.files
            .keys()
            .filter(|name| name.as_str() != ENTRY_POINT)
            .cloned()
            .collect()
    }

    /// Every stored file, entry point included.
    pub fn ls(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn entry(&self, name: &str) -> Result<&FileEntry> {
        self.files
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    pub fn size(&self, name: &str) -> Result<usize> {
        Ok(self.entry(name)?.byte_length)
    }

    pub fn storage_size(&self, name: &str) -> Result<usize> {
        Ok(self.entry(name)?.storage_size())
    }

    pub fn remaining_capacity(&self) -> usize {
        self.allocator.free_count() * CHUNK_DATA_LEN
    }

    pub fn free_count(&self) -> usize {
        self.allocator.free_count()
    }

    pub fn chunk_count(&self) -> usize {
        self.region.chunk_count()
    }

    pub fn storage_total(&self) -> usize {
        self.region.capacity()
    }

    pub fn storage_used(&self) -> usize {
        self.allocator.used_count() * CHUNK_SIZE
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Drops every file and returns the region to erased flash.
    pub fn format(&mut self) {
        let chunk_count = self.region.chunk_count();
        let all: Vec<ChunkIndex> = (0..chunk_count).collect();
        self.region.erase(&all);
        self.allocator = ChunkAllocator::new(chunk_count);
        self.files.clear();
    }

    pub fn region_bytes(&self) -> &[u8] {
        self.region.as_bytes()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            total_files: self.files.len(),
            total_chunks: self.allocator.total(),
            used_chunks: self.allocator.used_count(),
            total_bytes: self.storage_total(),
            used_bytes: self.storage_used(),
            remaining_capacity: self.remaining_capacity(),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_FILENAME_LEN {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CHUNKS: usize = 216;

    fn small_file(i: usize) -> (String, Vec<u8>) {
        let name = format!("small{}.py", i);
        let content = format!("# Empty Python file < 128 bytes{}", name).into_bytes();
        (name, content)
    }

    #[test]
    fn test_write_and_read() {
        let mut store = FileStore::new(CHUNKS).unwrap();
        store.write("hello.py", b"print('hello')").unwrap();

        assert!(store.exists("hello.py"));
        assert_eq!(store.read("hello.py").unwrap().as_ref(), b"print('hello')");
        assert_eq!(store.size("hello.py").unwrap(), 14);
        assert_eq!(store.storage_size("hello.py").unwrap(), CHUNK_SIZE);
    }

    #[test]
    fn test_empty_content_rejected() {
        let mut store = FileStore::new(CHUNKS).unwrap();
        let err = store.write("empty.py", b"").unwrap_err();
        assert_eq!(err, StorageError::EmptyContent("empty.py".to_string()));
        assert!(!store.exists("empty.py"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut store = FileStore::new(CHUNKS).unwrap();
        assert!(matches!(store.write("", b"x"), Err(StorageError::InvalidName(_))));

        let long = "n".repeat(MAX_FILENAME_LEN + 1);
        assert!(matches!(store.write(&long, b"x"), Err(StorageError::InvalidName(_))));
    }

    #[test]
    fn test_missing_file() {
        let mut store = FileStore::new(CHUNKS).unwrap();
        assert_eq!(
            store.read("nope.py").unwrap_err(),
            StorageError::NotFound("nope.py".to_string())
        );
        assert!(matches!(store.remove("nope.py"), Err(StorageError::NotFound(_))));
        assert!(store.size("nope.py").is_err());
    }

    #[test]
    fn test_remaining_capacity_accounting() {
        let mut store = FileStore::new(CHUNKS).unwrap();
        let before = store.remaining_capacity();
        assert_eq!(before, CHUNKS * CHUNK_DATA_LEN);

        let content = vec![b'a'; 300];
        store.write("data.bin", &content).unwrap();
        let expected = chunks_needed("data.bin".len(), content.len()) * CHUNK_DATA_LEN;
        assert_eq!(before - store.remaining_capacity(), expected);

        store.remove("data.bin").unwrap();
        assert_eq!(store.remaining_capacity(), before);
    }

    #[test]
    fn test_fills_with_small_files() {
        let mut store = FileStore::new(CHUNKS).unwrap();
        store.write(ENTRY_POINT, b"from microbit import *").unwrap();

        for i in 0..215 {
            let (name, content) = small_file(i);
            store.write(&name, &content).unwrap();
        }
        assert_eq!(store.free_count(), 0);

        let (name, content) = small_file(215);
        assert_eq!(
            store.write(&name, &content).unwrap_err(),
            StorageError::OutOfSpace { needed: 1, available: 0 }
        );
        assert_eq!(store.list().len(), 215);
        assert_eq!(store.ls().len(), 216);
    }

    #[test]
    fn test_single_file_fills_region_exactly() {
        let name = "big.py";
        let fits = CHUNKS * CHUNK_DATA_LEN - 2 - name.len();

        let mut store = FileStore::new(CHUNKS).unwrap();
        store.write(name, &vec![b'x'; fits]).unwrap();
        assert_eq!(store.free_count(), 0);
        assert_eq!(store.read(name).unwrap().len(), fits);

        let mut store = FileStore::new(CHUNKS).unwrap();
        let err = store.write(name, &vec![b'x'; fits + 1]).unwrap_err();
        assert_eq!(err, StorageError::OutOfSpace { needed: 217, available: 216 });
        assert!(store.is_empty());
    }

    #[test]
    fn test_overwrite_reuses_old_chunks() {
        let mut store = FileStore::new(4).unwrap();
        store.write("a.txt", &[1u8; 300]).unwrap();
        assert_eq!(store.free_count(), 1);

        // Needs all four chunks, only possible because the old chain is released.
        store.write("a.txt", &[2u8; 450]).unwrap();
        assert_eq!(store.free_count(), 0);
        assert_eq!(store.read("a.txt").unwrap().as_ref(), &[2u8; 450][..]);
    }

    #[test]
    fn test_failed_overwrite_keeps_old_content() {
        let mut store = FileStore::new(4).unwrap();
        store.write("keep.txt", b"original").unwrap();
        store.write("other.txt", &[0u8; 200]).unwrap();

        let err = store.write("keep.txt", &[9u8; 400]).unwrap_err();
        assert!(matches!(err, StorageError::OutOfSpace { .. }));
        assert_eq!(store.read("keep.txt").unwrap().as_ref(), b"original");
        assert_eq!(store.free_count(), 1);
    }

    #[test]
    fn test_list_hides_entry_point() {
        let mut store = FileStore::new(CHUNKS).unwrap();
        store.write(ENTRY_POINT, b"pass").unwrap();
        store.write("b.py", b"pass").unwrap();
        store.write("a.py", b"pass").unwrap();

        assert_eq!(store.list(), vec!["a.py".to_string(), "b.py".to_string()]);
        assert_eq!(store.ls().len(), 3);
        assert_eq!(store.storage_used(), 3 * CHUNK_SIZE);
    }

    #[test]
    fn test_from_region_round_trip() {
        let mut store = FileStore::new(16).unwrap();
        store.write(ENTRY_POINT, b"import lib\nlib.go()").unwrap();
        store.write("lib.py", &vec![b'#'; 500]).unwrap();
        store.write("gone.py", b"temporary").unwrap();
        store.remove("gone.py").unwrap();

        let (restored, warnings) = FileStore::from_region(store.region_bytes().to_vec()).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(restored.ls(), store.ls());
        assert_eq!(restored.read("lib.py").unwrap(), store.read("lib.py").unwrap());
        assert_eq!(restored.free_count(), store.free_count());
        assert_eq!(restored.region_bytes(), store.region_bytes());
    }

    #[test]
    fn test_from_region_skips_corrupt_chain() {
        let mut store = FileStore::new(8).unwrap();
        store.write("ok.py", b"fine").unwrap();
        store.write("bad.py", &[3u8; 200]).unwrap();

        let mut bytes = store.region_bytes().to_vec();
        let second = store.entry("bad.py").unwrap().chunk_chain[1];
        bytes[second * CHUNK_SIZE] = 0x42;

        let (restored, warnings) = FileStore::from_region(bytes).unwrap();
        assert_eq!(restored.ls(), vec!["ok.py".to_string()]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(restored.free_count(), 7);
    }

    #[test]
    fn test_freed_marker_counts_as_free() {
        let mut bytes = vec![0xFFu8; 4 * CHUNK_SIZE];
        bytes[CHUNK_SIZE] = 0x00;

        let (store, warnings) = FileStore::from_region(bytes).unwrap();
        assert!(store.is_empty());
        assert!(warnings.is_empty());
        assert_eq!(store.free_count(), 4);
    }

    #[test]
    fn test_format() {
        let mut store = FileStore::new(8).unwrap();
        store.write("x.py", b"x").unwrap();
        store.format();

        assert!(store.is_empty());
        assert_eq!(store.free_count(), 8);
        assert!(store.region_bytes().iter().all(|&b| b == 0xFF));
    }

    proptest! {
        #[test]
        fn prop_read_returns_written_bytes(content in proptest::collection::vec(any::<u8>(), 1..4000)) {
            let mut store = FileStore::new(CHUNKS).unwrap();
            store.write("blob.bin", &content).unwrap();
            let read = store.read("blob.bin").unwrap();
            prop_assert_eq!(read.as_ref(), &content[..]);
        }
    }
}
