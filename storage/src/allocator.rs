use std::collections::BTreeSet;

use crate::{Result, StorageError};

/// Zero-based position of a chunk inside the storage region.
pub type ChunkIndex = usize;

/// Free-pool bookkeeping for a fixed number of chunks.
///
/// Allocation always hands out the lowest free indices first, so the same
/// sequence of operations produces the same chunk layout (and therefore the
/// same image bytes) every time.
#[derive(Debug, Clone)]
pub struct ChunkAllocator {
    total: usize,
    free: BTreeSet<ChunkIndex>,
}

impl ChunkAllocator {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            free: (0..total).collect(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn used_count(&self) -> usize {
        self.total - self.free.len()
    }

    pub fn is_free(&self, index: ChunkIndex) -> bool {
        self.free.contains(&index)
    }

    /// Takes `n` chunks out of the free pool. Nothing is taken unless all `n`
    /// are available.
    pub fn allocate(&mut self, n: usize) -> Result<Vec<ChunkIndex>> {
        if n > self.free.len() {
            return Err(StorageError::OutOfSpace {
                needed: n,
                available: self.free.len(),
            });
        }

        let chunks: Vec<ChunkIndex> = self.free.iter().take(n).copied().collect();
        for index in &chunks {
            self.free.remove(index);
        }

        tracing::debug!("Allocated {} chunks: {:?}", n, chunks);
        Ok(chunks)
    }

    /// Returns chunks to the pool. Already free or out-of-range indices are
    /// ignored.
    pub fn free(&mut self, indices: &[ChunkIndex]) {
        for &index in indices {
            if index < self.total {
                self.free.insert(index);
            }
        }
    }

    /// Marks specific chunks as used, e.g. when rebuilding from a decoded
    /// region. Fails without side effects if any index is unavailable.
    pub fn claim(&mut self, indices: &[ChunkIndex]) -> Result<()> {
        let mut seen = BTreeSet::new();
        for &index in indices {
            if !self.free.contains(&index) || !seen.insert(index) {
                return Err(StorageError::Corruption(format!(
                    "chunk {} is out of range or already in use",
                    index
                )));
            }
        }

        for index in indices {
            self.free.remove(index);
        }
        Ok(())
    }
}
