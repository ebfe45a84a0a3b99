// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Block-partitioned virtual byte buffer with LRU block eviction.
//!
//! The buffer spans the whole virtual address space of a remote file
//! while keeping only a bounded number of fixed-size blocks resident.
//! Read requests carry arbitrary ranges not aligned to block
//! boundaries, so each block tracks which of its sub-ranges have
//! actually been written; a query `has_data` only when every byte of it
//! is resident.

use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::debug;

use crate::core::{IngestError, Result};
use crate::range::{is_range_covered, merge_ranges, missing_ranges, Range};

/// Default block size: 100 MiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 100 * 1024 * 1024;

/// One resident block: its byte slab plus the written sub-ranges
/// (block-relative, sorted, disjoint).
struct Block {
    data: Vec<u8>,
    written: Vec<Range>,
}

/// Virtual buffer of a fixed total size with LRU-evicted blocks.
pub struct VirtualLruBuffer {
    total_size: u64,
    block_size: u64,
    blocks: LruCache<u64, Block>,
}

impl VirtualLruBuffer {
    /// Create a buffer where the whole file fits in one block.
    pub fn new(total_size: u64) -> Self {
        let block_size = total_size.max(1);
        Self::with_blocks(total_size, block_size, 1)
    }

    /// Create a buffer of `num_blocks` blocks of `block_size` bytes.
    pub fn with_blocks(total_size: u64, block_size: u64, num_blocks: usize) -> Self {
        let capacity = NonZeroUsize::new(num_blocks.max(1)).expect("max(1) is non-zero");
        VirtualLruBuffer {
            total_size,
            block_size: block_size.max(1),
            blocks: LruCache::new(capacity),
        }
    }

    /// Total virtual size in bytes.
    pub fn size(&self) -> u64 {
        self.total_size
    }

    /// Configured block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Byte length of the block at `index` (the last block may be short).
    fn block_len(&self, index: u64) -> usize {
        let start = index * self.block_size;
        (self.total_size.saturating_sub(start)).min(self.block_size) as usize
    }

    /// Copy `src` into the buffer at `offset`, spanning blocks as needed.
    ///
    /// Touched blocks become most-recently-used; writing an absent block
    /// evicts the least-recently-used resident block once the block
    /// budget is reached.
    pub fn copy_from(&mut self, src: &[u8], offset: u64) {
        debug_assert!(
            offset + src.len() as u64 <= self.total_size,
            "write past virtual size"
        );

        let mut written = 0usize;
        while written < src.len() {
            let absolute = offset + written as u64;
            let index = absolute / self.block_size;
            let within = (absolute % self.block_size) as usize;
            let block_len = self.block_len(index);
            let chunk = (block_len - within).min(src.len() - written);

            if !self.blocks.contains(&index) {
                let block = Block {
                    data: vec![0u8; block_len],
                    written: Vec::new(),
                };
                if let Some((evicted, _)) = self.blocks.push(index, block) {
                    if evicted != index {
                        debug!(block = evicted, "evicting least-recently-used cache block");
                    }
                }
            }

            let block = self
                .blocks
                .get_mut(&index)
                .expect("block inserted just above");
            block.data[within..within + chunk].copy_from_slice(&src[written..written + chunk]);
            block.written = merge_ranges(
                &[
                    block.written.as_slice(),
                    &[Range::new(within as u64, (within + chunk) as u64)],
                ]
                .concat(),
            );

            written += chunk;
        }
    }

    /// Whether every byte of `[start, end)` is resident.
    pub fn has_data(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return true;
        }
        if end > self.total_size {
            return false;
        }

        let mut position = start;
        while position < end {
            let index = position / self.block_size;
            let block_start = index * self.block_size;
            let within_start = position - block_start;
            let within_end = (end - block_start).min(self.block_len(index) as u64);

            match self.blocks.peek(&index) {
                Some(block) => {
                    if !is_range_covered(Range::new(within_start, within_end), &block.written) {
                        return false;
                    }
                }
                None => return false,
            }
            position = block_start + within_end;
        }
        true
    }

    /// Copy out `[start, end)`. Fails when any byte is not resident.
    pub fn slice(&mut self, start: u64, end: u64) -> Result<Bytes> {
        if !self.has_data(start, end) {
            return Err(IngestError::Other(format!(
                "requested range {start}..{end} is not resident in the cache"
            )));
        }

        let mut out = Vec::with_capacity((end - start) as usize);
        let mut position = start;
        while position < end {
            let index = position / self.block_size;
            let block_start = index * self.block_size;
            let within_start = (position - block_start) as usize;
            let within_end = ((end - block_start).min(self.block_len(index) as u64)) as usize;

            // get (not peek) so reads refresh recency too
            let block = self
                .blocks
                .get(&index)
                .expect("has_data verified residency");
            out.extend_from_slice(&block.data[within_start..within_end]);
            position = block_start + within_end as u64;
        }
        Ok(Bytes::from(out))
    }

    /// All resident byte ranges, in disjoint canonical form.
    pub fn ranges_with_data(&self) -> Vec<Range> {
        let mut absolute = Vec::new();
        for (index, block) in self.blocks.iter() {
            let base = index * self.block_size;
            for range in &block.written {
                absolute.push(Range::new(base + range.start, base + range.end));
            }
        }
        merge_ranges(&absolute)
    }

    /// The sub-ranges of `query` not resident, in order.
    pub fn missing_in(&self, query: Range) -> Vec<Range> {
        missing_ranges(query, &self.ranges_with_data())
    }
}
