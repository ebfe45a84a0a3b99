// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! File-backed [`Filelike`] over a memory mapping.

use std::fs::File;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::{IngestError, Result};
use crate::remote::Filelike;

/// Memory-mapped local file exposing the same random-access seam the
/// cached remote filelike does.
pub struct BlobFilelike {
    mmap: memmap2::Mmap,
    size: u64,
}

impl BlobFilelike {
    /// Map a local file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| IngestError::Io {
            message: format!("Failed to open file: {e}"),
        })?;

        let size = file
            .metadata()
            .map_err(|e| IngestError::Io {
                message: format!("Failed to get metadata: {e}"),
            })?
            .len();

        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| IngestError::Io {
            message: format!("Failed to mmap file: {e}"),
        })?;

        Ok(BlobFilelike { mmap, size })
    }

    /// Wrap an in-memory byte buffer (used by tests and stream probes).
    pub fn from_bytes(data: Vec<u8>) -> InMemoryFilelike {
        InMemoryFilelike {
            size: data.len() as u64,
            data: Bytes::from(data),
        }
    }
}

#[async_trait]
impl Filelike for BlobFilelike {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&self, offset: u64, length: u64) -> Result<Bytes> {
        let end = offset + length;
        if end > self.size {
            return Err(IngestError::range_exceeds_file(end, self.size));
        }
        Ok(Bytes::copy_from_slice(
            &self.mmap[offset as usize..end as usize],
        ))
    }
}

/// In-memory byte buffer behind the [`Filelike`] seam.
pub struct InMemoryFilelike {
    data: Bytes,
    size: u64,
}

#[async_trait]
impl Filelike for InMemoryFilelike {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&self, offset: u64, length: u64) -> Result<Bytes> {
        let end = offset + length;
        if end > self.size {
            return Err(IngestError::range_exceeds_file(end, self.size));
        }
        Ok(self.data.slice(offset as usize..end as usize))
    }
}
