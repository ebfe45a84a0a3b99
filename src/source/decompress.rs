// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Injected decompression handlers.
//!
//! Containers name their chunk compression by algorithm string; the
//! engine consumes handlers keyed by that name rather than binding the
//! codec crates directly into the parsers.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use crate::core::{IngestError, Result};

/// A decompression handler: `(compressed, decompressed_size) -> bytes`.
pub type DecompressHandler = Arc<dyn Fn(&[u8], u64) -> Result<Vec<u8>> + Send + Sync>;

/// Decompression handlers keyed by algorithm name.
pub type DecompressHandlers = HashMap<String, DecompressHandler>;

/// The standard handler set: zstd, lz4 and bz2.
pub fn default_decompress_handlers() -> DecompressHandlers {
    let mut handlers: DecompressHandlers = HashMap::new();

    handlers.insert(
        "zstd".to_string(),
        Arc::new(|data, size| {
            zstd::bulk::decompress(data, size as usize)
                .map_err(|e| IngestError::parse("zstd chunk", e.to_string()))
        }),
    );
    handlers.insert(
        "lz4".to_string(),
        Arc::new(|data, size| {
            lz4_flex::decompress(data, size as usize)
                .map_err(|e| IngestError::parse("lz4 chunk", e.to_string()))
        }),
    );
    handlers.insert(
        "bz2".to_string(),
        Arc::new(|data, size| {
            let mut decoder = bzip2::read::BzDecoder::new(data);
            let mut out = Vec::with_capacity(size as usize);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| IngestError::parse("bz2 chunk", e.to_string()))?;
            Ok(out)
        }),
    );

    handlers
}
