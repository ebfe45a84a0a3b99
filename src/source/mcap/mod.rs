// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! MCAP source facade.
//!
//! Dispatches a `file | url` descriptor to a concrete implementation.
//! An indexed reader is attempted first; until one ships, every input
//! takes the unindexed in-memory path.

pub mod records;
pub mod unindexed;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{IngestError, Result};
use crate::remote::{FetchEvent, Filelike, HttpRangeReader, RangeReader};
use crate::source::decompress::{default_decompress_handlers, DecompressHandlers};
use crate::source::mcap::unindexed::{McapUnindexedSource, MAX_STREAM_SIZE};
use crate::source::{
    BackfillArgs, CancelToken, Initialization, IterableSource, IteratorStream, MessageEvent,
    MessageIteratorArgs, SourceInput,
};

/// MCAP source over a file or URL descriptor.
pub struct McapIterableSource {
    input: SourceInput,
    handlers: DecompressHandlers,
    inner: Option<McapUnindexedSource>,
}

impl McapIterableSource {
    /// Create a source with the standard decompression handlers.
    pub fn new(input: SourceInput) -> Self {
        Self::with_handlers(input, default_decompress_handlers())
    }

    /// Create a source with caller-supplied decompression handlers.
    pub fn with_handlers(input: SourceInput, handlers: DecompressHandlers) -> Self {
        McapIterableSource {
            input,
            handlers,
            inner: None,
        }
    }

    fn inner(&self) -> Result<&McapUnindexedSource> {
        self.inner.as_ref().ok_or(IngestError::NotInitialized)
    }

    /// Attempt to build an indexed reader for this input.
    ///
    /// Indexed reading is future work; the unindexed path is currently
    /// always taken.
    fn try_create_indexed_reader(_input: &SourceInput) -> bool {
        false
    }

    /// Buffer the whole resource for the unindexed path.
    async fn fetch_all(&self) -> Result<Vec<u8>> {
        if Self::try_create_indexed_reader(&self.input) {
            unreachable!("indexed reader is not implemented");
        }

        match &self.input {
            SourceInput::File(path) => {
                let blob = crate::remote::BlobFilelike::open(path)?;
                let size = blob.size();
                if size > MAX_STREAM_SIZE {
                    return Err(IngestError::file_too_large(size, MAX_STREAM_SIZE));
                }
                // Probe readability before committing to a full read.
                if size > 0 {
                    blob.read(0, 1).await?;
                }
                Ok(blob.read(0, size).await?.to_vec())
            }
            SourceInput::Url(url) => {
                let reader = Arc::new(HttpRangeReader::new(url.clone()));
                let info = reader.open().await?;
                if info.size > MAX_STREAM_SIZE {
                    return Err(IngestError::file_too_large(info.size, MAX_STREAM_SIZE));
                }

                let mut data = Vec::with_capacity(info.size as usize);
                let mut stream = reader.fetch(0, info.size).await?;
                loop {
                    match stream.next_event().await {
                        Some(FetchEvent::Data(chunk)) => data.extend_from_slice(&chunk),
                        Some(FetchEvent::End) | None => break,
                        Some(FetchEvent::Error(e)) => return Err(e),
                    }
                }
                if data.len() as u64 != info.size {
                    return Err(IngestError::http_network(format!(
                        "body ended after {} of {} bytes",
                        data.len(),
                        info.size
                    )));
                }
                Ok(data)
            }
            SourceInput::Stream => Err(IngestError::unsupported_input("stream")),
        }
    }
}

#[async_trait]
impl IterableSource for McapIterableSource {
    async fn initialize(&mut self) -> Result<Initialization> {
        if self.inner.is_some() {
            return Err(IngestError::AlreadyInitialized);
        }
        let data = self.fetch_all().await?;
        let mut source = McapUnindexedSource::from_bytes(data, self.handlers.clone())?;
        let initialization = source.initialize().await?;
        self.inner = Some(source);
        Ok(initialization)
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<IteratorStream> {
        self.inner()?.message_iterator(args)
    }

    async fn backfill(
        &self,
        args: BackfillArgs,
        cancel: Option<CancelToken>,
    ) -> Result<Vec<MessageEvent>> {
        self.inner()?.backfill(args, cancel).await
    }
}
