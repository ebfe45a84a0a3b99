// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Random-access seams over local and remote log files.
//!
//! Sources read containers through the [`Filelike`] trait so the same
//! parsing code serves memory-mapped local files and range-cached
//! remote files. The remote side is itself split: [`RangeReader`] is
//! the raw transport (one HTTP range request per fetch) and
//! [`CachedFilelike`] layers caching, prefetch and reconnection on top.

pub mod blob;
pub mod cached;
pub mod http;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::Result;

pub use blob::BlobFilelike;
pub use cached::CachedFilelike;
pub use http::HttpRangeReader;

/// Random-access read interface over a log file.
#[async_trait]
pub trait Filelike: Send + Sync {
    /// Total file size in bytes.
    fn size(&self) -> u64;

    /// Read `length` bytes starting at `offset`.
    async fn read(&self, offset: u64, length: u64) -> Result<Bytes>;
}

/// Metadata learned when opening a remote file.
#[derive(Debug, Clone)]
pub struct RemoteFileInfo {
    /// Total size in bytes (from Content-Length)
    pub size: u64,
    /// Opaque change-detection identifier (ETag or Last-Modified)
    pub identifier: Option<String>,
}

/// Raw byte-range transport: open once, then fetch intervals as streams.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Validate the resource and learn its size and identifier.
    async fn open(&self) -> Result<RemoteFileInfo>;

    /// Start streaming `[offset, offset + length)`.
    async fn fetch(&self, offset: u64, length: u64) -> Result<FetchStream>;
}

/// One event on a fetch stream.
#[derive(Debug)]
pub enum FetchEvent {
    /// A chunk of body bytes
    Data(Bytes),
    /// The requested interval completed
    End,
    /// The transfer failed
    Error(crate::core::IngestError),
}

/// Consumer half of a fetch: an event stream with an abort switch.
///
/// After [`destroy`](FetchStream::destroy) no further events are
/// delivered and the producing task is aborted.
pub struct FetchStream {
    rx: mpsc::Receiver<FetchEvent>,
    destroyed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

/// Producer half of a fetch stream.
pub struct FetchSink {
    tx: mpsc::Sender<FetchEvent>,
    destroyed: Arc<AtomicBool>,
}

impl FetchStream {
    /// Create a connected sink/stream pair.
    pub fn channel(capacity: usize) -> (FetchSink, FetchStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let destroyed = Arc::new(AtomicBool::new(false));
        (
            FetchSink {
                tx,
                destroyed: destroyed.clone(),
            },
            FetchStream {
                rx,
                destroyed,
                task: None,
            },
        )
    }

    /// Attach the producing task so destroy can abort it.
    pub fn attach_task(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    /// Receive the next event. `None` after destroy or producer exit.
    pub async fn next_event(&mut self) -> Option<FetchEvent> {
        if self.destroyed.load(Ordering::Acquire) {
            return None;
        }
        self.rx.recv().await
    }

    /// Abort the transfer without emitting an error.
    pub fn destroy(&mut self) {
        self.destroyed.store(true, Ordering::Release);
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FetchStream {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl FetchSink {
    /// Deliver an event. Returns false once the consumer destroyed the
    /// stream; the producer should stop.
    pub async fn send(&self, event: FetchEvent) -> bool {
        if self.destroyed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(event).await.is_ok()
    }

    /// Whether the consumer destroyed the stream.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}
