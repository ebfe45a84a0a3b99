// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Range-cached random-access reads over a byte-range transport.
//!
//! Combines the range algebra, the virtual LRU buffer and a
//! [`RangeReader`] into `read(offset, length)` with:
//! - at most one live upstream connection, owned by the scheduler
//! - cache-hit resolution out of the virtual buffer
//! - prefetch past the requested range when the cache has room
//! - read-ahead while idle
//! - reconnect-with-notification, or fail-fast on rapid repeat errors
//!
//! The scheduler reruns after every queue change and every chunk
//! arrival. Connections are identified by a generation counter; events
//! from a superseded connection are ignored.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::core::{IngestError, Result};
use crate::range::buffer::DEFAULT_BLOCK_SIZE;
use crate::range::{missing_ranges, Range, VirtualLruBuffer};
use crate::remote::{FetchEvent, Filelike, RangeReader};

/// A drifting connection within this many bytes of a needed range is
/// allowed to reach it rather than being torn down.
const CONNECTION_DRIFT_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Two transport errors within this window are fatal when no
/// reconnection callback is installed.
const RAPID_ERROR_WINDOW: Duration = Duration::from_millis(100);

/// Invoked with `true` when the connection starts failing and `false`
/// once data flows again.
pub type ReconnectCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct PendingRead {
    range: Range,
    tx: oneshot::Sender<Result<Bytes>>,
}

struct Connection {
    generation: u64,
    /// Bytes still expected from the live stream
    remaining: Range,
}

struct State {
    buffer: VirtualLruBuffer,
    requests: Vec<PendingRead>,
    connection: Option<Connection>,
    last_resolved_end: Option<u64>,
    last_error_at: Option<Instant>,
    reconnecting: bool,
    closed: Option<IngestError>,
    generation: u64,
}

struct Shared {
    reader: Arc<dyn RangeReader>,
    state: Mutex<State>,
    file_size: u64,
    cache_size: u64,
    identifier: Option<String>,
    keep_reconnecting: Option<ReconnectCallback>,
}

/// Random-access cached view of a remote file.
pub struct CachedFilelike {
    shared: Arc<Shared>,
}

impl CachedFilelike {
    /// Open the remote file and allocate the cache.
    pub async fn open(reader: Arc<dyn RangeReader>, cache_size: u64) -> Result<Self> {
        Self::open_inner(reader, cache_size, None).await
    }

    /// Open with a reconnection callback: transport errors retry
    /// indefinitely, notifying the callback instead of failing.
    pub async fn open_with_callback(
        reader: Arc<dyn RangeReader>,
        cache_size: u64,
        callback: ReconnectCallback,
    ) -> Result<Self> {
        Self::open_inner(reader, cache_size, Some(callback)).await
    }

    async fn open_inner(
        reader: Arc<dyn RangeReader>,
        cache_size: u64,
        keep_reconnecting: Option<ReconnectCallback>,
    ) -> Result<Self> {
        let info = reader.open().await?;

        let buffer = if cache_size >= info.size {
            VirtualLruBuffer::new(info.size)
        } else {
            // Two extra blocks absorb ranges not aligned to block
            // boundaries.
            let num_blocks = cache_size.div_ceil(DEFAULT_BLOCK_SIZE) as usize + 2;
            VirtualLruBuffer::with_blocks(info.size, DEFAULT_BLOCK_SIZE, num_blocks)
        };

        let shared = Arc::new(Shared {
            reader,
            state: Mutex::new(State {
                buffer,
                requests: Vec::new(),
                connection: None,
                last_resolved_end: None,
                last_error_at: None,
                reconnecting: false,
                closed: None,
                generation: 0,
            }),
            file_size: info.size,
            cache_size,
            identifier: info.identifier,
            keep_reconnecting,
        });

        // Kick off read-ahead when the whole file fits in cache.
        Shared::schedule(&shared).await;

        Ok(CachedFilelike { shared })
    }

    /// Opaque change-detection identifier from the transport, if any.
    pub fn identifier(&self) -> Option<&str> {
        self.shared.identifier.as_deref()
    }

    /// Read `length` bytes at `offset`, waiting on the cache or the
    /// upstream connection as needed.
    pub async fn read(&self, offset: u64, length: u64) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        if length > self.shared.cache_size {
            return Err(IngestError::request_exceeds_cache(
                length,
                self.shared.cache_size,
            ));
        }
        let end = offset + length;
        if end > self.shared.file_size {
            return Err(IngestError::range_exceeds_file(end, self.shared.file_size));
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock().await;
            if let Some(err) = &state.closed {
                return Err(err.clone());
            }
            state.requests.push(PendingRead {
                range: Range::new(offset, end),
                tx,
            });
        }
        Shared::schedule(&self.shared).await;

        rx.await
            .map_err(|_| IngestError::Other("cached filelike dropped the read".to_string()))?
    }
}

#[async_trait]
impl Filelike for CachedFilelike {
    fn size(&self) -> u64 {
        self.shared.file_size
    }

    async fn read(&self, offset: u64, length: u64) -> Result<Bytes> {
        CachedFilelike::read(self, offset, length).await
    }
}

impl State {
    /// Resolve every queued request whose range is fully resident.
    fn resolve_ready(&mut self) {
        let mut i = 0;
        while i < self.requests.len() {
            let range = self.requests[i].range;
            if self.buffer.has_data(range.start, range.end) {
                let request = self.requests.remove(i);
                let result = self.buffer.slice(range.start, range.end);
                self.last_resolved_end = Some(range.end);
                let _ = request.tx.send(result);
            } else {
                i += 1;
            }
        }
    }

    /// Fail every queued request with `err`.
    fn fail_all(&mut self, err: &IngestError) {
        for request in self.requests.drain(..) {
            let _ = request.tx.send(Err(err.clone()));
        }
    }

    /// Decide whether to open a new connection and over which range.
    fn plan_connection(&self, cache_size: u64, file_size: u64) -> Option<Range> {
        let downloaded = self.buffer.ranges_with_data();

        if let Some(request) = self.requests.first() {
            let needed = missing_ranges(request.range, &downloaded);
            // A fully-resident request would already have been resolved.
            let first_needed = *needed.first()?;

            let need_new = match &self.connection {
                None => true,
                Some(connection) => {
                    let remaining = connection.remaining;
                    !needed.iter().any(|m| remaining.overlaps(m))
                        || remaining.start + CONNECTION_DRIFT_THRESHOLD < first_needed.start
                }
            };
            if !need_new {
                return None;
            }

            let target = if cache_size >= file_size {
                // Room for everything: run to end of file from the
                // first needed byte.
                *missing_ranges(Range::new(first_needed.start, file_size), &downloaded).first()?
            } else if first_needed.end == request.range.end {
                // The tail of the request is missing: prefetch beyond it
                // as far as the cache allows.
                Range::new(
                    first_needed.start,
                    (request.range.start + cache_size).min(file_size),
                )
            } else {
                first_needed
            };

            missing_ranges(target, &downloaded).first().copied()
        } else if self.connection.is_none() {
            if cache_size >= file_size {
                let start = self.last_resolved_end.unwrap_or(0).min(file_size);
                let ahead = missing_ranges(Range::new(start, file_size), &downloaded);
                match ahead.first() {
                    Some(range) => Some(*range),
                    None => missing_ranges(Range::new(0, file_size), &downloaded)
                        .first()
                        .copied(),
                }
            } else if let Some(last) = self.last_resolved_end {
                let end = last.saturating_add(cache_size).min(file_size);
                if last >= end {
                    return None;
                }
                missing_ranges(Range::new(last, end), &downloaded)
                    .first()
                    .copied()
            } else {
                None
            }
        } else {
            None
        }
    }
}

impl Shared {
    /// Run the connection scheduler: resolve cache hits, then open a
    /// new upstream connection when the decision rule calls for one.
    ///
    /// Boxed so its future type doesn't embed `pump`'s, which in turn
    /// awaits this function — otherwise the mutual recursion produces
    /// an infinite future type.
    fn schedule<'a>(
        shared: &'a Arc<Shared>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(Self::schedule_inner(shared))
    }

    async fn schedule_inner(shared: &Arc<Shared>) {
        let plan = {
            let mut state = shared.state.lock().await;
            if let Some(err) = state.closed.clone() {
                state.fail_all(&err);
                return;
            }
            state.resolve_ready();
            match state.plan_connection(shared.cache_size, shared.file_size) {
                Some(fetch) => {
                    state.generation += 1;
                    let generation = state.generation;
                    state.connection = Some(Connection {
                        generation,
                        remaining: fetch,
                    });
                    Some((generation, fetch))
                }
                None => None,
            }
        };

        if let Some((generation, fetch)) = plan {
            debug!(
                start = fetch.start,
                end = fetch.end,
                generation,
                "opening upstream connection"
            );
            let shared = shared.clone();
            let pump: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
                Box::pin(Shared::pump(shared, generation, fetch));
            tokio::spawn(pump);
        }
    }

    /// Drive one upstream connection until it completes, errors, or is
    /// superseded by a newer generation.
    async fn pump(shared: Arc<Shared>, generation: u64, fetch: Range) {
        let mut stream = match shared.reader.fetch(fetch.start, fetch.len()).await {
            Ok(stream) => stream,
            Err(e) => {
                Shared::handle_stream_error(&shared, generation, e).await;
                return;
            }
        };

        loop {
            let event = stream.next_event().await;
            match event {
                Some(FetchEvent::Data(chunk)) => {
                    let (was_reconnecting, covered) = {
                        let mut state = shared.state.lock().await;
                        let superseded = match &state.connection {
                            Some(connection) => connection.generation != generation,
                            None => true,
                        };
                        if superseded {
                            return;
                        }

                        let connection = state.connection.as_ref().expect("checked above");
                        let at = connection.remaining.start;
                        let take = (chunk.len() as u64).min(connection.remaining.len()) as usize;
                        state.buffer.copy_from(&chunk[..take], at);

                        let connection = state.connection.as_mut().expect("checked above");
                        connection.remaining.start += take as u64;
                        let covered = connection.remaining.is_empty();

                        let was_reconnecting = state.reconnecting;
                        state.reconnecting = false;
                        state.last_error_at = None;
                        state.resolve_ready();
                        if covered {
                            state.connection = None;
                        }
                        (was_reconnecting, covered)
                    };

                    if was_reconnecting {
                        if let Some(callback) = &shared.keep_reconnecting {
                            callback(false);
                        }
                    }

                    if covered {
                        stream.destroy();
                        Shared::schedule(&shared).await;
                        return;
                    }
                    // Rerun the decision after every chunk; a queued
                    // request may demand a different connection.
                    Shared::schedule(&shared).await;
                }
                Some(FetchEvent::End) | None => {
                    {
                        let mut state = shared.state.lock().await;
                        match &state.connection {
                            Some(connection) if connection.generation == generation => {
                                state.connection = None;
                            }
                            _ => return,
                        }
                    }
                    Shared::schedule(&shared).await;
                    return;
                }
                Some(FetchEvent::Error(e)) => {
                    Shared::handle_stream_error(&shared, generation, e).await;
                    return;
                }
            }
        }
    }

    /// Transport failure policy: retry with notification when a
    /// reconnection callback is installed; otherwise two errors within
    /// the rapid-error window close the filelike.
    async fn handle_stream_error(shared: &Arc<Shared>, generation: u64, err: IngestError) {
        let mut notify = false;
        {
            let mut state = shared.state.lock().await;
            let superseded = match &state.connection {
                Some(connection) => connection.generation != generation,
                None => true,
            };
            if superseded {
                // A superseded stream's errors are ignored.
                return;
            }
            state.connection = None;

            if shared.keep_reconnecting.is_some() {
                if !state.reconnecting {
                    state.reconnecting = true;
                    notify = true;
                }
            } else {
                let now = Instant::now();
                if let Some(previous) = state.last_error_at {
                    if now.duration_since(previous) <= RAPID_ERROR_WINDOW {
                        state.closed = Some(err.clone());
                        state.fail_all(&err);
                        return;
                    }
                }
                state.last_error_at = Some(now);
            }
        }

        if notify {
            if let Some(callback) = &shared.keep_reconnecting {
                callback(true);
            }
        }
        Shared::schedule(shared).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{FetchStream, RemoteFileInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Scripted transport: serves from an in-memory file, records every
    /// fetch, and fails the first `fail_fetches` of them.
    struct FakeReader {
        data: Vec<u8>,
        fetches: StdMutex<Vec<(u64, u64)>>,
        fail_fetches: AtomicUsize,
    }

    impl FakeReader {
        fn new(data: Vec<u8>) -> Self {
            FakeReader {
                data,
                fetches: StdMutex::new(Vec::new()),
                fail_fetches: AtomicUsize::new(0),
            }
        }

        fn failing(data: Vec<u8>, failures: usize) -> Self {
            let reader = Self::new(data);
            reader.fail_fetches.store(failures, Ordering::SeqCst);
            reader
        }

        fn fetches(&self) -> Vec<(u64, u64)> {
            self.fetches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RangeReader for FakeReader {
        async fn open(&self) -> Result<RemoteFileInfo> {
            Ok(RemoteFileInfo {
                size: self.data.len() as u64,
                identifier: Some("fake-etag".to_string()),
            })
        }

        async fn fetch(&self, offset: u64, length: u64) -> Result<FetchStream> {
            self.fetches.lock().unwrap().push((offset, length));

            let (sink, mut stream) = FetchStream::channel(8);
            let fail = self
                .fail_fetches
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let payload = self.data[offset as usize..(offset + length) as usize].to_vec();

            let task = tokio::spawn(async move {
                if fail {
                    sink.send(FetchEvent::Error(IngestError::http_network(
                        "connection reset",
                    )))
                    .await;
                    return;
                }
                // Deliver in small chunks like a real body stream.
                for piece in payload.chunks(64) {
                    if !sink.send(FetchEvent::Data(Bytes::copy_from_slice(piece))).await {
                        return;
                    }
                }
                sink.send(FetchEvent::End).await;
            });
            stream.attach_task(task);
            Ok(stream)
        }
    }

    fn file_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_read_round_trips_data() {
        let data = file_bytes(1000);
        let reader = Arc::new(FakeReader::new(data.clone()));
        let file = CachedFilelike::open(reader, 2048).await.unwrap();

        let out = file.read(100, 50).await.unwrap();
        assert_eq!(out.as_ref(), &data[100..150]);
        assert_eq!(file.size(), 1000);
        assert_eq!(file.identifier(), Some("fake-etag"));
    }

    #[tokio::test]
    async fn test_sequential_reads_concatenate_to_file() {
        let data = file_bytes(600);
        let reader = Arc::new(FakeReader::new(data.clone()));
        let file = CachedFilelike::open(reader, 200).await.unwrap();

        let mut assembled = Vec::new();
        for chunk_start in (0..600u64).step_by(150) {
            let out = file.read(chunk_start, 150).await.unwrap();
            assembled.extend_from_slice(&out);
        }
        assert_eq!(assembled, data);
    }

    #[tokio::test]
    async fn test_zero_length_read_opens_no_connection() {
        let reader = Arc::new(FakeReader::new(file_bytes(100)));
        let file = CachedFilelike::open(reader.clone(), 10).await.unwrap();

        let out = file.read(5, 0).await.unwrap();
        assert!(out.is_empty());
        assert!(reader.fetches().is_empty(), "no fetch for empty read");
    }

    #[tokio::test]
    async fn test_read_larger_than_cache_fails() {
        let reader = Arc::new(FakeReader::new(file_bytes(100)));
        let file = CachedFilelike::open(reader, 10).await.unwrap();
        assert!(matches!(
            file.read(0, 11).await,
            Err(IngestError::RequestExceedsCache { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_past_end_fails() {
        let reader = Arc::new(FakeReader::new(file_bytes(100)));
        let file = CachedFilelike::open(reader, 50).await.unwrap();
        assert!(matches!(
            file.read(95, 10).await,
            Err(IngestError::RangeExceedsFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_last_byte_read_is_inclusive() {
        let data = file_bytes(100);
        let reader = Arc::new(FakeReader::new(data.clone()));
        let file = CachedFilelike::open(reader, 50).await.unwrap();
        let out = file.read(90, 10).await.unwrap();
        assert_eq!(out.as_ref(), &data[90..100]);
    }

    #[tokio::test]
    async fn test_second_overlapping_read_hits_cache() {
        // Scaled rendition of the 200 MiB / 50 MiB scenario.
        let data = file_bytes(2000);
        let reader = Arc::new(FakeReader::new(data.clone()));
        let file = CachedFilelike::open(reader.clone(), 500).await.unwrap();

        let first = file.read(0, 100).await.unwrap();
        assert_eq!(first.as_ref(), &data[0..100]);
        let second = file.read(50, 50).await.unwrap();
        assert_eq!(second.as_ref(), &data[50..100]);

        let fetches = reader.fetches();
        // The first fetch prefetches out to the cache size.
        assert_eq!(fetches[0], (0, 500));
        // The overlapping read never reached upstream; anything after
        // the first fetch is idle read-ahead past the cached span.
        assert!(
            fetches[1..].iter().all(|&(offset, _)| offset >= 500),
            "second read must not trigger its own fetch: {fetches:?}"
        );
    }

    #[tokio::test]
    async fn test_whole_file_cache_prefetches_on_open() {
        let data = file_bytes(300);
        let reader = Arc::new(FakeReader::new(data.clone()));
        let file = CachedFilelike::open(reader.clone(), 1024).await.unwrap();

        // Wait for the background read-ahead to finish, then a read
        // resolves without any further fetch.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = reader.fetches().len();
        let out = file.read(250, 50).await.unwrap();
        assert_eq!(out.as_ref(), &data[250..300]);
        assert_eq!(reader.fetches().len(), before);
    }

    #[tokio::test]
    async fn test_two_rapid_errors_without_callback_fail_the_read() {
        let reader = Arc::new(FakeReader::failing(file_bytes(100), 2));
        let file = CachedFilelike::open(reader, 50).await.unwrap();

        let result = file.read(0, 10).await;
        assert!(
            matches!(result, Err(IngestError::HttpNetwork { .. })),
            "expected transport failure, got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_reconnect_callback_retries_until_data() {
        let notifications: Arc<StdMutex<Vec<bool>>> = Arc::new(StdMutex::new(Vec::new()));
        let observed = notifications.clone();

        let reader = Arc::new(FakeReader::failing(file_bytes(100), 2));
        let file = CachedFilelike::open_with_callback(
            reader,
            50,
            Arc::new(move |reconnecting| {
                notifications.lock().unwrap().push(reconnecting);
            }),
        )
        .await
        .unwrap();

        let data = file.read(0, 10).await.unwrap();
        assert_eq!(data.len(), 10);

        let seen = observed.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![true, false],
            "callback fires true on first error, false on next data"
        );
    }
}
