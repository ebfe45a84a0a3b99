// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! ROS1 bag source.
//!
//! Opens a bag over the cached filelike (URLs) or a blob adapter
//! (files), builds one message reader per connection from its message
//! definition, and iterates chunks lazily: a chunk is read and
//! decompressed only when the iterator reaches it, and payloads are
//! deserialized per message.

pub mod format;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_stream::stream;
use async_trait::async_trait;
use tracing::warn;

use crate::core::{estimate_message_size, IngestError, Result, Time};
use crate::encoding::CdrDecoder;
use crate::remote::{BlobFilelike, CachedFilelike, Filelike, HttpRangeReader};
use crate::schema::{msg, RosVersion};
use crate::source::bag::format::{BagChunkInfo, BagFile, BagMessageData};
use crate::source::decompress::{default_decompress_handlers, DecompressHandlers};
use crate::source::{
    BackfillArgs, CancelToken, Initialization, IterableSource, IteratorResult, IteratorStream,
    MessageEvent, MessageIteratorArgs, Problem, Severity, SourceInput, Topic,
};

/// Default remote cache: 200 MiB.
const DEFAULT_CACHE_SIZE: u64 = 200 * 1024 * 1024;

/// Per-connection message reader.
struct ConnectionReader {
    topic: String,
    schema_name: String,
    decoder: CdrDecoder,
}

/// State built at initialize time.
struct BagState {
    bag: BagFile,
    readers: HashMap<u32, ConnectionReader>,
    /// First estimate per topic, reused for every later message
    estimates_by_topic: Mutex<HashMap<String, u64>>,
    start: Time,
    end: Time,
}

/// ROS1 bag source over a file or URL descriptor.
pub struct BagIterableSource {
    input: SourceInput,
    handlers: DecompressHandlers,
    cache_size: u64,
    state: Option<Arc<BagState>>,
}

impl BagIterableSource {
    /// Create a source with the standard decompression handlers.
    pub fn new(input: SourceInput) -> Self {
        Self::with_handlers(input, default_decompress_handlers())
    }

    /// Create a source with caller-supplied decompression handlers.
    pub fn with_handlers(input: SourceInput, handlers: DecompressHandlers) -> Self {
        BagIterableSource {
            input,
            handlers,
            cache_size: DEFAULT_CACHE_SIZE,
            state: None,
        }
    }

    fn state(&self) -> Result<&Arc<BagState>> {
        self.state.as_ref().ok_or(IngestError::NotInitialized)
    }

    async fn open_filelike(&self) -> Result<Arc<dyn Filelike>> {
        match &self.input {
            SourceInput::File(path) => Ok(Arc::new(BlobFilelike::open(path)?)),
            SourceInput::Url(url) => {
                let reader = Arc::new(HttpRangeReader::new(url.clone()));
                Ok(Arc::new(CachedFilelike::open(reader, self.cache_size).await?))
            }
            SourceInput::Stream => Err(IngestError::unsupported_input("stream")),
        }
    }
}

/// Warn when more than a quarter of the chunks overlap in time;
/// playback order degrades across overlapping chunks.
fn check_chunk_overlaps(chunks: &[BagChunkInfo]) {
    if chunks.is_empty() {
        return;
    }
    let mut sorted: Vec<&BagChunkInfo> = chunks.iter().collect();
    sorted.sort_by_key(|c| c.start_time);

    let mut overlaps = 0usize;
    let mut max_end = 0u64;
    for chunk in sorted {
        if chunk.start_time < max_end {
            overlaps += 1;
        }
        max_end = max_end.max(chunk.end_time);
    }

    if overlaps as f64 > chunks.len() as f64 * 0.25 {
        warn!(
            overlaps,
            chunk_count = chunks.len(),
            "bag has many overlapping chunks; playback order may degrade"
        );
    }
}

impl BagState {
    /// Deserialize one chunk message into an event. `None` when the
    /// connection has no reader; `Err` carries the decode failure.
    fn decode_message(&self, message: &BagMessageData) -> Option<Result<MessageEvent>> {
        let reader = self.readers.get(&message.conn_id)?;

        // The chunk buffer may be reused by the iterator; decode from
        // our own copy of the payload.
        let payload = message.data.clone();
        let decoded = match reader.decoder.decode_packed(&payload) {
            Ok(value) => value,
            Err(e) => return Some(Err(e)),
        };

        let estimated = {
            let mut estimates = self.estimates_by_topic.lock().expect("estimate lock");
            *estimates
                .entry(reader.topic.clone())
                .or_insert_with(|| estimate_message_size(&decoded))
        };

        let receive_time = Time::from_nanos(message.time);
        Some(Ok(MessageEvent {
            topic: reader.topic.clone(),
            schema_name: reader.schema_name.clone(),
            receive_time,
            publish_time: Some(receive_time),
            message: decoded,
            size_in_bytes: (payload.len() as u64).max(estimated),
        }))
    }
}

#[async_trait]
impl IterableSource for BagIterableSource {
    async fn initialize(&mut self) -> Result<Initialization> {
        if self.state.is_some() {
            return Err(IngestError::AlreadyInitialized);
        }

        let file = self.open_filelike().await?;
        let bag = BagFile::open(file, self.handlers.clone()).await?;

        let mut readers = HashMap::new();
        let mut topics = Vec::new();
        let mut datatypes = HashMap::new();
        let mut publishers_by_topic: HashMap<String, BTreeSet<String>> = HashMap::new();

        for conn in bag.connections().values() {
            // A connection without a type cannot be decoded; skip it
            // rather than failing the whole bag.
            if conn.message_type.is_empty() {
                warn!(conn = conn.conn_id, topic = %conn.topic, "connection has no type, skipping");
                continue;
            }

            let schema = match msg::parse_with_version(
                &conn.message_type,
                &conn.message_definition,
                RosVersion::Ros1,
            ) {
                Ok(schema) => schema,
                Err(e) => {
                    warn!(
                        conn = conn.conn_id,
                        topic = %conn.topic,
                        error = %e,
                        "failed to parse message definition, skipping connection"
                    );
                    continue;
                }
            };
            for (name, datatype) in &schema.types {
                datatypes.insert(name.clone(), datatype.clone());
            }

            let decoder = match CdrDecoder::new(schema, &conn.message_type) {
                Ok(decoder) => decoder,
                Err(e) => {
                    warn!(
                        conn = conn.conn_id,
                        topic = %conn.topic,
                        error = %e,
                        "failed to build reader, skipping connection"
                    );
                    continue;
                }
            };

            topics.push(Topic {
                name: conn.topic.clone(),
                schema_name: Some(conn.message_type.clone()),
            });
            if !conn.caller_id.is_empty() {
                publishers_by_topic
                    .entry(conn.topic.clone())
                    .or_default()
                    .insert(conn.caller_id.clone());
            }
            readers.insert(
                conn.conn_id,
                ConnectionReader {
                    topic: conn.topic.clone(),
                    schema_name: conn.message_type.clone(),
                    decoder,
                },
            );
        }

        check_chunk_overlaps(bag.chunks());

        let (start, end) = bag
            .chunks()
            .iter()
            .filter(|c| c.end_time > 0)
            .fold(None, |acc: Option<(u64, u64)>, c| {
                Some(match acc {
                    None => (c.start_time, c.end_time),
                    Some((s, e)) => (s.min(c.start_time), e.max(c.end_time)),
                })
            })
            .map(|(s, e)| (Time::from_nanos(s), Time::from_nanos(e)))
            .unwrap_or((Time::ZERO, Time::ZERO));

        self.state = Some(Arc::new(BagState {
            bag,
            readers,
            estimates_by_topic: Mutex::new(HashMap::new()),
            start,
            end,
        }));

        Ok(Initialization {
            start,
            end,
            topics,
            datatypes,
            publishers_by_topic,
            ..Default::default()
        })
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<IteratorStream> {
        let state = self.state()?.clone();
        let start = args.start.unwrap_or(state.start);
        let end = args.end.unwrap_or(state.end);

        let iterator = stream! {
            if args.topics.is_empty() || start > end {
                return;
            }
            let start_nanos = start.to_nanos();

            let mut chunk_order: Vec<BagChunkInfo> = state
                .bag
                .chunks()
                .iter()
                .filter(|c| c.end_time == 0 || c.end_time >= start_nanos)
                .cloned()
                .collect();
            if args.reverse {
                chunk_order.reverse();
            }

            for chunk in chunk_order {
                let mut messages = match state.bag.read_chunk(&chunk).await {
                    Ok(messages) => messages,
                    Err(e) => {
                        yield IteratorResult::Problem(Problem {
                            connection_id: 0,
                            severity: Severity::Error,
                            message: "failed to read bag chunk".to_string(),
                            error: Some(e.to_string()),
                            tip: None,
                        });
                        continue;
                    }
                };
                messages.sort_by_key(|m| m.time);
                if args.reverse {
                    messages.reverse();
                }

                for message in messages {
                    let receive_time = Time::from_nanos(message.time);
                    if receive_time < start {
                        if args.reverse {
                            return;
                        }
                        continue;
                    }
                    if receive_time > end {
                        if args.reverse {
                            continue;
                        }
                        return;
                    }

                    let Some(reader) = state.readers.get(&message.conn_id) else {
                        continue;
                    };
                    if !args.topics.contains_key(&reader.topic) {
                        continue;
                    }

                    match state.decode_message(&message) {
                        Some(Ok(event)) => yield IteratorResult::MessageEvent(event),
                        Some(Err(e)) => {
                            yield IteratorResult::Problem(Problem {
                                connection_id: message.conn_id as u16,
                                severity: Severity::Error,
                                message: format!(
                                    "failed to decode message on {}",
                                    reader.topic
                                ),
                                error: Some(e.to_string()),
                                tip: None,
                            });
                        }
                        None => {}
                    }
                }
            }
        };

        Ok(Box::pin(iterator))
    }

    async fn backfill(
        &self,
        args: BackfillArgs,
        cancel: Option<CancelToken>,
    ) -> Result<Vec<MessageEvent>> {
        let state = self.state()?.clone();
        let time_nanos = args.time.to_nanos();

        let mut results = Vec::new();
        // Each topic scans independently: reverse over chunks, take the
        // newest matching message, stop at the first chunk that yields
        // one.
        for topic in args.topics.keys() {
            if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(IngestError::Cancelled);
            }

            let mut chunks: Vec<BagChunkInfo> = state
                .bag
                .chunks()
                .iter()
                .filter(|c| c.start_time <= time_nanos || c.start_time == 0)
                .cloned()
                .collect();
            chunks.reverse();

            for chunk in chunks {
                let messages = state.bag.read_chunk(&chunk).await?;
                let latest = messages
                    .iter()
                    .filter(|m| m.time <= time_nanos)
                    .filter(|m| {
                        state
                            .readers
                            .get(&m.conn_id)
                            .is_some_and(|r| &r.topic == topic)
                    })
                    .max_by_key(|m| m.time);

                if let Some(message) = latest {
                    if let Some(Ok(event)) = state.decode_message(message) {
                        results.push(event);
                    }
                    break;
                }
            }
        }

        results.sort_by_key(|event| event.receive_time);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::bag::format::writer;
    use crate::source::topic_selection;
    use futures::StreamExt;
    use std::io::Write;

    fn two_topic_bag() -> Vec<u8> {
        writer::bag_file(
            &[
                (1, "/a", "pkg/Counter", "uint32 count"),
                (2, "/b", "pkg/Counter", "uint32 count"),
            ],
            &[
                (
                    1_000,
                    3_000,
                    vec![
                        (1, 1_000, writer::counter_payload(1)),
                        (2, 2_000, writer::counter_payload(2)),
                        (1, 3_000, writer::counter_payload(3)),
                    ],
                ),
                (
                    4_000,
                    6_000,
                    vec![
                        (2, 5_000, writer::counter_payload(5)),
                        (1, 4_000, writer::counter_payload(4)),
                        (1, 6_000, writer::counter_payload(6)),
                    ],
                ),
            ],
        )
    }

    async fn initialized_source(data: Vec<u8>) -> (BagIterableSource, Initialization) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let mut source = BagIterableSource::new(SourceInput::File(tmp.path().to_path_buf()));
        let init = source.initialize().await.unwrap();
        // The tempfile is mapped; it may be dropped now.
        drop(tmp);
        (source, init)
    }

    async fn collect(source: &BagIterableSource, args: MessageIteratorArgs) -> Vec<IteratorResult> {
        let mut stream = source.message_iterator(args).unwrap();
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }
        items
    }

    fn times_of(items: &[IteratorResult]) -> Vec<u64> {
        items
            .iter()
            .filter_map(|item| match item {
                IteratorResult::MessageEvent(e) => Some(e.receive_time.to_nanos()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_reports_topics_and_range() {
        let (_, init) = initialized_source(two_topic_bag()).await;

        assert_eq!(init.start, Time::from_nanos(1_000));
        assert_eq!(init.end, Time::from_nanos(6_000));
        let mut names: Vec<&str> = init.topics.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["/a", "/b"]);
        assert_eq!(
            init.topics[0].schema_name.as_deref(),
            Some("pkg/Counter")
        );
        assert!(init.datatypes.contains_key("pkg/Counter"));
        assert!(init.publishers_by_topic["/a"].contains("/recorder"));
    }

    #[tokio::test]
    async fn test_stream_input_rejected() {
        let mut source = BagIterableSource::new(SourceInput::Stream);
        assert!(matches!(
            source.initialize().await,
            Err(IngestError::UnsupportedInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_iterator_delivers_in_time_order() {
        let (source, _) = initialized_source(two_topic_bag()).await;
        let items = collect(
            &source,
            MessageIteratorArgs {
                topics: topic_selection(["/a", "/b"]),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(times_of(&items), vec![1_000, 2_000, 3_000, 4_000, 5_000, 6_000]);
    }

    #[tokio::test]
    async fn test_iterator_filters_topics() {
        let (source, _) = initialized_source(two_topic_bag()).await;
        let items = collect(
            &source,
            MessageIteratorArgs {
                topics: topic_selection(["/b"]),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(times_of(&items), vec![2_000, 5_000]);
    }

    #[tokio::test]
    async fn test_iterator_respects_end_bound() {
        let (source, _) = initialized_source(two_topic_bag()).await;
        let items = collect(
            &source,
            MessageIteratorArgs {
                topics: topic_selection(["/a", "/b"]),
                end: Some(Time::from_nanos(4_000)),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(times_of(&items), vec![1_000, 2_000, 3_000, 4_000]);
    }

    #[tokio::test]
    async fn test_reverse_iterator_descends() {
        let (source, _) = initialized_source(two_topic_bag()).await;
        let items = collect(
            &source,
            MessageIteratorArgs {
                topics: topic_selection(["/a", "/b"]),
                reverse: true,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(times_of(&items), vec![6_000, 5_000, 4_000, 3_000, 2_000, 1_000]);
    }

    #[tokio::test]
    async fn test_empty_topics_yield_nothing() {
        let (source, _) = initialized_source(two_topic_bag()).await;
        let items = collect(&source, MessageIteratorArgs::default()).await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_decoded_payloads() {
        let (source, _) = initialized_source(two_topic_bag()).await;
        let items = collect(
            &source,
            MessageIteratorArgs {
                topics: topic_selection(["/a"]),
                ..Default::default()
            },
        )
        .await;

        let IteratorResult::MessageEvent(first) = &items[0] else {
            panic!("expected message event");
        };
        assert_eq!(
            first.message.as_struct().unwrap()["count"],
            crate::core::CodecValue::UInt32(1)
        );
        assert!(first.size_in_bytes >= 4);
    }

    #[tokio::test]
    async fn test_backfill_latest_per_topic() {
        let (source, _) = initialized_source(two_topic_bag()).await;
        let results = source
            .backfill(
                BackfillArgs {
                    topics: topic_selection(["/a", "/b"]),
                    time: Time::from_nanos(4_500),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].topic, "/b");
        assert_eq!(results[0].receive_time, Time::from_nanos(2_000));
        assert_eq!(results[1].topic, "/a");
        assert_eq!(results[1].receive_time, Time::from_nanos(4_000));
    }

    #[tokio::test]
    async fn test_backfill_cancelled() {
        let (source, _) = initialized_source(two_topic_bag()).await;
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            source
                .backfill(
                    BackfillArgs {
                        topics: topic_selection(["/a"]),
                        time: Time::from_nanos(9_000),
                    },
                    Some(token),
                )
                .await,
            Err(IngestError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_not_initialized_guards() {
        let source = BagIterableSource::new(SourceInput::Stream);
        assert!(matches!(
            source.message_iterator(Default::default()),
            Err(IngestError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_typeless_connection_is_skipped_not_fatal() {
        let data = writer::bag_file(
            &[
                (1, "/untyped", "", ""),
                (2, "/ok", "pkg/Counter", "uint32 count"),
            ],
            &[(
                1_000,
                2_000,
                vec![
                    (1, 1_000, vec![1, 2, 3]),
                    (2, 2_000, writer::counter_payload(9)),
                ],
            )],
        );
        let (source, init) = initialized_source(data).await;
        assert_eq!(init.topics.len(), 1, "typeless connection is not listed");

        // The schema-less record must not terminate the iterator.
        let items = collect(
            &source,
            MessageIteratorArgs {
                topics: topic_selection(["/untyped", "/ok"]),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(times_of(&items), vec![2_000]);
    }
}
