// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! The iterable-source layer.
//!
//! A source normalizes one container format into a uniform view: an
//! async stream of time-ordered, topic-filtered [`IteratorResult`]
//! items, plus backfill (latest message per topic at or before a time)
//! and cursors. Consumers never see the container format, transport or
//! compression.

pub mod bag;
pub mod decompress;
pub mod mcap;
pub mod parse_channel;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::core::{CodecValue, Result, Time};
use crate::cursor::MessageCursor;
use crate::schema::MessageType;

pub use parse_channel::{parse_channel, ParsedChannel};

/// A topic known to a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    /// Topic name (e.g., "/imu")
    pub name: String,
    /// Schema name of the topic's message type, when known
    pub schema_name: Option<String>,
}

/// A schema record from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub id: u16,
    pub name: String,
    pub encoding: String,
    pub data: bytes::Bytes,
}

/// A channel record from a container, binding a topic to a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: u16,
    pub topic: String,
    pub message_encoding: String,
    pub schema_id: u16,
    pub metadata: BTreeMap<String, String>,
}

/// One decoded message delivered to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub topic: String,
    pub schema_name: String,
    /// Wall-clock time the message was ingested
    pub receive_time: Time,
    /// Producer-reported time, when the container carries one
    pub publish_time: Option<Time>,
    pub message: CodecValue,
    /// `max(wire size, estimated decoded size)`
    pub size_in_bytes: u64,
}

/// Severity of an in-stream problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warn,
    Info,
}

/// A non-fatal per-record issue surfaced in the iterator stream.
///
/// `connection_id` identifies the originating channel so consumers can
/// coalesce problems per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub connection_id: u16,
    pub severity: Severity,
    pub message: String,
    pub error: Option<String>,
    pub tip: Option<String>,
}

/// One item from a message iterator.
#[derive(Debug, Clone, PartialEq)]
pub enum IteratorResult {
    /// A decoded message
    MessageEvent(MessageEvent),
    /// A non-fatal problem on one channel
    Problem(Problem),
    /// A bare time, advancing playback without delivering a message
    Stamp(Time),
}

impl IteratorResult {
    /// The playback-relevant time of this item, if it carries one.
    pub fn time(&self) -> Option<Time> {
        match self {
            IteratorResult::MessageEvent(event) => Some(event.receive_time),
            IteratorResult::Stamp(time) => Some(*time),
            IteratorResult::Problem(_) => None,
        }
    }
}

/// Per-topic message statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicStats {
    pub num_messages: u64,
    pub first_message_time: Option<Time>,
    pub last_message_time: Option<Time>,
}

/// Everything a source learns at initialize time.
///
/// `start == end == Time::ZERO` iff the source yielded zero messages.
#[derive(Debug, Clone, Default)]
pub struct Initialization {
    pub start: Time,
    pub end: Time,
    pub topics: Vec<Topic>,
    pub datatypes: HashMap<String, MessageType>,
    pub profile: Option<String>,
    pub publishers_by_topic: HashMap<String, BTreeSet<String>>,
    pub topic_stats: HashMap<String, TopicStats>,
}

/// A topic subscription entry. `preload` is application policy the
/// engine carries through opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub preload: Option<PreloadType>,
}

/// How much of a topic the application wants resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadType {
    Full,
    Partial,
}

/// Topic selection for iterators and backfill.
pub type TopicSelection = BTreeMap<String, Subscription>;

/// Build a [`TopicSelection`] from plain topic names.
pub fn topic_selection<I, S>(names: I) -> TopicSelection
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names
        .into_iter()
        .map(|name| {
            let name = name.into();
            (
                name.clone(),
                Subscription {
                    topic: name,
                    preload: None,
                },
            )
        })
        .collect()
}

/// Arguments for a message iterator.
#[derive(Debug, Clone, Default)]
pub struct MessageIteratorArgs {
    pub topics: TopicSelection,
    /// Inclusive lower bound on receive time
    pub start: Option<Time>,
    /// Inclusive upper bound on receive time
    pub end: Option<Time>,
    /// Deliver in descending receive-time order
    pub reverse: bool,
}

/// Arguments for a backfill query.
#[derive(Debug, Clone, Default)]
pub struct BackfillArgs {
    pub topics: TopicSelection,
    /// Return the latest message per topic at or before this time
    pub time: Time,
}

/// Cooperative cancellation token.
///
/// Cancellation takes effect at the next suspension point; results
/// already delivered are not revoked. The token is `Send` and clonable,
/// which is how it crosses the worker boundary — it may already be
/// cancelled by the time a receiver first checks it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a live token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Boxed async stream of iterator results.
pub type IteratorStream = Pin<Box<dyn Stream<Item = IteratorResult> + Send>>;

/// Input descriptor for a source.
#[derive(Debug, Clone)]
pub enum SourceInput {
    /// A local file
    File(PathBuf),
    /// A remote HTTP resource supporting byte-range requests
    Url(String),
    /// Reserved; rejected at initialize
    Stream,
}

impl SourceInput {
    /// Short label for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceInput::File(_) => "file",
            SourceInput::Url(_) => "url",
            SourceInput::Stream => "stream",
        }
    }
}

/// A log source: one container, initialized once, producing iterators,
/// cursors and backfill queries.
#[async_trait]
pub trait IterableSource: Send + Sync {
    /// Read the container's structure. Must be called exactly once
    /// before any other operation; a second call fails.
    async fn initialize(&mut self) -> Result<Initialization>;

    /// Stream messages matching the args in receive-time order
    /// (descending when `reverse`).
    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<IteratorStream>;

    /// The latest message per requested topic with
    /// `receive_time <= args.time`, sorted by receive time.
    async fn backfill(
        &self,
        args: BackfillArgs,
        cancel: Option<CancelToken>,
    ) -> Result<Vec<MessageEvent>>;

    /// Wrap a message iterator in a cursor.
    fn get_message_cursor(
        &self,
        args: MessageIteratorArgs,
        cancel: Option<CancelToken>,
    ) -> Result<MessageCursor> {
        Ok(MessageCursor::new(self.message_iterator(args)?, cancel))
    }
}
