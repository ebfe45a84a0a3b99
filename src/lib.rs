// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! # Robostream
//!
//! Streaming ingestion engine for robotics log files (ROS1 bag and
//! MCAP). Exposes a uniform, time-ordered, topic-filtered view of
//! message events to playback front-ends that know nothing about the
//! underlying container format, transport or compression.
//!
//! The engine is organized in layers:
//! - `range/` - byte-range algebra and the block-partitioned LRU buffer
//! - `remote/` - HTTP range transport, blob adapter and the cached
//!   filelike that turns byte-range requests into random-access reads
//! - `schema/` + `encoding/` - ROS schema parsing and CDR decoding
//! - `source/` - the iterable-source layer normalizing both containers
//!   into one async message stream with backfill
//! - `cursor` - single / batched / read-until-time consumption
//! - `worker/` - background-task hosting and the source factory
//!
//! ## Example: reading a remote MCAP file
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use futures::StreamExt;
//! use robostream::source::{IterableSource, MessageIteratorArgs, SourceInput, topic_selection};
//! use robostream::worker::factory::create_worker_source;
//!
//! let mut source = create_worker_source(SourceInput::Url(
//!     "https://logs.example.com/run1.mcap".to_string(),
//! ))?;
//! let init = source.initialize().await?;
//!
//! let mut messages = source.message_iterator(MessageIteratorArgs {
//!     topics: topic_selection(init.topics.iter().map(|t| t.name.clone())),
//!     ..Default::default()
//! })?;
//! while let Some(item) = messages.next().await {
//!     println!("{item:?}");
//! }
//! # Ok(())
//! # }
//! ```

// Core types
pub mod core;

// Re-export core types for convenience
pub use core::{estimate_message_size, CodecValue, DecodedMessage, IngestError, Result, Time};

// Byte-range algebra and the virtual LRU buffer
pub mod range;

// Transports and the cached filelike
pub mod remote;

// Schema parsing
pub mod schema;

// Message payload decoding
pub mod encoding;

// The iterable-source layer
pub mod source;

// Pull cursors over message iterators
pub mod cursor;

// Worker hosting and the source factory
pub mod worker;

// Re-export the main entry points
pub use cursor::MessageCursor;
pub use remote::{CachedFilelike, HttpRangeReader};
pub use source::{
    bag::BagIterableSource, mcap::McapIterableSource, Initialization, IterableSource,
    IteratorResult, MessageEvent, SourceInput,
};
pub use worker::{factory::create_worker_source, WorkerIterableSource};
