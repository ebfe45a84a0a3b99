// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Stateful pull cursor over a message iterator.
//!
//! Supports single pulls, duration-bounded batches (amortizing
//! cross-worker round trips) and read-until-time consumption. The
//! underlying stream is single-pass, so an item pulled past the
//! requested bound is stashed and served first by the next call.

use std::time::Duration;

use futures::StreamExt;

use crate::core::Time;
use crate::source::{CancelToken, IteratorResult, IteratorStream};

/// Cursor over an iterator stream with an optional cancellation token.
pub struct MessageCursor {
    stream: Option<IteratorStream>,
    cancel: Option<CancelToken>,
    stash: Option<IteratorResult>,
    ended: bool,
}

impl MessageCursor {
    /// Wrap a stream. The token, when provided, makes every method
    /// return `None` from its next suspension point after cancellation.
    pub fn new(stream: IteratorStream, cancel: Option<CancelToken>) -> Self {
        MessageCursor {
            stream: Some(stream),
            cancel,
            stash: None,
            ended: false,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Pull one item, serving the stash first.
    async fn pull(&mut self) -> Option<IteratorResult> {
        if let Some(stashed) = self.stash.take() {
            return Some(stashed);
        }
        self.stream.as_mut()?.next().await
    }

    /// Pull the next item. `None` once cancelled, ended, or exhausted.
    pub async fn next(&mut self) -> Option<IteratorResult> {
        if self.ended || self.is_cancelled() {
            return None;
        }
        self.pull().await
    }

    /// Pull a batch bounded by receive-time duration: the first item
    /// sets the window; items past `first_time + duration` are left for
    /// the next call. A problem item closes the batch immediately.
    pub async fn next_batch(&mut self, duration: Duration) -> Option<Vec<IteratorResult>> {
        if self.ended || self.is_cancelled() {
            return None;
        }

        let first = self.pull().await?;
        let Some(first_time) = first.time() else {
            // Problems carry no time; deliver them alone.
            return Some(vec![first]);
        };
        let cutoff = first_time.add_nanos(duration.as_nanos() as u64);

        let mut batch = vec![first];
        loop {
            if self.is_cancelled() {
                return None;
            }
            let Some(item) = self.pull().await else {
                break;
            };
            match item.time() {
                None => {
                    batch.push(item);
                    break;
                }
                Some(time) if time > cutoff => {
                    self.stash = Some(item);
                    break;
                }
                Some(_) => batch.push(item),
            }
        }
        Some(batch)
    }

    /// Pull every item up to `end`: messages with `receive_time <= end`,
    /// stamps strictly before `end`. The first item past the bound is
    /// stashed for the next call.
    pub async fn read_until(&mut self, end: Time) -> Option<Vec<IteratorResult>> {
        if self.ended || self.is_cancelled() {
            return None;
        }

        let mut items = Vec::new();
        loop {
            if self.is_cancelled() {
                return None;
            }
            let Some(item) = self.pull().await else {
                break;
            };
            let within = match &item {
                IteratorResult::MessageEvent(event) => event.receive_time <= end,
                IteratorResult::Stamp(time) => *time < end,
                IteratorResult::Problem(_) => true,
            };
            if within {
                items.push(item);
            } else {
                self.stash = Some(item);
                break;
            }
        }
        Some(items)
    }

    /// Release the iterator. Subsequent calls return `None`.
    pub async fn end(&mut self) {
        self.ended = true;
        self.stash = None;
        // Dropping the stream releases the source's iterator resources.
        self.stream = None;
    }
}
