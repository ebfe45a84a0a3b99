// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Worker-backed sources.
//!
//! Parsing and I/O run on a dedicated background task that owns the
//! concrete source; the foreground talks to it through a command
//! channel with per-call reply channels. Because proxying an iterator
//! pull-by-pull is a round trip per item, the foreground iterator
//! drives a worker-side cursor in 17 ms batches and re-emits the items
//! locally.

pub mod factory;

use std::collections::HashMap;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::{IngestError, Result};
use crate::cursor::MessageCursor;
use crate::source::{
    BackfillArgs, CancelToken, Initialization, IterableSource, IteratorResult, IteratorStream,
    MessageEvent, MessageIteratorArgs,
};

/// One animation frame: the batching window for cross-worker pulls.
const BATCH_WINDOW: Duration = Duration::from_millis(17);

/// Command channel depth. Calls are request/reply, so a small buffer
/// suffices.
const COMMAND_BUFFER: usize = 16;

type CursorId = u64;

enum WorkerCommand {
    Initialize {
        reply: oneshot::Sender<Result<Initialization>>,
    },
    CreateCursor {
        args: MessageIteratorArgs,
        cancel: Option<CancelToken>,
        reply: oneshot::Sender<Result<CursorId>>,
    },
    CursorNextBatch {
        id: CursorId,
        duration: Duration,
        reply: oneshot::Sender<Option<Vec<IteratorResult>>>,
    },
    CursorEnd {
        id: CursorId,
        reply: oneshot::Sender<()>,
    },
    Backfill {
        args: BackfillArgs,
        cancel: Option<CancelToken>,
        reply: oneshot::Sender<Result<Vec<MessageEvent>>>,
    },
}

/// Foreground handle to a source hosted on a background worker task.
///
/// Implements the same interface as the in-process sources; every call
/// is proxied over the command channel.
pub struct WorkerIterableSource {
    tx: mpsc::Sender<WorkerCommand>,
    worker: Option<JoinHandle<()>>,
}

impl WorkerIterableSource {
    /// Spawn a worker that builds and owns the concrete source.
    pub fn spawn<F>(make_source: F) -> Self
    where
        F: FnOnce() -> Box<dyn IterableSource> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = tokio::spawn(async move {
            run_worker(make_source(), rx).await;
        });
        WorkerIterableSource {
            tx,
            worker: Some(worker),
        }
    }

    /// Drop the proxy and terminate the worker.
    pub async fn terminate(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
            let _ = worker.await;
        }
    }

    async fn call<T>(&self, command: WorkerCommand, reply: oneshot::Receiver<T>) -> Result<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| IngestError::Other("worker terminated".to_string()))?;
        reply
            .await
            .map_err(|_| IngestError::Other("worker dropped the reply".to_string()))
    }
}

impl Drop for WorkerIterableSource {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[async_trait]
impl IterableSource for WorkerIterableSource {
    async fn initialize(&mut self) -> Result<Initialization> {
        let (reply, rx) = oneshot::channel();
        self.call(WorkerCommand::Initialize { reply }, rx).await?
    }

    /// A proxied iterator: a worker-side cursor consumed in batched
    /// windows, with each batch fanned out locally.
    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<IteratorStream> {
        self.message_iterator_with_cancel(args, None)
    }

    async fn backfill(
        &self,
        args: BackfillArgs,
        cancel: Option<CancelToken>,
    ) -> Result<Vec<MessageEvent>> {
        let (reply, rx) = oneshot::channel();
        self.call(WorkerCommand::Backfill { args, cancel, reply }, rx)
            .await?
    }

    fn get_message_cursor(
        &self,
        args: MessageIteratorArgs,
        cancel: Option<CancelToken>,
    ) -> Result<MessageCursor> {
        // The worker-side cursor does the real batching; the local
        // cursor re-exposes the items.
        Ok(MessageCursor::new(
            self.message_iterator_with_cancel(args, cancel.clone())?,
            cancel,
        ))
    }
}

impl WorkerIterableSource {
    /// Like [`IterableSource::message_iterator`] but forwarding a
    /// cancellation token to the worker-side cursor.
    fn message_iterator_with_cancel(
        &self,
        args: MessageIteratorArgs,
        cancel: Option<CancelToken>,
    ) -> Result<IteratorStream> {
        let tx = self.tx.clone();

        let iterator = stream! {
            let (reply, rx) = oneshot::channel();
            if tx
                .send(WorkerCommand::CreateCursor { args, cancel, reply })
                .await
                .is_err()
            {
                return;
            }
            let Ok(Ok(id)) = rx.await else {
                return;
            };

            loop {
                let (reply, rx) = oneshot::channel();
                if tx
                    .send(WorkerCommand::CursorNextBatch {
                        id,
                        duration: BATCH_WINDOW,
                        reply,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                match rx.await {
                    Ok(Some(batch)) => {
                        for item in batch {
                            yield item;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }

            let (reply, rx) = oneshot::channel();
            if tx.send(WorkerCommand::CursorEnd { id, reply }).await.is_ok() {
                let _ = rx.await;
            }
        };

        Ok(Box::pin(iterator))
    }
}

/// The worker loop: owns the source and its cursors until the command
/// channel closes.
async fn run_worker(
    mut source: Box<dyn IterableSource>,
    mut rx: mpsc::Receiver<WorkerCommand>,
) {
    let mut cursors: HashMap<CursorId, MessageCursor> = HashMap::new();
    let mut next_cursor_id: CursorId = 1;

    while let Some(command) = rx.recv().await {
        match command {
            WorkerCommand::Initialize { reply } => {
                let _ = reply.send(source.initialize().await);
            }
            WorkerCommand::CreateCursor { args, cancel, reply } => {
                let result = source.get_message_cursor(args, cancel).map(|cursor| {
                    let id = next_cursor_id;
                    next_cursor_id += 1;
                    cursors.insert(id, cursor);
                    id
                });
                let _ = reply.send(result);
            }
            WorkerCommand::CursorNextBatch { id, duration, reply } => {
                let batch = match cursors.get_mut(&id) {
                    Some(cursor) => cursor.next_batch(duration).await,
                    None => None,
                };
                let _ = reply.send(batch);
            }
            WorkerCommand::CursorEnd { id, reply } => {
                if let Some(mut cursor) = cursors.remove(&id) {
                    cursor.end().await;
                }
                let _ = reply.send(());
            }
            WorkerCommand::Backfill { args, cancel, reply } => {
                let _ = reply.send(source.backfill(args, cancel).await);
            }
        }
    }
}
