// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! HTTP byte-range transport.
//!
//! `open` probes the resource with a GET it immediately abandons,
//! verifying range support and learning the size. `fetch` issues a
//! `Range: bytes=a-b` GET and forwards body chunks as stream events
//! from a background task; destroying the stream aborts the transfer.

use futures::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, ETAG, LAST_MODIFIED, RANGE};

use crate::core::{IngestError, Result};
use crate::remote::{FetchEvent, FetchSink, FetchStream, RangeReader, RemoteFileInfo};

/// Byte-range reader over a single HTTP resource.
pub struct HttpRangeReader {
    url: String,
    client: reqwest::Client,
}

impl HttpRangeReader {
    /// Create a reader for `url`. The client (and its connection pool)
    /// is shared across all fetches of this file.
    pub fn new(url: impl Into<String>) -> Self {
        HttpRangeReader {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// The resource URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl RangeReader for HttpRangeReader {
    async fn open(&self) -> Result<RemoteFileInfo> {
        let response = self
            .client
            .get(&self.url)
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| IngestError::http_network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::http_status(status.as_u16(), &self.url));
        }

        let headers = response.headers();

        let accepts_ranges = headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);
        if !accepts_ranges {
            return Err(IngestError::AcceptRangesMissing);
        }

        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(IngestError::MissingContentLength)?;

        let identifier = headers
            .get(ETAG)
            .or_else(|| headers.get(LAST_MODIFIED))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Dropping the response aborts the body transfer.
        drop(response);

        Ok(RemoteFileInfo { size, identifier })
    }

    async fn fetch(&self, offset: u64, length: u64) -> Result<FetchStream> {
        let (sink, mut stream) = FetchStream::channel(8);

        let client = self.client.clone();
        let url = self.url.clone();
        let last = offset + length - 1;

        let task = tokio::spawn(async move {
            run_fetch(client, url, offset, last, sink).await;
        });
        stream.attach_task(task);

        Ok(stream)
    }
}

/// Drive one range request, forwarding body chunks into the sink.
async fn run_fetch(client: reqwest::Client, url: String, offset: u64, last: u64, sink: FetchSink) {
    let response = match client
        .get(&url)
        .header(RANGE, format!("bytes={offset}-{last}"))
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            sink.send(FetchEvent::Error(IngestError::http_network(e.to_string())))
                .await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        sink.send(FetchEvent::Error(IngestError::http_status(
            status.as_u16(),
            &url,
        )))
        .await;
        return;
    }

    let mut body = response.bytes_stream();
    let mut received = 0u64;
    while let Some(item) = body.next().await {
        match item {
            Ok(chunk) => {
                received += chunk.len() as u64;
                if !sink.send(FetchEvent::Data(chunk)).await {
                    return;
                }
            }
            Err(e) => {
                sink.send(FetchEvent::Error(IngestError::http_network(e.to_string())))
                    .await;
                return;
            }
        }
    }

    // A 2xx response whose body ends without a single byte never
    // carried the requested range.
    if received == 0 {
        sink.send(FetchEvent::Error(IngestError::MissingBody)).await;
        return;
    }

    sink.send(FetchEvent::End).await;
}
