// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Core error types for robostream.
//!
//! Provides error types for ingestion operations:
//! - Source configuration and lifecycle
//! - Remote transport and range caching
//! - Container integrity
//! - Schema and message decoding

use std::fmt;

/// Errors that can occur while ingesting a log source.
#[derive(Debug, Clone)]
pub enum IngestError {
    /// The input descriptor cannot be handled by this source
    UnsupportedInput {
        /// What was offered (e.g., "stream")
        input: String,
    },

    /// A message or schema encoding this engine does not decode
    UnsupportedEncoding {
        /// What carries the encoding ("message" or "schema")
        context: String,
        /// The offending encoding name
        encoding: String,
    },

    /// The upstream response had no Content-Length header
    MissingContentLength,

    /// The upstream does not advertise byte-range support
    AcceptRangesMissing,

    /// The file exceeds what this source will materialize
    FileTooLarge {
        /// Observed size in bytes
        size: u64,
        /// Allowed maximum in bytes
        limit: u64,
    },

    /// A single read larger than the whole cache
    RequestExceedsCache {
        /// Requested length
        requested: u64,
        /// Configured cache size
        cache_size: u64,
    },

    /// A read past the end of the file
    RangeExceedsFile {
        /// Requested end offset
        end: u64,
        /// File size
        file_size: u64,
    },

    /// Operation requires initialize() first
    NotInitialized,

    /// initialize() called more than once
    AlreadyInitialized,

    /// The operation was cancelled via its cancel token
    Cancelled,

    /// Two schema records with the same id but different bytes
    DuplicateSchemaMismatch {
        /// Schema id
        id: u16,
    },

    /// Two channel records with the same id but different bytes
    DuplicateChannelMismatch {
        /// Channel id
        id: u16,
    },

    /// A channel references a schema that never appeared
    ChannelBeforeSchema {
        /// Channel id
        channel_id: u16,
        /// Schema id the channel referenced
        schema_id: u16,
    },

    /// A message record references a channel never declared
    MessageWithoutChannel {
        /// Channel id the message carried
        channel_id: u16,
    },

    /// A schema with an empty body where one is required
    EmptySchema {
        /// Schema name
        schema_name: String,
    },

    /// Non-2xx upstream response
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Request URL
        url: String,
    },

    /// Network-level transport failure
    HttpNetwork {
        /// Error message
        message: String,
    },

    /// The upstream response carried no body
    MissingBody,

    /// Parse error in a container record or schema
    Parse {
        /// What was being parsed
        context: String,
        /// Error message
        message: String,
    },

    /// I/O failure
    Io {
        /// Error message
        message: String,
    },

    /// Other error
    Other(String),
}

impl IngestError {
    /// Create an unsupported-input error.
    pub fn unsupported_input(input: impl Into<String>) -> Self {
        IngestError::UnsupportedInput {
            input: input.into(),
        }
    }

    /// Create an unsupported-encoding error.
    pub fn unsupported_encoding(context: impl Into<String>, encoding: impl Into<String>) -> Self {
        IngestError::UnsupportedEncoding {
            context: context.into(),
            encoding: encoding.into(),
        }
    }

    /// Create a file-too-large error.
    pub fn file_too_large(size: u64, limit: u64) -> Self {
        IngestError::FileTooLarge { size, limit }
    }

    /// Create a request-exceeds-cache error.
    pub fn request_exceeds_cache(requested: u64, cache_size: u64) -> Self {
        IngestError::RequestExceedsCache {
            requested,
            cache_size,
        }
    }

    /// Create a range-exceeds-file error.
    pub fn range_exceeds_file(end: u64, file_size: u64) -> Self {
        IngestError::RangeExceedsFile { end, file_size }
    }

    /// Create an empty-schema error.
    pub fn empty_schema(schema_name: impl Into<String>) -> Self {
        IngestError::EmptySchema {
            schema_name: schema_name.into(),
        }
    }

    /// Create an HTTP status error.
    pub fn http_status(status: u16, url: impl Into<String>) -> Self {
        IngestError::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// Create a network transport error.
    pub fn http_network(message: impl Into<String>) -> Self {
        IngestError::HttpNetwork {
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    /// True when the error came from the transport layer and a retry may help.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IngestError::HttpStatus { .. }
                | IngestError::HttpNetwork { .. }
                | IngestError::MissingBody
        )
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::UnsupportedInput { input } => {
                write!(f, "Unsupported input: '{input}'")
            }
            IngestError::UnsupportedEncoding { context, encoding } => {
                write!(f, "Unsupported {context} encoding: '{encoding}'")
            }
            IngestError::MissingContentLength => {
                write!(f, "Remote file did not report a Content-Length")
            }
            IngestError::AcceptRangesMissing => {
                write!(f, "Remote file does not support byte-range requests")
            }
            IngestError::FileTooLarge { size, limit } => {
                write!(
                    f,
                    "File too large: {size} bytes exceeds limit of {limit} bytes"
                )
            }
            IngestError::RequestExceedsCache {
                requested,
                cache_size,
            } => write!(
                f,
                "Read of {requested} bytes exceeds cache size of {cache_size} bytes"
            ),
            IngestError::RangeExceedsFile { end, file_size } => write!(
                f,
                "Read up to offset {end} exceeds file size of {file_size} bytes"
            ),
            IngestError::NotInitialized => write!(f, "Source is not initialized"),
            IngestError::AlreadyInitialized => write!(f, "Source is already initialized"),
            IngestError::Cancelled => write!(f, "Operation cancelled"),
            IngestError::DuplicateSchemaMismatch { id } => {
                write!(f, "Schema id {id} redefined with different bytes")
            }
            IngestError::DuplicateChannelMismatch { id } => {
                write!(f, "Channel id {id} redefined with different bytes")
            }
            IngestError::ChannelBeforeSchema {
                channel_id,
                schema_id,
            } => {
                write!(
                    f,
                    "Channel {channel_id} references schema id {schema_id} before it appeared"
                )
            }
            IngestError::MessageWithoutChannel { channel_id } => {
                write!(f, "Message references undeclared channel id {channel_id}")
            }
            IngestError::EmptySchema { schema_name } => {
                write!(f, "Schema '{schema_name}' has an empty body")
            }
            IngestError::HttpStatus { status, url } => {
                write!(f, "HTTP status {status} fetching {url}")
            }
            IngestError::HttpNetwork { message } => {
                write!(f, "HTTP transport error: {message}")
            }
            IngestError::MissingBody => write!(f, "HTTP response carried no body"),
            IngestError::Parse { context, message } => {
                write!(f, "Parse error in {context}: {message}")
            }
            IngestError::Io { message } => write!(f, "I/O error: {message}"),
            IngestError::Other(msg) => write!(f, "Other error: {msg}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for robostream operations.
pub type Result<T> = std::result::Result<T, IngestError>;
