// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! MCAP record-level parsing.
//!
//! Implements the [MCAP binary format](https://mcap.dev/spec): magic,
//! op/length record framing, and the records the ingestion path needs
//! (Header, Schema, Channel, Message, Chunk, DataEnd, Footer).
//! Chunk contents are decompressed through injected handlers keyed by
//! algorithm name and replayed as nested records.
//!
//! ## Record framing
//!
//! Every record is `<op: u8><length: u64><body: length bytes>`. Strings
//! are u32-prefixed UTF-8; maps are u32 byte-length prefixed pair
//! sequences.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;

use crate::core::{IngestError, Result};
use crate::source::decompress::DecompressHandlers;
use crate::source::{Channel, Schema};

/// MCAP file magic bytes (at start and end of file).
pub const MCAP_MAGIC: [u8; 8] = [0x89, 0x4D, 0x43, 0x41, 0x50, 0x30, 0x0D, 0x0A];

/// Header record - must be first record after magic.
pub const OP_HEADER: u8 = 0x01;
/// Footer record - contains summary section offsets.
pub const OP_FOOTER: u8 = 0x02;
/// Schema record - defines message schemas.
pub const OP_SCHEMA: u8 = 0x03;
/// Channel record - defines channels/topics.
pub const OP_CHANNEL: u8 = 0x04;
/// Message record - contains message data.
pub const OP_MESSAGE: u8 = 0x05;
/// Chunk record - contains compressed records.
pub const OP_CHUNK: u8 = 0x06;
/// Data end record - marks end of data section.
pub const OP_DATA_END: u8 = 0x0F;

/// One parsed MCAP record.
#[derive(Debug, Clone)]
pub enum McapRecord {
    Header {
        profile: String,
        library: String,
    },
    Schema(Schema),
    Channel(Channel),
    Message {
        channel_id: u16,
        sequence: u32,
        log_time: u64,
        publish_time: u64,
        data: Bytes,
    },
    DataEnd,
}

/// Parse a complete MCAP byte stream into its records, expanding
/// chunks in place. Stops at the footer.
pub fn parse_records(data: &[u8], handlers: &DecompressHandlers) -> Result<Vec<McapRecord>> {
    if data.len() < MCAP_MAGIC.len() || data[..MCAP_MAGIC.len()] != MCAP_MAGIC {
        return Err(IngestError::parse(
            "mcap",
            format!(
                "invalid magic: {:?}",
                hex::encode(&data[..data.len().min(8)])
            ),
        ));
    }

    let mut records = Vec::new();
    parse_record_sequence(&data[MCAP_MAGIC.len()..], handlers, &mut records)?;
    Ok(records)
}

/// Parse a run of framed records (the data section, or a decompressed
/// chunk body).
fn parse_record_sequence(
    data: &[u8],
    handlers: &DecompressHandlers,
    records: &mut Vec<McapRecord>,
) -> Result<()> {
    let mut cursor = Cursor::new(data);

    while (cursor.position() as usize) + 9 <= data.len() {
        let op = cursor.read_u8()?;
        let length = cursor.read_u64::<LittleEndian>()?;
        let body_start = cursor.position() as usize;
        let body_end = body_start + length as usize;
        if body_end > data.len() {
            return Err(IngestError::parse(
                "mcap",
                format!("record op 0x{op:02x} of {length} bytes exceeds remaining data"),
            ));
        }
        let body = &data[body_start..body_end];

        match op {
            OP_HEADER => {
                let mut body = Cursor::new(body);
                records.push(McapRecord::Header {
                    profile: read_string(&mut body)?,
                    library: read_string(&mut body)?,
                });
            }
            OP_SCHEMA => {
                let mut body = Cursor::new(body);
                let id = body.read_u16::<LittleEndian>()?;
                let name = read_string(&mut body)?;
                let encoding = read_string(&mut body)?;
                let data_len = body.read_u32::<LittleEndian>()? as usize;
                let mut schema_data = vec![0u8; data_len];
                body.read_exact(&mut schema_data)?;
                records.push(McapRecord::Schema(Schema {
                    id,
                    name,
                    encoding,
                    data: Bytes::from(schema_data),
                }));
            }
            OP_CHANNEL => {
                let mut body = Cursor::new(body);
                let id = body.read_u16::<LittleEndian>()?;
                let schema_id = body.read_u16::<LittleEndian>()?;
                let topic = read_string(&mut body)?;
                let message_encoding = read_string(&mut body)?;
                let metadata = read_string_map(&mut body)?;
                records.push(McapRecord::Channel(Channel {
                    id,
                    topic,
                    message_encoding,
                    schema_id,
                    metadata,
                }));
            }
            OP_MESSAGE => {
                let mut head = Cursor::new(body);
                let channel_id = head.read_u16::<LittleEndian>()?;
                let sequence = head.read_u32::<LittleEndian>()?;
                let log_time = head.read_u64::<LittleEndian>()?;
                let publish_time = head.read_u64::<LittleEndian>()?;
                let payload = &body[head.position() as usize..];
                records.push(McapRecord::Message {
                    channel_id,
                    sequence,
                    log_time,
                    publish_time,
                    data: Bytes::copy_from_slice(payload),
                });
            }
            OP_CHUNK => {
                let inner = decompress_chunk(body, handlers)?;
                parse_record_sequence(&inner, handlers, records)?;
            }
            OP_DATA_END => {
                records.push(McapRecord::DataEnd);
            }
            OP_FOOTER => {
                // Summary section follows; the unindexed path is done.
                break;
            }
            _ => {
                // Indexes, attachments, metadata, statistics: skipped.
            }
        }

        cursor.set_position(body_end as u64);
    }

    Ok(())
}

/// Decompress a chunk record body and return its inner record bytes.
fn decompress_chunk(body: &[u8], handlers: &DecompressHandlers) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(body);
    let _message_start_time = cursor.read_u64::<LittleEndian>()?;
    let _message_end_time = cursor.read_u64::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u64::<LittleEndian>()?;
    let _uncompressed_crc = cursor.read_u32::<LittleEndian>()?;
    let compression = read_string(&mut cursor)?;
    let records_len = cursor.read_u64::<LittleEndian>()? as usize;

    let records_start = cursor.position() as usize;
    let records_end = records_start + records_len;
    if records_end > body.len() {
        return Err(IngestError::parse(
            "mcap chunk",
            format!("records length {records_len} exceeds chunk body"),
        ));
    }
    let compressed = &body[records_start..records_end];

    if compression.is_empty() || compression == "none" {
        return Ok(compressed.to_vec());
    }

    let handler = handlers.get(&compression).ok_or_else(|| {
        IngestError::unsupported_encoding("chunk compression", &compression)
    })?;
    handler(compressed, uncompressed_size)
}

/// Read a u32-length-prefixed UTF-8 string.
fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| IngestError::parse("mcap", format!("invalid UTF-8: {e}")))
}

/// Read a u32 byte-length-prefixed map of string pairs.
fn read_string_map(cursor: &mut Cursor<&[u8]>) -> Result<BTreeMap<String, String>> {
    let byte_len = cursor.read_u32::<LittleEndian>()? as u64;
    let end = cursor.position() + byte_len;
    let mut map = BTreeMap::new();
    while cursor.position() < end {
        let key = read_string(cursor)?;
        let value = read_string(cursor)?;
        map.insert(key, value);
    }
    Ok(map)
}

// ---------------------------------------------------------------------
// Record writing helpers for tests: enough of the format to synthesize
// fixture files.
// ---------------------------------------------------------------------

#[cfg(test)]
pub mod writer {
    //! Minimal MCAP record writer used to synthesize test fixtures.

    use super::*;

    fn push_record(out: &mut Vec<u8>, op: u8, body: &[u8]) {
        out.push(op);
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(body);
    }

    fn push_string(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u32).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    /// Start a file: magic plus a header record.
    pub fn file_start(profile: &str) -> Vec<u8> {
        let mut out = MCAP_MAGIC.to_vec();
        let mut body = Vec::new();
        push_string(&mut body, profile);
        push_string(&mut body, "robostream-tests");
        push_record(&mut out, OP_HEADER, &body);
        out
    }

    /// Append a schema record.
    pub fn push_schema(out: &mut Vec<u8>, id: u16, name: &str, encoding: &str, data: &[u8]) {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_le_bytes());
        push_string(&mut body, name);
        push_string(&mut body, encoding);
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(data);
        push_record(out, OP_SCHEMA, &body);
    }

    /// Append a channel record.
    pub fn push_channel(
        out: &mut Vec<u8>,
        id: u16,
        schema_id: u16,
        topic: &str,
        message_encoding: &str,
        metadata: &[(&str, &str)],
    ) {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_le_bytes());
        body.extend_from_slice(&schema_id.to_le_bytes());
        push_string(&mut body, topic);
        push_string(&mut body, message_encoding);

        let mut map = Vec::new();
        for (key, value) in metadata {
            push_string(&mut map, key);
            push_string(&mut map, value);
        }
        body.extend_from_slice(&(map.len() as u32).to_le_bytes());
        body.extend_from_slice(&map);
        push_record(out, OP_CHANNEL, &body);
    }

    /// Append a message record.
    pub fn push_message(out: &mut Vec<u8>, channel_id: u16, log_time: u64, payload: &[u8]) {
        let mut body = Vec::new();
        body.extend_from_slice(&channel_id.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&log_time.to_le_bytes());
        body.extend_from_slice(&log_time.to_le_bytes());
        body.extend_from_slice(payload);
        push_record(out, OP_MESSAGE, &body);
    }

    /// Append a compressed chunk wrapping `records` bytes.
    pub fn push_chunk_zstd(out: &mut Vec<u8>, records: &[u8]) {
        let compressed = zstd::bulk::compress(records, 0).expect("zstd compress");
        let mut body = Vec::new();
        body.extend_from_slice(&0u64.to_le_bytes()); // message_start_time
        body.extend_from_slice(&0u64.to_le_bytes()); // message_end_time
        body.extend_from_slice(&(records.len() as u64).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes()); // crc
        push_string(&mut body, "zstd");
        body.extend_from_slice(&(compressed.len() as u64).to_le_bytes());
        body.extend_from_slice(&compressed);
        push_record(out, OP_CHUNK, &body);
    }

    /// Finish a file: data end, footer, trailing magic.
    pub fn file_end(out: &mut Vec<u8>) {
        push_record(out, OP_DATA_END, &0u32.to_le_bytes());
        let mut footer = Vec::new();
        footer.extend_from_slice(&0u64.to_le_bytes()); // summary_start
        footer.extend_from_slice(&0u64.to_le_bytes()); // summary_offset_start
        footer.extend_from_slice(&0u32.to_le_bytes()); // summary_crc
        push_record(out, OP_FOOTER, &footer);
        out.extend_from_slice(&MCAP_MAGIC);
    }

    /// A complete single-channel file with `ros2msg`-encoded `uint32
    /// count` messages at the given log times.
    pub fn counter_file(topic: &str, log_times: &[u64]) -> Vec<u8> {
        let mut out = file_start("ros2");
        push_schema(&mut out, 1, "pkg/msg/Counter", "ros2msg", b"uint32 count");
        push_channel(&mut out, 1, 1, topic, "cdr", &[("callerid", "/node")]);
        for (i, log_time) in log_times.iter().enumerate() {
            let mut payload = vec![0x00, 0x01, 0x00, 0x00];
            payload.extend_from_slice(&(i as u32).to_le_bytes());
            push_message(&mut out, 1, *log_time, &payload);
        }
        file_end(&mut out);
        out
    }
}
