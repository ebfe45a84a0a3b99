// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! ROS1 bag container parsing over the random-access filelike seam.
//!
//! # BAG Format Structure (Version 2.0)
//!
//! ## File Header
//! - Magic: "#ROSBAG V2.0\n" (13 bytes)
//! - Followed by the bag header record in standard record format
//!
//! ## Record Format
//! All records follow: `<header_len: u32><header><data_len: u32><data>`
//! where the header contains `<field_len: u32><field_name>=<field_value>`
//! pairs.
//!
//! ## Op Codes
//! - 0x02: Message data
//! - 0x03: Bag header
//! - 0x04: Index data
//! - 0x05: Chunk
//! - 0x06: Chunk info
//! - 0x07: Connection

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;

use crate::core::{IngestError, Result};
use crate::remote::Filelike;
use crate::source::decompress::DecompressHandlers;

const OP_MSG_DATA: u8 = 0x02;
const OP_BAG_HEADER: u8 = 0x03;
const OP_CHUNK: u8 = 0x05;
const OP_CHUNK_INFO: u8 = 0x06;
const OP_CONNECTION: u8 = 0x07;

/// BAG magic prefix (version digits follow).
const MAGIC: &[u8] = b"#ROSBAG V";

/// Length of the full magic line, e.g. "#ROSBAG V2.0\n".
const MAGIC_LEN: u64 = 13;

/// BAG file header information.
#[derive(Debug, Clone)]
pub struct BagHeader {
    /// Version string (e.g., "2.0")
    pub version: String,
    /// Position of the index section in the file
    pub index_pos: u64,
    /// Number of connections in the file
    pub conn_count: u32,
    /// Number of chunks in the file
    pub chunk_count: u32,
}

/// Chunk information for random access.
#[derive(Debug, Clone)]
pub struct BagChunkInfo {
    /// Offset of the chunk record in the file
    pub chunk_pos: u64,
    /// Start time of messages in this chunk, nanoseconds
    pub start_time: u64,
    /// End time of messages in this chunk, nanoseconds
    pub end_time: u64,
    /// Number of messages in this chunk
    pub message_count: u32,
}

/// Connection information.
#[derive(Debug, Clone)]
pub struct BagConnection {
    pub conn_id: u32,
    pub topic: String,
    /// Message type name (the connection's schema name); empty when the
    /// connection did not declare one
    pub message_type: String,
    pub md5sum: String,
    /// Message definition (concatenated .msg text)
    pub message_definition: String,
    /// Publishing node, when recorded
    pub caller_id: String,
}

/// One message extracted from a decompressed chunk.
#[derive(Debug, Clone)]
pub struct BagMessageData {
    pub conn_id: u32,
    /// Receive timestamp, nanoseconds
    pub time: u64,
    pub data: Bytes,
}

/// Parsed fields from a BAG record header.
#[derive(Debug, Default)]
struct RecordHeader {
    op: Option<u8>,
    conn: Option<u32>,
    time: Option<u64>,
    topic: Option<String>,
    md5sum: Option<String>,
    message_type: Option<String>,
    message_definition: Option<String>,
    callerid: Option<String>,
    index_pos: Option<u64>,
    conn_count: Option<u32>,
    chunk_count: Option<u32>,
    chunk_pos: Option<u64>,
    start_time: Option<u64>,
    end_time: Option<u64>,
    compression: Option<String>,
    size: Option<u32>,
}

/// A ROS1 bag opened over a [`Filelike`].
pub struct BagFile {
    file: Arc<dyn Filelike>,
    handlers: DecompressHandlers,
    header: BagHeader,
    chunks: Vec<BagChunkInfo>,
    connections: HashMap<u32, BagConnection>,
}

impl BagFile {
    /// Open a bag: parse the magic, the bag header record and the index
    /// section (or scan the file when no index exists).
    pub async fn open(file: Arc<dyn Filelike>, handlers: DecompressHandlers) -> Result<Self> {
        let magic = file.read(0, MAGIC_LEN).await?;
        if &magic[..MAGIC.len()] != MAGIC {
            return Err(IngestError::parse(
                "bag",
                format!("invalid magic: {:?}", String::from_utf8_lossy(&magic)),
            ));
        }
        let version = String::from_utf8_lossy(&magic[MAGIC.len()..]).trim().to_string();

        let (header_fields, _, after_header) = read_record(file.as_ref(), MAGIC_LEN).await?;
        if header_fields.op != Some(OP_BAG_HEADER) {
            return Err(IngestError::parse(
                "bag",
                format!(
                    "expected bag header record (op=0x03), got op={:?}",
                    header_fields.op
                ),
            ));
        }
        let header = BagHeader {
            version,
            index_pos: header_fields.index_pos.unwrap_or(0),
            conn_count: header_fields.conn_count.unwrap_or(0),
            chunk_count: header_fields.chunk_count.unwrap_or(0),
        };

        let mut bag = BagFile {
            file,
            handlers,
            header,
            chunks: Vec::new(),
            connections: HashMap::new(),
        };

        if bag.header.index_pos > 0 && bag.header.index_pos < bag.file.size() {
            bag.parse_index_section().await?;
        } else {
            bag.scan_for_metadata(after_header).await?;
        }

        // Chunk walk order is start-time order.
        bag.chunks.sort_by_key(|c| c.start_time);

        Ok(bag)
    }

    /// Header info.
    pub fn header(&self) -> &BagHeader {
        &self.header
    }

    /// Chunk information, sorted by start time.
    pub fn chunks(&self) -> &[BagChunkInfo] {
        &self.chunks
    }

    /// Connections by id.
    pub fn connections(&self) -> &HashMap<u32, BagConnection> {
        &self.connections
    }

    /// Parse the index section: connection records then chunk infos.
    async fn parse_index_section(&mut self) -> Result<()> {
        let size = self.file.size();
        let mut position = self.header.index_pos;

        while position < size {
            let Ok((fields, data, next)) = read_record(self.file.as_ref(), position).await else {
                break;
            };
            match fields.op {
                Some(OP_CONNECTION) => {
                    let data_fields = parse_record_header(&data).unwrap_or_default();
                    if let Some(conn) = connection_from_fields(&fields, &data_fields) {
                        self.connections.insert(conn.conn_id, conn);
                    }
                }
                Some(OP_CHUNK_INFO) => {
                    if let Some(info) = chunk_info_from_fields(&fields, &data) {
                        self.chunks.push(info);
                    }
                }
                _ => {}
            }
            position = next;
        }
        Ok(())
    }

    /// Scan the whole file when no index section is available.
    async fn scan_for_metadata(&mut self, mut position: u64) -> Result<()> {
        let size = self.file.size();
        while position < size {
            let record_start = position;
            let Ok((fields, data, next)) = read_record(self.file.as_ref(), position).await else {
                break;
            };
            match fields.op {
                Some(OP_CONNECTION) => {
                    let data_fields = parse_record_header(&data).unwrap_or_default();
                    if let Some(conn) = connection_from_fields(&fields, &data_fields) {
                        self.connections.insert(conn.conn_id, conn);
                    }
                }
                Some(OP_CHUNK) => {
                    self.chunks.push(BagChunkInfo {
                        chunk_pos: record_start,
                        start_time: 0,
                        end_time: 0,
                        message_count: 0,
                    });
                }
                _ => {}
            }
            position = next;
        }
        Ok(())
    }

    /// Read, decompress and split one chunk into its messages.
    pub async fn read_chunk(&self, info: &BagChunkInfo) -> Result<Vec<BagMessageData>> {
        let (fields, data, _) = read_record(self.file.as_ref(), info.chunk_pos).await?;
        if fields.op != Some(OP_CHUNK) {
            return Err(IngestError::parse(
                "bag chunk",
                format!("expected chunk record (op=0x05), got op={:?}", fields.op),
            ));
        }

        let compression = fields.compression.as_deref().unwrap_or("none");
        let decompressed = if compression == "none" {
            data.to_vec()
        } else {
            let handler = self
                .handlers
                .get(compression)
                .ok_or_else(|| IngestError::unsupported_encoding("chunk compression", compression))?;
            handler(&data, fields.size.unwrap_or(0) as u64)?
        };

        parse_chunk_messages(&decompressed)
    }
}

/// Read one record at `offset`: returns its parsed header fields, data
/// bytes and the offset one past the record.
async fn read_record(file: &dyn Filelike, offset: u64) -> Result<(RecordHeader, Bytes, u64)> {
    let header_len = read_u32_at(file, offset).await?;
    let header_bytes = file.read(offset + 4, header_len as u64).await?;
    let fields = parse_record_header(&header_bytes)?;

    let data_off = offset + 4 + header_len as u64;
    let data_len = read_u32_at(file, data_off).await?;
    let data = file.read(data_off + 4, data_len as u64).await?;

    Ok((fields, data, data_off + 4 + data_len as u64))
}

async fn read_u32_at(file: &dyn Filelike, offset: u64) -> Result<u32> {
    let bytes = file.read(offset, 4).await?;
    Ok(u32::from_le_bytes(bytes[..4].try_into().expect("4-byte read")))
}

/// Parse header bytes into named fields.
/// Format: sequence of `<field_len: u32><field_name>=<field_value>`.
fn parse_record_header(header_bytes: &[u8]) -> Result<RecordHeader> {
    let mut cursor = Cursor::new(header_bytes);
    let mut fields = RecordHeader::default();

    while (cursor.position() as usize) < header_bytes.len() {
        let field_len = match cursor.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            Err(_) => break,
        };
        if field_len == 0 {
            continue;
        }

        let start = cursor.position() as usize;
        let end = start + field_len;
        if end > header_bytes.len() {
            break;
        }
        let field = &header_bytes[start..end];
        cursor.set_position(end as u64);

        if let Some(eq) = field.iter().position(|&b| b == b'=') {
            parse_field(&mut fields, &field[..eq], &field[eq + 1..]);
        }
    }

    Ok(fields)
}

fn parse_field(fields: &mut RecordHeader, name: &[u8], value: &[u8]) {
    match name {
        b"op" if value.len() == 1 => fields.op = Some(value[0]),
        b"conn" if value.len() >= 4 => {
            fields.conn = Some(u32::from_le_bytes([value[0], value[1], value[2], value[3]]));
        }
        b"time" if value.len() >= 8 => fields.time = Some(ros_time_nanos(value)),
        b"topic" => fields.topic = Some(String::from_utf8_lossy(value).to_string()),
        b"md5sum" => fields.md5sum = Some(String::from_utf8_lossy(value).to_string()),
        b"type" => fields.message_type = Some(String::from_utf8_lossy(value).to_string()),
        b"message_definition" => {
            fields.message_definition = Some(String::from_utf8_lossy(value).to_string());
        }
        b"callerid" => fields.callerid = Some(String::from_utf8_lossy(value).to_string()),
        b"index_pos" if value.len() >= 8 => {
            fields.index_pos = Some(u64::from_le_bytes([
                value[0], value[1], value[2], value[3], value[4], value[5], value[6], value[7],
            ]));
        }
        b"conn_count" if value.len() >= 4 => {
            fields.conn_count = Some(u32::from_le_bytes([value[0], value[1], value[2], value[3]]));
        }
        b"chunk_count" if value.len() >= 4 => {
            fields.chunk_count = Some(u32::from_le_bytes([value[0], value[1], value[2], value[3]]));
        }
        b"chunk_pos" if value.len() >= 8 => {
            fields.chunk_pos = Some(u64::from_le_bytes([
                value[0], value[1], value[2], value[3], value[4], value[5], value[6], value[7],
            ]));
        }
        b"start_time" if value.len() >= 8 => fields.start_time = Some(ros_time_nanos(value)),
        b"end_time" if value.len() >= 8 => fields.end_time = Some(ros_time_nanos(value)),
        b"compression" => {
            fields.compression = Some(String::from_utf8_lossy(value).to_string());
        }
        b"size" if value.len() >= 4 => {
            fields.size = Some(u32::from_le_bytes([value[0], value[1], value[2], value[3]]));
        }
        _ => {
            // Ignore unknown fields
        }
    }
}

/// ROS time on the wire: sec (4 bytes LE) + nsec (4 bytes LE).
fn ros_time_nanos(value: &[u8]) -> u64 {
    let sec = u32::from_le_bytes([value[0], value[1], value[2], value[3]]) as u64;
    let nsec = u32::from_le_bytes([value[4], value[5], value[6], value[7]]) as u64;
    sec * 1_000_000_000 + nsec
}

/// Build a BagConnection from a connection record. The type, md5sum and
/// message definition live in the record's data section.
fn connection_from_fields(
    header_fields: &RecordHeader,
    data_fields: &RecordHeader,
) -> Option<BagConnection> {
    Some(BagConnection {
        conn_id: header_fields.conn?,
        topic: header_fields.topic.clone()?,
        message_type: data_fields.message_type.clone().unwrap_or_default(),
        md5sum: data_fields.md5sum.clone().unwrap_or_default(),
        message_definition: data_fields.message_definition.clone().unwrap_or_default(),
        caller_id: data_fields.callerid.clone().unwrap_or_default(),
    })
}

/// Build a BagChunkInfo from a chunk info record. The data section is
/// `ver (u32)` then `(conn_id, count)` pairs.
fn chunk_info_from_fields(fields: &RecordHeader, data: &[u8]) -> Option<BagChunkInfo> {
    let mut message_count: u32 = 0;
    if data.len() >= 4 {
        let mut cursor = Cursor::new(data);
        let _ = cursor.read_u32::<LittleEndian>();
        while (cursor.position() as usize) + 8 <= data.len() {
            let _ = cursor.read_u32::<LittleEndian>();
            if let Ok(count) = cursor.read_u32::<LittleEndian>() {
                message_count = message_count.saturating_add(count);
            }
        }
    }

    Some(BagChunkInfo {
        chunk_pos: fields.chunk_pos?,
        start_time: fields.start_time.unwrap_or(0),
        end_time: fields.end_time.unwrap_or(0),
        message_count,
    })
}

/// Extract message records from decompressed chunk data. Connection
/// records embedded in chunks are skipped.
fn parse_chunk_messages(decompressed: &[u8]) -> Result<Vec<BagMessageData>> {
    let mut messages = Vec::new();
    let mut position = 0usize;

    while position + 8 <= decompressed.len() {
        let header_len =
            u32::from_le_bytes(decompressed[position..position + 4].try_into().expect("4")) as usize;
        let header_start = position + 4;
        let header_end = header_start + header_len;
        if header_end + 4 > decompressed.len() {
            break;
        }
        let fields = parse_record_header(&decompressed[header_start..header_end])?;

        let data_len =
            u32::from_le_bytes(decompressed[header_end..header_end + 4].try_into().expect("4"))
                as usize;
        let data_start = header_end + 4;
        let data_end = data_start + data_len;
        if data_end > decompressed.len() {
            break;
        }

        if fields.op == Some(OP_MSG_DATA) {
            if let (Some(conn), Some(time)) = (fields.conn, fields.time) {
                messages.push(BagMessageData {
                    conn_id: conn,
                    time,
                    data: Bytes::copy_from_slice(&decompressed[data_start..data_end]),
                });
            }
        }

        position = data_end;
    }

    Ok(messages)
}

// ---------------------------------------------------------------------
// Record writing helpers for tests.
// ---------------------------------------------------------------------
