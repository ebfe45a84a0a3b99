// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Channel parsing: one `(deserialize, datatypes)` pair per channel.
//!
//! Produced once when a channel record is first seen and reused for
//! every message on that channel.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{CodecValue, DecodedMessage, IngestError, Result};
use crate::encoding::CdrDecoder;
use crate::schema::{parse_schema_with_encoding, MessageType};
use crate::source::Schema;

/// Message-type names whose schema body is legitimately empty.
const WELL_KNOWN_EMPTY_TYPES: &[&str] = &["std_msgs/Empty", "std_msgs/msg/Empty"];

/// The deserializer and datatype table for one channel.
#[derive(Clone)]
pub struct ParsedChannel {
    /// Decode one message payload. Idempotent; borrows its input.
    pub deserialize: Arc<dyn Fn(&[u8]) -> Result<CodecValue> + Send + Sync>,
    /// Schema-name -> type definition for every type the channel uses.
    pub datatypes: HashMap<String, MessageType>,
}

impl std::fmt::Debug for ParsedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedChannel")
            .field("datatypes", &self.datatypes.keys())
            .finish()
    }
}

/// Build a [`ParsedChannel`] for a channel's message encoding and
/// schema.
///
/// Only the `cdr` message encoding is supported, with schema encodings
/// `ros2msg`, `ros2idl` and `omgidl`. An empty schema body is rejected
/// unless the schema names a well-known empty type.
pub fn parse_channel(message_encoding: &str, schema: Option<&Schema>) -> Result<ParsedChannel> {
    if message_encoding != "cdr" {
        return Err(IngestError::unsupported_encoding(
            "message",
            message_encoding,
        ));
    }

    let schema = schema.ok_or_else(|| IngestError::empty_schema("<missing schema record>"))?;

    match schema.encoding.as_str() {
        "ros2msg" | "ros2idl" | "omgidl" => {}
        other => {
            return Err(IngestError::unsupported_encoding("schema", other));
        }
    }

    if schema.data.is_empty() {
        if WELL_KNOWN_EMPTY_TYPES.contains(&schema.name.as_str()) {
            return Ok(empty_channel());
        }
        return Err(IngestError::empty_schema(&schema.name));
    }

    let definition = String::from_utf8_lossy(&schema.data);
    let parsed = parse_schema_with_encoding(&schema.name, &definition, "cdr")?;
    let datatypes = parsed.types.clone();

    let decoder = CdrDecoder::new(parsed, &schema.name)?;
    let deserialize: Arc<dyn Fn(&[u8]) -> Result<CodecValue> + Send + Sync> =
        Arc::new(move |bytes| decoder.decode(bytes));

    Ok(ParsedChannel {
        deserialize,
        datatypes,
    })
}

/// Channel for a well-known empty type: every payload decodes to an
/// empty struct.
fn empty_channel() -> ParsedChannel {
    ParsedChannel {
        deserialize: Arc::new(|_| Ok(CodecValue::Struct(DecodedMessage::new()))),
        datatypes: HashMap::new(),
    }
}
