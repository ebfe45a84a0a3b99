// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! CDR (Common Data Representation) decoder.
//!
//! Decodes CDR-encoded binary data with a schema-driven recursive walk.
//! The cursor tracks an origin so alignment is computed relative to the
//! start of the serialized payload, per the DDS CDR rules. ROS1 bag
//! payloads use the packed variant: same reads, no alignment padding,
//! strings without a NUL terminator.

use std::collections::HashMap;

use crate::core::{CodecValue, DecodedMessage, IngestError, Result};
use crate::schema::{FieldType, MessageSchema, MessageType, PrimitiveType};

/// Size of the CDR encapsulation header (4 bytes).
pub const CDR_HEADER_SIZE: usize = 4;

/// Maximum allowed array length, guarding against corrupt counts.
const MAX_ARRAY_LENGTH: usize = 10_000_000;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Cursor over CDR-encoded data tracking position, origin and
/// endianness.
pub struct CdrCursor<'a> {
    data: &'a [u8],
    offset: usize,
    /// Alignment reference point (start of the serialized payload)
    origin: usize,
    little_endian: bool,
    /// ROS1 packed mode: no alignment, strings without terminator
    packed: bool,
}

impl<'a> CdrCursor<'a> {
    /// Create a cursor over CDR data with its 4-byte encapsulation
    /// header. Byte 1 carries the endianness flag.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < CDR_HEADER_SIZE {
            return Err(IngestError::parse(
                "cdr",
                format!(
                    "data of {} bytes cannot contain a 4-byte CDR header",
                    data.len()
                ),
            ));
        }
        let little_endian = data[1] & 0x01 == 1;
        Ok(CdrCursor {
            data,
            offset: CDR_HEADER_SIZE,
            origin: CDR_HEADER_SIZE,
            little_endian,
            packed: false,
        })
    }

    /// Create a cursor for ROS1 packed data: no header, little-endian,
    /// no alignment padding.
    pub fn new_packed(data: &'a [u8]) -> Self {
        CdrCursor {
            data,
            offset: 0,
            origin: 0,
            little_endian: true,
            packed: true,
        }
    }

    /// Current read position.
    #[inline]
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// Align to `size` relative to the origin. No-op in packed mode.
    pub fn align(&mut self, size: usize) -> Result<()> {
        if self.packed || size <= 1 {
            return Ok(());
        }
        let misalignment = (self.offset - self.origin) % size;
        if misalignment > 0 {
            let padding = size - misalignment;
            if self.offset + padding > self.data.len() {
                return Err(self.short(padding));
            }
            self.offset += padding;
        }
        Ok(())
    }

    fn short(&self, requested: usize) -> IngestError {
        IngestError::parse(
            "cdr",
            format!(
                "buffer too short: {requested} bytes requested at position {}, {} available",
                self.offset,
                self.remaining()
            ),
        )
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.offset + n > self.data.len() {
            return Err(self.short(n));
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.align(2)?;
        let bytes: [u8; 2] = self.take(2)?.try_into().expect("length checked");
        Ok(if self.little_endian {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        })
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("length checked");
        Ok(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.align(8)?;
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("length checked");
        Ok(if self.little_endian {
            u64::from_le_bytes(bytes)
        } else {
            u64::from_be_bytes(bytes)
        })
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a length-prefixed string. CDR lengths include the NUL
    /// terminator; packed ROS1 lengths do not.
    pub fn read_string(&mut self) -> Result<String> {
        let declared = self.read_u32()? as usize;
        let (content_len, skip) = if self.packed {
            (declared, 0)
        } else if declared == 0 {
            (0, 0)
        } else {
            (declared - 1, 1)
        };
        if content_len > self.remaining() {
            return Err(self.short(content_len));
        }
        let bytes = self.take(content_len)?;
        let _ = self.take(skip);
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Schema-driven CDR decoder.
pub struct CdrDecoder {
    schema: MessageSchema,
    root: String,
}

impl CdrDecoder {
    /// Create a decoder for `root` within `schema`.
    ///
    /// Fails when the root type cannot be resolved.
    pub fn new(schema: MessageSchema, root: impl Into<String>) -> Result<Self> {
        let root = root.into();
        if schema.resolve_type(&root).is_none() {
            return Err(IngestError::parse(
                "cdr decoder",
                format!("root type '{root}' not found in schema"),
            ));
        }
        Ok(CdrDecoder { schema, root })
    }

    /// The schema's types, keyed by name.
    pub fn datatypes(&self) -> &HashMap<String, MessageType> {
        &self.schema.types
    }

    /// Decode a CDR-encapsulated payload (ROS 2 messages).
    pub fn decode(&self, data: &[u8]) -> Result<CodecValue> {
        let mut cursor = CdrCursor::new(data)?;
        self.decode_with(&mut cursor)
    }

    /// Decode a packed little-endian payload (ROS1 bag messages).
    pub fn decode_packed(&self, data: &[u8]) -> Result<CodecValue> {
        let mut cursor = CdrCursor::new_packed(data);
        self.decode_with(&mut cursor)
    }

    fn decode_with(&self, cursor: &mut CdrCursor) -> Result<CodecValue> {
        let root = self
            .schema
            .resolve_type(&self.root)
            .expect("validated in new()");
        let fields = self.decode_struct(root, cursor)?;
        Ok(CodecValue::Struct(fields))
    }

    fn decode_struct(&self, msg_type: &MessageType, cursor: &mut CdrCursor) -> Result<DecodedMessage> {
        let mut result = DecodedMessage::with_capacity(msg_type.fields.len());
        for field in &msg_type.fields {
            let value = self.decode_field(&field.type_name, cursor)?;
            result.insert(field.name.clone(), value);
        }
        Ok(result)
    }

    fn decode_field(&self, field_type: &FieldType, cursor: &mut CdrCursor) -> Result<CodecValue> {
        match field_type {
            FieldType::Primitive(prim) => self.decode_primitive(*prim, cursor),
            FieldType::Array { base_type, size } => {
                let count = match size {
                    Some(n) => *n,
                    None => cursor.read_u32()? as usize,
                };
                if count > MAX_ARRAY_LENGTH {
                    return Err(IngestError::parse(
                        "cdr",
                        format!("array length {count} exceeds sanity limit"),
                    ));
                }
                // Byte arrays stay byte arrays
                if matches!(
                    base_type.as_ref(),
                    FieldType::Primitive(PrimitiveType::UInt8 | PrimitiveType::Byte)
                ) {
                    let bytes = cursor.take(count)?;
                    return Ok(CodecValue::Bytes(bytes.to_vec()));
                }
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.decode_field(base_type, cursor)?);
                }
                Ok(CodecValue::Array(items))
            }
            FieldType::Nested(name) => {
                let nested = self.schema.resolve_type(name).ok_or_else(|| {
                    IngestError::parse("cdr", format!("nested type '{name}' not found in schema"))
                })?;
                Ok(CodecValue::Struct(self.decode_struct(nested, cursor)?))
            }
        }
    }

    fn decode_primitive(&self, prim: PrimitiveType, cursor: &mut CdrCursor) -> Result<CodecValue> {
        Ok(match prim {
            PrimitiveType::Bool => CodecValue::Bool(cursor.read_bool()?),
            PrimitiveType::Int8 | PrimitiveType::Char => CodecValue::Int8(cursor.read_i8()?),
            PrimitiveType::UInt8 | PrimitiveType::Byte => CodecValue::UInt8(cursor.read_u8()?),
            PrimitiveType::Int16 => CodecValue::Int16(cursor.read_i16()?),
            PrimitiveType::UInt16 => CodecValue::UInt16(cursor.read_u16()?),
            PrimitiveType::Int32 => CodecValue::Int32(cursor.read_i32()?),
            PrimitiveType::UInt32 => CodecValue::UInt32(cursor.read_u32()?),
            PrimitiveType::Int64 => CodecValue::Int64(cursor.read_i64()?),
            PrimitiveType::UInt64 => CodecValue::UInt64(cursor.read_u64()?),
            PrimitiveType::Float32 => CodecValue::Float32(cursor.read_f32()?),
            PrimitiveType::Float64 => CodecValue::Float64(cursor.read_f64()?),
            PrimitiveType::String | PrimitiveType::WString => {
                CodecValue::String(cursor.read_string()?)
            }
            PrimitiveType::Time => {
                let sec = cursor.read_i32()? as i64;
                let nsec = cursor.read_u32()? as i64;
                CodecValue::Timestamp(sec * NANOS_PER_SEC + nsec)
            }
            PrimitiveType::Duration => {
                let sec = cursor.read_i32()? as i64;
                let nsec = cursor.read_u32()? as i64;
                CodecValue::Duration(sec * NANOS_PER_SEC + nsec)
            }
        })
    }
}
