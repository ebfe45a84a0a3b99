// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Decoded message value type system.
//!
//! Provides a unified value representation for messages decoded from the
//! CDR (ROS1/ROS2) payloads both containers carry. All variants are
//! serde-serializable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Type alias for a decoded message as a field name -> value mapping.
pub type DecodedMessage = HashMap<String, CodecValue>;

/// Unified value type for decoded robotics data.
///
/// # Design Principles
///
/// - **Serde support**: all variants serialize for downstream processing
/// - **Owned types**: owned `String` and `Vec<u8>` for clarity
/// - **Codec-focused**: covers the types ROS message schemas express,
///   including temporal types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CodecValue {
    // Boolean
    Bool(bool),

    // Signed integers
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),

    // Unsigned integers
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),

    // Floating point
    Float32(f32),
    Float64(f64),

    // String (UTF-8)
    String(String),

    // Binary data (image frames, point clouds)
    Bytes(Vec<u8>),

    // Timestamp as nanoseconds since Unix epoch
    Timestamp(i64),

    // Duration as nanoseconds (can be negative)
    Duration(i64),

    // Array of values
    Array(Vec<CodecValue>),

    // Nested message/struct
    Struct(DecodedMessage),

    // Null value for optional fields
    Null,
}

impl CodecValue {
    /// Try to get the inner struct fields.
    pub fn as_struct(&self) -> Option<&DecodedMessage> {
        match self {
            CodecValue::Struct(m) => Some(m),
            _ => None,
        }
    }
}
