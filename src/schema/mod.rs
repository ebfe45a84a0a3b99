// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Schema parsing for ROS message definitions.
//!
//! Channels declare their schemas in one of three encodings:
//! - `ros2msg` — classic `.msg` field lists with `MSG:` dependency blocks
//! - `ros2idl` — concatenated OMG IDL with `IDL:` separator headers
//! - `omgidl` — plain OMG IDL modules/structs
//!
//! All three parse into the same [`MessageSchema`] AST, which drives the
//! CDR decoder.

pub mod idl;
pub mod msg;

use std::collections::HashMap;

use crate::core::{IngestError, Result};

/// A parsed message schema: the root type plus every dependency type.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSchema {
    /// Schema name (e.g., "sensor_msgs/msg/Imu")
    pub name: String,
    /// All types defined in this schema (root type + nested types)
    pub types: HashMap<String, MessageType>,
}

/// A message type definition with its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageType {
    /// Type name including package if available
    pub name: String,
    /// Ordered list of fields
    pub fields: Vec<Field>,
    /// Maximum alignment required for this type
    pub max_alignment: u64,
}

/// A field in a message type.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Field type
    pub type_name: FieldType,
}

/// Field type - primitive, array, or nested message.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Primitive type
    Primitive(PrimitiveType),
    /// Array type
    Array {
        /// Element type
        base_type: Box<FieldType>,
        /// Array size (None = dynamic, Some(N) = fixed)
        size: Option<usize>,
    },
    /// Nested message type
    Nested(String),
}

/// Primitive ROS types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    /// Wide string (UTF-16 on the wire)
    WString,
    /// Byte (alias for UInt8)
    Byte,
    /// Char (alias for Int8)
    Char,
    /// Time (sec: int32, nsec: uint32)
    Time,
    /// Duration (sec: int32, nsec: uint32)
    Duration,
}

impl PrimitiveType {
    /// Alignment requirement of this primitive in CDR.
    pub fn alignment(self) -> u64 {
        match self {
            PrimitiveType::Bool
            | PrimitiveType::Int8
            | PrimitiveType::UInt8
            | PrimitiveType::Byte
            | PrimitiveType::Char => 1,
            PrimitiveType::Int16 | PrimitiveType::UInt16 => 2,
            PrimitiveType::Int32 | PrimitiveType::UInt32 | PrimitiveType::Float32 => 4,
            PrimitiveType::Int64 | PrimitiveType::UInt64 | PrimitiveType::Float64 => 8,
            // Length prefix is 4-byte aligned
            PrimitiveType::String | PrimitiveType::WString => 4,
            // 8 bytes total, 4-byte alignment
            PrimitiveType::Time | PrimitiveType::Duration => 4,
        }
    }

    /// Parse a `.msg` primitive type name.
    pub fn try_from_str(s: &str) -> Option<Self> {
        match s {
            "bool" | "boolean" => Some(PrimitiveType::Bool),
            "int8" => Some(PrimitiveType::Int8),
            "int16" => Some(PrimitiveType::Int16),
            "int32" => Some(PrimitiveType::Int32),
            "int64" => Some(PrimitiveType::Int64),
            "uint8" => Some(PrimitiveType::UInt8),
            "uint16" => Some(PrimitiveType::UInt16),
            "uint32" => Some(PrimitiveType::UInt32),
            "uint64" => Some(PrimitiveType::UInt64),
            "float32" | "float" => Some(PrimitiveType::Float32),
            "float64" | "double" => Some(PrimitiveType::Float64),
            "string" => Some(PrimitiveType::String),
            "wstring" => Some(PrimitiveType::WString),
            "byte" => Some(PrimitiveType::Byte),
            "char" => Some(PrimitiveType::Char),
            "time" => Some(PrimitiveType::Time),
            "duration" => Some(PrimitiveType::Duration),
            _ => None,
        }
    }
}

impl FieldType {
    /// Alignment requirement of this field type in CDR.
    pub fn alignment(&self) -> u64 {
        match self {
            FieldType::Primitive(p) => p.alignment(),
            FieldType::Array { base_type, .. } => base_type.alignment(),
            // Nested structs have 4-byte alignment in CDR
            FieldType::Nested(_) => 4,
        }
    }
}

impl MessageSchema {
    /// Create an empty schema.
    pub fn new(name: String) -> Self {
        Self {
            name,
            types: HashMap::new(),
        }
    }

    /// Register a type in this schema.
    pub fn add_type(&mut self, msg_type: MessageType) {
        self.types.insert(msg_type.name.clone(), msg_type);
    }

    /// Look up a type by name.
    pub fn get_type(&self, name: &str) -> Option<&MessageType> {
        self.types.get(name)
    }

    /// Look up a type accepting the naming variants the two containers
    /// produce: `::`-scoped IDL names, names with and without a `/msg/`
    /// segment, and bare short names.
    pub fn resolve_type(&self, name: &str) -> Option<&MessageType> {
        if let Some(t) = self.types.get(name) {
            return Some(t);
        }

        let normalized = name.replace("::", "/");
        if let Some(t) = self.types.get(&normalized) {
            return Some(t);
        }

        if !normalized.contains("/msg/") {
            let with_msg = normalized.replacen('/', "/msg/", 1);
            if let Some(t) = self.types.get(&with_msg) {
                return Some(t);
            }
        } else {
            let without_msg = normalized.replace("/msg/", "/");
            if let Some(t) = self.types.get(&without_msg) {
                return Some(t);
            }
        }

        if !normalized.contains('/') {
            for (full_name, msg_type) in &self.types {
                if full_name.ends_with(&format!("/{normalized}"))
                    || full_name.as_str() == normalized
                {
                    return Some(msg_type);
                }
            }
        }

        None
    }
}

impl MessageType {
    /// Create a new message type.
    pub fn new(name: String) -> Self {
        Self {
            name,
            fields: Vec::new(),
            max_alignment: 1,
        }
    }

    /// Add a field, tracking the maximum alignment seen.
    pub fn add_field(&mut self, field: Field) {
        self.max_alignment = self.max_alignment.max(field.type_name.alignment());
        self.fields.push(field);
    }
}

/// Schema format detected from the definition text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFormat {
    /// Classic ROS .msg format (simple field list)
    ClassicMsg,
    /// Pure OMG IDL format (module/struct declarations)
    OmgIdl,
    /// ROS 2 adapter IDL format (separator lines with `IDL:` headers)
    Ros2Idl,
}

/// Detect the schema format from the definition text.
pub fn detect_format(definition: &str) -> SchemaFormat {
    if definition.contains("IDL:") {
        for line in definition.lines() {
            if line.starts_with("IDL:") || (line.starts_with("===") && line.len() >= 3) {
                return SchemaFormat::Ros2Idl;
            }
        }
    }

    let trimmed = definition.trim_start();
    if trimmed.starts_with("module ") || trimmed.starts_with("struct ") {
        return SchemaFormat::OmgIdl;
    }

    SchemaFormat::ClassicMsg
}

/// Parse a schema definition, auto-detecting its format.
///
/// `encoding` is the channel's message encoding (e.g., "cdr"); it picks
/// the ROS-version handling for Header types.
pub fn parse_schema_with_encoding(
    name: impl Into<String>,
    definition: &str,
    encoding: &str,
) -> Result<MessageSchema> {
    let name = name.into();
    match detect_format(definition) {
        SchemaFormat::ClassicMsg => msg::parse_with_encoding(&name, definition, encoding),
        SchemaFormat::OmgIdl => idl::parse(&name, definition),
        SchemaFormat::Ros2Idl => parse_ros2_idl(&name, definition),
    }
}

/// Parse ROS 2 adapter IDL: strip the `====` separator lines and `IDL:`
/// headers, then parse the remainder as plain OMG IDL.
fn parse_ros2_idl(name: &str, definition: &str) -> Result<MessageSchema> {
    let cleaned: String = definition
        .lines()
        .filter(|line| !(line.starts_with("IDL:") || (line.starts_with('=') && line.len() >= 80)))
        .collect::<Vec<&str>>()
        .join("\n");

    let trimmed = cleaned.trim();
    if trimmed.is_empty() || !trimmed.contains("struct") {
        return Err(IngestError::parse(
            "ros2idl schema",
            "no struct declarations found after stripping headers",
        ));
    }

    idl::parse(name, &cleaned)
}

/// ROS version inferred from a message encoding or type name, used to
/// normalize `std_msgs/Header` (ROS1 has a leading `seq` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosVersion {
    Ros1,
    Ros2,
    Unknown,
}

impl RosVersion {
    /// Detect from a message encoding string ("ros1msg" vs "cdr").
    pub fn from_encoding(encoding: &str) -> Self {
        let lower = encoding.to_lowercase();
        if lower.contains("ros1") {
            RosVersion::Ros1
        } else if lower == "cdr" {
            RosVersion::Ros2
        } else {
            RosVersion::Unknown
        }
    }
}
