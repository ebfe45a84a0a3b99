// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! ROS `.msg` schema parser using Pest.
//!
//! The format supports:
//! - Simple field lists (root message)
//! - Dependency blocks with `MSG: TypeName` headers after `===` separators
//! - Array types: `T[]` (dynamic) or `T[n]` (fixed)
//! - Nested types: `package/MessageName`
//! - `#` comments and constant declarations (skipped)

use pest::Parser;
use pest_derive::Parser;

use crate::core::{IngestError, Result};
use crate::schema::{Field, FieldType, MessageSchema, MessageType, PrimitiveType, RosVersion};

/// Pest parser for ROS .msg schema files.
#[derive(Parser)]
#[grammar_inline = r##"
WHITESPACE = _{ " " | "\t" }

schema = { SOI ~ root_msg ~ (separator ~ dependency_msg)* ~ EOI }

root_msg = { (comment | msg_line | empty_line)* }
dependency_msg = { dependency_header ~ (comment | msg_line | empty_line)* }

dependency_header = @{ "MSG:" ~ (!NEWLINE ~ ANY)* ~ NEWLINE? }
separator = _{ "="{3,} ~ (!NEWLINE ~ ANY)* ~ NEWLINE? }
comment = _{ "#" ~ (!NEWLINE ~ ANY)* ~ NEWLINE? }
msg_line = @{ !("=" | "#" | "MSG:") ~ (!NEWLINE ~ ANY)+ ~ NEWLINE? }
empty_line = _{ NEWLINE }
"##]
struct MsgParser;

/// Parse classic ROS .msg format with explicit encoding.
///
/// The encoding picks the ROS version for Header normalization: ROS1
/// Headers carry a leading `seq` field that ROS 2 dropped.
pub fn parse_with_encoding(name: &str, definition: &str, encoding: &str) -> Result<MessageSchema> {
    parse_with_version(name, definition, RosVersion::from_encoding(encoding))
}

/// Parse classic ROS .msg format with an explicit ROS version.
pub fn parse_with_version(
    name: &str,
    definition: &str,
    ros_version: RosVersion,
) -> Result<MessageSchema> {
    let pairs = MsgParser::parse(Rule::schema, definition)
        .map_err(|e| IngestError::parse("msg schema", e.to_string()))?;

    let mut schema = MessageSchema::new(name.to_string());

    for pair in pairs {
        for item in pair.into_inner() {
            match item.as_rule() {
                Rule::EOI => {}
                Rule::root_msg => {
                    let mut msg_type = MessageType::new(name.to_string());
                    for field_item in item.into_inner() {
                        if let Some(field) = parse_msg_line(field_item) {
                            msg_type.add_field(field);
                        }
                    }
                    schema.add_type(msg_type);
                }
                Rule::dependency_msg => {
                    let mut inner = item.into_inner();
                    let Some(header) = inner.next() else {
                        continue;
                    };
                    let type_name = header
                        .as_str()
                        .strip_prefix("MSG:")
                        .unwrap_or(header.as_str())
                        .trim();
                    if type_name.is_empty() {
                        continue;
                    }

                    let mut msg_type = MessageType::new(type_name.to_string());
                    for field_item in inner {
                        if let Some(field) = parse_msg_line(field_item) {
                            msg_type.add_field(field);
                        }
                    }
                    schema.add_type(msg_type);
                }
                _ => {}
            }
        }
    }

    if ros_version == RosVersion::Ros1 {
        add_seq_field_to_header_types(&mut schema);
    }

    Ok(schema)
}

/// Parse a single msg_line into a Field, if possible.
///
/// Constant declarations (`byte DEBUG=10`) are skipped.
fn parse_msg_line(pair: pest::iterators::Pair<Rule>) -> Option<Field> {
    if pair.as_rule() != Rule::msg_line {
        return None;
    }

    let content = pair.as_str().trim();
    if content.contains('=') {
        return None;
    }

    let space_pos = content.find(|c: char| c.is_whitespace())?;
    let type_part = &content[..space_pos];

    let (base_type_str, is_array, array_size) = if let Some(bracket_pos) = type_part.find('[') {
        let base = &type_part[..bracket_pos];
        let digits: String = type_part[bracket_pos..]
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        (base, true, digits.parse::<usize>().ok())
    } else {
        (type_part, false, None)
    };

    let after_type = content[space_pos..].trim_start();
    let field_end = after_type
        .find(|c: char| c.is_whitespace())
        .unwrap_or(after_type.len());
    let field_name = after_type[..field_end].to_string();
    if field_name.is_empty() {
        return None;
    }

    let base = match PrimitiveType::try_from_str(base_type_str) {
        Some(prim) => FieldType::Primitive(prim),
        None => FieldType::Nested(base_type_str.to_string()),
    };
    let field_type = if is_array {
        FieldType::Array {
            base_type: Box::new(base),
            size: array_size,
        }
    } else {
        base
    };

    Some(Field {
        name: field_name,
        type_name: field_type,
    })
}

/// Add the `seq` field to `std_msgs/Header` variants for ROS1 data.
///
/// ROS1 Header is `uint32 seq, time stamp, string frame_id`; ROS 2
/// dropped `seq`.
fn add_seq_field_to_header_types(schema: &mut MessageSchema) {
    let header_variants: Vec<String> = schema
        .types
        .keys()
        .filter(|k| k.contains("Header") && (k.contains("std_msgs") || k.ends_with("/Header")))
        .cloned()
        .collect();

    for variant in &header_variants {
        if let Some(header_type) = schema.types.get_mut(variant) {
            if header_type.fields.iter().any(|f| f.name == "seq") {
                continue;
            }
            let seq = Field {
                name: "seq".to_string(),
                type_name: FieldType::Primitive(PrimitiveType::UInt32),
            };
            // ROS1 order is seq, stamp, frame_id
            header_type.fields.insert(0, seq);
            header_type.max_alignment = header_type.max_alignment.max(4);
        }
    }
}
