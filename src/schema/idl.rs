// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! OMG IDL schema parser using Pest.
//!
//! Covers the subset ROS 2 emits for message types: nested modules,
//! structs, typedefs (fixed-array aliases), sequences, bounded strings,
//! multi-word integer types and `@`-annotations. Unions and enums are
//! not part of that subset and fail the parse.

use std::collections::HashMap;

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::core::{IngestError, Result};
use crate::schema::{Field, FieldType, MessageSchema, MessageType, PrimitiveType};

/// Pest parser for OMG IDL schema files.
#[derive(Parser)]
#[grammar_inline = r#"
WHITESPACE = _{ " " | "\t" | "\r" | "\n" }
COMMENT = _{ ("//" ~ (!NEWLINE ~ ANY)*) | ("/*" ~ (!"*/" ~ ANY)* ~ "*/") }

idl = { SOI ~ definition* ~ EOI }
definition = _{ module_decl | struct_decl | typedef_decl | const_decl }

module_decl = { annotation* ~ "module" ~ identifier ~ "{" ~ definition* ~ "}" ~ ";"? }
struct_decl = { annotation* ~ "struct" ~ identifier ~ "{" ~ member* ~ "}" ~ ";"? }
typedef_decl = { "typedef" ~ type_spec ~ identifier ~ array_suffix? ~ ";" }
const_decl = { "const" ~ type_spec ~ identifier ~ "=" ~ const_expr ~ ";" }
const_expr = @{ (!";" ~ ANY)+ }

member = { annotation* ~ type_spec ~ identifier ~ array_suffix? ~ ";" }

annotation = _{ "@" ~ identifier ~ ("(" ~ (!")" ~ ANY)* ~ ")")? }

type_spec = { sequence_type | bounded_string | multi_word_type | scoped_name }
sequence_type = { "sequence" ~ "<" ~ type_spec ~ ("," ~ integer)? ~ ">" }
bounded_string = { string_kw ~ "<" ~ integer ~ ">" }
string_kw = @{ ("wstring" | "string") ~ !ident_char }
multi_word_type = { (w_unsigned ~ (w_long ~ w_long? | w_short)) | (w_long ~ (w_long | w_double)?) }
w_unsigned = @{ "unsigned" ~ !ident_char }
w_long = @{ "long" ~ !ident_char }
w_short = @{ "short" ~ !ident_char }
w_double = @{ "double" ~ !ident_char }
array_suffix = { "[" ~ integer ~ "]" }
scoped_name = @{ identifier ~ ("::" ~ identifier)* }
identifier = @{ (ASCII_ALPHA | "_") ~ ident_char* }
ident_char = _{ ASCII_ALPHANUMERIC | "_" }
integer = @{ ASCII_DIGIT+ }
"#]
struct IdlParser;

/// Parse an OMG IDL schema into the common AST.
pub fn parse(name: &str, definition: &str) -> Result<MessageSchema> {
    let pairs = IdlParser::parse(Rule::idl, definition)
        .map_err(|e| IngestError::parse("idl schema", e.to_string()))?;

    let mut schema = MessageSchema::new(name.to_string());
    let mut typedefs: HashMap<String, FieldType> = HashMap::new();

    for pair in pairs {
        for def in pair.into_inner() {
            walk_definition(def, &mut Vec::new(), &mut schema, &mut typedefs);
        }
    }

    if schema.types.is_empty() {
        return Err(IngestError::parse(
            "idl schema",
            "no struct declarations found",
        ));
    }

    resolve_typedefs(&mut schema, &typedefs);
    Ok(schema)
}

fn walk_definition(
    pair: Pair<Rule>,
    path: &mut Vec<String>,
    schema: &mut MessageSchema,
    typedefs: &mut HashMap<String, FieldType>,
) {
    match pair.as_rule() {
        Rule::module_decl => {
            let mut inner = pair.into_inner();
            let Some(name) = inner.next() else { return };
            path.push(name.as_str().to_string());
            for def in inner {
                walk_definition(def, path, schema, typedefs);
            }
            path.pop();
        }
        Rule::struct_decl => {
            let mut inner = pair.into_inner();
            let Some(name) = inner.next() else { return };
            let type_name = qualified_name(path, name.as_str());

            let mut msg_type = MessageType::new(type_name);
            for member in inner {
                if member.as_rule() != Rule::member {
                    continue;
                }
                if let Some(field) = parse_member(member) {
                    msg_type.add_field(field);
                }
            }
            schema.add_type(msg_type);
        }
        Rule::typedef_decl => {
            let mut inner = pair.into_inner();
            let Some(spec) = inner.next() else { return };
            let Some(name) = inner.next() else { return };
            let base = parse_type_spec(spec);
            let aliased = match inner.next().and_then(parse_array_suffix) {
                Some(size) => FieldType::Array {
                    base_type: Box::new(base),
                    size: Some(size),
                },
                None => base,
            };
            // Register under both the qualified and the short name;
            // members reference either.
            typedefs.insert(qualified_name(path, name.as_str()), aliased.clone());
            typedefs.insert(name.as_str().to_string(), aliased);
        }
        Rule::const_decl => {}
        _ => {}
    }
}

fn qualified_name(path: &[String], name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", path.join("/"), name)
    }
}

fn parse_member(pair: Pair<Rule>) -> Option<Field> {
    let mut spec = None;
    let mut name = None;
    let mut array_size = None;

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::type_spec => spec = Some(parse_type_spec(item)),
            Rule::identifier => name = Some(item.as_str().to_string()),
            Rule::array_suffix => array_size = parse_array_suffix(item),
            _ => {}
        }
    }

    let base = spec?;
    let field_type = match array_size {
        Some(size) => FieldType::Array {
            base_type: Box::new(base),
            size: Some(size),
        },
        None => base,
    };
    Some(Field {
        name: name?,
        type_name: field_type,
    })
}

fn parse_array_suffix(pair: Pair<Rule>) -> Option<usize> {
    if pair.as_rule() != Rule::array_suffix {
        return None;
    }
    pair.into_inner()
        .next()
        .and_then(|n| n.as_str().parse().ok())
}

fn parse_type_spec(pair: Pair<Rule>) -> FieldType {
    let inner = pair
        .into_inner()
        .next()
        .expect("type_spec always has one alternative");
    match inner.as_rule() {
        Rule::sequence_type => {
            let element = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::type_spec)
                .map(parse_type_spec)
                .unwrap_or(FieldType::Primitive(PrimitiveType::UInt8));
            FieldType::Array {
                base_type: Box::new(element),
                size: None,
            }
        }
        Rule::bounded_string => {
            let wide = inner.as_str().trim_start().starts_with("wstring");
            FieldType::Primitive(if wide {
                PrimitiveType::WString
            } else {
                PrimitiveType::String
            })
        }
        Rule::multi_word_type => {
            let words: Vec<&str> = inner.as_str().split_whitespace().collect();
            FieldType::Primitive(multi_word_primitive(&words))
        }
        Rule::scoped_name => {
            let text = inner.as_str();
            match idl_primitive(text) {
                Some(prim) => FieldType::Primitive(prim),
                None => FieldType::Nested(text.replace("::", "/")),
            }
        }
        _ => FieldType::Primitive(PrimitiveType::UInt8),
    }
}

/// Map a multi-word IDL integer type to its fixed-width equivalent.
fn multi_word_primitive(words: &[&str]) -> PrimitiveType {
    match words {
        ["unsigned", "long", "long"] => PrimitiveType::UInt64,
        ["unsigned", "long"] => PrimitiveType::UInt32,
        ["unsigned", "short"] => PrimitiveType::UInt16,
        ["long", "long"] => PrimitiveType::Int64,
        ["long", "double"] => PrimitiveType::Float64,
        ["long"] => PrimitiveType::Int32,
        _ => PrimitiveType::Int32,
    }
}

/// Map single-token IDL type names to primitives.
fn idl_primitive(s: &str) -> Option<PrimitiveType> {
    match s {
        "boolean" => Some(PrimitiveType::Bool),
        "octet" => Some(PrimitiveType::UInt8),
        "char" => Some(PrimitiveType::Char),
        "wchar" => Some(PrimitiveType::Char),
        "short" => Some(PrimitiveType::Int16),
        "float" => Some(PrimitiveType::Float32),
        "double" => Some(PrimitiveType::Float64),
        "string" => Some(PrimitiveType::String),
        "wstring" => Some(PrimitiveType::WString),
        // IDL 4 fixed-width names
        "int8" => Some(PrimitiveType::Int8),
        "uint8" => Some(PrimitiveType::UInt8),
        "int16" => Some(PrimitiveType::Int16),
        "uint16" => Some(PrimitiveType::UInt16),
        "int32" => Some(PrimitiveType::Int32),
        "uint32" => Some(PrimitiveType::UInt32),
        "int64" => Some(PrimitiveType::Int64),
        "uint64" => Some(PrimitiveType::UInt64),
        _ => None,
    }
}

/// Substitute typedef aliases throughout the parsed types.
fn resolve_typedefs(schema: &mut MessageSchema, typedefs: &HashMap<String, FieldType>) {
    if typedefs.is_empty() {
        return;
    }
    for msg_type in schema.types.values_mut() {
        for field in &mut msg_type.fields {
            substitute(&mut field.type_name, typedefs);
        }
        msg_type.max_alignment = msg_type
            .fields
            .iter()
            .map(|f| f.type_name.alignment())
            .max()
            .unwrap_or(1);
    }
}

fn substitute(field_type: &mut FieldType, typedefs: &HashMap<String, FieldType>) {
    match field_type {
        FieldType::Nested(name) => {
            let short = name.rsplit('/').next().unwrap_or(name).to_string();
            if let Some(alias) = typedefs.get(name.as_str()).or_else(|| typedefs.get(&short)) {
                *field_type = alias.clone();
            }
        }
        FieldType::Array { base_type, .. } => substitute(base_type, typedefs),
        FieldType::Primitive(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_struct() {
        let schema = parse("Point", "struct Point { double x; double y; };").unwrap();
        let msg_type = schema.get_type("Point").unwrap();
        assert_eq!(msg_type.fields.len(), 2);
        assert_eq!(
            msg_type.fields[0].type_name,
            FieldType::Primitive(PrimitiveType::Float64)
        );
    }

    #[test]
    fn test_parse_modules_qualify_names() {
        let idl = "module geometry_msgs { module msg { struct Point { double x; }; }; };";
        let schema = parse("geometry_msgs/msg/Point", idl).unwrap();
        assert!(schema.get_type("geometry_msgs/msg/Point").is_some());
    }

    #[test]
    fn test_parse_integer_widths() {
        let idl = "struct Numbers {
            long a;
            unsigned long b;
            long long c;
            unsigned long long d;
            short e;
            unsigned short f;
            octet g;
        };";
        let schema = parse("Numbers", idl).unwrap();
        let fields = &schema.get_type("Numbers").unwrap().fields;
        let expect = [
            PrimitiveType::Int32,
            PrimitiveType::UInt32,
            PrimitiveType::Int64,
            PrimitiveType::UInt64,
            PrimitiveType::Int16,
            PrimitiveType::UInt16,
            PrimitiveType::UInt8,
        ];
        for (field, prim) in fields.iter().zip(expect) {
            assert_eq!(field.type_name, FieldType::Primitive(prim), "{}", field.name);
        }
    }

    #[test]
    fn test_long_prefixed_identifier_is_not_a_keyword() {
        let schema = parse("T", "struct T { long longitude; };").unwrap();
        let fields = &schema.get_type("T").unwrap().fields;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "longitude");
        assert_eq!(
            fields[0].type_name,
            FieldType::Primitive(PrimitiveType::Int32)
        );
    }

    #[test]
    fn test_parse_sequence_and_array() {
        let idl = "struct Data { sequence<long> values; double fixed[9]; sequence<octet, 16> bounded; };";
        let schema = parse("Data", idl).unwrap();
        let fields = &schema.get_type("Data").unwrap().fields;

        match &fields[0].type_name {
            FieldType::Array { base_type, size } => {
                assert!(size.is_none());
                assert_eq!(**base_type, FieldType::Primitive(PrimitiveType::Int32));
            }
            other => panic!("expected sequence, got {other:?}"),
        }
        match &fields[1].type_name {
            FieldType::Array { size, .. } => assert_eq!(*size, Some(9)),
            other => panic!("expected fixed array, got {other:?}"),
        }
        match &fields[2].type_name {
            FieldType::Array { size, .. } => assert!(size.is_none()),
            other => panic!("expected bounded sequence, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_bounded_string() {
        let schema = parse("S", "struct S { string<256> name; wstring<32> wide; };").unwrap();
        let fields = &schema.get_type("S").unwrap().fields;
        assert_eq!(
            fields[0].type_name,
            FieldType::Primitive(PrimitiveType::String)
        );
        assert_eq!(
            fields[1].type_name,
            FieldType::Primitive(PrimitiveType::WString)
        );
    }

    #[test]
    fn test_typedef_array_alias() {
        let idl = "module pkg { module msg {
            typedef double double__9[9];
            struct Covariance { double__9 data; };
        }; };";
        let schema = parse("pkg/msg/Covariance", idl).unwrap();
        let fields = &schema.get_type("pkg/msg/Covariance").unwrap().fields;
        match &fields[0].type_name {
            FieldType::Array { base_type, size } => {
                assert_eq!(*size, Some(9));
                assert_eq!(**base_type, FieldType::Primitive(PrimitiveType::Float64));
            }
            other => panic!("expected typedef-resolved array, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_type_reference() {
        let idl = "module pkg { module msg { struct Outer { std_msgs::msg::Header header; }; }; };";
        let schema = parse("pkg/msg/Outer", idl).unwrap();
        let fields = &schema.get_type("pkg/msg/Outer").unwrap().fields;
        assert_eq!(
            fields[0].type_name,
            FieldType::Nested("std_msgs/msg/Header".to_string())
        );
    }

    #[test]
    fn test_annotations_and_comments_are_skipped() {
        let idl = "
// leading comment
module pkg { module msg {
  @verbatim (language=\"comment\", text=\"docs\")
  struct Noted {
    @default (value=5)
    long value;
    /* block comment */
    double other;
  };
}; };";
        let schema = parse("pkg/msg/Noted", idl).unwrap();
        assert_eq!(schema.get_type("pkg/msg/Noted").unwrap().fields.len(), 2);
    }

    #[test]
    fn test_constants_are_skipped() {
        let idl = "module pkg { module msg {
            module Status_Constants { const octet OK = 0; };
            struct Status { octet code; };
        }; };";
        let schema = parse("pkg/msg/Status", idl).unwrap();
        assert_eq!(schema.get_type("pkg/msg/Status").unwrap().fields.len(), 1);
    }

    #[test]
    fn test_empty_idl_fails() {
        assert!(parse("X", "// nothing here\n").is_err());
    }
}
