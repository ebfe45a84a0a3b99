// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Heap-footprint estimation for decoded message values.
//!
//! The estimate feeds cache eviction and playback back-pressure. It is
//! deliberately approximate: callers cache the first estimate per topic
//! and reuse it for every subsequent message on that topic.

use crate::core::value::CodecValue;

/// Size of a pointer-tagged small value (null, bool, small integer).
const SMALL_VALUE_SIZE: u64 = 4;

/// Size of a heap-boxed number outside the small-integer range.
const BOXED_NUMBER_SIZE: u64 = 12;

/// Base overhead of a string beyond the tagged slot.
const STRING_BASE_SIZE: u64 = 12;

/// Base overhead of a typed byte array.
const BYTE_ARRAY_BASE_SIZE: u64 = 100;

/// Overhead of a growable array beyond the tagged slot.
const ARRAY_BASE_SIZE: u64 = 24;

/// Base size of a struct with inline properties.
const STRUCT_BASE_SIZE: u64 = 12;

/// Above this many fields, struct properties move to a dictionary.
const MAX_INLINE_PROPERTIES: usize = 1020;

/// Integers in `[-2^30, 2^30)` fit the tagged small-value representation.
const SMALL_INT_MIN: i64 = -(1 << 30);
const SMALL_INT_MAX: i64 = 1 << 30;

/// Estimate the in-heap footprint of a decoded message value, in bytes.
pub fn estimate_message_size(value: &CodecValue) -> u64 {
    match value {
        CodecValue::Null | CodecValue::Bool(_) => SMALL_VALUE_SIZE,

        CodecValue::Int8(_)
        | CodecValue::Int16(_)
        | CodecValue::Int32(_)
        | CodecValue::UInt8(_)
        | CodecValue::UInt16(_) => SMALL_VALUE_SIZE,

        CodecValue::UInt32(v) => int_size(*v as i64),
        CodecValue::Int64(v) => int_size(*v),
        CodecValue::UInt64(v) => {
            if *v < SMALL_INT_MAX as u64 {
                SMALL_VALUE_SIZE
            } else {
                BOXED_NUMBER_SIZE
            }
        }

        CodecValue::Float32(v) => float_size(*v as f64),
        CodecValue::Float64(v) => float_size(*v),

        CodecValue::Timestamp(_) | CodecValue::Duration(_) => BOXED_NUMBER_SIZE,

        CodecValue::String(s) => {
            // Character storage rounds up to 4-byte words.
            SMALL_VALUE_SIZE + STRING_BASE_SIZE + 4 * (s.len() as u64).div_ceil(4)
        }

        CodecValue::Bytes(b) => BYTE_ARRAY_BASE_SIZE + b.len() as u64,

        CodecValue::Array(items) => {
            SMALL_VALUE_SIZE
                + ARRAY_BASE_SIZE
                + items.iter().map(estimate_message_size).sum::<u64>()
        }

        CodecValue::Struct(fields) => {
            let contents: u64 = fields.values().map(estimate_message_size).sum();
            STRUCT_BASE_SIZE + dictionary_overhead(fields.len()) + contents
        }
    }
}

/// Integers inside the tagged range cost one slot; others are boxed.
fn int_size(v: i64) -> u64 {
    if (SMALL_INT_MIN..SMALL_INT_MAX).contains(&v) {
        SMALL_VALUE_SIZE
    } else {
        BOXED_NUMBER_SIZE
    }
}

/// Floats with an integral value in the tagged range cost one slot.
fn float_size(v: f64) -> u64 {
    if v.fract() == 0.0 && v >= SMALL_INT_MIN as f64 && v < SMALL_INT_MAX as f64 {
        SMALL_VALUE_SIZE
    } else {
        BOXED_NUMBER_SIZE
    }
}

/// Property-table overhead for a struct with `n` fields.
///
/// Past [`MAX_INLINE_PROPERTIES`] the properties live in a hash
/// dictionary whose table grows in powers of two with three words per
/// entry.
fn dictionary_overhead(n: usize) -> u64 {
    if n <= MAX_INLINE_PROPERTIES {
        return 0;
    }
    let table_slots = (n as u64).next_power_of_two();
    16 + table_slots * 3 * 4
}
