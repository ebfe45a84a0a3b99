// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Wire decoding for message payloads.
//!
//! Both containers carry CDR-family payloads: ROS 2 messages are
//! CDR-encapsulated (4-byte header), ROS1 bag messages use the packed
//! little-endian layout without alignment padding.

pub mod cdr;

pub use cdr::{CdrCursor, CdrDecoder};
