// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Core types used throughout robostream.
//!
//! This module provides the foundational types for the engine:
//! - [`IngestError`] - Comprehensive error handling
//! - [`Time`] - Log timestamps
//! - [`CodecValue`] - Unified decoded-value representation
//! - [`estimate_message_size`] - Heap-footprint estimation

pub mod error;
pub mod estimate;
pub mod time;
pub mod value;

pub use error::{IngestError, Result};
pub use estimate::estimate_message_size;
pub use time::Time;
pub use value::{CodecValue, DecodedMessage};
