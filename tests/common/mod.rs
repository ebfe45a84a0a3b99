// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Fixture synthesis shared by the integration tests: just enough of
//! each container format to build small files.

/// MCAP magic bytes.
pub const MCAP_MAGIC: [u8; 8] = [0x89, 0x4D, 0x43, 0x41, 0x50, 0x30, 0x0D, 0x0A];

const OP_HEADER: u8 = 0x01;
const OP_FOOTER: u8 = 0x02;
const OP_SCHEMA: u8 = 0x03;
const OP_CHANNEL: u8 = 0x04;
const OP_MESSAGE: u8 = 0x05;
const OP_DATA_END: u8 = 0x0F;

fn push_record(out: &mut Vec<u8>, op: u8, body: &[u8]) {
    out.push(op);
    out.extend_from_slice(&(body.len() as u64).to_le_bytes());
    out.extend_from_slice(body);
}

fn push_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Start an MCAP file: magic plus a header record.
pub fn mcap_start(profile: &str) -> Vec<u8> {
    let mut out = MCAP_MAGIC.to_vec();
    let mut body = Vec::new();
    push_string(&mut body, profile);
    push_string(&mut body, "robostream-tests");
    push_record(&mut out, OP_HEADER, &body);
    out
}

/// Append a schema record.
pub fn mcap_schema(out: &mut Vec<u8>, id: u16, name: &str, encoding: &str, data: &[u8]) {
    let mut body = Vec::new();
    body.extend_from_slice(&id.to_le_bytes());
    push_string(&mut body, name);
    push_string(&mut body, encoding);
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.extend_from_slice(data);
    push_record(out, OP_SCHEMA, &body);
}

/// Append a channel record.
pub fn mcap_channel(out: &mut Vec<u8>, id: u16, schema_id: u16, topic: &str) {
    let mut body = Vec::new();
    body.extend_from_slice(&id.to_le_bytes());
    body.extend_from_slice(&schema_id.to_le_bytes());
    push_string(&mut body, topic);
    push_string(&mut body, "cdr");

    let mut metadata = Vec::new();
    push_string(&mut metadata, "callerid");
    push_string(&mut metadata, "/it_node");
    body.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
    body.extend_from_slice(&metadata);
    push_record(out, OP_CHANNEL, &body);
}

/// Append a message record carrying a CDR-encoded `uint32 count`.
pub fn mcap_counter_message(out: &mut Vec<u8>, channel_id: u16, log_time: u64, count: u32) {
    let mut body = Vec::new();
    body.extend_from_slice(&channel_id.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&log_time.to_le_bytes());
    body.extend_from_slice(&log_time.to_le_bytes());
    body.extend_from_slice(&[0x00, 0x01, 0x00, 0x00]);
    body.extend_from_slice(&count.to_le_bytes());
    push_record(out, OP_MESSAGE, &body);
}

/// Finish an MCAP file: data end, footer, trailing magic.
pub fn mcap_end(out: &mut Vec<u8>) {
    push_record(out, OP_DATA_END, &0u32.to_le_bytes());
    let mut footer = Vec::new();
    footer.extend_from_slice(&0u64.to_le_bytes());
    footer.extend_from_slice(&0u64.to_le_bytes());
    footer.extend_from_slice(&0u32.to_le_bytes());
    push_record(out, OP_FOOTER, &footer);
    out.extend_from_slice(&MCAP_MAGIC);
}

/// A complete single-topic `uint32 count` MCAP file.
pub fn counter_mcap(topic: &str, log_times: &[u64]) -> Vec<u8> {
    let mut out = mcap_start("ros2");
    mcap_schema(&mut out, 1, "pkg/msg/Counter", "ros2msg", b"uint32 count");
    mcap_channel(&mut out, 1, 1, topic);
    for (i, log_time) in log_times.iter().enumerate() {
        mcap_counter_message(&mut out, 1, *log_time, i as u32);
    }
    mcap_end(&mut out);
    out
}

/// A two-topic MCAP file with explicit `(channel, log_time)` messages.
pub fn two_topic_mcap(messages: &[(u16, u64)]) -> Vec<u8> {
    let mut out = mcap_start("ros2");
    mcap_schema(&mut out, 1, "pkg/msg/Counter", "ros2msg", b"uint32 count");
    mcap_channel(&mut out, 1, 1, "/a");
    mcap_channel(&mut out, 2, 1, "/b");
    for (channel, log_time) in messages {
        mcap_counter_message(&mut out, *channel, *log_time, 0);
    }
    mcap_end(&mut out);
    out
}
