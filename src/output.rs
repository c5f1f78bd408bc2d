//! Turns a child's raw output stream into log records.
//!
//! Output arrives in arbitrary chunks. A chunk that ends a line flushes the
//! buffered text as one record; a chunk without a trailing newline is held
//! until one arrives. `::group::name` and `::endgroup::` lines (the GitHub
//! Actions markers) bracket the records with `BEGIN` and `END` markers.

use chrono::{DateTime, Utc};
use gol_client::Datetime;
use serde::Serialize;

pub const GROUP: &[u8] = b"::group::";
pub const GROUP_END: &[u8] = b"::endgroup::";

pub const BEGIN_MARKER: &str = "BEGIN";
pub const END_MARKER: &str = "END";

/// One log record: the text and the moment its first byte arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutData {
    #[serde(rename = "msg")]
    pub message: String,
    pub time: Option<Datetime>,
}

impl OutData {
    fn marker(name: &str) -> Self {
        OutData {
            message: name.to_string(),
            time: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct OutputBuffer {
    msg: Vec<u8>,
    time: Option<DateTime<Utc>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, chunk: &[u8]) -> Vec<OutData> {
        self.write_at(chunk, Utc::now())
    }

    /// Feed one chunk received at `now` and return the records it completes.
    pub fn write_at(&mut self, chunk: &[u8], now: DateTime<Utc>) -> Vec<OutData> {
        if chunk.is_empty() {
            return Vec::new();
        }
        if self.time.is_none() {
            self.time = Some(now);
        }

        let normalized = normalize_newlines(chunk);
        let (body, line_end) = match normalized.strip_suffix(b"\n") {
            Some(body) => (body, true),
            None => (normalized.as_slice(), false),
        };

        let mut records = Vec::new();
        if let Some(title) = body.strip_prefix(GROUP) {
            self.msg.extend_from_slice(title);
            records.push(OutData::marker(BEGIN_MARKER));
            records.push(self.consume());
        } else if body == GROUP_END {
            records.push(self.consume());
            records.push(OutData::marker(END_MARKER));
        } else {
            self.msg.extend_from_slice(body);
            if line_end {
                records.push(self.consume());
            }
        }
        records
    }

    /// Take whatever is buffered as a record and start over.
    pub fn consume(&mut self) -> OutData {
        let data = OutData {
            message: String::from_utf8_lossy(&self.msg).into_owned(),
            time: self.time.map(Datetime),
        };
        self.msg.clear();
        self.time = None;
        data
    }

    pub fn is_empty(&self) -> bool {
        self.msg.is_empty()
    }
}

/// `\r\n` and lone `\r` both become `\n`.
fn normalize_newlines(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len());
    let mut bytes = chunk.iter().peekable();
    while let Some(&b) = bytes.next() {
        if b == b'\r' {
            bytes.next_if_eq(&&b'\n');
            out.push(b'\n');
        } else {
            out.push(b);
        }
    }
    out
}
