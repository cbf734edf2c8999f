use super::prefix::strip_prefix_noise;
use super::{records_from_value, DelimitedFormat, FramingConfig, OverflowPolicy, RecordDecoder};
use crate::core::{DecodedRecord, FieldValue};
use log::warn;
use regex::Regex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

/// Legacy line framing: `v,sp,err;v2,sp2,err2\n`
///
/// Each `;`-separated batch becomes one record of scalar fields named by
/// position. Lines that are valid JSON are decoded as JSON instead.
pub struct DelimitedDecoder {
    format: DelimitedFormat,
    pending: String,
    ready: VecDeque<DecodedRecord>,
    max_pending_bytes: usize,
    overflow: OverflowPolicy,
    next_sequence: u64,
    overflow_count: u64,
}

impl DelimitedDecoder {
    pub fn new(format: DelimitedFormat, config: &FramingConfig) -> Self {
        Self {
            format,
            pending: String::new(),
            ready: VecDeque::new(),
            max_pending_bytes: config.max_pending_bytes,
            overflow: config.overflow,
            next_sequence: 0,
            overflow_count: 0,
        }
    }

    fn decode_line(&mut self, raw: &str) {
        let cleaned = strip_prefix_noise(raw.trim());
        let line = cleaned.trim();
        if line.is_empty() {
            return;
        }

        if line.starts_with('{') || line.starts_with('[') {
            if let Ok(value) = serde_json::from_str::<Value>(line) {
                let records = records_from_value(value, line, &mut self.next_sequence);
                self.ready.extend(records);
                return;
            }
        }

        let raw: Arc<str> = Arc::from(line);
        for batch in line.split(self.format.record_separator) {
            if batch.trim().is_empty() {
                continue;
            }

            let values: Vec<f64> = batch
                .split(self.format.field_separator)
                .map(parse_lenient)
                .collect();

            let mut record = DecodedRecord::new(self.next_sequence).with_raw(raw.clone());
            self.next_sequence += 1;
            for (idx, name) in self.format.field_names.iter().enumerate() {
                let value = values.get(idx).copied().unwrap_or(0.0);
                record.insert(name.clone(), FieldValue::Scalar(value));
            }
            self.ready.push_back(record);
        }
    }

    fn enforce_ceiling(&mut self) {
        let len = self.pending.len();
        if len <= self.max_pending_bytes {
            return;
        }

        self.overflow_count += 1;
        match self.overflow {
            OverflowPolicy::Reset => {
                warn!("Unterminated line reached {} bytes, resetting", len);
                self.pending.clear();
            }
            OverflowPolicy::DropOldest => {
                let mut cut = len - self.max_pending_bytes;
                while !self.pending.is_char_boundary(cut) {
                    cut += 1;
                }
                warn!("Unterminated line reached {} bytes, dropping {} oldest", len, cut);
                self.pending.drain(..cut);
            }
        }
    }
}

impl RecordDecoder for DelimitedDecoder {
    fn push(&mut self, chunk: &str) {
        self.pending.push_str(chunk);
    }

    fn next_record(&mut self) -> Option<DecodedRecord> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Some(record);
            }

            let Some(newline) = self.pending.find('\n') else {
                self.enforce_ceiling();
                return None;
            };
            let line: String = self.pending.drain(..=newline).collect();
            self.decode_line(&line);
        }
    }

    fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.ready.clear();
    }
}

/// Leading decimal literal, as in `12.5e3V`
const NUMERIC_PREFIX_PATTERN: &str = r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?";

static NUMERIC_PREFIX: OnceLock<Regex> = OnceLock::new();

fn numeric_prefix() -> &'static Regex {
    NUMERIC_PREFIX
        .get_or_init(|| Regex::new(NUMERIC_PREFIX_PATTERN).expect("numeric pattern compiles"))
}

/// Reads the leading decimal number of a field (`"12abc"` is 12).
/// Fields with no numeric prefix, or that overflow, read as zero.
fn parse_lenient(field: &str) -> f64 {
    numeric_prefix()
        .find(field.trim_start())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}
