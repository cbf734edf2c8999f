pub mod delimited;
pub mod extractor;
pub mod prefix;

pub use delimited::DelimitedDecoder;
pub use extractor::FrameExtractor;
pub use prefix::strip_prefix_noise;

use crate::core::DecodedRecord;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_MAX_PENDING_BYTES: usize = 1 << 20;

/// How the closing delimiter of a candidate is located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// First matching close character after the opener, nesting ignored
    FirstClose,
    /// Bracket-depth scan that skips string literals
    Balanced,
}

impl Default for ScanMode {
    fn default() -> Self {
        ScanMode::FirstClose
    }
}

/// What happens when the pending buffer outgrows its ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    Reset,
    DropOldest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Reset
    }
}

/// Layout of the legacy delimiter-separated lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelimitedFormat {
    pub record_separator: char,
    pub field_separator: char,
    pub field_names: Vec<String>,
}

impl Default for DelimitedFormat {
    fn default() -> Self {
        Self {
            record_separator: ';',
            field_separator: ',',
            field_names: ["CH", "adcV", "err", "SP"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FramingStrategy {
    Json,
    Delimited(DelimitedFormat),
}

impl Default for FramingStrategy {
    fn default() -> Self {
        FramingStrategy::Json
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    pub strategy: FramingStrategy,
    pub scan: ScanMode,
    pub max_pending_bytes: usize,
    pub overflow: OverflowPolicy,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            strategy: FramingStrategy::default(),
            scan: ScanMode::default(),
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Incremental text-to-record decoder
pub trait RecordDecoder {
    /// Appends one chunk of text
    fn push(&mut self, chunk: &str);

    /// Next complete record, or `None` until more input arrives
    fn next_record(&mut self) -> Option<DecodedRecord>;

    /// Bytes held back waiting for completion
    fn pending_len(&self) -> usize;

    /// Times the pending ceiling was hit
    fn overflow_count(&self) -> u64;

    fn reset(&mut self);

    /// Appends `chunk` and yields the records it completes, lazily.
    ///
    /// Dropping the iterator early loses nothing: the remaining records come
    /// out of the next call.
    fn feed(&mut self, chunk: &str) -> Frames<'_, Self>
    where
        Self: Sized,
    {
        self.push(chunk);
        Frames { decoder: self }
    }
}

pub struct Frames<'a, D: RecordDecoder> {
    decoder: &'a mut D,
}

impl<D: RecordDecoder> Iterator for Frames<'_, D> {
    type Item = DecodedRecord;

    fn next(&mut self) -> Option<DecodedRecord> {
        self.decoder.next_record()
    }
}

/// Normalizes a parsed value to records: a bare object is one record, an
/// array yields one record per object element. Every record keeps `raw`.
pub(crate) fn records_from_value(
    value: Value,
    raw: &str,
    next_sequence: &mut u64,
) -> Vec<DecodedRecord> {
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    let raw: Arc<str> = Arc::from(raw);
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match DecodedRecord::from_json(*next_sequence, item) {
            Some(record) => {
                *next_sequence += 1;
                records.push(record.with_raw(raw.clone()));
            }
            None => debug!("Skipping non-object element in decoded frame"),
        }
    }
    records
}

/// Strategy-selected decoder fed with raw transport bytes
pub struct Framer {
    decoder: Box<dyn RecordDecoder + Send>,
    utf8_tail: Vec<u8>,
}

impl Framer {
    pub fn new(config: &FramingConfig) -> Self {
        let decoder: Box<dyn RecordDecoder + Send> = match &config.strategy {
            FramingStrategy::Json => Box::new(FrameExtractor::new(config)),
            FramingStrategy::Delimited(format) => {
                Box::new(DelimitedDecoder::new(format.clone(), config))
            }
        };

        Self {
            decoder,
            utf8_tail: Vec::new(),
        }
    }

    /// Appends raw bytes, carrying an incomplete UTF-8 sequence over to the
    /// next chunk
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let mut data = std::mem::take(&mut self.utf8_tail);
        data.extend_from_slice(bytes);

        let mut text = String::with_capacity(data.len());
        let mut rest: &[u8] = &data;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(std::str::from_utf8(&rest[..valid_up_to]).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid_up_to + len..];
                        }
                        None => {
                            self.utf8_tail = rest[valid_up_to..].to_vec();
                            break;
                        }
                    }
                }
            }
        }

        self.decoder.push(&text);
    }

    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Frames<'_, Self> {
        self.push_bytes(bytes);
        Frames { decoder: self }
    }
}

impl RecordDecoder for Framer {
    fn push(&mut self, chunk: &str) {
        self.decoder.push(chunk);
    }

    fn next_record(&mut self) -> Option<DecodedRecord> {
        self.decoder.next_record()
    }

    fn pending_len(&self) -> usize {
        self.decoder.pending_len() + self.utf8_tail.len()
    }

    fn overflow_count(&self) -> u64 {
        self.decoder.overflow_count()
    }

    fn reset(&mut self) {
        self.decoder.reset();
        self.utf8_tail.clear();
    }
}
