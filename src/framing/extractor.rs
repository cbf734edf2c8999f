use super::prefix::strip_prefix_noise;
use super::{records_from_value, FramingConfig, OverflowPolicy, RecordDecoder, ScanMode};
use crate::core::DecodedRecord;
use log::{debug, warn};
use serde_json::Value;
use std::collections::VecDeque;
use std::ops::Range;

/// Recovers JSON objects and arrays from a noisy text stream
pub struct FrameExtractor {
    pending: String,
    ready: VecDeque<DecodedRecord>,
    scan: ScanMode,
    max_pending_bytes: usize,
    overflow: OverflowPolicy,
    next_sequence: u64,
    overflow_count: u64,
}

impl FrameExtractor {
    pub fn new(config: &FramingConfig) -> Self {
        Self {
            pending: String::new(),
            ready: VecDeque::new(),
            scan: config.scan,
            max_pending_bytes: config.max_pending_bytes,
            overflow: config.overflow,
            next_sequence: 0,
            overflow_count: 0,
        }
    }

    /// Text not yet resolved into a record
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Locates the next candidate span `[open, close]`
    fn next_candidate(&self) -> Option<Range<usize>> {
        let open = self.pending.find(|c| c == '{' || c == '[')?;
        let close = match self.scan {
            ScanMode::FirstClose => {
                let closer = if self.pending.as_bytes()[open] == b'{' { '}' } else { ']' };
                open + self.pending[open..].find(closer)?
            }
            ScanMode::Balanced => balanced_close(&self.pending, open)?,
        };
        Some(open..close + 1)
    }

    /// Parses one candidate into the ready queue; false when the buffer
    /// needs more input
    fn extract_one(&mut self) -> bool {
        let Some(span) = self.next_candidate() else {
            return false;
        };

        let candidate = &self.pending[span.clone()];
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => {
                let records = records_from_value(value, candidate, &mut self.next_sequence);
                self.ready.extend(records);
                self.pending.drain(..span.end);
                true
            }
            Err(e) => {
                debug!("Candidate at {}..{} not parsable yet: {}", span.start, span.end, e);
                false
            }
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
                warn!(
                    "Pending frame buffer reached {} bytes (limit {}), resetting",
                    len, self.max_pending_bytes
                );
                self.pending.clear();
            }
            OverflowPolicy::DropOldest => {
                let mut cut = len - self.max_pending_bytes;
                while !self.pending.is_char_boundary(cut) {
                    cut += 1;
                }
                warn!(
                    "Pending frame buffer reached {} bytes (limit {}), dropping {} oldest bytes",
                    len, self.max_pending_bytes, cut
                );
                self.pending.drain(..cut);
            }
        }
    }
}

impl RecordDecoder for FrameExtractor {
    fn push(&mut self, chunk: &str) {
        self.pending.push_str(&strip_prefix_noise(chunk));
    }

    fn next_record(&mut self) -> Option<DecodedRecord> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Some(record);
            }
            if !self.extract_one() {
                self.enforce_ceiling();
                return None;
            }
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

/// Index of the delimiter closing the value opened at `open`, ignoring
/// brackets inside string literals
fn balanced_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes()[open..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FrameExtractor {
        FrameExtractor::new(&FramingConfig::default())
    }

    #[test]
    fn test_balanced_close() {
        let text = r#"xx{"a":{"b":"}"},"c":[1,[2]]}tail"#;
        let close = balanced_close(text, 2).unwrap();
        assert_eq!(&text[2..=close], r#"{"a":{"b":"}"},"c":[1,[2]]}"#);
        assert!(balanced_close(r#"{"a":{"b":1}"#, 0).is_none());
    }

    #[test]
    fn test_preamble_is_discarded_with_record() {
        let mut ex = extractor();
        let records: Vec<_> = ex.feed("boot ok\r\n{\"a\":[1]}").collect();
        assert_eq!(records.len(), 1);
        assert_eq!(ex.pending(), "");
    }

    #[test]
    fn test_unfinished_candidate_is_retained() {
        let mut ex = extractor();
        assert_eq!(ex.feed("noise {\"a\":[1,").count(), 0);
        assert_eq!(ex.pending(), "noise {\"a\":[1,");
    }

    #[test]
    fn test_sequence_ids_increase() {
        let mut ex = extractor();
        let ids: Vec<u64> = ex
            .feed("[{\"a\":1},{\"b\":2}]{\"c\":3}")
            .map(|r| r.sequence_id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_records_keep_candidate_text() {
        let mut ex = extractor();
        let records: Vec<_> = ex
            .feed("12:00:00.001 -> [{\"a\":1},{\"a\":2}]junk{\"b\":[3]}")
            .collect();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].raw_text(), Some("[{\"a\":1},{\"a\":2}]"));
        assert!(records[0].shares_source(&records[1]));
        assert_eq!(records[2].raw_text(), Some("{\"b\":[3]}"));
        assert!(!records[1].shares_source(&records[2]));
    }
}
