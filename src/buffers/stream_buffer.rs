use super::channel::{Channel, Point, SampleValue};
use crate::core::{DecodedRecord, FieldValue};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Samples shown by one dashboard plot; channels keep ten of them
pub const BASE_WINDOW: usize = 1000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = BASE_WINDOW * 10;

/// Treatment of scalar record fields during ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarPolicy {
    /// Scalars are batch metadata and are not streamed
    Ignore,
    /// Each scalar field becomes one sample at the clock
    Append,
}

impl Default for ScalarPolicy {
    fn default() -> Self {
        ScalarPolicy::Ignore
    }
}

/// Timestamp of the most recently assigned sample, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionClock {
    now_ms: f64,
}

impl SessionClock {
    pub fn starting_at(now_ms: f64) -> Self {
        Self { now_ms }
    }

    pub fn now(&self) -> f64 {
        self.now_ms
    }

    /// Never moves backwards
    pub fn advance_to(&mut self, timestamp: f64) {
        if timestamp > self.now_ms {
            self.now_ms = timestamp;
        }
    }
}

struct BufferState {
    channels: HashMap<String, Channel>,
    clock: SessionClock,
}

/// Per-channel sample history for one transport connection.
///
/// One writer ingests whole records under the write lock, so readers always
/// see every channel at a record boundary.
pub struct SampleStreamBuffer {
    state: RwLock<BufferState>,
    capacity: usize,
    scalar_policy: ScalarPolicy,
}

impl SampleStreamBuffer {
    pub fn new(capacity: usize, scalar_policy: ScalarPolicy) -> Self {
        Self::with_clock(capacity, scalar_policy, SessionClock::default())
    }

    pub fn with_clock(capacity: usize, scalar_policy: ScalarPolicy, clock: SessionClock) -> Self {
        Self {
            state: RwLock::new(BufferState {
                channels: HashMap::new(),
                clock,
            }),
            capacity,
            scalar_policy,
        }
    }

    /// Unrolls the numeric arrays of `record` into timestamped points.
    ///
    /// Every array starts at the current clock and steps by
    /// `sample_interval_ms`; the clock then moves to the latest timestamp
    /// produced. Returns the number of points appended.
    pub fn ingest(&self, record: &DecodedRecord, sample_interval_ms: f64) -> usize {
        let mut state = self.state.write();
        let start = state.clock.now();
        let mut last_batch_timestamp: Option<f64> = None;
        let mut appended = 0;
        let mut scalar_only = true;

        for (name, value) in &record.fields {
            let points: Vec<Point> = match value {
                FieldValue::Vector(samples) => samples
                    .iter()
                    .enumerate()
                    .map(|(i, &y)| Point {
                        timestamp: start + i as f64 * sample_interval_ms,
                        value: SampleValue::Scalar(y),
                    })
                    .collect(),
                FieldValue::Rows(rows) => rows
                    .iter()
                    .enumerate()
                    .map(|(i, row)| Point {
                        timestamp: start + i as f64 * sample_interval_ms,
                        value: SampleValue::Vector(row.clone()),
                    })
                    .collect(),
                FieldValue::Scalar(v) if self.scalar_policy == ScalarPolicy::Append => {
                    vec![Point {
                        timestamp: start,
                        value: SampleValue::Scalar(*v),
                    }]
                }
                FieldValue::Scalar(_) | FieldValue::Other(_) => continue,
            };

            if !matches!(value, FieldValue::Scalar(_)) {
                scalar_only = false;
                if let Some(last) = points.last() {
                    last_batch_timestamp = Some(
                        last_batch_timestamp.map_or(last.timestamp, |t| t.max(last.timestamp)),
                    );
                }
            }

            appended += points.len();
            let capacity = self.capacity;
            let channel = state
                .channels
                .entry(name.clone())
                .or_insert_with(|| Channel::new(capacity));
            channel.extend(points);
            channel.truncate_front();
        }

        if let Some(last) = last_batch_timestamp {
            state.clock.advance_to(last);
        } else if scalar_only && appended > 0 {
            state.clock.advance_to(start + sample_interval_ms);
        }

        appended
    }

    /// Most recent point, or the default point for an absent/empty channel
    pub fn latest(&self, channel: &str) -> Point {
        self.state
            .read()
            .channels
            .get(channel)
            .and_then(|c| c.latest().cloned())
            .unwrap_or_default()
    }

    /// `(timestamp, y)` pairs, with `y` taken from vector element `index`
    pub fn window(&self, channel: &str, index: usize) -> Vec<(f64, f64)> {
        let state = self.state.read();
        match state.channels.get(channel) {
            Some(c) => c.points().map(|p| (p.timestamp, p.value.select(index))).collect(),
            None => Vec::new(),
        }
    }

    /// The `y` column of [`window`](Self::window)
    pub fn signal(&self, channel: &str, index: usize) -> Vec<f64> {
        self.recent_signal(channel, index, usize::MAX)
    }

    /// At most the `max_len` newest values of the `y` column
    pub fn recent_signal(&self, channel: &str, index: usize, max_len: usize) -> Vec<f64> {
        let state = self.state.read();
        match state.channels.get(channel) {
            Some(c) => c
                .points()
                .skip(c.len().saturating_sub(max_len))
                .map(|p| p.value.select(index))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self, channel: &str) -> usize {
        self.state
            .read()
            .channels
            .get(channel)
            .map(Channel::len)
            .unwrap_or(0)
    }

    pub fn clock(&self) -> f64 {
        self.state.read().clock.now()
    }

    /// Empties every channel; the clock keeps running
    pub fn clear(&self) {
        for channel in self.state.write().channels.values_mut() {
            channel.clear();
        }
    }

    pub fn clear_channel(&self, channel: &str) {
        if let Some(c) = self.state.write().channels.get_mut(channel) {
            c.clear();
        }
    }
}

impl Default for SampleStreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY, ScalarPolicy::default())
    }
}
