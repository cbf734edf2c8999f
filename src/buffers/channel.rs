use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Value of one sample: a scalar or an index-selectable vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl SampleValue {
    /// Scalars ignore `index`; a missing vector element reads as zero
    pub fn select(&self, index: usize) -> f64 {
        match self {
            SampleValue::Scalar(v) => *v,
            SampleValue::Vector(values) => values.get(index).copied().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Milliseconds on the session clock
    pub timestamp: f64,
    pub value: SampleValue,
}

impl Default for Point {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            value: SampleValue::Scalar(0.0),
        }
    }
}

/// Bounded time series of one record field
#[derive(Debug, Clone)]
pub struct Channel {
    points: VecDeque<Point>,
    capacity: usize,
}

impl Channel {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::new(),
            capacity,
        }
    }

    pub fn extend(&mut self, points: impl IntoIterator<Item = Point>) {
        self.points.extend(points);
    }

    /// Evicts oldest points beyond capacity
    pub fn truncate_front(&mut self) {
        if self.points.len() > self.capacity {
            let excess = self.points.len() - self.capacity;
            self.points.drain(..excess);
        }
    }

    pub fn latest(&self) -> Option<&Point> {
        self.points.back()
    }

    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
