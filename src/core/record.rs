use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Value carried by one field of a decoded record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Batch metadata such as a setpoint or an error term
    Scalar(f64),

    /// Samples of one channel, oldest first
    Vector(Vec<f64>),

    /// Vector-valued samples, one row per sample
    Rows(Vec<Vec<f64>>),

    /// Anything that is not numeric (strings, nulls, nested objects)
    Other(Value),
}

impl FieldValue {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) => FieldValue::Scalar(v),
                None => FieldValue::Other(Value::Number(n)),
            },
            Value::Array(items) => Self::from_array(items),
            other => FieldValue::Other(other),
        }
    }

    fn from_array(items: Vec<Value>) -> Self {
        if let Some(numbers) = numeric_row(&items) {
            return FieldValue::Vector(numbers);
        }

        let rows: Option<Vec<Vec<f64>>> = items
            .iter()
            .map(|item| item.as_array().and_then(|row| numeric_row(row)))
            .collect();

        match rows {
            Some(rows) if !rows.is_empty() => FieldValue::Rows(rows),
            _ => FieldValue::Other(Value::Array(items)),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            FieldValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }
}

fn numeric_row(items: &[Value]) -> Option<Vec<f64>> {
    items.iter().map(Value::as_f64).collect()
}

/// One complete structured record recovered from the raw stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedRecord {
    /// Order of recovery within one extractor
    pub sequence_id: u64,

    /// Fields keyed by name
    pub fields: BTreeMap<String, FieldValue>,

    /// Source text the record was parsed from; records decoded from the
    /// same candidate share one allocation
    #[serde(skip)]
    pub raw: Option<Arc<str>>,
}

impl DecodedRecord {
    pub fn new(sequence_id: u64) -> Self {
        Self {
            sequence_id,
            fields: BTreeMap::new(),
            raw: None,
        }
    }

    /// Builds a record from a JSON object; anything else yields `None`
    pub fn from_json(sequence_id: u64, value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                sequence_id,
                fields: map
                    .into_iter()
                    .map(|(key, value)| (key, FieldValue::from_json(value)))
                    .collect(),
                raw: None,
            }),
            _ => None,
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn with_raw(mut self, raw: Arc<str>) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn raw_text(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// True when both records came out of the same candidate
    pub fn shares_source(&self, other: &DecodedRecord) -> bool {
        match (&self.raw, &other.raw) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
