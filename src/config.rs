use crate::buffers::{ScalarPolicy, DEFAULT_CHANNEL_CAPACITY};
use crate::dsp::{is_valid_window_size, FrequencyRange, MAX_WINDOW_SIZE};
use crate::framing::FramingConfig;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Must match the firmware's sampling rate
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 50_000.0;
pub const DEFAULT_WINDOW_SIZE: usize = 1024;

/// One analysis slot bound to a channel (a dashboard FFT tile)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSlotConfig {
    pub id: String,
    pub channel: String,

    /// Vector element analysed when the channel carries vectors
    #[serde(default)]
    pub index: usize,

    #[serde(default)]
    pub window_size: Option<usize>,

    /// Rate used to label bins; falls back to the stream rate
    #[serde(default)]
    pub sample_rate: Option<f64>,

    #[serde(default)]
    pub range: Option<FrequencyRange>,
}

impl AnalysisSlotConfig {
    pub fn new(id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel: channel.into(),
            index: 0,
            window_size: None,
            sample_rate: None,
            range: None,
        }
    }
}

/// Slot configuration with every default filled in
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSettings {
    pub id: String,
    pub channel: String,
    pub index: usize,
    pub window_size: usize,
    pub sample_rate: f64,
    pub range: FrequencyRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub sample_rate_hz: f64,
    pub channel_capacity: usize,
    pub default_window_size: usize,

    /// Defaults to `[0, sample_rate_hz / 2]`
    pub default_frequency_range: Option<FrequencyRange>,
    pub framing: FramingConfig,
    pub scalar_policy: ScalarPolicy,

    /// Submit every slot whose channel a chunk touched
    pub analyze_on_ingest: bool,

    /// Publish each parsed candidate's text ahead of its records
    pub publish_raw_frames: bool,
    pub slots: Vec<AnalysisSlotConfig>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            default_window_size: DEFAULT_WINDOW_SIZE,
            default_frequency_range: None,
            framing: FramingConfig::default(),
            scalar_policy: ScalarPolicy::default(),
            analyze_on_ingest: true,
            publish_raw_frames: false,
            slots: Vec::new(),
        }
    }
}

impl StreamConfig {
    pub fn from_json(config: Value) -> Result<Self> {
        let config: Self =
            serde_json::from_value(config).context("Failed to parse stream config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .context(format!("Failed to read config from {:?}", path))?;
        let value: Value = serde_json::from_str(&json)
            .context(format!("Failed to parse config at {:?}", path))?;
        Self::from_json(value)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz <= 0.0 {
            bail!("sample_rate_hz must be positive, got {}", self.sample_rate_hz);
        }
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be at least 1");
        }
        if !is_valid_window_size(self.default_window_size) {
            bail!(
                "default_window_size must be a power of two up to {}, got {}",
                MAX_WINDOW_SIZE,
                self.default_window_size
            );
        }
        if self.framing.max_pending_bytes == 0 {
            bail!("framing.max_pending_bytes must be at least 1");
        }
        for slot in &self.slots {
            self.resolve_slot(slot)?;
        }
        Ok(())
    }

    /// Milliseconds between consecutive samples
    pub fn sample_interval_ms(&self) -> f64 {
        1000.0 / self.sample_rate_hz
    }

    pub fn frequency_range(&self) -> FrequencyRange {
        self.default_frequency_range
            .unwrap_or_else(|| FrequencyRange::full(self.sample_rate_hz))
    }

    pub fn resolve_slot(&self, slot: &AnalysisSlotConfig) -> Result<SlotSettings> {
        let window_size = slot.window_size.unwrap_or(self.default_window_size);
        if !is_valid_window_size(window_size) {
            return Err(anyhow!(
                "Slot '{}': window size {} is not a power of two up to {}",
                slot.id,
                window_size,
                MAX_WINDOW_SIZE
            ));
        }

        let sample_rate = slot.sample_rate.unwrap_or(self.sample_rate_hz);
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            bail!("Slot '{}': sample rate must be positive", slot.id);
        }

        let range = slot
            .range
            .or(self.default_frequency_range)
            .unwrap_or_else(|| FrequencyRange::full(sample_rate));

        Ok(SlotSettings {
            id: slot.id.clone(),
            channel: slot.channel.clone(),
            index: slot.index,
            window_size,
            sample_rate,
            range,
        })
    }
}
