//! Magnitude spectrum and dominant-peak extraction over one window.

use crate::error::AnalysisError;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

/// Peaks reported per analysis
pub const TOP_PEAKS: usize = 3;

/// Largest accepted window; bounds the per-job allocation
pub const MAX_WINDOW_SIZE: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub bin: usize,
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumResult {
    pub window_size: usize,

    /// Magnitudes of bins `0..=window_size / 2`, DC forced to zero
    pub spectrum: Vec<f64>,

    /// Strict local maxima, largest first
    pub peaks: Vec<Peak>,
}

/// Inclusive frequency band in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub min: f64,
    pub max: f64,
}

impl FrequencyRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `[0, Nyquist]`
    pub fn full(sample_rate: f64) -> Self {
        Self::new(0.0, sample_rate / 2.0)
    }

    pub fn contains(&self, frequency: f64) -> bool {
        frequency >= self.min && frequency <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumBin {
    pub frequency: f64,
    pub magnitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakReport {
    pub bin: usize,
    pub frequency: f64,
    pub magnitude: f64,
}

/// Range-filtered spectrum as delivered to a slot's consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumReport {
    pub slot: String,
    pub channel: String,
    pub window_size: usize,
    pub sample_rate: f64,
    pub bins: Vec<SpectrumBin>,
    pub peaks: Vec<PeakReport>,
}

pub fn is_valid_window_size(window_size: usize) -> bool {
    window_size.is_power_of_two() && window_size <= MAX_WINDOW_SIZE
}

pub fn bin_width(sample_rate: f64, window_size: usize) -> f64 {
    sample_rate / window_size as f64
}

pub fn bin_frequency(bin: usize, sample_rate: f64, window_size: usize) -> f64 {
    bin as f64 * bin_width(sample_rate, window_size)
}

impl SpectrumResult {
    pub fn peak_frequencies(&self, sample_rate: f64) -> Vec<f64> {
        self.peaks
            .iter()
            .map(|p| bin_frequency(p.bin, sample_rate, self.window_size))
            .collect()
    }

    /// Keeps only bins and peaks whose frequency falls inside `range`
    pub fn report(
        &self,
        slot: impl Into<String>,
        channel: impl Into<String>,
        sample_rate: f64,
        range: FrequencyRange,
    ) -> SpectrumReport {
        let bins = self
            .spectrum
            .iter()
            .enumerate()
            .map(|(bin, &magnitude)| SpectrumBin {
                frequency: bin_frequency(bin, sample_rate, self.window_size),
                magnitude,
            })
            .filter(|b| range.contains(b.frequency))
            .collect();

        let peaks = self
            .peaks
            .iter()
            .map(|p| PeakReport {
                bin: p.bin,
                frequency: bin_frequency(p.bin, sample_rate, self.window_size),
                magnitude: p.magnitude,
            })
            .filter(|p| range.contains(p.frequency))
            .collect();

        SpectrumReport {
            slot: slot.into(),
            channel: channel.into(),
            window_size: self.window_size,
            sample_rate,
            bins,
            peaks,
        }
    }
}

/// Reuses FFT plans across windows of the same size
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f64>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    pub fn analyze(
        &mut self,
        signal: &[f64],
        window_size: usize,
    ) -> Result<SpectrumResult, AnalysisError> {
        if !is_valid_window_size(window_size) {
            return Err(AnalysisError::InvalidWindowSize(window_size));
        }

        let mut buffer = window_tail(signal, window_size);
        let fft = self.planner.plan_fft_forward(window_size);
        fft.process(&mut buffer);

        let mut spectrum: Vec<f64> = buffer
            .iter()
            .take(window_size / 2 + 1)
            .map(|c| c.norm())
            .collect();
        if let Some(dc) = spectrum.first_mut() {
            *dc = 0.0;
        }

        let peaks = find_peaks(&spectrum, TOP_PEAKS);
        Ok(SpectrumResult {
            window_size,
            spectrum,
            peaks,
        })
    }
}

/// One-shot analysis with a fresh planner
pub fn analyze(signal: &[f64], window_size: usize) -> Result<SpectrumResult, AnalysisError> {
    SpectrumAnalyzer::new().analyze(signal, window_size)
}

/// Newest `window_size` samples, left-padded with zeros, non-finite values
/// zeroed
fn window_tail(signal: &[f64], window_size: usize) -> Vec<Complex<f64>> {
    let tail = &signal[signal.len().saturating_sub(window_size)..];
    let padding = window_size - tail.len();

    std::iter::repeat(0.0)
        .take(padding)
        .chain(tail.iter().map(|&v| if v.is_finite() { v } else { 0.0 }))
        .map(|v| Complex::new(v, 0.0))
        .collect()
}

/// Bins strictly above both neighbours, largest first
pub fn find_peaks(spectrum: &[f64], limit: usize) -> Vec<Peak> {
    let mut peaks: Vec<Peak> = spectrum
        .windows(3)
        .enumerate()
        .filter(|(_, w)| w[1] > w[0] && w[1] > w[2])
        .map(|(i, w)| Peak {
            bin: i + 1,
            magnitude: w[1],
        })
        .collect();

    peaks.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
    peaks.truncate(limit);
    peaks
}
