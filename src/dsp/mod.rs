pub mod spectrum;

pub use spectrum::{
    analyze, bin_frequency, bin_width, find_peaks, is_valid_window_size, FrequencyRange, Peak,
    PeakReport, SpectrumAnalyzer, SpectrumBin, SpectrumReport, SpectrumResult, MAX_WINDOW_SIZE,
    TOP_PEAKS,
};
