use crate::dsp::MAX_WINDOW_SIZE;
use thiserror::Error;

/// Failures visible to whoever requested a spectral analysis
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("window size {0} is not a power of two in 1..={max}", max = MAX_WINDOW_SIZE)]
    InvalidWindowSize(usize),

    #[error("spectral computation failed: {0}")]
    Computation(String),

    #[error("analysis slot '{0}' is not accepting jobs")]
    SlotClosed(String),

    #[error("unknown analysis slot '{0}'")]
    UnknownSlot(String),
}
