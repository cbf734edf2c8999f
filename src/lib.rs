pub mod buffers;
pub mod config;
pub mod core;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod framing;
pub mod observability;
pub mod transport;

pub use config::{AnalysisSlotConfig, StreamConfig};
pub use engine::{SessionStatus, StreamSession};
pub use error::AnalysisError;
