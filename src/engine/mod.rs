pub mod scheduler;
pub mod session;
pub mod state;

pub use scheduler::{
    AnalysisExecutor, AnalysisJob, AnalysisRequest, AnalysisScheduler, AnalysisSlot, SlotOutcome,
    SpectralExecutor, Submission,
};
pub use session::{SessionStatus, StreamSession};
pub use state::SlotState;
