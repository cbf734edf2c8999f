use super::state::SlotState;
use crate::config::DEFAULT_SAMPLE_RATE_HZ;
use crate::dsp::{is_valid_window_size, FrequencyRange, SpectrumAnalyzer, SpectrumResult};
use crate::error::AnalysisError;
use crate::observability::SessionMetrics;
use anyhow::{anyhow, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

/// What a caller asks a slot to analyse
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub signal: Vec<f64>,
    pub window_size: usize,
    pub sample_rate: f64,

    /// Defaults to `[0, sample_rate / 2]`
    pub range: Option<FrequencyRange>,
}

impl AnalysisRequest {
    pub fn new(signal: Vec<f64>, window_size: usize) -> Self {
        Self {
            signal,
            window_size,
            sample_rate: DEFAULT_SAMPLE_RATE_HZ,
            range: None,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_range(mut self, range: FrequencyRange) -> Self {
        self.range = Some(range);
        self
    }
}

/// One accepted spectral analysis job
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisJob {
    pub id: u64,
    pub signal: Vec<f64>,
    pub window_size: usize,

    /// Labels the bins of the published report
    pub sample_rate: f64,
    pub range: FrequencyRange,
}

/// What a submit did to the slot
#[derive(Debug, PartialEq)]
pub enum Submission {
    /// Slot was idle; run this job now
    Dispatch(AnalysisJob),
    /// Parked behind the running job
    Pending,
    /// Parked, replacing a job that will now never run
    Coalesced(AnalysisJob),
}

/// Single-slot coalescing state machine: at most one job in flight and one
/// pending, the newest submission always wins the pending place
#[derive(Debug, Default)]
pub struct AnalysisSlot {
    state: SlotState,
    pending: Option<AnalysisJob>,
}

impl AnalysisSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn pending(&self) -> Option<&AnalysisJob> {
        self.pending.as_ref()
    }

    fn transition(&mut self, next: SlotState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "invalid slot transition {} -> {}",
            self.state.name(),
            next.name()
        );
        self.state = next;
    }

    pub fn submit(&mut self, job: AnalysisJob) -> Submission {
        match self.state {
            SlotState::Idle => {
                self.transition(SlotState::Busy);
                Submission::Dispatch(job)
            }
            SlotState::Busy | SlotState::BusyPending => {
                self.transition(SlotState::BusyPending);
                match self.pending.replace(job) {
                    Some(superseded) => Submission::Coalesced(superseded),
                    None => Submission::Pending,
                }
            }
        }
    }

    /// Running job delivered a result; returns the job to dispatch next
    pub fn complete(&mut self) -> Option<AnalysisJob> {
        self.release()
    }

    /// Running job failed; the pending job still gets its turn
    pub fn fail(&mut self) -> Option<AnalysisJob> {
        self.release()
    }

    /// Drops the pending job without running it
    pub fn discard_pending(&mut self) -> Option<AnalysisJob> {
        let discarded = self.pending.take();
        if discarded.is_some() {
            self.transition(SlotState::Busy);
        }
        discarded
    }

    fn release(&mut self) -> Option<AnalysisJob> {
        match self.state {
            SlotState::Idle => {
                warn!("Analysis slot released while idle");
                None
            }
            SlotState::Busy => {
                self.transition(SlotState::Idle);
                None
            }
            SlotState::BusyPending => {
                self.transition(SlotState::Busy);
                self.pending.take()
            }
        }
    }
}

/// Runs one analysis job; invoked on the blocking pool
pub trait AnalysisExecutor: Send + Sync + 'static {
    fn execute(&self, job: &AnalysisJob) -> Result<SpectrumResult, AnalysisError>;
}

/// Default executor: magnitude spectrum and top peaks.
///
/// Holds its own FFT planner; give every slot its own instance.
#[derive(Default)]
pub struct SpectralExecutor {
    analyzer: Mutex<SpectrumAnalyzer>,
}

impl SpectralExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnalysisExecutor for SpectralExecutor {
    fn execute(&self, job: &AnalysisJob) -> Result<SpectrumResult, AnalysisError> {
        self.analyzer.lock().analyze(&job.signal, job.window_size)
    }
}

/// Result of one dispatched job, delivered to the slot's owner
#[derive(Debug, Clone, PartialEq)]
pub struct SlotOutcome {
    pub slot: String,
    pub job_id: u64,
    pub sample_rate: f64,
    pub range: FrequencyRange,
    pub result: Result<SpectrumResult, AnalysisError>,
}

enum SlotCommand {
    Submit(AnalysisJob),
    Shutdown,
}

struct InFlight {
    job_id: u64,
    sample_rate: f64,
    range: FrequencyRange,
    started: Instant,
    handle: JoinHandle<Result<SpectrumResult, AnalysisError>>,
}

/// Async driver around an [`AnalysisSlot`].
///
/// Submissions travel over an unbounded channel, so the ingestion side never
/// waits on a computation. Jobs run on the blocking pool and are never
/// aborted once dispatched.
pub struct AnalysisScheduler {
    slot_id: String,
    tx: mpsc::UnboundedSender<SlotCommand>,
    handle: Option<JoinHandle<()>>,
    next_job_id: AtomicU64,
    metrics: Arc<SessionMetrics>,
}

impl AnalysisScheduler {
    pub fn spawn(
        slot_id: impl Into<String>,
        executor: Arc<dyn AnalysisExecutor>,
        metrics: Arc<SessionMetrics>,
    ) -> (Self, mpsc::UnboundedReceiver<SlotOutcome>) {
        let slot_id = slot_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(run_slot(
            slot_id.clone(),
            rx,
            executor,
            outcome_tx,
            metrics.clone(),
        ));

        let scheduler = Self {
            slot_id,
            tx,
            handle: Some(handle),
            next_job_id: AtomicU64::new(0),
            metrics,
        };
        (scheduler, outcome_rx)
    }

    pub fn slot_id(&self) -> &str {
        &self.slot_id
    }

    /// Validates and enqueues a job; returns its id.
    ///
    /// Invalid window sizes are rejected here, before anything is queued.
    pub fn submit(&self, request: AnalysisRequest) -> Result<u64, AnalysisError> {
        if !is_valid_window_size(request.window_size) {
            self.metrics.record_rejected();
            return Err(AnalysisError::InvalidWindowSize(request.window_size));
        }

        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let range = request
            .range
            .unwrap_or_else(|| FrequencyRange::full(request.sample_rate));
        let job = AnalysisJob {
            id,
            signal: request.signal,
            window_size: request.window_size,
            sample_rate: request.sample_rate,
            range,
        };
        self.tx
            .send(SlotCommand::Submit(job))
            .map_err(|_| AnalysisError::SlotClosed(self.slot_id.clone()))?;
        Ok(id)
    }

    /// Lets the running job finish, drops any pending job and waits for the
    /// slot task to end
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.tx.send(SlotCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| anyhow!("Analysis slot '{}' task failed: {}", self.slot_id, e))?;
        }
        Ok(())
    }
}

async fn run_slot(
    slot_id: String,
    mut commands: mpsc::UnboundedReceiver<SlotCommand>,
    executor: Arc<dyn AnalysisExecutor>,
    outcomes: mpsc::UnboundedSender<SlotOutcome>,
    metrics: Arc<SessionMetrics>,
) {
    let mut slot = AnalysisSlot::new();
    let mut in_flight: Option<InFlight> = None;
    let mut accepting = true;

    loop {
        if !accepting && in_flight.is_none() {
            break;
        }

        tokio::select! {
            command = commands.recv(), if accepting => match command {
                Some(SlotCommand::Submit(job)) => match slot.submit(job) {
                    Submission::Dispatch(job) => {
                        in_flight = Some(dispatch(job, &executor, &metrics));
                    }
                    Submission::Pending => {}
                    Submission::Coalesced(superseded) => {
                        debug!("[{}] job {} superseded before start", slot_id, superseded.id);
                        metrics.record_coalesced();
                    }
                },
                Some(SlotCommand::Shutdown) | None => {
                    accepting = false;
                    if let Some(dropped) = slot.discard_pending() {
                        debug!("[{}] dropping pending job {} on shutdown", slot_id, dropped.id);
                    }
                }
            },
            finished = join_in_flight(&mut in_flight) => {
                in_flight = None;
                metrics.finish_analysis(finished.started);

                let job_id = finished.job_id;
                let result = flatten_join(finished.joined);
                let next = match &result {
                    Ok(_) => {
                        metrics.record_completed();
                        slot.complete()
                    }
                    Err(e) => {
                        warn!("[{}] analysis job {} failed: {}", slot_id, job_id, e);
                        metrics.record_failed();
                        slot.fail()
                    }
                };

                let outcome = SlotOutcome {
                    slot: slot_id.clone(),
                    job_id,
                    sample_rate: finished.sample_rate,
                    range: finished.range,
                    result,
                };
                if outcomes.send(outcome).is_err() {
                    debug!("[{}] outcome receiver dropped", slot_id);
                }

                if let Some(job) = next {
                    in_flight = Some(dispatch(job, &executor, &metrics));
                }
            }
        }
    }

    debug!("[{}] analysis slot stopped", slot_id);
}

fn dispatch(
    job: AnalysisJob,
    executor: &Arc<dyn AnalysisExecutor>,
    metrics: &SessionMetrics,
) -> InFlight {
    metrics.record_dispatched();
    let executor = executor.clone();
    let job_id = job.id;
    let sample_rate = job.sample_rate;
    let range = job.range;
    let started = metrics.start_analysis();
    let handle = tokio::task::spawn_blocking(move || executor.execute(&job));
    InFlight {
        job_id,
        sample_rate,
        range,
        started,
        handle,
    }
}

struct Finished {
    job_id: u64,
    sample_rate: f64,
    range: FrequencyRange,
    started: Instant,
    joined: Result<Result<SpectrumResult, AnalysisError>, JoinError>,
}

async fn join_in_flight(in_flight: &mut Option<InFlight>) -> Finished {
    match in_flight {
        Some(job) => {
            let joined = (&mut job.handle).await;
            Finished {
                job_id: job.job_id,
                sample_rate: job.sample_rate,
                range: job.range,
                started: job.started,
                joined,
            }
        }
        None => std::future::pending().await,
    }
}

fn flatten_join(
    joined: Result<Result<SpectrumResult, AnalysisError>, JoinError>,
) -> Result<SpectrumResult, AnalysisError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(AnalysisError::Computation(
            "analysis executor panicked".to_string(),
        )),
        Err(e) => Err(AnalysisError::Computation(e.to_string())),
    }
}
