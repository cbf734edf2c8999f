use super::scheduler::{
    AnalysisExecutor, AnalysisRequest, AnalysisScheduler, SlotOutcome, SpectralExecutor,
};
use crate::buffers::SampleStreamBuffer;
use crate::config::{AnalysisSlotConfig, SlotSettings, StreamConfig};
use crate::core::{DecodedRecord, Publication, Publisher};
use crate::error::AnalysisError;
use crate::framing::{Framer, RecordDecoder};
use crate::observability::SessionMetrics;
use crate::transport::ChunkSource;
use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Session status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Running,
    Stopped,
}

struct SlotHandle {
    /// Replaced by `update_slot`; the forwarder reads it for labels
    settings: Arc<RwLock<SlotSettings>>,
    scheduler: AnalysisScheduler,
    forwarder: JoinHandle<()>,
}

/// One transport connection: frame extraction, sample history and the
/// analysis slots reading from it
pub struct StreamSession {
    config: StreamConfig,
    framer: Framer,
    buffer: Arc<SampleStreamBuffer>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<SessionMetrics>,
    slots: HashMap<String, SlotHandle>,
    status: SessionStatus,
    paused: bool,
    seen_overflows: u64,
}

impl StreamSession {
    pub fn new(config: StreamConfig, publisher: Arc<dyn Publisher>) -> Result<Self> {
        config.validate()?;

        let buffer = Arc::new(SampleStreamBuffer::new(
            config.channel_capacity,
            config.scalar_policy,
        ));

        Ok(Self {
            framer: Framer::new(&config.framing),
            buffer,
            publisher,
            metrics: Arc::new(SessionMetrics::new()),
            slots: HashMap::new(),
            status: SessionStatus::Idle,
            paused: false,
            seen_overflows: 0,
            config,
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Shared read access for downstream consumers
    pub fn buffer(&self) -> Arc<SampleStreamBuffer> {
        self.buffer.clone()
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        self.metrics.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.framer.pending_len()
    }

    pub fn slot_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// While paused, records are still decoded and published but not
    /// ingested or analysed
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Spawns the configured analysis slots
    pub async fn start(&mut self) -> Result<()> {
        if self.status == SessionStatus::Running {
            return Err(anyhow!("Session is already running"));
        }

        for slot in self.config.slots.clone() {
            self.add_slot(slot)?;
        }

        self.status = SessionStatus::Running;
        info!("Stream session started with {} analysis slot(s)", self.slots.len());
        Ok(())
    }

    /// Registers and spawns one analysis slot with its own spectral executor
    pub fn add_slot(&mut self, slot: AnalysisSlotConfig) -> Result<()> {
        self.add_slot_with_executor(slot, Arc::new(SpectralExecutor::new()))
    }

    /// Registers a slot whose jobs run on `executor`
    pub fn add_slot_with_executor(
        &mut self,
        slot: AnalysisSlotConfig,
        executor: Arc<dyn AnalysisExecutor>,
    ) -> Result<()> {
        if self.slots.contains_key(&slot.id) {
            bail!("Analysis slot '{}' already exists", slot.id);
        }
        let settings = self.config.resolve_slot(&slot)?;
        debug!(
            "Slot '{}' bound to channel '{}'[{}], window {}",
            settings.id, settings.channel, settings.index, settings.window_size
        );

        let (scheduler, outcomes) =
            AnalysisScheduler::spawn(&settings.id, executor, self.metrics.clone());
        let id = settings.id.clone();
        let settings = Arc::new(RwLock::new(settings));
        let forwarder = tokio::spawn(forward_outcomes(
            settings.clone(),
            outcomes,
            self.publisher.clone(),
        ));

        self.slots.insert(
            id,
            SlotHandle {
                settings,
                scheduler,
                forwarder,
            },
        );
        Ok(())
    }

    /// Replaces a slot's channel binding, window, rate and range.
    ///
    /// A job already queued keeps the settings it was submitted with.
    pub fn update_slot(&mut self, slot: AnalysisSlotConfig) -> Result<()> {
        let Some(handle) = self.slots.get(&slot.id) else {
            bail!("Analysis slot '{}' does not exist", slot.id);
        };
        let settings = self.config.resolve_slot(&slot)?;
        debug!(
            "Slot '{}' rebound to channel '{}'[{}], window {}, {} Hz",
            settings.id,
            settings.channel,
            settings.index,
            settings.window_size,
            settings.sample_rate
        );
        *handle.settings.write() = settings;
        Ok(())
    }

    /// Stops one slot: its running job finishes and publishes, a pending
    /// job is dropped
    pub async fn remove_slot(&mut self, slot_id: &str) -> Result<()> {
        let Some(slot) = self.slots.remove(slot_id) else {
            bail!("Analysis slot '{}' does not exist", slot_id);
        };
        slot.scheduler.shutdown().await?;
        slot.forwarder
            .await
            .map_err(|e| anyhow!("Slot '{}' forwarder failed: {}", slot_id, e))?;
        debug!("Slot '{}' removed", slot_id);
        Ok(())
    }

    /// Snapshots the slot's channel and submits it for analysis
    pub fn request_analysis(&self, slot_id: &str) -> Result<u64, AnalysisError> {
        let slot = self
            .slots
            .get(slot_id)
            .ok_or_else(|| AnalysisError::UnknownSlot(slot_id.to_string()))?;
        let settings = slot.settings.read().clone();

        let signal =
            self.buffer
                .recent_signal(&settings.channel, settings.index, settings.window_size);
        let request = AnalysisRequest::new(signal, settings.window_size)
            .with_sample_rate(settings.sample_rate)
            .with_range(settings.range);
        slot.scheduler.submit(request)
    }

    /// Decodes one raw chunk, ingests and publishes every completed record.
    /// Returns the number of records decoded.
    pub async fn feed(&mut self, chunk: &[u8]) -> Result<usize> {
        let records: Vec<_> = self.framer.feed_bytes(chunk).collect();
        self.track_overflows();

        let interval = self.config.sample_interval_ms();
        let mut touched = BTreeSet::new();

        for record in &records {
            self.metrics.record_decoded();
            if !self.paused {
                let appended = self.buffer.ingest(record, interval);
                self.metrics.record_samples(appended);
                touched.extend(record.fields.keys().cloned());
            }
        }

        let mut previous: Option<&DecodedRecord> = None;
        for record in &records {
            if self.config.publish_raw_frames {
                self.publish_raw_frame(record, previous).await;
            }
            previous = Some(record);

            if let Err(e) = self.publisher.publish(Publication::Record(record.clone())).await {
                warn!("Failed to publish record: {}", e);
            }
        }

        if self.config.analyze_on_ingest && !touched.is_empty() {
            self.submit_touched(&touched);
        }

        Ok(records.len())
    }

    pub async fn feed_str(&mut self, text: &str) -> Result<usize> {
        self.feed(text.as_bytes()).await
    }

    /// Publishes the candidate text once, ahead of the first record it
    /// produced
    async fn publish_raw_frame(&self, record: &DecodedRecord, previous: Option<&DecodedRecord>) {
        let Some(text) = record.raw_text() else {
            return;
        };
        if previous.is_some_and(|p| p.shares_source(record)) {
            return;
        }

        let frame = Publication::RawFrame {
            sequence_id: record.sequence_id,
            text: text.to_string(),
        };
        if let Err(e) = self.publisher.publish(frame).await {
            warn!("Failed to publish raw frame: {}", e);
        }
    }

    fn submit_touched(&self, touched: &BTreeSet<String>) {
        for (id, slot) in &self.slots {
            if !touched.contains(&slot.settings.read().channel) {
                continue;
            }
            if let Err(e) = self.request_analysis(id) {
                warn!("Slot '{}' rejected analysis: {}", id, e);
            }
        }
    }

    fn track_overflows(&mut self) {
        let overflows = self.framer.overflow_count();
        if overflows > self.seen_overflows {
            self.metrics
                .record_framing_resets(overflows - self.seen_overflows);
            self.seen_overflows = overflows;
        }
    }

    /// Drives `source` until it is exhausted
    pub async fn run<S: ChunkSource + ?Sized>(&mut self, source: &mut S) -> Result<()> {
        while let Some(chunk) = source.next_chunk().await? {
            self.feed(&chunk).await?;
        }
        debug!("Transport exhausted, {} bytes left pending", self.pending_len());
        Ok(())
    }

    /// Drops the frame buffer and all channel history
    pub fn clear(&mut self) {
        self.framer.reset();
        self.buffer.clear();
    }

    /// Lets in-flight analyses finish and publish, then stops every slot
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.status == SessionStatus::Stopped {
            return Ok(());
        }

        for (id, slot) in self.slots.drain() {
            slot.scheduler.shutdown().await?;
            slot.forwarder
                .await
                .map_err(|e| anyhow!("Slot '{}' forwarder failed: {}", id, e))?;
        }

        self.status = SessionStatus::Stopped;
        info!("Stream session stopped");
        Ok(())
    }
}

/// Turns slot outcomes into publications for the slot's consumer.
///
/// Bins are labelled with the rate and range the job was submitted with.
async fn forward_outcomes(
    settings: Arc<RwLock<SlotSettings>>,
    mut outcomes: mpsc::UnboundedReceiver<SlotOutcome>,
    publisher: Arc<dyn Publisher>,
) {
    while let Some(outcome) = outcomes.recv().await {
        let publication = match outcome.result {
            Ok(result) => {
                let channel = settings.read().channel.clone();
                Publication::Spectrum(result.report(
                    &outcome.slot,
                    &channel,
                    outcome.sample_rate,
                    outcome.range,
                ))
            }
            Err(e) => Publication::AnalysisFailed {
                slot: outcome.slot.clone(),
                message: e.to_string(),
            },
        };

        if let Err(e) = publisher.publish(publication).await {
            warn!("[{}] failed to publish analysis: {}", outcome.slot, e);
        }
    }
}
