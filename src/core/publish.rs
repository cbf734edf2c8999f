use super::DecodedRecord;
use crate::dsp::SpectrumReport;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use tokio::sync::mpsc;

/// Everything the core hands to downstream consumers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Publication {
    /// Candidate text exactly as it was parsed, for raw console views
    RawFrame { sequence_id: u64, text: String },
    Record(DecodedRecord),
    Spectrum(SpectrumReport),
    AnalysisFailed { slot: String, message: String },
}

/// Downstream delivery seam (socket fan-out, UI bridge, test capture)
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, item: Publication) -> Result<()>;
}

/// Forwards publications into a tokio channel
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<Publication>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Publication>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(&self, item: Publication) -> Result<()> {
        self.tx
            .send(item)
            .map_err(|_| anyhow!("Publication receiver dropped"))
    }
}

/// Writes one JSON document per line
pub struct JsonLinesPublisher<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: Write + Send> Publisher for JsonLinesPublisher<W> {
    async fn publish(&self, item: Publication) -> Result<()> {
        let line = serde_json::to_string(&item).context("Failed to serialize publication")?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line).context("Failed to write publication")?;
        writer.flush().context("Failed to flush publication")?;
        Ok(())
    }
}
