use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use streamscope::config::AnalysisSlotConfig;
use streamscope::core::{ChannelPublisher, FieldValue, JsonLinesPublisher, Publication};
use streamscope::dsp::{FrequencyRange, SpectrumResult};
use streamscope::engine::{AnalysisExecutor, AnalysisJob};
use streamscope::transport::ScriptedSource;
use streamscope::{AnalysisError, SessionStatus, StreamConfig, StreamSession};
use tempfile::tempdir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

/// Holds every job until the test opens the gate once for it
struct GatedExecutor {
    started: Sender<u64>,
    gate: Receiver<()>,
}

impl AnalysisExecutor for GatedExecutor {
    fn execute(&self, job: &AnalysisJob) -> Result<SpectrumResult, AnalysisError> {
        let _ = self.started.send(job.id);
        let _ = self.gate.recv();
        Ok(SpectrumResult {
            window_size: job.window_size,
            spectrum: vec![0.0; job.window_size / 2 + 1],
            peaks: vec![],
        })
    }
}

fn spectrum_config() -> StreamConfig {
    StreamConfig::from_json(json!({
        "sample_rate_hz": 1000.0,
        "slots": [{"id": "fft-ch", "channel": "ch", "window_size": 8}]
    }))
    .unwrap()
}

fn drain(rx: &mut UnboundedReceiver<Publication>) -> Vec<Publication> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

async fn next_spectrum(rx: &mut UnboundedReceiver<Publication>) -> Publication {
    timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(p @ Publication::Spectrum(_)) => return p,
                Some(_) => continue,
                None => panic!("publisher closed before a spectrum arrived"),
            }
        }
    })
    .await
    .expect("no spectrum published in time")
}

#[tokio::test]
async fn test_records_are_ingested_and_published() {
    let (publisher, mut rx) = ChannelPublisher::new();
    let mut session = StreamSession::new(StreamConfig::default(), Arc::new(publisher)).unwrap();
    session.start().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Running);

    let count = session
        .feed_str("boot\r\n10:00:00.100 -> {\"ch\":[1,2,3],\"sp\":4}\r\n{\"ch\":[")
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(session.pending_len(), "\r\n{\"ch\":[".len());

    let published = drain(&mut rx);
    assert_eq!(published.len(), 1);
    match &published[0] {
        Publication::Record(record) => {
            assert_eq!(record.get("sp"), Some(&FieldValue::Scalar(4.0)));
        }
        other => panic!("unexpected publication {:?}", other),
    }

    let buffer = session.buffer();
    assert_eq!(buffer.signal("ch", 0), vec![1.0, 2.0, 3.0]);
    assert_eq!(session.metrics().records_decoded(), 1);
    assert_eq!(session.metrics().samples_ingested(), 3);

    session.shutdown().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Stopped);
}

#[tokio::test]
async fn test_ingest_triggers_spectrum() {
    let (publisher, mut rx) = ChannelPublisher::new();
    let mut session = StreamSession::new(spectrum_config(), Arc::new(publisher)).unwrap();
    session.start().await.unwrap();
    assert_eq!(session.slot_ids(), vec!["fft-ch".to_string()]);

    // 250 Hz at 1 kHz: one cycle every 4 samples, bin 2 of 8
    session.feed_str("{\"ch\":[0,1,0,-1,0,1,0,-1]}").await.unwrap();

    match next_spectrum(&mut rx).await {
        Publication::Spectrum(report) => {
            assert_eq!(report.slot, "fft-ch");
            assert_eq!(report.channel, "ch");
            assert_eq!(report.window_size, 8);
            assert_eq!(report.bins.len(), 5);
            assert_eq!(report.peaks[0].bin, 2);
            assert_eq!(report.peaks[0].frequency, 250.0);
        }
        _ => unreachable!(),
    }

    session.shutdown().await.unwrap();
    assert!(session.metrics().analyses_completed() >= 1);
}

#[tokio::test]
async fn test_pause_publishes_without_ingesting() {
    let (publisher, mut rx) = ChannelPublisher::new();
    let mut session = StreamSession::new(spectrum_config(), Arc::new(publisher)).unwrap();
    session.start().await.unwrap();

    session.set_paused(true);
    assert!(session.is_paused());
    session.feed_str("{\"ch\":[1,2,3,4]}").await.unwrap();
    session.shutdown().await.unwrap();

    let published = drain(&mut rx);
    assert_eq!(published.len(), 1);
    assert!(matches!(published[0], Publication::Record(_)));
    assert!(session.buffer().signal("ch", 0).is_empty());
    assert_eq!(session.metrics().analyses_dispatched(), 0);
}

#[tokio::test]
async fn test_request_analysis_unknown_slot() {
    let (publisher, _rx) = ChannelPublisher::new();
    let mut session = StreamSession::new(spectrum_config(), Arc::new(publisher)).unwrap();
    session.start().await.unwrap();

    assert_eq!(
        session.request_analysis("nope"),
        Err(AnalysisError::UnknownSlot("nope".to_string()))
    );
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_manual_analysis_on_empty_channel() {
    let (publisher, mut rx) = ChannelPublisher::new();
    let config = StreamConfig {
        analyze_on_ingest: false,
        ..spectrum_config()
    };
    let mut session = StreamSession::new(config, Arc::new(publisher)).unwrap();
    session.start().await.unwrap();

    session.request_analysis("fft-ch").unwrap();
    match next_spectrum(&mut rx).await {
        Publication::Spectrum(report) => {
            assert!(report.bins.iter().all(|b| b.magnitude == 0.0));
            assert!(report.peaks.is_empty());
        }
        _ => unreachable!(),
    }
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_slot_rejected() {
    let (publisher, _rx) = ChannelPublisher::new();
    let mut session = StreamSession::new(spectrum_config(), Arc::new(publisher)).unwrap();
    session.start().await.unwrap();

    assert!(session.add_slot(AnalysisSlotConfig::new("fft-ch", "other")).is_err());
    assert!(session.add_slot(AnalysisSlotConfig::new("fft-other", "other")).is_ok());
    assert_eq!(session.slot_ids().len(), 2);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_framing_resets_are_counted() {
    let (publisher, _rx) = ChannelPublisher::new();
    let config = StreamConfig::from_json(json!({
        "framing": {"max_pending_bytes": 32}
    }))
    .unwrap();
    let mut session = StreamSession::new(config, Arc::new(publisher)).unwrap();
    session.start().await.unwrap();

    let garbage = format!("{{\"ch\":[{}", "1,".repeat(40));
    assert_eq!(session.feed_str(&garbage).await.unwrap(), 0);
    assert_eq!(session.metrics().framing_resets(), 1);
    assert_eq!(session.pending_len(), 0);

    assert_eq!(session.feed_str("{\"ch\":[5]}").await.unwrap(), 1);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_run_drains_scripted_source() {
    let (publisher, mut rx) = ChannelPublisher::new();
    let config = StreamConfig {
        analyze_on_ingest: false,
        ..StreamConfig::default()
    };
    let mut session = StreamSession::new(config, Arc::new(publisher)).unwrap();
    session.start().await.unwrap();

    let text = "{\"ch\":[1,2]}\n{\"ch\":[3]}\n{\"ch\":[4,5,6]}\n";
    let mut source = ScriptedSource::split_every(text, 3);
    session.run(&mut source).await.unwrap();
    session.shutdown().await.unwrap();

    assert_eq!(source.remaining(), 0);
    assert_eq!(drain(&mut rx).len(), 3);
    assert_eq!(
        session.buffer().signal("ch", 0),
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
    );
}

#[tokio::test]
async fn test_json_lines_output() {
    let publisher = Arc::new(JsonLinesPublisher::new(Vec::new()));
    let mut session = StreamSession::new(StreamConfig::default(), publisher.clone()).unwrap();
    session.start().await.unwrap();
    session.feed_str("{\"ch\":[1]}{\"ch\":[2]}").await.unwrap();
    session.shutdown().await.unwrap();
    drop(session);

    let publisher = Arc::try_unwrap(publisher).ok().unwrap();
    let output = String::from_utf8(publisher.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = output
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["kind"], "record");
    assert_eq!(lines[1]["sequence_id"], 1);
    assert_eq!(lines[1]["fields"]["ch"], json!([2.0]));
}

#[tokio::test]
async fn test_session_from_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.json");
    let config = json!({
        "sample_rate_hz": 2000.0,
        "framing": {"scan": "balanced"},
        "slots": [
            {"id": "a", "channel": "imu", "index": 1, "window_size": 16},
            {"id": "b", "channel": "ch"}
        ]
    });
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let config = StreamConfig::load(&path).unwrap();
    assert_eq!(config.sample_interval_ms(), 0.5);

    let (publisher, _rx) = ChannelPublisher::new();
    let mut session = StreamSession::new(config, Arc::new(publisher)).unwrap();
    session.start().await.unwrap();
    assert_eq!(session.slot_ids(), vec!["a".to_string(), "b".to_string()]);
    assert!(session.start().await.is_err());
    session.shutdown().await.unwrap();
}

#[test]
fn test_invalid_config_rejected() {
    let (publisher, _rx) = ChannelPublisher::new();
    let config = StreamConfig {
        sample_rate_hz: 0.0,
        ..StreamConfig::default()
    };
    assert!(StreamSession::new(config, Arc::new(publisher)).is_err());
}

#[tokio::test]
async fn test_update_slot_applies_to_next_analysis() {
    let (publisher, mut rx) = ChannelPublisher::new();
    let config = StreamConfig {
        analyze_on_ingest: false,
        ..spectrum_config()
    };
    let mut session = StreamSession::new(config, Arc::new(publisher)).unwrap();
    session.start().await.unwrap();
    session.feed_str("{\"ch\":[0,1,0,-1,0,1,0,-1]}").await.unwrap();

    let mut slot = AnalysisSlotConfig::new("fft-ch", "ch");
    slot.window_size = Some(4);
    slot.sample_rate = Some(2000.0);
    slot.range = Some(FrequencyRange::new(100.0, 1000.0));
    session.update_slot(slot).unwrap();

    session.request_analysis("fft-ch").unwrap();
    match next_spectrum(&mut rx).await {
        Publication::Spectrum(report) => {
            assert_eq!(report.window_size, 4);
            assert_eq!(report.sample_rate, 2000.0);
            // bins at 0, 500 and 1000 Hz; the DC bin falls outside the range
            assert_eq!(report.bins.len(), 2);
            assert_eq!(report.bins[0].frequency, 500.0);
            assert_eq!(report.peaks[0].bin, 1);
            assert_eq!(report.peaks[0].frequency, 500.0);
        }
        _ => unreachable!(),
    }

    let mut bad = AnalysisSlotConfig::new("fft-ch", "ch");
    bad.window_size = Some(6);
    assert!(session.update_slot(bad).is_err());
    assert!(session
        .update_slot(AnalysisSlotConfig::new("missing", "ch"))
        .is_err());

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remove_slot_stops_its_analyses() {
    let (publisher, _rx) = ChannelPublisher::new();
    let mut session = StreamSession::new(spectrum_config(), Arc::new(publisher)).unwrap();
    session.start().await.unwrap();

    session.remove_slot("fft-ch").await.unwrap();
    assert!(session.slot_ids().is_empty());
    assert_eq!(
        session.request_analysis("fft-ch"),
        Err(AnalysisError::UnknownSlot("fft-ch".to_string()))
    );
    assert!(session.remove_slot("fft-ch").await.is_err());

    // Ingest keeps working with no slot bound to the channel
    assert_eq!(session.feed_str("{\"ch\":[1,2]}").await.unwrap(), 1);
    assert_eq!(session.metrics().analyses_dispatched(), 0);

    session.add_slot(AnalysisSlotConfig::new("fft-ch", "ch")).unwrap();
    assert_eq!(session.slot_ids(), vec!["fft-ch".to_string()]);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_blocked_slot_does_not_stall_other_slots() {
    let (publisher, mut rx) = ChannelPublisher::new();
    let config = StreamConfig {
        analyze_on_ingest: false,
        ..spectrum_config()
    };
    let mut session = StreamSession::new(config, Arc::new(publisher)).unwrap();
    session.start().await.unwrap();

    let (started_tx, started_rx) = unbounded();
    let (gate_tx, gate_rx) = unbounded();
    let gated = Arc::new(GatedExecutor {
        started: started_tx,
        gate: gate_rx,
    });
    let mut slow = AnalysisSlotConfig::new("slow", "ch");
    slow.window_size = Some(8);
    session.add_slot_with_executor(slow, gated).unwrap();

    session.request_analysis("slow").unwrap();
    timeout(Duration::from_secs(5), async {
        while started_rx.try_recv().is_err() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("gated job never started");

    session.request_analysis("fft-ch").unwrap();
    match next_spectrum(&mut rx).await {
        Publication::Spectrum(report) => assert_eq!(report.slot, "fft-ch"),
        _ => unreachable!(),
    }

    gate_tx.send(()).unwrap();
    match next_spectrum(&mut rx).await {
        Publication::Spectrum(report) => assert_eq!(report.slot, "slow"),
        _ => unreachable!(),
    }
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_raw_frames_precede_their_records() {
    let (publisher, mut rx) = ChannelPublisher::new();
    let config = StreamConfig {
        publish_raw_frames: true,
        ..StreamConfig::default()
    };
    let mut session = StreamSession::new(config, Arc::new(publisher)).unwrap();
    session.start().await.unwrap();

    let count = session
        .feed_str("boot\r\n[{\"a\":1},{\"a\":2}]\r\n10:00:00.001 -> {\"b\":[1]}")
        .await
        .unwrap();
    assert_eq!(count, 3);
    session.shutdown().await.unwrap();

    let published = drain(&mut rx);
    let kinds: Vec<(String, u64)> = published
        .iter()
        .map(|p| match p {
            Publication::RawFrame { sequence_id, .. } => ("raw".to_string(), *sequence_id),
            Publication::Record(r) => ("record".to_string(), r.sequence_id),
            other => panic!("unexpected publication {:?}", other),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("raw".to_string(), 0),
            ("record".to_string(), 0),
            ("record".to_string(), 1),
            ("raw".to_string(), 2),
            ("record".to_string(), 2),
        ]
    );
    match &published[3] {
        Publication::RawFrame { text, .. } => assert_eq!(text, "{\"b\":[1]}"),
        _ => unreachable!(),
    }

    let line = serde_json::to_value(&published[0]).unwrap();
    assert_eq!(line["kind"], "raw_frame");
    assert_eq!(line["text"], "[{\"a\":1},{\"a\":2}]");
}
