use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use streamscope::config::AnalysisSlotConfig;
use streamscope::core::JsonLinesPublisher;
use streamscope::framing::ScanMode;
use streamscope::transport::ReaderSource;
use streamscope::{StreamConfig, StreamSession};

#[derive(Parser)]
#[command(
    name = "streamscope",
    version,
    about = "Decode a noisy sensor byte stream into records and live spectra",
    long_about = "Reads microcontroller output from a file or stdin, extracts JSON records,\n\
                  keeps per-channel sample history and prints records and FFT reports\n\
                  as JSON lines on stdout."
)]
struct Cli {
    /// JSON stream config; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input file; reads stdin when omitted
    #[arg(long)]
    input: Option<PathBuf>,

    /// Match nested brackets instead of taking the first closing one
    #[arg(long)]
    balanced: bool,

    /// Also print the text of every parsed candidate
    #[arg(long)]
    raw: bool,

    /// Add an analysis slot for this channel
    #[arg(long)]
    channel: Option<String>,

    /// Vector element analysed on --channel
    #[arg(long, default_value_t = 0)]
    index: usize,

    /// FFT window for --channel (power of two)
    #[arg(long)]
    window: Option<usize>,

    /// Print a metrics report to stderr on exit
    #[arg(long)]
    metrics: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let mut config = match &cli.config {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::default(),
    };
    if cli.balanced {
        config.framing.scan = ScanMode::Balanced;
    }
    if cli.raw {
        config.publish_raw_frames = true;
    }
    if let Some(channel) = &cli.channel {
        let mut slot = AnalysisSlotConfig::new(format!("fft-{}", channel), channel.clone());
        slot.index = cli.index;
        slot.window_size = cli.window;
        config.slots.push(slot);
    }

    let publisher = Arc::new(JsonLinesPublisher::new(std::io::stdout()));
    let mut session = StreamSession::new(config, publisher)?;
    session.start().await?;

    match &cli.input {
        Some(path) => {
            info!("Reading stream from {:?}", path);
            let file = tokio::fs::File::open(path).await?;
            session.run(&mut ReaderSource::new(file)).await?;
        }
        None => {
            info!("Reading stream from stdin");
            session.run(&mut ReaderSource::new(tokio::io::stdin())).await?;
        }
    }

    session.shutdown().await?;

    if cli.metrics {
        eprintln!("{}", session.metrics().generate_report());
    }

    Ok(())
}
