pub mod audio;
pub mod config;
pub mod extract;
pub mod orchestrator;
pub mod session;
pub mod tts;

use audio::{OutputWriter, WriteError};
use clap::Parser;
use config::{ConfigError, EngineKind, RunConfig};
use extract::ExtractionError;
use orchestrator::{Pipeline, PipelineError, PipelineOptions, RunOutcome, RunReport};
use session::{QueueError, SegmentQueue, SegmenterOptions};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tts::{SpeechEngine, SynthesisError};

const PREVIEW_SEGMENTS: usize = 5;
const EXIT_CANCELLED: u8 = 130;

/// Top-level failure, named after the stage that produced it
#[derive(Debug, thiserror::Error)]
pub enum NarratorError {
    #[error("Configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Text extraction: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Segmentation: {0}")]
    Queue(#[from] QueueError),

    #[error("Engine setup: {0}")]
    Engine(#[from] SynthesisError),

    #[error("Output: {0}")]
    Output(#[from] WriteError),

    #[error("Narration: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Segment dump {}: {source}", path.display())]
    Dump {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Runtime: {0}")]
    Runtime(std::io::Error),
}

/// Narrate a document into one WAV file
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Document to narrate (.pdf, .txt, .md)
    #[arg(env = "NARRATOR_INPUT")]
    pub input: Option<PathBuf>,

    /// Output WAV path (default: <input>.wav)
    #[arg(short, long, env = "NARRATOR_OUTPUT")]
    pub output: Option<PathBuf>,

    /// JSON config file; flags and environment override its values
    #[arg(short, long, env = "NARRATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Synthesis engine
    #[arg(short, long, env = "NARRATOR_ENGINE")]
    pub engine: Option<EngineKind>,

    /// Concurrent synthesis calls
    #[arg(short = 'j', long, env = "NARRATOR_CONCURRENCY")]
    pub concurrency: Option<usize>,

    #[arg(long, env = "NARRATOR_MAX_SEGMENT_CHARS")]
    pub max_segment_chars: Option<usize>,

    #[arg(long, env = "NARRATOR_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Print a progress line every N merged segments
    #[arg(long, env = "NARRATOR_PROGRESS_INTERVAL")]
    pub progress_interval: Option<usize>,

    #[arg(long, env = "NARRATOR_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    #[arg(long, env = "NARRATOR_SAMPLE_RATE")]
    pub sample_rate: Option<u32>,

    #[arg(long, env = "VOICEVOX_URL")]
    pub voicevox_url: Option<String>,

    #[arg(long, env = "VOICEVOX_SPEAKER")]
    pub speaker_id: Option<u32>,

    /// Voice for the `say` engine
    #[arg(long, env = "NARRATOR_VOICE")]
    pub voice: Option<String>,

    /// Words per minute for the `say` engine
    #[arg(long, env = "NARRATOR_RATE")]
    pub rate: Option<u32>,

    /// Also write <output>.segments.txt with one segment per line
    #[arg(long)]
    pub dump_segments: bool,
}

impl Args {
    /// Config file (if any), then flags and environment on top
    pub fn into_config(self) -> Result<RunConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };

        if let Some(input) = self.input {
            config.input_path = input;
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_chars) = self.max_segment_chars {
            config.max_segment_chars = max_chars;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(interval) = self.progress_interval {
            config.progress_interval_segments = interval;
        }
        if let Some(timeout) = self.timeout_secs {
            config.synthesis_timeout_secs = timeout;
        }
        if let Some(sample_rate) = self.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(url) = self.voicevox_url {
            config.voicevox_url = url;
        }
        if let Some(speaker) = self.speaker_id {
            config.speaker_id = speaker;
        }
        if let Some(voice) = self.voice {
            config.voice = voice;
        }
        if let Some(rate) = self.rate {
            config.speech_rate = rate;
        }
        config.dump_segments |= self.dump_segments;

        config.finalize()
    }
}

pub fn run() -> ExitCode {
    // Load environment variables from .env file
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => return report_failure(NarratorError::Config(e)),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return report_failure(NarratorError::Runtime(e)),
    };

    match runtime.block_on(narrate_until_interrupted(config)) {
        Ok(report) if report.outcome == RunOutcome::Cancelled => ExitCode::from(EXIT_CANCELLED),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => report_failure(e),
    }
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

fn report_failure(err: NarratorError) -> ExitCode {
    tracing::error!("{}", err);
    eprintln!("Error: {}", err);
    ExitCode::FAILURE
}

async fn narrate_until_interrupted(config: RunConfig) -> Result<RunReport, NarratorError> {
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted: finishing in-flight segments and keeping the partial output");
            signal_token.cancel();
        }
    });

    narrate(&config, cancel).await
}

/// Full run with the engine named in `config`; progress goes to stdout
pub async fn narrate(
    config: &RunConfig,
    cancel: CancellationToken,
) -> Result<RunReport, NarratorError> {
    let started = Instant::now();
    let engine = tts::engine_from_config(config)?;
    narrate_with_engine(config, engine, std::io::stdout(), cancel, started).await
}

/// Extract, segment and narrate with a caller-supplied engine
pub async fn narrate_with_engine<W>(
    config: &RunConfig,
    engine: Arc<dyn SpeechEngine>,
    progress_out: W,
    cancel: CancellationToken,
    started: Instant,
) -> Result<RunReport, NarratorError>
where
    W: Write + Send + 'static,
{
    let extractor = extract::extractor_for(&config.input_path)?;
    tracing::info!(
        "Extracting {} with {}",
        config.input_path.display(),
        extractor.name()
    );
    let text = extractor.extract(&config.input_path).await?;

    let queue = SegmentQueue::build(&text, &SegmenterOptions::from_config(config))?;
    log_preview(&queue);

    if config.dump_segments {
        write_segment_dump(config, &queue)?;
    }

    let writer = OutputWriter::create(&config.output_path, config.audio_format())?;
    let pipeline = Pipeline::new(engine, PipelineOptions::from_config(config)).started_at(started);

    Ok(pipeline.run(queue, writer, progress_out, cancel).await?)
}

fn log_preview(queue: &SegmentQueue) {
    tracing::info!("{} segments to narrate", queue.len());
    for segment in queue.iter().take(PREVIEW_SEGMENTS) {
        tracing::info!("  [{}] {}", segment.index, segment.text);
    }
}

fn write_segment_dump(config: &RunConfig, queue: &SegmentQueue) -> Result<(), NarratorError> {
    let path = config.segments_dump_path();
    let dump_err = |source| NarratorError::Dump {
        path: path.clone(),
        source,
    };

    let mut out = BufWriter::new(File::create(&path).map_err(dump_err)?);
    for segment in queue.iter() {
        writeln!(out, "{}", segment.text).map_err(dump_err)?;
    }
    out.flush().map_err(dump_err)?;

    tracing::info!("Segment list written to {}", path.display());
    Ok(())
}
