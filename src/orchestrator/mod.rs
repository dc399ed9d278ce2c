use crate::audio::{ArtifactInfo, AudioFormat, OutputWriter, WriteError, WriterState};
use crate::config::RunConfig;
use crate::session::{
    AssemblyError, OrderedAssembler, ProgressEvent, ProgressReporter, SegmentQueue,
    SynthesisResult,
};
use crate::tts::SpeechEngine;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use self::metrics::{RunMetrics, RunSummary};
use self::retry::RetryPolicy;
use self::worker::{run_worker, ClaimCursor, WorkerChannels, WorkerContext};

pub mod metrics;
pub mod retry;
pub mod worker;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Output write failed: {0}")]
    Write(#[from] WriteError),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Pipeline stopped early: {flushed}/{total} segments written")]
    Incomplete { flushed: usize, total: usize },
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub concurrency: usize,
    pub max_pending: usize,
    pub progress_interval: usize,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub format: AudioFormat,
    pub secs_per_char: f32,
}

impl PipelineOptions {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_pending: config.max_pending.max(1),
            progress_interval: config.progress_interval_segments.max(1),
            retry: RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.retry_base_delay_ms),
                Duration::from_millis(config.retry_max_delay_ms),
            ),
            call_timeout: Duration::from_secs(config.synthesis_timeout_secs),
            format: config.audio_format(),
            secs_per_char: config.placeholder_secs_per_char,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed { reason: String },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
            RunOutcome::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub engine: String,
    pub outcome: RunOutcome,
    pub artifact: ArtifactInfo,
    pub metrics: RunMetrics,
    pub summary: RunSummary,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.metrics;
        let s = &self.summary;

        writeln!(f, "==================================================")?;
        writeln!(f, "Narration {} (run {})", self.outcome, self.run_id)?;
        writeln!(f, "  Engine:            {}", self.engine)?;
        writeln!(
            f,
            "  Started:           {}",
            m.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(f, "  Synthesis time:    {:.2}s", s.synthesis_time.as_secs_f64())?;
        writeln!(f, "  Total time:        {:.2}s", s.total_time.as_secs_f64())?;
        writeln!(f, "  Per segment avg:   {:.3}s", s.per_segment_avg.as_secs_f64())?;
        writeln!(f, "  Effective speedup: {:.2}x", s.effective_speedup)?;
        writeln!(
            f,
            "  Segments:          {}/{} written, {} synthesized, {} placeholders",
            m.completed, m.total_segments, m.synthesized, m.placeholders
        )?;
        for (index, reason) in &m.failures {
            writeln!(f, "    #{}: {}", index, reason)?;
        }
        writeln!(
            f,
            "  Output:            {} ({:?})",
            self.artifact.path.display(),
            self.artifact.state
        )?;
        writeln!(
            f,
            "  Size:              {:.2} MB",
            self.artifact.bytes as f64 / (1024.0 * 1024.0)
        )?;
        write!(
            f,
            "  Duration:          {:.1} min",
            self.artifact.duration_secs / 60.0
        )
    }
}

/// What the sink task hands back when it stops
struct SinkExit {
    writer: OutputWriter,
    flushed: usize,
    error: Option<PipelineError>,
}

/// Concurrent synthesis feeding one ordered writer
pub struct Pipeline {
    engine: Arc<dyn SpeechEngine>,
    options: PipelineOptions,
    started_at: Instant,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn SpeechEngine>, options: PipelineOptions) -> Self {
        Self {
            engine,
            options,
            started_at: Instant::now(),
        }
    }

    /// Count total time from `at` (e.g. before extraction) instead of from construction
    pub fn started_at(mut self, at: Instant) -> Self {
        self.started_at = at;
        self
    }

    /// Narrate every segment of `queue` into `writer`.
    ///
    /// Progress lines and the final report go to `progress_out`. Cancelling `cancel` stops
    /// new claims and leaves the already flushed prefix in the writer's `.part` file.
    pub async fn run<W>(
        &self,
        queue: SegmentQueue,
        writer: OutputWriter,
        progress_out: W,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError>
    where
        W: Write + Send + 'static,
    {
        let run_id = Uuid::new_v4().to_string();
        let total = queue.len();
        let workers = self.options.concurrency.min(total).max(1);
        let synthesis_started = Instant::now();

        tracing::info!(
            "Run {}: {} segments, {} workers, engine {}",
            run_id,
            total,
            workers,
            self.engine.name()
        );

        // Fatal sink errors cancel only this run; the caller's token is left alone
        let run_token = cancel.child_token();

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(total, self.options.progress_interval, progress_out);
        let reporter_handle = tokio::spawn(reporter.run(progress_rx));

        let (results_tx, results_rx) = mpsc::channel(workers);
        let (flushed_tx, flushed_rx) = watch::channel(0usize);

        let sink_handle = tokio::spawn(run_sink(
            writer,
            results_rx,
            flushed_tx,
            progress_tx.clone(),
            run_token.clone(),
            total,
        ));

        let ctx = Arc::new(WorkerContext {
            queue: Arc::new(queue),
            engine: Arc::clone(&self.engine),
            cursor: ClaimCursor::new(total),
            retry: self.options.retry,
            call_timeout: self.options.call_timeout,
            format: self.options.format,
            secs_per_char: self.options.secs_per_char,
            max_pending: self.options.max_pending,
        });

        let mut pool = JoinSet::new();
        for id in 0..workers {
            let channels = WorkerChannels {
                results: results_tx.clone(),
                progress: progress_tx.clone(),
                flushed: flushed_rx.clone(),
            };
            pool.spawn(run_worker(id, Arc::clone(&ctx), channels, run_token.clone()));
        }
        drop(results_tx);
        drop(progress_tx);
        drop(flushed_rx);

        let mut worker_error = None;
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
                run_token.cancel();
                worker_error.get_or_insert_with(|| PipelineError::Worker(e.to_string()));
            }
        }

        let sink = match sink_handle.await {
            Ok(exit) => exit,
            Err(e) => {
                // The writer went down with the task; nothing left to close
                tracing::error!("Sink task failed: {}", e);
                return Err(PipelineError::Worker(format!("sink task: {}", e)));
            }
        };
        let synthesis_elapsed = synthesis_started.elapsed();

        let SinkExit {
            writer,
            flushed,
            error,
        } = sink;
        let error = error.or(worker_error);

        let (outcome, artifact, error) = match error {
            Some(e) => {
                tracing::error!("Run {} failed after {} segments: {}", run_id, flushed, e);
                let artifact = writer.fail();
                (RunOutcome::Failed { reason: e.to_string() }, artifact, Some(e))
            }
            None if flushed == total => {
                let part_path = writer.part_path().to_path_buf();
                match writer.finish() {
                    Ok(artifact) => (RunOutcome::Completed, artifact, None),
                    Err(e) => {
                        tracing::error!("Run {} could not finalize output: {}", run_id, e);
                        let artifact = ArtifactInfo {
                            bytes: std::fs::metadata(&part_path).map(|m| m.len()).unwrap_or(0),
                            path: part_path,
                            state: WriterState::Failed,
                            segments: flushed,
                            samples: 0,
                            duration_secs: 0.0,
                        };
                        (RunOutcome::Failed { reason: e.to_string() }, artifact, Some(e.into()))
                    }
                }
            }
            None if cancel.is_cancelled() => {
                tracing::warn!("Run {} cancelled after {}/{} segments", run_id, flushed, total);
                (RunOutcome::Cancelled, writer.cancel(), None)
            }
            None => {
                let e = PipelineError::Incomplete { flushed, total };
                tracing::error!("Run {}: {}", run_id, e);
                let artifact = writer.fail();
                (RunOutcome::Failed { reason: e.to_string() }, artifact, Some(e))
            }
        };

        let (metrics, mut out) = match reporter_handle.await {
            Ok(done) => done,
            Err(e) => return Err(PipelineError::Worker(format!("progress reporter: {}", e))),
        };
        let summary = metrics.summarize(synthesis_elapsed, self.started_at.elapsed());

        let report = RunReport {
            run_id,
            engine: self.engine.name().to_string(),
            outcome,
            artifact,
            metrics,
            summary,
        };

        if let Err(e) = writeln!(out, "{}", report).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write run report: {}", e);
        }

        match error {
            Some(e) => Err(e),
            None => {
                tracing::info!(
                    "Run {} {}: speedup {:.2}x, {} placeholders",
                    report.run_id,
                    report.outcome,
                    report.summary.effective_speedup,
                    report.metrics.placeholders
                );
                Ok(report)
            }
        }
    }
}

/// Single consumer of worker results: reorders them and streams them into the writer
async fn run_sink(
    mut writer: OutputWriter,
    mut results: mpsc::Receiver<SynthesisResult>,
    flushed_tx: watch::Sender<usize>,
    progress: mpsc::UnboundedSender<ProgressEvent>,
    cancel: CancellationToken,
    total: usize,
) -> SinkExit {
    let mut assembler = OrderedAssembler::new();

    'receive: while !assembler.is_complete(total) {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = results.recv() => match received {
                Some(result) => result,
                None => break,
            },
        };

        let ready = match assembler.accept(result) {
            Ok(ready) => ready,
            Err(e) => {
                cancel.cancel();
                return SinkExit {
                    flushed: writer.segments_written(),
                    writer,
                    error: Some(e.into()),
                };
            }
        };

        for result in ready {
            if cancel.is_cancelled() {
                break 'receive;
            }

            if let Err(e) = writer.append(&result.audio) {
                cancel.cancel();
                return SinkExit {
                    flushed: writer.segments_written(),
                    writer,
                    error: Some(e.into()),
                };
            }

            let flushed = writer.segments_written();
            flushed_tx.send_replace(flushed);
            let _ = progress.send(ProgressEvent::Flushed {
                index: result.index,
                latency: result.latency,
                attempts: result.attempts,
                outcome: result.outcome,
            });
        }
    }

    SinkExit {
        flushed: writer.segments_written(),
        writer,
        error: None,
    }
}
