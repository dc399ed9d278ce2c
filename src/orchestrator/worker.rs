use super::retry::RetryPolicy;
use crate::audio::{AudioBuffer, AudioFormat};
use crate::session::{ProgressEvent, Segment, SegmentOutcome, SegmentQueue, SynthesisResult};
use crate::tts::{SpeechEngine, SynthesisError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Hands out segment indices exactly once, in ascending order
#[derive(Debug)]
pub struct ClaimCursor {
    next: AtomicUsize,
    total: usize,
}

impl ClaimCursor {
    pub fn new(total: usize) -> Self {
        Self {
            next: AtomicUsize::new(0),
            total,
        }
    }

    pub fn claim(&self) -> Option<usize> {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        (index < self.total).then_some(index)
    }
}

/// State shared read-only by every worker of one run
pub(crate) struct WorkerContext {
    pub queue: Arc<SegmentQueue>,
    pub engine: Arc<dyn SpeechEngine>,
    pub cursor: ClaimCursor,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub format: AudioFormat,
    pub secs_per_char: f32,
    pub max_pending: usize,
}

pub(crate) struct WorkerChannels {
    pub results: mpsc::Sender<SynthesisResult>,
    pub progress: mpsc::UnboundedSender<ProgressEvent>,
    pub flushed: watch::Receiver<usize>,
}

/// Claim, synthesize and send until the cursor runs out or the run stops.
/// Returns how many segments this worker delivered.
pub(crate) async fn run_worker(
    id: usize,
    ctx: Arc<WorkerContext>,
    mut channels: WorkerChannels,
    cancel: CancellationToken,
) -> usize {
    let mut delivered = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(index) = ctx.cursor.claim() else {
            break;
        };
        let _ = channels.progress.send(ProgressEvent::Claimed { index });

        let in_window = tokio::select! {
            _ = cancel.cancelled() => false,
            open = wait_for_window(&mut channels.flushed, index, ctx.max_pending) => open,
        };
        if !in_window {
            break;
        }

        let Some(segment) = ctx.queue.get(index) else {
            tracing::error!("Worker {}: claimed index {} outside the queue", id, index);
            break;
        };

        let Some(result) = synthesize_segment(&ctx, segment, &cancel).await else {
            break;
        };

        if channels.results.send(result).await.is_err() {
            tracing::debug!("Worker {}: sink closed, stopping", id);
            break;
        }
        delivered += 1;
    }

    tracing::debug!("Worker {} finished after {} segments", id, delivered);
    delivered
}

/// Resolves once `index` is inside the reorder window; false if the sink is gone
async fn wait_for_window(
    flushed: &mut watch::Receiver<usize>,
    index: usize,
    max_pending: usize,
) -> bool {
    flushed
        .wait_for(|&count| index < count.saturating_add(max_pending))
        .await
        .is_ok()
}

/// Run one segment through the engine with retries.
/// `None` means the run was cancelled during a backoff sleep.
pub(crate) async fn synthesize_segment(
    ctx: &WorkerContext,
    segment: &Segment,
    cancel: &CancellationToken,
) -> Option<SynthesisResult> {
    let mut attempt = 0u32;
    let mut latency = Duration::ZERO;

    loop {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            ctx.call_timeout,
            ctx.engine.synthesize(&segment.text),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SynthesisError::TimeoutError),
        };
        latency += started.elapsed();

        match outcome.and_then(|audio| check_format(audio, ctx.format)) {
            Ok(audio) => {
                tracing::debug!(
                    "Segment {} synthesized: {:.2}s audio in {}ms",
                    segment.index,
                    audio.duration_secs,
                    latency.as_millis()
                );
                return Some(SynthesisResult {
                    index: segment.index,
                    audio,
                    latency,
                    attempts: attempt + 1,
                    outcome: SegmentOutcome::Synthesized,
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Segment {} attempt {}/{} failed: {}",
                    segment.index,
                    attempt + 1,
                    ctx.retry.max_retries() + 1,
                    e
                );

                if ctx.retry.should_retry(attempt, &e) {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = ctx.retry.wait_before_retry(segment.index, attempt) => {}
                    }
                    attempt += 1;
                    continue;
                }

                let duration = segment.estimated_duration(ctx.secs_per_char);
                return Some(SynthesisResult {
                    index: segment.index,
                    audio: AudioBuffer::silence(duration, ctx.format),
                    latency,
                    attempts: attempt + 1,
                    outcome: SegmentOutcome::Placeholder {
                        reason: e.to_string(),
                    },
                });
            }
        }
    }
}

fn check_format(audio: AudioBuffer, expected: AudioFormat) -> Result<AudioBuffer, SynthesisError> {
    let actual = audio.format();
    if actual != expected {
        return Err(SynthesisError::InvalidAudio(format!(
            "expected {}Hz/{}ch, engine returned {}Hz/{}ch",
            expected.sample_rate, expected.channels, actual.sample_rate, actual.channels
        )));
    }
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    const FORMAT: AudioFormat = AudioFormat {
        sample_rate: 8_000,
        channels: 1,
    };

    /// Fails the first `failures` calls with `error`, then returns 0.1s of tone
    struct FlakyEngine {
        failures: u32,
        error: fn() -> SynthesisError,
        calls: AtomicU32,
        format: AudioFormat,
    }

    #[async_trait]
    impl SpeechEngine for FlakyEngine {
        async fn synthesize(&self, _text: &str) -> Result<AudioBuffer, SynthesisError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.error)());
            }
            Ok(AudioBuffer::from_samples(vec![1000; 800], self.format))
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn context(engine: FlakyEngine, max_retries: u32) -> WorkerContext {
        WorkerContext {
            queue: Arc::new(SegmentQueue::from_texts(["こんにちは。"]).unwrap()),
            engine: Arc::new(engine),
            cursor: ClaimCursor::new(1),
            retry: RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(4)),
            call_timeout: Duration::from_secs(5),
            format: FORMAT,
            secs_per_char: 0.5,
            max_pending: 4,
        }
    }

    fn flaky(failures: u32, error: fn() -> SynthesisError) -> FlakyEngine {
        FlakyEngine {
            failures,
            error,
            calls: AtomicU32::new(0),
            format: FORMAT,
        }
    }

    #[test]
    fn test_cursor_claims_each_index_once() {
        let cursor = Arc::new(ClaimCursor::new(500));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cursor = Arc::clone(&cursor);
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    while let Some(i) = cursor.claim() {
                        seen.lock().unwrap().push(i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 500);
        assert_eq!(seen.iter().copied().collect::<HashSet<_>>().len(), 500);
        assert_eq!(cursor.claim(), None);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let ctx = context(flaky(2, || SynthesisError::RateLimitError), 3);
        let segment = ctx.queue.get(0).unwrap().clone();

        let result = synthesize_segment(&ctx, &segment, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.outcome, SegmentOutcome::Synthesized);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.audio.samples.len(), 800);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_placeholder_silence() {
        let ctx = context(flaky(10, || SynthesisError::TimeoutError), 2);
        let segment = ctx.queue.get(0).unwrap().clone();

        let result = synthesize_segment(&ctx, &segment, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.attempts, 3);
        assert!(result.outcome.is_placeholder());
        // 6 chars at 0.5s per char
        assert_eq!(result.audio.samples.len(), 3 * 8_000);
        assert!(result.audio.samples.iter().all(|&s| s == 0));
    }

    #[tokio::test]
    async fn test_permanent_error_skips_retries() {
        let ctx = context(flaky(1, || SynthesisError::TextRejected("nope".into())), 3);
        let segment = ctx.queue.get(0).unwrap().clone();

        let result = synthesize_segment(&ctx, &segment, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(
            result.outcome,
            SegmentOutcome::Placeholder {
                reason: "Text rejected by engine: nope".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_format_is_a_placeholder() {
        let mut engine = flaky(0, || SynthesisError::TimeoutError);
        engine.format = AudioFormat::new(24_000, 1);
        let ctx = context(engine, 3);
        let segment = ctx.queue.get(0).unwrap().clone();

        let result = synthesize_segment(&ctx, &segment, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.outcome.is_placeholder());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.audio.format(), FORMAT);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_abandons_segment() {
        let mut ctx = context(flaky(10, || SynthesisError::NetworkError("down".into())), 3);
        ctx.retry = RetryPolicy::new(3, Duration::from_secs(30), Duration::from_secs(30));
        let segment = ctx.queue.get(0).unwrap().clone();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert!(synthesize_segment(&ctx, &segment, &cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_worker_waits_for_reorder_window() {
        let mut ctx = context(flaky(0, || SynthesisError::TimeoutError), 0);
        ctx.queue = Arc::new(SegmentQueue::from_texts(["a", "b", "c"]).unwrap());
        ctx.cursor = ClaimCursor::new(3);
        ctx.max_pending = 1;
        let ctx = Arc::new(ctx);

        let (results_tx, mut results_rx) = mpsc::channel(4);
        let (progress_tx, _progress_rx) = mpsc::unbounded_channel();
        let (flushed_tx, flushed_rx) = watch::channel(0usize);
        let channels = WorkerChannels {
            results: results_tx,
            progress: progress_tx,
            flushed: flushed_rx,
        };
        let worker = tokio::spawn(run_worker(0, ctx, channels, CancellationToken::new()));

        assert_eq!(results_rx.recv().await.unwrap().index, 0);
        // index 1 is outside the window until index 0 is flushed
        let early = tokio::time::timeout(Duration::from_millis(50), results_rx.recv()).await;
        assert!(early.is_err());

        flushed_tx.send_replace(1);
        assert_eq!(results_rx.recv().await.unwrap().index, 1);
        flushed_tx.send_replace(2);
        assert_eq!(results_rx.recv().await.unwrap().index, 2);

        assert_eq!(worker.await.unwrap(), 3);
    }
}
