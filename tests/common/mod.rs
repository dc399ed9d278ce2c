#![allow(dead_code)]

use async_trait::async_trait;
use page_narrator_lib::audio::{AudioBuffer, AudioFormat};
use page_narrator_lib::orchestrator::retry::RetryPolicy;
use page_narrator_lib::orchestrator::PipelineOptions;
use page_narrator_lib::session::SegmentQueue;
use page_narrator_lib::tts::{SpeechEngine, SynthesisError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const FORMAT: AudioFormat = AudioFormat {
    sample_rate: 8_000,
    channels: 1,
};
pub const SECS_PER_CHAR: f32 = 0.05;

/// Segment texts are `s<index>` so the stub can tell which segment it is voicing
pub fn queue(n: usize) -> SegmentQueue {
    SegmentQueue::from_texts((0..n).map(|i| format!("s{}", i))).unwrap()
}

pub fn index_of(text: &str) -> usize {
    text.trim_start_matches('s').parse().unwrap()
}

/// What the stub returns for segment `index`; deterministic and distinct per index
pub fn expected_audio(index: usize) -> Vec<i16> {
    let value = (index % 1000) as i16 + 1;
    vec![value; 80 * (1 + index % 4)]
}

pub fn expected_stream(indices: impl IntoIterator<Item = usize>) -> Vec<i16> {
    indices.into_iter().flat_map(expected_audio).collect()
}

pub fn options(concurrency: usize) -> PipelineOptions {
    PipelineOptions {
        concurrency,
        max_pending: 64,
        progress_interval: 10,
        retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(4)),
        call_timeout: Duration::from_secs(5),
        format: FORMAT,
        secs_per_char: SECS_PER_CHAR,
    }
}

pub fn seeded_latencies(n: usize, seed: u64) -> Vec<Duration> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| match rng.gen_range(0..10) {
            0 => Duration::ZERO,
            9 => Duration::from_millis(rng.gen_range(20..40)),
            _ => Duration::from_millis(rng.gen_range(1..5)),
        })
        .collect()
}

pub fn read_samples(path: &Path) -> Vec<i16> {
    hound::WavReader::open(path)
        .unwrap()
        .samples::<i16>()
        .map(|s| s.unwrap())
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct CallRecord {
    pub index: usize,
    pub started: Instant,
    pub finished: Instant,
}

/// Deterministic engine with scripted latency and failures
#[derive(Default)]
pub struct StubEngine {
    latencies: Vec<Duration>,
    permanent_failures: HashSet<usize>,
    /// index -> number of leading calls that fail with a rate limit
    transient_failures: HashMap<usize, usize>,
    cancel_at: Option<(usize, CancellationToken)>,
    calls: Mutex<Vec<CallRecord>>,
    attempts: Mutex<HashMap<usize, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latencies(mut self, latencies: Vec<Duration>) -> Self {
        self.latencies = latencies;
        self
    }

    pub fn uniform_latency(self, n: usize, latency: Duration) -> Self {
        self.with_latencies(vec![latency; n])
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.permanent_failures.insert(index);
        self
    }

    pub fn flaky_at(mut self, index: usize, failures: usize) -> Self {
        self.transient_failures.insert(index, failures);
        self
    }

    /// Cancel `token` while voicing `index`, after a pause that lets earlier results flush
    pub fn cancelling_at(mut self, index: usize, token: CancellationToken) -> Self {
        self.cancel_at = Some((index, token));
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl SpeechEngine for StubEngine {
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer, SynthesisError> {
        let index = index_of(text);
        let started = Instant::now();
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(index).or_insert(0);
            *count += 1;
            *count
        };

        if let Some((cancel_index, token)) = &self.cancel_at {
            if *cancel_index == index {
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel();
            }
        }

        let latency = self.latencies.get(index).copied().unwrap_or(Duration::ZERO);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(CallRecord {
            index,
            started,
            finished: Instant::now(),
        });

        if self.permanent_failures.contains(&index) {
            return Err(SynthesisError::TextRejected(format!("cannot voice {}", text)));
        }
        if let Some(&failures) = self.transient_failures.get(&index) {
            if attempt <= failures {
                return Err(SynthesisError::RateLimitError);
            }
        }

        Ok(AudioBuffer::from_samples(expected_audio(index), FORMAT))
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Cloneable in-memory progress stream
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
