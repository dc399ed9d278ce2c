use crate::session::SegmentOutcome;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Counters for one run; owned by the progress reporter and handed back at the end
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub total_segments: usize,
    pub claimed: usize,
    pub completed: usize,
    pub synthesized: usize,
    pub placeholders: usize,
    pub failures: Vec<(usize, String)>,
    /// Σ per-call engine latency of flushed segments
    pub serial_latency: Duration,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub synthesis_time: Duration,
    pub total_time: Duration,
    pub per_segment_avg: Duration,
    pub effective_speedup: f64,
}

impl RunMetrics {
    pub fn new(total_segments: usize) -> Self {
        Self {
            total_segments,
            claimed: 0,
            completed: 0,
            synthesized: 0,
            placeholders: 0,
            failures: Vec::new(),
            serial_latency: Duration::ZERO,
            started_at: Utc::now(),
        }
    }

    pub fn record_claim(&mut self) {
        self.claimed += 1;
    }

    pub fn record_flush(&mut self, index: usize, latency: Duration, outcome: &SegmentOutcome) {
        self.completed += 1;
        self.serial_latency += latency;

        match outcome {
            SegmentOutcome::Synthesized => self.synthesized += 1,
            SegmentOutcome::Placeholder { reason } => {
                self.placeholders += 1;
                self.failures.push((index, reason.clone()));
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total_segments
    }

    pub fn summarize(&self, synthesis_elapsed: Duration, total_elapsed: Duration) -> RunSummary {
        // Cancelled and failed runs average over what was actually written
        let per_segment_avg = match (self.completed, self.total_segments) {
            (0, 0) => Duration::ZERO,
            (0, total) => synthesis_elapsed.div_f64(total as f64),
            (completed, _) => synthesis_elapsed.div_f64(completed as f64),
        };

        let wall = synthesis_elapsed.as_secs_f64();
        let effective_speedup = if wall > 0.0 {
            self.serial_latency.as_secs_f64() / wall
        } else {
            0.0
        };

        RunSummary {
            synthesis_time: synthesis_elapsed,
            total_time: total_elapsed,
            per_segment_avg,
            effective_speedup,
        }
    }
}
