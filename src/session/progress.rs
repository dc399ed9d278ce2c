use super::SegmentOutcome;
use crate::orchestrator::metrics::RunMetrics;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Claimed {
        index: usize,
    },
    Flushed {
        index: usize,
        latency: Duration,
        attempts: u32,
        outcome: SegmentOutcome,
    },
}

/// Turns claim and flush events into metrics and periodic progress lines
pub struct ProgressReporter<W: Write> {
    interval: usize,
    out: W,
    metrics: RunMetrics,
}

impl<W: Write> ProgressReporter<W> {
    pub fn new(total_segments: usize, interval: usize, out: W) -> Self {
        Self {
            interval: interval.max(1),
            out,
            metrics: RunMetrics::new(total_segments),
        }
    }

    pub fn observe(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Claimed { index } => {
                tracing::debug!("Segment {} claimed", index);
                self.metrics.record_claim();
            }
            ProgressEvent::Flushed {
                index,
                latency,
                attempts,
                outcome,
            } => {
                if let SegmentOutcome::Placeholder { reason } = &outcome {
                    tracing::warn!(
                        "Segment {} replaced by silence after {} attempts: {}",
                        index,
                        attempts,
                        reason
                    );
                }
                self.metrics.record_flush(index, latency, &outcome);

                let completed = self.metrics.completed;
                if completed % self.interval == 0 || self.metrics.is_complete() {
                    self.report_line();
                }
            }
        }
    }

    /// Drain events until every sender is gone, then hand back the metrics
    pub async fn run(mut self, mut events: UnboundedReceiver<ProgressEvent>) -> (RunMetrics, W) {
        while let Some(event) = events.recv().await {
            self.observe(event);
        }
        (self.metrics, self.out)
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    fn report_line(&mut self) {
        let line = format!(
            "{}/{} segments merged...",
            self.metrics.completed, self.metrics.total_segments
        );
        tracing::info!("{}", line);
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            tracing::warn!("Failed to write progress line: {}", e);
        }
    }
}
