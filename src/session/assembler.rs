use crate::audio::AudioBuffer;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Duplicate result for segment {index} (next expected {next_expected})")]
    DuplicateResult { index: usize, next_expected: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Synthesized,
    Placeholder { reason: String },
}

impl SegmentOutcome {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, SegmentOutcome::Placeholder { .. })
    }
}

/// Final audio for one segment, produced once after all retries
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub index: usize,
    pub audio: AudioBuffer,
    /// Sum of engine call durations; backoff sleeps are not counted
    pub latency: Duration,
    pub attempts: u32,
    pub outcome: SegmentOutcome,
}

impl SynthesisResult {
    pub fn duration_secs(&self) -> f32 {
        self.audio.duration_secs
    }
}

/// Reorder buffer: holds out-of-order results until their predecessors arrive
#[derive(Debug, Default)]
pub struct OrderedAssembler {
    next_expected: usize,
    pending: BTreeMap<usize, SynthesisResult>,
}

impl OrderedAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one result and return every result that is now ready, in index order
    pub fn accept(
        &mut self,
        result: SynthesisResult,
    ) -> Result<Vec<SynthesisResult>, AssemblyError> {
        let index = result.index;

        if index < self.next_expected || self.pending.contains_key(&index) {
            return Err(AssemblyError::DuplicateResult {
                index,
                next_expected: self.next_expected,
            });
        }

        if index > self.next_expected {
            tracing::debug!(
                "Segment {} buffered (waiting for {}, {} pending)",
                index,
                self.next_expected,
                self.pending.len() + 1
            );
            self.pending.insert(index, result);
            return Ok(Vec::new());
        }

        let mut ready = vec![result];
        self.next_expected += 1;

        while let Some(next) = self.pending.remove(&self.next_expected) {
            ready.push(next);
            self.next_expected += 1;
        }

        Ok(ready)
    }

    pub fn next_expected(&self) -> usize {
        self.next_expected
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_complete(&self, total: usize) -> bool {
        self.next_expected >= total && self.pending.is_empty()
    }
}
