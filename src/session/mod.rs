pub mod assembler;
pub mod progress;
pub mod segment;

pub use assembler::{AssemblyError, OrderedAssembler, SegmentOutcome, SynthesisResult};
pub use progress::{ProgressEvent, ProgressReporter};
pub use segment::{QueueError, Segment, SegmentQueue, SegmenterOptions};
