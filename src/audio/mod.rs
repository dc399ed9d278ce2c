pub mod buffer;
pub mod writer;

pub use buffer::{AudioBuffer, AudioFormat, DecodeError};
pub use writer::{ArtifactInfo, OutputWriter, WriteError, WriterState};
