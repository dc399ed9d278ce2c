use std::io::Cursor;
use thiserror::Error;

/// Sample layout shared by every buffer written into one artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Playback length of `samples` interleaved samples in this format
    pub fn duration_of(&self, samples: u64) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            let channels = self.channels.max(1) as f64;
            samples as f64 / (self.sample_rate as f64 * channels)
        }
    }
}

/// Failure decoding engine output into samples
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed WAV: {0}")]
    Malformed(#[from] hound::Error),

    #[error("unsupported {bits}-bit {kind} WAV encoding")]
    UnsupportedEncoding { bits: u16, kind: &'static str },
}

#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Cached duration in seconds
    pub duration_secs: f32,
}

impl AudioBuffer {
    pub fn from_samples(samples: Vec<i16>, format: AudioFormat) -> Self {
        let mut buffer = Self {
            samples,
            sample_rate: format.sample_rate,
            channels: format.channels,
            duration_secs: 0.0,
        };
        buffer.update_duration();
        buffer
    }

    /// Zeroed samples lasting `duration_secs`, rounded to whole frames
    pub fn silence(duration_secs: f32, format: AudioFormat) -> Self {
        let frames = (duration_secs.max(0.0) as f64 * format.sample_rate as f64).round() as usize;
        let channels = format.channels.max(1) as usize;
        Self::from_samples(vec![0i16; frames * channels], format)
    }

    /// Decode a complete WAV file (16/24/32-bit int or 32-bit float) into i16 samples
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let format = AudioFormat::new(spec.sample_rate, spec.channels);

        let samples = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => reader
                .samples::<i16>()
                .collect::<Result<Vec<_>, _>>()?,
            (hound::SampleFormat::Int, bits @ (24 | 32)) => {
                let shift = bits - 16;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) as i16))
                    .collect::<Result<Vec<_>, _>>()?
            }
            (hound::SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<Result<Vec<_>, _>>()?,
            (hound::SampleFormat::Int, bits) => {
                return Err(DecodeError::UnsupportedEncoding { bits, kind: "int" })
            }
            (hound::SampleFormat::Float, bits) => {
                return Err(DecodeError::UnsupportedEncoding {
                    bits,
                    kind: "float",
                })
            }
        };

        Ok(Self::from_samples(samples, format))
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }

    /// Recalculate and update duration_secs
    fn update_duration(&mut self) {
        if self.sample_rate == 0 {
            self.duration_secs = 0.0;
        } else {
            let channels = self.channels.max(1) as f32;
            self.duration_secs = self.samples.len() as f32 / (self.sample_rate as f32 * channels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, write: impl FnOnce(&mut hound::WavWriter<&mut Cursor<Vec<u8>>>)) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_silence_length_matches_duration() {
        let format = AudioFormat::new(24_000, 1);
        let silence = AudioBuffer::silence(1.5, format);
        assert_eq!(silence.samples.len(), 36_000);
        assert!(silence.samples.iter().all(|&s| s == 0));
        assert!((silence.duration_secs - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_silence_counts_every_channel() {
        let silence = AudioBuffer::silence(0.5, AudioFormat::new(1_000, 2));
        assert_eq!(silence.samples.len(), 1_000);
        assert!((silence.duration_secs - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_int16_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |w| {
            for s in [0i16, 100, -100, i16::MAX] {
                w.write_sample(s).unwrap();
            }
        });

        let buffer = AudioBuffer::from_wav_bytes(&bytes).unwrap();
        assert_eq!(buffer.samples, vec![0, 100, -100, i16::MAX]);
        assert_eq!(buffer.format(), AudioFormat::new(24_000, 1));
    }

    #[test]
    fn test_decode_float_wav_clamps() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let bytes = wav_bytes(spec, |w| {
            for s in [0.0f32, 1.0, -2.0] {
                w.write_sample(s).unwrap();
            }
        });

        let buffer = AudioBuffer::from_wav_bytes(&bytes).unwrap();
        assert_eq!(buffer.samples, vec![0, i16::MAX, -i16::MAX]);
        assert_eq!(buffer.sample_rate, 22_050);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = AudioBuffer::from_wav_bytes(b"FORM0000AIFF");
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }
}
