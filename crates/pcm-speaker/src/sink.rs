//! WAV mirror of the frames handed to the output device.
//!
//! The header is written when the sink is created (so the file is a valid, empty WAV right away)
//! and its length fields are corrected when the sink is finalized.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::config::BitsPerSample;
use crate::error::Result;

/// Streaming mono PCM WAV writer.
pub struct WavSink {
    path: PathBuf,
    bits: BitsPerSample,
    writer: hound::WavWriter<BufWriter<File>>,
    frames: u64,
}

impl WavSink {
    /// Create (or truncate) `path` and write a header for mono `sample_rate`/`bits` PCM.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32, bits: BitsPerSample) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: bits.bits(),
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec)?;
        tracing::debug!(path = %path.display(), sample_rate, bits = bits.bits(), "wav sink opened");
        Ok(Self {
            path,
            bits,
            writer,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames appended so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Append frames, clamping each to the sink's bit depth.
    pub fn append(&mut self, frames: &[i32]) -> Result<()> {
        for &sample in frames {
            self.writer.write_sample(self.bits.clamp(sample))?;
        }
        self.frames += frames.len() as u64;
        Ok(())
    }

    /// Patch the header length fields and close the file. Returns the frame count written.
    pub fn finalize(self) -> Result<u64> {
        let frames = self.frames;
        let path = self.path;
        self.writer.finalize()?;
        tracing::debug!(path = %path.display(), frames, "wav sink finalized");
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_exists_before_any_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        let sink = WavSink::create(&path, 16_000, BitsPerSample::Sixteen).unwrap();
        assert!(path.exists());
        assert_eq!(sink.finalize().unwrap(), 0);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn appended_frames_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let mut sink = WavSink::create(&path, 8_000, BitsPerSample::Sixteen).unwrap();
        sink.append(&[1, 2, 3]).unwrap();
        sink.append(&[4, 70_000]).unwrap();
        assert_eq!(sink.frames(), 5);
        sink.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, i16::MAX]);
    }

    #[test]
    fn eight_bit_sink_roundtrips_signed_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u8.wav");
        let mut sink = WavSink::create(&path, 8_000, BitsPerSample::Eight).unwrap();
        sink.append(&[-128, 0, 127]).unwrap();
        sink.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 8);
        let samples: Vec<i8> = reader.samples::<i8>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![-128, 0, 127]);
    }

    #[test]
    fn twenty_four_bit_sink_clamps_to_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s24.wav");
        let mut sink = WavSink::create(&path, 48_000, BitsPerSample::TwentyFour).unwrap();
        sink.append(&[-8_388_608, -1, 0, 1, 8_388_607]).unwrap();
        sink.append(&[9_000_000, -9_000_000]).unwrap();
        assert_eq!(sink.finalize().unwrap(), 7);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 24);
        let samples: Vec<i32> = reader.samples::<i32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![-8_388_608, -1, 0, 1, 8_388_607, 8_388_607, -8_388_608]);
    }

    #[test]
    fn thirty_two_bit_sink_keeps_full_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s32.wav");
        let mut sink = WavSink::create(&path, 48_000, BitsPerSample::ThirtyTwo).unwrap();
        sink.append(&[i32::MIN, -1, 0, 1, i32::MAX]).unwrap();
        sink.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 32);
        let samples: Vec<i32> = reader.samples::<i32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![i32::MIN, -1, 0, 1, i32::MAX]);
    }
}
