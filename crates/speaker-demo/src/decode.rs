//! Input WAV loading.
//!
//! Symphonia detects the container and decodes it into mono integer frames at the file's own bit
//! depth, which is exactly what the speaker is configured with.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8,
    CodecParameters, DecoderOptions,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// A fully decoded mono PCM clip.
#[derive(Debug)]
pub struct PcmClip {
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    /// Signed samples in the range of `bits_per_sample`.
    pub samples: Vec<i32>,
}

impl PcmClip {
    pub fn duration_ms(&self) -> Option<u64> {
        if self.sample_rate == 0 {
            return None;
        }
        Some((self.samples.len() as u64).saturating_mul(1000) / u64::from(self.sample_rate))
    }
}

const INTEGER_PCM: [symphonia::core::codecs::CodecType; 4] = [
    CODEC_TYPE_PCM_U8,
    CODEC_TYPE_PCM_S16LE,
    CODEC_TYPE_PCM_S24LE,
    CODEC_TYPE_PCM_S32LE,
];

/// Decode a mono linear-PCM WAV file.
pub fn read_mono_wav(path: &Path) -> Result<PcmClip> {
    let file = File::open(path).with_context(|| format!("open {path:?}"))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let detected = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("read container of {path:?}"))?;

    let mut format = detected.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track"))?;
    let params: CodecParameters = track.codec_params.clone();

    if !INTEGER_PCM.contains(&params.codec) {
        bail!("WAV file format must be integer PCM");
    }
    let channels = params
        .channels
        .ok_or_else(|| anyhow!("unknown channel layout"))?
        .count();
    if channels != 1 {
        bail!("WAV file must have a single channel (mono), found {channels}");
    }
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;
    let bits_per_sample = params
        .bits_per_sample
        .ok_or_else(|| anyhow!("unknown bits per sample"))?;
    if !(1..=32).contains(&bits_per_sample) {
        bail!("unsupported bits per sample: {bits_per_sample}");
    }

    let mut decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;
    // Symphonia widens integer samples to full-scale i32; shift them back to the file's depth.
    let shift = 32 - bits_per_sample;
    let mut samples = Vec::with_capacity(params.n_frames.unwrap_or(0) as usize);

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("read packet"),
        };
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::warn!("skipping undecodable packet: {msg}");
                continue;
            }
            Err(e) => return Err(e).context("decode packet"),
        };

        let mut buf = SampleBuffer::<i32>::new(decoded.capacity() as u64, *decoded.spec());
        buf.copy_interleaved_ref(decoded);
        samples.extend(buf.samples().iter().map(|s| s >> shift));
    }

    tracing::debug!(
        path = %path.display(),
        sample_rate,
        bits_per_sample,
        frames = samples.len(),
        "input decoded"
    );
    Ok(PcmClip {
        sample_rate,
        bits_per_sample,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, bits: u16, samples: &[i32]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 16_000,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_sixteen_bit_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let samples = [0, 1, -1, 12_345, i16::MIN as i32, i16::MAX as i32];
        write_wav(&path, 1, 16, &samples);

        let clip = read_mono_wav(&path).unwrap();
        assert_eq!(clip.sample_rate, 16_000);
        assert_eq!(clip.bits_per_sample, 16);
        assert_eq!(clip.samples, samples);
        assert_eq!(clip.duration_ms(), Some(0));
    }

    #[test]
    fn rejects_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, 16, &[1, 2, 3, 4]);

        let err = read_mono_wav(&path).unwrap_err();
        assert!(err.to_string().contains("single channel"));
    }

    #[test]
    fn missing_file_has_context() {
        let err = read_mono_wav(Path::new("/nonexistent/input.wav")).unwrap_err();
        assert!(err.to_string().contains("open"));
    }
}
