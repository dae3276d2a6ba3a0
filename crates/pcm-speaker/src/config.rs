//! Speaker configuration: the fixed output format and playback tuning knobs.

use std::time::Duration;

use crate::error::{Result, SpeakerError};

/// Device index meaning "use the host default output device".
pub const DEFAULT_DEVICE_INDEX: i32 = -1;

/// Supported PCM bit depths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BitsPerSample {
    Eight,
    Sixteen,
    TwentyFour,
    ThirtyTwo,
}

impl BitsPerSample {
    pub fn bits(self) -> u16 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
            Self::TwentyFour => 24,
            Self::ThirtyTwo => 32,
        }
    }

    /// Smallest sample value representable at this depth.
    pub fn min_sample(self) -> i32 {
        match self {
            Self::ThirtyTwo => i32::MIN,
            other => -(1 << (other.bits() - 1)),
        }
    }

    /// Largest sample value representable at this depth.
    pub fn max_sample(self) -> i32 {
        match self {
            Self::ThirtyTwo => i32::MAX,
            other => (1 << (other.bits() - 1)) - 1,
        }
    }

    pub fn clamp(self, sample: i32) -> i32 {
        sample.clamp(self.min_sample(), self.max_sample())
    }

    /// Normalize a sample at this depth to `[-1.0, 1.0)`.
    pub fn to_f32(self, sample: i32) -> f32 {
        let scale = (1u64 << (self.bits() - 1)) as f64;
        (f64::from(self.clamp(sample)) / scale) as f32
    }
}

impl TryFrom<i32> for BitsPerSample {
    type Error = SpeakerError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            8 => Ok(Self::Eight),
            16 => Ok(Self::Sixteen),
            24 => Ok(Self::TwentyFour),
            32 => Ok(Self::ThirtyTwo),
            other => Err(SpeakerError::invalid_argument(format!(
                "bits_per_sample must be one of 8, 16, 24 or 32 (got {other})"
            ))),
        }
    }
}

/// Validated, immutable speaker configuration.
///
/// Construct with [`SpeakerConfig::new`]; every field is checked up front so an invalid
/// configuration never reaches the device or the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpeakerConfig {
    sample_rate: u32,
    bits_per_sample: BitsPerSample,
    buffer_size_secs: u32,
    device_index: i32,
}

impl SpeakerConfig {
    pub fn new(
        sample_rate: i32,
        bits_per_sample: i32,
        buffer_size_secs: i32,
        device_index: i32,
    ) -> Result<Self> {
        if sample_rate <= 0 {
            return Err(SpeakerError::invalid_argument(format!(
                "sample_rate must be positive (got {sample_rate})"
            )));
        }
        let bits = BitsPerSample::try_from(bits_per_sample)?;
        if buffer_size_secs <= 0 {
            return Err(SpeakerError::invalid_argument(format!(
                "buffer_size_secs must be positive (got {buffer_size_secs})"
            )));
        }
        if device_index < DEFAULT_DEVICE_INDEX {
            return Err(SpeakerError::invalid_argument(format!(
                "device_index must be -1 (default) or a device index (got {device_index})"
            )));
        }
        // Capacity has to be addressable as a frame count.
        (sample_rate as u64)
            .checked_mul(buffer_size_secs as u64)
            .and_then(|frames| usize::try_from(frames).ok())
            .ok_or_else(|| SpeakerError::invalid_argument("buffer capacity overflows"))?;

        Ok(Self {
            sample_rate: sample_rate as u32,
            bits_per_sample: bits,
            buffer_size_secs: buffer_size_secs as u32,
            device_index,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> BitsPerSample {
        self.bits_per_sample
    }

    pub fn buffer_size_secs(&self) -> u32 {
        self.buffer_size_secs
    }

    pub fn device_index(&self) -> i32 {
        self.device_index
    }

    /// `None` when the host default device is requested.
    pub fn device_position(&self) -> Option<usize> {
        usize::try_from(self.device_index).ok()
    }

    /// Circular buffer capacity in frames (`sample_rate * buffer_size_secs`).
    pub fn buffer_capacity_frames(&self) -> usize {
        self.sample_rate as usize * self.buffer_size_secs as usize
    }
}

/// Playback tuning parameters for the consumer side and for `flush`.
#[derive(Clone, Debug)]
pub struct PlaybackTuning {
    /// Frames rendered per period by devices that pace themselves (the memory backend).
    pub period_frames: usize,
    /// Interval at which the playback thread and flush waiters re-check their conditions.
    pub poll_interval: Duration,
    /// How long `flush` tolerates a buffer that makes no drain progress before failing.
    pub flush_stall_timeout: Duration,
}

impl Default for PlaybackTuning {
    fn default() -> Self {
        Self {
            period_frames: 512,
            poll_interval: Duration::from_millis(2),
            flush_stall_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_sample_rate() {
        let err = SpeakerConfig::new(0, 16, 20, 0).unwrap_err();
        assert!(matches!(err, SpeakerError::InvalidArgument(_)));
        assert!(SpeakerConfig::new(-8000, 16, 20, 0).is_err());
    }

    #[test]
    fn rejects_unsupported_bit_depths() {
        for bits in [0, -1, 4, 12, 20, 64] {
            let err = SpeakerConfig::new(16_000, bits, 20, 0).unwrap_err();
            assert!(matches!(err, SpeakerError::InvalidArgument(_)), "bits {bits}");
        }
    }

    #[test]
    fn rejects_zero_buffer_and_bad_device_index() {
        assert!(matches!(
            SpeakerConfig::new(16_000, 16, 0, 0),
            Err(SpeakerError::InvalidArgument(_))
        ));
        assert!(matches!(
            SpeakerConfig::new(16_000, 16, 20, -2),
            Err(SpeakerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn capacity_is_rate_times_seconds() {
        let cfg = SpeakerConfig::new(16_000, 16, 1, DEFAULT_DEVICE_INDEX).unwrap();
        assert_eq!(cfg.buffer_capacity_frames(), 16_000);
        assert_eq!(cfg.device_position(), None);

        let cfg = SpeakerConfig::new(22_050, 8, 3, 2).unwrap();
        assert_eq!(cfg.buffer_capacity_frames(), 66_150);
        assert_eq!(cfg.device_position(), Some(2));
    }

    #[test]
    fn sample_ranges_follow_bit_depth() {
        assert_eq!(BitsPerSample::Eight.min_sample(), -128);
        assert_eq!(BitsPerSample::Eight.max_sample(), 127);
        assert_eq!(BitsPerSample::Sixteen.max_sample(), i16::MAX as i32);
        assert_eq!(BitsPerSample::TwentyFour.min_sample(), -8_388_608);
        assert_eq!(BitsPerSample::ThirtyTwo.max_sample(), i32::MAX);
        assert_eq!(BitsPerSample::Sixteen.clamp(40_000), 32_767);
    }

    #[test]
    fn to_f32_normalizes_full_scale() {
        assert_eq!(BitsPerSample::Sixteen.to_f32(0), 0.0);
        assert_eq!(BitsPerSample::Sixteen.to_f32(-32_768), -1.0);
        assert_eq!(BitsPerSample::Eight.to_f32(64), 0.5);
        assert!(BitsPerSample::ThirtyTwo.to_f32(i32::MAX) < 1.0001);
    }
}
