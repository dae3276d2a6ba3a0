use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the playback consumer.
///
/// All fields are relaxed atomics: they are gauges for reporting, not synchronization points.
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    /// Frames taken from the buffer and handed to the device.
    pub played_frames: AtomicU64,
    /// Frames emitted as silence because the buffer was empty.
    pub underrun_frames: AtomicU64,
    /// Number of render passes that hit an empty buffer.
    pub underrun_events: AtomicU64,
    /// Render passes completed by the consumer.
    pub render_passes: AtomicU64,
}

impl PlaybackCounters {
    pub fn reset(&self) {
        self.played_frames.store(0, Ordering::Relaxed);
        self.underrun_frames.store(0, Ordering::Relaxed);
        self.underrun_events.store(0, Ordering::Relaxed);
        self.render_passes.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of a speaker, suitable for logging or UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeakerStatus {
    /// Selected output device name.
    pub device: String,
    pub is_started: bool,
    /// Frames waiting in the circular buffer.
    pub buffered_frames: usize,
    /// Circular buffer capacity in frames.
    pub buffer_capacity_frames: usize,
    /// Frames played since the last `start`.
    pub played_frames: u64,
    pub underrun_frames: u64,
    pub underrun_events: u64,
    /// Active WAV mirror, if any.
    pub file_sink: Option<PathBuf>,
}

impl SpeakerStatus {
    /// Elapsed playback time derived from played frames.
    pub fn elapsed_ms(&self, sample_rate: u32) -> Option<u64> {
        if sample_rate == 0 {
            return None;
        }
        Some(self.played_frames.saturating_mul(1000) / u64::from(sample_rate))
    }
}

pub(crate) fn snapshot_counters(counters: &PlaybackCounters) -> (u64, u64, u64) {
    (
        counters.played_frames.load(Ordering::Relaxed),
        counters.underrun_frames.load(Ordering::Relaxed),
        counters.underrun_events.load(Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(played_frames: u64) -> SpeakerStatus {
        SpeakerStatus {
            device: "memory".to_string(),
            is_started: true,
            buffered_frames: 0,
            buffer_capacity_frames: 16_000,
            played_frames,
            underrun_frames: 0,
            underrun_events: 0,
            file_sink: None,
        }
    }

    #[test]
    fn elapsed_ms_from_played_frames() {
        assert_eq!(status(32_000).elapsed_ms(16_000), Some(2000));
        assert_eq!(status(1).elapsed_ms(0), None);
    }

    #[test]
    fn reset_clears_counters() {
        let counters = PlaybackCounters::default();
        counters.played_frames.store(10, Ordering::Relaxed);
        counters.underrun_events.store(2, Ordering::Relaxed);
        counters.reset();
        assert_eq!(snapshot_counters(&counters), (0, 0, 0));
    }
}
