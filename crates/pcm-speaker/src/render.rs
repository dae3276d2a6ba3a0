//! Consumer-side drain step shared by every output device.
//!
//! Each render pass:
//! - pulls up to `out.len()` frames from the circular buffer without blocking
//! - pads the remainder with silence (underrun) so no frame is ever repeated
//! - mirrors the real frames (never the padding) into the WAV sink when one is active
//! - updates playback counters and wakes `flush` waiters
//!
//! A render pass runs on whatever thread the device drives it from. For cpal that is the
//! real-time audio callback, so sink mirroring (a mutex plus buffered file writes) happens there
//! too while a WAV sink is active.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::CircularBuffer;
use crate::error::{Result, SpeakerError};
use crate::registry::StreamFormat;
use crate::sink::WavSink;
use crate::status::PlaybackCounters;

/// State shared between a speaker and its playback consumer.
pub(crate) struct Shared {
    pub(crate) buffer: CircularBuffer,
    pub(crate) counters: PlaybackCounters,
    pub(crate) format: StreamFormat,
    sink: Mutex<Option<WavSink>>,
    failure: Mutex<Option<SpeakerError>>,
}

impl Shared {
    pub(crate) fn new(capacity: usize, format: StreamFormat) -> Result<Self> {
        Ok(Self {
            buffer: CircularBuffer::new(capacity)?,
            counters: PlaybackCounters::default(),
            format,
            sink: Mutex::new(None),
            failure: Mutex::new(None),
        })
    }

    pub(crate) fn sink(&self) -> MutexGuard<'_, Option<WavSink>> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn failure(&self) -> MutexGuard<'_, Option<SpeakerError>> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Surface a device failure recorded by the consumer.
    pub(crate) fn check_failure(&self) -> Result<()> {
        match self.failure().as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.failure().is_some()
    }

    pub(crate) fn take_failure(&self) -> Option<SpeakerError> {
        self.failure().take()
    }

    /// Record the first consumer failure and close the buffer so blocked producers wake up.
    pub(crate) fn fail(&self, err: SpeakerError) {
        {
            let mut slot = self.failure();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.buffer.close();
    }

    /// Close the active WAV sink, if any, finalizing its header.
    pub(crate) fn close_sink(&self) -> Result<()> {
        match self.sink().take() {
            Some(sink) => sink.finalize().map(|_| ()),
            None => Ok(()),
        }
    }
}

/// Handle a device uses to pull frames from its speaker.
#[derive(Clone)]
pub struct Renderer {
    shared: Arc<Shared>,
}

impl Renderer {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn format(&self) -> StreamFormat {
        self.shared.format
    }

    /// Fill `out` with the next frames in FIFO order, padding with silence.
    ///
    /// Returns how many real (non-silence) frames were written.
    pub fn render(&self, out: &mut [i32]) -> usize {
        let shared = &self.shared;
        let filled = shared.buffer.pop_into(out);
        out[filled..].fill(0);

        if filled > 0 {
            shared
                .counters
                .played_frames
                .fetch_add(filled as u64, Ordering::Relaxed);
            self.mirror(&out[..filled]);
        }
        if filled < out.len() {
            shared.counters.underrun_events.fetch_add(1, Ordering::Relaxed);
            shared
                .counters
                .underrun_frames
                .fetch_add((out.len() - filled) as u64, Ordering::Relaxed);
        }

        shared.counters.render_passes.fetch_add(1, Ordering::Release);
        shared.buffer.notify();
        filled
    }

    fn mirror(&self, frames: &[i32]) {
        let mut sink = self.shared.sink();
        let Some(active) = sink.as_mut() else {
            return;
        };
        if let Err(e) = active.append(frames) {
            tracing::warn!(
                path = %active.path().display(),
                error = %e,
                "wav sink write failed; detaching sink"
            );
            *sink = None;
        }
    }

    pub(crate) fn fail(&self, err: SpeakerError) {
        self.shared.fail(err);
    }
}
