//! The playback engine.
//!
//! A [`Speaker`] owns one circular buffer and one resolved output device and moves between
//! `Stopped` and `Started` (plus the terminal `Deleted`). While started, a dedicated playback
//! thread runs the device, which drains the buffer at its own cadence. All methods take `&self`,
//! so a speaker can be shared between a thread that flushes and a thread that stops it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::buffer::WaitStatus;
use crate::config::{PlaybackTuning, SpeakerConfig};
use crate::error::{Result, SpeakerError};
use crate::registry::{AudioBackend, DeviceRegistry, OutputDevice, PlaybackContext, StreamFormat};
use crate::render::{Renderer, Shared};
use crate::sink::WavSink;
use crate::status::{SpeakerStatus, snapshot_counters};

/// Build identifier reported by [`Speaker::version`].
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const PLAYBACK_THREAD_NAME: &str = "pcm-speaker-playback";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Stopped,
    Started,
    Deleted,
}

/// A running playback thread. It hands the device back when it exits.
struct Session {
    stop: Arc<AtomicBool>,
    join: JoinHandle<(Box<dyn OutputDevice>, Result<()>)>,
}

struct State {
    phase: Phase,
    /// `None` only once deleted.
    shared: Option<Arc<Shared>>,
    /// Idle device binding; moved onto the playback thread while started.
    device: Option<Box<dyn OutputDevice>>,
    session: Option<Session>,
}

impl State {
    /// Started with a live playback thread. A failed device leaves `phase` at `Started` until
    /// `stop` reports the failure, but nothing is playing anymore.
    fn is_playing(&self) -> bool {
        self.phase == Phase::Started
            && self.shared.as_ref().is_some_and(|shared| !shared.has_failed())
    }

    /// Stop the playback thread (if any) and return to `Stopped`.
    ///
    /// Returns the device failure recorded during the session, if one occurred.
    fn halt(&mut self) -> Option<SpeakerError> {
        let shared = self.shared.clone()?;
        if let Some(session) = self.session.take() {
            session.stop.store(true, Ordering::Release);
            // Wake producers blocked in `flush` before waiting on the device.
            shared.buffer.close();
            match session.join.join() {
                Ok((device, Ok(()))) => self.device = Some(device),
                // A failed device is resolved again on the next `start`.
                Ok((_, Err(_))) => {}
                Err(_) => shared.fail(SpeakerError::io("playback thread panicked")),
            }
        }
        shared.buffer.clear();
        self.phase = Phase::Stopped;
        shared.take_failure()
    }

    /// Tear everything down and enter `Deleted`.
    fn release(&mut self) -> (Option<SpeakerError>, Result<()>) {
        let failure = match self.phase {
            Phase::Started => self.halt(),
            _ => None,
        };
        let sink = match self.shared.take() {
            Some(shared) => shared.close_sink(),
            None => Ok(()),
        };
        self.device = None;
        self.phase = Phase::Deleted;
        (failure, sink)
    }
}

fn deleted() -> SpeakerError {
    SpeakerError::invalid_state("speaker has been deleted")
}

/// Tracks drain progress for `flush` so a stalled device turns into an error instead of a hang.
struct DrainWatch {
    drained: u64,
    since: Instant,
    limit: Duration,
}

impl DrainWatch {
    fn new(drained: u64, limit: Duration) -> Self {
        Self {
            drained,
            since: Instant::now(),
            limit,
        }
    }

    fn check(&mut self, drained: u64) -> Result<()> {
        if drained != self.drained {
            self.drained = drained;
            self.since = Instant::now();
            return Ok(());
        }
        if self.since.elapsed() >= self.limit {
            return Err(SpeakerError::io(format!(
                "flush stalled: playback made no progress for {:?}",
                self.limit
            )));
        }
        Ok(())
    }
}

/// PCM playback engine bound to one output device.
pub struct Speaker {
    config: SpeakerConfig,
    tuning: PlaybackTuning,
    registry: DeviceRegistry,
    selected_device: String,
    state: Mutex<State>,
}

impl Speaker {
    /// Create a speaker on the process default audio host.
    ///
    /// `device_index` is `-1` for the host default device or a position in
    /// [`Speaker::get_available_devices`].
    pub fn new(
        sample_rate: i32,
        bits_per_sample: i32,
        buffer_size_secs: i32,
        device_index: i32,
    ) -> Result<Self> {
        let config =
            SpeakerConfig::new(sample_rate, bits_per_sample, buffer_size_secs, device_index)?;
        Self::with_registry(config, DeviceRegistry::system(), PlaybackTuning::default())
    }

    /// Create a speaker on an explicit backend.
    pub fn with_backend(
        config: SpeakerConfig,
        backend: Arc<dyn AudioBackend>,
        tuning: PlaybackTuning,
    ) -> Result<Self> {
        Self::with_registry(config, DeviceRegistry::new(backend), tuning)
    }

    pub fn with_registry(
        config: SpeakerConfig,
        registry: DeviceRegistry,
        tuning: PlaybackTuning,
    ) -> Result<Self> {
        let format = StreamFormat {
            sample_rate: config.sample_rate(),
            bits_per_sample: config.bits_per_sample(),
        };
        let device = registry.resolve(config.device_index(), format)?;
        let selected_device = device.name().to_string();
        let shared = Arc::new(Shared::new(config.buffer_capacity_frames(), format)?);

        tracing::info!(
            backend = registry.backend_name(),
            device = %selected_device,
            sample_rate = config.sample_rate(),
            bits_per_sample = config.bits_per_sample().bits(),
            buffer_frames = config.buffer_capacity_frames(),
            "speaker created"
        );

        Ok(Self {
            config,
            tuning,
            registry,
            selected_device,
            state: Mutex::new(State {
                phase: Phase::Stopped,
                shared: Some(shared),
                device: Some(device),
                session: None,
            }),
        })
    }

    /// Names of the output devices on the process default host, in index order.
    pub fn get_available_devices() -> Result<Vec<String>> {
        DeviceRegistry::system().get_available_devices()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.config.sample_rate(),
            bits_per_sample: self.config.bits_per_sample(),
        }
    }

    /// Shared playback state, provided the speaker is started.
    fn started_shared(&self) -> Result<Arc<Shared>> {
        let state = self.state();
        match state.phase {
            Phase::Started => state.shared.clone().ok_or_else(deleted),
            Phase::Stopped => Err(SpeakerError::invalid_state("speaker is not started")),
            Phase::Deleted => Err(deleted()),
        }
    }

    /// Open the device and start the playback thread.
    ///
    /// Returns once the device reports it is playing. Buffered frames and counters from a
    /// previous session are discarded.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state();
        match state.phase {
            Phase::Stopped => {}
            Phase::Started if !state.is_playing() => {
                // The device failed; tear down the dead session and start over.
                if let Some(e) = state.halt() {
                    tracing::warn!(error = %e, "restarting after device failure");
                }
            }
            Phase::Started => {
                return Err(SpeakerError::invalid_state("speaker is already started"));
            }
            Phase::Deleted => return Err(deleted()),
        }
        let shared = state.shared.clone().ok_or_else(deleted)?;
        let mut device = match state.device.take() {
            Some(device) => device,
            None => self.registry.resolve(self.config.device_index(), self.format())?,
        };

        shared.buffer.clear();
        shared.buffer.reopen();
        shared.counters.reset();
        shared.take_failure();

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let mut ctx = PlaybackContext::new(
            Renderer::new(shared.clone()),
            stop.clone(),
            ready_tx,
            self.tuning.clone(),
        );
        let join = thread::Builder::new()
            .name(PLAYBACK_THREAD_NAME.to_string())
            .spawn(move || {
                let result = device.run(&mut ctx);
                ctx.finish(result.clone());
                (device, result)
            })
            .map_err(|e| SpeakerError::io(format!("spawn playback thread: {e}")))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(SpeakerError::io("playback thread exited before start")));
        if let Err(e) = ready {
            stop.store(true, Ordering::Release);
            if let Ok((device, _)) = join.join() {
                state.device = Some(device);
            }
            tracing::warn!(device = %self.selected_device, error = %e, "speaker start failed");
            return Err(e);
        }

        state.session = Some(Session { stop, join });
        state.phase = Phase::Started;
        tracing::info!(device = %self.selected_device, "speaker started");
        Ok(())
    }

    /// Enqueue as many frames of `pcm` as currently fit, without blocking.
    ///
    /// Returns the number of leading frames accepted; the caller retries the rest.
    pub fn write(&self, pcm: &[i32]) -> Result<usize> {
        let shared = self.started_shared()?;
        if pcm.is_empty() {
            return Err(SpeakerError::invalid_argument("pcm must not be empty"));
        }
        shared.check_failure()?;
        Ok(shared.buffer.push(pcm))
    }

    /// Enqueue all of `pcm`, waiting for space as needed, then block until every buffered frame
    /// has been handed to the device.
    ///
    /// Returns the number of frames of `pcm` accepted: `pcm.len()` normally, fewer when a
    /// concurrent [`stop`](Self::stop) interrupts the flush. An empty `pcm` only drains.
    pub fn flush(&self, pcm: &[i32]) -> Result<usize> {
        let shared = self.started_shared()?;
        shared.check_failure()?;
        let buffer = &shared.buffer;
        let poll = self.tuning.poll_interval;
        let mut watch = DrainWatch::new(buffer.drained_total(), self.tuning.flush_stall_timeout);

        let mut written = 0;
        while written < pcm.len() {
            written += buffer.push(&pcm[written..]);
            if written == pcm.len() {
                break;
            }
            match buffer.wait_for_free(poll) {
                WaitStatus::Closed => return self.interrupted(&shared, written),
                WaitStatus::Ready | WaitStatus::TimedOut => watch.check(buffer.drained_total())?,
            }
        }

        loop {
            match buffer.wait_until_empty(poll) {
                WaitStatus::Ready => break,
                WaitStatus::Closed => return self.interrupted(&shared, written),
                WaitStatus::TimedOut => watch.check(buffer.drained_total())?,
            }
        }

        // The pass that took the last frames may still be writing them out; wait for it.
        let passes = &shared.counters.render_passes;
        let seen = passes.load(Ordering::Acquire);
        let deadline = Instant::now() + self.tuning.flush_stall_timeout;
        while passes.load(Ordering::Acquire) <= seen {
            if buffer.wait_for_signal(poll) == WaitStatus::Closed {
                return self.interrupted(&shared, written);
            }
            if Instant::now() >= deadline {
                return Err(SpeakerError::io("flush stalled: playback stopped rendering"));
            }
        }

        shared.check_failure()?;
        tracing::debug!(frames = written, "flush complete");
        Ok(written)
    }

    /// A flush woken by a closed buffer: either the device failed or `stop` was called.
    fn interrupted(&self, shared: &Shared, written: usize) -> Result<usize> {
        shared.check_failure()?;
        tracing::debug!(frames = written, "flush interrupted by stop");
        Ok(written)
    }

    /// Stop the playback thread and release the device stream.
    ///
    /// No frame reaches the device after this returns. Buffered frames are discarded and the
    /// WAV sink, if any, is finalized. A device failure recorded during playback is reported
    /// here as well; the speaker is stopped either way.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state();
        match state.phase {
            Phase::Started => {}
            Phase::Stopped => return Err(SpeakerError::invalid_state("speaker is not started")),
            Phase::Deleted => return Err(deleted()),
        }

        let failure = state.halt();
        let sink = match state.shared.as_ref() {
            Some(shared) => shared.close_sink(),
            None => Ok(()),
        };
        tracing::info!(
            device = %self.selected_device,
            failed = failure.is_some(),
            "speaker stopped"
        );

        match failure {
            Some(e) => Err(e),
            None => sink,
        }
    }

    /// Release the buffer and the device binding, stopping first if needed. Terminal.
    pub fn delete(&self) -> Result<()> {
        let mut state = self.state();
        if state.phase == Phase::Deleted {
            return Err(deleted());
        }
        let (failure, sink) = state.release();
        if let Some(e) = failure {
            tracing::warn!(error = %e, "device failure reported during delete");
        }
        tracing::info!(device = %self.selected_device, "speaker deleted");
        sink
    }

    /// Mirror every frame handed to the device into a mono WAV file at `path`.
    ///
    /// The file and its header are created immediately. A previously active file is finalized
    /// and replaced.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let shared = {
            let state = self.state();
            state.shared.clone().ok_or_else(deleted)?
        };
        let sink = WavSink::create(path, self.config.sample_rate(), self.config.bits_per_sample())?;
        tracing::info!(path = %sink.path().display(), "mirroring playback to wav");

        let previous = shared.sink().replace(sink);
        match previous {
            Some(previous) => previous.finalize().map(|_| ()),
            None => Ok(()),
        }
    }

    /// False once stopped, and also once the device has failed (the playback thread has ended).
    pub fn is_started(&self) -> bool {
        self.state().is_playing()
    }

    /// Name of the output device chosen at construction.
    pub fn selected_device(&self) -> &str {
        &self.selected_device
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.config.bits_per_sample().bits()
    }

    pub fn buffer_size_secs(&self) -> u32 {
        self.config.buffer_size_secs()
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    pub fn status(&self) -> Result<SpeakerStatus> {
        let state = self.state();
        let shared = state.shared.as_ref().ok_or_else(deleted)?;
        let (played_frames, underrun_frames, underrun_events) = snapshot_counters(&shared.counters);
        let file_sink = shared.sink().as_ref().map(|s| s.path().to_path_buf());
        Ok(SpeakerStatus {
            device: self.selected_device.clone(),
            is_started: state.is_playing(),
            buffered_frames: shared.buffer.occupied(),
            buffer_capacity_frames: shared.buffer.capacity(),
            played_frames,
            underrun_frames,
            underrun_events,
            file_sink,
        })
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if state.phase == Phase::Deleted {
            return;
        }
        let (failure, sink) = state.release();
        if let Some(e) = failure {
            tracing::warn!(error = %e, "device failure reported while dropping speaker");
        }
        if let Err(e) = sink {
            tracing::warn!(error = %e, "failed to finalize wav sink while dropping speaker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_watch_resets_on_progress() {
        let mut watch = DrainWatch::new(0, Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(25));
        assert!(watch.check(10).is_ok());
        assert!(watch.check(10).is_ok());
    }

    #[test]
    fn drain_watch_fails_after_limit_without_progress() {
        let mut watch = DrainWatch::new(5, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(15));
        assert!(matches!(watch.check(5), Err(SpeakerError::Io(_))));
    }
}
