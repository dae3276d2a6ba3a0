//! Headless output backend.
//!
//! Devices render period-sized chunks on the playback thread and record every real frame they
//! receive, so playback can run (and be inspected) without audio hardware. Optional knobs:
//! - realtime pacing (sleep one period per render, like a sound card would)
//! - an injected failure after N frames, or on open, to exercise error paths
//! - a stall after N frames (the device keeps running but stops pulling audio)

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::error::{Result, SpeakerError};
use crate::registry::{
    AudioBackend, DeviceInfo, DeviceSelection, OutputDevice, PlaybackContext, StreamFormat,
};

/// In-memory audio host.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    devices: Mutex<Vec<String>>,
    captured: Mutex<Vec<i32>>,
    options: Mutex<MemoryOptions>,
}

#[derive(Clone, Copy, Default)]
struct MemoryOptions {
    realtime: bool,
    fail_after_frames: Option<u64>,
    fail_on_start: bool,
    stall_after_frames: Option<u64>,
    supported_rates: Option<(u32, u32)>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryBackend {
    /// Backend exposing `names` as output devices; the first one is the default.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::default();
        backend.set_devices(names);
        backend
    }

    /// Replace the device list (simulates hot-plug).
    pub fn set_devices<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.inner.devices) = names.into_iter().map(Into::into).collect();
    }

    /// Sleep one period per render pass instead of rendering as fast as possible.
    pub fn realtime(self, realtime: bool) -> Self {
        lock(&self.inner.options).realtime = realtime;
        self
    }

    /// Make playing devices fail once they have consumed `frames` real frames.
    pub fn fail_after_frames(self, frames: u64) -> Self {
        lock(&self.inner.options).fail_after_frames = Some(frames);
        self
    }

    /// Make devices fail when playback starts.
    pub fn fail_on_start(self, fail: bool) -> Self {
        lock(&self.inner.options).fail_on_start = fail;
        self
    }

    /// Make playing devices stop consuming frames once they have consumed `frames`.
    pub fn stall_after_frames(self, frames: u64) -> Self {
        lock(&self.inner.options).stall_after_frames = Some(frames);
        self
    }

    /// Restrict the sample rates devices accept (inclusive range).
    pub fn supported_rates(self, min: u32, max: u32) -> Self {
        lock(&self.inner.options).supported_rates = Some((min, max));
        self
    }

    /// Every real frame delivered to any device of this backend, in playback order.
    pub fn captured(&self) -> Vec<i32> {
        lock(&self.inner.captured).clone()
    }

}

impl AudioBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(lock(&self.inner.devices)
            .iter()
            .enumerate()
            .map(|(index, name)| DeviceInfo {
                index,
                name: name.clone(),
            })
            .collect())
    }

    fn resolve(
        &self,
        selection: DeviceSelection,
        format: StreamFormat,
    ) -> Result<Box<dyn OutputDevice>> {
        let devices = lock(&self.inner.devices);
        let name = match selection {
            DeviceSelection::Default => devices.first(),
            DeviceSelection::Index(i) => devices.get(i),
        }
        .cloned()
        .ok_or_else(|| {
            SpeakerError::device_unavailable(format!("no output device for {selection:?}"))
        })?;

        if let Some((min, max)) = lock(&self.inner.options).supported_rates {
            if format.sample_rate < min || format.sample_rate > max {
                return Err(SpeakerError::device_unavailable(format!(
                    "{name} does not support {} Hz",
                    format.sample_rate
                )));
            }
        }

        Ok(Box::new(MemoryDevice {
            name,
            backend: self.inner.clone(),
        }))
    }
}

struct MemoryDevice {
    name: String,
    backend: Arc<MemoryInner>,
}

impl OutputDevice for MemoryDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut PlaybackContext) -> Result<()> {
        let options = *lock(&self.backend.options);
        if options.fail_on_start {
            return Err(SpeakerError::device_unavailable(format!(
                "{} refused to start",
                self.name
            )));
        }

        let renderer = ctx.renderer().clone();
        let sample_rate = renderer.format().sample_rate.max(1);
        let mut period = vec![0i32; ctx.period_frames()];
        let pace = if options.realtime {
            Duration::from_secs_f64(period.len() as f64 / f64::from(sample_rate))
        } else {
            Duration::from_micros(200)
        };
        let mut consumed = 0u64;

        ctx.mark_started();
        tracing::debug!(device = %self.name, realtime = options.realtime, "memory device running");

        while !ctx.should_stop() {
            if let Some(limit) = options.fail_after_frames {
                if consumed >= limit {
                    return Err(SpeakerError::io(format!("{} disconnected", self.name)));
                }
            }
            if options.stall_after_frames.is_some_and(|limit| consumed >= limit) {
                thread::sleep(ctx.poll_interval());
                continue;
            }

            let filled = renderer.render(&mut period);
            if filled > 0 {
                lock(&self.backend.captured).extend_from_slice(&period[..filled]);
                consumed += filled as u64;
            }
            thread::sleep(pace);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BitsPerSample;

    fn format(sample_rate: u32) -> StreamFormat {
        StreamFormat {
            sample_rate,
            bits_per_sample: BitsPerSample::Sixteen,
        }
    }

    #[test]
    fn default_is_first_device() {
        let backend = MemoryBackend::new(["A", "B"]);
        let device = backend.resolve(DeviceSelection::Default, format(16_000)).unwrap();
        assert_eq!(device.name(), "A");
    }

    #[test]
    fn no_devices_means_no_default() {
        let backend = MemoryBackend::new(Vec::<String>::new());
        assert!(matches!(
            backend.resolve(DeviceSelection::Default, format(16_000)),
            Err(SpeakerError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn unsupported_rate_is_rejected() {
        let backend = MemoryBackend::new(["A"]).supported_rates(44_100, 48_000);
        assert!(backend.resolve(DeviceSelection::Index(0), format(48_000)).is_ok());
        assert!(matches!(
            backend.resolve(DeviceSelection::Index(0), format(16_000)),
            Err(SpeakerError::DeviceUnavailable(_))
        ));
    }
}
