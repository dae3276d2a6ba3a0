//! Output device discovery and selection.
//!
//! The host audio subsystem sits behind [`AudioBackend`]. A [`DeviceRegistry`] wraps one backend
//! and provides:
//! - live enumeration of output devices (no caching, so hot-plugged devices show up)
//! - resolution of a device index (`-1` = host default) into an [`OutputDevice`] handle
//!
//! The process-wide default backend is installed explicitly with [`init_default`]; without it
//! the CPAL host is used.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::backend::CpalBackend;
use crate::config::{BitsPerSample, DEFAULT_DEVICE_INDEX, PlaybackTuning};
use crate::error::{Result, SpeakerError};
use crate::render::Renderer;

/// Lightweight output device metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Position in the backend's enumeration order.
    pub index: usize,
    pub name: String,
}

/// Which device a speaker should bind to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceSelection {
    /// The host's default output device.
    Default,
    /// Device at this enumeration index.
    Index(usize),
}

impl TryFrom<i32> for DeviceSelection {
    type Error = SpeakerError;

    fn try_from(index: i32) -> Result<Self> {
        if index == DEFAULT_DEVICE_INDEX {
            return Ok(Self::Default);
        }
        usize::try_from(index).map(Self::Index).map_err(|_| {
            SpeakerError::invalid_argument(format!(
                "device_index must be -1 (default) or a device index (got {index})"
            ))
        })
    }
}

/// Fixed output format negotiated once per speaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub bits_per_sample: BitsPerSample,
}

/// Host audio subsystem.
pub trait AudioBackend: Send + Sync {
    /// Short backend label for logs.
    fn name(&self) -> &'static str;

    /// Enumerate output devices, queried live.
    fn output_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Resolve `selection` into a device able to play `format`.
    ///
    /// Fails with [`SpeakerError::DeviceUnavailable`] when the device does not exist or cannot
    /// accept the format.
    fn resolve(
        &self,
        selection: DeviceSelection,
        format: StreamFormat,
    ) -> Result<Box<dyn OutputDevice>>;
}

/// A resolved output device.
///
/// `run` is called on the speaker's playback thread and must block until
/// [`PlaybackContext::should_stop`] turns true or the device fails. Frames are obtained through
/// [`PlaybackContext::renderer`] at whatever cadence the device requires.
pub trait OutputDevice: Send {
    fn name(&self) -> &str;

    fn run(&mut self, ctx: &mut PlaybackContext) -> Result<()>;
}

/// Everything a device needs while it plays.
pub struct PlaybackContext {
    renderer: Renderer,
    stop: Arc<AtomicBool>,
    ready: Option<Sender<Result<()>>>,
    tuning: PlaybackTuning,
}

impl PlaybackContext {
    pub(crate) fn new(
        renderer: Renderer,
        stop: Arc<AtomicBool>,
        ready: Sender<Result<()>>,
        tuning: PlaybackTuning,
    ) -> Self {
        Self {
            renderer,
            stop,
            ready: Some(ready),
            tuning,
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Interval at which `run` should re-check [`should_stop`](Self::should_stop).
    pub fn poll_interval(&self) -> Duration {
        self.tuning.poll_interval
    }

    /// Frames per period for devices that pace themselves.
    pub fn period_frames(&self) -> usize {
        self.tuning.period_frames.max(1)
    }

    /// Report that the device is actively playing. `Speaker::start` returns once this is called
    /// (or once `run` fails).
    pub fn mark_started(&mut self) {
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Route the outcome of `run` either to the waiting `start` call or to the speaker's
    /// failure slot.
    pub(crate) fn finish(&mut self, result: Result<()>) {
        match self.ready.take() {
            Some(tx) => {
                let outcome = match result {
                    Ok(()) => Err(SpeakerError::io("device exited before playback started")),
                    Err(e) => Err(e),
                };
                let _ = tx.send(outcome);
            }
            None => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "playback device failed");
                    self.renderer.fail(e);
                }
            }
        }
    }
}

/// Enumerates and resolves output devices through one backend.
#[derive(Clone)]
pub struct DeviceRegistry {
    backend: Arc<dyn AudioBackend>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self { backend }
    }

    /// Registry over the process default backend (see [`init_default`]).
    pub fn system() -> Self {
        Self::new(default_host().backend.clone())
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Output devices with their indices.
    pub fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.backend.output_devices()
    }

    /// Names of available output devices in index order. May be empty.
    pub fn get_available_devices(&self) -> Result<Vec<String>> {
        Ok(self
            .devices()?
            .into_iter()
            .map(|d| d.name)
            .collect())
    }

    /// Resolve `device_index` (`-1` = default) into a device able to play `format`.
    pub fn resolve(
        &self,
        device_index: i32,
        format: StreamFormat,
    ) -> Result<Box<dyn OutputDevice>> {
        let selection = DeviceSelection::try_from(device_index)?;
        if let DeviceSelection::Index(index) = selection {
            let count = self.devices()?.len();
            if index >= count {
                return Err(SpeakerError::device_unavailable(format!(
                    "device index {index} out of range ({count} output devices)"
                )));
            }
        }
        let device = self.backend.resolve(selection, format)?;
        tracing::debug!(
            backend = self.backend.name(),
            device = device.name(),
            ?selection,
            "output device resolved"
        );
        Ok(device)
    }

    /// The host default output device.
    pub fn default_device(&self, format: StreamFormat) -> Result<Box<dyn OutputDevice>> {
        self.resolve(DEFAULT_DEVICE_INDEX, format)
    }
}

/// Process-wide audio host configuration.
#[derive(Clone)]
pub struct HostConfig {
    pub backend: Arc<dyn AudioBackend>,
}

impl HostConfig {
    /// The platform audio stack through CPAL.
    pub fn cpal() -> Self {
        Self {
            backend: Arc::new(CpalBackend::new()),
        }
    }

    pub fn with_backend(backend: Arc<dyn AudioBackend>) -> Self {
        Self { backend }
    }
}

static DEFAULT_HOST: OnceLock<HostConfig> = OnceLock::new();

/// Install the process default host. Only the first call succeeds; later calls, or a call made
/// after the default was already used, fail with [`SpeakerError::InvalidState`].
pub fn init_default(config: HostConfig) -> Result<()> {
    let backend = config.backend.name();
    DEFAULT_HOST.set(config).map_err(|_| {
        SpeakerError::invalid_state("default audio host already initialized")
    })?;
    tracing::info!(backend, "default audio host initialized");
    Ok(())
}

/// The process default host, initializing it with CPAL if nothing was installed.
pub fn default_host() -> &'static HostConfig {
    DEFAULT_HOST.get_or_init(HostConfig::cpal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn format() -> StreamFormat {
        StreamFormat {
            sample_rate: 16_000,
            bits_per_sample: BitsPerSample::Sixteen,
        }
    }

    #[test]
    fn selection_from_index() {
        assert_eq!(DeviceSelection::try_from(-1).unwrap(), DeviceSelection::Default);
        assert_eq!(DeviceSelection::try_from(3).unwrap(), DeviceSelection::Index(3));
        assert!(matches!(
            DeviceSelection::try_from(-2),
            Err(SpeakerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn available_devices_follow_backend_order() {
        let backend = MemoryBackend::new(["Speakers", "Headphones"]);
        let registry = DeviceRegistry::new(Arc::new(backend));
        assert_eq!(
            registry.get_available_devices().unwrap(),
            vec!["Speakers".to_string(), "Headphones".to_string()]
        );
    }

    #[test]
    fn resolve_default_and_index() {
        let backend = MemoryBackend::new(["Speakers", "Headphones"]);
        let registry = DeviceRegistry::new(Arc::new(backend));
        assert_eq!(registry.resolve(-1, format()).unwrap().name(), "Speakers");
        assert_eq!(registry.resolve(1, format()).unwrap().name(), "Headphones");
        assert_eq!(registry.default_device(format()).unwrap().name(), "Speakers");
    }

    #[test]
    fn resolve_out_of_range_is_unavailable() {
        let registry = DeviceRegistry::new(Arc::new(MemoryBackend::new(["Speakers"])));
        assert!(matches!(
            registry.resolve(500, format()),
            Err(SpeakerError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn enumeration_is_live() {
        let backend = MemoryBackend::new(["Speakers"]);
        let registry = DeviceRegistry::new(Arc::new(backend.clone()));
        assert_eq!(registry.devices().unwrap().len(), 1);

        backend.set_devices(["Speakers", "USB DAC"]);
        let devices = registry.devices().unwrap();
        assert_eq!(
            devices.last(),
            Some(&DeviceInfo {
                index: 1,
                name: "USB DAC".to_string()
            })
        );
    }
}
