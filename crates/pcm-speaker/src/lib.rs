//! Bounded-latency PCM playback into an audio output device.
//!
//! Applications push mono frames into a [`Speaker`]; a playback thread drains them into the
//! device through a fixed-capacity circular buffer.

pub mod backend;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod render;
pub mod sink;
pub mod status;

pub use backend::{CpalBackend, MemoryBackend};
pub use config::{BitsPerSample, DEFAULT_DEVICE_INDEX, PlaybackTuning, SpeakerConfig};
pub use engine::{Speaker, VERSION};
pub use error::{Result, SpeakerError};
pub use registry::{AudioBackend, DeviceInfo, DeviceRegistry, HostConfig, OutputDevice};
pub use status::SpeakerStatus;
