use std::sync::Arc;

use pcm_speaker::registry::{self, HostConfig};
use pcm_speaker::{MemoryBackend, Speaker, SpeakerError};

// The default host is process-wide, so everything touching it lives in one test.
#[test]
fn default_host_is_installed_once() {
    let backend = MemoryBackend::new(["Loopback"]);
    registry::init_default(HostConfig::with_backend(Arc::new(backend.clone()))).unwrap();

    let again =
        registry::init_default(HostConfig::with_backend(Arc::new(MemoryBackend::default())));
    assert!(matches!(again, Err(SpeakerError::InvalidState(_))));

    assert_eq!(Speaker::get_available_devices().unwrap(), vec!["Loopback".to_string()]);

    let speaker = Speaker::new(16_000, 16, 1, -1).unwrap();
    assert_eq!(speaker.selected_device(), "Loopback");
    speaker.start().unwrap();
    assert_eq!(speaker.flush(&[1, 2, 3]).unwrap(), 3);
    speaker.stop().unwrap();
    assert_eq!(backend.captured(), vec![1, 2, 3]);
}
