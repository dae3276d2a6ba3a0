use std::path::PathBuf;

use clap::{Parser, ValueEnum};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(
    name = "speaker-demo",
    version = VERSION,
    about = "Play a mono PCM WAV file through pcm-speaker"
)]
pub struct Args {
    /// List output devices and exit
    #[arg(long)]
    pub show_audio_devices: bool,

    /// Mono PCM WAV file to play
    #[arg(long, required_unless_present = "show_audio_devices")]
    pub input_wav_path: Option<PathBuf>,

    /// Output device index (-1 selects the default device)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub audio_device_index: i32,

    /// Playback buffer length in seconds
    #[arg(long, default_value_t = 20)]
    pub buffer_size_secs: i32,

    /// Also write everything played to this WAV file
    #[arg(long)]
    pub output_wav_path: Option<PathBuf>,

    /// Audio host to play through
    #[arg(long, value_enum, default_value_t = Backend::Cpal)]
    pub backend: Backend,

    /// Frames rendered per period by the memory backend
    #[arg(long, default_value_t = 512)]
    pub period_frames: usize,

    /// Fail the final flush when playback makes no progress for this many seconds
    #[arg(long, default_value_t = 5.0)]
    pub flush_stall_timeout_secs: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// The platform audio stack
    Cpal,
    /// A headless device that plays in real time without producing sound
    Memory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::parse_from(["speaker-demo", "--input-wav-path", "in.wav"]);
        assert_eq!(args.audio_device_index, -1);
        assert_eq!(args.buffer_size_secs, 20);
        assert_eq!(args.backend, Backend::Cpal);
        assert!(args.output_wav_path.is_none());
    }

    #[test]
    fn input_required_unless_listing_devices() {
        assert!(Args::try_parse_from(["speaker-demo"]).is_err());
        let args = Args::try_parse_from(["speaker-demo", "--show-audio-devices"]).unwrap();
        assert!(args.show_audio_devices);
    }

    #[test]
    fn negative_device_index_and_memory_backend() {
        let args = Args::parse_from([
            "speaker-demo",
            "--input-wav-path",
            "in.wav",
            "--audio-device-index",
            "-1",
            "--backend",
            "memory",
        ]);
        assert_eq!(args.audio_device_index, -1);
        assert_eq!(args.backend, Backend::Memory);
    }
}
