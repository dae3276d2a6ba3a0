//! Speaker demo: plays a mono PCM WAV file through `pcm-speaker`.
//!
//! The file is decoded up front and fed to the speaker with non-blocking `write` calls,
//! retrying whatever did not fit. A final `flush` waits for the device to play the remainder.
//! Ctrl-C stops the speaker, which also cuts a pending flush short.

mod cli;
mod decode;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use pcm_speaker::registry::{self, HostConfig};
use pcm_speaker::{
    DeviceRegistry, MemoryBackend, PlaybackTuning, Speaker, SpeakerConfig, SpeakerError,
};
use tracing_subscriber::EnvFilter;

/// Back-off when the playback buffer is full.
const WRITE_RETRY: Duration = Duration::from_millis(10);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,speaker_demo=info,pcm_speaker=info")
        }))
        .init();

    if args.backend == cli::Backend::Memory {
        let backend = MemoryBackend::new(["Memory output"]).realtime(true);
        registry::init_default(HostConfig::with_backend(Arc::new(backend)))?;
    }

    if args.show_audio_devices {
        for (index, name) in Speaker::get_available_devices()?.iter().enumerate() {
            println!("index: {index}, name: {name}");
        }
        return Ok(());
    }

    let input = args
        .input_wav_path
        .as_deref()
        .ok_or_else(|| anyhow!("--input-wav-path is required"))?;

    println!("pcm-speaker version: {}", pcm_speaker::VERSION);
    let clip = decode::read_mono_wav(input)?;
    tracing::info!(
        sample_rate = clip.sample_rate,
        bits_per_sample = clip.bits_per_sample,
        frames = clip.samples.len(),
        duration_ms = ?clip.duration_ms(),
        "input loaded"
    );

    let config = SpeakerConfig::new(
        i32::try_from(clip.sample_rate).context("sample rate out of range")?,
        i32::try_from(clip.bits_per_sample).context("bits per sample out of range")?,
        args.buffer_size_secs,
        args.audio_device_index,
    )?;
    let tuning = PlaybackTuning {
        period_frames: args.period_frames,
        flush_stall_timeout: Duration::from_secs_f32(args.flush_stall_timeout_secs.max(0.0)),
        ..PlaybackTuning::default()
    };

    println!("Initializing speaker...");
    let speaker = Arc::new(
        Speaker::with_registry(config, DeviceRegistry::system(), tuning)
            .context("failed to initialize speaker")?,
    );
    println!("Selected device: {}.", speaker.selected_device());

    if let Some(path) = &args.output_wav_path {
        speaker
            .write_to_file(path)
            .with_context(|| format!("open output wav {path:?}"))?;
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        let speaker = speaker.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            if speaker.is_started() {
                if let Err(e) = speaker.stop() {
                    tracing::warn!("stop on interrupt: {e}");
                }
            }
        })
        .context("install Ctrl-C handler")?;
    }

    speaker.start().context("failed to start speaker")?;
    println!("Playing audio...");

    let mut written = 0;
    while written < clip.samples.len() && !interrupted.load(Ordering::SeqCst) {
        match unless_interrupted(speaker.write(&clip.samples[written..]), &interrupted)
            .context("failed to write pcm")?
        {
            Some(0) => thread::sleep(WRITE_RETRY),
            Some(n) => written += n,
            None => break,
        }
    }

    if !interrupted.load(Ordering::SeqCst) {
        println!("Waiting for audio to finish...");
        unless_interrupted(speaker.flush(&[]), &interrupted).context("failed to flush pcm")?;
    }

    if !interrupted.load(Ordering::SeqCst) {
        println!("Finished playing audio...");
        unless_interrupted(speaker.stop(), &interrupted).context("failed to stop speaker")?;
    }

    if let Ok(status) = speaker.status() {
        tracing::info!(
            played_frames = status.played_frames,
            underrun_frames = status.underrun_frames,
            underrun_events = status.underrun_events,
            elapsed_ms = ?status.elapsed_ms(speaker.sample_rate()),
            "playback summary"
        );
    }

    println!("Deleting speaker...");
    speaker.delete().context("failed to delete speaker")?;
    Ok(())
}

/// Errors caused by the Ctrl-C handler stopping the speaker mid-call are not failures.
fn unless_interrupted<T>(
    result: std::result::Result<T, SpeakerError>,
    interrupted: &AtomicBool,
) -> std::result::Result<Option<T>, SpeakerError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SpeakerError::InvalidState(_)) if interrupted.load(Ordering::SeqCst) => Ok(None),
        Err(e) => Err(e),
    }
}
