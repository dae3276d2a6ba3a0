//! Platform audio output through CPAL.
//!
//! Devices are looked up fresh from the host on every call. Playing a device builds a CPAL output
//! stream on the speaker's playback thread; the real-time callback:
//! - renders mono frames from the speaker's buffer without waiting on producers, into scratch
//!   storage sized before the stream starts (large device buffers are rendered in blocks)
//! - converts them from the configured bit depth to the device sample format
//! - duplicates the mono signal across every device channel

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::time::Duration;

use crate::error::{Result, SpeakerError};
use crate::registry::{
    AudioBackend, DeviceInfo, DeviceSelection, OutputDevice, PlaybackContext, StreamFormat,
};
use crate::render::Renderer;

/// Lower bound on how often the playback thread wakes to check for stop/errors.
const MIN_STREAM_POLL: Duration = Duration::from_millis(10);

/// Scratch frames per render block when the host picks the buffer size.
const DEFAULT_SCRATCH_FRAMES: usize = 8192;

/// CPAL host backend.
#[derive(Clone, Debug)]
pub struct CpalBackend {
    host_id: cpal::HostId,
}

impl CpalBackend {
    /// Backend over the platform default host.
    pub fn new() -> Self {
        Self {
            host_id: cpal::default_host().id(),
        }
    }

    fn host(&self) -> Result<cpal::Host> {
        cpal::host_from_id(self.host_id)
            .map_err(|e| SpeakerError::device_unavailable(format!("audio host: {e}")))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = self.host()?;
        let devices = host
            .output_devices()
            .map_err(|e| SpeakerError::io(format!("enumerate output devices: {e}")))?;
        Ok(devices
            .enumerate()
            .map(|(index, d)| DeviceInfo {
                index,
                name: device_name(&d).unwrap_or_else(|| format!("Output device {index}")),
            })
            .collect())
    }

    fn resolve(
        &self,
        selection: DeviceSelection,
        format: StreamFormat,
    ) -> Result<Box<dyn OutputDevice>> {
        let host = self.host()?;
        let (device, name) = match selection {
            DeviceSelection::Default => {
                let device = host
                    .default_output_device()
                    .ok_or_else(|| SpeakerError::device_unavailable("no default output device"))?;
                let name =
                    device_name(&device).unwrap_or_else(|| "Default output device".to_string());
                (device, name)
            }
            DeviceSelection::Index(index) => {
                let device = host
                    .output_devices()
                    .map_err(|e| {
                        SpeakerError::device_unavailable(format!("enumerate output devices: {e}"))
                    })?
                    .nth(index)
                    .ok_or_else(|| {
                        SpeakerError::device_unavailable(format!(
                            "no output device at index {index}"
                        ))
                    })?;
                let name = device_name(&device).unwrap_or_else(|| format!("Output device {index}"));
                (device, name)
            }
        };

        let (config, sample_format) = pick_output_config(&device, format.sample_rate)
            .map_err(|e| SpeakerError::device_unavailable(format!("{name}: {e}")))?;
        tracing::debug!(
            device = %name,
            channels = config.channels,
            rate_hz = config.sample_rate,
            ?sample_format,
            "cpal output config"
        );

        Ok(Box::new(CpalOutput {
            device,
            name,
            config,
            sample_format,
        }))
    }
}

fn device_name(device: &cpal::Device) -> Option<String> {
    device
        .description()
        .ok()
        .map(|d| d.name().trim().to_string())
        .filter(|n| !n.is_empty())
}

/// Choose a stream config that plays `sample_rate` exactly.
///
/// Among ranges containing the rate, prefers the fewest channels (mono first), then the best
/// sample format by [`sample_format_rank`].
fn pick_output_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> std::result::Result<(cpal::StreamConfig, cpal::SampleFormat), String> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| e.to_string())?
        .collect();
    if ranges.is_empty() {
        return Err("no supported output configs".to_string());
    }

    let best = ranges
        .into_iter()
        .filter(|r| r.min_sample_rate() <= sample_rate && sample_rate <= r.max_sample_rate())
        .filter(|r| sample_format_rank(r.sample_format()) < UNSUPPORTED_RANK)
        .min_by_key(|r| (r.channels(), sample_format_rank(r.sample_format())))
        .ok_or_else(|| format!("sample rate {sample_rate} Hz not supported"))?;

    let supported = best.with_sample_rate(sample_rate);
    let sample_format = supported.sample_format();
    Ok((supported.into(), sample_format))
}

const UNSUPPORTED_RANK: u8 = 10;

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        cpal::SampleFormat::I8 => 4,
        cpal::SampleFormat::U8 => 5,
        _ => UNSUPPORTED_RANK,
    }
}

struct CpalOutput {
    device: cpal::Device,
    name: String,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
}

impl OutputDevice for CpalOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut PlaybackContext) -> Result<()> {
        let (err_tx, err_rx) = crossbeam_channel::bounded::<String>(4);
        let stream = build_output_stream(
            &self.device,
            &self.config,
            self.sample_format,
            ctx.renderer().clone(),
            err_tx,
        )
        .map_err(|e| SpeakerError::device_unavailable(format!("{}: {e}", self.name)))?;
        stream
            .play()
            .map_err(|e| SpeakerError::device_unavailable(format!("{}: {e}", self.name)))?;

        ctx.mark_started();
        tracing::info!(
            device = %self.name,
            channels = self.config.channels,
            rate_hz = self.config.sample_rate,
            "playback stream started"
        );

        let poll = ctx.poll_interval().max(MIN_STREAM_POLL);
        let result = loop {
            if ctx.should_stop() {
                break Ok(());
            }
            match err_rx.recv_timeout(poll) {
                Ok(msg) => break Err(SpeakerError::io(format!("{}: {msg}", self.name))),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(SpeakerError::io(format!("{}: stream closed", self.name)));
                }
            }
        };

        // Dropping the stream stops the callback before the speaker reports `stop`.
        drop(stream);
        result
    }
}

/// Build a CPAL output stream that plays frames pulled from `renderer`.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    renderer: Renderer,
    errors: Sender<String>,
) -> std::result::Result<cpal::Stream, String> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, renderer, errors),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, renderer, errors),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, renderer, errors),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, renderer, errors),
        cpal::SampleFormat::I8 => build_stream::<i8>(device, config, renderer, errors),
        cpal::SampleFormat::U8 => build_stream::<u8>(device, config, renderer, errors),
        other => Err(format!("unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: Renderer,
    errors: Sender<String>,
) -> std::result::Result<cpal::Stream, String>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = usize::from(config.channels).max(1);
    let bits = renderer.format().bits_per_sample;
    let mut mono = vec![0i32; scratch_frames(&config.buffer_size)];

    let err_fn = move |err: cpal::StreamError| match err {
        cpal::StreamError::DeviceNotAvailable => {
            let _ = errors.try_send(err.to_string());
        }
        other => tracing::warn!("stream error: {other}"),
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for block in data.chunks_mut(channels * mono.len()) {
                    let scratch = &mut mono[..block.len() / channels];
                    renderer.render(scratch);

                    for (frame, &sample) in block.chunks_mut(channels).zip(scratch.iter()) {
                        frame.fill(<T as cpal::Sample>::from_sample::<f32>(bits.to_f32(sample)));
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| e.to_string())
}

fn scratch_frames(buffer_size: &cpal::BufferSize) -> usize {
    match buffer_size {
        cpal::BufferSize::Fixed(frames) => (*frames as usize).max(1),
        cpal::BufferSize::Default => DEFAULT_SCRATCH_FRAMES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_format_rank_prefers_float_then_wide_ints() {
        use cpal::SampleFormat::{F32, F64, I16, I32, U8};
        assert!(sample_format_rank(F32) < sample_format_rank(I32));
        assert!(sample_format_rank(I32) < sample_format_rank(I16));
        assert!(sample_format_rank(I16) < sample_format_rank(U8));
        assert_eq!(sample_format_rank(F64), UNSUPPORTED_RANK);
    }

    #[test]
    fn scratch_follows_fixed_buffer_size() {
        assert_eq!(scratch_frames(&cpal::BufferSize::Fixed(256)), 256);
        assert_eq!(scratch_frames(&cpal::BufferSize::Fixed(0)), 1);
        assert_eq!(scratch_frames(&cpal::BufferSize::Default), DEFAULT_SCRATCH_FRAMES);
    }

    #[test]
    #[ignore = "requires an audio output device"]
    fn default_host_lists_named_devices() {
        let backend = CpalBackend::new();
        for device in backend.output_devices().unwrap() {
            assert!(!device.name.is_empty());
        }
    }
}
