use crate::capture::{AudioInput, InputStream};
use crate::error::{ClientError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use std::sync::mpsc::{sync_channel, Receiver};

pub const DEFAULT_SAMPLE_RATE: u32 = 16000;
const RAW_QUEUE_DEPTH: usize = 256;

/// Default or named cpal input device, captured as mono 16-bit PCM at
/// `target_rate`.
pub struct Microphone {
    device_name: Option<String>,
    target_rate: u32,
}

impl Microphone {
    pub fn new(device_name: &str, target_rate: u32) -> Self {
        let device_name = device_name.trim();
        Self {
            device_name: (!device_name.is_empty()).then(|| device_name.to_string()),
            target_rate: if target_rate == 0 {
                DEFAULT_SAMPLE_RATE
            } else {
                target_rate
            },
        }
    }
}

pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            log::warn!("[audio] failed to list devices: {}", e);
            Vec::new()
        }
    }
}

pub struct MicStream {
    stream: cpal::Stream,
    raw_rx: Receiver<Vec<f32>>,
    target_rate: u32,
    converter: RateConverter,
}

impl AudioInput for Microphone {
    type Stream = MicStream;

    fn open(&mut self) -> Result<MicStream> {
        let host = cpal::default_host();

        let device = if let Some(name) = self.device_name.as_deref() {
            host.input_devices()
                .map_err(|e| ClientError::Permission(format!("failed to list devices: {}", e)))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| ClientError::Permission(format!("device '{}' not found", name)))?
        } else {
            host.default_input_device()
                .ok_or_else(|| ClientError::Permission("no default input device".into()))?
        };

        let device_name = device.name().unwrap_or_else(|_| "unknown".into());
        log::info!("[audio] using device: {}", device_name);

        let config = pick_config(&device, self.target_rate)?;
        log::debug!(
            "[audio] stream config: {}Hz, {}ch, recording at {}Hz",
            config.sample_rate.0,
            config.channels,
            self.target_rate
        );

        let (raw_tx, raw_rx) = sync_channel::<Vec<f32>>(RAW_QUEUE_DEPTH);
        let channels = config.channels.max(1) as usize;
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = if channels > 1 {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect()
                    } else {
                        data.to_vec()
                    };
                    let _ = raw_tx.try_send(mono);
                },
                |err| {
                    log::error!("[audio] stream error: {}", err);
                },
                None,
            )
            .map_err(|e| ClientError::Permission(format!("failed to open microphone: {}", e)))?;

        stream
            .play()
            .map_err(|e| ClientError::Device(format!("failed to start stream: {}", e)))?;

        Ok(MicStream {
            stream,
            raw_rx,
            target_rate: self.target_rate,
            converter: RateConverter::new(config.sample_rate.0, self.target_rate),
        })
    }
}

impl MicStream {
    fn drain_raw(&mut self) -> Vec<Vec<i16>> {
        let mut out = Vec::new();
        while let Ok(mono) = self.raw_rx.try_recv() {
            out.push(self.converter.convert(&mono));
        }
        out
    }
}

impl InputStream for MicStream {
    fn sample_rate(&self) -> u32 {
        self.target_rate
    }

    fn take_chunks(&mut self) -> Vec<Vec<i16>> {
        self.drain_raw()
    }

    fn finish(mut self) -> Vec<Vec<i16>> {
        if let Err(e) = self.stream.pause() {
            log::debug!("[audio] pause on stop failed: {}", e);
        }
        let remaining = self.drain_raw();
        // Dropping the cpal stream releases the device.
        drop(self);
        remaining
    }
}

/// An f32 input config at the recording rate with the fewest channels, or
/// the device default when no range covers that rate.
fn pick_config(device: &cpal::Device, rate: u32) -> Result<StreamConfig> {
    let exact = device
        .supported_input_configs()
        .map_err(|e| ClientError::Permission(format!("no input config: {}", e)))?
        .filter(|range| range.sample_format() == SampleFormat::F32)
        .filter(|range| range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0)
        .min_by_key(|range| range.channels());
    if let Some(range) = exact {
        return Ok(range.with_sample_rate(SampleRate(rate)).config());
    }
    let default = device
        .default_input_config()
        .map_err(|e| ClientError::Permission(format!("no input config: {}", e)))?;
    log::debug!(
        "[audio] {}Hz unsupported, converting from {}Hz",
        rate,
        default.sample_rate().0
    );
    Ok(default.config())
}

fn pcm16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Linear interpolation from the device rate to the recording rate. The
/// last input sample and the output phase carry over between callback
/// chunks, so chunk boundaries do not click.
struct RateConverter {
    /// Input samples advanced per output sample.
    step: f64,
    /// Position of the next output sample between `prev` and the next input.
    phase: f64,
    prev: Option<f32>,
}

impl RateConverter {
    fn new(input_rate: u32, output_rate: u32) -> Self {
        let step = if input_rate == 0 || output_rate == 0 {
            1.0
        } else {
            input_rate as f64 / output_rate as f64
        };
        Self {
            step,
            phase: 0.0,
            prev: None,
        }
    }

    fn convert(&mut self, input: &[f32]) -> Vec<i16> {
        if self.step == 1.0 {
            return input.iter().map(|&s| pcm16(s)).collect();
        }
        let mut out = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        for &next in input {
            let Some(prev) = self.prev.replace(next) else {
                continue;
            };
            while self.phase < 1.0 {
                out.push(pcm16(prev + (next - prev) * self.phase as f32));
                self.phase += self.step;
            }
            self.phase -= 1.0;
        }
        out
    }
}

/// Wrap mono 16-bit PCM in a canonical 44-byte RIFF/WAVE header.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    if sample_rate == 0 {
        return Err(ClientError::Encoding("sample rate is zero".into()));
    }
    let data_len = samples
        .len()
        .checked_mul(2)
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n <= u32::MAX - 36)
        .ok_or_else(|| ClientError::Encoding("recording too long for WAV".into()))?;

    let channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * block_align as u32;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    Ok(out)
}
