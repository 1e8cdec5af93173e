use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::{start_with_fallback, CaptureError, FrameSource};
use crate::audio::Frame;

/// Blocks buffered between the audio callback and the analysis loop.
const QUEUE_BLOCKS: usize = 256;

struct ActiveStream {
    _stream: Stream,
    blocks: Receiver<Vec<f32>>,
    overrun: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    sample_rate: u32,
}

/// Live microphone input. Each frame holds freshly captured audio: whatever
/// arrived while the loop was idle is discarded before reading.
pub struct DeviceSource {
    selector: Option<String>,
    sample_rate: u32,
    frame_len: usize,
    read_timeout: Duration,
    active: Option<ActiveStream>,
    pending: Vec<f32>,
}

impl DeviceSource {
    /// Open the device whose name contains `selector` at `sample_rate`,
    /// falling back to the default input device when it is missing or fails
    /// to start.
    pub fn open(
        selector: Option<&str>,
        sample_rate: u32,
        frame_len: usize,
        read_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        let mut source = Self {
            selector: selector.map(str::to_string),
            sample_rate,
            frame_len: frame_len.max(1),
            read_timeout,
            active: None,
            pending: Vec::with_capacity(frame_len),
        };
        source.reopen()?;
        Ok(source)
    }

    fn find_selected(&self, host: &Host) -> Result<Option<Device>, CaptureError> {
        let Some(selector) = self.selector.as_deref() else {
            return Ok(None);
        };
        let found = host
            .input_devices()
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n.contains(selector)).unwrap_or(false));
        if found.is_none() {
            log::warn!("Input device '{}' not found, falling back to default", selector);
        }
        Ok(found)
    }

    /// The configured rate when the device supports it, else its default.
    fn stream_config(device: &Device, sample_rate: u32) -> Result<SupportedStreamConfig, CaptureError> {
        let wanted = SampleRate(sample_rate);
        let supported = device
            .supported_input_configs()
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?
            .filter(|range| {
                matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
            })
            .find(|range| range.min_sample_rate() <= wanted && wanted <= range.max_sample_rate());
        match supported {
            Some(range) => Ok(range.with_sample_rate(wanted)),
            None => {
                log::warn!("Device does not support {} Hz, using its default rate", sample_rate);
                device
                    .default_input_config()
                    .map_err(|e| CaptureError::Unavailable(e.to_string()))
            }
        }
    }

    fn start(device: &Device, sample_rate: u32) -> Result<ActiveStream, CaptureError> {
        let supported = Self::stream_config(device, sample_rate)?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let channels = config.channels as usize;

        let (tx, rx) = crossbeam_channel::bounded(QUEUE_BLOCKS);
        let overrun = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));

        let on_error = {
            let failed = failed.clone();
            move |err: cpal::StreamError| {
                log::error!("Audio stream error: {}", err);
                failed.store(true, Ordering::Relaxed);
            }
        };

        let stream = match sample_format {
            SampleFormat::F32 => {
                let sink = BlockSink::new(tx, overrun.clone(), channels);
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        sink.deliver(data.iter().copied())
                    },
                    on_error,
                    None,
                )
            }
            SampleFormat::I16 => {
                let sink = BlockSink::new(tx, overrun.clone(), channels);
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        sink.deliver(data.iter().map(|&s| s as f32 / i16::MAX as f32))
                    },
                    on_error,
                    None,
                )
            }
            SampleFormat::U16 => {
                let sink = BlockSink::new(tx, overrun.clone(), channels);
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        sink.deliver(data.iter().map(|&s| (s as f32 - 32_768.0) / 32_768.0))
                    },
                    on_error,
                    None,
                )
            }
            other => {
                return Err(CaptureError::Unavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| CaptureError::Unavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?;

        log::info!(
            "Capturing from '{}' ({} Hz, {} channels)",
            device.name().unwrap_or_else(|_| "unknown".into()),
            config.sample_rate.0,
            channels
        );

        Ok(ActiveStream {
            _stream: stream,
            blocks: rx,
            overrun,
            failed,
            sample_rate: config.sample_rate.0,
        })
    }
}

/// Callback side: downmix to mono and hand the block over without blocking.
struct BlockSink {
    tx: Sender<Vec<f32>>,
    overrun: Arc<AtomicBool>,
    channels: usize,
}

impl BlockSink {
    fn new(tx: Sender<Vec<f32>>, overrun: Arc<AtomicBool>, channels: usize) -> Self {
        Self {
            tx,
            overrun,
            channels: channels.max(1),
        }
    }

    fn deliver(&self, samples: impl Iterator<Item = f32>) {
        let interleaved: Vec<f32> = samples.collect();
        let mono: Vec<f32> = if self.channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(self.channels)
                .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
                .collect()
        };
        if let Err(TrySendError::Full(_)) = self.tx.try_send(mono) {
            self.overrun.store(true, Ordering::Relaxed);
        }
    }
}

impl FrameSource for DeviceSource {
    fn sample_rate(&self) -> u32 {
        self.active.as_ref().map_or(0, |a| a.sample_rate)
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| CaptureError::Unavailable("stream not open".into()))?;
        if active.failed.load(Ordering::Relaxed) {
            return Err(CaptureError::Unavailable("stream failed".into()));
        }

        // Start from fresh audio
        while active.blocks.try_recv().is_ok() {}
        active.overrun.store(false, Ordering::Relaxed);
        self.pending.clear();

        let deadline = Instant::now() + self.read_timeout;
        while self.pending.len() < self.frame_len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match active.blocks.recv_timeout(remaining) {
                Ok(block) => self.pending.extend_from_slice(&block),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CaptureError::Timeout(self.read_timeout))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::Unavailable("stream closed".into()))
                }
            }
            if active.overrun.swap(false, Ordering::Relaxed) {
                return Err(CaptureError::Overrun);
            }
        }

        let samples: Vec<f32> = self.pending.drain(..self.frame_len).collect();
        Ok(Frame::new(samples, active.sample_rate))
    }

    fn reopen(&mut self) -> Result<(), CaptureError> {
        self.active = None;
        let host = cpal::default_host();
        let selected = self.find_selected(&host)?;
        let sample_rate = self.sample_rate;
        let stream = start_with_fallback(
            selected,
            || host.default_input_device(),
            |device| Self::start(device, sample_rate),
        )?;
        self.active = Some(stream);
        Ok(())
    }
}
