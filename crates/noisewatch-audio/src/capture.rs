use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use noisewatch_foundation::AudioError;
use noisewatch_level::constants;

use crate::device::DeviceManager;
use crate::ring_buffer::RingProducer;

/// Requested capture format. Defaults are the reference parameters:
/// 44.1 kHz mono 16-bit with a 2x buffer safety factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device: Option<String>,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub buffer_safety_factor: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate_hz: constants::SAMPLE_RATE_HZ,
            channels: constants::CHANNELS_MONO,
            buffer_safety_factor: constants::BUFFER_SAFETY_FACTOR,
        }
    }
}

/// Format actually granted by the device. Samples in the ring are always
/// mono after downmixing, at this rate.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedConfig {
    pub sample_rate_hz: u32,
    pub device_channels: u16,
}

/// One batch of mono PCM pulled from the ring in a single read call.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub timestamp: Instant,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Default)]
pub struct CaptureStats {
    pub chunks_captured: AtomicU64,
    pub chunks_dropped: AtomicU64,
    pub stream_errors: AtomicU64,
}

/// Dedicated thread that owns the cpal input stream.
///
/// cpal streams are not `Send`, so the stream lives and dies on this
/// thread; samples cross to the session loop through the ring buffer.
pub struct CaptureThread {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    device_lost: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl CaptureThread {
    /// Open the device and start the input stream. Returns once the stream
    /// is playing, or with the open error when it is not.
    pub fn spawn(
        config: CaptureConfig,
        producer: RingProducer,
    ) -> Result<(Self, NegotiatedConfig), AudioError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let device_lost = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(CaptureStats::default());
        let (ready_tx, ready_rx) = bounded::<Result<NegotiatedConfig, AudioError>>(1);

        let thread_shutdown = Arc::clone(&shutdown);
        let thread_lost = Arc::clone(&device_lost);
        let thread_stats = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(&config, producer, thread_lost, thread_stats) {
                    Ok((stream, negotiated)) => {
                        let _ = ready_tx.send(Ok(negotiated));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !thread_shutdown.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                tracing::debug!("audio capture thread shut down");
            })
            .map_err(|e| AudioError::Fatal(format!("failed to spawn capture thread: {}", e)))?;

        let negotiated = match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(negotiated)) => negotiated,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                shutdown.store(true, Ordering::SeqCst);
                return Err(AudioError::Fatal(
                    "timed out waiting for capture stream to start".into(),
                ));
            }
        };

        Ok((
            Self {
                handle: Some(handle),
                shutdown,
                device_lost,
                stats,
            },
            negotiated,
        ))
    }

    /// Set when the stream reported an unrecoverable error.
    pub fn device_lost(&self) -> bool {
        self.device_lost.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Stop the stream and join the thread. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs on the capture thread: open, negotiate, build, play.
fn open_stream(
    config: &CaptureConfig,
    mut producer: RingProducer,
    device_lost: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
) -> Result<(cpal::Stream, NegotiatedConfig), AudioError> {
    let manager = DeviceManager::new()?;
    let device = manager.open_device(config.device.as_deref())?;
    if let Ok(name) = device.name() {
        tracing::info!("capturing from input device: {}", name);
    }

    let (stream_config, sample_format) = manager.negotiate_config(&device, config)?;
    let negotiated = NegotiatedConfig {
        sample_rate_hz: stream_config.sample_rate.0,
        device_channels: stream_config.channels,
    };
    tracing::info!(
        "input stream: {} Hz, {} channel(s), {:?}, buffer {:?}",
        negotiated.sample_rate_hz,
        negotiated.device_channels,
        sample_format,
        stream_config.buffer_size,
    );

    let channels = stream_config.channels as usize;

    let err_stats = Arc::clone(&stats);
    let err_fn = move |err: cpal::StreamError| {
        tracing::error!("audio stream error: {}", err);
        err_stats.stream_errors.fetch_add(1, Ordering::Relaxed);
        device_lost.store(true, Ordering::SeqCst);
    };

    // Downmix interleaved input to mono and queue it. Owns its scratch
    // buffer so the callback never allocates after warmup.
    let mut mono_buf: Vec<i16> = Vec::new();
    let mut handle_i16 = move |data: &[i16]| {
        let mono: &[i16] = if channels <= 1 {
            data
        } else {
            mono_buf.clear();
            mono_buf.reserve(data.len() / channels);
            for frame in data.chunks_exact(channels) {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                mono_buf.push((sum / channels as i32) as i16);
            }
            &mono_buf
        };
        if producer.write(mono) > 0 {
            stats.chunks_captured.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
        }
    };

    // Scratch for converting non-i16 callbacks, thread-local to keep the
    // audio callback allocation-free.
    thread_local! {
        static CONVERT_BUFFER: std::cell::RefCell<Vec<i16>> =
            const { std::cell::RefCell::new(Vec::new()) };
    }

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &_| {
                handle_i16(data);
            },
            err_fn,
            None,
        )?,
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &_| {
                CONVERT_BUFFER.with(|buf| {
                    let mut converted = buf.borrow_mut();
                    converted.clear();
                    converted.reserve(data.len());
                    for &s in data {
                        let clamped = s.clamp(-1.0, 1.0);
                        converted.push((clamped * 32767.0).round() as i16);
                    }
                    handle_i16(&converted);
                });
            },
            err_fn,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &_| {
                CONVERT_BUFFER.with(|buf| {
                    let mut converted = buf.borrow_mut();
                    converted.clear();
                    converted.reserve(data.len());
                    // unsigned [0, 65535] to signed [-32768, 32767]
                    for &s in data {
                        converted.push((s as i32 - 32768) as i16);
                    }
                    handle_i16(&converted);
                });
            },
            err_fn,
            None,
        )?,
        other => {
            return Err(AudioError::FormatNotSupported {
                format: format!("{:?}", other),
            });
        }
    };

    stream.play()?;
    Ok((stream, negotiated))
}
