use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use noisewatch_foundation::AudioError;
use noisewatch_level::constants;

use crate::capture::{AudioFrame, CaptureConfig, CaptureThread, NegotiatedConfig};
use crate::ring_buffer::{CaptureRing, RingConsumer};

/// One acquisition of the microphone: PCM frames on demand, released
/// deterministically via `close`.
pub trait AudioSource: Send {
    /// Pull whatever is queued, up to `max_samples`.
    ///
    /// `Ok(None)` means nothing was available this cycle. Errors are
    /// reported values, never panics; `AudioError::is_fatal` decides
    /// whether the session survives them.
    fn read_frame(&mut self, max_samples: usize) -> Result<Option<AudioFrame>, AudioError>;

    /// Release the device. Idempotent; also runs on drop.
    fn close(&mut self);
}

/// Opens `AudioSource` instances. The production impl talks to cpal;
/// tests substitute scripted sources.
pub trait AudioBackend: Send {
    fn open(&mut self, config: &CaptureConfig) -> Result<Box<dyn AudioSource>, AudioError>;
}

/// Exclusive-ownership flag shared between a backend and the source it
/// opened. Held from a successful `open` until `close`.
pub(crate) struct DeviceLease {
    in_use: Arc<AtomicBool>,
}

impl DeviceLease {
    pub(crate) fn acquire(in_use: Arc<AtomicBool>) -> Option<Self> {
        in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { in_use })
    }

    pub(crate) fn release(&self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}

/// Production backend over cpal.
pub struct CpalBackend {
    in_use: Arc<AtomicBool>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn open(&mut self, config: &CaptureConfig) -> Result<Box<dyn AudioSource>, AudioError> {
        let lease =
            DeviceLease::acquire(Arc::clone(&self.in_use)).ok_or(AudioError::DeviceBusy)?;

        // one second of headroom between the callback and the session loop
        let ring = CaptureRing::new(config.sample_rate_hz.max(8_000) as usize);
        let (producer, consumer) = ring.split();

        let (capture, negotiated) = match CaptureThread::spawn(config.clone(), producer) {
            Ok(started) => started,
            Err(e) => {
                lease.release();
                return Err(e);
            }
        };

        Ok(Box::new(MicSource {
            capture,
            consumer,
            negotiated,
            lease: Some(lease),
            samples_read: 0,
            started: Instant::now(),
        }))
    }
}

/// Microphone source backed by the capture thread and ring buffer.
struct MicSource {
    capture: CaptureThread,
    consumer: RingConsumer,
    negotiated: NegotiatedConfig,
    lease: Option<DeviceLease>,
    samples_read: u64,
    started: Instant,
}

impl AudioSource for MicSource {
    fn read_frame(&mut self, max_samples: usize) -> Result<Option<AudioFrame>, AudioError> {
        if self.lease.is_none() {
            return Err(AudioError::ReadFailed("source is closed".into()));
        }
        if self.capture.device_lost() {
            return Err(AudioError::DeviceDisconnected);
        }
        if max_samples == 0 {
            return Ok(None);
        }

        let mut buffer = vec![0i16; max_samples];
        let count = self.consumer.read(&mut buffer);
        if count == 0 {
            return Ok(None);
        }
        buffer.truncate(count);

        // reconstruct the timestamp from the cumulative sample count
        let elapsed_ms = self.samples_read * 1000 / self.negotiated.sample_rate_hz.max(1) as u64;
        let timestamp = self.started + Duration::from_millis(elapsed_ms);
        self.samples_read += count as u64;

        Ok(Some(AudioFrame {
            samples: buffer,
            timestamp,
            sample_rate: self.negotiated.sample_rate_hz,
            channels: constants::CHANNELS_MONO,
        }))
    }

    fn close(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.capture.stop();
            lease.release();
            tracing::debug!("microphone released");
        }
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_exclusive_until_released() {
        let flag = Arc::new(AtomicBool::new(false));

        let first = DeviceLease::acquire(Arc::clone(&flag)).expect("first acquire");
        assert!(DeviceLease::acquire(Arc::clone(&flag)).is_none());

        first.release();
        assert!(DeviceLease::acquire(flag).is_some());
    }

    #[test]
    fn second_backend_open_fails_busy_without_hardware() {
        // the lease is checked before any device work, so a held backend
        // reports busy even on machines with no microphone
        let mut backend = CpalBackend::new();
        let _held = DeviceLease::acquire(Arc::clone(&backend.in_use)).expect("hold lease");

        match backend.open(&CaptureConfig::default()) {
            Err(AudioError::DeviceBusy) => {}
            other => panic!("expected DeviceBusy, got {:?}", other.map(|_| "source")),
        }
    }

    // Requires a working input device; run with --features live-hardware-tests.
    #[cfg(feature = "live-hardware-tests")]
    #[test]
    fn open_read_close_against_real_device() {
        let mut backend = CpalBackend::new();
        let mut source = backend.open(&CaptureConfig::default()).expect("open mic");

        std::thread::sleep(Duration::from_millis(200));
        let frame = source.read_frame(constants::READ_CHUNK_SAMPLES).expect("read");
        assert!(frame.map(|f| !f.samples.is_empty()).unwrap_or(true));

        source.close();
        // released: a second open must succeed now
        drop(source);
        let mut again = backend.open(&CaptureConfig::default()).expect("reopen mic");
        again.close();
    }
}
