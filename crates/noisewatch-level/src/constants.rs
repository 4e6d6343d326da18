//! Fixed parameters of the sampling pipeline

/// Capture sample rate (Hz)
pub const SAMPLE_RATE_HZ: u32 = 44_100;

/// Mono capture
pub const CHANNELS_MONO: u16 = 1;

/// Signed 16-bit PCM
pub const BITS_PER_SAMPLE: u16 = 16;

/// Alert threshold on the normalized display scale (dB)
pub const THRESHOLD_DB: f32 = 75.0;

/// Wall-clock interval between read/compute/publish cycles (ms)
pub const CADENCE_MS: u64 = 50;

/// The device stream buffer is the platform-reported minimum scaled by this
/// factor, to keep reads ahead of underruns.
pub const BUFFER_SAFETY_FACTOR: u32 = 2;

/// Upper bound on samples consumed per read call
pub const READ_CHUNK_SAMPLES: usize = 4096;

/// RMS below this is treated as silence and skips the logarithm
pub const NOISE_FLOOR_RMS: f64 = 1.0;

/// Display-range calibration applied to the raw dB value. Not physical SPL;
/// preserved as-is for behavioral parity.
pub const DISPLAY_OFFSET_DB: f64 = 10.0;

/// Lower clamp of the normalized reading
pub const DISPLAY_MIN_DB: f32 = 0.0;

/// Upper clamp of the normalized reading
pub const DISPLAY_MAX_DB: f32 = 100.0;
