use crate::constants::{DISPLAY_MAX_DB, DISPLAY_MIN_DB, DISPLAY_OFFSET_DB, NOISE_FLOOR_RMS};

/// Converts one PCM frame into a normalized display reading.
///
/// Pure transform, deterministic for a given input; no state is carried
/// across calls.
pub struct LevelEstimator {
    noise_floor_rms: f64,
    display_offset_db: f64,
}

impl LevelEstimator {
    pub fn new() -> Self {
        Self {
            noise_floor_rms: NOISE_FLOOR_RMS,
            display_offset_db: DISPLAY_OFFSET_DB,
        }
    }

    /// Root-mean-square amplitude of a frame.
    ///
    /// Squares of 16-bit samples reach ~1.07e9, so the sum is accumulated
    /// in i64 before the division.
    pub fn rms(&self, frame: &[i16]) -> f64 {
        if frame.is_empty() {
            return 0.0;
        }

        let sum_squares: i64 = frame
            .iter()
            .map(|&sample| {
                let s = sample as i64;
                s * s
            })
            .sum();

        let mean_square = sum_squares as f64 / frame.len() as f64;
        mean_square.sqrt()
    }

    /// Normalized display reading in [0, 100] for a given RMS amplitude.
    ///
    /// Below the quantization noise floor the reading is 0.0 and the
    /// logarithm is skipped. Above it, the raw value is
    /// `20 * log10(rms)` relative to 1.0 amplitude, shifted by the display
    /// offset and clamped to the display range. The offset and clamp are a
    /// display calibration, not physical SPL.
    pub fn rms_to_reading(&self, rms: f64) -> f32 {
        if rms < self.noise_floor_rms {
            return 0.0;
        }

        let db_raw = 20.0 * rms.log10();
        ((db_raw + self.display_offset_db) as f32).clamp(DISPLAY_MIN_DB, DISPLAY_MAX_DB)
    }

    /// Frame in, reading out.
    pub fn estimate(&self, frame: &[i16]) -> f32 {
        self.rms_to_reading(self.rms(frame))
    }
}

impl Default for LevelEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn silence_reads_zero() {
        let estimator = LevelEstimator::new();
        let silence = vec![0i16; 2048];
        assert_eq!(estimator.estimate(&silence), 0.0);
    }

    #[test]
    fn empty_frame_reads_zero() {
        let estimator = LevelEstimator::new();
        assert_eq!(estimator.estimate(&[]), 0.0);
    }

    #[test]
    fn below_noise_floor_skips_logarithm() {
        let estimator = LevelEstimator::new();
        // rms of 0.99 would give a negative raw dB; the floor short-circuits it
        assert_eq!(estimator.rms_to_reading(0.99), 0.0);
    }

    #[test]
    fn unit_rms_reads_display_offset() {
        let estimator = LevelEstimator::new();
        // 20 * log10(1.0) = 0, so the reading is exactly the offset
        assert_abs_diff_eq!(estimator.rms_to_reading(1.0), 10.0, epsilon = 1e-6);
    }

    #[test]
    fn full_scale_clamps_to_display_max() {
        let estimator = LevelEstimator::new();
        let full_scale = vec![32767i16; 1024];
        // 20 * log10(32767) + 10 = 100.3, clamped
        assert_eq!(estimator.estimate(&full_scale), 100.0);
    }

    #[test]
    fn reading_is_monotonic_in_rms() {
        let estimator = LevelEstimator::new();
        let mut last = 0.0f32;
        for amplitude in [2i16, 10, 100, 1000, 5000, 15000, 30000] {
            let frame = vec![amplitude; 1024];
            let reading = estimator.estimate(&frame);
            assert!(
                reading >= last,
                "reading {} at amplitude {} dropped below {}",
                reading,
                amplitude,
                last
            );
            last = reading;
        }
    }

    #[test]
    fn i16_min_does_not_overflow() {
        let estimator = LevelEstimator::new();
        let frame = vec![i16::MIN; 1024];
        assert_eq!(estimator.estimate(&frame), 100.0);
    }

    #[test]
    fn sine_near_minus_three_dbfs_reads_ninety_four() {
        let estimator = LevelEstimator::new();
        // 1000 samples of a sine at peak 23170 (about -3 dB full scale),
        // ten full periods so the discrete RMS is peak / sqrt(2)
        let frame: Vec<i16> = (0..1000)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * 10.0 * i as f64 / 1000.0;
                (phase.sin() * 23170.0).round() as i16
            })
            .collect();

        let rms = estimator.rms(&frame);
        assert_abs_diff_eq!(rms, 23170.0 / std::f64::consts::SQRT_2, epsilon = 10.0);

        // 20 * log10(16384) + 10 = 94.3
        let reading = estimator.estimate(&frame);
        assert_abs_diff_eq!(reading, 94.3, epsilon = 0.1);
    }

    #[test]
    fn constant_amplitude_matches_direct_formula() {
        let estimator = LevelEstimator::new();
        for amplitude in [50i16, 700, 4200, 23170] {
            let frame = vec![amplitude; 512];
            let expected = (20.0 * (amplitude as f64).log10() + 10.0) as f32;
            assert_abs_diff_eq!(
                estimator.estimate(&frame),
                expected.clamp(0.0, 100.0),
                epsilon = 0.01
            );
        }
    }
}
