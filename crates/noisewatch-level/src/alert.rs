/// Tracks whether the most recent reading exceeds the configured threshold.
///
/// A reading exactly at the threshold does not raise the alert; the
/// comparison is strictly greater-than.
pub struct ThresholdAlert {
    threshold_db: f32,
    active: bool,
}

impl ThresholdAlert {
    pub fn new(threshold_db: f32) -> Self {
        Self {
            threshold_db,
            active: false,
        }
    }

    pub fn threshold_db(&self) -> f32 {
        self.threshold_db
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feed one reading; returns `true` when the alert state crossed the
    /// threshold in either direction.
    pub fn update(&mut self, reading_db: f32) -> bool {
        let next = reading_db > self.threshold_db;
        let crossed = next != self.active;
        self.active = next;
        crossed
    }
}
