pub mod alert;
pub mod constants;
pub mod estimator;

pub use alert::ThresholdAlert;
pub use estimator::LevelEstimator;
