pub mod capture;
pub mod device;
pub mod ring_buffer;
pub mod session;
pub mod source;

// Public API
pub use capture::{AudioFrame, CaptureConfig, CaptureStats, CaptureThread, NegotiatedConfig};
pub use device::{DeviceInfo, DeviceManager};
pub use ring_buffer::CaptureRing;
pub use session::{SamplingSession, SessionConfig, SessionEvent, SessionStats};
pub use source::{AudioBackend, AudioSource, CpalBackend};
