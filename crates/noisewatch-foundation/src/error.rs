use thiserror::Error;

/// Consumer-facing session failures. Every variant renders a non-empty
/// message: the reading sink is always told why sampling stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("audio device initialization failed: {0}")]
    InitializationFailed(String),

    #[error("audio device read failed: {0}")]
    DeviceReadFailed(String),

    #[error("unexpected session failure: {0}")]
    Unexpected(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("device busy: already held by an active session")]
    DeviceBusy,

    #[error("device disconnected")]
    DeviceDisconnected,

    #[error("microphone permission revoked")]
    PermissionRevoked,

    #[error("format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("fatal audio error: {0}")]
    Fatal(String),

    #[error("build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("default stream config error: {0}")]
    DefaultStreamConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("device enumeration error: {0}")]
    Devices(#[from] cpal::DevicesError),
}

impl AudioError {
    /// A fatal read error ends the session; anything else is skipped and
    /// counted while the loop keeps running.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AudioError::DeviceDisconnected | AudioError::PermissionRevoked | AudioError::Fatal(_)
        )
    }

    /// Map a failure during device open into the consumer-facing taxonomy.
    pub fn into_init_error(self) -> SessionError {
        match self {
            AudioError::PermissionRevoked => SessionError::PermissionDenied,
            other => SessionError::InitializationFailed(other.to_string()),
        }
    }

    /// Map a fatal failure during the sampling loop into the consumer-facing
    /// taxonomy.
    pub fn into_read_error(self) -> SessionError {
        match self {
            AudioError::PermissionRevoked => SessionError::PermissionDenied,
            other => SessionError::DeviceReadFailed(other.to_string()),
        }
    }
}
