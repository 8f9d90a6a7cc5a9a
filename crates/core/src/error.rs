/// Result alias that carries the custom [`VisualizerError`] type.
pub type Result<T> = std::result::Result<T, VisualizerError>;

/// Common error type for the core crate.
///
/// Nothing on the per-frame path returns one of these; they surface from
/// session setup (decoding, config, settings files) and from the recording
/// worker.
#[derive(Debug, thiserror::Error)]
pub enum VisualizerError {
    /// Free-form message for failures without a more specific variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A caller supplied data the core cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wav: {0}")]
    Wav(#[from] hound::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("fft: {0}")]
    Fft(String),
    /// A settings control key that the module does not expose.
    #[error("unknown control `{key}`")]
    UnknownControl { key: String },
    /// A value outside the range or option set of the control.
    #[error("invalid value for control `{key}`")]
    InvalidControlValue { key: String },
    #[error("recorder: {0}")]
    Recorder(String),
}

impl VisualizerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn unknown_control(key: &str) -> Self {
        Self::UnknownControl {
            key: key.to_string(),
        }
    }

    pub(crate) fn invalid_value(key: &str) -> Self {
        Self::InvalidControlValue {
            key: key.to_string(),
        }
    }
}

impl From<&str> for VisualizerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VisualizerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<realfft::FftError> for VisualizerError {
    fn from(value: realfft::FftError) -> Self {
        Self::Fft(value.to_string())
    }
}
