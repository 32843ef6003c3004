//! Audio output trait and error types.

/// Error type for audio operations.
#[derive(Debug)]
pub enum AudioError {
    /// No audio device available
    NoDevice,
    /// Device exists but offers no usable output format
    UnsupportedFormat,
    /// Backend-reported failure
    Backend(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoDevice => write!(f, "No audio device available"),
            AudioError::UnsupportedFormat => write!(f, "No supported output format"),
            AudioError::Backend(msg) => write!(f, "Audio backend error: {}", msg),
        }
    }
}

impl std::error::Error for AudioError {}

/// Trait for audio output backends.
pub trait AudioOutput {
    /// Get the sample rate.
    fn sample_rate(&self) -> u32;

    /// Start playback.
    fn play(&mut self) -> Result<(), AudioError>;

    /// Pause playback.
    fn pause(&mut self) -> Result<(), AudioError>;
}
