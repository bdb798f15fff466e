use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unsupported or corrupt audio: {0}")]
    Decode(String),
    #[error("cannot read audio: {0}")]
    Io(#[from] std::io::Error),
    #[error("no playable audio track found")]
    NoTrack,
    #[error("audio device error: {0}")]
    Device(String),
    #[error("audio stream error: {0}")]
    Stream(String),
    /// Stopping a source that never started, already finished, or was
    /// already stopped.
    #[error("playback source is not playing")]
    SourceStopped,
}

impl AudioError {
    pub fn decode<T: ToString>(err: T) -> Self {
        Self::Decode(err.to_string())
    }
}
