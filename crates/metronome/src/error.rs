use beatlock_audio::AudioError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetronomeError {
    #[error(transparent)]
    Decode(AudioError),
    #[error("audio engine failure: {0}")]
    Engine(AudioError),
}
