use crate::DomainError;

/// Decoded audio held in memory, one sample vector per channel.
///
/// Samples are expected in `[-1.0, 1.0]`; index order is time order. Only
/// channel 0 is used for tempo analysis, the rest are kept for playback.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl WaveformBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, DomainError> {
        if sample_rate == 0 {
            return Err(DomainError::validation("sample rate must be positive"));
        }
        let Some(first) = channels.first() else {
            return Err(DomainError::validation(
                "waveform requires at least one channel",
            ));
        };
        let frames = first.len();
        if channels.iter().any(|channel| channel.len() != frames) {
            return Err(DomainError::validation(
                "all channels must hold the same number of frames",
            ));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Convenience constructor for a single-channel buffer.
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Result<Self, DomainError> {
        Self::new(sample_rate, vec![samples])
    }

    /// Splits interleaved frames (`L R L R ...`) into per-channel vectors.
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(
        samples: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self, DomainError> {
        if channel_count == 0 {
            return Err(DomainError::validation(
                "waveform requires at least one channel",
            ));
        }
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        Self::new(sample_rate, channels)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn channel0(&self) -> &[f32] {
        &self.channels[0]
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }
}
