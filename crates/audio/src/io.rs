use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use beatlock_domain::WaveformBuffer;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, instrument};

use crate::AudioError;

pub struct AudioDecoder;

impl AudioDecoder {
    #[instrument(skip_all, fields(path = ?path.as_ref()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WaveformBuffer, AudioError> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)?;
        let extension = path_ref.extension().and_then(|ext| ext.to_str());
        Self::decode_source(Box::new(file), extension)
    }

    /// Decodes an in-memory file. `extension` is only a probing hint.
    pub fn decode_bytes(
        bytes: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<WaveformBuffer, AudioError> {
        Self::decode_source(Box::new(Cursor::new(bytes)), extension)
    }

    fn decode_source(
        source: Box<dyn MediaSource>,
        extension: Option<&str>,
    ) -> Result<WaveformBuffer, AudioError> {
        let mss = MediaSourceStream::new(source, Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(AudioError::decode)?;
        let mut format = probed.format;
        let track = format.default_track().ok_or(AudioError::NoTrack)?;
        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(AudioError::decode)?;
        let mut sample_rate = track.codec_params.sample_rate;
        let mut channels = track.codec_params.channels.map(|c| c.count());
        let mut interleaved = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphError::ResetRequired) => break,
                Err(err) => return Err(AudioError::decode(err)),
            };
            if packet.track_id() != track_id {
                continue;
            }
            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate.get_or_insert(spec.rate);
                    check_channel_count(&mut channels, spec.channels.count())?;
                    let mut out = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    out.copy_interleaved_ref(decoded);
                    interleaved.extend_from_slice(out.samples());
                }
                Err(SymphError::DecodeError(reason)) => {
                    debug!(reason, "skipping undecodable packet");
                }
                Err(err) => return Err(AudioError::decode(err)),
            }
        }

        let sample_rate =
            sample_rate.ok_or_else(|| AudioError::decode("stream does not declare a sample rate"))?;
        let channels = channels.unwrap_or(1);
        let buffer = WaveformBuffer::from_interleaved(&interleaved, channels, sample_rate)
            .map_err(AudioError::decode)?;
        info!(
            sample_rate,
            channels,
            duration = buffer.duration_seconds(),
            "decoded audio"
        );
        Ok(buffer)
    }
}

/// Every packet must carry the channel layout the stream started with, or
/// de-interleaving would mix channels.
fn check_channel_count(expected: &mut Option<usize>, found: usize) -> Result<(), AudioError> {
    let expected = *expected.get_or_insert(found);
    if expected != found {
        return Err(AudioError::decode(format!(
            "channel count changed from {expected} to {found}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pcm16_wav(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn audio_reader_handles_missing_file() {
        let result = AudioDecoder::open("does-not-exist.wav");
        assert!(matches!(result, Err(AudioError::Io(_))));
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let result = AudioDecoder::decode_bytes(b"definitely not audio".to_vec(), None);
        let err = result.unwrap_err();
        assert!(err.to_string().starts_with("unsupported or corrupt audio"));
    }

    #[test]
    fn channel_layout_change_is_a_decode_error() {
        let mut channels = None;
        assert!(check_channel_count(&mut channels, 2).is_ok());
        assert_eq!(channels, Some(2));
        assert!(check_channel_count(&mut channels, 2).is_ok());
        let err = check_channel_count(&mut channels, 1).unwrap_err();
        assert!(matches!(err, AudioError::Decode(_)));

        let mut declared = Some(1);
        assert!(check_channel_count(&mut declared, 2).is_err());
    }

    #[test]
    fn decodes_stereo_wav_into_channels() {
        let mut samples = Vec::new();
        for _ in 0..800 {
            samples.push(16_384);
            samples.push(-16_384);
        }
        let bytes = pcm16_wav(8_000, 2, &samples);
        let buffer = AudioDecoder::decode_bytes(bytes, Some("wav")).unwrap();
        assert_eq!(buffer.sample_rate(), 8_000);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 800);
        assert_abs_diff_eq!(buffer.duration_seconds(), 0.1, epsilon = 1e-9);
        assert_abs_diff_eq!(buffer.channel0()[10], 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(buffer.channel(1).unwrap()[10], -0.5, epsilon = 1e-3);
    }
}
