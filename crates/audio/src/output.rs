use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use beatlock_domain::WaveformBuffer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use tracing::{debug, error, info};

use crate::backend::{AudioEngine, PlaybackSource, StreamConfig};
use crate::clock::TimeSource;
use crate::dsp::{render_tone, ToneSpec};
use crate::AudioError;

const COMMAND_CAPACITY: usize = 256;
const VOICE_CAPACITY: usize = 64;
const RETIRED_CAPACITY: usize = COMMAND_CAPACITY + VOICE_CAPACITY;

enum Command {
    Tone { samples: Vec<f32>, start_frame: u64 },
    Play { id: u64, buffer: Arc<WaveformBuffer>, start_frame: u64 },
    Halt { id: u64 },
}

/// Output clock: frames rendered by the device callback over its sample rate.
#[derive(Debug)]
struct FrameClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl TimeSource for FrameClock {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }
}

enum Voice {
    Tone {
        samples: Vec<f32>,
        start_frame: u64,
    },
    Source {
        id: u64,
        buffer: Arc<WaveformBuffer>,
        start_frame: u64,
        /// Source frames per output frame.
        step: f64,
    },
}

impl Voice {
    fn sample(&self, frame: u64, channel: usize) -> f32 {
        match self {
            Voice::Tone {
                samples,
                start_frame,
            } => frame
                .checked_sub(*start_frame)
                .and_then(|offset| samples.get(offset as usize))
                .copied()
                .unwrap_or(0.0),
            Voice::Source {
                buffer,
                start_frame,
                step,
                ..
            } => {
                let Some(offset) = frame.checked_sub(*start_frame) else {
                    return 0.0;
                };
                let index = (offset as f64 * step) as usize;
                let channel = channel.min(buffer.channel_count() - 1);
                buffer
                    .channel(channel)
                    .and_then(|samples| samples.get(index))
                    .copied()
                    .unwrap_or(0.0)
            }
        }
    }

    fn finished(&self, frame: u64) -> bool {
        match self {
            Voice::Tone {
                samples,
                start_frame,
            } => frame >= start_frame + samples.len() as u64,
            Voice::Source {
                buffer,
                start_frame,
                step,
                ..
            } => {
                frame >= *start_frame
                    && ((frame - start_frame) as f64 * step) as usize >= buffer.frames()
            }
        }
    }

    fn id(&self) -> Option<u64> {
        match self {
            Voice::Source { id, .. } => Some(*id),
            Voice::Tone { .. } => None,
        }
    }
}

/// State owned by the device callback. It never allocates or frees: voices
/// live in a fixed-capacity list and finished ones travel back to the
/// control side through `retired`.
struct Renderer {
    commands: HeapConsumer<Command>,
    retired: HeapProducer<Voice>,
    voices: Vec<Voice>,
    frames: Arc<AtomicU64>,
    channels: usize,
    sample_rate: u32,
}

impl Renderer {
    fn drain_commands(&mut self) {
        while let Some(command) = self.commands.pop() {
            match command {
                Command::Tone {
                    samples,
                    start_frame,
                } => self.admit(Voice::Tone {
                    samples,
                    start_frame,
                }),
                Command::Play {
                    id,
                    buffer,
                    start_frame,
                } => {
                    let step = buffer.sample_rate() as f64 / self.sample_rate as f64;
                    self.admit(Voice::Source {
                        id,
                        buffer,
                        start_frame,
                        step,
                    });
                }
                Command::Halt { id } => self.retire_where(|voice| voice.id() == Some(id)),
            }
        }
    }

    /// Voices beyond capacity are refused rather than grown into.
    fn admit(&mut self, voice: Voice) {
        if self.voices.len() < VOICE_CAPACITY {
            self.voices.push(voice);
        } else {
            self.retire(voice);
        }
    }

    fn retire(&mut self, voice: Voice) {
        // Only a full return queue drops a voice in the callback.
        let _ = self.retired.push(voice);
    }

    fn retire_where(&mut self, mut done: impl FnMut(&Voice) -> bool) {
        let mut index = 0;
        while index < self.voices.len() {
            if done(&self.voices[index]) {
                let voice = self.voices.swap_remove(index);
                self.retire(voice);
            } else {
                index += 1;
            }
        }
    }

    fn render<T: Sample + FromSample<f32>>(&mut self, data: &mut [T]) {
        self.drain_commands();
        let mut frame = self.frames.load(Ordering::Acquire);
        for out in data.chunks_mut(self.channels) {
            for (channel, slot) in out.iter_mut().enumerate() {
                let mixed: f32 = self
                    .voices
                    .iter()
                    .map(|voice| voice.sample(frame, channel))
                    .sum();
                *slot = T::from_sample(mixed.clamp(-1.0, 1.0));
            }
            frame += 1;
        }
        self.retire_where(|voice| voice.finished(frame));
        self.frames.store(frame, Ordering::Release);
    }
}

/// Control side of the callback queues.
struct CommandQueue {
    commands: HeapProducer<Command>,
    retired: HeapConsumer<Voice>,
}

type SharedProducer = Arc<Mutex<CommandQueue>>;

/// Frees voices the callback has finished with, then queues `command`.
fn send(queue: &SharedProducer, command: Command) -> Result<(), AudioError> {
    let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
    while queue.retired.pop().is_some() {}
    queue
        .commands
        .push(command)
        .map_err(|_| AudioError::Stream("command queue full".into()))
}

/// Engine playing through the host's default output device.
pub struct CpalEngine {
    _stream: cpal::Stream,
    commands: SharedProducer,
    clock: Arc<FrameClock>,
    config: StreamConfig,
    next_source: AtomicU64,
}

impl CpalEngine {
    pub fn open_default() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Device("no default output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|err| AudioError::Device(err.to_string()))?;
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.config();

        let (producer, consumer) = HeapRb::<Command>::new(COMMAND_CAPACITY).split();
        let (retired_producer, retired_consumer) =
            HeapRb::<Voice>::new(RETIRED_CAPACITY).split();
        let frames = Arc::new(AtomicU64::new(0));
        let renderer = Renderer {
            commands: consumer,
            retired: retired_producer,
            voices: Vec::with_capacity(VOICE_CAPACITY),
            frames: frames.clone(),
            channels: stream_config.channels.max(1) as usize,
            sample_rate: stream_config.sample_rate.0,
        };

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, renderer),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, renderer),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, renderer),
            other => Err(AudioError::Device(format!(
                "unsupported sample format {other:?}"
            ))),
        }?;
        stream
            .play()
            .map_err(|err| AudioError::Stream(err.to_string()))?;

        let config = StreamConfig {
            sample_rate: stream_config.sample_rate.0,
            channels: stream_config.channels,
            buffer_size: match stream_config.buffer_size {
                cpal::BufferSize::Fixed(size) => size,
                cpal::BufferSize::Default => 0,
            },
        };
        info!(?config, "opened output stream");
        Ok(Self {
            _stream: stream,
            commands: Arc::new(Mutex::new(CommandQueue {
                commands: producer,
                retired: retired_consumer,
            })),
            clock: Arc::new(FrameClock {
                frames,
                sample_rate: config.sample_rate,
            }),
            config,
            next_source: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    fn frame_at(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.config.sample_rate as f64).round() as u64
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| renderer.render(data),
            |err| error!(%err, "output stream error"),
            None,
        )
        .map_err(|err| AudioError::Stream(err.to_string()))
}

impl AudioEngine for CpalEngine {
    fn clock(&self) -> Arc<dyn TimeSource> {
        self.clock.clone()
    }

    fn create_tone(&self, tone: &ToneSpec, start: f64, stop: f64) -> Result<(), AudioError> {
        let samples = render_tone(tone, stop - start, self.config.sample_rate);
        send(
            &self.commands,
            Command::Tone {
                samples,
                start_frame: self.frame_at(start),
            },
        )
    }

    fn create_playback_source(
        &self,
        buffer: Arc<WaveformBuffer>,
    ) -> Result<Box<dyn PlaybackSource>, AudioError> {
        let id = self.next_source.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(CpalSource {
            id,
            buffer,
            commands: self.commands.clone(),
            clock: self.clock.clone(),
            started_at: None,
            stopped: false,
        }))
    }
}

struct CpalSource {
    id: u64,
    buffer: Arc<WaveformBuffer>,
    commands: SharedProducer,
    clock: Arc<FrameClock>,
    started_at: Option<f64>,
    stopped: bool,
}

impl PlaybackSource for CpalSource {
    fn start(&mut self, at: f64) -> Result<(), AudioError> {
        let start_frame = (at.max(0.0) * self.clock.sample_rate as f64).round() as u64;
        send(
            &self.commands,
            Command::Play {
                id: self.id,
                buffer: self.buffer.clone(),
                start_frame,
            },
        )?;
        self.started_at = Some(at);
        debug!(id = self.id, at, "source scheduled");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        let finished = self
            .started_at
            .map_or(true, |at| self.clock.now() >= at + self.buffer.duration_seconds());
        if self.stopped || finished {
            return Err(AudioError::SourceStopped);
        }
        self.stopped = true;
        send(&self.commands, Command::Halt { id: self.id })
    }

    fn disconnect(&mut self) {
        if send(&self.commands, Command::Halt { id: self.id }).is_err() {
            debug!(id = self.id, "halt dropped, command queue full");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        commands: HeapProducer<Command>,
        retired: HeapConsumer<Voice>,
        renderer: Renderer,
    }

    fn harness(channels: usize, sample_rate: u32) -> Harness {
        let (commands, consumer) = HeapRb::<Command>::new(VOICE_CAPACITY * 2).split();
        let (producer, retired) = HeapRb::<Voice>::new(RETIRED_CAPACITY).split();
        let renderer = Renderer {
            commands: consumer,
            retired: producer,
            voices: Vec::with_capacity(VOICE_CAPACITY),
            frames: Arc::new(AtomicU64::new(0)),
            channels,
            sample_rate,
        };
        Harness {
            commands,
            retired,
            renderer,
        }
    }

    #[test]
    fn renderer_starts_tone_at_scheduled_frame() {
        let mut h = harness(1, 100);
        assert!(h
            .commands
            .push(Command::Tone {
                samples: vec![0.5; 4],
                start_frame: 2,
            })
            .is_ok());
        let mut out = [0.0f32; 8];
        h.renderer.render(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(h.renderer.frames.load(Ordering::Acquire), 8);
        assert!(h.renderer.voices.is_empty());
        assert_eq!(h.retired.len(), 1);
    }

    #[test]
    fn renderer_maps_mono_source_to_every_channel_and_halts() {
        let mut h = harness(2, 100);
        let buffer = Arc::new(WaveformBuffer::mono(100, vec![0.25; 100]).unwrap());
        assert!(h
            .commands
            .push(Command::Play {
                id: 7,
                buffer,
                start_frame: 0,
            })
            .is_ok());
        let mut out = [0.0f32; 4];
        h.renderer.render(&mut out);
        assert_eq!(out, [0.25; 4]);

        assert!(h.commands.push(Command::Halt { id: 7 }).is_ok());
        h.renderer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert!(matches!(h.retired.pop(), Some(Voice::Source { id: 7, .. })));
    }

    #[test]
    fn voice_list_never_grows_past_capacity() {
        let mut h = harness(1, 100);
        let reserved = h.renderer.voices.capacity();
        for _ in 0..VOICE_CAPACITY + 5 {
            assert!(h
                .commands
                .push(Command::Tone {
                    samples: vec![0.01; 1_000],
                    start_frame: 0,
                })
                .is_ok());
        }
        let mut out = [0.0f32; 4];
        h.renderer.render(&mut out);
        assert_eq!(h.renderer.voices.len(), VOICE_CAPACITY);
        assert_eq!(h.renderer.voices.capacity(), reserved);
        assert_eq!(h.retired.len(), 5);
    }
}
