//! CPAL-based audio output backend.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Split};
use ringbuf::{HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::traits::{AudioError, AudioOutput};

/// One stereo frame as pushed by the render thread.
pub type StereoFrame = [f32; 2];

/// CPAL-based audio output.
///
/// The stream callback owns the consumer half of a ring buffer; the
/// producer half is handed back to the caller so the render thread can
/// push frames. Underflow plays silence.
pub struct CpalOutput {
    config: StreamConfig,
    stream: Stream,
    running: Arc<AtomicBool>,
}

impl CpalOutput {
    /// Open the default output device and start a paused stream.
    pub fn new() -> Result<(Self, HeapProd<StereoFrame>), AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Backend(e.to_string()))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(AudioError::UnsupportedFormat);
        }

        let mut config: StreamConfig = supported.into();
        // Force stereo output; the stream callback assumes 2-channel interleaving
        config.channels = 2;

        // Ring buffer for audio data (about 100ms)
        let buffer_size = config.sample_rate.0 as usize / 10;
        let rb = HeapRb::<StereoFrame>::new(buffer_size);
        let (producer, mut consumer) = rb.split();

        let running = Arc::new(AtomicBool::new(false));
        let gate = running.clone();
        let channels = config.channels as usize;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !gate.load(Ordering::Relaxed) {
                        for sample in data.iter_mut() {
                            *sample = 0.0;
                        }
                        return;
                    }

                    for chunk in data.chunks_mut(channels) {
                        if let Some([left, right]) = consumer.try_pop() {
                            // Write stereo pair; zero-fill any extra channels
                            for (i, sample) in chunk.iter_mut().enumerate() {
                                *sample = match i {
                                    0 => left,
                                    1 => right,
                                    _ => 0.0,
                                };
                            }
                        } else {
                            for sample in chunk.iter_mut() {
                                *sample = 0.0;
                            }
                        }
                    }
                },
                |err| eprintln!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::Backend(e.to_string()))?;

        let output = Self {
            config,
            stream,
            running,
        };

        Ok((output, producer))
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn play(&mut self) -> Result<(), AudioError> {
        self.running.store(true, Ordering::Relaxed);
        self.stream
            .play()
            .map_err(|e| AudioError::Backend(e.to_string()))
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::Relaxed);
        self.stream
            .pause()
            .map_err(|e| AudioError::Backend(e.to_string()))
    }
}
