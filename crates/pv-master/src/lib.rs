//! Headless controller for the polyvox instrument engine.
//!
//! Provides a unified API for live playback and offline rendering that
//! a CLI or host shell can share.

mod wav;

use pv_audio::{AudioOutput, CpalOutput};
use pv_engine::{Instrument, SineVoice};
use pv_ir::AudioBuffer;
use ringbuf::traits::Producer;
use ringbuf::HeapProd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

// Re-export common types so callers don't need pv-ir/pv-engine directly.
pub use pv_audio::{AudioError, StereoFrame};
pub use pv_engine::{ControlHandle, EngineConfig, EngineError};
pub use pv_ir::NoteParams;

pub use wav::{frames_to_wav, write_wav};

/// Controller errors.
#[derive(Debug)]
pub enum MasterError {
    /// Opening or driving the audio device failed.
    Audio(AudioError),
    /// The engine refused an event or render call.
    Engine(EngineError),
    /// The control-to-render queue is full.
    QueueFull,
    /// The audio thread died before handing back its control handle.
    ThreadDied,
}

impl std::fmt::Display for MasterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MasterError::Audio(e) => write!(f, "Audio error: {}", e),
            MasterError::Engine(e) => write!(f, "Engine error: {}", e),
            MasterError::QueueFull => write!(f, "Event queue is full"),
            MasterError::ThreadDied => write!(f, "Audio thread died during startup"),
        }
    }
}

impl std::error::Error for MasterError {}

impl From<AudioError> for MasterError {
    fn from(e: AudioError) -> Self {
        MasterError::Audio(e)
    }
}

impl From<EngineError> for MasterError {
    fn from(e: EngineError) -> Self {
        MasterError::Engine(e)
    }
}

/// Headless instrument controller — owns the control handle and manages
/// the render thread.
pub struct Controller {
    config: EngineConfig,
    playback: Option<PlaybackHandle>,
}

struct PlaybackHandle {
    control: ControlHandle,
    sample_rate: u32,
    stop_signal: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            playback: None,
        }
    }

    // --- Real-time playback ---

    /// Open the default audio device and start a fresh instrument on a
    /// render thread. Any previous session is stopped first.
    pub fn play(&mut self) -> Result<(), MasterError> {
        self.stop();

        let config = self.config;
        let stop_signal = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        // The cpal stream cannot cross threads, so the audio thread
        // opens the device itself and sends the control handle back.
        let (handle_tx, handle_rx) = mpsc::sync_channel(1);

        let stop = stop_signal.clone();
        let done = finished.clone();
        let thread = std::thread::spawn(move || {
            audio_thread(config, handle_tx, stop, done);
        });

        let (control, sample_rate) = match handle_rx.recv() {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(MasterError::Audio(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(MasterError::ThreadDied);
            }
        };

        self.playback = Some(PlaybackHandle {
            control,
            sample_rate,
            stop_signal,
            finished,
            thread: Some(thread),
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut pb) = self.playback.take() {
            pb.stop_signal.store(true, Ordering::Relaxed);
            if let Some(handle) = pb.thread.take() {
                let _ = handle.join();
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| !p.finished.load(Ordering::Relaxed))
    }

    /// Device sample rate of the running session.
    pub fn sample_rate(&self) -> Option<u32> {
        self.playback.as_ref().map(|p| p.sample_rate)
    }

    /// Control handle of the running session, for queueing events.
    pub fn control(&mut self) -> Option<&mut ControlHandle> {
        self.playback.as_mut().map(|p| &mut p.control)
    }

    /// Fast-release everything on every group of the running session.
    pub fn panic(&mut self) -> Result<(), MasterError> {
        if let Some(pb) = self.playback.as_mut() {
            pb.control.panic().map_err(|_| MasterError::QueueFull)?;
        }
        Ok(())
    }

    // --- Offline rendering ---

    /// Render `max_frames` frames without an audio device. `script` runs
    /// before each block with the control handle and the frame position,
    /// so callers can queue notes at any point in the timeline.
    pub fn render_frames<F>(
        &self,
        sample_rate: u32,
        max_frames: usize,
        mut script: F,
    ) -> Result<Vec<StereoFrame>, MasterError>
    where
        F: FnMut(&mut ControlHandle, u64),
    {
        let (mut instrument, mut control) = Instrument::new(
            SineVoice::new(),
            EngineConfig {
                sample_rate: sample_rate as f32,
                ..self.config
            },
        );

        let mut frames = Vec::with_capacity(max_frames);
        let mut buffers = vec![AudioBuffer::stereo_block()];
        while frames.len() < max_frames {
            script(&mut control, frames.len() as u64);
            instrument.render(&mut buffers)?;
            let block = &buffers[0];
            for i in 0..block.frames() {
                if frames.len() == max_frames {
                    break;
                }
                let (left, right) = block.stereo_frame(i);
                frames.push([left, right]);
            }
        }
        Ok(frames)
    }

    pub fn render_to_wav<F>(
        &self,
        sample_rate: u32,
        max_seconds: u32,
        script: F,
    ) -> Result<Vec<u8>, MasterError>
    where
        F: FnMut(&mut ControlHandle, u64),
    {
        let max_frames = (sample_rate * max_seconds) as usize;
        let frames = self.render_frames(sample_rate, max_frames, script)?;
        Ok(wav::frames_to_wav(&frames, sample_rate))
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

fn audio_thread(
    config: EngineConfig,
    handle_tx: mpsc::SyncSender<Result<(ControlHandle, u32), AudioError>>,
    stop_signal: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
) {
    let (mut output, mut producer) = match CpalOutput::new() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = handle_tx.send(Err(e));
            finished.store(true, Ordering::Relaxed);
            return;
        }
    };

    let sample_rate = output.sample_rate();
    let (mut instrument, control) = Instrument::new(
        SineVoice::new(),
        EngineConfig {
            sample_rate: sample_rate as f32,
            ..config
        },
    );

    if handle_tx.send(Ok((control, sample_rate))).is_err() || output.play().is_err() {
        finished.store(true, Ordering::Relaxed);
        return;
    }

    let mut buffers = vec![AudioBuffer::stereo_block()];
    while !stop_signal.load(Ordering::Relaxed) {
        if instrument.render(&mut buffers).is_err() {
            break;
        }
        let block = &buffers[0];
        for i in 0..block.frames() {
            let (left, right) = block.stereo_frame(i);
            push_spin(&mut producer, [left, right], &stop_signal);
        }
    }

    let _ = output.pause();
    finished.store(true, Ordering::Relaxed);
}

/// Push a frame, spinning until the ring has room or shutdown begins.
fn push_spin(producer: &mut HeapProd<StereoFrame>, frame: StereoFrame, stop_signal: &AtomicBool) {
    while producer.try_push(frame).is_err() {
        if stop_signal.load(Ordering::Relaxed) {
            return;
        }
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Offline rendering ===

    #[test]
    fn offline_render_produces_requested_length() {
        let controller = Controller::new();
        let frames = controller
            .render_frames(44100, 1000, |_, _| {})
            .unwrap();
        assert_eq!(frames.len(), 1000);
        assert!(frames.iter().all(|f| *f == [0.0, 0.0]));
    }

    #[test]
    fn scripted_note_is_audible() {
        let controller = Controller::new();
        let frames = controller
            .render_frames(44100, 2048, |control, frame| {
                if frame == 0 {
                    control
                        .note_attack(0, NoteParams::from_midi(69, 100), 0)
                        .unwrap();
                }
            })
            .unwrap();
        let peak = frames
            .iter()
            .map(|f| f[0].abs().max(f[1].abs()))
            .fold(0.0f32, f32::max);
        assert!(peak > 0.0);
    }

    #[test]
    fn wav_render_carries_the_header() {
        let controller = Controller::new();
        let bytes = controller.render_to_wav(44100, 1, |_, _| {}).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        // 1 second of 16-bit stereo after the 44-byte header.
        assert_eq!(bytes.len(), 44 + 44100 * 4);
    }

    // === Session state ===

    #[test]
    fn controller_starts_idle() {
        let mut controller = Controller::new();
        assert!(!controller.is_playing());
        assert!(controller.control().is_none());
        assert_eq!(controller.sample_rate(), None);
        // Stopping and panicking while idle are no-ops.
        controller.stop();
        controller.panic().unwrap();
    }
}
