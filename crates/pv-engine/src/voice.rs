//! Voice: the audio generation unit behind each note.

use pv_ir::{note_frequency, AudioBuffer, NoteParams};

use crate::error::EngineError;
use crate::midi_controls::MidiControls;

/// What a voice reports after rendering a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceStatus {
    /// Still producing audio.
    Sounding,
    /// The envelope has run out; the note slot can be recycled.
    Finished,
}

/// Per-block context handed to each voice by its group.
pub struct RenderContext<'a> {
    /// Output sample rate in Hz.
    pub sample_rate: f32,
    /// Current pitch bend in semitones.
    pub pitch_bend: f32,
    /// The owning group's controller state.
    pub controls: &'a MidiControls,
}

/// The sound-producing half of a note.
///
/// Lifecycle calls arrive in this order: `attack`, then at most one of
/// `release`/`fast_release`, then possibly `kill`. After `kill`, or once
/// `render` returns [`VoiceStatus::Finished`], the voice may be attacked
/// again for a new note.
pub trait Voice {
    /// Start producing sound for the given note parameters.
    fn attack(&mut self, params: &NoteParams, sample_rate: f32);

    /// Begin the normal release phase.
    fn release(&mut self);

    /// Begin an accelerated release (the note was stolen or cut).
    fn fast_release(&mut self);

    /// Stop immediately. The next `render` must report `Finished`.
    fn kill(&mut self);

    /// Current output level, used to pick the quietest victim when
    /// stealing.
    fn amplitude(&self) -> f32;

    /// Add one block of audio into `output`.
    fn render(
        &mut self,
        ctx: &RenderContext<'_>,
        output: &mut AudioBuffer,
    ) -> Result<VoiceStatus, EngineError>;
}

/// Envelope stage for [`SineVoice`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum EnvStage {
    #[default]
    Idle,
    Attack,
    Sustain,
    Release,
    FastRelease,
}

/// A minimal built-in voice: sine oscillator with a linear AR envelope.
///
/// Mostly useful for tests, benches, and the demo CLI, but it exercises
/// the whole voice contract: pitch bend, expression, stealing amplitude,
/// and finish detection.
#[derive(Clone, Debug, Default)]
pub struct SineVoice {
    pitch: f32,
    phase: f32,
    level: f32,
    sustain_level: f32,
    attack_step: f32,
    release_step: f32,
    fast_release_step: f32,
    stage: EnvStage,
}

/// Attack ramp length in seconds.
const ATTACK_TIME: f32 = 0.005;
/// Release ramp length in seconds.
const RELEASE_TIME: f32 = 0.2;
/// Fast-release ramp length in seconds.
const FAST_RELEASE_TIME: f32 = 0.01;
/// Headroom so a full chord does not clip.
const VOICE_GAIN: f32 = 0.2;

impl SineVoice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Voice for SineVoice {
    fn attack(&mut self, params: &NoteParams, sample_rate: f32) {
        self.pitch = params.pitch;
        self.phase = 0.0;
        self.level = 0.0;
        self.sustain_level = (params.velocity / 127.0).clamp(0.0, 1.0) * VOICE_GAIN;
        self.attack_step = self.sustain_level / (ATTACK_TIME * sample_rate).max(1.0);
        self.release_step = self.sustain_level / (RELEASE_TIME * sample_rate).max(1.0);
        self.fast_release_step = self.sustain_level / (FAST_RELEASE_TIME * sample_rate).max(1.0);
        self.stage = EnvStage::Attack;
    }

    fn release(&mut self) {
        if self.stage != EnvStage::Idle {
            self.stage = EnvStage::Release;
        }
    }

    fn fast_release(&mut self) {
        if self.stage != EnvStage::Idle {
            self.stage = EnvStage::FastRelease;
        }
    }

    fn kill(&mut self) {
        self.level = 0.0;
        self.stage = EnvStage::Idle;
    }

    fn amplitude(&self) -> f32 {
        self.level
    }

    fn render(
        &mut self,
        ctx: &RenderContext<'_>,
        output: &mut AudioBuffer,
    ) -> Result<VoiceStatus, EngineError> {
        if self.stage == EnvStage::Idle {
            return Ok(VoiceStatus::Finished);
        }

        let freq = note_frequency(self.pitch, ctx.pitch_bend);
        let step = freq / ctx.sample_rate;
        let expression = ctx.controls.control(pv_ir::cc::EXPRESSION) / 127.0;
        let volume = ctx.controls.control(pv_ir::cc::VOLUME) / 127.0;
        let gain = expression * volume;

        let frames = output.frames();
        let stereo = output.channels() >= 2;
        let mut finished = false;

        if stereo {
            let (left, right) = output.channel_pair_mut(0, 1);
            for i in 0..frames {
                let (sample, done) = self.next_sample(step, gain);
                left[i] += sample;
                right[i] += sample;
                if done {
                    finished = true;
                    break;
                }
            }
        } else {
            let mono = output.channel_mut(0);
            for i in 0..frames {
                let (sample, done) = self.next_sample(step, gain);
                mono[i] += sample;
                if done {
                    finished = true;
                    break;
                }
            }
        }

        if finished {
            Ok(VoiceStatus::Finished)
        } else {
            Ok(VoiceStatus::Sounding)
        }
    }
}

impl SineVoice {
    /// One envelope+oscillator step. Returns the sample and whether the
    /// envelope just ran out.
    fn next_sample(&mut self, step: f32, gain: f32) -> (f32, bool) {
        match self.stage {
            EnvStage::Idle => return (0.0, true),
            EnvStage::Attack => {
                self.level += self.attack_step;
                if self.level >= self.sustain_level {
                    self.level = self.sustain_level;
                    self.stage = EnvStage::Sustain;
                }
            }
            EnvStage::Sustain => {}
            EnvStage::Release => {
                self.level -= self.release_step;
            }
            EnvStage::FastRelease => {
                self.level -= self.fast_release_step;
            }
        }

        if self.level <= 0.0 {
            self.level = 0.0;
            self.stage = EnvStage::Idle;
            return (0.0, true);
        }

        let sample = libm::sinf(self.phase * core::f32::consts::TAU) * self.level * gain;
        self.phase += step;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        (sample, false)
    }
}
