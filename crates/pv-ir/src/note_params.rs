//! Note attack parameters.

use arrayvec::ArrayVec;

/// Maximum number of inline per-note controls.
pub const MAX_NOTE_CONTROLS: usize = 8;

/// A per-note control value supplied at attack time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteControl {
    /// Parameter identifier, interpreted by the voice.
    pub id: u32,
    pub value: f32,
}

/// Parameters for starting a note.
///
/// Pitch and velocity are fractional: pitch follows the MIDI key scale
/// (69.0 = A4) but may fall between keys, velocity is 0.0..=127.0.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteParams {
    pub pitch: f32,
    pub velocity: f32,
    /// Extra controls, stored inline so events stay allocation-free.
    pub controls: ArrayVec<NoteControl, MAX_NOTE_CONTROLS>,
}

impl NoteParams {
    /// Create note parameters with no extra controls.
    pub fn new(pitch: f32, velocity: f32) -> Self {
        Self {
            pitch,
            velocity,
            controls: ArrayVec::new(),
        }
    }

    /// Create note parameters from integer MIDI key and velocity.
    pub fn from_midi(key: u8, velocity: u8) -> Self {
        Self::new(key as f32, velocity as f32)
    }

    /// Add a control, ignoring it if the inline capacity is exhausted.
    pub fn with_control(mut self, id: u32, value: f32) -> Self {
        let _ = self.controls.try_push(NoteControl { id, value });
        self
    }

    /// The MIDI key this pitch rounds to.
    pub fn key(&self) -> u8 {
        let k = self.pitch + 0.5;
        if k <= 0.0 {
            0
        } else if k >= 127.0 {
            127
        } else {
            k as u8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_midi_matches_new() {
        assert_eq!(NoteParams::from_midi(60, 100), NoteParams::new(60.0, 100.0));
    }

    #[test]
    fn key_rounds_fractional_pitch() {
        assert_eq!(NoteParams::new(60.4, 64.0).key(), 60);
        assert_eq!(NoteParams::new(60.6, 64.0).key(), 61);
    }

    #[test]
    fn key_clamps_to_midi_range() {
        assert_eq!(NoteParams::new(-3.0, 64.0).key(), 0);
        assert_eq!(NoteParams::new(400.0, 64.0).key(), 127);
    }

    #[test]
    fn with_control_stores_inline() {
        let p = NoteParams::new(60.0, 64.0)
            .with_control(1, 0.5)
            .with_control(2, 0.25);
        assert_eq!(p.controls.len(), 2);
        assert_eq!(p.controls[0], NoteControl { id: 1, value: 0.5 });
    }

    #[test]
    fn with_control_ignores_overflow() {
        let mut p = NoteParams::new(60.0, 64.0);
        for i in 0..MAX_NOTE_CONTROLS as u32 + 4 {
            p = p.with_control(i, 0.0);
        }
        assert_eq!(p.controls.len(), MAX_NOTE_CONTROLS);
    }
}
