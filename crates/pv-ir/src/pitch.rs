//! Pitch-to-frequency conversion.

/// Reference tuning frequency for A4.
pub const CONCERT_A_HZ: f32 = 440.0;

/// MIDI key number of A4.
pub const CONCERT_A_KEY: f32 = 69.0;

/// Convert a fractional MIDI pitch plus a bend (in semitones) to Hz.
///
/// 12-TET: `440 * 2^((pitch - 69 + bend) / 12)`.
pub fn note_frequency(pitch: f32, bend_semitones: f32) -> f32 {
    CONCERT_A_HZ * libm::exp2f((pitch - CONCERT_A_KEY + bend_semitones) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < b * 1e-4
    }

    #[test]
    fn concert_a_is_440() {
        assert!(close(note_frequency(69.0, 0.0), 440.0));
    }

    #[test]
    fn octave_up_doubles() {
        assert!(close(note_frequency(81.0, 0.0), 880.0));
    }

    #[test]
    fn octave_down_halves() {
        assert!(close(note_frequency(57.0, 0.0), 220.0));
    }

    #[test]
    fn middle_c() {
        assert!(close(note_frequency(60.0, 0.0), 261.6256));
    }

    #[test]
    fn bend_shifts_by_semitones() {
        assert!(close(note_frequency(69.0, 12.0), 880.0));
        assert!(close(note_frequency(69.0, -12.0), 220.0));
    }

    #[test]
    fn fractional_pitch_between_keys() {
        let f = note_frequency(69.5, 0.0);
        assert!(f > 440.0 && f < 466.17);
    }

    #[test]
    fn bend_equals_pitch_offset() {
        assert!(close(note_frequency(69.0, 2.0), note_frequency(71.0, 0.0)));
    }
}
