//! MIDI 1.0 constants used by the engine's control routing.

/// Number of controller slots per group.
pub const MAX_CONTROLLERS: usize = 128;

/// Center value for 7-bit null-point controllers (pan, balance).
pub const MIDI_CENTER: u8 = 64;

/// Center (no bend) position of the 14-bit pitch wheel.
pub const PITCH_WHEEL_CENTER: u16 = 8192;

/// Controller values at or above this count as "switch on" for pedals.
pub const CC_SWITCH_THRESHOLD: u8 = 64;

/// Controller numbers.
pub mod cc {
    pub const MOD_WHEEL: u8 = 1;
    pub const VOLUME: u8 = 7;
    pub const PAN: u8 = 10;
    pub const EXPRESSION: u8 = 11;

    pub const SUSTAIN_PEDAL: u8 = 64;
    pub const SOSTENUTO_PEDAL: u8 = 66;

    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;

    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;
    pub const OMNI_MODE_OFF: u8 = 124;
    pub const OMNI_MODE_ON: u8 = 125;
    pub const MONO_MODE_ON: u8 = 126;
    pub const MONO_MODE_OFF: u8 = 127;
}

/// Channel message status nibbles.
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_WHEEL: u8 = 0xE0;
}
