//! Event types for the control-to-render event stream.

use crate::note_params::NoteParams;

/// Identifier for a note, unique among sounding notes.
///
/// IDs below 128 are conventionally derived from the MIDI key so that a
/// note-off for a key can find the note-on that started it. Generated IDs
/// start at 128 and wrap back to 128, never colliding with key-derived IDs.
pub type NoteId = u32;

/// Identifier for a note group (typically a MIDI channel).
pub type GroupId = u32;

/// Group ID of a group element that has not been bound yet.
pub const UNASSIGNED_GROUP: GroupId = 0xFFFF_FFFF;

/// A control-thread message to the render thread.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Frame offset within the render block where the event applies.
    pub frame_offset: u32,
    /// What the event does.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event.
    pub fn new(frame_offset: u32, payload: EventPayload) -> Self {
        Self {
            frame_offset,
            payload,
        }
    }
}

/// What an event does.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    // === Note events ===
    /// Start a note in a group.
    NoteOn {
        note_id: NoteId,
        group: GroupId,
        params: NoteParams,
    },
    /// Release a note (subject to pedal state).
    NoteOff { note_id: NoteId, group: GroupId },

    // === Per-group control ===
    /// 14-bit pitch wheel position (0..=16383, center 8192).
    PitchBend { group: GroupId, value: u16 },
    /// Controller change (also drives the sustain/sostenuto pedals).
    Controller {
        group: GroupId,
        controller: u8,
        value: u8,
    },
    /// Program change.
    ProgramChange { group: GroupId, program: u16 },
    /// Channel (mono) pressure.
    ChannelPressure { group: GroupId, value: u8 },
    /// Polyphonic key pressure.
    PolyPressure { group: GroupId, key: u8, value: u8 },

    // === Bulk operations ===
    /// Release every held note in a group.
    AllNotesOff { group: GroupId },
    /// Fast-release every sounding note in a group.
    AllSoundOff { group: GroupId },
    /// Kill all notes and restore every group to defaults.
    Reset,
}
