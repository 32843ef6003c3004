//! Core types for the polyvox instrument engine.
//!
//! This crate defines the event vocabulary, note parameters, MIDI
//! constants, and audio buffer shared between the engine, the audio
//! backends, and hosts.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod audio_buffer;
mod event;
mod midi;
mod note_params;
mod pitch;

pub use audio_buffer::{AudioBuffer, BLOCK_SIZE, MAX_CHANNELS};
pub use event::{Event, EventPayload, GroupId, NoteId, UNASSIGNED_GROUP};
pub use midi::{
    cc, status, CC_SWITCH_THRESHOLD, MAX_CONTROLLERS, MIDI_CENTER, PITCH_WHEEL_CENTER,
};
pub use note_params::{NoteControl, NoteParams, MAX_NOTE_CONTROLS};
pub use pitch::{note_frequency, CONCERT_A_HZ, CONCERT_A_KEY};
