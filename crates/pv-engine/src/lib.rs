//! Polyphonic note allocation and render engine for polyvox.
//!
//! Turns queued control events into voice lifecycle changes and rendered
//! audio blocks.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod error;
mod event_queue;
mod group;
mod instrument;
mod midi_controls;
mod note;
mod note_list;
mod part;
mod voice;

pub use error::EngineError;
pub use event_queue::{
    new_queue, Consumer, EventConsumer, EventProducer, Producer, QueueFull, EVENT_QUEUE_SIZE,
};
pub use group::Group;
pub use instrument::{ControlHandle, EngineConfig, Instrument, FIRST_NOTE_ID};
pub use midi_controls::MidiControls;
pub use note::{Note, NoteState, ACTIVE_NOTE_STATES, NO_NOTE, NO_PART, SOUNDING_NOTE_STATES};
pub use note_list::NoteList;
pub use part::{KeyZone, Part, MAX_PARTS, UNLIMITED_POLYPHONY};
pub use voice::{RenderContext, SineVoice, Voice, VoiceStatus};
