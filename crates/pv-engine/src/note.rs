//! Note slots and their lifecycle states.

use pv_ir::{AudioBuffer, GroupId, NoteId, NoteParams, UNASSIGNED_GROUP};

use crate::error::EngineError;
use crate::voice::{RenderContext, Voice, VoiceStatus};

/// Sentinel index meaning "no note" in the intrusive list links.
pub const NO_NOTE: u32 = u32::MAX;

/// Sentinel part index for a note not owned by any part.
pub const NO_PART: u16 = u16::MAX;

/// Number of states in which a note still counts toward polyphony.
pub const ACTIVE_NOTE_STATES: usize = 5;

/// Number of states in which a note is still producing audio.
pub const SOUNDING_NOTE_STATES: usize = 6;

/// Lifecycle state of a note slot.
///
/// The discriminants double as indices into the per-group state list
/// array, and their order is the scan order for voice stealing (later
/// states are better victims than earlier ones, so stealing scans from
/// the high end down).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum NoteState {
    /// Key is down, no pedal involvement.
    Attacked = 0,
    /// Key is down and the note was captured by the sostenuto pedal.
    Sostenutoed = 1,
    /// Key went up while captured by sostenuto.
    ReleasedButSostenutoed = 2,
    /// Key went up while the sustain pedal was down.
    ReleasedButSustained = 3,
    /// Key went up, envelope in its release phase.
    Released = 4,
    /// Accelerated release after being cut or stolen.
    FastReleased = 5,
    /// Slot is unused and available for a new note.
    Free = 6,
}

impl NoteState {
    /// True while the note counts toward a part's polyphony limit.
    pub fn is_active(self) -> bool {
        self < NoteState::FastReleased
    }

    /// True while the note still produces audio.
    pub fn is_sounding(self) -> bool {
        self < NoteState::Free
    }

    /// Inverse of the discriminant-as-index mapping.
    pub fn from_index(index: usize) -> Option<NoteState> {
        match index {
            0 => Some(NoteState::Attacked),
            1 => Some(NoteState::Sostenutoed),
            2 => Some(NoteState::ReleasedButSostenutoed),
            3 => Some(NoteState::ReleasedButSustained),
            4 => Some(NoteState::Released),
            5 => Some(NoteState::FastReleased),
            6 => Some(NoteState::Free),
            _ => None,
        }
    }
}

/// One slot in the note pool: lifecycle bookkeeping plus the voice that
/// renders it.
///
/// Slots are linked into per-state lists through the `prev`/`next`
/// indices; a slot belongs to exactly one list at a time, matching its
/// `state`.
#[derive(Debug)]
pub struct Note<V> {
    state: NoteState,
    note_id: NoteId,
    group: GroupId,
    part: u16,
    pitch: f32,
    velocity: f32,
    absolute_start_frame: u64,
    release_frame: Option<u64>,
    kill_frame: Option<u64>,
    pub(crate) prev: u32,
    pub(crate) next: u32,
    voice: V,
}

impl<V: Voice> Note<V> {
    pub fn new(voice: V) -> Self {
        Self {
            state: NoteState::Free,
            note_id: 0,
            group: UNASSIGNED_GROUP,
            part: NO_PART,
            pitch: 0.0,
            velocity: 0.0,
            absolute_start_frame: 0,
            release_frame: None,
            kill_frame: None,
            prev: NO_NOTE,
            next: NO_NOTE,
            voice,
        }
    }

    /// Begin a new note in this slot.
    ///
    /// The caller is responsible for having moved the slot into the
    /// `Attacked` list first; this only fills in the bookkeeping and
    /// starts the voice.
    pub fn attack(
        &mut self,
        note_id: NoteId,
        group: GroupId,
        part: u16,
        params: &NoteParams,
        start_frame: u64,
        sample_rate: f32,
    ) {
        self.note_id = note_id;
        self.group = group;
        self.part = part;
        self.pitch = params.pitch;
        self.velocity = params.velocity;
        self.absolute_start_frame = start_frame;
        self.release_frame = None;
        self.kill_frame = None;
        self.voice.attack(params, sample_rate);
    }

    /// Enter the normal release phase.
    pub fn release(&mut self, frame: u64) {
        self.release_frame = Some(frame);
        self.voice.release();
    }

    /// Enter the accelerated release phase.
    pub fn fast_release(&mut self, frame: u64) {
        self.release_frame = Some(frame);
        self.voice.fast_release();
    }

    /// Stop the voice immediately and mark the slot reusable.
    pub fn kill(&mut self, frame: u64) {
        self.kill_frame = Some(frame);
        self.voice.kill();
    }

    pub fn render(
        &mut self,
        ctx: &RenderContext<'_>,
        output: &mut AudioBuffer,
    ) -> Result<VoiceStatus, EngineError> {
        self.voice.render(ctx, output)
    }

    /// Current output level, used to pick steal victims.
    pub fn amplitude(&self) -> f32 {
        self.voice.amplitude()
    }

    pub fn state(&self) -> NoteState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: NoteState) {
        self.state = state;
    }

    pub fn note_id(&self) -> NoteId {
        self.note_id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn part(&self) -> u16 {
        self.part
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    /// Absolute frame at which the note started.
    pub fn start_frame(&self) -> u64 {
        self.absolute_start_frame
    }

    pub fn release_frame(&self) -> Option<u64> {
        self.release_frame
    }

    pub fn kill_frame(&self) -> Option<u64> {
        self.kill_frame
    }

    pub fn voice(&self) -> &V {
        &self.voice
    }

    pub fn voice_mut(&mut self) -> &mut V {
        &mut self.voice
    }
}
