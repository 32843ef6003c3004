//! Group element: pedal state, controller block, and per-state note lists.

use pv_ir::{cc, AudioBuffer, GroupId, NoteId, NoteParams, UNASSIGNED_GROUP};

use crate::error::EngineError;
use crate::midi_controls::MidiControls;
use crate::note::{Note, NoteState, ACTIVE_NOTE_STATES, NO_NOTE, SOUNDING_NOTE_STATES};
use crate::note_list::NoteList;
use crate::voice::{RenderContext, Voice, VoiceStatus};

/// Sentinel for "this group has not rendered yet".
const NEVER_RENDERED: u64 = u64::MAX;

/// One MIDI group: the unit that pedals, controllers, and channel
/// messages apply to.
///
/// The group does not own its notes; it owns the per-state lists that
/// link slots of the engine-wide pool together.
#[derive(Debug)]
pub struct Group {
    id: GroupId,
    output_bus: usize,
    sustain_on: bool,
    sostenuto_on: bool,
    current_frame: u64,
    controls: MidiControls,
    lists: [NoteList; SOUNDING_NOTE_STATES],
}

impl Group {
    pub fn new() -> Self {
        Self {
            id: UNASSIGNED_GROUP,
            output_bus: 0,
            sustain_on: false,
            sostenuto_on: false,
            current_frame: NEVER_RENDERED,
            controls: MidiControls::new(),
            lists: [
                NoteList::new(NoteState::Attacked),
                NoteList::new(NoteState::Sostenutoed),
                NoteList::new(NoteState::ReleasedButSostenutoed),
                NoteList::new(NoteState::ReleasedButSustained),
                NoteList::new(NoteState::Released),
                NoteList::new(NoteState::FastReleased),
            ],
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn is_bound(&self) -> bool {
        self.id != UNASSIGNED_GROUP
    }

    /// Assign a group ID. A group can only be bound once.
    pub fn bind(&mut self, id: GroupId) -> Result<(), EngineError> {
        if self.is_bound() {
            return Err(EngineError::GroupAlreadyBound);
        }
        self.id = id;
        Ok(())
    }

    pub fn output_bus(&self) -> usize {
        self.output_bus
    }

    pub fn set_output_bus(&mut self, bus: usize) {
        self.output_bus = bus;
    }

    pub fn controls(&self) -> &MidiControls {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut MidiControls {
        &mut self.controls
    }

    pub fn sustain_is_on(&self) -> bool {
        self.sustain_on
    }

    pub fn sostenuto_is_on(&self) -> bool {
        self.sostenuto_on
    }

    pub fn list(&self, state: NoteState) -> &NoteList {
        &self.lists[state as usize]
    }

    pub(crate) fn list_mut(&mut self, state: NoteState) -> &mut NoteList {
        &mut self.lists[state as usize]
    }

    /// Notes counting toward polyphony limits.
    pub fn active_len(&self) -> usize {
        self.lists[..ACTIVE_NOTE_STATES]
            .iter()
            .map(NoteList::len)
            .sum()
    }

    /// Notes still producing audio.
    pub fn sounding_len(&self) -> usize {
        self.lists.iter().map(NoteList::len).sum()
    }

    /// Absolute start frame for a note-on at `offset` frames into the
    /// current block. Before the first render the offset stands alone.
    pub fn start_frame_for(&self, offset: u32) -> u64 {
        if self.current_frame == NEVER_RENDERED {
            u64::from(offset)
        } else {
            self.current_frame + u64::from(offset)
        }
    }

    /// Split-borrow two distinct state lists.
    fn two_lists(&mut self, a: NoteState, b: NoteState) -> (&mut NoteList, &mut NoteList) {
        let (ai, bi) = (a as usize, b as usize);
        debug_assert_ne!(ai, bi);
        if ai < bi {
            let (lo, hi) = self.lists.split_at_mut(bi);
            (&mut lo[ai], &mut hi[0])
        } else {
            let (lo, hi) = self.lists.split_at_mut(ai);
            (&mut hi[0], &mut lo[bi])
        }
    }

    /// Attack the slot at `index` and link it into the `Attacked` list.
    #[allow(clippy::too_many_arguments)]
    pub fn note_on<V: Voice>(
        &mut self,
        notes: &mut [Note<V>],
        index: u32,
        note_id: NoteId,
        part: u16,
        params: &NoteParams,
        offset: u32,
        sample_rate: f32,
    ) {
        let start = self.start_frame_for(offset);
        notes[index as usize].attack(note_id, self.id, part, params, start, sample_rate);
        self.lists[NoteState::Attacked as usize].push_front(notes, index);
    }

    /// Find a note by ID. With `unreleased_only` the search stops after
    /// the states a key-up can still affect.
    pub fn find_note<V: Voice>(
        &self,
        notes: &[Note<V>],
        note_id: NoteId,
        unreleased_only: bool,
    ) -> Option<(NoteState, u32)> {
        let last = if unreleased_only {
            if self.sostenuto_on {
                NoteState::Sostenutoed
            } else {
                NoteState::Attacked
            }
        } else {
            NoteState::Released
        };
        for list in &self.lists[..=last as usize] {
            let mut index = list.head();
            while index != NO_NOTE {
                let note = &notes[index as usize];
                if note.note_id() == note_id {
                    return Some((list.state(), index));
                }
                index = note.next;
            }
        }
        None
    }

    /// Key-up: dispatch the note to the list its pedal situation calls
    /// for. Unknown IDs are ignored.
    pub fn note_off<V: Voice>(&mut self, notes: &mut [Note<V>], note_id: NoteId, frame: u64) {
        let Some((state, index)) = self.find_note(notes, note_id, true) else {
            return;
        };
        match state {
            NoteState::Attacked => {
                self.lists[NoteState::Attacked as usize].remove(notes, index);
                if self.sustain_on {
                    self.lists[NoteState::ReleasedButSustained as usize].push_front(notes, index);
                } else {
                    notes[index as usize].release(frame);
                    self.lists[NoteState::Released as usize].push_front(notes, index);
                }
            }
            _ => {
                self.lists[NoteState::Sostenutoed as usize].remove(notes, index);
                self.lists[NoteState::ReleasedButSostenutoed as usize].push_front(notes, index);
            }
        }
    }

    /// A voice reported `Finished`: unlink the slot and return it to the
    /// free list. Returns true when the note still counted as active.
    pub fn note_ended<V: Voice>(
        &mut self,
        notes: &mut [Note<V>],
        free: &mut NoteList,
        index: u32,
    ) -> bool {
        let state = notes[index as usize].state();
        let was_active = state.is_active();
        if state.is_sounding() {
            self.lists[state as usize].remove(notes, index);
        }
        free.push_front(notes, index);
        was_active
    }

    /// Fast-release an active note in place (it keeps sounding on the
    /// `FastReleased` list). The slot must be in an active state.
    pub fn note_fast_released<V: Voice>(
        &mut self,
        notes: &mut [Note<V>],
        index: u32,
        frame: u64,
    ) {
        let state = notes[index as usize].state();
        debug_assert!(state.is_active());
        self.lists[state as usize].remove(notes, index);
        notes[index as usize].fast_release(frame);
        self.lists[NoteState::FastReleased as usize].push_front(notes, index);
    }

    pub fn sustain_on(&mut self, _frame: u64) {
        if !self.sustain_on {
            self.controls.set_controller(cc::SUSTAIN_PEDAL, 127);
            self.sustain_on = true;
        }
    }

    pub fn sustain_off<V: Voice>(&mut self, notes: &mut [Note<V>], frame: u64) {
        if self.sustain_on {
            self.controls.set_controller(cc::SUSTAIN_PEDAL, 0);
            self.sustain_on = false;
            let (released, sustained) =
                self.two_lists(NoteState::Released, NoteState::ReleasedButSustained);
            released.transfer_all_from(sustained, notes, frame);
        }
    }

    pub fn sostenuto_on<V: Voice>(&mut self, notes: &mut [Note<V>], frame: u64) {
        if !self.sostenuto_on {
            self.controls.set_controller(cc::SOSTENUTO_PEDAL, 127);
            self.sostenuto_on = true;
            let (sostenutoed, attacked) =
                self.two_lists(NoteState::Sostenutoed, NoteState::Attacked);
            sostenutoed.transfer_all_from(attacked, notes, frame);
        }
    }

    pub fn sostenuto_off<V: Voice>(&mut self, notes: &mut [Note<V>], frame: u64) {
        if self.sostenuto_on {
            self.controls.set_controller(cc::SOSTENUTO_PEDAL, 0);
            self.sostenuto_on = false;
            let (attacked, sostenutoed) =
                self.two_lists(NoteState::Attacked, NoteState::Sostenutoed);
            attacked.transfer_all_from(sostenutoed, notes, frame);

            let dest = if self.sustain_on {
                NoteState::ReleasedButSustained
            } else {
                NoteState::Released
            };
            let (dest, held) = self.two_lists(dest, NoteState::ReleasedButSostenutoed);
            dest.transfer_all_from(held, notes, frame);
        }
    }

    /// Release every held key: `Attacked` notes are released outright,
    /// `Sostenutoed` notes keep ringing under the pedal.
    pub fn all_notes_off<V: Voice>(&mut self, notes: &mut [Note<V>], frame: u64) {
        let (attacked, released) = self.two_lists(NoteState::Attacked, NoteState::Released);
        while let Some(index) = attacked.pop_front(notes) {
            notes[index as usize].release(frame);
            released.push_front(notes, index);
        }
        let (sostenutoed, held) =
            self.two_lists(NoteState::Sostenutoed, NoteState::ReleasedButSostenutoed);
        while let Some(index) = sostenutoed.pop_front(notes) {
            notes[index as usize].release(frame);
            held.push_front(notes, index);
        }
    }

    /// Fast-release every active note. Returns how many notes left the
    /// active states.
    pub fn all_sound_off<V: Voice>(&mut self, notes: &mut [Note<V>], frame: u64) -> usize {
        let mut deactivated = 0;
        for i in 0..ACTIVE_NOTE_STATES {
            let state = match NoteState::from_index(i) {
                Some(s) => s,
                None => break,
            };
            let (src, fast) = self.two_lists(state, NoteState::FastReleased);
            while let Some(index) = src.pop_front(notes) {
                notes[index as usize].fast_release(frame);
                fast.push_front(notes, index);
                deactivated += 1;
            }
        }
        deactivated
    }

    pub fn reset_controllers(&mut self) {
        self.controls.reset();
    }

    /// Kill everything and restore the group to its just-built state,
    /// apart from the ID binding.
    pub fn reset<V: Voice>(&mut self, notes: &mut [Note<V>], free: &mut NoteList, frame: u64) {
        for list in &mut self.lists {
            while let Some(index) = list.pop_front(notes) {
                notes[index as usize].kill(frame);
                free.push_front(notes, index);
            }
        }
        self.sustain_on = false;
        self.sostenuto_on = false;
        self.current_frame = NEVER_RENDERED;
        self.controls.reset();
    }

    /// Render one block of every sounding note into this group's output
    /// bus. Finished voices go back to the free list. Returns how many
    /// active notes ended.
    ///
    /// Rendering the same absolute frame twice is a no-op.
    pub fn render<V: Voice>(
        &mut self,
        abs_frame: u64,
        notes: &mut [Note<V>],
        free: &mut NoteList,
        buffers: &mut [AudioBuffer],
        sample_rate: f32,
    ) -> Result<usize, EngineError> {
        if self.current_frame == abs_frame || buffers.is_empty() {
            return Ok(0);
        }
        self.current_frame = abs_frame;

        let bus = self.output_bus.min(buffers.len() - 1);
        let output = &mut buffers[bus];
        let ctx = RenderContext {
            sample_rate,
            pitch_bend: self.controls.pitch_bend(),
            controls: &self.controls,
        };

        let mut ended_active = 0;
        for i in 0..SOUNDING_NOTE_STATES {
            let mut index = self.lists[i].head();
            while index != NO_NOTE {
                let next = notes[index as usize].next;
                let status = notes[index as usize].render(&ctx, output)?;
                if status == VoiceStatus::Finished {
                    let was_active = notes[index as usize].state().is_active();
                    self.lists[i].remove(notes, index);
                    free.push_front(notes, index);
                    if was_active {
                        ended_active += 1;
                    }
                }
                index = next;
            }
        }
        Ok(ended_active)
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::SineVoice;

    const SAMPLE_RATE: f32 = 44100.0;

    struct Fixture {
        group: Group,
        notes: Vec<Note<SineVoice>>,
        free: NoteList,
    }

    fn fixture(pool_size: usize) -> Fixture {
        let mut notes: Vec<Note<SineVoice>> =
            (0..pool_size).map(|_| Note::new(SineVoice::new())).collect();
        let mut free = NoteList::new(NoteState::Free);
        for i in (0..pool_size as u32).rev() {
            free.push_front(&mut notes, i);
        }
        let mut group = Group::new();
        group.bind(0).unwrap();
        Fixture { group, notes, free }
    }

    impl Fixture {
        fn start_note(&mut self, note_id: NoteId, key: u8) -> u32 {
            let index = self.free.pop_front(&mut self.notes).unwrap();
            self.group.note_on(
                &mut self.notes,
                index,
                note_id,
                0,
                &NoteParams::from_midi(key, 100),
                0,
                SAMPLE_RATE,
            );
            index
        }

        fn state_of(&self, index: u32) -> NoteState {
            self.notes[index as usize].state()
        }
    }

    // === Binding ===

    #[test]
    fn bind_once_then_error() {
        let mut g = Group::new();
        assert!(!g.is_bound());
        g.bind(5).unwrap();
        assert_eq!(g.id(), 5);
        assert_eq!(g.bind(6), Err(EngineError::GroupAlreadyBound));
        assert_eq!(g.id(), 5);
    }

    // === Note lifecycle ===

    #[test]
    fn note_on_lands_in_attacked() {
        let mut f = fixture(4);
        let idx = f.start_note(128, 60);
        assert_eq!(f.state_of(idx), NoteState::Attacked);
        assert_eq!(f.group.active_len(), 1);
        assert_eq!(f.group.sounding_len(), 1);
    }

    #[test]
    fn note_off_without_pedals_releases() {
        let mut f = fixture(4);
        let idx = f.start_note(128, 60);
        f.group.note_off(&mut f.notes, 128, 100);
        assert_eq!(f.state_of(idx), NoteState::Released);
        assert_eq!(f.notes[idx as usize].release_frame(), Some(100));
    }

    #[test]
    fn note_off_unknown_id_is_ignored() {
        let mut f = fixture(4);
        f.start_note(128, 60);
        f.group.note_off(&mut f.notes, 999, 100);
        assert_eq!(f.group.list(NoteState::Attacked).len(), 1);
    }

    #[test]
    fn start_frame_uses_offset_before_first_render() {
        let g = Group::new();
        assert_eq!(g.start_frame_for(37), 37);
    }

    #[test]
    fn start_frame_tracks_rendered_position() {
        let mut f = fixture(2);
        let mut buffers = vec![AudioBuffer::stereo_block()];
        f.group
            .render(2048, &mut f.notes, &mut f.free, &mut buffers, SAMPLE_RATE)
            .unwrap();
        assert_eq!(f.group.start_frame_for(10), 2058);
    }

    // === Sustain pedal ===

    #[test]
    fn note_off_under_sustain_is_deferred() {
        let mut f = fixture(4);
        let idx = f.start_note(128, 60);
        f.group.sustain_on(0);
        f.group.note_off(&mut f.notes, 128, 100);
        assert_eq!(f.state_of(idx), NoteState::ReleasedButSustained);
        assert_eq!(f.notes[idx as usize].release_frame(), None);

        f.group.sustain_off(&mut f.notes, 200);
        assert_eq!(f.state_of(idx), NoteState::Released);
        assert_eq!(f.notes[idx as usize].release_frame(), Some(200));
    }

    #[test]
    fn sustain_sets_and_clears_its_controller() {
        let mut f = fixture(2);
        f.group.sustain_on(0);
        assert_eq!(f.group.controls().controller(cc::SUSTAIN_PEDAL), 127);
        f.group.sustain_off(&mut f.notes, 0);
        assert_eq!(f.group.controls().controller(cc::SUSTAIN_PEDAL), 0);
    }

    #[test]
    fn sustain_on_is_idempotent() {
        let mut f = fixture(4);
        f.group.sustain_on(0);
        f.group.sustain_on(0);
        assert!(f.group.sustain_is_on());
        let idx = f.start_note(128, 60);
        f.group.note_off(&mut f.notes, 128, 50);
        assert_eq!(f.state_of(idx), NoteState::ReleasedButSustained);
    }

    // === Sostenuto pedal ===

    #[test]
    fn sostenuto_captures_only_held_notes() {
        let mut f = fixture(4);
        let early = f.start_note(128, 60);
        f.group.sostenuto_on(&mut f.notes, 0);
        let late = f.start_note(129, 64);

        assert_eq!(f.state_of(early), NoteState::Sostenutoed);
        assert_eq!(f.state_of(late), NoteState::Attacked);

        // Key-up on the captured note parks it; the uncaptured one
        // releases normally.
        f.group.note_off(&mut f.notes, 128, 100);
        f.group.note_off(&mut f.notes, 129, 100);
        assert_eq!(f.state_of(early), NoteState::ReleasedButSostenutoed);
        assert_eq!(f.state_of(late), NoteState::Released);
    }

    #[test]
    fn sostenuto_off_returns_held_keys_to_attacked() {
        let mut f = fixture(4);
        let idx = f.start_note(128, 60);
        f.group.sostenuto_on(&mut f.notes, 0);
        f.group.sostenuto_off(&mut f.notes, 50);
        assert_eq!(f.state_of(idx), NoteState::Attacked);
    }

    #[test]
    fn sostenuto_off_releases_parked_notes() {
        let mut f = fixture(4);
        let idx = f.start_note(128, 60);
        f.group.sostenuto_on(&mut f.notes, 0);
        f.group.note_off(&mut f.notes, 128, 100);
        f.group.sostenuto_off(&mut f.notes, 200);
        assert_eq!(f.state_of(idx), NoteState::Released);
        assert_eq!(f.notes[idx as usize].release_frame(), Some(200));
    }

    #[test]
    fn sostenuto_off_under_sustain_keeps_notes_held() {
        let mut f = fixture(4);
        let idx = f.start_note(128, 60);
        f.group.sostenuto_on(&mut f.notes, 0);
        f.group.note_off(&mut f.notes, 128, 100);
        f.group.sustain_on(150);
        f.group.sostenuto_off(&mut f.notes, 200);
        assert_eq!(f.state_of(idx), NoteState::ReleasedButSustained);
        assert_eq!(f.notes[idx as usize].release_frame(), None);
    }

    // === Bulk operations ===

    #[test]
    fn all_notes_off_releases_held_keys() {
        let mut f = fixture(4);
        let a = f.start_note(128, 60);
        f.group.sostenuto_on(&mut f.notes, 0);
        let b = f.start_note(129, 64);
        f.group.all_notes_off(&mut f.notes, 300);

        assert_eq!(f.state_of(b), NoteState::Released);
        assert_eq!(f.state_of(a), NoteState::ReleasedButSostenutoed);
        assert_eq!(f.notes[a as usize].release_frame(), Some(300));
        assert_eq!(f.notes[b as usize].release_frame(), Some(300));
    }

    #[test]
    fn all_sound_off_fast_releases_everything_active() {
        let mut f = fixture(4);
        f.start_note(128, 60);
        let b = f.start_note(129, 64);
        f.group.note_off(&mut f.notes, 129, 50);

        let deactivated = f.group.all_sound_off(&mut f.notes, 100);
        assert_eq!(deactivated, 2);
        assert_eq!(f.group.active_len(), 0);
        assert_eq!(f.group.list(NoteState::FastReleased).len(), 2);
        assert_eq!(f.state_of(b), NoteState::FastReleased);
    }

    // === Reset ===

    #[test]
    fn reset_returns_slots_and_clears_pedals() {
        let mut f = fixture(4);
        f.start_note(128, 60);
        f.start_note(129, 64);
        f.group.sustain_on(0);
        f.group.controls_mut().set_pitch_wheel(0);

        f.group.reset(&mut f.notes, &mut f.free, 500);
        assert_eq!(f.group.sounding_len(), 0);
        assert_eq!(f.free.len(), 4);
        assert!(!f.group.sustain_is_on());
        assert_eq!(f.group.controls().pitch_bend(), 0.0);
        // The binding survives a reset.
        assert!(f.group.is_bound());
    }

    // === Render ===

    #[test]
    fn render_produces_audio_for_attacked_notes() {
        let mut f = fixture(4);
        f.start_note(128, 69);
        let mut buffers = vec![AudioBuffer::stereo_block()];
        f.group
            .render(0, &mut f.notes, &mut f.free, &mut buffers, SAMPLE_RATE)
            .unwrap();
        assert!(buffers[0].peak() > 0.0);
    }

    #[test]
    fn duplicate_frame_render_is_noop() {
        let mut f = fixture(4);
        f.start_note(128, 69);
        let mut buffers = vec![AudioBuffer::stereo_block()];
        f.group
            .render(0, &mut f.notes, &mut f.free, &mut buffers, SAMPLE_RATE)
            .unwrap();
        let peak = buffers[0].peak();
        f.group
            .render(0, &mut f.notes, &mut f.free, &mut buffers, SAMPLE_RATE)
            .unwrap();
        assert_eq!(buffers[0].peak(), peak);
    }

    #[test]
    fn finished_notes_return_to_free_list() {
        let mut f = fixture(2);
        let idx = f.start_note(128, 69);
        f.group.note_off(&mut f.notes, 128, 0);
        let mut buffers = vec![AudioBuffer::stereo_block()];

        let mut abs_frame = 0u64;
        let mut ended = 0;
        for _ in 0..2000 {
            ended = f
                .group
                .render(abs_frame, &mut f.notes, &mut f.free, &mut buffers, SAMPLE_RATE)
                .unwrap();
            if ended > 0 {
                break;
            }
            abs_frame += buffers[0].frames() as u64;
        }
        assert_eq!(ended, 1);
        assert_eq!(f.state_of(idx), NoteState::Free);
        assert_eq!(f.free.len(), 2);
        assert_eq!(f.group.sounding_len(), 0);
    }

    #[test]
    fn output_bus_clamps_to_available_buffers() {
        let mut f = fixture(2);
        f.group.set_output_bus(7);
        f.start_note(128, 69);
        let mut buffers = vec![AudioBuffer::stereo_block()];
        f.group
            .render(0, &mut f.notes, &mut f.free, &mut buffers, SAMPLE_RATE)
            .unwrap();
        assert!(buffers[0].peak() > 0.0);
    }
}
