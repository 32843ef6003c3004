//! The instrument engine: event dispatch, the note pool, and stealing.
//!
//! Construction splits the engine into two halves. [`Instrument`] owns
//! the note arena, the groups, and the consumer end of the event queue;
//! it belongs to the render thread. [`ControlHandle`] owns the producer
//! end and the note-ID counter; it belongs to the control thread. Which
//! code path runs is decided by which half you hold, so there is no
//! "are we on the render thread?" check anywhere.

use alloc::vec::Vec;

use pv_ir::{cc, AudioBuffer, Event, EventPayload, GroupId, NoteId, NoteParams, CC_SWITCH_THRESHOLD};

use crate::error::EngineError;
use crate::event_queue::{new_queue, EventConsumer, EventProducer, QueueFull, EVENT_QUEUE_SIZE};
use crate::group::Group;
use crate::note::{Note, NoteState, NO_PART};
use crate::note_list::NoteList;
use crate::part::{Part, MAX_PARTS};
use crate::voice::Voice;

/// First note ID handed out by a [`ControlHandle`]. IDs below this are
/// reserved for callers that address notes by MIDI key.
pub const FIRST_NOTE_ID: NoteId = 128;

/// Engine dimensions, fixed at construction.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f32,
    /// Size of the note pool.
    pub num_notes: usize,
    /// Active-note ceiling; reaching it triggers soft stealing.
    pub max_active_notes: usize,
    /// Number of group elements available for binding.
    pub num_groups: usize,
    /// Slot count of the control-to-render event queue.
    pub event_queue_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            num_notes: 64,
            max_active_notes: 64,
            num_groups: 16,
            event_queue_size: EVENT_QUEUE_SIZE,
        }
    }
}

/// Render-thread half of the engine.
pub struct Instrument<V: Voice> {
    events: EventConsumer,
    core: Core<V>,
}

/// Control-thread half: enqueues events and mints note IDs.
pub struct ControlHandle {
    events: EventProducer,
    note_id_counter: NoteId,
}

struct Core<V: Voice> {
    sample_rate: f32,
    max_active: usize,
    num_active: usize,
    absolute_frame: u64,
    notes: Vec<Note<V>>,
    free: NoteList,
    groups: Vec<Group>,
    parts: heapless::Vec<Part, MAX_PARTS>,
}

impl<V: Voice + Clone> Instrument<V> {
    /// Build an engine around `voice_template`, one clone per pool slot.
    pub fn new(voice_template: V, config: EngineConfig) -> (Self, ControlHandle) {
        let (producer, consumer) = new_queue(config.event_queue_size);

        let mut notes: Vec<Note<V>> = (0..config.num_notes)
            .map(|_| Note::new(voice_template.clone()))
            .collect();
        let mut free = NoteList::new(NoteState::Free);
        for i in (0..notes.len() as u32).rev() {
            free.push_front(&mut notes, i);
        }

        let instrument = Self {
            events: consumer,
            core: Core {
                sample_rate: config.sample_rate,
                max_active: config.max_active_notes,
                num_active: 0,
                absolute_frame: 0,
                notes,
                free,
                groups: (0..config.num_groups).map(|_| Group::new()).collect(),
                parts: heapless::Vec::new(),
            },
        };
        let handle = ControlHandle {
            events: producer,
            note_id_counter: FIRST_NOTE_ID,
        };
        (instrument, handle)
    }
}

impl<V: Voice> Instrument<V> {
    /// Register a part. Parts are set up before rendering starts.
    pub fn add_part(&mut self, part: Part) -> Result<(), EngineError> {
        self.core
            .parts
            .push(part)
            .map_err(|_| EngineError::TooManyParts)
    }

    /// Render one block: drain pending events, silence `buffers`, run
    /// every group, then advance the absolute frame position.
    pub fn render(&mut self, buffers: &mut [AudioBuffer]) -> Result<(), EngineError> {
        self.perform_events()?;
        self.core.render_block(buffers)
    }

    /// Dispatch everything the control thread has queued.
    fn perform_events(&mut self) -> Result<(), EngineError> {
        while let Some(event) = self.events.peek() {
            let result = self.core.dispatch(event);
            self.events.advance();
            result?;
        }
        Ok(())
    }

    /// Fast-release every sounding note on every group.
    pub fn panic(&mut self) {
        let frame = self.core.absolute_frame;
        for group in &mut self.core.groups {
            group.all_sound_off(&mut self.core.notes, frame);
        }
        self.core.recount_active();
    }

    /// Kill everything and restore the engine to its initial state.
    pub fn reset(&mut self) {
        self.core.reset();
    }

    pub fn active_notes(&self) -> usize {
        self.core.num_active
    }

    /// Frames rendered since construction or the last reset.
    pub fn absolute_frame(&self) -> u64 {
        self.core.absolute_frame
    }

    pub fn sample_rate(&self) -> f32 {
        self.core.sample_rate
    }

    /// The group bound to `id`, if any.
    pub fn group_for(&self, id: GroupId) -> Option<&Group> {
        self.core.groups.iter().find(|g| g.id() == id)
    }
}

impl ControlHandle {
    fn next_note_id(&mut self) -> NoteId {
        let id = self.note_id_counter;
        self.note_id_counter = match self.note_id_counter.checked_add(1) {
            Some(next) => next,
            None => FIRST_NOTE_ID,
        };
        id
    }

    /// Queue a note-on and return the ID minted for it.
    pub fn note_attack(
        &mut self,
        group: GroupId,
        params: NoteParams,
        offset: u32,
    ) -> Result<NoteId, QueueFull<Event>> {
        let note_id = self.next_note_id();
        self.events.push(Event::new(
            offset,
            EventPayload::NoteOn {
                note_id,
                group,
                params,
            },
        ))?;
        Ok(note_id)
    }

    /// Queue a key-up for a previously attacked note.
    pub fn note_release(
        &mut self,
        group: GroupId,
        note_id: NoteId,
        offset: u32,
    ) -> Result<(), QueueFull<Event>> {
        self.events
            .push(Event::new(offset, EventPayload::NoteOff { note_id, group }))
    }

    pub fn control_change(
        &mut self,
        group: GroupId,
        controller: u8,
        value: u8,
        offset: u32,
    ) -> Result<(), QueueFull<Event>> {
        self.events.push(Event::new(
            offset,
            EventPayload::Controller {
                group,
                controller,
                value,
            },
        ))
    }

    /// Raw 14-bit pitch wheel position (center 8192).
    pub fn pitch_bend(
        &mut self,
        group: GroupId,
        value: u16,
        offset: u32,
    ) -> Result<(), QueueFull<Event>> {
        self.events
            .push(Event::new(offset, EventPayload::PitchBend { group, value }))
    }

    pub fn program_change(
        &mut self,
        group: GroupId,
        program: u16,
        offset: u32,
    ) -> Result<(), QueueFull<Event>> {
        self.events.push(Event::new(
            offset,
            EventPayload::ProgramChange { group, program },
        ))
    }

    pub fn channel_pressure(
        &mut self,
        group: GroupId,
        value: u8,
        offset: u32,
    ) -> Result<(), QueueFull<Event>> {
        self.events.push(Event::new(
            offset,
            EventPayload::ChannelPressure { group, value },
        ))
    }

    pub fn poly_pressure(
        &mut self,
        group: GroupId,
        key: u8,
        value: u8,
        offset: u32,
    ) -> Result<(), QueueFull<Event>> {
        self.events.push(Event::new(
            offset,
            EventPayload::PolyPressure { group, key, value },
        ))
    }

    pub fn all_notes_off(&mut self, group: GroupId, offset: u32) -> Result<(), QueueFull<Event>> {
        self.events
            .push(Event::new(offset, EventPayload::AllNotesOff { group }))
    }

    pub fn all_sound_off(&mut self, group: GroupId, offset: u32) -> Result<(), QueueFull<Event>> {
        self.events
            .push(Event::new(offset, EventPayload::AllSoundOff { group }))
    }

    /// Fast-release everything on every group.
    pub fn panic(&mut self) -> Result<(), QueueFull<Event>> {
        self.all_sound_off(pv_ir::UNASSIGNED_GROUP, 0)
    }

    /// Queue a full engine reset.
    pub fn reset(&mut self) -> Result<(), QueueFull<Event>> {
        self.events.push(Event::new(0, EventPayload::Reset))
    }
}

impl<V: Voice> Core<V> {
    fn dispatch(&mut self, event: &Event) -> Result<(), EngineError> {
        let offset = event.frame_offset;
        let frame = self.absolute_frame + u64::from(offset);
        match event.payload {
            EventPayload::NoteOn {
                note_id,
                group,
                ref params,
            } => self.start_note(group, note_id, offset, params),
            EventPayload::NoteOff { note_id, group } => {
                if let Some(gi) = self.group_for_note_off(group, note_id) {
                    self.groups[gi].note_off(&mut self.notes, note_id, frame);
                }
                Ok(())
            }
            EventPayload::PitchBend { group, value } => {
                let gi = self.bind_group(group)?;
                self.groups[gi].controls_mut().set_pitch_wheel(value);
                Ok(())
            }
            EventPayload::Controller {
                group,
                controller,
                value,
            } => self.control_change(group, controller, value, frame),
            EventPayload::ProgramChange { group, program } => {
                let gi = self.bind_group(group)?;
                self.groups[gi].controls_mut().set_program(program);
                Ok(())
            }
            EventPayload::ChannelPressure { group, value } => {
                let gi = self.bind_group(group)?;
                self.groups[gi].controls_mut().set_channel_pressure(value);
                Ok(())
            }
            EventPayload::PolyPressure { group, key, value } => {
                let gi = self.bind_group(group)?;
                self.groups[gi].controls_mut().set_poly_pressure(key, value);
                Ok(())
            }
            EventPayload::AllNotesOff { group } => {
                let gi = self.bind_group(group)?;
                self.groups[gi].all_notes_off(&mut self.notes, frame);
                self.recount_active();
                Ok(())
            }
            EventPayload::AllSoundOff { group } => {
                if group == pv_ir::UNASSIGNED_GROUP {
                    // Panic: cut every group, not just one.
                    for g in &mut self.groups {
                        g.all_sound_off(&mut self.notes, frame);
                    }
                } else {
                    let gi = self.bind_group(group)?;
                    self.groups[gi].all_sound_off(&mut self.notes, frame);
                }
                self.recount_active();
                Ok(())
            }
            EventPayload::Reset => {
                self.reset();
                Ok(())
            }
        }
    }

    /// Index of the group bound to `id`, binding the first unassigned
    /// group on demand.
    fn bind_group(&mut self, id: GroupId) -> Result<usize, EngineError> {
        for (i, group) in self.groups.iter().enumerate() {
            if group.id() == id {
                return Ok(i);
            }
            // Unassigned groups fill up from the front, so the first one
            // found is the one to bind.
            if !group.is_bound() {
                self.groups[i].bind(id)?;
                return Ok(i);
            }
        }
        Err(EngineError::NoFreeGroup)
    }

    /// Note-offs with an unassigned group ID locate the note by
    /// searching every group.
    fn group_for_note_off(&mut self, group: GroupId, note_id: NoteId) -> Option<usize> {
        if group == pv_ir::UNASSIGNED_GROUP {
            self.groups
                .iter()
                .position(|g| g.find_note(&self.notes, note_id, false).is_some())
        } else {
            self.bind_group(group).ok()
        }
    }

    fn start_note(
        &mut self,
        group: GroupId,
        note_id: NoteId,
        offset: u32,
        params: &NoteParams,
    ) -> Result<(), EngineError> {
        let frame = self.absolute_frame + u64::from(offset);

        // Parts, when configured, gate and route the note.
        let part = if self.parts.is_empty() {
            None
        } else {
            match self
                .parts
                .iter()
                .position(|p| p.in_range(params.pitch, params.velocity))
            {
                Some(pi) => Some(pi),
                // Out-of-zone notes are dropped.
                None => return Ok(()),
            }
        };
        let group = match part {
            Some(pi) => self.parts[pi].group(),
            None => group,
        };

        if let Some(pi) = part {
            self.enforce_part_polyphony(pi, frame);
        }
        if self.num_active >= self.max_active {
            self.steal(frame, false);
        }

        let gi = self.bind_group(group)?;
        let index = self.free_note(frame).ok_or(EngineError::NoFreeNote)?;
        self.num_active += 1;
        let part_index = match part {
            Some(pi) => pi as u16,
            None => NO_PART,
        };
        self.groups[gi].note_on(
            &mut self.notes,
            index,
            note_id,
            part_index,
            params,
            offset,
            self.sample_rate,
        );
        Ok(())
    }

    /// Fast-release the part's oldest notes until it is under its
    /// polyphony cap.
    fn enforce_part_polyphony(&mut self, part_index: usize, frame: u64) {
        let limit = self.parts[part_index].max_polyphony() as usize;
        loop {
            let member_count = self
                .notes
                .iter()
                .filter(|n| n.state().is_active() && n.part() == part_index as u16)
                .count();
            if member_count < limit.max(1) {
                return;
            }
            let oldest = self
                .notes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.state().is_active() && n.part() == part_index as u16)
                .min_by_key(|(_, n)| n.start_frame())
                .map(|(i, _)| i as u32);
            let Some(victim) = oldest else { return };
            let group_id = self.notes[victim as usize].group();
            let Some(gi) = self.groups.iter().position(|g| g.id() == group_id) else {
                return;
            };
            self.groups[gi].note_fast_released(&mut self.notes, victim, frame);
            self.num_active = self.num_active.saturating_sub(1);
        }
    }

    /// Pop a free slot, or steal one with kill semantics.
    fn free_note(&mut self, frame: u64) -> Option<u32> {
        if let Some(index) = self.free.pop_front(&mut self.notes) {
            return Some(index);
        }
        self.steal(frame, true)
    }

    /// Take a voice away from a sounding note.
    ///
    /// Scans states from the most expendable down to `Attacked`; within
    /// a state the first group with members donates its quietest note.
    /// Kill mode silences the victim and returns its slot for reuse.
    /// Soft mode fast-releases the victim in place and returns nothing.
    fn steal(&mut self, frame: u64, kill: bool) -> Option<u32> {
        let start = if kill {
            NoteState::FastReleased
        } else {
            NoteState::Released
        };
        for i in (0..=start as usize).rev() {
            let Some(state) = NoteState::from_index(i) else {
                continue;
            };
            for gi in 0..self.groups.len() {
                if self.groups[gi].list(state).is_empty() {
                    continue;
                }
                let Some(victim) = self.groups[gi].list(state).most_quiet(&self.notes) else {
                    continue;
                };
                if kill {
                    self.groups[gi].list_mut(state).remove(&mut self.notes, victim);
                    self.notes[victim as usize].kill(frame);
                    if state != NoteState::FastReleased {
                        self.num_active = self.num_active.saturating_sub(1);
                    }
                    return Some(victim);
                }
                self.groups[gi].note_fast_released(&mut self.notes, victim, frame);
                self.num_active = self.num_active.saturating_sub(1);
                return None;
            }
        }
        None
    }

    fn control_change(
        &mut self,
        group: GroupId,
        controller: u8,
        value: u8,
        frame: u64,
    ) -> Result<(), EngineError> {
        let gi = self.bind_group(group)?;
        match controller {
            cc::SUSTAIN_PEDAL => {
                if value >= CC_SWITCH_THRESHOLD {
                    self.groups[gi].sustain_on(frame);
                } else {
                    self.groups[gi].sustain_off(&mut self.notes, frame);
                }
            }
            cc::SOSTENUTO_PEDAL => {
                if value >= CC_SWITCH_THRESHOLD {
                    self.groups[gi].sostenuto_on(&mut self.notes, frame);
                } else {
                    self.groups[gi].sostenuto_off(&mut self.notes, frame);
                }
            }
            cc::ALL_SOUND_OFF => {
                self.groups[gi].all_sound_off(&mut self.notes, frame);
                self.recount_active();
            }
            cc::RESET_ALL_CONTROLLERS => {
                self.groups[gi].reset_controllers();
            }
            cc::ALL_NOTES_OFF => {
                self.groups[gi].all_notes_off(&mut self.notes, frame);
                self.recount_active();
            }
            cc::OMNI_MODE_OFF | cc::OMNI_MODE_ON | cc::MONO_MODE_ON | cc::MONO_MODE_OFF => {
                // Mode changes imply releasing everything.
                self.groups[gi].all_sound_off(&mut self.notes, frame);
                self.recount_active();
            }
            n if n <= cc::RPN_MSB => {
                self.groups[gi].controls_mut().set_controller(n, value);
            }
            _ => {}
        }
        Ok(())
    }

    /// Recompute the active count from the pool after a bulk operation.
    fn recount_active(&mut self) {
        self.num_active = self
            .notes
            .iter()
            .filter(|n| n.state().is_active())
            .count();
    }

    fn render_block(&mut self, buffers: &mut [AudioBuffer]) -> Result<(), EngineError> {
        for buffer in buffers.iter_mut() {
            buffer.silence();
        }
        let frames = match buffers.first() {
            Some(buffer) => buffer.frames() as u64,
            None => return Ok(()),
        };
        for gi in 0..self.groups.len() {
            let ended = self.groups[gi].render(
                self.absolute_frame,
                &mut self.notes,
                &mut self.free,
                buffers,
                self.sample_rate,
            )?;
            self.num_active = self.num_active.saturating_sub(ended);
        }
        self.absolute_frame += frames;
        Ok(())
    }

    fn reset(&mut self) {
        let frame = self.absolute_frame;
        for gi in 0..self.groups.len() {
            self.groups[gi].reset(&mut self.notes, &mut self.free, frame);
        }
        self.num_active = 0;
        self.absolute_frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::SineVoice;
    use pv_ir::UNASSIGNED_GROUP;

    fn small_engine(num_notes: usize, max_active: usize) -> (Instrument<SineVoice>, ControlHandle) {
        Instrument::new(
            SineVoice::new(),
            EngineConfig {
                num_notes,
                max_active_notes: max_active,
                num_groups: 4,
                ..EngineConfig::default()
            },
        )
    }

    fn render_one(instrument: &mut Instrument<SineVoice>) -> AudioBuffer {
        let mut buffers = vec![AudioBuffer::stereo_block()];
        instrument.render(&mut buffers).unwrap();
        buffers.into_iter().next().unwrap()
    }

    // === Event round trip ===

    #[test]
    fn note_on_produces_audio() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        ctl.note_attack(0, NoteParams::from_midi(69, 100), 0).unwrap();
        let buf = render_one(&mut inst);
        assert!(buf.peak() > 0.0);
        assert_eq!(inst.active_notes(), 1);
    }

    #[test]
    fn note_ids_start_at_128_and_increment() {
        let (_inst, mut ctl) = small_engine(8, 8);
        let a = ctl.note_attack(0, NoteParams::from_midi(60, 100), 0).unwrap();
        let b = ctl.note_attack(0, NoteParams::from_midi(64, 100), 0).unwrap();
        assert_eq!(a, FIRST_NOTE_ID);
        assert_eq!(b, FIRST_NOTE_ID + 1);
    }

    #[test]
    fn note_release_moves_note_out_of_attacked() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        let id = ctl.note_attack(0, NoteParams::from_midi(69, 100), 0).unwrap();
        render_one(&mut inst);
        ctl.note_release(0, id, 0).unwrap();
        render_one(&mut inst);
        let group = inst.group_for(0).unwrap();
        assert_eq!(group.list(NoteState::Attacked).len(), 0);
        assert_eq!(group.list(NoteState::Released).len(), 1);
    }

    #[test]
    fn note_off_with_unassigned_group_searches_by_id() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        let id = ctl.note_attack(3, NoteParams::from_midi(69, 100), 0).unwrap();
        render_one(&mut inst);
        ctl.note_release(UNASSIGNED_GROUP, id, 0).unwrap();
        render_one(&mut inst);
        let group = inst.group_for(3).unwrap();
        assert_eq!(group.list(NoteState::Released).len(), 1);
    }

    #[test]
    fn absolute_frame_advances_per_block() {
        let (mut inst, _ctl) = small_engine(4, 4);
        assert_eq!(inst.absolute_frame(), 0);
        let buf = render_one(&mut inst);
        assert_eq!(inst.absolute_frame(), buf.frames() as u64);
    }

    // === Group binding ===

    #[test]
    fn groups_bind_on_demand() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        ctl.note_attack(7, NoteParams::from_midi(60, 100), 0).unwrap();
        ctl.note_attack(9, NoteParams::from_midi(64, 100), 0).unwrap();
        render_one(&mut inst);
        assert!(inst.group_for(7).is_some());
        assert!(inst.group_for(9).is_some());
        assert!(inst.group_for(11).is_none());
    }

    #[test]
    fn group_table_exhaustion_is_an_error() {
        // 4 group elements; a fifth distinct ID cannot bind.
        let (mut inst, mut ctl) = small_engine(16, 16);
        for id in 0..5u32 {
            ctl.note_attack(id, NoteParams::from_midi(60, 100), 0).unwrap();
        }
        let mut buffers = vec![AudioBuffer::stereo_block()];
        assert_eq!(
            inst.render(&mut buffers),
            Err(EngineError::NoFreeGroup)
        );
    }

    // === Controllers ===

    #[test]
    fn sustain_controller_defers_release() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        let id = ctl.note_attack(0, NoteParams::from_midi(69, 100), 0).unwrap();
        ctl.control_change(0, cc::SUSTAIN_PEDAL, 127, 0).unwrap();
        ctl.note_release(0, id, 0).unwrap();
        render_one(&mut inst);
        let group = inst.group_for(0).unwrap();
        assert_eq!(group.list(NoteState::ReleasedButSustained).len(), 1);

        ctl.control_change(0, cc::SUSTAIN_PEDAL, 0, 0).unwrap();
        render_one(&mut inst);
        let group = inst.group_for(0).unwrap();
        assert_eq!(group.list(NoteState::Released).len(), 1);
    }

    #[test]
    fn plain_controllers_are_stored() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        ctl.control_change(0, cc::MOD_WHEEL, 93, 0).unwrap();
        render_one(&mut inst);
        let group = inst.group_for(0).unwrap();
        assert_eq!(group.controls().controller(cc::MOD_WHEEL), 93);
    }

    #[test]
    fn mode_change_controllers_cut_all_sound() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        ctl.note_attack(0, NoteParams::from_midi(60, 100), 0).unwrap();
        ctl.note_attack(0, NoteParams::from_midi(64, 100), 0).unwrap();
        render_one(&mut inst);
        assert_eq!(inst.active_notes(), 2);

        ctl.control_change(0, cc::MONO_MODE_ON, 0, 0).unwrap();
        render_one(&mut inst);
        assert_eq!(inst.active_notes(), 0);
    }

    #[test]
    fn pitch_bend_reaches_group_controls() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        ctl.pitch_bend(0, 16383, 0).unwrap();
        render_one(&mut inst);
        let group = inst.group_for(0).unwrap();
        assert!(group.controls().pitch_bend() > 23.9);
    }

    #[test]
    fn pressure_and_program_events_land_in_controls() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        ctl.program_change(0, 42, 0).unwrap();
        ctl.channel_pressure(0, 70, 0).unwrap();
        ctl.poly_pressure(0, 60, 99, 0).unwrap();
        render_one(&mut inst);
        let controls = inst.group_for(0).unwrap().controls();
        assert_eq!(controls.program(), 42);
        assert_eq!(controls.channel_pressure(), 70);
        assert_eq!(controls.poly_pressure(60), 99);
    }

    // === Stealing ===

    #[test]
    fn pool_exhaustion_steals_instead_of_failing() {
        let (mut inst, mut ctl) = small_engine(4, 32);
        for i in 0..6 {
            ctl.note_attack(0, NoteParams::from_midi(40 + i, 100), 0).unwrap();
        }
        let buf = render_one(&mut inst);
        assert!(buf.peak() > 0.0);
        // Two of the six notes were stolen; the pool is fully loaded.
        assert_eq!(inst.active_notes(), 4);
        assert_eq!(inst.group_for(0).unwrap().sounding_len(), 4);
    }

    #[test]
    fn released_notes_are_stolen_before_attacked() {
        let (mut inst, mut ctl) = small_engine(2, 32);
        let a = ctl.note_attack(0, NoteParams::from_midi(60, 100), 0).unwrap();
        ctl.note_attack(0, NoteParams::from_midi(64, 100), 0).unwrap();
        render_one(&mut inst);
        ctl.note_release(0, a, 0).unwrap();
        render_one(&mut inst);

        // Pool is full; the released note must be the victim.
        ctl.note_attack(0, NoteParams::from_midi(67, 100), 0).unwrap();
        render_one(&mut inst);
        let group = inst.group_for(0).unwrap();
        assert_eq!(group.list(NoteState::Released).len(), 0);
        assert_eq!(group.list(NoteState::Attacked).len(), 2);
    }

    #[test]
    fn max_active_limit_fast_releases_in_place() {
        let (mut inst, mut ctl) = small_engine(8, 2);
        for i in 0..3 {
            ctl.note_attack(0, NoteParams::from_midi(60 + i, 100), 0).unwrap();
        }
        render_one(&mut inst);
        let group = inst.group_for(0).unwrap();
        // The third attack pushed one earlier note into fast release.
        assert_eq!(group.list(NoteState::FastReleased).len(), 1);
        assert_eq!(group.list(NoteState::Attacked).len(), 2);
        assert_eq!(inst.active_notes(), 2);
    }

    // === Parts ===

    #[test]
    fn parts_route_notes_to_their_group() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        inst.add_part(Part::new(5)).unwrap();
        ctl.note_attack(0, NoteParams::from_midi(60, 100), 0).unwrap();
        render_one(&mut inst);
        assert_eq!(inst.group_for(5).unwrap().active_len(), 1);
        assert!(inst.group_for(0).is_none());
    }

    #[test]
    fn out_of_zone_notes_are_dropped() {
        use crate::part::KeyZone;
        let (mut inst, mut ctl) = small_engine(8, 8);
        inst.add_part(Part::new(0).with_zone(KeyZone::new(60, 72, 0, 127)))
            .unwrap();
        ctl.note_attack(0, NoteParams::from_midi(40, 100), 0).unwrap();
        render_one(&mut inst);
        assert_eq!(inst.active_notes(), 0);
    }

    #[test]
    fn part_polyphony_cap_drops_oldest() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        inst.add_part(Part::new(0).with_max_polyphony(2)).unwrap();
        for i in 0..3 {
            ctl.note_attack(0, NoteParams::from_midi(60 + i, 100), 0).unwrap();
        }
        render_one(&mut inst);
        let group = inst.group_for(0).unwrap();
        assert_eq!(group.list(NoteState::FastReleased).len(), 1);
        assert_eq!(group.list(NoteState::Attacked).len(), 2);
    }

    #[test]
    fn part_table_overflows_cleanly() {
        let (mut inst, _ctl) = small_engine(4, 4);
        for _ in 0..MAX_PARTS {
            inst.add_part(Part::new(0)).unwrap();
        }
        assert_eq!(inst.add_part(Part::new(0)), Err(EngineError::TooManyParts));
    }

    // === Bulk operations ===

    #[test]
    fn all_sound_off_event_silences_group() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        for i in 0..3 {
            ctl.note_attack(0, NoteParams::from_midi(60 + i, 100), 0).unwrap();
        }
        render_one(&mut inst);
        ctl.all_sound_off(0, 0).unwrap();
        render_one(&mut inst);
        assert_eq!(inst.active_notes(), 0);
    }

    #[test]
    fn reset_event_restores_initial_state() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        for i in 0..3 {
            ctl.note_attack(0, NoteParams::from_midi(60 + i, 100), 0).unwrap();
        }
        render_one(&mut inst);
        ctl.reset().unwrap();
        render_one(&mut inst);
        assert_eq!(inst.active_notes(), 0);
        assert_eq!(inst.group_for(0).unwrap().sounding_len(), 0);
        // Frame position restarts after the reset block.
        assert_eq!(inst.absolute_frame(), pv_ir::BLOCK_SIZE as u64);
    }

    #[test]
    fn queued_panic_cuts_every_group() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        ctl.note_attack(0, NoteParams::from_midi(60, 100), 0).unwrap();
        ctl.note_attack(3, NoteParams::from_midi(64, 100), 0).unwrap();
        render_one(&mut inst);
        assert_eq!(inst.active_notes(), 2);
        ctl.panic().unwrap();
        render_one(&mut inst);
        assert_eq!(inst.active_notes(), 0);
        assert_eq!(inst.group_for(0).unwrap().active_len(), 0);
        assert_eq!(inst.group_for(3).unwrap().active_len(), 0);
    }

    #[test]
    fn panic_cuts_everything() {
        let (mut inst, mut ctl) = small_engine(8, 8);
        for i in 0..4 {
            ctl.note_attack(0, NoteParams::from_midi(60 + i, 100), 0).unwrap();
        }
        render_one(&mut inst);
        inst.panic();
        assert_eq!(inst.active_notes(), 0);
        let mut silent_after = false;
        for _ in 0..200 {
            let buf = render_one(&mut inst);
            if buf.peak() == 0.0 {
                silent_after = true;
                break;
            }
        }
        assert!(silent_after);
    }
}
