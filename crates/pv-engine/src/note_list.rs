//! Intrusive per-state note lists.
//!
//! Each list owns the notes in exactly one [`NoteState`]; the links live
//! inside the note slots themselves (`prev`/`next` indices into the
//! shared pool), so list surgery never allocates.

use crate::note::{Note, NoteState, NO_NOTE};
use crate::voice::Voice;

/// A doubly-linked list of pool indices, all in the same state.
#[derive(Clone, Copy, Debug)]
pub struct NoteList {
    state: NoteState,
    head: u32,
    len: usize,
}

impl NoteList {
    pub fn new(state: NoteState) -> Self {
        Self {
            state,
            head: NO_NOTE,
            len: 0,
        }
    }

    /// The state every member of this list is in.
    pub fn state(&self) -> NoteState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the most recently pushed note, or `NO_NOTE`.
    pub fn head(&self) -> u32 {
        self.head
    }

    /// Link the slot at `index` in at the front and stamp it with this
    /// list's state. The slot must not currently be on any list.
    pub fn push_front<V: Voice>(&mut self, notes: &mut [Note<V>], index: u32) {
        let old_head = self.head;
        {
            let note = &mut notes[index as usize];
            note.prev = NO_NOTE;
            note.next = old_head;
            note.set_state(self.state);
        }
        if old_head != NO_NOTE {
            notes[old_head as usize].prev = index;
        }
        self.head = index;
        self.len += 1;
    }

    /// Unlink the slot at `index`. The slot must be a member of this
    /// list.
    pub fn remove<V: Voice>(&mut self, notes: &mut [Note<V>], index: u32) {
        let (prev, next) = {
            let note = &mut notes[index as usize];
            let links = (note.prev, note.next);
            note.prev = NO_NOTE;
            note.next = NO_NOTE;
            links
        };
        if prev != NO_NOTE {
            notes[prev as usize].next = next;
        } else {
            self.head = next;
        }
        if next != NO_NOTE {
            notes[next as usize].prev = prev;
        }
        self.len -= 1;
    }

    /// Unlink and return the front slot, if any.
    pub fn pop_front<V: Voice>(&mut self, notes: &mut [Note<V>]) -> Option<u32> {
        let index = self.head;
        if index == NO_NOTE {
            return None;
        }
        self.remove(notes, index);
        Some(index)
    }

    /// Move every note from `other` onto the front of this list,
    /// restamping states. When this is the `Released` list the move is a
    /// release: each transferred note's envelope is released at `frame`.
    pub fn transfer_all_from<V: Voice>(
        &mut self,
        other: &mut NoteList,
        notes: &mut [Note<V>],
        frame: u64,
    ) {
        if other.head == NO_NOTE {
            return;
        }

        let mut tail = other.head;
        let mut index = other.head;
        while index != NO_NOTE {
            tail = index;
            let note = &mut notes[index as usize];
            note.set_state(self.state);
            if self.state == NoteState::Released {
                note.release(frame);
            }
            index = note.next;
        }

        notes[tail as usize].next = self.head;
        if self.head != NO_NOTE {
            notes[self.head as usize].prev = tail;
        }
        self.head = other.head;
        self.len += other.len;
        other.head = NO_NOTE;
        other.len = 0;
    }

    /// Index of the member with the lowest amplitude; ties go to the
    /// note that started earliest.
    pub fn most_quiet<V: Voice>(&self, notes: &[Note<V>]) -> Option<u32> {
        let mut best = NO_NOTE;
        let mut best_amp = f32::INFINITY;
        let mut best_start = u64::MAX;
        let mut index = self.head;
        while index != NO_NOTE {
            let note = &notes[index as usize];
            let amp = note.amplitude();
            if amp < best_amp || (amp == best_amp && note.start_frame() < best_start) {
                best = index;
                best_amp = amp;
                best_start = note.start_frame();
            }
            index = note.next;
        }
        if best == NO_NOTE {
            None
        } else {
            Some(best)
        }
    }

    /// Index of the member that started earliest.
    pub fn oldest<V: Voice>(&self, notes: &[Note<V>]) -> Option<u32> {
        let mut best = NO_NOTE;
        let mut best_start = u64::MAX;
        let mut index = self.head;
        while index != NO_NOTE {
            let note = &notes[index as usize];
            if note.start_frame() < best_start {
                best = index;
                best_start = note.start_frame();
            }
            index = note.next;
        }
        if best == NO_NOTE {
            None
        } else {
            Some(best)
        }
    }
}
