//! Part element: key/velocity zones and per-part polyphony limits.

use pv_ir::GroupId;

/// Maximum number of parts an instrument can carry.
pub const MAX_PARTS: usize = 16;

/// `max_polyphony` value meaning "no per-part limit".
pub const UNLIMITED_POLYPHONY: u32 = u32::MAX;

/// Key and velocity range a part responds to. Bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyZone {
    pub lo_key: u8,
    pub hi_key: u8,
    pub lo_velocity: u8,
    pub hi_velocity: u8,
}

impl KeyZone {
    /// The whole keyboard at every velocity.
    pub const FULL: KeyZone = KeyZone {
        lo_key: 0,
        hi_key: 127,
        lo_velocity: 0,
        hi_velocity: 127,
    };

    pub fn new(lo_key: u8, hi_key: u8, lo_velocity: u8, hi_velocity: u8) -> Self {
        Self {
            lo_key,
            hi_key,
            lo_velocity,
            hi_velocity,
        }
    }

    /// Zone test against fractional pitch and velocity.
    pub fn contains(&self, pitch: f32, velocity: f32) -> bool {
        pitch >= f32::from(self.lo_key)
            && pitch <= f32::from(self.hi_key)
            && velocity >= f32::from(self.lo_velocity)
            && velocity <= f32::from(self.hi_velocity)
    }
}

impl Default for KeyZone {
    fn default() -> Self {
        Self::FULL
    }
}

/// A timbral layer: routes in-zone notes to a group, with an optional
/// polyphony cap enforced by fast-releasing the part's oldest note.
#[derive(Clone, Copy, Debug)]
pub struct Part {
    group: GroupId,
    patch: u32,
    max_polyphony: u32,
    zone: KeyZone,
}

impl Part {
    pub fn new(group: GroupId) -> Self {
        Self {
            group,
            patch: 0,
            max_polyphony: UNLIMITED_POLYPHONY,
            zone: KeyZone::FULL,
        }
    }

    pub fn with_zone(mut self, zone: KeyZone) -> Self {
        self.zone = zone;
        self
    }

    pub fn with_max_polyphony(mut self, max: u32) -> Self {
        self.max_polyphony = max;
        self
    }

    pub fn with_patch(mut self, patch: u32) -> Self {
        self.patch = patch;
        self
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    pub fn max_polyphony(&self) -> u32 {
        self.max_polyphony
    }

    pub fn set_max_polyphony(&mut self, max: u32) {
        self.max_polyphony = max;
    }

    pub fn zone(&self) -> KeyZone {
        self.zone
    }

    pub fn in_range(&self, pitch: f32, velocity: f32) -> bool {
        self.zone.contains(pitch, velocity)
    }
}
