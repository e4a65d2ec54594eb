//! Multi-touch slot table
//!
//! Decodes the kernel's type B multi-touch protocol for one device.
//! ABS_MT_* events mutate the slot addressed by the last ABS_MT_SLOT;
//! SYN_REPORT closes a frame, and the slots that changed since the
//! previous frame are reported together as one batch of contacts.

use crate::constants::MAX_SLOTS;

use super::ioctl::{
    ABS_MT_POSITION_X, ABS_MT_POSITION_Y, ABS_MT_SLOT, ABS_MT_TRACKING_ID, EV_ABS, EV_SYN,
    SYN_DROPPED, SYN_REPORT,
};

/// One tracked finger contact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchSlot {
    pub active: bool,
    pub x: i32,
    pub y: i32,
    pub tracking_id: i32,
}

impl Default for TouchSlot {
    fn default() -> Self {
        Self {
            active: false,
            x: 0,
            y: 0,
            tracking_id: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactPhase {
    Down,
    Move,
    Up,
}

/// Per-slot change within one synchronized frame (raw device coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contact {
    pub slot: usize,
    pub phase: ContactPhase,
    pub x: i32,
    pub y: i32,
}

/// Result of feeding one raw event to the decoder
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// Mid-frame, nothing to report
    Pending,
    /// Frame closed with these changes
    Frame(Vec<Contact>),
    /// Events were dropped by the kernel; caller must re-query slot state
    Resync,
}

/// Slot state of one device
#[derive(Debug, Clone)]
pub struct SlotTable {
    slots: [TouchSlot; MAX_SLOTS],
    /// State as of the last SYN_REPORT
    synced: [TouchSlot; MAX_SLOTS],
    /// Slot addressed by ABS_MT_* events (None = out of range, ignore)
    current: Option<usize>,
    /// Discarding events after SYN_DROPPED
    dropping: bool,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: [TouchSlot::default(); MAX_SLOTS],
            synced: [TouchSlot::default(); MAX_SLOTS],
            current: Some(0),
            dropping: false,
        }
    }

    #[cfg(test)]
    pub fn current_slot(&self) -> Option<usize> {
        self.current
    }

    /// Set the addressed slot (from EVIOCGABS(ABS_MT_SLOT) at open)
    pub fn set_current_slot(&mut self, slot: i32) {
        self.current = slot_index(slot);
    }

    /// Number of fingers down as of the last frame
    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.synced.iter().filter(|s| s.active).count()
    }

    /// Feed one raw event
    pub fn apply(&mut self, ev_type: u16, code: u16, value: i32) -> Decoded {
        if self.dropping {
            if ev_type == EV_SYN && code == SYN_REPORT {
                self.dropping = false;
                return Decoded::Resync;
            }
            return Decoded::Pending;
        }

        match (ev_type, code) {
            (EV_SYN, SYN_DROPPED) => {
                self.dropping = true;
                Decoded::Pending
            }
            (EV_SYN, SYN_REPORT) => {
                let contacts = self.commit();
                if contacts.is_empty() {
                    Decoded::Pending
                } else {
                    Decoded::Frame(contacts)
                }
            }
            (EV_ABS, ABS_MT_SLOT) => {
                self.current = slot_index(value);
                Decoded::Pending
            }
            (EV_ABS, ABS_MT_TRACKING_ID) => {
                if let Some(slot) = self.current_mut() {
                    if value < 0 {
                        slot.active = false;
                    } else {
                        slot.active = true;
                        slot.tracking_id = value;
                    }
                }
                Decoded::Pending
            }
            (EV_ABS, ABS_MT_POSITION_X) => {
                if let Some(slot) = self.current_mut() {
                    slot.x = value;
                }
                Decoded::Pending
            }
            (EV_ABS, ABS_MT_POSITION_Y) => {
                if let Some(slot) = self.current_mut() {
                    slot.y = value;
                }
                Decoded::Pending
            }
            _ => Decoded::Pending,
        }
    }

    /// Replace slot state with values queried via EVIOCGMTSLOTS and
    /// report the differences as one frame
    pub fn resync(&mut self, tracking_ids: &[i32], xs: &[i32], ys: &[i32]) -> Vec<Contact> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let id = tracking_ids.get(i).copied().unwrap_or(-1);
            slot.active = id >= 0;
            if id >= 0 {
                slot.tracking_id = id;
            }
            if let Some(&x) = xs.get(i) {
                slot.x = x;
            }
            if let Some(&y) = ys.get(i) {
                slot.y = y;
            }
        }
        self.commit()
    }

    /// Lift every active slot (device went away)
    pub fn release_all(&mut self) -> Vec<Contact> {
        for slot in self.slots.iter_mut() {
            slot.active = false;
        }
        self.dropping = false;
        self.commit()
    }

    fn current_mut(&mut self) -> Option<&mut TouchSlot> {
        match self.current {
            Some(i) => Some(&mut self.slots[i]),
            None => None,
        }
    }

    /// Diff live slots against the last synced frame, then sync.
    /// Ups come first so a finger lifting and another landing in the
    /// same frame are seen in that order.
    fn commit(&mut self) -> Vec<Contact> {
        let mut ups = Vec::new();
        let mut moves = Vec::new();
        let mut downs = Vec::new();

        for (i, (prev, cur)) in self.synced.iter().zip(self.slots.iter()).enumerate() {
            let contact = |phase, s: &TouchSlot| Contact {
                slot: i,
                phase,
                x: s.x,
                y: s.y,
            };
            match (prev.active, cur.active) {
                (false, true) => downs.push(contact(ContactPhase::Down, cur)),
                (true, false) => ups.push(contact(ContactPhase::Up, cur)),
                (true, true) if prev.tracking_id != cur.tracking_id => {
                    ups.push(contact(ContactPhase::Up, prev));
                    downs.push(contact(ContactPhase::Down, cur));
                }
                (true, true) if prev.x != cur.x || prev.y != cur.y => {
                    moves.push(contact(ContactPhase::Move, cur))
                }
                _ => {}
            }
        }

        self.synced = self.slots;
        ups.extend(moves);
        ups.extend(downs);
        ups
    }
}

fn slot_index(value: i32) -> Option<usize> {
    usize::try_from(value).ok().filter(|&s| s < MAX_SLOTS)
}
