/// Sender-side sliding window: slot bookkeeping for in-flight packets.
///
/// The window is a fixed set of slots (vacant slots are `None`). Each
/// occupied slot owns one encoded frame and walks the state machine below.
/// This module only manages state; all socket I/O is the caller's
/// responsibility.
///
///   Virgin --send--> Waiting --ack--> Acknowledged --> Retired (slot freed)
///                      |                 ^
///                      +--deadline past--+--> TimedOut --resend--> Waiting
use std::collections::HashSet;
use std::time::Instant;

/// Transmission state of one windowed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Installed in the window, never sent.
    Virgin,
    /// Sent; awaiting acknowledgment until the deadline passes.
    Waiting { deadline: Instant },
    /// Acknowledgment observed; the slot is retired on the next sweep.
    Acknowledged,
    /// Deadline passed with no acknowledgment; due for resend.
    TimedOut,
    /// Acknowledged and removed from the window.
    Retired,
}

/// One in-flight packet: its sequence number, its encoded frame (reused
/// verbatim on resend), and where it stands.
#[derive(Debug)]
pub struct InFlightSlot {
    sequence: u16,
    frame: Vec<u8>,
    state: SlotState,
}

impl InFlightSlot {
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// `true` until the first transmission.
    pub fn is_virgin(&self) -> bool {
        matches!(self.state, SlotState::Virgin)
    }

    /// Record a transmission: the slot now waits until `deadline`.
    pub fn mark_waiting(&mut self, deadline: Instant) {
        self.state = SlotState::Waiting { deadline };
    }

    /// The retransmission deadline, while the slot is waiting for an
    /// acknowledgment. `None` in every other state.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SlotState::Waiting { deadline } => Some(deadline),
            _ => None,
        }
    }
}

/// Fixed-capacity window over the packets currently in flight.
///
/// Sequence numbers are allocated here, monotonically from 0. The counter is
/// u32 so that a full 65536-packet session cannot wrap it.
#[derive(Debug)]
pub struct SendWindow {
    slots: Vec<Option<InFlightSlot>>,
    next_sequence: u32,
}

impl SendWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        SendWindow {
            slots,
            next_sequence: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slots.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight() == 0
    }

    pub fn has_vacancy(&self) -> bool {
        self.in_flight() < self.capacity()
    }

    /// Sequence number the next installed frame will carry.
    pub fn next_sequence(&self) -> u16 {
        debug_assert!(self.next_sequence <= u16::MAX as u32, "sequence space exhausted");
        self.next_sequence as u16
    }

    /// Install an encoded frame into the first vacant slot and allocate its
    /// sequence number. Panics if the window is full; callers gate on
    /// [`has_vacancy`](Self::has_vacancy).
    pub fn install(&mut self, frame: Vec<u8>) -> u16 {
        let idx = match self.slots.iter().position(|slot| slot.is_none()) {
            Some(idx) => idx,
            None => panic!("install on a full window"),
        };
        let sequence = self.next_sequence();
        self.slots[idx] = Some(InFlightSlot {
            sequence,
            frame,
            state: SlotState::Virgin,
        });
        self.next_sequence += 1;
        sequence
    }

    pub fn slots(&self) -> impl Iterator<Item = &InFlightSlot> + '_ {
        self.slots.iter().flatten()
    }

    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut InFlightSlot> + '_ {
        self.slots.iter_mut().flatten()
    }

    /// Apply the acknowledgment record and the clock to every waiting slot:
    /// acknowledged slots become `Acknowledged`, slots past their deadline
    /// become `TimedOut`. The acknowledgment check wins when both hold.
    pub fn sweep(&mut self, now: Instant, acked: &HashSet<u16>) {
        for slot in self.slots.iter_mut().flatten() {
            if let SlotState::Waiting { deadline } = slot.state {
                if acked.contains(&slot.sequence) {
                    slot.state = SlotState::Acknowledged;
                } else if now > deadline {
                    slot.state = SlotState::TimedOut;
                }
            }
        }
    }

    /// Remove acknowledged slots, freeing their space for new packets.
    /// Returns the retired sequence numbers.
    pub fn retire_acknowledged(&mut self) -> Vec<u16> {
        let mut retired = Vec::new();
        for slot in &mut self.slots {
            let done = matches!(slot, Some(s) if s.state == SlotState::Acknowledged);
            if done {
                if let Some(mut gone) = slot.take() {
                    gone.state = SlotState::Retired;
                    retired.push(gone.sequence);
                }
            }
        }
        retired
    }

    /// Earliest retransmission deadline among waiting slots.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .flatten()
            .filter_map(|slot| slot.deadline())
            .min()
    }

    pub fn any_timed_out(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|slot| slot.state == SlotState::TimedOut)
    }
}
