/// Receiver-side reassembly window.
///
/// Tracks the next expected sequence number, stages out-of-order arrivals,
/// and accumulates delivered payloads in order. Pure state; the caller turns
/// each [`Disposition`] into an acknowledgment (or silence) on the wire.
use std::collections::BTreeMap;

/// What became of one arriving packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// In order. Delivered, possibly unblocking staged successors; the
    /// drained successors were already acknowledged when staged. Acknowledge
    /// this packet.
    Delivered { drained: usize },
    /// Ahead of the cursor; parked for later delivery. Acknowledge it.
    Staged,
    /// Ahead of the cursor but already parked. Drop silently.
    DuplicateStaged,
    /// Behind the cursor; its payload was delivered earlier. Acknowledge it
    /// again (the previous acknowledgment may have been lost) and drop the
    /// payload.
    AlreadyDelivered,
    /// At or past the window's upper edge. Drop silently.
    OutOfWindow,
}

/// Reassembly state for one incoming transfer.
///
/// The cursor is u32 so that delivering sequence 65535 can still advance it
/// past the 16-bit range.
#[derive(Debug)]
pub struct ReceiveWindow {
    expected: u32,
    capacity: u32,
    staging: BTreeMap<u32, Vec<u8>>,
    assembled: Vec<u8>,
    final_sequence: Option<u32>,
}

impl ReceiveWindow {
    pub fn new(capacity: u16) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        ReceiveWindow {
            expected: 0,
            capacity: capacity as u32,
            staging: BTreeMap::new(),
            assembled: Vec::new(),
            final_sequence: None,
        }
    }

    /// Sequence number the in-order stream is waiting for.
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Packets parked in the staging area.
    pub fn staged(&self) -> usize {
        self.staging.len()
    }

    /// Staged sequence numbers, ascending. Always within
    /// `(expected, expected + capacity)`.
    pub fn staged_sequences(&self) -> Vec<u32> {
        self.staging.keys().copied().collect()
    }

    /// Bytes delivered in order so far.
    pub fn assembled_len(&self) -> usize {
        self.assembled.len()
    }

    /// `true` once the final packet has been delivered in order, which
    /// implies every packet before it has been too.
    pub fn is_complete(&self) -> bool {
        matches!(self.final_sequence, Some(f) if f < self.expected)
    }

    /// Take the reassembled stream.
    pub fn into_bytes(self) -> Vec<u8> {
        self.assembled
    }

    /// Run one arriving packet through the window rules.
    pub fn accept(&mut self, sequence: u16, is_final: bool, mut payload: Vec<u8>) -> Disposition {
        let s = sequence as u32;
        if s < self.expected {
            return Disposition::AlreadyDelivered;
        }
        if s >= self.expected + self.capacity {
            return Disposition::OutOfWindow;
        }
        if s > self.expected {
            if self.staging.contains_key(&s) {
                return Disposition::DuplicateStaged;
            }
            if is_final {
                self.final_sequence = Some(s);
            }
            self.staging.insert(s, payload);
            return Disposition::Staged;
        }

        // In order: deliver, then drain any staged successors it unblocks.
        if is_final {
            self.final_sequence = Some(s);
        }
        self.assembled.append(&mut payload);
        self.expected += 1;
        let mut drained = 0;
        while let Some(mut parked) = self.staging.remove(&self.expected) {
            self.assembled.append(&mut parked);
            self.expected += 1;
            drained += 1;
        }
        Disposition::Delivered { drained }
    }
}
