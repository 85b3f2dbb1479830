/// Shared transfer statistics, updated from the protocol threads and read
/// from anywhere (progress tickers, tests).
use std::sync::atomic::{AtomicU64, Ordering};

pub struct TransferStats {
    /// Total bytes this transfer will move. Zero on the receiving side,
    /// which learns the size only from the final packet.
    pub total_bytes: AtomicU64,
    pub total_packets: AtomicU64,
    pub bytes_transferred: AtomicU64,
    pub packets_transferred: AtomicU64,
    pub retransmits: AtomicU64,
    pub duplicates: AtomicU64,
}

impl TransferStats {
    pub fn new() -> Self {
        TransferStats {
            total_bytes: AtomicU64::new(0),
            total_packets: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            packets_transferred: AtomicU64::new(0),
            retransmits: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    pub fn set_total(&self, bytes: u64, packets: u64) {
        self.total_bytes.store(bytes, Ordering::Relaxed);
        self.total_packets.store(packets, Ordering::Relaxed);
    }

    pub fn update(&self, bytes: u64, packets: u64, retransmits: u64) {
        self.bytes_transferred.store(bytes, Ordering::Relaxed);
        self.packets_transferred.store(packets, Ordering::Relaxed);
        self.retransmits.store(retransmits, Ordering::Relaxed);
    }

    pub fn note_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction complete, 0.0 when the total is unknown.
    pub fn progress(&self) -> f64 {
        let total = self.total_bytes.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.bytes_transferred.load(Ordering::Relaxed) as f64 / total as f64
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        TransferStats::new()
    }
}
