/// Ferry: reliable, ordered file transfer over UDP.
///
/// A selective-repeat sliding-window protocol. The sender keeps up to `W`
/// packets in flight, each with its own retransmission deadline; the receiver
/// acknowledges every accepted packet individually, stages out-of-order
/// arrivals, and delivers the byte stream strictly in order. Datagram loss,
/// duplication, and reordering are tolerated; corruption and congestion
/// control are out of scope.
///
/// Wire format and limits live in [`protocol`], the two window state
/// machines in [`window`] and [`assembly`], and the blocking drivers in
/// [`sender`] and [`receiver`]. Both drivers talk to a [`Channel`], so the
/// whole protocol can run over an in-memory transport in tests.
use std::time::Duration;

use thiserror::Error;

pub mod assembly;
pub mod channel;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod source;
pub mod stats;
pub mod window;

pub use crate::assembly::{Disposition, ReceiveWindow};
pub use crate::channel::{Channel, UdpChannel};
pub use crate::protocol::{DataPacket, WireError};
pub use crate::receiver::{run_receiver, RecvConfig, RecvError, RecvOutcome};
pub use crate::sender::{run_sender, RetransmitPolicy, SendConfig, SendError, SendOutcome};
pub use crate::source::ChunkSource;
pub use crate::stats::TransferStats;
pub use crate::window::{SendWindow, SlotState};

/// Default in-flight window, in packets.
pub const DEFAULT_WINDOW: u16 = 16;

/// Default per-packet retransmission timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Startup validation failures, detected before any datagram moves.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    WindowZero,
    #[error("file needs {needed} packets, but the sequence space allows only 65536")]
    FileTooLarge { needed: u64 },
}
