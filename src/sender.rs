/// Sending side: window manager plus acknowledgment listener.
///
/// Flow:
///   1. Validate the window and the sequence-space cap
///   2. Spawn the ack listener, which drains acknowledgments into the shared
///      record set and nudges the manager through a wake channel
///   3. Loop: fill vacant slots from the source, transmit virgin slots,
///      retire acknowledged slots, resend timed-out slots, then sleep until
///      the earliest deadline or the next acknowledgment
///   4. Source exhausted and window drained: burst the final packet in place
///      of a close handshake, then stop the listener
use std::collections::HashSet;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;

use crate::channel::{is_timeout, Channel};
use crate::protocol::{self, DataPacket, MAX_PACKETS, MAX_PAYLOAD};
use crate::source::ChunkSource;
use crate::stats::TransferStats;
use crate::window::{SendWindow, SlotState};
use crate::{ConfigError, DEFAULT_TIMEOUT, DEFAULT_WINDOW};

/// Copies of the final packet pushed out at termination. There is no close
/// handshake; redundancy stands in for one.
pub const CLOSE_BURST: usize = 20;

/// Upper bound on one manager sleep, so cancellation and the transfer
/// deadline are checked at least this often.
const MAX_WAIT: Duration = Duration::from_millis(100);

/// What a retransmission timeout triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetransmitPolicy {
    /// Resend only the slot whose deadline passed.
    #[default]
    PerSlot,
    /// Resend every sent, unacknowledged slot in the window.
    WholeWindow,
}

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SendConfig {
    pub dest: SocketAddr,
    /// In-flight window capacity in packets. Must be at least 1; 1 gives
    /// stop-and-wait.
    pub window: u16,
    /// Per-packet retransmission timeout.
    pub timeout: Duration,
    pub policy: RetransmitPolicy,
    /// Give up if the whole transfer has not completed in this long.
    pub deadline: Option<Duration>,
}

impl SendConfig {
    pub fn new(dest: SocketAddr) -> Self {
        SendConfig {
            dest,
            window: DEFAULT_WINDOW,
            timeout: DEFAULT_TIMEOUT,
            policy: RetransmitPolicy::PerSlot,
            deadline: None,
        }
    }
}

/// Ways the sending side can fail. Per-datagram faults (read timeouts,
/// malformed acknowledgments) are absorbed by the protocol loop and never
/// surface here.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("file access: {0}")]
    File(#[source] io::Error),
    /// Hard socket or listener failure, not a per-datagram timeout.
    #[error("channel: {0}")]
    Channel(#[source] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("transfer stalled: no completion within {0:?}")]
    Stalled(Duration),
}

/// Transfer result.
#[derive(Debug)]
pub struct SendOutcome {
    pub total_bytes: u64,
    pub total_packets: u64,
    pub retransmits: u64,
    pub elapsed: Duration,
    pub throughput_bps: u64,
}

/// Run the sending side to completion. Blocks the calling thread; the
/// acknowledgment listener runs on its own thread for the duration.
///
/// The channel is shared with the listener, so it is taken as an `Arc`.
/// `cancelled` aborts the transfer at the next loop pass when set.
pub fn run_sender<C, R>(
    config: SendConfig,
    channel: Arc<C>,
    mut source: ChunkSource<R>,
    stats: Arc<TransferStats>,
    cancelled: Arc<AtomicBool>,
) -> Result<SendOutcome, SendError>
where
    C: Channel + 'static,
    R: Read,
{
    if config.window == 0 {
        return Err(ConfigError::WindowZero.into());
    }
    let total_bytes = source.remaining();
    let total_packets = protocol::packets_for(total_bytes);
    if total_packets > MAX_PACKETS {
        return Err(ConfigError::FileTooLarge {
            needed: total_packets,
        }
        .into());
    }
    stats.set_total(total_bytes, total_packets);

    let acked: Arc<Mutex<HashSet<u16>>> = Arc::new(Mutex::new(HashSet::new()));
    let (wake_tx, wake_rx) = bounded::<()>(1);
    let stop = Arc::new(AtomicBool::new(false));
    let listener = spawn_ack_listener(channel.clone(), acked.clone(), wake_tx, stop.clone())
        .map_err(SendError::Channel)?;

    log::info!(
        "sending {} bytes as {} packets to {} (window {}, timeout {:?})",
        total_bytes,
        total_packets,
        config.dest,
        config.window,
        config.timeout
    );

    let outcome = drive(&config, channel.as_ref(), &mut source, &acked, &wake_rx, &stats, &cancelled);

    stop.store(true, Ordering::Relaxed);
    if listener.join().is_err() {
        log::error!("ack listener panicked");
    }

    let outcome = outcome?;
    log::info!(
        "transfer complete: {} bytes in {:.1}s ({} B/s, {} retransmits)",
        outcome.total_bytes,
        outcome.elapsed.as_secs_f64(),
        outcome.throughput_bps,
        outcome.retransmits
    );
    Ok(outcome)
}

/// The window-manager loop. Socket and source errors return immediately;
/// the caller owns listener shutdown.
fn drive<C, R>(
    config: &SendConfig,
    channel: &C,
    source: &mut ChunkSource<R>,
    acked: &Mutex<HashSet<u16>>,
    wake_rx: &Receiver<()>,
    stats: &TransferStats,
    cancelled: &AtomicBool,
) -> Result<SendOutcome, SendError>
where
    C: Channel,
    R: Read,
{
    let total_bytes = source.remaining();
    let total_packets = protocol::packets_for(total_bytes);
    let start = Instant::now();
    let mut window = SendWindow::new(config.window as usize);
    let mut retransmits: u64 = 0;
    let mut retired_total: u64 = 0;
    let mut bytes_queued: u64 = 0;
    let mut final_frame: Option<Vec<u8>> = None;

    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(SendError::Cancelled);
        }
        if let Some(limit) = config.deadline {
            if start.elapsed() > limit {
                return Err(SendError::Stalled(limit));
            }
        }

        // Fill vacant slots from the source.
        while window.has_vacancy() && !source.is_exhausted() {
            let chunk = match source.next_chunk(MAX_PAYLOAD).map_err(SendError::File)? {
                Some(chunk) => chunk,
                None => break,
            };
            let packet = DataPacket {
                sequence: window.next_sequence(),
                is_final: chunk.is_final,
                payload: chunk.payload,
            };
            let frame = packet.to_bytes();
            if packet.is_final {
                final_frame = Some(frame.clone());
            }
            bytes_queued += packet.payload.len() as u64;
            let sequence = window.install(frame);
            log::trace!(
                "queued packet {} ({} bytes{})",
                sequence,
                packet.payload.len(),
                if packet.is_final { ", final" } else { "" }
            );
        }

        // First transmission for virgin slots.
        let now = Instant::now();
        for slot in window.slots_mut() {
            if slot.is_virgin() {
                channel
                    .send_to(slot.frame(), config.dest)
                    .map_err(SendError::Channel)?;
                slot.mark_waiting(now + config.timeout);
                log::trace!("sent packet {}", slot.sequence());
            }
        }

        // Mark what the listener has recorded, time out the late ones.
        {
            let seen = acked.lock();
            window.sweep(now, &seen);
        }

        match config.policy {
            RetransmitPolicy::PerSlot => {
                for slot in window.slots_mut() {
                    if slot.state() == SlotState::TimedOut {
                        log::debug!("timeout: resending packet {}", slot.sequence());
                        channel
                            .send_to(slot.frame(), config.dest)
                            .map_err(SendError::Channel)?;
                        slot.mark_waiting(Instant::now() + config.timeout);
                        retransmits += 1;
                    }
                }
            }
            RetransmitPolicy::WholeWindow => {
                if window.any_timed_out() {
                    log::debug!("timeout: resending the whole window");
                    for slot in window.slots_mut() {
                        if matches!(
                            slot.state(),
                            SlotState::Waiting { .. } | SlotState::TimedOut
                        ) {
                            channel
                                .send_to(slot.frame(), config.dest)
                                .map_err(SendError::Channel)?;
                            slot.mark_waiting(Instant::now() + config.timeout);
                            retransmits += 1;
                        }
                    }
                }
            }
        }

        for sequence in window.retire_acknowledged() {
            retired_total += 1;
            log::trace!("retired packet {}", sequence);
        }
        stats.update(bytes_queued, retired_total, retransmits);

        if source.is_exhausted() && window.is_empty() {
            break;
        }
        if window.has_vacancy() && !source.is_exhausted() {
            // Retirement just opened slots; fill them before sleeping.
            continue;
        }

        // Sleep until the earliest deadline unless an acknowledgment lands
        // first. The wake channel holds at most one token, so a burst of
        // acks costs one wakeup.
        let wait = match window.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => config.timeout,
        };
        match wake_rx.recv_timeout(wait.min(MAX_WAIT)) {
            Ok(()) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                return Err(SendError::Channel(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "acknowledgment listener exited",
                )));
            }
        }
    }

    // No close handshake; burst the final packet so the receiver's last
    // acknowledgment gets every chance to round-trip.
    if let Some(frame) = &final_frame {
        log::debug!("bursting final packet {} times", CLOSE_BURST);
        for _ in 0..CLOSE_BURST {
            channel
                .send_to(frame, config.dest)
                .map_err(SendError::Channel)?;
        }
    }

    let elapsed = start.elapsed();
    let throughput_bps = if elapsed.as_secs_f64() > 0.0 {
        (total_bytes as f64 / elapsed.as_secs_f64()) as u64
    } else {
        0
    };
    Ok(SendOutcome {
        total_bytes,
        total_packets,
        retransmits,
        elapsed,
        throughput_bps,
    })
}

fn spawn_ack_listener<C: Channel + 'static>(
    channel: Arc<C>,
    acked: Arc<Mutex<HashSet<u16>>>,
    wake_tx: Sender<()>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("ferry-acks".to_string())
        .spawn(move || ack_listener(channel.as_ref(), &acked, &wake_tx, &stop))
}

/// Drains acknowledgments into the record set until stopped. Malformed
/// datagrams are logged and dropped. A fresh sequence number posts a wake
/// token; duplicates do not.
fn ack_listener<C: Channel>(
    channel: &C,
    acked: &Mutex<HashSet<u16>>,
    wake_tx: &Sender<()>,
    stop: &AtomicBool,
) {
    let mut buf = [0u8; protocol::MAX_DATAGRAM];
    while !stop.load(Ordering::Relaxed) {
        match channel.recv_from(&mut buf) {
            Ok((len, src)) => match protocol::decode_ack(&buf[..len]) {
                Ok(sequence) => {
                    log::trace!("ack {} from {}", sequence, src);
                    if acked.lock().insert(sequence) {
                        let _ = wake_tx.try_send(());
                    }
                }
                Err(e) => log::warn!("discarding malformed ack from {}: {}", src, e),
            },
            Err(ref e) if is_timeout(e) => {}
            Err(e) => {
                log::error!("ack listener: receive failed: {}", e);
                break;
            }
        }
    }
}
