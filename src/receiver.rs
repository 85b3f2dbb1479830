/// Receiving side: window manager plus ingress listener.
///
/// Flow:
///   1. Spawn the ingress listener, which forwards raw datagrams into a
///      bounded inbox channel
///   2. Loop: pull a datagram, decode it, run it through the reassembly
///      window, acknowledge what the window accepted
///   3. Final packet delivered in order: burst its acknowledgment (the
///      symmetric half of the senderless close), keep re-acking stragglers
///      until the sender goes quiet, then hand the assembled bytes to the
///      sink in one write
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;

use crate::assembly::{Disposition, ReceiveWindow};
use crate::channel::{is_timeout, Channel};
use crate::protocol::{self, DataPacket};
use crate::sender::CLOSE_BURST;
use crate::stats::TransferStats;
use crate::{ConfigError, DEFAULT_WINDOW};

/// Datagrams the inbox will hold before the listener starts shedding;
/// shedding is safe because the sender retransmits.
const INBOX_DEPTH: usize = 1024;

/// Upper bound on one manager sleep, so cancellation and the transfer
/// deadline are checked at least this often.
const INBOX_POLL: Duration = Duration::from_millis(100);

/// Default quiet period after completion. Must exceed the sender's
/// retransmission timeout, so a sender still resending packets whose
/// acknowledgments were lost finds somebody home.
pub const DEFAULT_LINGER: Duration = Duration::from_millis(500);

/// Receiver configuration.
#[derive(Debug, Clone)]
pub struct RecvConfig {
    /// Reassembly window capacity in packets. Must be at least 1.
    pub window: u16,
    /// Give up if no transfer completes in this long.
    pub deadline: Option<Duration>,
    /// After completion, keep answering retransmissions until the line has
    /// been quiet this long.
    pub linger: Duration,
}

impl Default for RecvConfig {
    fn default() -> Self {
        RecvConfig {
            window: DEFAULT_WINDOW,
            deadline: None,
            linger: DEFAULT_LINGER,
        }
    }
}

/// Ways the receiving side can fail. Malformed datagrams are logged and
/// dropped, never fatal.
#[derive(Debug, Error)]
pub enum RecvError {
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
pub struct RecvOutcome {
    pub total_bytes: u64,
    pub total_packets: u64,
    /// Re-deliveries of packets already delivered or already staged.
    pub duplicates: u64,
    /// Arrivals dropped for being at or past the window's upper edge.
    pub out_of_window: u64,
    /// Arrivals parked out of order before delivery.
    pub staged: u64,
    pub elapsed: Duration,
    pub throughput_bps: u64,
}

/// Run the receiving side to completion. Blocks the calling thread; the
/// ingress listener runs on its own thread for the duration. The assembled
/// stream is written to `sink` in one piece once the transfer completes.
pub fn run_receiver<C, W>(
    config: RecvConfig,
    channel: Arc<C>,
    sink: &mut W,
    stats: Arc<TransferStats>,
    cancelled: Arc<AtomicBool>,
) -> Result<RecvOutcome, RecvError>
where
    C: Channel + 'static,
    W: Write,
{
    if config.window == 0 {
        return Err(ConfigError::WindowZero.into());
    }

    let (inbox_tx, inbox_rx) = bounded::<(Vec<u8>, SocketAddr)>(INBOX_DEPTH);
    let stop = Arc::new(AtomicBool::new(false));
    let listener = spawn_ingress_listener(channel.clone(), inbox_tx, stop.clone())
        .map_err(RecvError::Channel)?;

    if let Ok(addr) = channel.local_addr() {
        log::info!("listening on {} (window {})", addr, config.window);
    }

    let outcome = assemble(&config, channel.as_ref(), &inbox_rx, &stats, &cancelled);

    stop.store(true, Ordering::Relaxed);
    if listener.join().is_err() {
        log::error!("ingress listener panicked");
    }

    let (bytes, outcome) = outcome?;
    sink.write_all(&bytes).map_err(RecvError::File)?;
    sink.flush().map_err(RecvError::File)?;
    log::info!(
        "received {} bytes in {:.1}s ({} B/s, {} duplicates)",
        outcome.total_bytes,
        outcome.elapsed.as_secs_f64(),
        outcome.throughput_bps,
        outcome.duplicates
    );
    Ok(outcome)
}

/// The reassembly loop. Runs until the final packet has been delivered in
/// order, then bursts its acknowledgment and lingers for stragglers.
fn assemble<C>(
    config: &RecvConfig,
    channel: &C,
    inbox: &Receiver<(Vec<u8>, SocketAddr)>,
    stats: &TransferStats,
    cancelled: &AtomicBool,
) -> Result<(Vec<u8>, RecvOutcome), RecvError>
where
    C: Channel,
{
    let start = Instant::now();
    let mut window = ReceiveWindow::new(config.window);
    let mut duplicates: u64 = 0;
    let mut out_of_window: u64 = 0;
    let mut staged: u64 = 0;

    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(RecvError::Cancelled);
        }
        if let Some(limit) = config.deadline {
            if start.elapsed() > limit {
                return Err(RecvError::Stalled(limit));
            }
        }

        let (datagram, from) = match inbox.recv_timeout(INBOX_POLL) {
            Ok(item) => item,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                return Err(RecvError::Channel(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "ingress listener exited",
                )));
            }
        };

        let packet = match DataPacket::from_bytes(&datagram) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("discarding malformed datagram from {}: {}", from, e);
                continue;
            }
        };
        let DataPacket {
            sequence,
            is_final,
            payload,
        } = packet;

        match window.accept(sequence, is_final, payload) {
            Disposition::Delivered { drained } => {
                send_ack(channel, sequence, from)?;
                log::trace!(
                    "delivered packet {} (+{} unblocked), expecting {}",
                    sequence,
                    drained,
                    window.expected()
                );
                if window.is_complete() {
                    let final_sequence = (window.expected() - 1) as u16;
                    log::debug!("final packet {} delivered; bursting its acknowledgment", final_sequence);
                    for _ in 0..CLOSE_BURST {
                        send_ack(channel, final_sequence, from)?;
                    }

                    let elapsed = start.elapsed();
                    let total_bytes = window.assembled_len() as u64;
                    let total_packets = window.expected() as u64;
                    stats.update(total_bytes, total_packets, 0);
                    let throughput_bps = if elapsed.as_secs_f64() > 0.0 {
                        (total_bytes as f64 / elapsed.as_secs_f64()) as u64
                    } else {
                        0
                    };

                    linger(channel, inbox, config.linger)?;
                    return Ok((
                        window.into_bytes(),
                        RecvOutcome {
                            total_bytes,
                            total_packets,
                            duplicates,
                            out_of_window,
                            staged,
                            elapsed,
                            throughput_bps,
                        },
                    ));
                }
            }
            Disposition::Staged => {
                staged += 1;
                send_ack(channel, sequence, from)?;
                log::debug!("staged packet {} (expecting {})", sequence, window.expected());
            }
            Disposition::DuplicateStaged => {
                duplicates += 1;
                stats.note_duplicate();
                log::trace!("dropping duplicate of staged packet {}", sequence);
            }
            Disposition::AlreadyDelivered => {
                duplicates += 1;
                stats.note_duplicate();
                send_ack(channel, sequence, from)?;
                log::trace!("re-acking delivered packet {}", sequence);
            }
            Disposition::OutOfWindow => {
                out_of_window += 1;
                log::debug!(
                    "dropping packet {} outside window at {}",
                    sequence,
                    window.expected()
                );
            }
        }
        stats.update(window.assembled_len() as u64, window.expected() as u64, 0);
    }
}

/// After completion the sender may still be resending packets whose
/// acknowledgments were lost. Keep answering until the line has been quiet
/// for the configured period, then leave.
fn linger<C>(
    channel: &C,
    inbox: &Receiver<(Vec<u8>, SocketAddr)>,
    quiet: Duration,
) -> Result<(), RecvError>
where
    C: Channel,
{
    if quiet.is_zero() {
        return Ok(());
    }
    let mut answered: u64 = 0;
    loop {
        match inbox.recv_timeout(quiet) {
            Ok((datagram, from)) => match DataPacket::from_bytes(&datagram) {
                Ok(packet) => {
                    send_ack(channel, packet.sequence, from)?;
                    answered += 1;
                }
                Err(e) => log::trace!("ignoring malformed datagram from {}: {}", from, e),
            },
            // Quiet (or the listener is gone): the sender is done with us.
            Err(_) => {
                if answered > 0 {
                    log::debug!("lingered over {} straggler(s)", answered);
                }
                return Ok(());
            }
        }
    }
}

fn send_ack<C: Channel>(channel: &C, sequence: u16, dest: SocketAddr) -> Result<(), RecvError> {
    let ack = protocol::encode_ack(sequence);
    channel.send_to(&ack, dest).map_err(RecvError::Channel)?;
    log::trace!("acked packet {}", sequence);
    Ok(())
}

fn spawn_ingress_listener<C: Channel + 'static>(
    channel: Arc<C>,
    inbox: Sender<(Vec<u8>, SocketAddr)>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("ferry-ingress".to_string())
        .spawn(move || ingress_listener(channel.as_ref(), &inbox, &stop))
}

/// Forwards raw datagrams into the inbox until stopped. A full inbox sheds
/// arrivals instead of blocking; the sender's retransmission covers them.
fn ingress_listener<C: Channel>(
    channel: &C,
    inbox: &Sender<(Vec<u8>, SocketAddr)>,
    stop: &AtomicBool,
) {
    let mut buf = [0u8; protocol::MAX_DATAGRAM];
    while !stop.load(Ordering::Relaxed) {
        match channel.recv_from(&mut buf) {
            Ok((len, src)) => {
                if inbox.try_send((buf[..len].to_vec(), src)).is_err() {
                    log::debug!("inbox backlogged, shedding datagram from {}", src);
                }
            }
            Err(ref e) if is_timeout(e) => {}
            Err(e) => {
                log::error!("ingress listener: receive failed: {}", e);
                break;
            }
        }
    }
}
