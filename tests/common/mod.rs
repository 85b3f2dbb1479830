/// Shared test harness: an in-memory datagram channel with scripted faults.
///
/// Two endpoints exchange datagrams through mutex-guarded queues, one per
/// direction. Each direction applies its own fault plan (random loss,
/// duplication, and delivery delay from a seeded RNG, plus scripted drops of
/// specific datagrams), so failures reproduce exactly.
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ferry::{
    run_receiver, run_sender, Channel, ChunkSource, RecvConfig, RecvOutcome, SendConfig,
    SendOutcome, TransferStats,
};

/// Faults applied to one direction of travel.
#[derive(Clone)]
pub struct FaultPlan {
    /// Probability a datagram simply vanishes.
    pub loss_rate: f64,
    /// Probability a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Random extra delivery delay in `0..max_delay`; reorders packets.
    pub max_delay: Duration,
    /// Drop the nth datagrams sent on this direction (0-based), exactly
    /// once each, regardless of the random rates.
    pub drop_nth: Vec<u64>,
    pub seed: u64,
}

impl Default for FaultPlan {
    fn default() -> Self {
        FaultPlan {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            max_delay: Duration::ZERO,
            drop_nth: Vec::new(),
            seed: 7,
        }
    }
}

struct Inbox {
    queue: Mutex<VecDeque<(Instant, Vec<u8>, SocketAddr)>>,
    arrived: Condvar,
}

impl Inbox {
    fn new() -> Self {
        Inbox {
            queue: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        }
    }

    fn push(&self, ready_at: Instant, datagram: Vec<u8>, src: SocketAddr) {
        self.queue.lock().push_back((ready_at, datagram, src));
        self.arrived.notify_one();
    }
}

struct FaultState {
    rng: StdRng,
    sent: u64,
}

/// One side of a point-to-point in-memory link.
pub struct TestEndpoint {
    addr: SocketAddr,
    peer_addr: SocketAddr,
    inbox: Arc<Inbox>,
    peer: Arc<Inbox>,
    plan: FaultPlan,
    state: Mutex<FaultState>,
    read_timeout: Duration,
}

/// Build a connected pair. `a_to_b` shapes traffic sent by the first
/// endpoint, `b_to_a` traffic sent by the second.
pub fn pair(a_to_b: FaultPlan, b_to_a: FaultPlan) -> (TestEndpoint, TestEndpoint) {
    let addr_a: SocketAddr = "127.0.0.1:1001".parse().unwrap();
    let addr_b: SocketAddr = "127.0.0.1:1002".parse().unwrap();
    let inbox_a = Arc::new(Inbox::new());
    let inbox_b = Arc::new(Inbox::new());
    let a = TestEndpoint {
        addr: addr_a,
        peer_addr: addr_b,
        inbox: inbox_a.clone(),
        peer: inbox_b.clone(),
        state: Mutex::new(FaultState {
            rng: StdRng::seed_from_u64(a_to_b.seed),
            sent: 0,
        }),
        plan: a_to_b,
        read_timeout: Duration::from_millis(20),
    };
    let b = TestEndpoint {
        addr: addr_b,
        peer_addr: addr_a,
        inbox: inbox_b,
        peer: inbox_a,
        state: Mutex::new(FaultState {
            rng: StdRng::seed_from_u64(b_to_a.seed),
            sent: 0,
        }),
        plan: b_to_a,
        read_timeout: Duration::from_millis(20),
    };
    (a, b)
}

impl Channel for TestEndpoint {
    fn send_to(&self, frame: &[u8], dest: SocketAddr) -> io::Result<()> {
        assert_eq!(dest, self.peer_addr, "test link is point-to-point");
        let mut state = self.state.lock();
        let n = state.sent;
        state.sent += 1;

        if self.plan.drop_nth.contains(&n) {
            return Ok(());
        }
        if self.plan.loss_rate > 0.0 && state.rng.gen_bool(self.plan.loss_rate) {
            return Ok(());
        }
        let copies = if self.plan.duplicate_rate > 0.0 && state.rng.gen_bool(self.plan.duplicate_rate)
        {
            2
        } else {
            1
        };
        let now = Instant::now();
        for _ in 0..copies {
            let delay = if self.plan.max_delay.is_zero() {
                Duration::ZERO
            } else {
                self.plan.max_delay.mul_f64(state.rng.gen::<f64>())
            };
            self.peer.push(now + delay, frame.to_vec(), self.addr);
        }
        Ok(())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let deadline = Instant::now() + self.read_timeout;
        let mut queue = self.inbox.queue.lock();
        loop {
            let now = Instant::now();
            // Deliver the ripest ready entry; entries still maturing set the
            // next wakeup.
            let mut ready: Option<(usize, Instant)> = None;
            let mut soonest: Option<Instant> = None;
            for (i, entry) in queue.iter().enumerate() {
                let at = entry.0;
                if at <= now {
                    if ready.map_or(true, |(_, best)| at < best) {
                        ready = Some((i, at));
                    }
                } else if soonest.map_or(true, |s| at < s) {
                    soonest = Some(at);
                }
            }
            if let Some((i, _)) = ready {
                let (_, datagram, src) = queue.remove(i).unwrap();
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                return Ok((n, src));
            }
            if now >= deadline {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "recv timeout"));
            }
            let wake_at = soonest.map_or(deadline, |s| s.min(deadline));
            let _ = self.inbox.arrived.wait_until(&mut queue, wake_at);
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

/// Deterministic payload; the prime modulus keeps chunk boundaries visible.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub struct TransferOutcome {
    pub sent: SendOutcome,
    pub received: RecvOutcome,
    pub bytes: Vec<u8>,
}

/// Run a complete transfer of `data` over a faulty in-memory link.
/// `send_config.dest` is overwritten with the receiving endpoint's address.
pub fn run_transfer(
    data: &[u8],
    mut send_config: SendConfig,
    recv_config: RecvConfig,
    data_faults: FaultPlan,
    ack_faults: FaultPlan,
) -> TransferOutcome {
    let (sender_end, receiver_end) = pair(data_faults, ack_faults);
    send_config.dest = receiver_end.local_addr().unwrap();

    let recv_handle = thread::spawn(move || {
        let mut sink: Vec<u8> = Vec::new();
        let outcome = run_receiver(
            recv_config,
            Arc::new(receiver_end),
            &mut sink,
            Arc::new(TransferStats::new()),
            Arc::new(AtomicBool::new(false)),
        );
        (outcome, sink)
    });

    let payload = data.to_vec();
    let send_handle = thread::spawn(move || {
        let len = payload.len() as u64;
        let source = ChunkSource::new(std::io::Cursor::new(payload), len);
        run_sender(
            send_config,
            Arc::new(sender_end),
            source,
            Arc::new(TransferStats::new()),
            Arc::new(AtomicBool::new(false)),
        )
    });

    let sent = send_handle
        .join()
        .expect("sender panicked")
        .expect("sender failed");
    let (received, bytes) = recv_handle.join().expect("receiver panicked");
    let received = received.expect("receiver failed");

    TransferOutcome {
        sent,
        received,
        bytes,
    }
}
