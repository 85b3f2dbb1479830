/// `ferry-send`: push a file to a listening `ferry-recv`.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use ferry::{
    run_sender, ChunkSource, RetransmitPolicy, SendConfig, TransferStats, UdpChannel,
    DEFAULT_WINDOW,
};

/// Reliable file transfer over UDP: sending side.
#[derive(Parser)]
#[command(name = "ferry-send", version, about)]
struct Cli {
    /// File to send.
    file: PathBuf,
    /// Receiver address, e.g. 192.0.2.7:9000.
    dest: SocketAddr,
    /// Local address to bind; port 0 picks an ephemeral one.
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,
    /// In-flight window size in packets; 1 gives stop-and-wait.
    #[arg(short, long, default_value_t = DEFAULT_WINDOW)]
    window: u16,
    /// Retransmission timeout in milliseconds.
    #[arg(short, long, default_value_t = 100)]
    timeout_ms: u64,
    /// On a timeout, resend every unacknowledged packet instead of just the
    /// late one.
    #[arg(long)]
    resend_window: bool,
    /// Give up if the transfer has not completed after this many seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let channel = UdpChannel::bind(cli.bind, Duration::from_millis(50))
        .with_context(|| format!("binding {}", cli.bind))?;
    let source = ChunkSource::from_path(&cli.file)
        .with_context(|| format!("opening {}", cli.file.display()))?;

    let config = SendConfig {
        dest: cli.dest,
        window: cli.window,
        timeout: Duration::from_millis(cli.timeout_ms),
        policy: if cli.resend_window {
            RetransmitPolicy::WholeWindow
        } else {
            RetransmitPolicy::PerSlot
        },
        deadline: cli.deadline_secs.map(Duration::from_secs),
    };

    let stats = Arc::new(TransferStats::new());
    let cancelled = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));
    let ticker = spawn_progress_ticker(stats.clone(), done.clone());

    let outcome = run_sender(config, Arc::new(channel), source, stats, cancelled);
    done.store(true, Ordering::Relaxed);
    let _ = ticker.join();

    let outcome = outcome.with_context(|| format!("sending {}", cli.file.display()))?;
    println!("Complete!");
    println!(
        "  {} bytes in {} packets to {}",
        outcome.total_bytes, outcome.total_packets, cli.dest
    );
    println!(
        "  {:.3} s elapsed, {:.1} KB/s",
        outcome.elapsed.as_secs_f64(),
        outcome.throughput_bps as f64 / 1024.0
    );
    println!("  {} retransmissions", outcome.retransmits);
    Ok(())
}

fn spawn_progress_ticker(
    stats: Arc<TransferStats>,
    done: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut last = 0u64;
        loop {
            // Sleep in short steps so the process exits without a tail wait.
            for _ in 0..10 {
                thread::sleep(Duration::from_millis(100));
                if done.load(Ordering::Relaxed) {
                    return;
                }
            }
            let sent = stats.bytes_transferred.load(Ordering::Relaxed);
            if sent == last {
                continue;
            }
            last = sent;
            log::info!(
                "progress: {} bytes ({:.0}%), {} retransmits",
                sent,
                stats.progress() * 100.0,
                stats.retransmits.load(Ordering::Relaxed)
            );
        }
    })
}
