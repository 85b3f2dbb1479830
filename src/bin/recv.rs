/// `ferry-recv`: receive one file pushed by `ferry-send`.
use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use ferry::{run_receiver, RecvConfig, TransferStats, UdpChannel, DEFAULT_WINDOW};

/// Reliable file transfer over UDP: receiving side.
#[derive(Parser)]
#[command(name = "ferry-recv", version, about)]
struct Cli {
    /// Where to write the received file.
    output: PathBuf,
    /// Address to listen on.
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    listen: SocketAddr,
    /// Reassembly window size in packets.
    #[arg(short, long, default_value_t = DEFAULT_WINDOW)]
    window: u16,
    /// Give up if no transfer has completed after this many seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let channel = UdpChannel::bind(cli.listen, Duration::from_millis(50))
        .with_context(|| format!("binding {}", cli.listen))?;
    let mut sink =
        File::create(&cli.output).with_context(|| format!("creating {}", cli.output.display()))?;

    let config = RecvConfig {
        window: cli.window,
        deadline: cli.deadline_secs.map(Duration::from_secs),
        ..RecvConfig::default()
    };

    let stats = Arc::new(TransferStats::new());
    let cancelled = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));
    let ticker = spawn_progress_ticker(stats.clone(), done.clone());

    let outcome = run_receiver(config, Arc::new(channel), &mut sink, stats, cancelled);
    done.store(true, Ordering::Relaxed);
    let _ = ticker.join();

    let outcome = outcome.with_context(|| format!("receiving into {}", cli.output.display()))?;
    println!("Complete!");
    println!(
        "  {} bytes in {} packets -> {}",
        outcome.total_bytes,
        outcome.total_packets,
        cli.output.display()
    );
    println!(
        "  {:.3} s elapsed, {:.1} KB/s",
        outcome.elapsed.as_secs_f64(),
        outcome.throughput_bps as f64 / 1024.0
    );
    println!(
        "  {} duplicates dropped, {} outside the window",
        outcome.duplicates, outcome.out_of_window
    );
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
            let bytes = stats.bytes_transferred.load(Ordering::Relaxed);
            if bytes == last {
                continue;
            }
            last = bytes;
            log::info!(
                "progress: {} bytes delivered in {} packets",
                bytes,
                stats.packets_transferred.load(Ordering::Relaxed)
            );
        }
    })
}
