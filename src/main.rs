//! ping-exporter: pings one host and exposes the round-trip time to Prometheus.

use clap::Parser;
use ping_exporter::dns_resolver::{local_hostname, resolve_target};
use ping_exporter::server::{self, ExporterState};
use ping_exporter::session::DEFAULT_PAYLOAD_SIZE;
use ping_exporter::transport::open_icmp_channel;
use ping_exporter::{RttGauge, Session, SessionConfig, SessionEvent, StartupError, Summary};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Host name or IPv4 address to ping
    host: String,

    /// Number of ICMP requests to send, negative for no limit
    #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
    count: i64,

    /// Interval between ICMP requests
    #[arg(short, long, default_value = "1s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// How long to wait for a reply before counting the request as lost
    #[arg(short, long, default_value = "5s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Stop after this long, whatever the count
    #[arg(short = 'w', long, value_parser = humantime::parse_duration)]
    deadline: Option<Duration>,

    /// Echo payload size in bytes
    #[arg(short, long, default_value_t = DEFAULT_PAYLOAD_SIZE)]
    size: usize,

    /// Address on which to expose metrics
    #[arg(long, default_value = "0.0.0.0:9999", env = "PING_EXPORTER_BIND_ADDR")]
    bind_addr: SocketAddr,

    /// Path under which to expose Prometheus metrics
    #[arg(long, default_value = "/metrics", env = "PING_EXPORTER_METRICS_PATH")]
    metrics_path: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ping_exporter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let address = resolve_target(&args.host)?;

    let config = SessionConfig::new(&args.host, address)
        .with_count(args.count)
        .with_interval(args.interval)
        .with_timeout(args.timeout)
        .with_deadline(args.deadline)
        .with_payload_size(args.size);

    let hostname = local_hostname();
    let gauge = Arc::new(RttGauge::new(hostname.clone()));
    let mut session = Session::new(config, gauge.clone()).map_err(StartupError::from)?;
    let events = session.subscribe();

    // repeated interrupts all land on the same idempotent stop
    let controller = session.controller();
    ctrlc::set_handler(move || controller.stop())?;

    let (icmp_tx, icmp_rx) = open_icmp_channel(args.size).map_err(StartupError::Transport)?;

    let listener = server::bind(args.bind_addr).await?;
    let state = ExporterState {
        target: args.host.clone(),
        hostname,
        gauge,
        aggregator: session.aggregator(),
    };
    let app = server::create_router(state, &normalize_path(&args.metrics_path));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("metrics server stopped: {}", e);
        }
    });
    println!("Now listening on {}", args.bind_addr);

    println!("PING {} ({}):", args.host, address);
    let handle = session.start(icmp_tx, icmp_rx)?;

    let printer = thread::spawn(move || print_events(events));
    tokio::task::spawn_blocking(move || handle.wait()).await?;
    if printer.join().is_err() {
        tracing::warn!("event printer panicked");
    }

    Ok(())
}

fn print_events(events: Receiver<SessionEvent>) {
    for event in events {
        match event {
            SessionEvent::Reply(sample) => {
                println!("{} bytes from {}: icmp_seq={} time={:?}",
                         sample.bytes, sample.source, sample.sequence, sample.rtt);
            }
            SessionEvent::Lost { sequence } => {
                tracing::debug!("no reply for icmp_seq={}", sequence);
            }
            SessionEvent::Finished(summary) => {
                print_summary(&summary);
                return;
            }
        }
    }
}

fn print_summary(stats: &Summary) {
    print!("{}", format_summary(stats));
}

fn format_summary(stats: &Summary) -> String {
    format!(
        "\n--- {} ping statistics ---\n\
         {} packets transmitted, {} packets received, {}% packet loss\n\
         round-trip min/avg/max/stddev = {:?}/{:?}/{:?}/{:?}\n",
        stats.target,
        stats.sent, stats.received, stats.loss_percent,
        stats.min_rtt, stats.avg_rtt, stats.max_rtt, stats.std_dev_rtt
    )
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
