use std::io::{self, BufRead};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use doorbell::server::StreamAudio;
use doorbell::source::SystemNetwork;
use doorbell::{DoorbellConfig, Frame, FrameSource, RingHandle, SipClient, StreamServer};
use tracing_subscriber::EnvFilter;

const SIP_POLL: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(
    name = "doorbell",
    about = "Network doorbell: rings a SIP phone and streams the camera over RTSP"
)]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// RTSP bind address (host:port); defaults to 0.0.0.0 on the configured port
    #[arg(long, short)]
    bind: Option<String>,

    /// Run only the RTSP server
    #[arg(long)]
    no_sip: bool,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Ring once right after startup
    #[arg(long)]
    ring: bool,

    /// JPEG served as the camera image; without it no stream is served
    #[arg(long)]
    jpeg: Option<PathBuf>,

    /// Gateway used when the registrar name does not resolve
    #[arg(long)]
    gateway: Option<Ipv4Addr>,
}

/// Serves the same still image on every request.
struct StillImage {
    jpeg: Vec<u8>,
    width: u16,
    height: u16,
}

impl FrameSource for StillImage {
    fn acquire_frame(&mut self) -> Option<Frame> {
        Some(Frame {
            data: self.jpeg.clone(),
            width: self.width,
            height: self.height,
        })
    }
}

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(args) {
        tracing::error!(error = %e, "doorbell failed");
        std::process::exit(1);
    }
}

fn run(args: Args) -> doorbell::Result<()> {
    let config = match &args.config {
        Some(path) => DoorbellConfig::load(path)?,
        None => DoorbellConfig::default(),
    };

    let mut server = match &args.jpeg {
        Some(path) => Some(start_stream(&args, &config, path)?),
        None => {
            tracing::warn!("no --jpeg given, RTSP server disabled");
            None
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let mut sip = None;
    let mut ring: Option<RingHandle> = None;

    if args.no_sip {
        tracing::info!("SIP disabled");
    } else {
        let network = Box::new(SystemNetwork::new(args.gateway));
        let client = SipClient::bind(config.sip.clone(), network)?.with_door(Box::new(|| {
            tracing::info!("door released");
        }));
        let handle = client.handle();
        if args.ring {
            handle.ring_now();
        }
        ring = Some(handle);

        let running = running.clone();
        sip = Some(thread::spawn(move || {
            let mut client = client;
            while running.load(Ordering::SeqCst) {
                client.pump(Instant::now());
                thread::sleep(SIP_POLL);
            }
        }));
    }

    println!("Enter rings the doorbell, \"q\" quits");
    for line in io::stdin().lock().lines() {
        match line?.trim() {
            "q" | "quit" => break,
            _ => match &ring {
                Some(handle) if !handle.ring_now() => println!("SIP not configured"),
                Some(_) => println!("ringing"),
                None => println!("SIP disabled"),
            },
        }
    }

    running.store(false, Ordering::SeqCst);
    if let Some(worker) = sip
        && worker.join().is_err()
    {
        tracing::error!("SIP worker panicked");
    }
    if let Some(server) = server.as_mut() {
        server.stop();
    }
    Ok(())
}

fn start_stream(args: &Args, config: &DoorbellConfig, path: &Path) -> doorbell::Result<StreamServer> {
    let jpeg = std::fs::read(path)?;
    let (width, height) = jpeg_size(&jpeg).unwrap_or((0, 0));
    tracing::info!(path = %path.display(), width, height, "serving still image");

    let mut server = StreamServer::new(config.stream.clone(), Box::new(StillImage { jpeg, width, height }))
        .with_network(Box::new(SystemNetwork::new(args.gateway)))
        .with_audio(StreamAudio::from_config(&config.stream.audio, None, None));
    if let Some(bind) = &args.bind {
        server = server.with_bind_addr(bind);
    }
    server.start()?;
    if let Some(url) = server.get_stream_url() {
        println!("stream at {url}");
    }
    Ok(server)
}

/// Dimensions from the baseline SOF0 segment.
fn jpeg_size(jpeg: &[u8]) -> Option<(u16, u16)> {
    let at = jpeg.windows(2).position(|w| w == [0xFF, 0xC0])?;
    let sof = jpeg.get(at + 5..at + 9)?;
    Some((u16::from_be_bytes([sof[2], sof[3]]), u16::from_be_bytes([sof[0], sof[1]])))
}
