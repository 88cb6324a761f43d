use std::io::BufRead;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::bounded;

use probe::analyze::{AudioAnalyzer, NetAnalyzer, VideoAnalyzer};
use probe::forwarder::{Forwarder, LISTEN_PORT};
use probe::frame::SharedStreamInfo;
use probe::{Config, StopFlag, StreamStatus};
use probe_gst::{StreamIngestor, TsPersister};

/// Queue depths: track metadata is a handful of messages, RTP header
/// windows burst with the stream, frame queues absorb analyzer hiccups.
const CONTROL_QUEUE: usize = 8;
const RTP_QUEUE: usize = 4096;
const FRAME_QUEUE: usize = 64;

#[derive(Parser)]
#[command(
    name = "rtsp-probe",
    about = "Man-in-the-middle RTSP stream quality probe"
)]
struct Args {
    /// Path to the probe configuration file
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let results_dir = Path::new("results").to_path_buf();
    let stop = StopFlag::new();
    let stream_info = SharedStreamInfo::new();

    let (control_tx, control_rx) = bounded(CONTROL_QUEUE);
    let (rtp_tx, rtp_rx) = bounded(RTP_QUEUE);
    let (video_ts_tx, video_ts_rx) = bounded(FRAME_QUEUE);
    let (audio_ts_tx, audio_ts_rx) = bounded(FRAME_QUEUE);
    let (video_an_tx, video_an_rx) = bounded(FRAME_QUEUE);
    let (audio_an_tx, audio_an_rx) = bounded(FRAME_QUEUE);

    let upstream = SocketAddr::from((config.server_host, config.server_port));
    let forwarder = match Forwarder::bind(upstream, control_tx, rtp_tx, stop.clone()) {
        Ok(forwarder) => forwarder,
        Err(e) => {
            eprintln!("Failed to start forwarder: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let net = NetAnalyzer::new(
        control_rx,
        rtp_rx,
        config.server_host.into(),
        results_dir.clone(),
        stop.clone(),
    );
    let video = VideoAnalyzer::new(
        video_an_rx,
        stream_info.clone(),
        results_dir.clone(),
        stop.clone(),
    );
    let audio = AudioAnalyzer::new(
        audio_an_rx,
        stream_info.clone(),
        results_dir.clone(),
        stop.clone(),
    );
    let persister = TsPersister::new(
        video_ts_rx,
        audio_ts_rx,
        stream_info.clone(),
        results_dir.join("output_stream.ts"),
        stop.clone(),
    );
    let ingestor = StreamIngestor::new(
        format!("rtsp://127.0.0.1:{}/{}", LISTEN_PORT, config.path),
        vec![video_ts_tx, video_an_tx],
        vec![audio_ts_tx, audio_an_tx],
        stream_info.clone(),
        stop.clone(),
    );

    let workers: Vec<(&str, JoinHandle<()>)> = vec![
        ("forwarder", thread::spawn(move || forwarder.run())),
        ("net-analyzer", thread::spawn(move || net.run())),
        ("video-analyzer", thread::spawn(move || video.run())),
        ("audio-analyzer", thread::spawn(move || audio.run())),
        ("ts-persister", thread::spawn(move || persister.run())),
        ("ingestor", thread::spawn(move || ingestor.run())),
    ];

    watch_stdin(stop.clone());

    // wait until the stream ends or somebody raises the stop flag
    let mut prompted = false;
    while !stop.is_set() {
        match stream_info.status() {
            StreamStatus::Start if !prompted => {
                println!("\nPress Enter to stop.\n");
                prompted = true;
            }
            StreamStatus::End => break,
            _ => {}
        }
        thread::sleep(Duration::from_millis(100));
    }
    stop.set();

    for (name, handle) in workers {
        if handle.join().is_err() {
            tracing::error!(worker = name, "worker panicked");
        }
    }
    tracing::info!("probe stopped");
    ExitCode::SUCCESS
}

/// Raise the stop flag when the user presses Enter.
///
/// Detached on purpose: a blocked stdin read cannot be joined, and the
/// process exits once the real workers are down.
fn watch_stdin(stop: StopFlag) {
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        stop.set();
    });
}
