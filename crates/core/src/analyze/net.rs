//! Per-SSRC network metrics from intercepted RTP headers.
//!
//! The analyzer first drains the control channel: one [`ControlMsg::Track`]
//! per bound track, then [`ControlMsg::Start`]. Only then does it touch RTP
//! data, so a header window can never race its own track's metadata. Each
//! track gets a dedicated worker thread with a single-reader queue, which
//! keeps packets of one SSRC strictly in arrival order.
//!
//! Reports land in `<kind>-Net-Status.srt` every half second of media
//! clock:
//!
//! ```text
//! Track:video, Delay: 12.34 ms, Jitter: 1.02 ms, Loss_rate: 0.00 %, Total_loss_rate: 0.00 %
//! ```

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};

use crate::analyze::rtt::{RttCell, RttProber};
use crate::protocol::{ControlMsg, TrackInit, TrackKind};
use crate::report::SrtWriter;
use crate::rtp::RtpPacket;
use crate::stop::StopFlag;

const TRACK_QUEUE_CAP: usize = 1024;
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Dispatcher task: parses header windows and routes them by SSRC.
pub struct NetAnalyzer {
    control_rx: Receiver<ControlMsg>,
    rtp_rx: Receiver<[u8; 12]>,
    server_host: IpAddr,
    results_dir: PathBuf,
    stop: StopFlag,
}

impl NetAnalyzer {
    pub fn new(
        control_rx: Receiver<ControlMsg>,
        rtp_rx: Receiver<[u8; 12]>,
        server_host: IpAddr,
        results_dir: PathBuf,
        stop: StopFlag,
    ) -> Self {
        NetAnalyzer {
            control_rx,
            rtp_rx,
            server_host,
            results_dir,
            stop,
        }
    }

    pub fn run(self) {
        let rtt = RttCell::new();
        let prober = RttProber::new(self.server_host, rtt.clone(), self.stop.clone());
        let prober_handle = thread::spawn(move || prober.run());

        let mut queues: HashMap<u32, Sender<RtpPacket>> = HashMap::new();
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        // control phase: all track bindings arrive before any RTP data is
        // looked at
        loop {
            if self.stop.is_set() {
                break;
            }
            match self.control_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(ControlMsg::Track(init)) => {
                    let (tx, rx) = bounded(TRACK_QUEUE_CAP);
                    queues.insert(init.ssrc, tx);
                    let worker = TrackWorker {
                        init,
                        rx,
                        rtt: rtt.clone(),
                        results_dir: self.results_dir.clone(),
                        stop: self.stop.clone(),
                    };
                    workers.push(thread::spawn(move || worker.run()));
                }
                Ok(ControlMsg::Start) => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // data phase
        while !self.stop.is_set() || !self.rtp_rx.is_empty() {
            match self.rtp_rx.try_recv() {
                Ok(window) => {
                    let Some(pkt) = RtpPacket::parse(&window) else {
                        continue;
                    };
                    if let Some(tx) = queues.get(&pkt.ssrc) {
                        // overloaded worker → drop; loss figures must only
                        // reflect the network
                        let _ = tx.try_send(pkt);
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(IDLE_SLEEP),
                Err(TryRecvError::Disconnected) => break,
            }
        }

        drop(queues);
        for worker in workers {
            let _ = worker.join();
        }
        let _ = prober_handle.join();
        tracing::debug!("net analyzer exited");
    }
}

/// One per-track worker: owns the accumulator and the report file.
struct TrackWorker {
    init: TrackInit,
    rx: Receiver<RtpPacket>,
    rtt: RttCell,
    results_dir: PathBuf,
    stop: StopFlag,
}

impl TrackWorker {
    fn run(self) {
        let name = format!("{}-Net-Status", self.init.kind.as_str());
        let mut srt = match SrtWriter::create(&self.results_dir, &name, self.init.clock_rate) {
            Ok(srt) => srt,
            Err(e) => {
                tracing::error!(track = name, error = %e, "cannot create report file");
                return;
            }
        };

        let mut acc = TrackAccumulator::new(&self.init, Instant::now());
        loop {
            match self.rx.try_recv() {
                Ok(pkt) => {
                    if let Some(report) = acc.process(&pkt, &self.rtt) {
                        srt.write(&report.text, report.start, report.end);
                    }
                }
                Err(TryRecvError::Empty) => {
                    if self.stop.is_set() {
                        break;
                    }
                    thread::sleep(IDLE_SLEEP);
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        tracing::debug!(ssrc = format_args!("{:#010X}", self.init.ssrc), "track worker exited");
    }
}

/// A report ready for the track's SRT file.
struct NetReport {
    text: String,
    start: i64,
    end: i64,
}

/// Loss / jitter / PTS accounting for one RTP stream.
struct TrackAccumulator {
    kind: TrackKind,
    clock_rate: u32,
    init_timestamp: u32,

    prev_seq: u16,
    prev_timestamp: u32,
    prev_arrival: Instant,

    /// Inter-arrival deltas (seconds) of the current window.
    inter_arrival: Vec<f64>,
    window_loss: i64,
    window_recv: i64,
    total_loss: i64,
    total_recv: i64,

    /// Times the 32-bit RTP timestamp wrapped since `init_timestamp`.
    wrap_count: u32,
    prev_report_pts: i64,
}

impl TrackAccumulator {
    fn new(init: &TrackInit, now: Instant) -> Self {
        TrackAccumulator {
            kind: init.kind,
            clock_rate: init.clock_rate,
            init_timestamp: init.init_timestamp,
            // one before the announced first packet, so packet #1 shows no gap
            prev_seq: init.init_seq.wrapping_sub(1),
            prev_timestamp: init.init_timestamp,
            prev_arrival: now,
            inter_arrival: Vec::new(),
            window_loss: 0,
            window_recv: 1,
            total_loss: 0,
            total_recv: 1,
            wrap_count: 0,
            prev_report_pts: 0,
        }
    }

    /// Packets lost between `prev` and `curr`, or `None` to discard.
    ///
    /// A smaller sequence number is accepted as a 2^16 wrap only in the
    /// narrow window `prev > 65500 && curr < 35`; anything else that runs
    /// backwards (reordering, stale sessions) is discarded. A duplicate
    /// (`curr == prev`) stays on the forward branch and yields −1, so the
    /// packet still refreshes the arrival state it carries.
    fn sequence_gap(prev: u16, curr: u16) -> Option<i64> {
        if curr >= prev {
            Some(curr as i64 - prev as i64 - 1)
        } else if prev > 65500 && curr < 35 {
            Some(curr as i64 + 65536 - prev as i64 - 1)
        } else {
            None
        }
    }

    /// PTS since `init_timestamp`, carrying the 32-bit wrap count.
    fn advance_pts(&mut self, curr_timestamp: u32) -> i64 {
        if curr_timestamp < self.prev_timestamp
            && (self.prev_timestamp as u64) > (1u64 << 32) - self.clock_rate as u64
            && (curr_timestamp as u64) < self.clock_rate as u64
        {
            self.wrap_count += 1;
        }
        (curr_timestamp as i64 - self.init_timestamp as i64)
            + ((1i64 << 32) * self.wrap_count as i64)
    }

    /// Account one packet; returns a report when the half-second window
    /// boundary is crossed.
    fn process(&mut self, pkt: &RtpPacket, rtt: &RttCell) -> Option<NetReport> {
        let gap = Self::sequence_gap(self.prev_seq, pkt.sequence)?;

        self.window_loss += gap;
        self.window_recv += 1 + gap;
        self.total_loss += gap;
        self.total_recv += 1 + gap;

        self.inter_arrival
            .push(pkt.arrival.duration_since(self.prev_arrival).as_secs_f64());

        let pts = self.advance_pts(pkt.timestamp);
        let half_window = (self.clock_rate / 2) as i64;

        let report = if pts - self.prev_report_pts > half_window {
            let delay_ms = rtt.snapshot_ms().unwrap_or(999.99);
            let jitter_ms = if self.inter_arrival.is_empty() {
                0.0
            } else {
                self.inter_arrival.iter().sum::<f64>() / self.inter_arrival.len() as f64 * 1000.0
            };
            let loss_rate = if self.window_recv > 0 {
                self.window_loss as f64 / self.window_recv as f64 * 100.0
            } else {
                0.0
            };
            let total_loss_rate = self.total_loss as f64 / self.total_recv as f64 * 100.0;

            let text = format!(
                "Track:{}, Delay: {:.2} ms, Jitter: {:.2} ms, Loss_rate: {:.2} %, Total_loss_rate: {:.2} %",
                self.kind.as_str(),
                delay_ms,
                jitter_ms,
                loss_rate,
                total_loss_rate
            );

            self.window_loss = 0;
            self.window_recv = 0;
            self.inter_arrival.clear();
            self.prev_report_pts = pts;

            Some(NetReport {
                text,
                start: pts,
                end: pts + half_window,
            })
        } else {
            None
        };

        self.prev_seq = pkt.sequence;
        self.prev_timestamp = pkt.timestamp;
        self.prev_arrival = pkt.arrival;
        report
    }
}
