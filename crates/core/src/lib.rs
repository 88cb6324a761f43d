//! # probe — RTSP man-in-the-middle stream quality probe
//!
//! A Rust library for measuring the quality of a live RTSP session
//! without being a party to it: the probe relays the session byte-for-byte
//! between client and server while deriving network metrics from the
//! intercepted RTP packets and media metrics from the decoded frames.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Response sniffing, interleaved `$`-framing, Transport/RTP-Info headers |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Fixed-header parsing, SSRC demux, sequence/timestamp wrap semantics |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Track kind / clock-rate extraction from DESCRIBE bodies |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  Supervisor (probe-cli)                    │
//! ├───────────────────────────────────────────┤
//! │  Forwarder      — MITM relay + sniffer     │
//! │  Net analyzer   — per-SSRC loss/jitter/RTT │
//! │  Video analyzer — bitrate/FPS/green/mosaic │
//! │  Audio analyzer — VAD-gated loudness       │
//! ├───────────────────────────────────────────┤
//! │  Protocol  — RTSP/SDP/interleaved parsing  │
//! │  RTP       — header-window records         │
//! │  Frames    — shared decoded-frame handles  │
//! │  Report    — SRT block writer              │
//! └───────────────────────────────────────────┘
//! ```
//!
//! The GStreamer pieces (stream ingest, MPEG-TS persistence) live in the
//! sibling `gst-probe-pipeline` crate so this one stays free of media
//! dependencies.
//!
//! ## Crate layout
//!
//! - [`forwarder`] — TCP relay that learns track bindings on the way past.
//! - [`protocol`] — RTSP response sniffing, SDP parsing, `$`-frame splitting.
//! - [`rtp`] — 12-byte header-window records.
//! - [`analyze`] — the net / video / audio analyzers and the RTT prober.
//! - [`frame`] — decoded-frame types and the shared stream-info cell.
//! - [`report`] — SRT report files.
//! - [`config`] — `config.json` loading.
//! - [`stop`] — the process-wide stop flag.
//! - [`error`] — [`ProbeError`] enum and [`Result`] alias.

pub mod analyze;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod frame;
pub mod protocol;
pub mod report;
pub mod rtp;
pub mod stop;

pub use config::Config;
pub use error::{ProbeError, Result};
pub use forwarder::Forwarder;
pub use frame::{AudioFrame, SharedStreamInfo, StreamInfo, StreamStatus, VideoFrame};
pub use protocol::{ControlMsg, TrackInit, TrackKind};
pub use stop::StopFlag;
