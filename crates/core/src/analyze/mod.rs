//! Time-windowed stream analyzers.
//!
//! Three independent consumers, each re-synchronizing its report cadence
//! against the media clock of its own track:
//!
//! - [`net`] — per-SSRC RTP accounting (loss, jitter, round-trip delay)
//!   fed by the forwarder's header windows.
//! - [`video`] — decoded-frame metrics (resolution, bitrate, FPS,
//!   green/mosaic ratios) over ~0.45 s buffers.
//! - [`audio`] — voice-activity-gated loudness tracking.
//!
//! Every analyzer writes its own SRT report file and follows the same
//! worker shape: poll the inbound queue, sleep briefly when empty, drain
//! whatever is left after the stop flag fires.

pub mod audio;
pub mod net;
pub mod rtt;
pub mod video;

pub use audio::AudioAnalyzer;
pub use net::NetAnalyzer;
pub use rtt::{RttCell, RttProber};
pub use video::VideoAnalyzer;
