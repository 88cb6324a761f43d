//! RTSP control-channel sniffing (RFC 2326).
//!
//! The probe never speaks RTSP itself — it reads the server→client half of
//! a session negotiated by somebody else and extracts what the analyzers
//! need. Two layers:
//!
//! ## Wire framing (RFC 2326 §10.12)
//!
//! RTSP over TCP interleaves two frame types on one connection:
//!
//! ```text
//! RTSP/1.0 200 OK\r\n            ← text response, headers, CRLF CRLF, body
//! Header: Value\r\n
//! \r\n
//! [body]
//! $ <channel> <len-hi> <len-lo>   ← binary frame: RTP (ch 0/2) or RTCP
//! <len bytes of payload>
//! ```
//!
//! [`interleaved::InterleavedSniffer`] splits the byte stream into these
//! frames, tolerating frames that straddle read boundaries.
//!
//! ## Track metadata
//!
//! A track's identity is assembled across several responses:
//!
//! | Response | Contributes |
//! |----------|-------------|
//! | DESCRIBE (`application/sdp` body) | kind, track id, clock rate |
//! | SETUP (`Transport:` header) | track id (interleaved pair / 2), SSRC |
//! | PLAY (`RTP-Info:` header) | initial sequence number, initial RTP timestamp |
//!
//! [`track::TrackTable`] accumulates the pieces and publishes a complete
//! [`track::TrackInit`] per track — never a partial one — followed by a
//! start marker once RTP-Info has been seen.

pub mod interleaved;
pub mod response;
pub mod sdp;
pub mod track;

pub use interleaved::{InterleavedSniffer, Sniffed};
pub use response::RtspResponse;
pub use track::{ControlMsg, TrackInit, TrackKind, TrackTable};
