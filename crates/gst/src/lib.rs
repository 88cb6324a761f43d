//! GStreamer pipelines for the RTSP probe.
//!
//! Everything that touches the media library lives here, keeping the core
//! crate free of GStreamer:
//!
//! - [`ingest::StreamIngestor`] — RTSP client against the forwarder's
//!   local endpoint; decodes both tracks and fans shared frame handles out
//!   to the analyzers and the persister.
//! - [`persist::TsPersister`] — re-encodes the decoded frames (H.264 at
//!   3 Mbps + AAC) into `results/output_stream.ts`.
//!
//! Both tasks are plain worker threads wired up by the supervisor; they
//! honor the process-wide stop flag and the shared stream-info record the
//! same way the analyzers in the core crate do.

pub mod ingest;
pub mod persist;

pub use ingest::StreamIngestor;
pub use persist::TsPersister;
