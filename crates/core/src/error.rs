//! Error types for the probe library.

use std::fmt;
use std::net::SocketAddr;

/// Errors that can occur in the probe library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Startup**: [`Config`](Self::Config), [`Json`](Self::Json),
///   [`Bind`](Self::Bind) — fatal before any stream flows.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures inside a
///   relay; these close the affected relay only.
/// - **Media**: [`Pipeline`](Self::Pipeline) — the ingest or persist
///   pipeline could not be brought up.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `config.json` was not valid JSON.
    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `config.json` was readable JSON but semantically unusable.
    #[error("config error: {kind}")]
    Config { kind: ConfigErrorKind },

    /// The forwarder listener could not be bound after all retries.
    #[error("failed to bind {addr} after {attempts} attempts")]
    Bind { addr: SocketAddr, attempts: u32 },

    /// A media pipeline could not be constructed or started.
    #[error("pipeline error: {0}")]
    Pipeline(String),
}

/// Specific kind of configuration failure.
#[derive(Debug)]
pub enum ConfigErrorKind {
    /// The required `rtsp_url` key is absent.
    MissingUrl,
    /// `rtsp_url` does not have the form `rtsp://<ipv4>:<port>/<path>`.
    InvalidUrl(String),
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingUrl => write!(f, "missing rtsp_url"),
            Self::InvalidUrl(url) => write!(f, "invalid rtsp_url: {url}"),
        }
    }
}

/// Convenience alias for `Result<T, ProbeError>`.
pub type Result<T> = std::result::Result<T, ProbeError>;
