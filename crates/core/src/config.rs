//! Probe configuration loaded from `config.json`.
//!
//! The file sits next to the binary and carries a single required key:
//!
//! ```json
//! { "rtsp_url": "rtsp://192.168.1.50:554/main" }
//! ```
//!
//! The URL is picked apart into host, port, and path so the forwarder can
//! dial the real server while the ingestor replays the path against the
//! local relay endpoint. A missing or malformed file is fatal at startup —
//! nothing downstream can run without an upstream address.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigErrorKind, ProbeError, Result};

/// Raw shape of `config.json`.
#[derive(Debug, Deserialize)]
struct RawConfig {
    rtsp_url: Option<String>,
}

/// Parsed probe configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Full upstream URL as given in the file.
    pub rtsp_url: String,
    /// IPv4 address of the real RTSP server.
    pub server_host: Ipv4Addr,
    /// TCP port of the real RTSP server.
    pub server_port: u16,
    /// Stream path component, without the leading slash.
    pub path: String,
}

impl Config {
    /// Load and validate configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let raw: RawConfig = serde_json::from_str(&text)?;
        let url = raw.rtsp_url.ok_or(ProbeError::Config {
            kind: ConfigErrorKind::MissingUrl,
        })?;
        Self::parse_url(&url)
    }

    /// Parse an `rtsp://<ipv4>:<port>/<path>` URL.
    pub fn parse_url(url: &str) -> Result<Self> {
        let invalid = || ProbeError::Config {
            kind: ConfigErrorKind::InvalidUrl(url.to_string()),
        };

        let rest = url.strip_prefix("rtsp://").ok_or_else(invalid)?;
        let (authority, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, ""),
        };
        let (host, port) = authority.split_once(':').ok_or_else(invalid)?;

        let server_host: Ipv4Addr = host.parse().map_err(|_| invalid())?;
        let server_port: u16 = port.parse().map_err(|_| invalid())?;

        Ok(Config {
            rtsp_url: url.to_string(),
            server_host,
            server_port,
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_url() {
        let cfg = Config::parse_url("rtsp://192.168.1.50:554/main").unwrap();
        assert_eq!(cfg.server_host, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(cfg.server_port, 554);
        assert_eq!(cfg.path, "main");
    }

    #[test]
    fn parse_nested_path() {
        let cfg = Config::parse_url("rtsp://10.0.0.1:8554/cam/stream1").unwrap();
        assert_eq!(cfg.path, "cam/stream1");
    }

    #[test]
    fn parse_empty_path() {
        let cfg = Config::parse_url("rtsp://10.0.0.1:8554").unwrap();
        assert_eq!(cfg.path, "");
    }

    #[test]
    fn reject_non_rtsp_scheme() {
        assert!(Config::parse_url("http://10.0.0.1:80/x").is_err());
    }

    #[test]
    fn reject_hostname() {
        // only dotted-quad hosts are accepted
        assert!(Config::parse_url("rtsp://camera.local:554/x").is_err());
    }

    #[test]
    fn reject_missing_port() {
        assert!(Config::parse_url("rtsp://10.0.0.1/x").is_err());
    }

    #[test]
    fn load_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"other": 1}"#).unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ProbeError::Config {
                kind: ConfigErrorKind::MissingUrl
            })
        ));
    }

    #[test]
    fn load_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"rtsp_url": "rtsp://127.0.0.1:8554/live"}"#).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.server_port, 8554);
        assert_eq!(cfg.path, "live");
    }
}
