use std::error::Error as _;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::stop::StopFlag;

/// Latest round-trip time to the upstream host.
///
/// Single producer (the prober), many readers (one per net-analyzer
/// track). Values in seconds; `Some(0.0)` means the last probe got no
/// reply, `None` means no probe has ever succeeded. Both read back as
/// "unavailable".
#[derive(Clone, Default)]
pub struct RttCell {
    inner: Arc<Mutex<Option<f64>>>,
}

impl RttCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a measurement in seconds (0.0 = probe answered "no reply").
    pub fn store(&self, rtt_secs: f64) {
        *self.inner.lock() = Some(rtt_secs);
    }

    /// Snapshot the latest RTT in milliseconds, `None` when unavailable.
    pub fn snapshot_ms(&self) -> Option<f64> {
        match *self.inner.lock() {
            Some(secs) if secs > 0.0 => Some(secs * 1000.0),
            _ => None,
        }
    }
}

/// ICMP echo loop measuring the path the RTP stream actually takes.
///
/// Each iteration blocks for at most the 450 ms probe timeout; there is no
/// extra pacing — the spacing between samples is the ping's own duration.
pub struct RttProber {
    host: IpAddr,
    cell: RttCell,
    stop: StopFlag,
    timeout: Duration,
}

impl RttProber {
    pub fn new(host: IpAddr, cell: RttCell, stop: StopFlag) -> Self {
        RttProber {
            host,
            cell,
            stop,
            timeout: Duration::from_millis(450),
        }
    }

    pub fn run(self) {
        tracing::debug!(host = %self.host, "RTT prober started");
        while !self.stop.is_set() {
            let started = Instant::now();
            match ping::dgramsock::ping(self.host, Some(self.timeout), None, None, None, None) {
                Ok(()) => self.cell.store(started.elapsed().as_secs_f64()),
                Err(err) if is_timeout(&err) => self.cell.store(0.0),
                Err(err) => {
                    // leave the last measurement in place
                    tracing::warn!(error = %err, "ping failed");
                }
            }
        }
        tracing::debug!("RTT prober exited");
    }
}

/// A timed-out echo is a measurement ("no reply"), not an error.
fn is_timeout(err: &ping::Error) -> bool {
    err.source()
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            )
        })
}
