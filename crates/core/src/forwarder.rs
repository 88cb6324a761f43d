//! RTSP man-in-the-middle forwarder.
//!
//! Accepts one local RTSP client, dials the real server, and copies bytes
//! both ways unmodified. The server→client direction additionally runs the
//! [`InterleavedSniffer`] so the control exchange yields track bindings
//! (published on the control channel) and every interleaved RTP frame
//! yields a 12-byte header window (published on the data channel).
//!
//! ```text
//!               ┌──────────────────────────────┐
//! RTSP client ──┤ 127.0.0.1:12024              │
//!               │   relay ───────────────────► │── real RTSP server
//!               │   relay + sniffer ◄───────── │
//!               └──────┬───────────┬───────────┘
//!                      │           │
//!               control channel   RTP header windows
//!               (TrackInit, Start) (to net analyzer)
//! ```
//!
//! A socket error on either direction tears down both sockets of that
//! connection but leaves the forwarder accepting; a non-200 upstream
//! status raises the process-wide stop signal.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::error::{ProbeError, Result};
use crate::protocol::{ControlMsg, InterleavedSniffer, RtspResponse, Sniffed, TrackTable};
use crate::stop::StopFlag;

/// Local relay endpoint the RTSP client (and the probe's own ingestor)
/// connects to.
pub const LISTEN_PORT: u16 = 12024;

const READ_BUF: usize = 4096;
const BIND_ATTEMPTS: u32 = 5;
const BIND_RETRY_DELAY: Duration = Duration::from_secs(3);
const ACCEPT_POLL: Duration = Duration::from_secs(1);
const RELAY_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// The man-in-the-middle relay task.
pub struct Forwarder {
    listener: TcpListener,
    upstream: SocketAddr,
    control_tx: Sender<ControlMsg>,
    rtp_tx: Sender<[u8; 12]>,
    stop: StopFlag,
}

impl Forwarder {
    /// Bind `127.0.0.1:12024`, retrying up to 5 times with a 3 s delay.
    ///
    /// Bind failure after all retries is a startup error — the supervisor
    /// exits non-zero rather than raising the stop flag.
    pub fn bind(
        upstream: SocketAddr,
        control_tx: Sender<ControlMsg>,
        rtp_tx: Sender<[u8; 12]>,
        stop: StopFlag,
    ) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, LISTEN_PORT));
        for attempt in 1..=BIND_ATTEMPTS {
            match TcpListener::bind(addr) {
                Ok(listener) => {
                    listener.set_nonblocking(true)?;
                    tracing::info!(%addr, %upstream, "forwarder listening");
                    return Ok(Forwarder {
                        listener,
                        upstream,
                        control_tx,
                        rtp_tx,
                        stop,
                    });
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "bind failed");
                    if attempt < BIND_ATTEMPTS {
                        thread::sleep(BIND_RETRY_DELAY);
                    }
                }
            }
        }
        Err(ProbeError::Bind {
            addr,
            attempts: BIND_ATTEMPTS,
        })
    }

    /// Accept loop. Polls at 1 s so the stop flag is honored promptly;
    /// returns once it fires, after joining the spawned relays.
    pub fn run(self) {
        let mut relays: Vec<JoinHandle<()>> = Vec::new();

        while !self.stop.is_set() {
            match self.listener.accept() {
                Ok((client, peer_addr)) => {
                    tracing::info!(%peer_addr, "client connected");
                    match self.start_relays(client) {
                        Ok(pair) => relays.extend(pair),
                        Err(e) => {
                            tracing::warn!(error = %e, "upstream connect failed");
                        }
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    if self.stop.is_set() {
                        break;
                    }
                    tracing::warn!(error = %e, "accept error");
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }

        for relay in relays {
            let _ = relay.join();
        }
        tracing::debug!("forwarder exited");
    }

    /// Dial the upstream server and spawn both relay directions.
    fn start_relays(&self, client: TcpStream) -> Result<[JoinHandle<()>; 2]> {
        let server = TcpStream::connect(self.upstream)?;
        client.set_nodelay(true)?;
        server.set_nodelay(true)?;

        let c2s = Relay::new(client.try_clone()?, server.try_clone()?, self.stop.clone())?;
        let s2c = SniffRelay {
            relay: Relay::new(server, client, self.stop.clone())?,
            sniffer: InterleavedSniffer::new(),
            tracks: TrackTable::new(),
            control_tx: self.control_tx.clone(),
            rtp_tx: self.rtp_tx.clone(),
        };

        Ok([
            thread::spawn(move || {
                let reason = c2s.copy_loop(|_| {});
                tracing::debug!(reason, "client→server relay exited");
            }),
            thread::spawn(move || s2c.run()),
        ])
    }
}

/// One unidirectional byte relay.
struct Relay {
    src: TcpStream,
    dst: TcpStream,
    stop: StopFlag,
}

impl Relay {
    fn new(src: TcpStream, dst: TcpStream, stop: StopFlag) -> Result<Self> {
        src.set_read_timeout(Some(RELAY_READ_TIMEOUT))?;
        Ok(Relay { src, dst, stop })
    }

    /// Copy bytes until EOF, a socket error, or the stop flag.
    ///
    /// Each forwarded chunk is also handed to `tap` — the sniffing
    /// direction parses there; the plain direction passes a no-op.
    /// On exit both sockets are shut down so the opposite relay unblocks.
    fn copy_loop(mut self, mut tap: impl FnMut(&[u8])) -> &'static str {
        let mut buf = [0u8; READ_BUF];
        let reason = loop {
            if self.stop.is_set() {
                break "stop signal";
            }
            match self.src.read(&mut buf) {
                Ok(0) => break "connection closed",
                Ok(n) => {
                    if self.dst.write_all(&buf[..n]).is_err() {
                        break "write error";
                    }
                    tap(&buf[..n]);
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_) => break "read error",
            }
        };
        let _ = self.src.shutdown(Shutdown::Both);
        let _ = self.dst.shutdown(Shutdown::Both);
        reason
    }
}

/// The server→client relay with the protocol sniffer attached.
struct SniffRelay {
    relay: Relay,
    sniffer: InterleavedSniffer,
    tracks: TrackTable,
    control_tx: Sender<ControlMsg>,
    rtp_tx: Sender<[u8; 12]>,
}

impl SniffRelay {
    fn run(self) {
        let SniffRelay {
            relay,
            mut sniffer,
            mut tracks,
            control_tx,
            rtp_tx,
        } = self;
        let stop = relay.stop.clone();

        let reason = relay.copy_loop(|chunk| {
            for frame in sniffer.feed(chunk) {
                match frame {
                    Sniffed::Rtp(window) => {
                        // drop on overflow — loss accounting must reflect
                        // the network, not a slow analyzer
                        let _ = rtp_tx.try_send(window);
                    }
                    Sniffed::Text(text) => {
                        handle_response(&text, &mut tracks, &control_tx, &stop);
                    }
                }
            }
        });
        tracing::debug!(reason, "server→client relay exited");
    }
}

fn handle_response(
    text: &str,
    tracks: &mut TrackTable,
    control_tx: &Sender<ControlMsg>,
    stop: &StopFlag,
) {
    let Some(resp) = RtspResponse::parse(text) else {
        return;
    };

    if resp.status_code != 200 {
        tracing::warn!(
            status = resp.status_code,
            reason = %resp.status_text,
            "upstream rejected session, stopping"
        );
        stop.set();
        return;
    }

    for msg in tracks.apply(&resp) {
        if control_tx.send(msg).is_err() {
            tracing::warn!("control channel closed, track binding lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn non_200_raises_stop() {
        let (control_tx, _control_rx) = unbounded();
        let stop = StopFlag::new();
        let mut tracks = TrackTable::new();

        handle_response(
            "RTSP/1.0 404 Stream Not Found\r\nCSeq: 2\r\n\r\n",
            &mut tracks,
            &control_tx,
            &stop,
        );
        assert!(stop.is_set());
    }

    #[test]
    fn ok_response_does_not_stop() {
        let (control_tx, control_rx) = unbounded();
        let stop = StopFlag::new();
        let mut tracks = TrackTable::new();

        handle_response(
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE\r\n\r\n",
            &mut tracks,
            &control_tx,
            &stop,
        );
        assert!(!stop.is_set());
        assert!(control_rx.is_empty());
    }

    #[test]
    fn rtp_info_publishes_control_messages() {
        let (control_tx, control_rx) = unbounded();
        let stop = StopFlag::new();
        let mut tracks = TrackTable::new();

        let sdp = "RTSP/1.0 200 OK\r\nContent-Type: application/sdp\r\n\r\n\
                   m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:trackID=0\r\n";
        handle_response(sdp, &mut tracks, &control_tx, &stop);
        handle_response(
            "RTSP/1.0 200 OK\r\nTransport: RTP/AVP/TCP;interleaved=0-1;ssrc=0000BEEF\r\n\r\n",
            &mut tracks,
            &control_tx,
            &stop,
        );
        handle_response(
            "RTSP/1.0 200 OK\r\nRTP-Info: url=rtsp://h/s/trackID=0;seq=10;rtptime=99\r\n\r\n",
            &mut tracks,
            &control_tx,
            &stop,
        );

        assert!(matches!(
            control_rx.try_recv(),
            Ok(ControlMsg::Track(init)) if init.ssrc == 0xBEEF && init.init_seq == 10
        ));
        assert!(matches!(control_rx.try_recv(), Ok(ControlMsg::Start)));
    }
}
