//! Integration test: a scripted RTSP server on one side, a client on the
//! other, the forwarder in between.
//!
//! Verifies the relay is byte-exact in both directions while the sniffer
//! extracts track bindings and RTP header windows, and that a non-200
//! upstream status raises the stop flag. Both phases share one test
//! function because the forwarder owns a fixed local port.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use probe::forwarder::{Forwarder, LISTEN_PORT};
use probe::protocol::ControlMsg;
use probe::StopFlag;

const SDP_RESPONSE: &[u8] = b"RTSP/1.0 200 OK\r\n\
    CSeq: 2\r\n\
    Content-Type: application/sdp\r\n\
    Content-Length: 91\r\n\
    \r\n\
    v=0\r\n\
    m=video 0 RTP/AVP 96\r\n\
    a=rtpmap:96 H264/90000\r\n\
    a=control:rtsp://127.0.0.1/s/trackID=0\r\n";

const TRANSPORT_RESPONSE: &[u8] = b"RTSP/1.0 200 OK\r\n\
    CSeq: 3\r\n\
    Transport: RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=61B2D9F5\r\n\
    \r\n";

const RTP_INFO_RESPONSE: &[u8] = b"RTSP/1.0 200 OK\r\n\
    CSeq: 4\r\n\
    RTP-Info: url=rtsp://127.0.0.1/s/trackID=0;seq=4496;rtptime=2406199\r\n\
    \r\n";

const NOT_FOUND_RESPONSE: &[u8] = b"RTSP/1.0 404 Stream Not Found\r\nCSeq: 2\r\n\r\n";

/// `$`-framed interleaved packet.
fn interleaved(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![b'$', channel];
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// A valid RTP packet for SSRC 0x61B2D9F5.
fn rtp_payload(seq: u16, timestamp: u32) -> Vec<u8> {
    let mut payload = vec![0x80, 96];
    payload.extend_from_slice(&seq.to_be_bytes());
    payload.extend_from_slice(&timestamp.to_be_bytes());
    payload.extend_from_slice(&0x61B2D9F5u32.to_be_bytes());
    payload.extend_from_slice(&[0xAB; 32]);
    payload
}

fn read_exact_len(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut filled = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while filled < len {
        assert!(Instant::now() < deadline, "timed out after {filled}/{len} bytes");
        match stream.read(&mut data[filled..]) {
            Ok(0) => panic!("peer closed after {filled}/{len} bytes"),
            Ok(n) => filled += n,
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => panic!("read error: {e}"),
        }
    }
    data
}

#[test]
fn forwarder_relays_and_sniffs() {
    // ---- phase 1: healthy session ----
    let upstream = TcpListener::bind("127.0.0.1:0").expect("bind upstream");
    let upstream_addr = upstream.local_addr().unwrap();

    let (control_tx, control_rx) = bounded(8);
    let (rtp_tx, rtp_rx) = bounded(64);
    let stop = StopFlag::new();

    let forwarder =
        Forwarder::bind(upstream_addr, control_tx, rtp_tx, stop.clone()).expect("bind forwarder");
    let forwarder_handle = thread::spawn(move || forwarder.run());

    let mut client = TcpStream::connect(("127.0.0.1", LISTEN_PORT)).expect("connect client");
    client
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();

    let (mut server, _) = upstream.accept().expect("forwarder dials upstream");
    server
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();

    // client→server bytes arrive verbatim
    let request = b"DESCRIBE rtsp://127.0.0.1/s RTSP/1.0\r\nCSeq: 2\r\n\r\n";
    client.write_all(request).unwrap();
    assert_eq!(read_exact_len(&mut server, request.len()), request);

    // server→client: control responses, one RTP frame, one RTCP frame
    let mut sent = Vec::new();
    sent.extend_from_slice(SDP_RESPONSE);
    sent.extend_from_slice(TRANSPORT_RESPONSE);
    sent.extend_from_slice(RTP_INFO_RESPONSE);
    let rtp = rtp_payload(4496, 2406199);
    sent.extend_from_slice(&interleaved(0, &rtp));
    sent.extend_from_slice(&interleaved(1, &[0xCC; 20]));
    server.write_all(&sent).unwrap();

    // the relay is byte-exact
    assert_eq!(read_exact_len(&mut client, sent.len()), sent);

    // the sniffer extracted the track binding...
    let msg = control_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("track init on control channel");
    let ControlMsg::Track(init) = msg else {
        panic!("expected track init first");
    };
    assert_eq!(init.ssrc, 0x61B2D9F5);
    assert_eq!(init.clock_rate, 90000);
    assert_eq!(init.init_seq, 4496);
    assert_eq!(init.init_timestamp, 2406199);
    assert!(matches!(
        control_rx.recv_timeout(Duration::from_secs(2)),
        Ok(ControlMsg::Start)
    ));

    // ...and the RTP header window, but not the RTCP frame
    let window = rtp_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("rtp header window");
    assert_eq!(&window[..], &rtp[..12]);
    assert!(rtp_rx.is_empty());
    assert!(!stop.is_set());

    stop.set();
    forwarder_handle.join().unwrap();
    drop(client);
    drop(server);
    drop(upstream);

    // ---- phase 2: upstream rejects the session ----
    let upstream = TcpListener::bind("127.0.0.1:0").expect("bind upstream");
    let upstream_addr = upstream.local_addr().unwrap();

    let (control_tx, _control_rx) = bounded(8);
    let (rtp_tx, _rtp_rx) = bounded(64);
    let stop = StopFlag::new();

    let forwarder =
        Forwarder::bind(upstream_addr, control_tx, rtp_tx, stop.clone()).expect("rebind forwarder");
    let forwarder_handle = thread::spawn(move || forwarder.run());

    let _client = TcpStream::connect(("127.0.0.1", LISTEN_PORT)).expect("connect client");
    let (mut server, _) = upstream.accept().expect("forwarder dials upstream");
    server.write_all(NOT_FOUND_RESPONSE).unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while !stop.is_set() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(stop.is_set(), "non-200 status must raise the stop flag");

    forwarder_handle.join().unwrap();
}
