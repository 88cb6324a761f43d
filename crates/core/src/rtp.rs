use std::time::Instant;

/// Accepted RTP payload types: PCMU (0), PCMA (8), and the dynamic range
/// used for H.264/AAC by the cameras this probe targets (96–98, RFC 3551).
const ACCEPTED_PAYLOAD_TYPES: [u8; 5] = [0, 8, 96, 97, 98];

/// A parsed RTP fixed header (RFC 3550 §5.1) plus its local arrival time.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Only the first 12 bytes of each interleaved RTP frame reach the net
/// analyzer; payload, CSRC list, and extensions are never copied off the
/// forwarding path.
#[derive(Debug, Clone, Copy)]
pub struct RtpPacket {
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    /// Sequence number, wrapping at 2^16.
    pub sequence: u16,
    /// Media timestamp in clock-rate units, wrapping at 2^32.
    pub timestamp: u32,
    /// Synchronization source identifier.
    pub ssrc: u32,
    /// Local monotonic arrival time, stamped at parse.
    pub arrival: Instant,
}

impl RtpPacket {
    /// Parse a 12-byte RTP header window.
    ///
    /// Returns `None` when the window is short, the version field is not 2,
    /// or the payload type is outside the accepted set — callers drop such
    /// windows silently (RTCP and garbage share the interleaved channel
    /// space on some servers).
    pub fn parse(window: &[u8]) -> Option<Self> {
        if window.len() < 12 {
            return None;
        }

        let version = (window[0] >> 6) & 0x03;
        let payload_type = window[1] & 0x7f;
        if version != 2 || !ACCEPTED_PAYLOAD_TYPES.contains(&payload_type) {
            return None;
        }

        Some(RtpPacket {
            payload_type,
            sequence: u16::from_be_bytes([window[2], window[3]]),
            timestamp: u32::from_be_bytes([window[4], window[5], window[6], window[7]]),
            ssrc: u32::from_be_bytes([window[8], window[9], window[10], window[11]]),
            arrival: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_window(version: u8, pt: u8, seq: u16, ts: u32, ssrc: u32) -> [u8; 12] {
        let mut w = [0u8; 12];
        w[0] = version << 6;
        w[1] = pt;
        w[2..4].copy_from_slice(&seq.to_be_bytes());
        w[4..8].copy_from_slice(&ts.to_be_bytes());
        w[8..12].copy_from_slice(&ssrc.to_be_bytes());
        w
    }

    #[test]
    fn parse_valid_header() {
        let w = make_window(2, 96, 4660, 123456, 0xAABBCCDD);
        let pkt = RtpPacket::parse(&w).unwrap();
        assert_eq!(pkt.payload_type, 96);
        assert_eq!(pkt.sequence, 4660);
        assert_eq!(pkt.timestamp, 123456);
        assert_eq!(pkt.ssrc, 0xAABBCCDD);
    }

    #[test]
    fn reject_wrong_version() {
        let w = make_window(1, 96, 0, 0, 0);
        assert!(RtpPacket::parse(&w).is_none());
    }

    #[test]
    fn reject_unknown_payload_type() {
        let w = make_window(2, 33, 0, 0, 0);
        assert!(RtpPacket::parse(&w).is_none());
    }

    #[test]
    fn accept_pcmu_and_pcma() {
        assert!(RtpPacket::parse(&make_window(2, 0, 0, 0, 0)).is_some());
        assert!(RtpPacket::parse(&make_window(2, 8, 0, 0, 0)).is_some());
    }

    #[test]
    fn reject_short_window() {
        assert!(RtpPacket::parse(&[0x80, 96, 0, 0]).is_none());
    }

    #[test]
    fn marker_bit_does_not_change_payload_type() {
        let mut w = make_window(2, 96, 1, 2, 3);
        w[1] |= 0x80;
        let pkt = RtpPacket::parse(&w).unwrap();
        assert_eq!(pkt.payload_type, 96);
    }
}
