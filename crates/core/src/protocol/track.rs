use crate::protocol::response::RtspResponse;
use crate::protocol::sdp::{self, number_after};

/// Media kind of an RTP track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    /// Parse the media field of an SDP `m=` line.
    pub fn from_sdp(kind: &str) -> Option<Self> {
        match kind {
            "video" => Some(TrackKind::Video),
            "audio" => Some(TrackKind::Audio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

/// Everything the net analyzer needs to account for one RTP track.
///
/// Assembled across several RTSP exchanges (see [`TrackTable`]); published
/// only once all six fields have been observed.
#[derive(Debug, Clone, Copy)]
pub struct TrackInit {
    /// Track index (0 or 1).
    pub track_id: usize,
    pub kind: TrackKind,
    /// Media clock rate in Hz.
    pub clock_rate: u32,
    /// Synchronization source announced in the `Transport` header.
    pub ssrc: u32,
    /// First sequence number announced in `RTP-Info`.
    pub init_seq: u16,
    /// First RTP timestamp announced in `RTP-Info`.
    pub init_timestamp: u32,
}

/// Message from the forwarder's control channel to the net analyzer.
#[derive(Debug, Clone, Copy)]
pub enum ControlMsg {
    /// A track's metadata is complete.
    Track(TrackInit),
    /// All tracks have been announced; RTP data follows.
    Start,
}

/// Partially observed track metadata.
#[derive(Debug, Default, Clone, Copy)]
struct TrackSlot {
    kind: Option<TrackKind>,
    clock_rate: Option<u32>,
    ssrc: Option<u32>,
    init_seq: Option<u16>,
    init_timestamp: Option<u32>,
}

impl TrackSlot {
    fn complete(&self, track_id: usize) -> Option<TrackInit> {
        Some(TrackInit {
            track_id,
            kind: self.kind?,
            clock_rate: self.clock_rate?,
            ssrc: self.ssrc?,
            init_seq: self.init_seq?,
            init_timestamp: self.init_timestamp?,
        })
    }
}

/// Two-slot table accumulating track metadata from sniffed responses.
///
/// Fields arrive piecemeal (SDP, then one `Transport` per SETUP, then
/// `RTP-Info` on PLAY); missing pieces are tolerated silently. When
/// `RTP-Info` lands, every slot that became complete is emitted followed
/// by [`ControlMsg::Start`].
#[derive(Debug, Default)]
pub struct TrackTable {
    slots: [TrackSlot; 2],
}

impl TrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest one sniffed RTSP response.
    ///
    /// Returns the control messages this response made publishable —
    /// empty for everything except the `RTP-Info` response.
    pub fn apply(&mut self, resp: &RtspResponse) -> Vec<ControlMsg> {
        if resp
            .get_header("Content-Type")
            .is_some_and(|ct| ct.eq_ignore_ascii_case("application/sdp"))
        {
            self.apply_sdp(&resp.body);
        }

        if let Some(transport) = resp.get_header("Transport") {
            self.apply_transport(transport);
        }

        if let Some(rtp_info) = resp.get_header("RTP-Info") {
            return self.apply_rtp_info(rtp_info);
        }

        Vec::new()
    }

    fn slot_mut(&mut self, track_id: usize) -> Option<&mut TrackSlot> {
        self.slots.get_mut(track_id)
    }

    fn apply_sdp(&mut self, body: &str) {
        for media in sdp::parse_media_sections(body) {
            let Some(track_id) = media.track_id else {
                continue;
            };
            let Some(slot) = self.slot_mut(track_id) else {
                tracing::debug!(track_id, "SDP track id out of range");
                continue;
            };
            slot.kind = Some(media.kind);
            if media.clock_rate.is_some() {
                slot.clock_rate = media.clock_rate;
            }
        }
    }

    /// `Transport: RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=61B2D9F5`
    ///
    /// The interleaved channel pair maps to a track: RTP channel `2n`
    /// belongs to track `n`. Channel numbers are parsed as full integers,
    /// so interleaved pairs ≥ 10 are handled.
    fn apply_transport(&mut self, value: &str) {
        let mut track_id = None;
        let mut ssrc = None;
        for part in value.split(';') {
            let part = part.trim();
            if let Some(channels) = part.strip_prefix("interleaved=") {
                track_id = channels
                    .split('-')
                    .next()
                    .and_then(|ch| ch.parse::<usize>().ok())
                    .map(|ch| ch / 2);
            } else if let Some(hex) = part.strip_prefix("ssrc=") {
                ssrc = u32::from_str_radix(hex.trim(), 16).ok();
            }
        }

        let Some(track_id) = track_id else { return };
        let Some(slot) = self.slot_mut(track_id) else {
            tracing::debug!(track_id, "Transport track id out of range");
            return;
        };
        if ssrc.is_some() {
            slot.ssrc = ssrc;
        }
    }

    /// `RTP-Info: url=rtsp://h/s/trackID=0;seq=4496;rtptime=2406199,url=...`
    fn apply_rtp_info(&mut self, value: &str) -> Vec<ControlMsg> {
        for entry in value.split(',') {
            let Some(track_id) = number_after::<usize>(entry, "trackID=") else {
                continue;
            };
            let Some(slot) = self.slot_mut(track_id) else {
                tracing::debug!(track_id, "RTP-Info track id out of range");
                continue;
            };
            if let Some(seq) = number_after::<u16>(entry, "seq=") {
                slot.init_seq = Some(seq);
            }
            if let Some(rtptime) = number_after::<u32>(entry, "rtptime=") {
                slot.init_timestamp = Some(rtptime);
            }
        }

        let mut msgs = Vec::new();
        for (id, slot) in self.slots.iter().enumerate() {
            if let Some(init) = slot.complete(id) {
                tracing::info!(
                    track_id = init.track_id,
                    kind = init.kind.as_str(),
                    clock_rate = init.clock_rate,
                    ssrc = format_args!("{:#010X}", init.ssrc),
                    init_seq = init.init_seq,
                    "track bound"
                );
                msgs.push(ControlMsg::Track(init));
            }
        }
        msgs.push(ControlMsg::Start);
        msgs
    }
}
