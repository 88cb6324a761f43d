/// Interleaved channels carrying RTP data (RFC 2326 §10.12: RTP on even
/// channels, RTCP on odd). Track 0 uses channel 0, track 1 uses channel 2.
const RTP_CHANNELS: [u8; 2] = [0, 2];

/// Cap on an unterminated text message before the sniffer resyncs.
/// Larger than any real RTSP response; smaller than a runaway buffer.
const MAX_TEXT_FRAME: usize = 16 * 1024;

/// One frame recovered from the server→client byte stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Sniffed {
    /// First 12 bytes of an RTP payload from channel 0 or 2.
    Rtp([u8; 12]),
    /// A complete RTSP text message, headers and body.
    Text(String),
}

/// Incremental splitter for RTSP-over-TCP interleaved framing.
///
/// TCP reads land on arbitrary boundaries, so a `$`-framed RTP packet or a
/// text response routinely straddles two (or many) reads. The sniffer keeps
/// the unconsumed tail between calls and only emits whole frames:
///
/// - `$<ch><len-hi><len-lo><payload>` — binary frame. Channels 0 and 2 are
///   RTP and yield their first 12 payload bytes; every other channel
///   (RTCP) is framed through without inspection.
/// - `RTSP/1.0 …\r\n…\r\n\r\n[body]` — text frame, consumed through its
///   `Content-Length` body when one is declared.
/// - Anything else — one byte is dropped and scanning resumes, so a
///   corrupt stretch cannot wedge the sniffer.
///
/// The sniffer never touches the forwarding path: callers relay the raw
/// bytes regardless of what (or whether) anything is recovered here.
#[derive(Debug, Default)]
pub struct InterleavedSniffer {
    buf: Vec<u8>,
}

impl InterleavedSniffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes; returns every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Sniffed> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            match self.buf.first().copied() {
                None => break,
                Some(b'$') => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    let channel = self.buf[1];
                    let length = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
                    if self.buf.len() < 4 + length {
                        break;
                    }
                    if RTP_CHANNELS.contains(&channel) && length >= 12 {
                        let mut window = [0u8; 12];
                        window.copy_from_slice(&self.buf[4..16]);
                        out.push(Sniffed::Rtp(window));
                    }
                    self.buf.drain(..4 + length);
                }
                Some(_) => {
                    if !self.take_text(&mut out) {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Try to consume one RTSP text message from the buffer head.
    ///
    /// Returns `false` when more bytes are needed; resyncs (dropping one
    /// byte) when the head cannot be the start of a text message.
    fn take_text(&mut self, out: &mut Vec<Sniffed>) -> bool {
        const PREFIX: &[u8] = b"RTSP/1.0";

        let probe = self.buf.len().min(PREFIX.len());
        if self.buf[..probe] != PREFIX[..probe] {
            self.buf.drain(..1);
            return true;
        }
        if probe < PREFIX.len() {
            return false;
        }

        let Some(head_end) = find(&self.buf, b"\r\n\r\n") else {
            if self.buf.len() > MAX_TEXT_FRAME {
                tracing::debug!(len = self.buf.len(), "unterminated text frame, resyncing");
                self.buf.drain(..1);
                return true;
            }
            return false;
        };

        let header = String::from_utf8_lossy(&self.buf[..head_end]);
        let body_len = content_length(&header).unwrap_or(0);
        let total = head_end + 4 + body_len;
        if self.buf.len() < total {
            return false;
        }

        let text = String::from_utf8_lossy(&self.buf[..total]).into_owned();
        out.push(Sniffed::Text(text));
        self.buf.drain(..total);
        true
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn content_length(header: &str) -> Option<usize> {
    header.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("Content-Length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
