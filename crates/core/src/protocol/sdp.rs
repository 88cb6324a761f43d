//! SDP (Session Description Protocol) media-section parsing (RFC 4566).
//!
//! A DESCRIBE response body looks like:
//!
//! ```text
//! v=0
//! o=- 123 1 IN IP4 192.168.1.50
//! s=Camera
//! m=video 0 RTP/AVP 96             ← media section starts
//! a=rtpmap:96 H264/90000           ← codec / clock rate
//! a=control:trackID=0              ← track control fragment
//! m=audio 0 RTP/AVP 97
//! a=rtpmap:97 MPEG4-GENERIC/16000/1
//! a=control:trackID=1
//! ```
//!
//! Only the three fields the analyzers need are extracted; everything else
//! in the body is ignored. Fields a section does not carry are left `None`
//! — the track table tolerates partial information.

use crate::protocol::track::TrackKind;

/// What one `m=` section contributes to a track's identity.
#[derive(Debug, PartialEq, Eq)]
pub struct SdpMedia {
    pub kind: TrackKind,
    pub track_id: Option<usize>,
    pub clock_rate: Option<u32>,
}

/// Parse the `m=` sections of an SDP body.
///
/// Sections whose media kind is neither `video` nor `audio` (e.g.
/// `application`) are skipped.
pub fn parse_media_sections(sdp: &str) -> Vec<SdpMedia> {
    let mut sections = Vec::new();

    for section in sdp.split("m=").skip(1) {
        let mut lines = section.lines();
        let Some(media_line) = lines.next() else {
            continue;
        };
        let Some(kind) = media_line
            .split_whitespace()
            .next()
            .and_then(TrackKind::from_sdp)
        else {
            continue;
        };

        let mut track_id = None;
        let mut clock_rate = None;
        for line in lines {
            let line = line.trim();
            if let Some(control) = line.strip_prefix("a=control:") {
                if let Some(id) = number_after(control, "trackID=") {
                    track_id = Some(id);
                }
            } else if let Some(rtpmap) = line.strip_prefix("a=rtpmap:") {
                // "96 H264/90000" or "97 MPEG4-GENERIC/16000/1"
                clock_rate = rtpmap
                    .split_whitespace()
                    .nth(1)
                    .and_then(|codec| codec.split('/').nth(1))
                    .and_then(|rate| rate.parse().ok());
            }
        }

        sections.push(SdpMedia {
            kind,
            track_id,
            clock_rate,
        });
    }

    sections
}

/// Parse the unsigned integer immediately following `key` in `text`.
pub(crate) fn number_after<T: std::str::FromStr>(text: &str, key: &str) -> Option<T> {
    let start = text.find(key)? + key.len();
    let digits: &str = {
        let rest = &text[start..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        &rest[..end]
    };
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\n\
        o=- 123 1 IN IP4 192.168.1.50\r\n\
        s=Camera\r\n\
        m=video 0 RTP/AVP 96\r\n\
        a=rtpmap:96 H264/90000\r\n\
        a=control:trackID=0\r\n\
        m=audio 0 RTP/AVP 97\r\n\
        a=rtpmap:97 MPEG4-GENERIC/16000/1\r\n\
        a=control:trackID=1\r\n";

    #[test]
    fn parse_video_and_audio() {
        let sections = parse_media_sections(SDP);
        assert_eq!(sections.len(), 2);
        assert_eq!(
            sections[0],
            SdpMedia {
                kind: TrackKind::Video,
                track_id: Some(0),
                clock_rate: Some(90000),
            }
        );
        assert_eq!(
            sections[1],
            SdpMedia {
                kind: TrackKind::Audio,
                track_id: Some(1),
                clock_rate: Some(16000),
            }
        );
    }

    #[test]
    fn audio_channel_suffix_ignored() {
        let sections = parse_media_sections("m=audio 0 RTP/AVP 97\r\na=rtpmap:97 PCMA/8000/2\r\n");
        assert_eq!(sections[0].clock_rate, Some(8000));
    }

    #[test]
    fn unknown_media_kind_skipped() {
        let sdp = "m=application 0 RTP/AVP 99\r\na=rtpmap:99 data/1000\r\n\
                   m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n";
        let sections = parse_media_sections(sdp);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].kind, TrackKind::Video);
    }

    #[test]
    fn missing_fields_left_none() {
        let sections = parse_media_sections("m=video 0 RTP/AVP 96\r\n");
        assert_eq!(sections[0].track_id, None);
        assert_eq!(sections[0].clock_rate, None);
    }

    #[test]
    fn number_after_extracts_prefix_digits() {
        assert_eq!(number_after::<u32>("seq=1234;x", "seq="), Some(1234));
        assert_eq!(number_after::<u32>("no key here", "seq="), None);
        assert_eq!(number_after::<u32>("seq=;x", "seq="), None);
    }
}
