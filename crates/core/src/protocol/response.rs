/// A parsed RTSP response (RFC 2326 §7).
///
/// RTSP responses follow HTTP/1.1 syntax:
///
/// ```text
/// RTSP/1.0 SP Status-Code SP Reason-Phrase CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. Malformed header
/// lines are skipped rather than failing the whole message — the probe is
/// an observer and must keep forwarding whatever the server says.
#[derive(Debug)]
pub struct RtspResponse {
    /// Numeric status code from the status line.
    pub status_code: u16,
    /// Reason phrase (e.g. `OK`, `Not Found`).
    pub status_text: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Message body (SDP for DESCRIBE responses), empty when absent.
    pub body: String,
}

impl RtspResponse {
    /// Parse an RTSP response from its text representation.
    ///
    /// Returns `None` when the text does not start with a valid
    /// `RTSP/1.0 <code> <reason>` status line.
    pub fn parse(raw: &str) -> Option<Self> {
        let (head, body) = match raw.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body),
            None => (raw, ""),
        };

        let mut lines = head.lines();
        let status_line = lines.next()?;
        let rest = status_line.strip_prefix("RTSP/1.0 ")?;
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        let status_code: u16 = code.trim().parse().ok()?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let Some(colon_pos) = line.find(':') else {
                continue;
            };
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }

        Some(RtspResponse {
            status_code,
            status_text: reason.trim().to_string(),
            headers,
            body: body.to_string(),
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ok_response() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 2\r\nSession: 12345\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.status_text, "OK");
        assert_eq!(resp.get_header("Session"), Some("12345"));
    }

    #[test]
    fn parse_error_status() {
        let raw = "RTSP/1.0 404 Stream Not Found\r\nCSeq: 2\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.status_code, 404);
        assert_eq!(resp.status_text, "Stream Not Found");
    }

    #[test]
    fn parse_with_body() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Type: application/sdp\r\n\r\nv=0\r\nm=video 0 RTP/AVP 96\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.get_header("Content-Type"), Some("application/sdp"));
        assert!(resp.body.starts_with("v=0"));
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "RTSP/1.0 200 OK\r\ncontent-type: application/sdp\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.get_header("Content-Type"), Some("application/sdp"));
        assert_eq!(resp.get_header("CONTENT-TYPE"), Some("application/sdp"));
    }

    #[test]
    fn reject_request_text() {
        assert!(RtspResponse::parse("OPTIONS rtsp://h/s RTSP/1.0\r\n\r\n").is_none());
    }

    #[test]
    fn malformed_header_lines_skipped() {
        let raw = "RTSP/1.0 200 OK\r\ngarbage line\r\nCSeq: 9\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.get_header("CSeq"), Some("9"));
        assert_eq!(resp.headers.len(), 1);
    }
}
