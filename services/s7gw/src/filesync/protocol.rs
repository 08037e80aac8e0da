//! Touch-panel file-sharing wire format
//!
//! Plain ASCII over TCP without framing: every receive is treated as one
//! message, except file bodies, which run until the `##PNL_ACK##` marker.

/// Driver acknowledgement, sent after every protocol step
pub const DRV_ACK: &[u8] = b"##DRV_ACK##\n\n";

/// Panel end-of-stream marker
pub const PNL_ACK: &[u8] = b"##PNL_ACK##";

/// Receive buffer size for one chunk
pub const CHUNK_SIZE: usize = 1024;

/// Request sent by the panel after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send the encrypted user file
    User,
    /// Receive measurement and event log files
    LogFile,
    Unknown(String),
}

impl Command {
    pub fn parse(msg: &[u8]) -> Self {
        match message_text(msg).as_str() {
            "User" => Self::User,
            "LogFile" => Self::LogFile,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Message as text without trailing NULs or line endings
pub fn message_text(msg: &[u8]) -> String {
    String::from_utf8_lossy(msg)
        .trim_end_matches(|c: char| c == '\0' || c.is_ascii_whitespace())
        .to_string()
}

/// Handshake token with C `atoi` semantics: leading integer, else 0
pub fn parse_handshake_token(msg: &[u8]) -> i64 {
    let text = String::from_utf8_lossy(msg);
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    if negative {
        -value
    } else {
        value
    }
}

/// Reply to a handshake token: `token + 1` in ASCII decimal
pub fn handshake_reply(token: i64) -> String {
    token.saturating_add(1).to_string()
}

/// `Event` switches later log files to the event directory
pub fn is_event_switch(msg: &[u8]) -> bool {
    message_text(msg) == "Event"
}

/// Whether a message closes the file-name loop
pub fn ends_with_marker(msg: &[u8]) -> bool {
    let trimmed = trim_trailing_nuls(msg);
    trimmed.ends_with(PNL_ACK)
}

/// Local file name for a received log name
///
/// Only the final path component is kept and the `.log` extension becomes
/// `.dat`. Returns `None` for names that would escape the target directory.
pub fn log_target_name(msg: &[u8]) -> Option<String> {
    let text = message_text(msg);
    let base = text
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }

    let stem = match base.len().checked_sub(4) {
        Some(cut) if base.is_char_boundary(cut) && base[cut..].eq_ignore_ascii_case(".log") => {
            &base[..cut]
        },
        _ => base,
    };
    if stem.is_empty() {
        return None;
    }
    Some(format!("{}.dat", stem))
}

fn trim_trailing_nuls(msg: &[u8]) -> &[u8] {
    let end = msg.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    &msg[..end]
}

/// Result of feeding one chunk to a [`MarkerScanner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// Bytes safe to write; the stream continues
    Pending(Vec<u8>),
    /// Final bytes before the marker; the stream is complete
    Complete(Vec<u8>),
}

/// Detects a terminating marker that may be split across chunks
///
/// Bytes that could be the start of the marker are held back until the next
/// chunk shows whether they are data or marker, so no part of the marker is
/// ever released as data.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    marker: &'static [u8],
    carry: Vec<u8>,
}

impl MarkerScanner {
    pub fn new(marker: &'static [u8]) -> Self {
        Self {
            marker,
            carry: Vec::with_capacity(marker.len()),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> ScanResult {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(trim_trailing_nuls(chunk));

        if buf.ends_with(self.marker) {
            buf.truncate(buf.len() - self.marker.len());
            return ScanResult::Complete(buf);
        }

        let keep = self.partial_marker_len(&buf);
        self.carry = buf.split_off(buf.len() - keep);
        ScanResult::Pending(buf)
    }

    /// Bytes currently held back
    pub fn held(&self) -> &[u8] {
        &self.carry
    }

    /// Longest tail of `buf` that is a proper prefix of the marker
    fn partial_marker_len(&self, buf: &[u8]) -> usize {
        let max = self.marker.len().saturating_sub(1).min(buf.len());
        (1..=max)
            .rev()
            .find(|&k| buf.ends_with(&self.marker[..k]))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_marker_is_not_written() {
        let mut scanner = MarkerScanner::new(PNL_ACK);
        assert_eq!(
            scanner.push(b"DATA##PNL_A"),
            ScanResult::Pending(b"DATA".to_vec())
        );
        assert_eq!(scanner.held(), b"##PNL_A");
        assert_eq!(scanner.push(b"CK##"), ScanResult::Complete(Vec::new()));
    }

    #[test]
    fn test_marker_in_single_chunk() {
        let mut scanner = MarkerScanner::new(PNL_ACK);
        assert_eq!(
            scanner.push(b"a;b;c\n##PNL_ACK##"),
            ScanResult::Complete(b"a;b;c\n".to_vec())
        );
    }

    #[test]
    fn test_marker_split_one_byte_at_a_time() {
        let mut scanner = MarkerScanner::new(PNL_ACK);
        let mut written = Vec::new();
        let stream = b"line1\nline2\n##PNL_ACK##";
        let mut done = false;
        for byte in stream.iter() {
            match scanner.push(&[*byte]) {
                ScanResult::Pending(bytes) => written.extend(bytes),
                ScanResult::Complete(bytes) => {
                    written.extend(bytes);
                    done = true;
                },
            }
        }
        assert!(done);
        assert_eq!(written, b"line1\nline2\n");
    }

    #[test]
    fn test_false_partial_marker_is_released() {
        let mut scanner = MarkerScanner::new(PNL_ACK);
        assert_eq!(scanner.push(b"x##PN"), ScanResult::Pending(b"x".to_vec()));
        assert_eq!(
            scanner.push(b"Q more"),
            ScanResult::Pending(b"##PNQ more".to_vec())
        );
        assert!(scanner.held().is_empty());
    }

    #[test]
    fn test_commands() {
        assert_eq!(Command::parse(b"User"), Command::User);
        assert_eq!(Command::parse(b"LogFile\0\0"), Command::LogFile);
        assert_eq!(Command::parse(b"LogFile\r\n"), Command::LogFile);
        assert_eq!(
            Command::parse(b"Reboot"),
            Command::Unknown("Reboot".to_string())
        );
        assert!(is_event_switch(b"Event"));
        assert!(!is_event_switch(b"Events"));
    }

    #[test]
    fn test_handshake_token() {
        assert_eq!(parse_handshake_token(b"41"), 41);
        assert_eq!(parse_handshake_token(b"  17abc"), 17);
        assert_eq!(parse_handshake_token(b"-5"), -5);
        assert_eq!(parse_handshake_token(b"hello"), 0);
        assert_eq!(handshake_reply(41), "42");
        assert_eq!(handshake_reply(0), "1");
    }

    #[test]
    fn test_log_target_name() {
        assert_eq!(log_target_name(b"20240101.log").as_deref(), Some("20240101.dat"));
        assert_eq!(log_target_name(b"M_01.LOG").as_deref(), Some("M_01.dat"));
        assert_eq!(log_target_name(b"noext").as_deref(), Some("noext.dat"));
        assert_eq!(
            log_target_name(b"../../etc/passwd.log").as_deref(),
            Some("passwd.dat")
        );
        assert_eq!(log_target_name(b"C:\\logs\\a.log").as_deref(), Some("a.dat"));
        assert_eq!(log_target_name(b".."), None);
        assert_eq!(log_target_name(b""), None);
        assert_eq!(log_target_name(b"dir/"), None);
    }

    #[test]
    fn test_ends_with_marker() {
        assert!(ends_with_marker(b"##PNL_ACK##"));
        assert!(ends_with_marker(b"##PNL_ACK##\0"));
        assert!(!ends_with_marker(b"file.log"));
    }
}
