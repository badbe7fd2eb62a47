//! Content-Range codec for the resumable upload protocol.
//!
//! Accepts the three shapes clients send:
//! - data chunk: `bytes <start>-<end>/<total>` (or `/*` when the client
//!   does not know the total)
//! - status probe with total: `bytes */<total>`
//! - status probe, total unknown: `bytes */*`
//!
//! Malformed input parses to `None`; the HTTP layer maps that to `400`.

/// Parsed Content-Range header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// Absent when the client sent `/*`.
    pub total: Option<u64>,
    pub is_status_probe: bool,
}

impl ContentRange {
    /// Parse a `Content-Range` value. Returns `None` on malformed input
    /// (wrong unit, non-numeric fields, `start > end`, `end >= total`).
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?;
        // The unit must be followed by whitespace, not e.g. "bytesX".
        let rest = rest.strip_prefix(' ')?.trim_start();

        let (range_part, total_part) = rest.split_once('/')?;
        let total = match total_part.trim() {
            "*" => None,
            t => Some(parse_u64(t)?),
        };

        if range_part.trim() == "*" {
            // Probe: start/end carry no byte positions.
            return Some(Self {
                start: 0,
                end: 0,
                total,
                is_status_probe: true,
            });
        }

        let (start_s, end_s) = range_part.split_once('-')?;
        let start = parse_u64(start_s.trim())?;
        let end = parse_u64(end_s.trim())?;
        if start > end {
            return None;
        }
        if let Some(total) = total {
            if end >= total {
                return None;
            }
        }
        Some(Self {
            start,
            end,
            total,
            is_status_probe: false,
        })
    }

    /// Byte length of the chunk this range describes.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.is_status_probe
    }

    /// Format a data-chunk value, the inverse of `parse` on valid input.
    pub fn format_chunk(start: u64, end: u64, total: u64) -> String {
        let mut buf = itoa::Buffer::new();
        let mut s = String::with_capacity(48);
        s.push_str("bytes ");
        s.push_str(buf.format(start));
        s.push('-');
        s.push_str(buf.format(end));
        s.push('/');
        s.push_str(buf.format(total));
        s
    }

    /// 1-based part number for a chunk starting at `start`.
    /// Valid chunks always start on a `chunk_size` boundary.
    pub fn part_number(start: u64, chunk_size: u64) -> u32 {
        (start / chunk_size + 1).min(u32::MAX as u64) as u32
    }
}

/// `Range: bytes=0-{bytesReceived-1}` header for 308 responses.
/// `None` when nothing has been received yet (the header is omitted).
pub fn range_header(bytes_received: u64) -> Option<String> {
    if bytes_received == 0 {
        return None;
    }
    let mut buf = itoa::Buffer::new();
    let mut s = String::with_capacity(24);
    s.push_str("bytes=0-");
    s.push_str(buf.format(bytes_received - 1));
    Some(s)
}

/// `Upload-Offset` header value for 308 responses.
pub fn upload_offset_header(bytes_received: u64) -> String {
    itoa::Buffer::new().format(bytes_received).to_string()
}

/// Strict digit-only u64 parse; rejects signs, whitespace, and empty input.
fn parse_u64(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
