//! HTTP byte-range parsing and arithmetic.
//!
//! Only the single-range `bytes=start-end` form is handled, with an open
//! end allowed. Anything else (suffix ranges, multiple ranges, other units)
//! is ignored, which per HTTP semantics means serving the full body.

/// A requested range as it appears on the wire, before the object size is
/// known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end; `None` means "to the final byte".
    pub end: Option<u64>,
}

/// A range resolved against a concrete object size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub total: u64,
}

impl Span {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// Parse a `Range` header value. `None` means "not a range we serve
/// partially"; the caller falls back to the full body.
pub fn parse(header: &str) -> Option<ByteRange> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        end => Some(end.parse::<u64>().ok()?),
    };
    if end.is_some_and(|end| end < start) {
        return None;
    }
    Some(ByteRange { start, end })
}

impl ByteRange {
    /// Resolve against the object's size.
    ///
    /// An end past the last byte is clamped per HTTP semantics; a start past
    /// the last byte is unsatisfiable (`None` → 416).
    pub fn resolve(&self, total: u64) -> Option<Span> {
        if self.start >= total {
            return None;
        }
        let end = self.end.map_or(total - 1, |end| end.min(total - 1));
        Some(Span { start: self.start, end, total })
    }
}
