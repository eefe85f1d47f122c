/// Appended to any stream that was cut at the cap.
pub const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Trimmed, bounded text plus whether it was cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    pub truncated: bool,
}

/// Smallest cap that still fits one UTF-8 character before the marker.
const MIN_MAX_BYTES: usize = 4;

/// Trims captured output and bounds it to `max_bytes`.
///
/// Sanitizing already-sanitized text returns it unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSanitizer {
    max_bytes: usize,
}

impl OutputSanitizer {
    /// Caps below four bytes are raised to four.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(MIN_MAX_BYTES),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn sanitize(&self, raw: &str) -> Sanitized {
        let trimmed = raw.trim();

        if trimmed.len() <= self.max_bytes {
            return Sanitized {
                text: trimmed.to_string(),
                truncated: false,
            };
        }

        // Over the cap only because of our own marker: already cut.
        if let Some(content) = trimmed.strip_suffix(TRUNCATION_MARKER)
            && content.len() <= self.max_bytes
        {
            return Sanitized {
                text: trimmed.to_string(),
                truncated: true,
            };
        }

        let cut = floor_char_boundary(trimmed, self.max_bytes);
        let mut text = String::with_capacity(cut + TRUNCATION_MARKER.len());
        text.push_str(&trimmed[..cut]);
        text.push_str(TRUNCATION_MARKER);
        Sanitized {
            text,
            truncated: true,
        }
    }

    /// Sanitize a captured byte stream. `overflowed` means the reader
    /// dropped bytes past its capture limit.
    pub fn sanitize_capture(&self, bytes: &[u8], overflowed: bool) -> Sanitized {
        let mut sanitized = self.sanitize(&String::from_utf8_lossy(bytes));
        if overflowed && !sanitized.truncated {
            sanitized.text.push_str(TRUNCATION_MARKER);
            sanitized.truncated = true;
        }
        sanitized
    }

    /// Bytes each reader keeps before discarding the remainder.
    pub fn capture_limit(&self) -> usize {
        self.max_bytes.saturating_mul(4).max(64 * 1024)
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
