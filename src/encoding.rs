//! Text resolution: bytes → `String` through an ordered fallback chain.
//!
//! MOBI files in the wild declare their encoding unreliably, and a large
//! share of CJK books are GB18030 labelled as CP1252.  Resolution therefore
//! ignores the declared encoding and tries, in order:
//!
//! | # | Encoding | Policy |
//! |---|----------|--------|
//! | 1 | UTF-8    | strict  |
//! | 2 | GB18030  | strict  |
//! | 3 | UTF-8    | replace |
//! | 4 | GB18030  | replace |
//! | 5 | CP1252   | strict  |
//! | 6 | Latin-1  | strict  |
//!
//! Latin-1 decodes any byte sequence, so it sits last where it cannot mask
//! CJK text.  If every attempt failed, UTF-8 with replacement is used; it
//! cannot fail, so [`resolve`] is total.

use std::fmt;

use encoding_rs::{GB18030, UTF_8, WINDOWS_1252};
use log::{debug, info};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TextEncoding {
    Utf8,
    Gb18030,
    Cp1252,
    Latin1,
}

impl TextEncoding {
    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8    => "utf-8",
            TextEncoding::Gb18030 => "gb18030",
            TextEncoding::Cp1252  => "cp1252",
            TextEncoding::Latin1  => "latin-1",
        }
    }
}

/// What happens to byte sequences the encoding cannot map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorPolicy {
    /// Any unmappable sequence fails the attempt.
    Strict,
    /// Unmappable sequences become U+FFFD.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DecodeAttempt {
    pub encoding: TextEncoding,
    pub policy:   ErrorPolicy,
}

impl DecodeAttempt {
    pub const fn new(encoding: TextEncoding, policy: ErrorPolicy) -> Self {
        Self { encoding, policy }
    }

    /// Decode `bytes`, or `None` if a strict attempt hits an unmappable
    /// sequence.  Replace attempts always succeed.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        use ErrorPolicy::*;
        use TextEncoding::*;

        match (self.encoding, self.policy) {
            (Utf8, Strict) => UTF_8
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|s| s.into_owned()),
            (Gb18030, Strict) => GB18030
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|s| s.into_owned()),
            (Utf8, Replace) => Some(UTF_8.decode_without_bom_handling(bytes).0.into_owned()),
            (Gb18030, Replace) => Some(GB18030.decode_without_bom_handling(bytes).0.into_owned()),
            (Cp1252, Strict) => {
                if bytes.iter().any(|&b| cp1252_undefined(b)) {
                    None
                } else {
                    Some(WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned())
                }
            }
            // Single-byte code page: the n-th char comes from the n-th byte.
            (Cp1252, Replace) => Some(
                WINDOWS_1252
                    .decode_without_bom_handling(bytes)
                    .0
                    .chars()
                    .zip(bytes)
                    .map(|(c, &b)| if cp1252_undefined(b) { '\u{FFFD}' } else { c })
                    .collect(),
            ),
            // Every byte is a code point; there is nothing to fail on.
            (Latin1, _) => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

/// encoding_rs follows WHATWG and maps these five bytes to C1 controls; the
/// code page itself leaves them undefined.
fn cp1252_undefined(byte: u8) -> bool {
    matches!(byte, 0x81 | 0x8D | 0x8F | 0x90 | 0x9D)
}

impl fmt::Display for DecodeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy = match self.policy {
            ErrorPolicy::Strict  => "strict",
            ErrorPolicy::Replace => "replace",
        };
        write!(f, "{}/{}", self.encoding.name(), policy)
    }
}

pub const RESOLUTION_ORDER: [DecodeAttempt; 6] = [
    DecodeAttempt::new(TextEncoding::Utf8,    ErrorPolicy::Strict),
    DecodeAttempt::new(TextEncoding::Gb18030, ErrorPolicy::Strict),
    DecodeAttempt::new(TextEncoding::Utf8,    ErrorPolicy::Replace),
    DecodeAttempt::new(TextEncoding::Gb18030, ErrorPolicy::Replace),
    DecodeAttempt::new(TextEncoding::Cp1252,  ErrorPolicy::Strict),
    DecodeAttempt::new(TextEncoding::Latin1,  ErrorPolicy::Strict),
];

/// Used when nothing in [`RESOLUTION_ORDER`] succeeds.
pub const FALLBACK: DecodeAttempt = DecodeAttempt::new(TextEncoding::Utf8, ErrorPolicy::Replace);

/// Decoded text together with the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedText {
    pub text:    String,
    pub attempt: DecodeAttempt,
}

/// Resolve `bytes` to text.  Always succeeds.
pub fn resolve(bytes: &[u8]) -> ResolvedText {
    for attempt in RESOLUTION_ORDER {
        match attempt.decode(bytes) {
            Some(text) => {
                info!("decoded {} bytes as {attempt}", bytes.len());
                return ResolvedText { text, attempt };
            }
            None => debug!("{attempt} rejected the text"),
        }
    }
    let text = String::from_utf8_lossy(bytes).into_owned();
    info!("decoded {} bytes with fallback {FALLBACK}", bytes.len());
    ResolvedText { text, attempt: FALLBACK }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_utf8_stays_strict_utf8() {
        let r = resolve("héllo 世界".as_bytes());
        assert_eq!(r.text, "héllo 世界");
        assert_eq!(r.attempt, RESOLUTION_ORDER[0]);
    }

    #[test]
    fn gb18030_text_is_recognised() {
        let (bytes, _, had_errors) = GB18030.encode("中文电子书");
        assert!(!had_errors);
        let r = resolve(&bytes);
        assert_eq!(r.text, "中文电子书");
        assert_eq!(r.attempt, DecodeAttempt::new(TextEncoding::Gb18030, ErrorPolicy::Strict));
    }

    #[test]
    fn broken_bytes_fall_to_lossy_utf8() {
        // 0xFF is invalid in both UTF-8 and GB18030.
        let r = resolve(&[b'o', b'k', 0x80, 0xFF]);
        assert_eq!(r.attempt, DecodeAttempt::new(TextEncoding::Utf8, ErrorPolicy::Replace));
        assert!(r.text.starts_with("ok"));
        assert!(r.text.contains('\u{FFFD}'));
    }

    #[test]
    fn empty_input_is_strict_utf8() {
        let r = resolve(&[]);
        assert_eq!(r.text, "");
        assert_eq!(r.attempt, RESOLUTION_ORDER[0]);
    }

    #[test]
    fn cp1252_strict_rejects_undefined_bytes() {
        let cp1252 = DecodeAttempt::new(TextEncoding::Cp1252, ErrorPolicy::Strict);
        assert_eq!(cp1252.decode(&[0x93, b'q', 0x94]).as_deref(), Some("\u{201C}q\u{201D}"));
        assert_eq!(cp1252.decode(&[b'a', 0x81]), None);

        let lossy = DecodeAttempt::new(TextEncoding::Cp1252, ErrorPolicy::Replace);
        assert_eq!(lossy.decode(&[b'a', 0x81, 0x80]).as_deref(), Some("a\u{FFFD}\u{20AC}"));
    }

    #[test]
    fn latin1_maps_every_byte() {
        let latin1 = DecodeAttempt::new(TextEncoding::Latin1, ErrorPolicy::Strict);
        let all: Vec<u8> = (0u8..=255).collect();
        let text = latin1.decode(&all).unwrap();
        assert_eq!(text.chars().count(), 256);
        assert_eq!(text.chars().nth(0xE9), Some('é'));
    }

    #[test]
    fn attempts_display() {
        assert_eq!(RESOLUTION_ORDER[3].to_string(), "gb18030/replace");
        assert_eq!(FALLBACK.to_string(), "utf-8/replace");
    }
}
