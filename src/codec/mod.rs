//! Record codecs: the compression kinds a PalmDOC header can declare.
//!
//! # Kinds
//!
//! | Raw value | Kind | Handling |
//! |-----------|------|----------|
//! | 1 | [`CompressionKind::None`] | stored verbatim |
//! | 2 | [`CompressionKind::PalmDoc`] | byte-oriented LZ77 ([`palmdoc`]) |
//! | 17480 (`"DH"`) | [`CompressionKind::HuffCdic`] | rejected by the container parser |
//! | anything else | [`CompressionKind::Unknown`] | passed through unchanged |
//!
//! Decompression is total: it never fails, whatever the input.  Repairs made
//! along the way are counted in a [`DecodeReport`] so callers can tell a
//! clean record from a patched one.

pub mod palmdoc;

use serde::Serialize;
use thiserror::Error;

pub const RAW_NONE:      u16 = 1;
pub const RAW_PALMDOC:   u16 = 2;
pub const RAW_HUFF_CDIC: u16 = 17480;

// ── CompressionKind ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompressionKind {
    None,
    PalmDoc,
    HuffCdic,
    Unknown(u16),
}

impl CompressionKind {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            RAW_NONE      => CompressionKind::None,
            RAW_PALMDOC   => CompressionKind::PalmDoc,
            RAW_HUFF_CDIC => CompressionKind::HuffCdic,
            other         => CompressionKind::Unknown(other),
        }
    }

    /// The value written to the PalmDOC header.
    pub fn raw(self) -> u16 {
        match self {
            CompressionKind::None       => RAW_NONE,
            CompressionKind::PalmDoc    => RAW_PALMDOC,
            CompressionKind::HuffCdic   => RAW_HUFF_CDIC,
            CompressionKind::Unknown(v) => v,
        }
    }

    /// Human-readable name (diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::None       => "none",
            CompressionKind::PalmDoc    => "palmdoc",
            CompressionKind::HuffCdic   => "huff/cdic",
            CompressionKind::Unknown(_) => "unknown",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none"    => Some(CompressionKind::None),
            "palmdoc" => Some(CompressionKind::PalmDoc),
            _         => None,
        }
    }
}

// ── DecodeReport ─────────────────────────────────────────────────────────────

/// Repairs applied while decoding one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeReport {
    /// Bytes emitted as 0x00 because a back-reference pointed before the
    /// start of the output.
    pub zero_filled:    usize,
    /// The record ended in the middle of a back-reference pair.
    pub truncated_pair: bool,
}

impl DecodeReport {
    pub fn is_clean(&self) -> bool {
        self.zero_filled == 0 && !self.truncated_pair
    }

    pub fn merge(&mut self, other: DecodeReport) {
        self.zero_filled += other.zero_filled;
        self.truncated_pair |= other.truncated_pair;
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No built-in codec for this kind.  Only raised when a codec is asked
    /// for explicitly; [`decompress`] passes such records through instead.
    #[error("no codec available for compression {} ({})", .0.raw(), .0.name())]
    Unavailable(CompressionKind),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn kind(&self) -> CompressionKind;
    fn compress(&self, data: &[u8]) -> Vec<u8>;
    fn decompress(&self, data: &[u8]) -> (Vec<u8>, DecodeReport);
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::None }
    fn compress(&self, data: &[u8]) -> Vec<u8> { data.to_vec() }
    fn decompress(&self, data: &[u8]) -> (Vec<u8>, DecodeReport) {
        (data.to_vec(), DecodeReport::default())
    }
}

pub struct PalmDocCodec;
impl Codec for PalmDocCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::PalmDoc }
    fn compress(&self, data: &[u8]) -> Vec<u8> { palmdoc::compress(data) }
    fn decompress(&self, data: &[u8]) -> (Vec<u8>, DecodeReport) { palmdoc::decompress(data) }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a compression kind to a built-in codec.
pub fn get_codec(kind: CompressionKind) -> Result<Box<dyn Codec>, CodecError> {
    match kind {
        CompressionKind::None    => Ok(Box::new(NoneCodec)),
        CompressionKind::PalmDoc => Ok(Box::new(PalmDocCodec)),
        other                    => Err(CodecError::Unavailable(other)),
    }
}

/// Decompress one record.  Kinds without a codec pass through unchanged.
pub fn decompress(record: &[u8], kind: CompressionKind) -> Vec<u8> {
    decompress_with_report(record, kind).0
}

/// Like [`decompress`], also returning the repairs that were applied.
pub fn decompress_with_report(record: &[u8], kind: CompressionKind) -> (Vec<u8>, DecodeReport) {
    match get_codec(kind) {
        Ok(codec) => codec.decompress(record),
        Err(_)    => (record.to_vec(), DecodeReport::default()),
    }
}
