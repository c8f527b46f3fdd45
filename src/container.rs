//! PalmDOC / MOBI database (PDB) container layout.
//!
//! # On-disk layout
//! ```text
//! offset  size  field
//!      0    32  database name (NUL-terminated)
//!     32     2  attributes
//!     34     2  version
//!     36     4  creation time
//!     40     4  modification time
//!     44    16  backup time, modification number, app/sort info ids
//!     60     4  type     ("BOOK", "TEXt")
//!     64     4  creator  ("MOBI", "REAd")
//!     68     8  unique id seed, next record list id
//!     76     2  record count
//!     78   8*n  record slots: offset (4) | attributes (1) | unique id (3)
//! ```
//!
//! Record 0 opens with the 16-byte PalmDOC header and, for Mobipocket books,
//! continues with a MOBI header.  Every integer is big-endian.  Every slice is
//! bounds-checked before it is read; a short file is reported as
//! [`ContainerError::Malformed`], never as a panic.

use std::io::{Cursor, Read};
use std::ops::Range;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

use crate::codec::CompressionKind;

/// Size of the fixed PDB header that precedes the record slots.
pub const HEADER_SIZE: usize = 78;
/// Size of one record-offset slot.
pub const RECORD_SLOT_SIZE: usize = 8;
/// Metadata window used when the offset table has a single entry.
pub const METADATA_FALLBACK_WINDOW: usize = 1024;
/// Bytes of the PalmDOC header the parser requires.
pub const PALMDOC_FIELDS_SIZE: usize = 12;
/// Full PalmDOC header size; a MOBI header starts right after it.
pub const PALMDOC_HEADER_SIZE: usize = 16;
pub const MOBI_MAGIC: &[u8; 4] = b"MOBI";

/// Seconds between 1904-01-01 (PalmOS epoch) and 1970-01-01.
const PALM_EPOCH_OFFSET: i64 = 2_082_844_800;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("malformed container: {0}")]
    Malformed(String),
    #[error("unsupported compression {0}: HUFF/CDIC dictionary compression is not supported")]
    UnsupportedCompression(u16),
}

fn malformed(msg: impl Into<String>) -> ContainerError {
    ContainerError::Malformed(msg.into())
}

fn be_u16_at(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2).map(BigEndian::read_u16)
}

fn be_u32_at(bytes: &[u8], at: usize) -> Option<u32> {
    bytes.get(at..at + 4).map(BigEndian::read_u32)
}

// ── ContainerHeader ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub name:         String,
    pub attributes:   u16,
    pub version:      u16,
    pub created:      u32,
    pub modified:     u32,
    pub type_code:    [u8; 4],
    pub creator:      [u8; 4],
    pub record_count: u16,
}

impl ContainerHeader {
    pub fn read(bytes: &[u8]) -> Result<Self, ContainerError> {
        let fixed = bytes.get(..HEADER_SIZE).ok_or_else(|| {
            malformed(format!(
                "file holds {} bytes, the PDB header needs {HEADER_SIZE}",
                bytes.len()
            ))
        })?;
        let truncated = |_: std::io::Error| malformed("truncated PDB header");
        let mut r = Cursor::new(fixed);

        let mut name = [0u8; 32];
        r.read_exact(&mut name).map_err(truncated)?;
        let attributes = r.read_u16::<BigEndian>().map_err(truncated)?;
        let version    = r.read_u16::<BigEndian>().map_err(truncated)?;
        let created    = r.read_u32::<BigEndian>().map_err(truncated)?;
        let modified   = r.read_u32::<BigEndian>().map_err(truncated)?;

        let mut type_code = [0u8; 4];
        let mut creator   = [0u8; 4];
        r.set_position(60);
        r.read_exact(&mut type_code).map_err(truncated)?;
        r.read_exact(&mut creator).map_err(truncated)?;
        r.set_position(76);
        let record_count = r.read_u16::<BigEndian>().map_err(truncated)?;

        let name_len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        Ok(Self {
            name: String::from_utf8_lossy(&name[..name_len]).into_owned(),
            attributes,
            version,
            created,
            modified,
            type_code,
            creator,
            record_count,
        })
    }

    /// Type and creator codes concatenated, e.g. `BOOKMOBI` or `TEXtREAd`.
    pub fn type_creator(&self) -> String {
        let mut s = String::from_utf8_lossy(&self.type_code).into_owned();
        s.push_str(&String::from_utf8_lossy(&self.creator));
        s
    }

    pub fn created_at(&self)  -> Option<DateTime<Utc>> { palm_timestamp(self.created) }
    pub fn modified_at(&self) -> Option<DateTime<Utc>> { palm_timestamp(self.modified) }
}

/// Interpret a PDB timestamp.  PalmOS counts from 1904; many desktop tools
/// write Unix time instead.  A set high bit means the 1904 epoch.
pub fn palm_timestamp(raw: u32) -> Option<DateTime<Utc>> {
    if raw == 0 {
        return None;
    }
    let secs = if raw & 0x8000_0000 != 0 {
        raw as i64 - PALM_EPOCH_OFFSET
    } else {
        raw as i64
    };
    DateTime::from_timestamp(secs, 0)
}

// ── RecordOffsetTable ────────────────────────────────────────────────────────

/// Record start offsets, one per 8-byte slot.  Non-decreasing, each within
/// the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOffsetTable {
    offsets:  Vec<u32>,
    file_len: usize,
}

impl RecordOffsetTable {
    pub fn read(bytes: &[u8], count: u16) -> Result<Self, ContainerError> {
        let count = count as usize;
        let table_end = HEADER_SIZE + count * RECORD_SLOT_SIZE;
        let table = bytes.get(HEADER_SIZE..table_end).ok_or_else(|| {
            malformed(format!(
                "record table declares {count} slots but the file ends at byte {}",
                bytes.len()
            ))
        })?;

        let offsets: Vec<u32> = table
            .chunks_exact(RECORD_SLOT_SIZE)
            .map(|slot| BigEndian::read_u32(&slot[..4]))
            .collect();

        if offsets.is_empty() {
            return Err(malformed("record table is empty"));
        }
        let file_len = bytes.len();
        let mut prev = 0u32;
        for (i, &off) in offsets.iter().enumerate() {
            if off as usize > file_len {
                return Err(malformed(format!(
                    "record {i} starts at {off}, past end of file ({file_len})"
                )));
            }
            if off < prev {
                return Err(malformed(format!(
                    "record {i} starts at {off}, before record {} ({prev})",
                    i - 1
                )));
            }
            prev = off;
        }
        Ok(Self { offsets, file_len })
    }

    pub fn len(&self) -> usize { self.offsets.len() }

    pub fn is_empty(&self) -> bool { self.offsets.is_empty() }

    pub fn get(&self, i: usize) -> Option<u32> { self.offsets.get(i).copied() }

    /// Byte range of record `i`: up to the next record, or to end of file
    /// for the last one.
    pub fn record_range(&self, i: usize) -> Option<Range<usize>> {
        let start = *self.offsets.get(i)? as usize;
        let end = self
            .offsets
            .get(i + 1)
            .map_or(self.file_len, |&next| next as usize);
        Some(start..end)
    }
}

// ── MobiHeader ───────────────────────────────────────────────────────────────

/// The subset of the MOBI header that matters for text extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MobiHeader {
    pub header_length: u32,
    pub mobi_type:     u32,
    /// 1252 (CP1252) or 65001 (UTF-8).
    pub text_encoding: u32,
    pub file_version:  u32,
    pub full_name:     Option<String>,
    /// Extra-record-data flags; 0 when the header is too old to carry them.
    pub extra_flags:   u16,
}

impl MobiHeader {
    /// Parse the MOBI header following the PalmDOC header in record 0.
    /// Returns `None` when there is no `MOBI` magic.
    pub fn parse(record0: &[u8]) -> Option<Self> {
        let magic = record0.get(PALMDOC_HEADER_SIZE..PALMDOC_HEADER_SIZE + 4)?;
        if magic != MOBI_MAGIC {
            return None;
        }
        let header_length = be_u32_at(record0, 20)?;
        let mobi_type     = be_u32_at(record0, 24)?;
        let text_encoding = be_u32_at(record0, 28)?;
        let file_version  = be_u32_at(record0, 36).unwrap_or(0);

        let full_name = match (be_u32_at(record0, 0x54), be_u32_at(record0, 0x58)) {
            (Some(off), Some(len)) if len > 0 => {
                let (off, len) = (off as usize, len as usize);
                record0
                    .get(off..off.saturating_add(len))
                    .map(|raw| decode_title(raw, text_encoding))
            }
            _ => None,
        };

        let extra_flags = if header_length >= 0xE4 && file_version >= 5 {
            be_u16_at(record0, 0xF2).unwrap_or(0)
        } else {
            0
        };

        Some(Self {
            header_length,
            mobi_type,
            text_encoding,
            file_version,
            full_name,
            extra_flags,
        })
    }
}

fn decode_title(raw: &[u8], text_encoding: u32) -> String {
    if text_encoding == 1252 {
        encoding_rs::WINDOWS_1252.decode_without_bom_handling(raw).0.into_owned()
    } else {
        String::from_utf8_lossy(raw).into_owned()
    }
}

/// Strip the trailing entries that MOBI writers append after the compressed
/// text of each record.
///
/// Every flag bit above bit 0 announces one entry whose size is stored as a
/// backward-read variable-width integer at the very end of the data.  Bit 0
/// announces multibyte overlap bytes, counted by the low two bits of the last
/// remaining byte, plus one.  Sizes that exceed the record clamp to empty.
pub fn strip_trailing_entries(record: &[u8], extra_flags: u16) -> &[u8] {
    let mut size = record.len();
    let mut flags = extra_flags >> 1;
    while flags != 0 {
        if flags & 1 != 0 {
            let entry = backward_varint(&record[..size]);
            size = size.saturating_sub(entry);
        }
        flags >>= 1;
    }
    if extra_flags & 1 != 0 && size > 0 {
        let multibyte = (record[size - 1] & 0x03) as usize + 1;
        size = size.saturating_sub(multibyte);
    }
    &record[..size]
}

/// Read a size stored backwards from the end of `data`: 7 bits per byte, the
/// byte with the high bit set ends the value (at most 4 bytes are consumed).
fn backward_varint(data: &[u8]) -> usize {
    let mut value = 0usize;
    let mut shift = 0;
    for &b in data.iter().rev() {
        value |= ((b & 0x7F) as usize) << shift;
        shift += 7;
        if b & 0x80 != 0 || shift >= 28 {
            break;
        }
    }
    value
}

// ── FormatMetadata ───────────────────────────────────────────────────────────

/// PalmDOC header of record 0, plus the MOBI header when one is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatMetadata {
    pub compression:  CompressionKind,
    pub text_length:  u32,
    pub record_count: u16,
    pub record_size:  u16,
    /// DRM scheme from a MOBI record 0; 0 when unencrypted.  Plain PalmDOC
    /// keeps its reading position in these bytes, so it always reads 0.
    pub encryption:   u16,
    pub mobi:         Option<MobiHeader>,
}

impl FormatMetadata {
    pub fn parse(window: &[u8]) -> Result<Self, ContainerError> {
        if window.len() < PALMDOC_FIELDS_SIZE {
            return Err(malformed(format!(
                "metadata record holds {} bytes, need {PALMDOC_FIELDS_SIZE}",
                window.len()
            )));
        }
        let raw_compression = BigEndian::read_u16(&window[0..2]);
        let compression = CompressionKind::from_raw(raw_compression);
        if compression == CompressionKind::HuffCdic {
            return Err(ContainerError::UnsupportedCompression(raw_compression));
        }
        let mobi = MobiHeader::parse(window);
        let encryption = match mobi {
            Some(_) => be_u16_at(window, 12).unwrap_or(0),
            None    => 0,
        };
        Ok(Self {
            compression,
            text_length:  BigEndian::read_u32(&window[4..8]),
            record_count: BigEndian::read_u16(&window[8..10]),
            record_size:  BigEndian::read_u16(&window[10..12]),
            encryption,
            mobi,
        })
    }

    /// Extra-record-data flags from the MOBI header, 0 for plain PalmDOC.
    pub fn extra_flags(&self) -> u16 {
        self.mobi.as_ref().map_or(0, |m| m.extra_flags)
    }
}

// ── Container ────────────────────────────────────────────────────────────────

/// A parsed container: header, offsets and record-0 metadata.  Record bytes
/// stay in the caller's buffer and are sliced on demand.
#[derive(Debug, Clone)]
pub struct Container {
    pub header:   ContainerHeader,
    pub offsets:  RecordOffsetTable,
    pub metadata: FormatMetadata,
}

impl Container {
    pub fn parse(bytes: &[u8]) -> Result<Self, ContainerError> {
        let header  = ContainerHeader::read(bytes)?;
        let offsets = RecordOffsetTable::read(bytes, header.record_count)?;

        // `RecordOffsetTable::read` guarantees a first entry within the file.
        let start = offsets.get(0).unwrap_or(0) as usize;
        let end = match offsets.get(1) {
            Some(next) => next as usize,
            None       => start.saturating_add(METADATA_FALLBACK_WINDOW).min(bytes.len()),
        };
        let window = bytes
            .get(start..end)
            .ok_or_else(|| malformed(format!("metadata window {start}..{end} is out of range")))?;
        let metadata = FormatMetadata::parse(window)?;

        debug!(
            "container '{}' ({}): {} records, compression {:?}, {} text records of {} bytes, {} text bytes",
            header.name,
            header.type_creator(),
            offsets.len(),
            metadata.compression,
            metadata.record_count,
            metadata.record_size,
            metadata.text_length,
        );
        if (metadata.record_count as usize) >= offsets.len() {
            warn!(
                "metadata declares {} text records but the table only has {} entries after record 0",
                metadata.record_count,
                offsets.len().saturating_sub(1),
            );
        }

        Ok(Self { header, offsets, metadata })
    }

    /// Number of text records that can actually be extracted.
    pub fn text_record_count(&self) -> usize {
        (self.metadata.record_count as usize).min(self.offsets.len().saturating_sub(1))
    }

    /// Byte ranges of the text records (records `1..=record_count`).
    pub fn text_records(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (1..=self.text_record_count()).filter_map(|i| self.offsets.record_range(i))
    }

    /// Flat report for display and JSON output.
    pub fn info(&self) -> ContainerInfo {
        ContainerInfo {
            name:         self.header.name.clone(),
            type_creator: self.header.type_creator(),
            created:      self.header.created_at().map(|d| d.to_rfc3339()),
            modified:     self.header.modified_at().map(|d| d.to_rfc3339()),
            records:      self.offsets.len(),
            text_records: self.text_record_count(),
            metadata:     self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub name:         String,
    pub type_creator: String,
    pub created:      Option<String>,
    pub modified:     Option<String>,
    pub records:      usize,
    pub text_records: usize,
    pub metadata:     FormatMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-assembled container: header, slots, then the given records.
    fn assemble(records: &[&[u8]]) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE];
        out[..4].copy_from_slice(b"test");
        out[60..68].copy_from_slice(b"TEXtREAd");
        out[76..78].copy_from_slice(&(records.len() as u16).to_be_bytes());
        let mut offset = HEADER_SIZE + records.len() * RECORD_SLOT_SIZE;
        for r in records {
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            out.extend_from_slice(&[0u8; 4]);
            offset += r.len();
        }
        for r in records {
            out.extend_from_slice(r);
        }
        out
    }

    fn palmdoc_header(compression: u16, text_len: u32, count: u16) -> Vec<u8> {
        let mut h = Vec::new();
        h.extend_from_slice(&compression.to_be_bytes());
        h.extend_from_slice(&[0, 0]);
        h.extend_from_slice(&text_len.to_be_bytes());
        h.extend_from_slice(&count.to_be_bytes());
        h.extend_from_slice(&4096u16.to_be_bytes());
        h.extend_from_slice(&[0u8; 4]);
        h
    }

    #[test]
    fn parses_header_and_records() {
        let rec0 = palmdoc_header(1, 5, 1);
        let bytes = assemble(&[&rec0, b"hello"]);
        let c = Container::parse(&bytes).unwrap();
        assert_eq!(c.header.name, "test");
        assert_eq!(c.header.type_creator(), "TEXtREAd");
        assert_eq!(c.header.record_count, 2);
        assert_eq!(c.metadata.compression, CompressionKind::None);
        assert_eq!(c.metadata.text_length, 5);
        assert_eq!(c.metadata.record_size, 4096);
        let ranges: Vec<_> = c.text_records().collect();
        assert_eq!(ranges.len(), 1);
        assert_eq!(&bytes[ranges[0].clone()], b"hello");
    }

    #[test]
    fn palmdoc_reading_position_is_not_encryption() {
        let mut rec0 = palmdoc_header(1, 5, 1);
        rec0[12..16].copy_from_slice(&70_000u32.to_be_bytes());
        let bytes = assemble(&[&rec0, b"hello"]);
        let c = Container::parse(&bytes).unwrap();
        assert!(c.metadata.mobi.is_none());
        assert_eq!(c.metadata.encryption, 0);
    }

    #[test]
    fn short_file_is_malformed() {
        let err = Container::parse(&[0u8; 40]).unwrap_err();
        assert!(matches!(err, ContainerError::Malformed(_)));
    }

    #[test]
    fn empty_table_is_malformed() {
        let bytes = assemble(&[]);
        assert!(matches!(Container::parse(&bytes), Err(ContainerError::Malformed(_))));
    }

    #[test]
    fn truncated_table_is_malformed() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[76..78].copy_from_slice(&10u16.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(Container::parse(&bytes), Err(ContainerError::Malformed(_))));
    }

    #[test]
    fn offset_past_eof_is_malformed() {
        let rec0 = palmdoc_header(1, 0, 0);
        let mut bytes = assemble(&[&rec0]);
        bytes[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(Container::parse(&bytes), Err(ContainerError::Malformed(_))));
    }

    #[test]
    fn short_metadata_window_is_malformed() {
        let bytes = assemble(&[b"tiny", b"text"]);
        assert!(matches!(Container::parse(&bytes), Err(ContainerError::Malformed(_))));
    }

    #[test]
    fn single_offset_uses_fallback_window() {
        let rec0 = palmdoc_header(2, 0, 3);
        let bytes = assemble(&[&rec0]);
        let c = Container::parse(&bytes).unwrap();
        assert_eq!(c.metadata.compression, CompressionKind::PalmDoc);
        assert_eq!(c.metadata.record_count, 3);
        assert_eq!(c.text_record_count(), 0);
    }

    #[test]
    fn dictionary_compression_is_rejected() {
        let rec0 = palmdoc_header(17480, 5, 1);
        let bytes = assemble(&[&rec0, b"hello"]);
        assert_eq!(
            Container::parse(&bytes).unwrap_err(),
            ContainerError::UnsupportedCompression(17480)
        );
    }

    #[test]
    fn record_count_is_bounded_by_table() {
        let rec0 = palmdoc_header(1, 10, 9);
        let bytes = assemble(&[&rec0, b"aaaaa", b"bbbbb"]);
        let c = Container::parse(&bytes).unwrap();
        assert_eq!(c.text_record_count(), 2);
    }

    #[test]
    fn parses_mobi_header() {
        let mut rec0 = palmdoc_header(2, 0, 0);
        rec0.resize(0x100, 0);
        rec0[16..20].copy_from_slice(MOBI_MAGIC);
        rec0[20..24].copy_from_slice(&0xE8u32.to_be_bytes());
        rec0[24..28].copy_from_slice(&2u32.to_be_bytes());
        rec0[28..32].copy_from_slice(&65001u32.to_be_bytes());
        rec0[36..40].copy_from_slice(&6u32.to_be_bytes());
        rec0[0x54..0x58].copy_from_slice(&0x100u32.to_be_bytes());
        rec0[0x58..0x5C].copy_from_slice(&5u32.to_be_bytes());
        rec0[0xF2..0xF4].copy_from_slice(&3u16.to_be_bytes());
        rec0.extend_from_slice(b"Title");

        let mobi = MobiHeader::parse(&rec0).unwrap();
        assert_eq!(mobi.text_encoding, 65001);
        assert_eq!(mobi.extra_flags, 3);
        assert_eq!(mobi.full_name.as_deref(), Some("Title"));
    }

    #[test]
    fn trailing_entries_are_stripped() {
        // One trailing entry of 3 bytes (size byte 0x83 included), then one
        // multibyte overlap byte counted by the last byte's low bits.
        let record = [b'a', b'b', b'c', 0xAA, 0x01, 0xFF, 0x83];
        assert_eq!(strip_trailing_entries(&record, 0b10), &record[..4]);

        let record = [b'a', b'b', 0x01];
        assert_eq!(strip_trailing_entries(&record, 0b01), b"a");
    }

    #[test]
    fn oversized_trailer_clamps_to_empty() {
        let record = [0xFFu8, 0xFF];
        assert!(strip_trailing_entries(&record, 0b110).is_empty());
        assert!(strip_trailing_entries(&[], 0xFFFF).is_empty());
    }

    #[test]
    fn palm_epoch_dates() {
        assert!(palm_timestamp(0).is_none());
        let unix = palm_timestamp(86_400).unwrap();
        assert_eq!(unix.to_rfc3339(), "1970-01-02T00:00:00+00:00");
        let palm = palm_timestamp(0x8000_0000).unwrap();
        assert_eq!(palm.timestamp(), 0x8000_0000i64 - PALM_EPOCH_OFFSET);
    }
}
