//! Container writer: text → PalmDOC / MOBI database.
//!
//! Produces the layout [`crate::container`] reads: the 78-byte header, one
//! slot per record, a 2-byte gap, record 0 (PalmDOC header, optionally a MOBI
//! header and the full title) and the text records.  Text is split into
//! `record_size` chunks and each chunk is compressed on its own.
//!
//! ```
//! use ebook2txt::writer::ContainerBuilder;
//! use ebook2txt::codec::CompressionKind;
//! use ebook2txt::container::Container;
//!
//! let bytes = ContainerBuilder::new("Sample")
//!     .compression(CompressionKind::PalmDoc)
//!     .build(b"<p>Hello, world!</p>")
//!     .unwrap();
//! let container = Container::parse(&bytes).unwrap();
//! assert_eq!(container.text_record_count(), 1);
//! ```

use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};
use chrono::{DateTime, Utc};

use crate::codec::{self, CompressionKind};
use crate::container::{HEADER_SIZE, MOBI_MAGIC, PALMDOC_HEADER_SIZE, RECORD_SLOT_SIZE};

pub const DEFAULT_RECORD_SIZE: u16 = 4096;
/// Length written into the MOBI header; long enough to carry extra flags.
pub const MOBI_HEADER_LENGTH: u32 = 0xE8;
const MOBI_FILE_VERSION: u32 = 6;
const MOBI_TYPE_BOOK: u32 = 2;
/// Padding between the record table and record 0.
const TABLE_GAP: usize = 2;

/// MOBI header fields the builder can set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobiOptions {
    /// 1252 or 65001.
    pub text_encoding: u32,
    pub extra_flags:   u16,
    pub full_name:     Option<String>,
}

impl Default for MobiOptions {
    fn default() -> Self {
        Self {
            text_encoding: 65001,
            extra_flags:   0,
            full_name:     None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    name:        String,
    compression: u16,
    record_size: u16,
    encryption:  u16,
    position:    u32,
    mobi:        Option<MobiOptions>,
    trailer:     Vec<u8>,
    timestamp:   u32,
}

impl ContainerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:        name.into(),
            compression: CompressionKind::PalmDoc.raw(),
            record_size: DEFAULT_RECORD_SIZE,
            encryption:  0,
            position:    0,
            mobi:        None,
            trailer:     Vec::new(),
            timestamp:   unix_seconds(Utc::now()),
        }
    }

    pub fn compression(mut self, kind: CompressionKind) -> Self {
        self.compression = kind.raw();
        self
    }

    /// Write an arbitrary compression value.  Records are only compressed
    /// when the value is PalmDOC; anything else stores them verbatim.
    pub fn raw_compression(mut self, raw: u16) -> Self {
        self.compression = raw;
        self
    }

    /// Uncompressed bytes per text record (minimum 1).
    pub fn record_size(mut self, size: u16) -> Self {
        self.record_size = size.max(1);
        self
    }

    /// DRM scheme for record 0.  Only written when a MOBI header is set.
    pub fn encryption(mut self, scheme: u16) -> Self {
        self.encryption = scheme;
        self
    }

    /// Reading position of a plain PalmDOC book.  Shares bytes 12..16 of
    /// record 0 with the MOBI encryption field, so it is dropped when a MOBI
    /// header is set.
    pub fn reading_position(mut self, offset: u32) -> Self {
        self.position = offset;
        self
    }

    pub fn mobi(mut self, options: MobiOptions) -> Self {
        self.mobi = Some(options);
        self
    }

    /// Bytes appended after every compressed text record (trailing entries).
    pub fn trailer(mut self, bytes: &[u8]) -> Self {
        self.trailer = bytes.to_vec();
        self
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = unix_seconds(at);
        self
    }

    pub fn build(&self, text: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(text, &mut out)?;
        Ok(out)
    }

    /// Fails with `InvalidInput` when the text needs more records than the
    /// 16-bit record counts can hold, or the file would outgrow the 32-bit
    /// record offsets.
    pub fn write<W: Write>(&self, text: &[u8], mut writer: W) -> io::Result<()> {
        let kind = CompressionKind::from_raw(self.compression);
        let text_length = u32::try_from(text.len())
            .map_err(|_| invalid_input(format!("text of {} bytes exceeds the 32-bit text length", text.len())))?;
        let text_records = text_record_count(text, self.record_size);
        // Record 0 shares the table with the text records.
        if text_records >= usize::from(u16::MAX) {
            return Err(invalid_input(format!(
                "{text_records} text records exceed the 16-bit record count; raise the record size"
            )));
        }
        let mut records = vec![self.record0(text_length, text_records as u16)];
        for chunk in text.chunks(self.record_size as usize) {
            let mut record = match kind {
                CompressionKind::PalmDoc => codec::palmdoc::compress(chunk),
                _                        => chunk.to_vec(),
            };
            record.extend_from_slice(&self.trailer);
            records.push(record);
        }

        // ── Header ───────────────────────────────────────────────────────────
        let mut name = [0u8; 32];
        let raw_name = self.name.as_bytes();
        let len = raw_name.len().min(31);
        name[..len].copy_from_slice(&raw_name[..len]);
        writer.write_all(&name)?;
        writer.write_u16::<BigEndian>(0)?; // attributes
        writer.write_u16::<BigEndian>(0)?; // version
        writer.write_u32::<BigEndian>(self.timestamp)?;
        writer.write_u32::<BigEndian>(self.timestamp)?;
        writer.write_all(&[0u8; 16])?;
        writer.write_all(if self.mobi.is_some() { b"BOOKMOBI" } else { b"TEXtREAd" })?;
        writer.write_all(&[0u8; 8])?;
        writer.write_u16::<BigEndian>(records.len() as u16)?;

        // ── Record table ─────────────────────────────────────────────────────
        let mut offset = HEADER_SIZE + records.len() * RECORD_SLOT_SIZE + TABLE_GAP;
        let mut table = Vec::with_capacity(records.len());
        for record in &records {
            let at = u32::try_from(offset)
                .map_err(|_| invalid_input(format!("record offset {offset} exceeds 32 bits")))?;
            table.push(at);
            offset += record.len();
        }
        for (i, at) in table.into_iter().enumerate() {
            writer.write_u32::<BigEndian>(at)?;
            writer.write_u8(0)?;
            writer.write_u24::<BigEndian>(2 * i as u32)?;
        }
        writer.write_all(&[0u8; TABLE_GAP])?;

        for record in &records {
            writer.write_all(record)?;
        }
        Ok(())
    }

    fn record0(&self, text_length: u32, record_count: u16) -> Vec<u8> {
        let mut r = Vec::with_capacity(PALMDOC_HEADER_SIZE + MOBI_HEADER_LENGTH as usize);
        r.extend_from_slice(&self.compression.to_be_bytes());
        r.extend_from_slice(&[0, 0]);
        r.extend_from_slice(&text_length.to_be_bytes());
        r.extend_from_slice(&record_count.to_be_bytes());
        r.extend_from_slice(&self.record_size.to_be_bytes());

        let Some(mobi) = &self.mobi else {
            r.extend_from_slice(&self.position.to_be_bytes());
            return r;
        };
        r.extend_from_slice(&self.encryption.to_be_bytes());
        r.extend_from_slice(&[0, 0]);
        r.resize(PALMDOC_HEADER_SIZE + MOBI_HEADER_LENGTH as usize, 0);
        r[16..20].copy_from_slice(MOBI_MAGIC);
        put_u32(&mut r, 20, MOBI_HEADER_LENGTH);
        put_u32(&mut r, 24, MOBI_TYPE_BOOK);
        put_u32(&mut r, 28, mobi.text_encoding);
        put_u32(&mut r, 36, MOBI_FILE_VERSION);
        r[0xF2..0xF4].copy_from_slice(&mobi.extra_flags.to_be_bytes());

        if let Some(title) = &mobi.full_name {
            let title_offset = r.len() as u32;
            put_u32(&mut r, 0x54, title_offset);
            put_u32(&mut r, 0x58, title.len() as u32);
            r.extend_from_slice(title.as_bytes());
            // Titles are padded to a 4-byte boundary.
            r.resize(r.len().next_multiple_of(4), 0);
        }
        r
    }
}

fn invalid_input(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

fn text_record_count(text: &[u8], record_size: u16) -> usize {
    text.len().div_ceil(record_size as usize)
}

fn unix_seconds(at: DateTime<Utc>) -> u32 {
    at.timestamp().clamp(0, i64::from(u32::MAX >> 1)) as u32
}
