//! PDB reader: records → decompressed bytes → text → stripped text → file.

use std::fs;
use std::path::Path;

use log::{debug, warn};

use super::{BookFormat, Context, ConversionSummary, ConvertError};
use crate::codec::{self, CompressionKind, DecodeReport};
use crate::container::{strip_trailing_entries, Container, ContainerError};
use crate::encoding;
use crate::markup;

pub(super) fn convert(
    ctx:    &mut Context<'_>,
    input:  &Path,
    output: &Path,
) -> Result<ConversionSummary, ConvertError> {
    let bytes = fs::read(input)?;
    let container = Container::parse(&bytes)?;
    let metadata = &container.metadata;

    if metadata.encryption != 0 {
        return Err(ConvertError::Encrypted(metadata.encryption));
    }
    let kind = metadata.compression;
    if let CompressionKind::Unknown(raw) = kind {
        warn!("unknown compression {raw}; passing records through undecoded");
    }
    let extra_flags = if ctx.options.strip_trailing_entries {
        metadata.extra_flags()
    } else {
        0
    };

    let records: Vec<_> = container.text_records().collect();
    let total = records.len() + 1;
    // The declared length is untrusted; decoded text never exceeds 10x the file.
    let reserve    = (metadata.text_length as usize).min(bytes.len().saturating_mul(10));
    let mut text   = Vec::with_capacity(reserve);
    let mut report = DecodeReport::default();

    for (i, range) in records.into_iter().enumerate() {
        ctx.checkpoint()?;
        let n = i + 1;
        let record = bytes.get(range.clone()).ok_or_else(|| {
            ContainerError::Malformed(format!("record {n} at {range:?} is out of range"))
        })?;
        let record = strip_trailing_entries(record, extra_flags);

        let (data, r) = codec::decompress_with_report(record, kind);
        if r.zero_filled > 0 {
            warn!(
                "record {n}: {} byte(s) zero-filled by back-references before the start of the record",
                r.zero_filled
            );
        }
        if r.truncated_pair {
            warn!("record {n}: ends inside a back-reference pair");
        }
        debug!("record {n}: {} -> {} bytes", record.len(), data.len());
        report.merge(r);
        text.extend_from_slice(&data);

        ctx.unit_done(n, total, &format!("record {n}/{}", total - 1));
    }

    ctx.checkpoint()?;
    if metadata.text_length as usize != text.len() {
        debug!(
            "decoded {} text bytes, header declares {}",
            text.len(),
            metadata.text_length
        );
    }
    let resolved = encoding::resolve(&text);
    if resolved.text.trim().is_empty() {
        return Err(ConvertError::EmptyExtraction);
    }
    let plain = markup::strip_with(&resolved.text, ctx.capabilities.markup);
    fs::write(output, plain.as_bytes())?;
    ctx.unit_done(total, total, "writing text");

    Ok(ConversionSummary {
        format:        BookFormat::Pdb,
        units:         total,
        bytes_written: plain.len() as u64,
        encoding:      Some(resolved.attempt),
        zero_filled:   report.zero_filled,
        output:        output.to_path_buf(),
    })
}
