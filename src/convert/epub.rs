//! EPUB reader: spine documents → stripped text, one chapter per unit.
//!
//! Container parsing belongs to the `epub` crate; this module only walks the
//! spine and feeds every document through the markup stripper.

use std::path::Path;

use super::{Context, ConversionSummary, ConvertError};

#[cfg(feature = "epub")]
pub(super) fn convert(
    ctx:    &mut Context<'_>,
    input:  &Path,
    output: &Path,
) -> Result<ConversionSummary, ConvertError> {
    use std::fs::File;
    use std::io::{BufWriter, Write};

    use ::epub::doc::EpubDoc;
    use log::{debug, warn};

    use super::BookFormat;
    use crate::markup;

    let mut doc = EpubDoc::new(input)
        .map_err(|e| ConvertError::ProcessingFailure(format!("failed to open EPUB: {e}")))?;
    let total = doc.spine.len();
    debug!("{}: {total} spine documents", input.display());
    if total == 0 {
        return Err(ConvertError::EmptyExtraction);
    }

    let mut out = BufWriter::new(File::create(output)?);
    let separator = ctx.options.chapter_separator.clone();
    let mut written = 0u64;
    let mut units   = 0usize;

    for i in 0..total {
        ctx.checkpoint()?;
        let n = i + 1;
        match doc.get_current_str() {
            Some((content, _mime)) => {
                let text = markup::strip_with(&content, ctx.capabilities.markup);
                out.write_all(text.as_bytes())?;
                written += text.len() as u64;
            }
            None => warn!("chapter {n}/{total}: spine entry has no readable resource"),
        }
        out.write_all(separator.as_bytes())?;
        written += separator.len() as u64;
        units = n;
        ctx.unit_done(n, total, &format!("chapter {n}/{total}"));

        if n < total && !doc.go_next() {
            warn!("spine ended after {n} of {total} documents");
            break;
        }
    }
    out.flush()?;

    Ok(ConversionSummary {
        format:        BookFormat::Epub,
        units,
        bytes_written: written,
        encoding:      None,
        zero_filled:   0,
        output:        output.to_path_buf(),
    })
}

#[cfg(not(feature = "epub"))]
pub(super) fn convert(
    _ctx:    &mut Context<'_>,
    _input:  &Path,
    _output: &Path,
) -> Result<ConversionSummary, ConvertError> {
    Err(ConvertError::MissingCapability("epub"))
}
