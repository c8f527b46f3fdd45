//! PalmDOC byte-oriented LZ77.
//!
//! Each input byte is an opcode:
//!
//! ```text
//! 0x00        literal NUL
//! 0x01..0x08  copy the next N bytes verbatim
//! 0x09..0x7F  literal byte
//! 0x80..0xBF  back-reference; with the next byte forms a big-endian pair
//!             10dddddd dddddlll  distance = d (11 bits), length = l + 3
//! 0xC0..0xFF  space followed by (byte ^ 0x80)
//! ```
//!
//! Back-references copy one byte at a time, so a distance shorter than the
//! length repeats the tail of the output (run-length behaviour).

use super::DecodeReport;

/// Longest distance a back-reference can encode.
pub const MAX_DISTANCE: usize = 0x07FF;
pub const MIN_MATCH:    usize = 3;
pub const MAX_MATCH:    usize = 10;

/// Decode one PalmDOC record.
///
/// Never fails.  A back-reference reaching before the start of the output
/// emits 0x00 for each byte it cannot copy, and so does a distance of 0; a
/// pair cut off by the end of the record stops decoding.  Each repair is
/// recorded in the returned report.
pub fn decompress(data: &[u8]) -> (Vec<u8>, DecodeReport) {
    let mut out    = Vec::with_capacity(data.len() * 2);
    let mut report = DecodeReport::default();
    let mut i      = 0usize;

    while i < data.len() {
        let byte = data[i];
        i += 1;

        match byte {
            0x00 | 0x09..=0x7F => out.push(byte),
            0x01..=0x08 => {
                let count = (byte as usize).min(data.len() - i);
                out.extend_from_slice(&data[i..i + count]);
                i += count;
            }
            0xC0..=0xFF => {
                out.push(b' ');
                out.push(byte ^ 0x80);
            }
            0x80..=0xBF => {
                let Some(&next) = data.get(i) else {
                    report.truncated_pair = true;
                    break;
                };
                i += 1;

                let pair     = u16::from_be_bytes([byte, next]);
                let distance = ((pair >> 3) & 0x07FF) as usize;
                let length   = (pair & 0x0007) as usize + MIN_MATCH;

                for _ in 0..length {
                    if distance == 0 || distance > out.len() {
                        out.push(0);
                        report.zero_filled += 1;
                    } else {
                        let copied = out[out.len() - distance];
                        out.push(copied);
                    }
                }
            }
        }
    }
    (out, report)
}

/// Encode `data` as PalmDOC.  Greedy: at every position the longest match in
/// the previous 2047 bytes wins, then a space+character pair, then a literal.
/// Bytes that collide with opcodes (0x01..0x08, 0x80..0xFF) go out in
/// counted literal runs.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i   = 0usize;

    while i < data.len() {
        if let Some((distance, length)) = longest_match(data, i) {
            let pair = 0x8000 | ((distance as u16) << 3) | (length - MIN_MATCH) as u16;
            out.extend_from_slice(&pair.to_be_bytes());
            i += length;
            continue;
        }

        let byte = data[i];
        if byte == b' ' {
            if let Some(&next) = data.get(i + 1) {
                if (0x40..=0x7F).contains(&next) {
                    out.push(next ^ 0x80);
                    i += 2;
                    continue;
                }
            }
        }

        if needs_escape(byte) {
            let mut run = 1;
            while run < 8 && i + run < data.len() && needs_escape(data[i + run]) {
                run += 1;
            }
            out.push(run as u8);
            out.extend_from_slice(&data[i..i + run]);
            i += run;
        } else {
            out.push(byte);
            i += 1;
        }
    }
    out
}

fn needs_escape(byte: u8) -> bool {
    matches!(byte, 0x01..=0x08 | 0x80..=0xFF)
}

/// Longest match for `data[pos..]` starting in the window behind `pos`.
/// Matches may run past `pos`; the decoder reproduces them byte by byte.
fn longest_match(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    if pos + MIN_MATCH > data.len() {
        return None;
    }
    let window_start = pos.saturating_sub(MAX_DISTANCE);
    let limit = MAX_MATCH.min(data.len() - pos);
    let mut best = (0usize, 0usize);

    for start in (window_start..pos).rev() {
        let mut len = 0;
        while len < limit && data[start + len] == data[pos + len] {
            len += 1;
        }
        if len > best.1 {
            best = (pos - start, len);
            if len == limit {
                break;
            }
        }
    }
    (best.1 >= MIN_MATCH).then_some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_pass_through() {
        let text = b"Plain ASCII text\twith\ttabs.";
        let (out, report) = decompress(text);
        assert_eq!(out, text);
        assert!(report.is_clean());
    }

    #[test]
    fn nul_is_literal() {
        assert_eq!(decompress(&[0x00, b'a', 0x00]).0, vec![0x00, b'a', 0x00]);
    }

    #[test]
    fn counted_literal_run() {
        let data = [0x03, 0x80, 0xFF, 0x01, b'z'];
        assert_eq!(decompress(&data).0, vec![0x80, 0xFF, 0x01, b'z']);
    }

    #[test]
    fn literal_run_clamps_to_input() {
        let data = [0x08, b'a', b'b'];
        let (out, report) = decompress(&data);
        assert_eq!(out, b"ab");
        assert!(report.is_clean());
    }

    #[test]
    fn space_pair() {
        // 0xE8 ^ 0x80 = 0x68 'h'
        assert_eq!(decompress(&[b'a', 0xE8, b'i']).0, b"a hi");
    }

    #[test]
    fn overlapping_back_reference_repeats() {
        // distance 2, length 4
        let pair = 0x8000u16 | (2 << 3) | 1;
        let mut data = b"ab".to_vec();
        data.extend_from_slice(&pair.to_be_bytes());
        assert_eq!(decompress(&data).0, b"ababab");

        // distance 1, length 3 → run of the last byte
        assert_eq!(decompress(&[b'a', 0x80, 0x08]).0, b"aaaa");
    }

    #[test]
    fn out_of_range_back_reference_zero_fills() {
        // distance 3, length 3, no output yet
        let (out, report) = decompress(&[0x80, 0x18]);
        assert_eq!(out, vec![0, 0, 0]);
        assert_eq!(report.zero_filled, 3);

        // distance 0 never copies
        let (out, report) = decompress(&[b'x', 0x80, 0x00]);
        assert_eq!(out, vec![b'x', 0, 0, 0]);
        assert_eq!(report.zero_filled, 3);
    }

    #[test]
    fn dangling_pair_stops_decoding() {
        let (out, report) = decompress(&[b'o', b'k', 0x85]);
        assert_eq!(out, b"ok");
        assert!(report.truncated_pair);
        assert_eq!(report.zero_filled, 0);
    }

    #[test]
    fn compress_round_trips_text() {
        let text = "The quick brown fox jumps over the lazy dog. \
                    The quick brown fox jumps over the lazy dog again.\n\
                    <p>Markup with spaces and \u{00e9}\u{4e2d}\u{6587} multibyte text</p>"
            .as_bytes();
        let packed = compress(text);
        assert!(packed.len() < text.len());
        let (unpacked, report) = decompress(&packed);
        assert_eq!(unpacked, text);
        assert!(report.is_clean());
    }

    #[test]
    fn compress_uses_runs() {
        let data = vec![b'-'; 200];
        let packed = compress(&data);
        assert!(packed.len() < 60, "got {} bytes", packed.len());
        assert_eq!(decompress(&packed).0, data);
    }

    #[test]
    fn compress_escapes_opcode_bytes() {
        let data: Vec<u8> = (0u8..=255).collect();
        assert_eq!(decompress(&compress(&data)).0, data);
    }
}
