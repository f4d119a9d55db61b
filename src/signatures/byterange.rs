//! ByteRange planning and the placeholder-then-patch protocol.
//!
//! The signature dictionary is written with two fixed-width slots: a
//! `/ByteRange` array of four 10-digit zero-padded decimals, and a
//! `/Contents` hex string filled with `0` characters. After the revision is
//! finalized both slots are patched in place; no other byte moves between
//! placeholder emission and patching.
//!
//! `[a b c d]` means the digest input is `file[a..a+b] || file[c..c+d]`:
//! `a = 0`, `b` = offset of `<`, `c` = offset just past `>`, and
//! `a+b + slot + d` equals the total file size.

use crate::error::{Error, Result};

/// Width of each `/ByteRange` numeric field.
const RANGE_DIGITS: usize = 10;

/// The `/ByteRange` placeholder rendered into the signature dictionary.
pub fn byte_range_placeholder() -> String {
    let zeros = "0".repeat(RANGE_DIGITS);
    format!("/ByteRange [{0} {0} {0} {0}]", zeros)
}

/// The `/Contents` placeholder: `<` + `hex_len` zeros + `>`.
pub fn contents_placeholder(hex_len: usize) -> String {
    format!("<{}>", "0".repeat(hex_len))
}

/// Located slots of one signature dictionary within the output buffer.
///
/// Offsets are absolute file offsets, fixed once the dictionary's payload
/// has been appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureSlots {
    /// Offset of the first digit inside `/ByteRange [`
    pub byte_range_start: usize,
    /// Offset of the `<` opening the `/Contents` hex string
    pub contents_start: usize,
    /// Number of hex characters between `<` and `>`
    pub contents_hex_len: usize,
}

impl SignatureSlots {
    /// Locate both placeholders inside a rendered dictionary payload.
    ///
    /// `payload_offset` is the absolute offset the payload was appended at.
    pub fn locate(payload: &[u8], payload_offset: usize, hex_len: usize) -> Result<Self> {
        let range_pat = byte_range_placeholder();
        let range_rel = find(payload, range_pat.as_bytes())
            .ok_or_else(|| Error::InvalidPdf("ByteRange placeholder not found".to_string()))?;
        // First digit is after "/ByteRange ["
        let byte_range_start = payload_offset + range_rel + "/ByteRange [".len();

        let contents_rel = find(&payload[range_rel..], b"/Contents ")
            .map(|p| range_rel + p + "/Contents ".len())
            .ok_or_else(|| Error::InvalidPdf("/Contents not found after ByteRange".to_string()))?;
        if payload.get(contents_rel) != Some(&b'<') {
            return Err(Error::InvalidPdf("/Contents is not a hex string".to_string()));
        }
        // The closing delimiter must sit exactly where the width says.
        if payload.get(contents_rel + 1 + hex_len) != Some(&b'>') {
            return Err(Error::InvalidPdf("/Contents slot width mismatch".to_string()));
        }

        Ok(Self {
            byte_range_start,
            contents_start: payload_offset + contents_rel,
            contents_hex_len: hex_len,
        })
    }

    /// Offset one past the `>` closing the hex slot.
    pub fn contents_end(&self) -> usize {
        self.contents_start + self.contents_hex_len + 2
    }

    /// The final ByteRange for a file of `total_len` bytes.
    pub fn byte_range(&self, total_len: usize) -> [i64; 4] {
        let b = self.contents_start as i64;
        let c = self.contents_end() as i64;
        [0, b, c, total_len as i64 - c]
    }

    /// Overwrite the `/ByteRange` placeholder with real values, preserving
    /// the slot width exactly.
    pub fn patch_byte_range(&self, buf: &mut [u8], values: [i64; 4]) -> Result<()> {
        for value in values {
            if value < 0 {
                return Err(Error::InvalidPdf(format!("negative ByteRange value {}", value)));
            }
            if value >= 10i64.pow(RANGE_DIGITS as u32) {
                return Err(Error::InvalidPdf(format!(
                    "ByteRange value {} exceeds the {}-digit slot",
                    value, RANGE_DIGITS
                )));
            }
        }
        let rendered = format!(
            "{:010} {:010} {:010} {:010}",
            values[0], values[1], values[2], values[3]
        );
        let start = self.byte_range_start;
        let end = start + rendered.len();
        if end > buf.len() {
            return Err(Error::InvalidPdf("ByteRange slot beyond buffer".to_string()));
        }
        buf[start..end].copy_from_slice(rendered.as_bytes());
        Ok(())
    }

    /// Hex-encode `der` into the `/Contents` slot, zero-padding the rest.
    pub fn write_contents(&self, buf: &mut [u8], der: &[u8]) -> Result<()> {
        let capacity = self.contents_hex_len / 2;
        if der.len() > capacity {
            return Err(Error::SignatureTooLarge {
                actual: der.len(),
                capacity,
            });
        }
        let hex = hex::encode(der);
        let start = self.contents_start + 1;
        buf[start..start + hex.len()].copy_from_slice(hex.as_bytes());
        for slot in buf[start + hex.len()..start + self.contents_hex_len].iter_mut() {
            *slot = b'0';
        }
        Ok(())
    }
}

/// Extract the digest input `file[a..a+b] || file[c..c+d]`.
pub fn digest_input(data: &[u8], range: &[i64; 4]) -> Result<Vec<u8>> {
    let (a, b, c, d) = (range[0], range[1], range[2], range[3]);
    if a < 0 || b < 0 || c < 0 || d < 0 {
        return Err(Error::InvalidPdf("negative ByteRange component".to_string()));
    }
    let (a, b, c, d) = (a as usize, b as usize, c as usize, d as usize);
    if a + b > data.len() || c + d > data.len() {
        return Err(Error::InvalidPdf(format!(
            "ByteRange [{} {} {} {}] exceeds file size {}",
            a, b, c, d,
            data.len()
        )));
    }
    let mut out = Vec::with_capacity(b + d);
    out.extend_from_slice(&data[a..a + b]);
    out.extend_from_slice(&data[c..c + d]);
    Ok(out)
}

/// Validate a ByteRange read back from a document: starts at zero, the gap
/// holds exactly one hex string, and nothing past the end is claimed.
///
/// Returns `true` when the range extends to the end of the current file
/// (i.e. this signature covers the newest revision).
pub fn validate_byte_range(data: &[u8], range: &[i64; 4]) -> Result<bool> {
    let (a, b, c, d) = (range[0], range[1], range[2], range[3]);
    if a != 0 {
        return Err(Error::InvalidPdf(format!("ByteRange must start at 0, got {}", a)));
    }
    if b < 0 || d < 0 || c < b {
        return Err(Error::InvalidPdf("ByteRange is not monotonic".to_string()));
    }
    let end = (c + d) as usize;
    if end > data.len() {
        return Err(Error::InvalidPdf(format!(
            "ByteRange end {} beyond file size {}",
            end,
            data.len()
        )));
    }
    // The gap between the two ranges must be the /Contents hex string.
    let (gap_start, gap_end) = (b as usize, c as usize);
    if gap_end <= gap_start + 2
        || data[gap_start] != b'<'
        || data[gap_end - 1] != b'>'
        || !data[gap_start + 1..gap_end - 1]
            .iter()
            .all(|&ch| ch.is_ascii_hexdigit() || ch == b'\0')
    {
        return Err(Error::InvalidPdf(
            "ByteRange gap does not hold the /Contents hex slot".to_string(),
        ));
    }
    Ok(end == data.len())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
