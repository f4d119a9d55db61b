//! Cross-reference table parser.
//!
//! Maps object numbers to byte offsets so objects can be fetched by random
//! access. Handles traditional `xref` tables, cross-reference streams
//! (PDF 1.5+), hybrid files (`/XRefStm`), and the `/Prev` revision chain
//! produced by incremental updates.

use crate::error::{Error, Result};
use crate::lexer::{parse_indirect_object, parse_object, skip_ws};
use crate::object::Object;
use std::collections::{HashMap, HashSet};

/// A single cross-reference entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// Object is free (deleted or never used)
    Free,
    /// Object stored directly in the file
    InFile {
        /// Byte offset of `N G obj`
        offset: u64,
        /// Generation number
        gen: u16,
    },
    /// Object stored inside an object stream (PDF 1.5+)
    InStream {
        /// Object number of the containing stream
        stream_id: u32,
        /// Index within the stream
        index: u32,
    },
}

/// Merged cross-reference information for a document.
///
/// Entries from newer revisions shadow older ones; the trailer is the one
/// from the newest revision, with `/Prev` chains already followed.
#[derive(Debug, Default)]
pub struct XrefTable {
    entries: HashMap<u32, XrefEntry>,
    trailer: HashMap<String, Object>,
    /// startxref offset of the newest revision
    start_offset: u64,
}

impl XrefTable {
    /// Look up the entry for an object number.
    pub fn get(&self, id: u32) -> Option<XrefEntry> {
        self.entries.get(&id).copied()
    }

    /// The trailer dictionary of the newest revision.
    pub fn trailer(&self) -> &HashMap<String, Object> {
        &self.trailer
    }

    /// `/Size` from the trailer: one past the highest object number.
    pub fn size(&self) -> u32 {
        self.trailer
            .get("Size")
            .and_then(|o| o.as_integer())
            .map(|s| s as u32)
            .unwrap_or_else(|| self.entries.keys().max().map(|m| m + 1).unwrap_or(1))
    }

    /// Byte offset recorded by the newest `startxref`.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Number of entries (all revisions merged).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries were parsed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse the complete cross-reference chain of a document.
pub fn parse_xref_chain(buf: &[u8]) -> Result<XrefTable> {
    let start = find_startxref(buf)?;
    let mut table = XrefTable {
        start_offset: start,
        ..Default::default()
    };

    let mut visited = HashSet::new();
    let mut next = Some(start);
    while let Some(offset) = next {
        if !visited.insert(offset) {
            return Err(Error::InvalidXref("cyclic /Prev chain".to_string()));
        }
        let trailer = parse_section(buf, offset, &mut table)?;

        // Hybrid-reference files: the classic trailer points at an extra
        // xref stream that must be merged at the same precedence level.
        if let Some(stm) = trailer.get("XRefStm").and_then(|o| o.as_integer()) {
            if visited.insert(stm as u64) {
                parse_section(buf, stm as u64, &mut table)?;
            }
        }

        if table.trailer.is_empty() {
            table.trailer = trailer.clone();
        }
        next = trailer.get("Prev").and_then(|o| o.as_integer()).map(|p| p as u64);
    }

    if table.entries.is_empty() {
        return Err(Error::InvalidXref("no cross-reference entries found".to_string()));
    }
    Ok(table)
}

/// Locate the offset following the last `startxref` keyword.
pub fn find_startxref(buf: &[u8]) -> Result<u64> {
    // Search a bounded tail window; startxref sits near EOF (ISO 32000-1 §7.5.5).
    let window_start = buf.len().saturating_sub(2048);
    let tail = &buf[window_start..];
    let pos = tail
        .windows(b"startxref".len())
        .rposition(|w| w == b"startxref")
        .ok_or_else(|| Error::InvalidXref("startxref keyword not found".to_string()))?;

    let after = skip_ws(&tail[pos + b"startxref".len()..]);
    let digits: Vec<u8> = after.iter().copied().take_while(|c| c.is_ascii_digit()).collect();
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| Error::InvalidXref("malformed startxref offset".to_string()))
}

/// Parse one xref section (classic table or xref stream) at `offset`,
/// merging entries into `table`. Returns that section's trailer dictionary.
fn parse_section(
    buf: &[u8],
    offset: u64,
    table: &mut XrefTable,
) -> Result<HashMap<String, Object>> {
    let input = buf
        .get(offset as usize..)
        .ok_or_else(|| Error::InvalidXref(format!("xref offset {} beyond EOF", offset)))?;

    if skip_ws(input).starts_with(b"xref") {
        parse_classic_section(buf, offset as usize, table)
    } else {
        parse_stream_section(buf, offset as usize, table)
    }
}

fn parse_classic_section(
    buf: &[u8],
    offset: usize,
    table: &mut XrefTable,
) -> Result<HashMap<String, Object>> {
    let mut input = skip_ws(&buf[offset..]);
    input = &input[b"xref".len()..];

    loop {
        input = skip_ws(input);
        if input.starts_with(b"trailer") {
            input = &input[b"trailer".len()..];
            let (_, obj) = parse_object(input).map_err(|_| {
                Error::InvalidXref("malformed trailer dictionary".to_string())
            })?;
            return match obj {
                Object::Dictionary(d) => Ok(d),
                _ => Err(Error::InvalidXref("trailer is not a dictionary".to_string())),
            };
        }

        // Subsection header: "start count"
        let (start, count, rest) = parse_subsection_header(input)?;
        input = rest;

        for i in 0..count {
            input = skip_ws(input);
            if input.len() < 18 {
                return Err(Error::InvalidXref("truncated xref entry".to_string()));
            }
            let entry = &input[..18];
            let offset_field = std::str::from_utf8(&entry[0..10])
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or_else(|| Error::InvalidXref("bad entry offset field".to_string()))?;
            let gen_field = std::str::from_utf8(&entry[11..16])
                .ok()
                .and_then(|s| s.trim().parse::<u16>().ok())
                .ok_or_else(|| Error::InvalidXref("bad entry generation field".to_string()))?;
            let kind = entry[17];

            let id = start + i;
            let parsed = match kind {
                b'n' => XrefEntry::InFile {
                    offset: offset_field,
                    gen: gen_field,
                },
                b'f' => XrefEntry::Free,
                other => {
                    return Err(Error::InvalidXref(format!("unknown entry type '{}'", other as char)));
                },
            };
            // Newer revisions were merged first; never overwrite.
            table.entries.entry(id).or_insert(parsed);
            input = &input[18..];
        }
    }
}

fn parse_subsection_header(input: &[u8]) -> Result<(u32, u32, &[u8])> {
    let line_end = input
        .iter()
        .position(|&c| c == b'\r' || c == b'\n')
        .unwrap_or(input.len());
    let line = std::str::from_utf8(&input[..line_end])
        .map_err(|_| Error::InvalidXref("non-ASCII subsection header".to_string()))?;
    let mut parts = line.split_whitespace();
    let start = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InvalidXref("missing subsection start".to_string()))?;
    let count = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InvalidXref("missing subsection count".to_string()))?;
    Ok((start, count, &input[line_end..]))
}

fn parse_stream_section(
    buf: &[u8],
    offset: usize,
    table: &mut XrefTable,
) -> Result<HashMap<String, Object>> {
    let (_, obj) = parse_indirect_object(buf, offset)?;
    let (dict, data) = match &obj {
        Object::Stream { dict, .. } => (dict.clone(), obj.decode_stream_data()?),
        _ => return Err(Error::InvalidXref("expected cross-reference stream".to_string())),
    };

    if dict.get("Type").and_then(|o| o.as_name()) != Some("XRef") {
        return Err(Error::InvalidXref("stream at startxref is not /Type /XRef".to_string()));
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|o| o.as_array())
        .map(|arr| arr.iter().filter_map(|o| o.as_integer()).map(|i| i as usize).collect())
        .ok_or_else(|| Error::InvalidXref("xref stream missing /W".to_string()))?;
    if widths.len() != 3 {
        return Err(Error::InvalidXref("/W must have three elements".to_string()));
    }
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(Error::InvalidXref("/W rows have zero width".to_string()));
    }

    let size = dict
        .get("Size")
        .and_then(|o| o.as_integer())
        .ok_or_else(|| Error::InvalidXref("xref stream missing /Size".to_string()))?;
    let index: Vec<i64> = dict
        .get("Index")
        .and_then(|o| o.as_array())
        .map(|arr| arr.iter().filter_map(|o| o.as_integer()).collect())
        .unwrap_or_else(|| vec![0, size]);

    let mut rows = data.chunks(row_len);
    for pair in index.chunks(2) {
        let (start, count) = (pair[0] as u32, *pair.get(1).unwrap_or(&0) as u32);
        for i in 0..count {
            let row = rows
                .next()
                .ok_or_else(|| Error::InvalidXref("xref stream shorter than /Index".to_string()))?;
            if row.len() < row_len {
                return Err(Error::InvalidXref("truncated xref stream row".to_string()));
            }
            let mut cursor = 0usize;
            let mut field = |w: usize| -> u64 {
                let v = row[cursor..cursor + w].iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
                cursor += w;
                v
            };
            // Field 1 defaults to type 1 when /W[0] is 0.
            let kind = if widths[0] == 0 { 1 } else { field(widths[0]) };
            let second = field(widths[1]);
            let third = field(widths[2]);

            let id = start + i;
            let parsed = match kind {
                0 => XrefEntry::Free,
                1 => XrefEntry::InFile {
                    offset: second,
                    gen: third as u16,
                },
                2 => XrefEntry::InStream {
                    stream_id: second as u32,
                    index: third as u32,
                },
                other => {
                    return Err(Error::InvalidXref(format!("unknown stream entry type {}", other)));
                },
            };
            table.entries.entry(id).or_insert(parsed);
        }
    }

    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSIC: &[u8] = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog >>\nendobj\n\
xref\n0 2\n0000000000 65535 f \n0000000009 00000 n \n\
trailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n45\n%%EOF\n";

    #[test]
    fn test_find_startxref() {
        assert_eq!(find_startxref(CLASSIC).unwrap(), 45);
    }

    #[test]
    fn test_classic_table() {
        let table = parse_xref_chain(CLASSIC).unwrap();
        assert_eq!(table.size(), 2);
        assert_eq!(table.get(0), Some(XrefEntry::Free));
        assert_eq!(table.get(1), Some(XrefEntry::InFile { offset: 9, gen: 0 }));
        assert_eq!(
            table.trailer().get("Root").and_then(|o| o.as_reference()).map(|r| r.id),
            Some(1)
        );
    }

    #[test]
    fn test_prev_chain_newest_wins() {
        // Revision 1 defines object 1 at offset 9; revision 2 overrides it.
        let mut buf = CLASSIC.to_vec();
        let rev2_obj_offset = buf.len();
        buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Version /1.7 >>\nendobj\n");
        let rev2_xref_offset = buf.len();
        buf.extend_from_slice(
            format!(
                "xref\n0 1\n0000000000 65535 f \n1 1\n{:010} 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R /Prev 45 >>\nstartxref\n{}\n%%EOF\n",
                rev2_obj_offset, rev2_xref_offset
            )
            .as_bytes(),
        );

        let table = parse_xref_chain(&buf).unwrap();
        assert_eq!(
            table.get(1),
            Some(XrefEntry::InFile {
                offset: rev2_obj_offset as u64,
                gen: 0
            })
        );
        // Trailer is the newest one (has /Prev).
        assert!(table.trailer().contains_key("Prev"));
    }

    #[test]
    fn test_missing_startxref() {
        assert!(find_startxref(b"not a pdf at all").is_err());
    }

    #[test]
    fn test_xref_stream_rows() {
        // Build an xref stream with W [1 2 1], two entries.
        let rows: Vec<u8> = vec![
            1, 0x00, 0x10, 0, // type 1, offset 16, gen 0
            2, 0x00, 0x05, 3, // type 2, stream 5, index 3
        ];
        use std::io::Write;
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&rows).unwrap();
        let compressed = enc.finish().unwrap();

        let mut buf = Vec::new();
        buf.extend_from_slice(b"%PDF-1.5\n");
        let stream_offset = buf.len();
        buf.extend_from_slice(
            format!(
                "9 0 obj\n<< /Type /XRef /Size 9 /Index [7 2] /W [1 2 1] /Filter /FlateDecode /Length {} /Root 1 0 R >>\nstream\n",
                compressed.len()
            )
            .as_bytes(),
        );
        buf.extend_from_slice(&compressed);
        buf.extend_from_slice(b"\nendstream\nendobj\n");
        buf.extend_from_slice(format!("startxref\n{}\n%%EOF\n", stream_offset).as_bytes());

        let table = parse_xref_chain(&buf).unwrap();
        assert_eq!(table.get(7), Some(XrefEntry::InFile { offset: 16, gen: 0 }));
        assert_eq!(
            table.get(8),
            Some(XrefEntry::InStream {
                stream_id: 5,
                index: 3
            })
        );
    }
}
