//! PDF document read layer.
//!
//! [`PdfDocument`] owns the raw bytes of a document and provides random
//! access to indirect objects via the cross-reference chain, plus the
//! structural lookups the signature engine needs: trailer, catalog, page
//! tree, AcroForm, and document metadata.
//!
//! This layer is read-only. All mutation happens through incremental
//! updates appended by [`crate::writer::incremental::IncrementalUpdate`].

use crate::error::{Error, Result};
use crate::lexer::parse_indirect_object;
use crate::object::{Object, ObjectRef};
use crate::xref::{parse_xref_chain, XrefEntry, XrefTable};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

/// An open PDF document.
pub struct PdfDocument {
    data: Vec<u8>,
    xref: XrefTable,
    /// Parsed-object cache; object streams make repeat lookups expensive.
    cache: RefCell<HashMap<u32, Object>>,
}

impl PdfDocument {
    /// Open a PDF from a file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Open a PDF from raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if !data.starts_with(b"%PDF-") {
            let head = String::from_utf8_lossy(&data[..data.len().min(8)]).to_string();
            return Err(Error::InvalidHeader(head));
        }
        let xref = parse_xref_chain(&data)?;
        if xref.trailer().contains_key("Encrypt") {
            return Err(Error::Unsupported("encrypted documents".to_string()));
        }
        Ok(Self {
            data,
            xref,
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// Raw document bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-length byte source (never valid as a PDF).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The trailer dictionary of the newest revision.
    pub fn trailer(&self) -> &HashMap<String, Object> {
        self.xref.trailer()
    }

    /// One past the highest allocated object number; the first id an
    /// incremental revision may allocate.
    pub fn next_object_id(&self) -> u32 {
        self.xref.size()
    }

    /// Byte offset of the newest cross-reference section, for `/Prev`.
    pub fn last_xref_offset(&self) -> u64 {
        self.xref.start_offset()
    }

    /// Fetch an indirect object by reference.
    pub fn get_object(&self, r: ObjectRef) -> Result<Object> {
        if let Some(cached) = self.cache.borrow().get(&r.id) {
            return Ok(cached.clone());
        }
        let obj = match self.xref.get(r.id) {
            Some(XrefEntry::InFile { offset, .. }) => {
                let (parsed_ref, obj) = parse_indirect_object(&self.data, offset as usize)?;
                if parsed_ref.id != r.id {
                    log::warn!(
                        "xref offset for object {} points at object {}",
                        r.id,
                        parsed_ref.id
                    );
                }
                obj
            },
            Some(XrefEntry::InStream { stream_id, index }) => {
                self.object_from_stream(stream_id, index)?
            },
            Some(XrefEntry::Free) | None => return Err(Error::ObjectNotFound(r.id, r.gen)),
        };
        self.cache.borrow_mut().insert(r.id, obj.clone());
        Ok(obj)
    }

    /// Resolve a possibly-indirect object to its value.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        match obj {
            Object::Reference(r) => self.get_object(*r),
            other => Ok(other.clone()),
        }
    }

    /// Resolve a dictionary entry to its value, following one reference.
    pub fn resolve_entry(
        &self,
        dict: &HashMap<String, Object>,
        key: &str,
    ) -> Result<Option<Object>> {
        match dict.get(key) {
            Some(obj) => Ok(Some(self.resolve(obj)?)),
            None => Ok(None),
        }
    }

    /// The document catalog (`/Root`).
    pub fn catalog(&self) -> Result<HashMap<String, Object>> {
        let root = self
            .trailer()
            .get("Root")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root reference".to_string()))?;
        let obj = self.get_object(root)?;
        obj.as_dict()
            .cloned()
            .ok_or_else(|| Error::InvalidPdf("/Root is not a dictionary".to_string()))
    }

    /// Object reference of the catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root reference".to_string()))
    }

    /// Number of pages in the document.
    pub fn page_count(&self) -> Result<usize> {
        let catalog = self.catalog()?;
        let pages = self
            .resolve_entry(&catalog, "Pages")?
            .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages".to_string()))?;
        pages
            .as_dict()
            .and_then(|d| d.get("Count"))
            .and_then(|o| o.as_integer())
            .map(|c| c as usize)
            .ok_or_else(|| Error::InvalidPdf("/Pages has no /Count".to_string()))
    }

    /// Object reference of page `index` (0-based), by page-tree walk.
    pub fn page_ref(&self, index: usize) -> Result<ObjectRef> {
        let catalog = self.catalog()?;
        let pages_ref = catalog
            .get("Pages")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages reference".to_string()))?;
        let mut remaining = index;
        self.find_page(pages_ref, &mut remaining, 0)?
            .ok_or_else(|| Error::InvalidPdf(format!("page index {} out of range", index)))
    }

    fn find_page(
        &self,
        node_ref: ObjectRef,
        remaining: &mut usize,
        depth: u32,
    ) -> Result<Option<ObjectRef>> {
        if depth > 64 {
            return Err(Error::InvalidPdf("page tree too deep".to_string()));
        }
        let node = self.get_object(node_ref)?;
        let dict = node
            .as_dict()
            .ok_or_else(|| Error::InvalidPdf("page tree node is not a dictionary".to_string()))?;

        match dict.get("Type").and_then(|o| o.as_name()) {
            Some("Page") => {
                if *remaining == 0 {
                    return Ok(Some(node_ref));
                }
                *remaining -= 1;
                Ok(None)
            },
            _ => {
                let kids = self
                    .resolve_entry(dict, "Kids")?
                    .and_then(|o| o.as_array().cloned())
                    .unwrap_or_default();
                for kid in kids {
                    if let Some(kid_ref) = kid.as_reference() {
                        if let Some(found) = self.find_page(kid_ref, remaining, depth + 1)? {
                            return Ok(Some(found));
                        }
                    }
                }
                Ok(None)
            },
        }
    }

    /// The interactive-form dictionary (`/AcroForm`), if present.
    pub fn acro_form(&self) -> Result<Option<HashMap<String, Object>>> {
        let catalog = self.catalog()?;
        match self.resolve_entry(&catalog, "AcroForm")? {
            Some(obj) => obj
                .as_dict()
                .cloned()
                .map(Some)
                .ok_or_else(|| Error::InvalidPdf("/AcroForm is not a dictionary".to_string())),
            None => Ok(None),
        }
    }

    /// Reference to the AcroForm dictionary when it is indirect.
    pub fn acro_form_ref(&self) -> Result<Option<ObjectRef>> {
        let catalog = self.catalog()?;
        Ok(catalog.get("AcroForm").and_then(|o| o.as_reference()))
    }

    /// Document metadata from the `/Info` dictionary plus page count.
    pub fn info(&self) -> Result<DocumentInfo> {
        let mut info = DocumentInfo {
            pages: self.page_count().unwrap_or(0),
            ..Default::default()
        };
        let dict = match self.trailer().get("Info").and_then(|o| o.as_reference()) {
            Some(r) => match self.get_object(r) {
                Ok(obj) => obj.as_dict().cloned().unwrap_or_default(),
                Err(_) => HashMap::new(),
            },
            None => HashMap::new(),
        };

        let text = |key: &str| -> Option<String> {
            dict.get(key).and_then(|o| o.as_string()).map(decode_pdf_text)
        };
        info.title = text("Title");
        info.author = text("Author");
        info.subject = text("Subject");
        info.creator = text("Creator");
        info.producer = text("Producer");
        info.creation_date = text("CreationDate").as_deref().and_then(parse_pdf_date);
        info.mod_date = text("ModDate").as_deref().and_then(parse_pdf_date);
        Ok(info)
    }

    /// Fetch an object stored in an object stream (`/Type /ObjStm`).
    fn object_from_stream(&self, stream_id: u32, index: u32) -> Result<Object> {
        let container = match self.xref.get(stream_id) {
            Some(XrefEntry::InFile { offset, .. }) => {
                parse_indirect_object(&self.data, offset as usize)?.1
            },
            _ => return Err(Error::ObjectNotFound(stream_id, 0)),
        };
        let dict = container
            .as_dict()
            .cloned()
            .ok_or_else(|| Error::InvalidPdf("object stream is not a stream".to_string()))?;
        let data = container.decode_stream_data()?;

        let n = dict
            .get("N")
            .and_then(|o| o.as_integer())
            .ok_or_else(|| Error::InvalidPdf("object stream missing /N".to_string()))?;
        let first = dict
            .get("First")
            .and_then(|o| o.as_integer())
            .ok_or_else(|| Error::InvalidPdf("object stream missing /First".to_string()))?
            as usize;
        if index as i64 >= n {
            return Err(Error::InvalidPdf("object stream index out of range".to_string()));
        }

        // Header: N pairs of "object-number byte-offset" before /First.
        let header = std::str::from_utf8(&data[..first.min(data.len())])
            .map_err(|_| Error::InvalidPdf("object stream header is not ASCII".to_string()))?;
        let numbers: Vec<usize> = header
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        let pair = numbers
            .chunks(2)
            .nth(index as usize)
            .ok_or_else(|| Error::InvalidPdf("object stream header too short".to_string()))?;
        let inner_offset = first + pair[1];

        let (_, obj) = crate::lexer::parse_object(&data[inner_offset..]).map_err(|_| {
            Error::ParseError {
                offset: inner_offset,
                reason: "malformed object inside object stream".to_string(),
            }
        })?;
        Ok(obj)
    }
}

/// Document-level metadata reported alongside verification results.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DocumentInfo {
    /// Document title
    pub title: Option<String>,
    /// Author
    pub author: Option<String>,
    /// Subject
    pub subject: Option<String>,
    /// Creating application
    pub creator: Option<String>,
    /// Producing library
    pub producer: Option<String>,
    /// Number of pages
    pub pages: usize,
    /// Creation date
    pub creation_date: Option<DateTime<Utc>>,
    /// Last modification date
    pub mod_date: Option<DateTime<Utc>>,
}

/// Decode a PDF text string: UTF-16BE when BOM-prefixed, else Latin-1.
pub fn decode_pdf_text(raw: &[u8]) -> String {
    if raw.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = raw[2..]
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|&b| b as char).collect()
    }
}

/// Parse a PDF date string `D:YYYYMMDDHHmmSS` with optional `Z` / `±HH'mm'`
/// timezone suffix. Returns UTC.
pub fn parse_pdf_date(text: &str) -> Option<DateTime<Utc>> {
    let s = text.strip_prefix("D:").unwrap_or(text);
    let digits = |range: std::ops::Range<usize>, default: u32| -> u32 {
        s.get(range).and_then(|t| t.parse().ok()).unwrap_or(default)
    };
    let year: i32 = s.get(0..4)?.parse().ok()?;
    let month = digits(4..6, 1);
    let day = digits(6..8, 1);
    let hour = digits(8..10, 0);
    let minute = digits(10..12, 0);
    let second = digits(12..14, 0);

    // Timezone suffix: Z, or +HH'mm' / -HH'mm'
    let mut offset_secs: i32 = 0;
    if let Some(tz) = s.get(14..) {
        let tz = tz.trim_end_matches('\'');
        if let Some(rest) = tz.strip_prefix('+').or_else(|| tz.strip_prefix('-')) {
            let sign = if tz.starts_with('-') { -1 } else { 1 };
            let parts: Vec<&str> = rest.split('\'').collect();
            let hh: i32 = parts.first().and_then(|p| p.parse().ok()).unwrap_or(0);
            let mm: i32 = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(0);
            offset_secs = sign * (hh * 3600 + mm * 60);
        }
    }

    let offset = FixedOffset::east_opt(offset_secs)?;
    offset
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format a time as a PDF date string (always UTC, `Z` suffix).
pub fn format_pdf_date(time: DateTime<Utc>) -> String {
    format!("D:{}Z", time.format("%Y%m%d%H%M%S"))
}
