//! Incremental-update writer.
//!
//! Appends new and overriding objects after the existing file bytes without
//! touching any prior byte, then emits a cross-reference section and a
//! trailer whose `/Prev` points at the previous revision (ISO 32000-1
//! §7.5.6). Byte offsets are final the moment an object is added; the
//! signature placeholder protocol depends on that.

use crate::object::{Object, ObjectRef};
use crate::writer::serializer::ObjectSerializer;
use std::collections::HashMap;

/// Builder for one incremental revision.
#[derive(Debug)]
pub struct IncrementalUpdate {
    /// Bytes of all prior revisions, copied verbatim into the output.
    base: Vec<u8>,
    /// Appended object bytes for this revision.
    appended: Vec<u8>,
    /// (object id, generation, absolute byte offset) per appended object.
    entries: Vec<(u32, u16, u64)>,
    next_id: u32,
    prev_xref: u64,
    serializer: ObjectSerializer,
}

impl IncrementalUpdate {
    /// Start a revision on top of `original`.
    ///
    /// `next_id` is the first free object number (the previous trailer's
    /// `/Size`); `prev_xref` is the byte offset of the previous
    /// cross-reference section.
    pub fn new(original: &[u8], next_id: u32, prev_xref: u64) -> Self {
        let mut appended = Vec::new();
        // Objects must start on a fresh line; add one only when the prior
        // revision does not already end with an EOL.
        if !original.ends_with(b"\n") && !original.ends_with(b"\r") {
            appended.push(b'\n');
        }
        Self {
            base: original.to_vec(),
            appended,
            entries: Vec::new(),
            next_id,
            prev_xref,
            serializer: ObjectSerializer::new(),
        }
    }

    /// Absolute offset the next appended byte will land at.
    pub fn current_offset(&self) -> u64 {
        (self.base.len() + self.appended.len()) as u64
    }

    /// Peek at the id the next [`IncrementalUpdate::add_object`] will assign.
    pub fn peek_next_id(&self) -> u32 {
        self.next_id
    }

    /// Append a new object, returning its freshly assigned reference.
    pub fn add_object(&mut self, obj: Object) -> ObjectRef {
        let r = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        self.append_at(r, &obj);
        r
    }

    /// Append a complete raw object payload (everything from `N G obj` to
    /// `endobj`), returning the assigned reference and the absolute offset
    /// of the payload's first byte.
    ///
    /// Used for placeholder-bearing payloads whose interior offsets the
    /// caller must track; the id to embed in the payload header is obtained
    /// from [`IncrementalUpdate::peek_next_id`] beforehand.
    pub fn add_object_raw(&mut self, payload: &[u8]) -> (ObjectRef, u64) {
        let r = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        let offset = self.current_offset();
        self.entries.push((r.id, r.gen, offset));
        self.appended.extend_from_slice(payload);
        if !self.appended.ends_with(b"\n") {
            self.appended.push(b'\n');
        }
        (r, offset)
    }

    /// Re-emit an existing object under its old id, shadowing the previous
    /// revision's definition.
    pub fn update_object(&mut self, r: ObjectRef, obj: Object) {
        self.append_at(r, &obj);
    }

    fn append_at(&mut self, r: ObjectRef, obj: &Object) {
        let offset = self.current_offset();
        self.entries.push((r.id, r.gen, offset));
        let bytes = self.serializer.serialize_indirect(r, obj);
        self.appended.extend_from_slice(&bytes);
    }

    /// Emit the cross-reference section and trailer, consuming the builder.
    ///
    /// `trailer_overrides` entries are merged over the generated `/Size` and
    /// `/Prev`; callers must at minimum supply `/Root`.
    pub fn finalize(mut self, trailer_overrides: HashMap<String, Object>) -> Vec<u8> {
        let xref_offset = self.current_offset();

        // Subsections of consecutive ids, entries sorted by object number.
        self.entries.sort_by_key(|(id, _, _)| *id);
        let mut xref = String::from("xref\n0 1\n0000000000 65535 f \n");
        let mut i = 0;
        while i < self.entries.len() {
            let run_start = i;
            while i + 1 < self.entries.len() && self.entries[i + 1].0 == self.entries[i].0 + 1 {
                i += 1;
            }
            i += 1;
            let (first_id, _, _) = self.entries[run_start];
            xref.push_str(&format!("{} {}\n", first_id, i - run_start));
            for (_, gen, offset) in &self.entries[run_start..i] {
                xref.push_str(&format!("{:010} {:05} n \n", offset, gen));
            }
        }

        let mut trailer: HashMap<String, Object> = HashMap::new();
        let size = self
            .entries
            .iter()
            .map(|(id, _, _)| id + 1)
            .max()
            .unwrap_or(0)
            .max(self.next_id);
        trailer.insert("Size".to_string(), Object::Integer(size as i64));
        trailer.insert("Prev".to_string(), Object::Integer(self.prev_xref as i64));
        trailer.extend(trailer_overrides);

        let mut out = self.base;
        out.extend_from_slice(&self.appended);
        out.extend_from_slice(xref.as_bytes());
        out.extend_from_slice(b"trailer\n");
        out.extend_from_slice(&self.serializer.serialize(&Object::Dictionary(trailer)));
        out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PdfDocument;
    use crate::object::Object;

    fn base_pdf() -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(b"%PDF-1.4\n");
        let o1 = buf.len();
        buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let o2 = buf.len();
        buf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
        let o3 = buf.len();
        buf.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n");
        let xref = buf.len();
        buf.extend_from_slice(
            format!(
                "xref\n0 4\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                o1, o2, o3, xref
            )
            .as_bytes(),
        );
        buf
    }

    #[test]
    fn test_byte_exact_append() {
        let original = base_pdf();
        let doc = PdfDocument::from_bytes(original.clone()).unwrap();

        let mut update =
            IncrementalUpdate::new(&original, doc.next_object_id(), doc.last_xref_offset());
        update.add_object(Object::Name("Extra".to_string()));

        let mut trailer = HashMap::new();
        trailer.insert("Root".to_string(), Object::Reference(doc.catalog_ref().unwrap()));
        let out = update.finalize(trailer);

        assert_eq!(&out[..original.len()], &original[..]);
        assert!(out.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_revision_is_readable() {
        let original = base_pdf();
        let doc = PdfDocument::from_bytes(original.clone()).unwrap();

        let mut update =
            IncrementalUpdate::new(&original, doc.next_object_id(), doc.last_xref_offset());
        let new_ref = update.add_object(Object::Integer(99));

        // Shadow the catalog with a new version.
        let mut catalog = doc.catalog().unwrap();
        catalog.insert("PageMode".to_string(), Object::Name("UseNone".to_string()));
        update.update_object(doc.catalog_ref().unwrap(), Object::Dictionary(catalog));

        let mut trailer = HashMap::new();
        trailer.insert("Root".to_string(), Object::Reference(doc.catalog_ref().unwrap()));
        let out = update.finalize(trailer);

        let reopened = PdfDocument::from_bytes(out).unwrap();
        assert_eq!(reopened.get_object(new_ref).unwrap().as_integer(), Some(99));
        let catalog = reopened.catalog().unwrap();
        assert_eq!(catalog.get("PageMode").and_then(|o| o.as_name()), Some("UseNone"));
        // Prior revision objects still resolve.
        assert_eq!(reopened.page_count().unwrap(), 1);
        assert!(reopened.trailer().contains_key("Prev"));
    }

    #[test]
    fn test_offsets_are_final() {
        let original = base_pdf();
        let mut update = IncrementalUpdate::new(&original, 4, 0);
        let before = update.current_offset();
        let (_, offset) = update.add_object_raw(b"4 0 obj\n<< /Kind /Raw >>\nendobj\n");
        assert_eq!(offset, before);
        // Adding more objects does not move earlier ones.
        update.add_object(Object::Null);
        assert_eq!(update.entries[0].2, before);
    }

    #[test]
    fn test_newline_inserted_only_when_needed() {
        let no_eol = b"%PDF-1.4".to_vec();
        let update = IncrementalUpdate::new(&no_eol, 1, 0);
        assert_eq!(update.current_offset(), no_eol.len() as u64 + 1);

        let with_eol = b"%PDF-1.4\n".to_vec();
        let update = IncrementalUpdate::new(&with_eol, 1, 0);
        assert_eq!(update.current_offset(), with_eol.len() as u64);
    }

    #[test]
    fn test_xref_subsections_for_non_consecutive_ids() {
        let original = base_pdf();
        let mut update = IncrementalUpdate::new(&original, 4, 123);
        update.add_object(Object::Null); // id 4
        update.update_object(ObjectRef::new(1, 0), Object::Null); // id 1
        let out = update.finalize(HashMap::new());
        let text = String::from_utf8_lossy(&out);
        // Two separate subsections: 1..1 and 4..4.
        assert!(text.contains("\n1 1\n"));
        assert!(text.contains("\n4 1\n"));
        assert!(text.contains("/Prev 123"));
    }
}
