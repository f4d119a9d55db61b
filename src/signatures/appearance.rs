//! Signature widgets and appearance streams.
//!
//! Appearance content is consumed as an opaque content-stream blob: callers
//! render text/graphics however they like and hand over the bytes plus an
//! optional resource dictionary. This module wraps the blob into a Form
//! XObject, builds the widget annotation, and keeps the side table of extra
//! annotations that pre-sign hooks (initials, stamps) register per page.

use crate::document::PdfDocument;
use crate::error::Result;
use crate::geometry::Rect;
use crate::object::{Object, ObjectRef};
use crate::writer::IncrementalUpdate;
use std::collections::HashMap;

/// Visible signature appearance configuration.
#[derive(Debug, Clone, Default)]
pub struct SignatureAppearance {
    /// Page number (0-indexed)
    pub page: usize,
    /// Widget rectangle in page space (pre unit-scale)
    pub rect: Rect,
    /// Opaque content-stream bytes for the normal appearance
    pub content: Option<Vec<u8>>,
    /// Resource dictionary the content stream refers to
    pub resources: Option<Object>,
}

impl SignatureAppearance {
    /// Appearance at a position on a page, without visible content yet.
    pub fn on_page(page: usize, rect: Rect) -> Self {
        Self {
            page,
            rect,
            content: None,
            resources: None,
        }
    }

    /// Attach the rendered content stream.
    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }

    /// Attach the resource dictionary the content stream uses.
    pub fn with_resources(mut self, resources: Object) -> Self {
        self.resources = Some(resources);
        self
    }
}

/// Build the Form XObject for an appearance blob.
///
/// `compression` is the flate level from the document handle; level 0
/// stores the content stream uncompressed.
pub fn appearance_xobject(
    appearance: &SignatureAppearance,
    rect: &Rect,
    compression: u32,
) -> Object {
    let mut dict = HashMap::new();
    dict.insert("Type".to_string(), Object::Name("XObject".to_string()));
    dict.insert("Subtype".to_string(), Object::Name("Form".to_string()));
    dict.insert("FormType".to_string(), Object::Integer(1));
    dict.insert(
        "BBox".to_string(),
        Object::Array(vec![
            Object::Real(0.0),
            Object::Real(0.0),
            Object::Real(rect.width as f64),
            Object::Real(rect.height as f64),
        ]),
    );
    if let Some(resources) = &appearance.resources {
        dict.insert("Resources".to_string(), resources.clone());
    }

    let content = appearance.content.clone().unwrap_or_default();
    let data = if compression > 0 && !content.is_empty() {
        use std::io::Write;
        let mut encoder = flate2::write::ZlibEncoder::new(
            Vec::new(),
            flate2::Compression::new(compression.min(9)),
        );
        match encoder.write_all(&content).and_then(|_| encoder.finish()) {
            Ok(compressed) => {
                dict.insert("Filter".to_string(), Object::Name("FlateDecode".to_string()));
                compressed
            },
            Err(_) => content,
        }
    } else {
        content
    };
    Object::Stream {
        dict,
        data: bytes::Bytes::from(data),
    }
}

/// Build the signature widget annotation.
///
/// The widget doubles as the signature field (`/FT /Sig` merged in), which
/// is the layout every mainstream viewer produces.
pub fn widget_annotation(
    field_name: &str,
    rect: &Rect,
    sig_dict_ref: ObjectRef,
    page_ref: ObjectRef,
    appearance_ref: Option<ObjectRef>,
) -> Object {
    let mut dict = HashMap::new();
    dict.insert("Type".to_string(), Object::Name("Annot".to_string()));
    dict.insert("Subtype".to_string(), Object::Name("Widget".to_string()));
    dict.insert("FT".to_string(), Object::Name("Sig".to_string()));
    dict.insert("T".to_string(), Object::String(field_name.as_bytes().to_vec()));
    dict.insert("V".to_string(), Object::Reference(sig_dict_ref));
    dict.insert("P".to_string(), Object::Reference(page_ref));
    // Print flag; invisible signatures still carry it.
    dict.insert("F".to_string(), Object::Integer(4));
    let pdf_rect = rect.to_pdf_array();
    dict.insert(
        "Rect".to_string(),
        Object::Array(pdf_rect.iter().map(|&v| Object::Real(v as f64)).collect()),
    );
    if let Some(ap) = appearance_ref {
        let mut ap_dict = HashMap::new();
        ap_dict.insert("N".to_string(), Object::Reference(ap));
        dict.insert("AP".to_string(), Object::Dictionary(ap_dict));
    }
    Object::Dictionary(dict)
}

/// Side table of extra widget annotations registered by pre-sign hooks,
/// keyed by page object id. The page-update step merges these with the
/// signature widget so one page rewrite covers everything.
#[derive(Debug, Default)]
pub struct ExtraAnnotations {
    per_page: HashMap<u32, Vec<ObjectRef>>,
}

impl ExtraAnnotations {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an annotation for a page.
    pub fn add(&mut self, page: ObjectRef, annotation: ObjectRef) {
        self.per_page.entry(page.id).or_default().push(annotation);
    }

    /// Remove and return the annotations registered for a page.
    pub fn take(&mut self, page: ObjectRef) -> Vec<ObjectRef> {
        self.per_page.remove(&page.id).unwrap_or_default()
    }

    /// Pages that still have unmerged annotations.
    pub fn remaining_pages(&self) -> Vec<u32> {
        self.per_page.keys().copied().collect()
    }
}

/// Context handed to a plan's pre-sign hook.
///
/// The hook may append objects to the revision and register widget
/// annotations; it runs after form mutations and before the signature
/// dictionary is placed, so everything it writes is covered by the
/// signature's ByteRange.
pub struct PreSignContext<'a> {
    /// Read access to the document being signed
    pub doc: &'a PdfDocument,
    /// The revision being assembled
    pub update: &'a mut IncrementalUpdate,
    /// Widget side table consumed by the page-update step
    pub extra_annotations: &'a mut ExtraAnnotations,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appearance_xobject_bbox() {
        let appearance = SignatureAppearance::on_page(0, Rect::new(10.0, 10.0, 200.0, 50.0))
            .with_content(b"BT /F1 10 Tf (Signed) Tj ET".to_vec());
        let rect = appearance.rect;
        let obj = appearance_xobject(&appearance, &rect, 0);
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get("Subtype").unwrap().as_name(), Some("Form"));
        assert!(dict.get("Filter").is_none());
        let bbox = dict.get("BBox").unwrap().as_array().unwrap();
        assert_eq!(bbox[2].as_number(), Some(200.0));
        assert_eq!(bbox[3].as_number(), Some(50.0));
    }

    #[test]
    fn test_appearance_xobject_compressed() {
        let appearance = SignatureAppearance::on_page(0, Rect::new(0.0, 0.0, 10.0, 10.0))
            .with_content(b"q 1 0 0 1 0 0 cm Q".to_vec());
        let rect = appearance.rect;
        let obj = appearance_xobject(&appearance, &rect, 6);
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get("Filter").unwrap().as_name(), Some("FlateDecode"));
        assert_eq!(obj.decode_stream_data().unwrap(), b"q 1 0 0 1 0 0 cm Q");
    }

    #[test]
    fn test_widget_annotation_fields() {
        let widget = widget_annotation(
            "Signature1",
            &Rect::new(0.0, 0.0, 0.0, 0.0),
            ObjectRef::new(10, 0),
            ObjectRef::new(3, 0),
            None,
        );
        let dict = widget.as_dict().unwrap();
        assert_eq!(dict.get("FT").unwrap().as_name(), Some("Sig"));
        assert_eq!(dict.get("V").unwrap().as_reference(), Some(ObjectRef::new(10, 0)));
        assert_eq!(dict.get("P").unwrap().as_reference(), Some(ObjectRef::new(3, 0)));
        assert!(dict.get("AP").is_none());
    }

    #[test]
    fn test_extra_annotations_side_table() {
        let mut table = ExtraAnnotations::new();
        let page = ObjectRef::new(3, 0);
        table.add(page, ObjectRef::new(20, 0));
        table.add(page, ObjectRef::new(21, 0));
        assert_eq!(table.remaining_pages(), vec![3]);
        assert_eq!(table.take(page), vec![ObjectRef::new(20, 0), ObjectRef::new(21, 0)]);
        assert!(table.take(page).is_empty());
        assert!(table.remaining_pages().is_empty());
    }
}
