//! AcroForm field access and staged value mutations.
//!
//! Fields are addressed by fully qualified name: the `/T` entries along the
//! path from `/AcroForm /Fields` down through `/Kids`, joined with dots
//! (ISO 32000-1 §12.7.3.2). Mutations are expressed as updated field
//! objects emitted into the incremental revision by the signing
//! orchestrator; this module never writes bytes itself.

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef};
use std::collections::HashMap;

/// A value staged for a form field's `/V` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Text string, written as a literal string
    Text(String),
    /// Checkbox state, written as `/Yes` or `/Off`
    Boolean(bool),
    /// Numeric value, written verbatim
    Number(f64),
}

impl FieldValue {
    /// The PDF object written into `/V`.
    pub fn to_object(&self) -> Object {
        match self {
            FieldValue::Text(s) => Object::String(s.as_bytes().to_vec()),
            FieldValue::Boolean(true) => Object::Name("Yes".to_string()),
            FieldValue::Boolean(false) => Object::Name("Off".to_string()),
            FieldValue::Number(n) => {
                if *n == n.trunc() {
                    Object::Integer(*n as i64)
                } else {
                    Object::Real(*n)
                }
            },
        }
    }
}

/// A field discovered by walking the AcroForm tree.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Fully qualified, dot-joined name
    pub name: String,
    /// Reference to the field dictionary
    pub reference: ObjectRef,
    /// The field dictionary
    pub dict: HashMap<String, Object>,
}

impl FieldInfo {
    /// The field type (`/FT`), inherited entries not considered.
    pub fn field_type(&self) -> Option<&str> {
        self.dict.get("FT").and_then(|o| o.as_name())
    }
}

/// Walk every terminal field in the AcroForm tree, depth-first,
/// in `/Fields` order.
pub fn walk_fields(doc: &PdfDocument) -> Result<Vec<FieldInfo>> {
    let mut out = Vec::new();
    let form = match doc.acro_form()? {
        Some(form) => form,
        None => return Ok(out),
    };
    let roots = doc
        .resolve_entry(&form, "Fields")?
        .and_then(|o| o.as_array().cloned())
        .unwrap_or_default();
    for root in roots {
        if let Some(r) = root.as_reference() {
            collect_fields(doc, r, None, &mut out, 0)?;
        }
    }
    Ok(out)
}

fn collect_fields(
    doc: &PdfDocument,
    field_ref: ObjectRef,
    prefix: Option<&str>,
    out: &mut Vec<FieldInfo>,
    depth: u32,
) -> Result<()> {
    if depth > 64 {
        return Err(Error::InvalidPdf("AcroForm field tree too deep".to_string()));
    }
    let obj = doc.get_object(field_ref)?;
    let dict = match obj.as_dict() {
        Some(d) => d.clone(),
        None => return Ok(()),
    };

    let partial = dict
        .get("T")
        .and_then(|o| o.as_string())
        .map(crate::document::decode_pdf_text);
    let name = match (prefix, partial.as_deref()) {
        (Some(p), Some(t)) => format!("{}.{}", p, t),
        (Some(p), None) => p.to_string(),
        (None, Some(t)) => t.to_string(),
        (None, None) => String::new(),
    };

    // A node with /Kids that are themselves fields is a non-terminal;
    // widget-only kids (no /T) make the node terminal.
    let kids = doc
        .resolve_entry(&dict, "Kids")?
        .and_then(|o| o.as_array().cloned())
        .unwrap_or_default();
    let has_field_kids = kids.iter().any(|kid| {
        kid.as_reference()
            .and_then(|r| doc.get_object(r).ok())
            .and_then(|o| o.as_dict().map(|d| d.contains_key("T")))
            .unwrap_or(false)
    });

    if has_field_kids {
        for kid in kids {
            if let Some(kid_ref) = kid.as_reference() {
                collect_fields(doc, kid_ref, Some(&name), out, depth + 1)?;
            }
        }
    } else {
        out.push(FieldInfo {
            name,
            reference: field_ref,
            dict,
        });
    }
    Ok(())
}

/// Find a terminal field by fully qualified name.
pub fn find_field(doc: &PdfDocument, name: &str) -> Result<FieldInfo> {
    walk_fields(doc)?
        .into_iter()
        .find(|f| f.name == name)
        .ok_or_else(|| Error::FieldNotFound(name.to_string()))
}

/// Build the updated field object for a staged mutation: the original
/// dictionary with `/V` replaced and any cached appearance dropped so
/// viewers regenerate it.
pub fn updated_field_object(field: &FieldInfo, value: &FieldValue) -> Object {
    let mut dict = field.dict.clone();
    dict.insert("V".to_string(), value.to_object());
    dict.remove("AP");
    // Checkbox widgets mirror the value in /AS.
    if let FieldValue::Boolean(_) = value {
        dict.insert("AS".to_string(), value.to_object());
    }
    Object::Dictionary(dict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PdfDocument;

    fn form_pdf() -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(b"%PDF-1.4\n");
        let mut offsets = Vec::new();
        let objects = [
            "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /AcroForm 4 0 R >>\nendobj\n",
            "2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n",
            "3 0 obj\n<< /Type /Page /Parent 2 0 R /Annots [5 0 R 6 0 R] >>\nendobj\n",
            "4 0 obj\n<< /Fields [5 0 R 7 0 R] >>\nendobj\n",
            "5 0 obj\n<< /FT /Tx /T (Given Name Text Box) /V (initial) >>\nendobj\n",
            "6 0 obj\n<< /FT /Btn /T (Agree) >>\nendobj\n",
            "7 0 obj\n<< /T (Address) /Kids [8 0 R] >>\nendobj\n",
            "8 0 obj\n<< /FT /Tx /T (City) >>\nendobj\n",
        ];
        for obj in objects {
            offsets.push(buf.len());
            buf.extend_from_slice(obj.as_bytes());
        }
        let xref_offset = buf.len();
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for off in &offsets {
            xref.push_str(&format!("{:010} 00000 n \n", off));
        }
        buf.extend_from_slice(xref.as_bytes());
        buf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_offset
            )
            .as_bytes(),
        );
        buf
    }

    #[test]
    fn test_walk_fields_with_hierarchy() {
        let doc = PdfDocument::from_bytes(form_pdf()).unwrap();
        let fields = walk_fields(&doc).unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Given Name Text Box", "Address.City"]);
    }

    #[test]
    fn test_find_field_dotted() {
        let doc = PdfDocument::from_bytes(form_pdf()).unwrap();
        let field = find_field(&doc, "Address.City").unwrap();
        assert_eq!(field.reference, ObjectRef::new(8, 0));
        assert_eq!(field.field_type(), Some("Tx"));
    }

    #[test]
    fn test_find_field_missing() {
        let doc = PdfDocument::from_bytes(form_pdf()).unwrap();
        assert!(matches!(
            find_field(&doc, "Nope"),
            Err(Error::FieldNotFound(_))
        ));
    }

    #[test]
    fn test_value_mapping() {
        assert_eq!(
            FieldValue::Text("X".to_string()).to_object(),
            Object::String(b"X".to_vec())
        );
        assert_eq!(
            FieldValue::Boolean(true).to_object(),
            Object::Name("Yes".to_string())
        );
        assert_eq!(
            FieldValue::Boolean(false).to_object(),
            Object::Name("Off".to_string())
        );
        assert_eq!(FieldValue::Number(3.0).to_object(), Object::Integer(3));
        assert_eq!(FieldValue::Number(2.5).to_object(), Object::Real(2.5));
    }

    #[test]
    fn test_updated_field_object() {
        let doc = PdfDocument::from_bytes(form_pdf()).unwrap();
        let field = find_field(&doc, "Given Name Text Box").unwrap();
        let updated = updated_field_object(&field, &FieldValue::Text("X".to_string()));
        let dict = updated.as_dict().unwrap();
        assert_eq!(dict.get("V").unwrap().as_string(), Some(&b"X"[..]));
        assert_eq!(dict.get("T").unwrap().as_string(), Some(&b"Given Name Text Box"[..]));
    }
}
