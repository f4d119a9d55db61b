//! Document Security Store (PAdES-B-LT).
//!
//! The DSS is a catalog-level dictionary holding the certificates, OCSP
//! responses and CRLs a validator needs after the signing-time sources have
//! disappeared. Blobs are stored as streams; the arrays are merged with any
//! DSS a previous revision already wrote.

use crate::document::PdfDocument;
use crate::error::Result;
use crate::object::Object;
use crate::signatures::revocation::RevocationBundle;
use crate::writer::IncrementalUpdate;
use std::collections::HashMap;

/// Append DSS streams for `bundle` and return the updated `/DSS` value for
/// the catalog, merging any existing store.
pub fn build_dss(
    doc: &PdfDocument,
    update: &mut IncrementalUpdate,
    bundle: &RevocationBundle,
) -> Result<Object> {
    let mut certs = existing_refs(doc, "Certs")?;
    let mut ocsps = existing_refs(doc, "OCSPs")?;
    let mut crls = existing_refs(doc, "CRLs")?;

    for der_bytes in &bundle.certs {
        certs.push(Object::Reference(update.add_object(blob_stream(der_bytes))));
    }
    for der_bytes in &bundle.ocsps {
        ocsps.push(Object::Reference(update.add_object(blob_stream(der_bytes))));
    }
    for der_bytes in &bundle.crls {
        crls.push(Object::Reference(update.add_object(blob_stream(der_bytes))));
    }

    let mut dss = HashMap::new();
    if !certs.is_empty() {
        dss.insert("Certs".to_string(), Object::Array(certs));
    }
    if !ocsps.is_empty() {
        dss.insert("OCSPs".to_string(), Object::Array(ocsps));
    }
    if !crls.is_empty() {
        dss.insert("CRLs".to_string(), Object::Array(crls));
    }
    Ok(Object::Dictionary(dss))
}

fn blob_stream(der_bytes: &[u8]) -> Object {
    Object::Stream {
        dict: HashMap::new(),
        data: bytes::Bytes::copy_from_slice(der_bytes),
    }
}

fn existing_refs(doc: &PdfDocument, key: &str) -> Result<Vec<Object>> {
    let catalog = match doc.catalog() {
        Ok(catalog) => catalog,
        Err(_) => return Ok(Vec::new()),
    };
    let dss = match doc.resolve_entry(&catalog, "DSS")? {
        Some(obj) => obj,
        None => return Ok(Vec::new()),
    };
    let dict = match dss.as_dict() {
        Some(d) => d.clone(),
        None => return Ok(Vec::new()),
    };
    Ok(doc
        .resolve_entry(&dict, key)?
        .and_then(|o| o.as_array().cloned())
        .unwrap_or_default()
        .into_iter()
        .filter(|o| o.as_reference().is_some())
        .collect())
}

/// Evidence read back out of a document's DSS.
#[derive(Debug, Clone, Default)]
pub struct DssContents {
    /// Certificate DER blobs
    pub certs: Vec<Vec<u8>>,
    /// OCSP response DER blobs
    pub ocsps: Vec<Vec<u8>>,
    /// CRL DER blobs
    pub crls: Vec<Vec<u8>>,
}

impl DssContents {
    /// View as a revocation bundle for evidence evaluation.
    pub fn to_bundle(&self) -> RevocationBundle {
        RevocationBundle {
            ocsps: self.ocsps.clone(),
            crls: self.crls.clone(),
            certs: self.certs.clone(),
        }
    }
}

/// Read the document's DSS, tolerating absent or malformed pieces.
pub fn read_dss(doc: &PdfDocument) -> DssContents {
    let mut out = DssContents::default();
    let Ok(catalog) = doc.catalog() else {
        return out;
    };
    let Ok(Some(dss)) = doc.resolve_entry(&catalog, "DSS") else {
        return out;
    };
    let Some(dict) = dss.as_dict() else {
        return out;
    };

    let mut read_blobs = |key: &str, sink: &mut Vec<Vec<u8>>| {
        let Ok(Some(array)) = doc.resolve_entry(dict, key) else {
            return;
        };
        let Some(items) = array.as_array() else {
            return;
        };
        for item in items {
            let Ok(stream) = doc.resolve(item) else {
                continue;
            };
            match stream.decode_stream_data() {
                Ok(data) => sink.push(data),
                Err(e) => log::warn!("unreadable DSS stream under /{}: {}", key, e),
            }
        }
    };
    read_blobs("Certs", &mut out.certs);
    read_blobs("OCSPs", &mut out.ocsps);
    read_blobs("CRLs", &mut out.crls);
    out
}
