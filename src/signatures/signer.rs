//! Signing orchestrator.
//!
//! Executes staged [`SignaturePlan`]s in registration order, each as one
//! incremental revision: profile gates, staged form-field mutations, the
//! pre-sign hook, widget + AcroForm + DocMDP wiring, the placeholder
//! signature dictionary, ByteRange patching, digest, CMS assembly and the
//! final in-place `/Contents` write. A fatal error at any step discards the
//! partial revision; the caller's bytes are never half-written.

use crate::document::{format_pdf_date, PdfDocument};
use crate::error::{Error, Result};
use crate::forms::{self, FieldValue};
use crate::object::{Object, ObjectRef};
use crate::signatures::appearance::{self, ExtraAnnotations, PreSignContext};
use crate::signatures::byterange::{self, SignatureSlots};
use crate::signatures::chain::{self, CertificatePool};
use crate::signatures::cms::{self, CmsOptions};
use crate::signatures::dss;
use crate::signatures::revocation::{self, RevocationBundle};
use crate::signatures::timestamp;
use crate::signatures::types::{
    NetworkConfig, SignaturePlan, SignatureRecord, SignatureType,
};
use crate::writer::{IncrementalUpdate, ObjectSerializer};
use chrono::Utc;
use der::Decode;
use std::collections::HashMap;
use std::fmt::Write as _;
use x509_cert::Certificate;

/// Execute staged plans against `original`, producing the signed bytes and
/// one record per signature.
///
/// `field_values` are applied inside the first plan's revision so the
/// mutations are covered by that signature.
pub fn execute_plans(
    original: Vec<u8>,
    plans: Vec<SignaturePlan>,
    mut field_values: Vec<(String, FieldValue)>,
    unit: f32,
    compression: u32,
    network: &NetworkConfig,
) -> Result<(Vec<u8>, Vec<SignatureRecord>)> {
    let mut bytes = original;
    let mut records = Vec::new();

    for plan in plans {
        validate_plan(&plan)?;
        let doc = PdfDocument::from_bytes(bytes.clone())?;
        let existing = existing_signature_count(&doc)?;
        if plan.signature_type == SignatureType::Certification && existing > 0 {
            return Err(Error::CertificationNotFirst);
        }
        let staged_fields = std::mem::take(&mut field_values);
        let (signed, record) =
            sign_one(&doc, &bytes, plan, staged_fields, existing, unit, compression, network)?;
        bytes = signed;
        records.push(record);
    }
    Ok((bytes, records))
}

/// Count signature fields that already carry a value.
pub fn existing_signature_count(doc: &PdfDocument) -> Result<usize> {
    Ok(forms::walk_fields(doc)?
        .iter()
        .filter(|f| f.field_type() == Some("Sig") && f.dict.contains_key("V"))
        .count())
}

/// Profile and completeness gates, checked before any document bytes move.
fn validate_plan(plan: &SignaturePlan) -> Result<()> {
    if !plan.profile.is_supported() {
        return Err(Error::UnsupportedProfile(plan.profile.name().to_string()));
    }
    if plan.profile.requires_timestamp() && !plan.has_timestamp_authority() {
        return Err(Error::TimestampRequired(plan.profile.name().to_string()));
    }
    match plan.signature_type {
        SignatureType::DocumentTimestamp => {
            if !plan.has_timestamp_authority() {
                return Err(Error::TimestampRequired("DocumentTimestamp".to_string()));
            }
        },
        _ => {
            if plan.certificate_der.is_none() {
                return Err(Error::Signing("plan has no signer certificate".to_string()));
            }
            if plan.keypair.is_none() {
                return Err(Error::Signing("plan has no signing capability".to_string()));
            }
        },
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn sign_one(
    doc: &PdfDocument,
    original: &[u8],
    mut plan: SignaturePlan,
    field_values: Vec<(String, FieldValue)>,
    existing_signatures: usize,
    unit: f32,
    compression: u32,
    network: &NetworkConfig,
) -> Result<(Vec<u8>, SignatureRecord)> {
    let signer_cert = match &plan.certificate_der {
        Some(cert_der) => Some(
            Certificate::from_der(cert_der)
                .map_err(|e| Error::Certificate(format!("unreadable signer certificate: {}", e)))?,
        ),
        None => None,
    };

    // --- Revocation evidence (needed before bytes are laid out: the DSS
    //     and the signed attribute both live inside this revision) ---------
    let (rev_bundle, chain_der_for_dss) = match &signer_cert {
        Some(cert) if plan.revocation.embed_ocsp || plan.revocation.embed_crl => {
            let mut pool = CertificatePool::new();
            for der_bytes in &plan.chain_der {
                pool.add_der(der_bytes)?;
            }
            let resolved =
                chain::resolve_chain(cert, plan.certificate_der.as_deref().unwrap_or(&[]), &pool);
            let pairs = revocation::chain_pairs(&resolved.chain);
            let (bundle, warnings) = revocation::collect(&pairs, &plan.revocation, network);
            for warning in &warnings {
                log::warn!("{}", warning);
            }
            if plan.profile.requires_revocation_evidence() {
                let missing = revocation::missing_evidence(&pairs, &bundle);
                if !missing.is_empty() {
                    return Err(Error::RevocationUnavailable {
                        subject: missing.join(", "),
                        reason: warnings.join("; "),
                    });
                }
            }
            let chain_ders: Vec<Vec<u8>> =
                resolved.chain.iter().map(|(_, d)| d.clone()).collect();
            (bundle, chain_ders)
        },
        _ => (RevocationBundle::default(), Vec::new()),
    };

    let mut update =
        IncrementalUpdate::new(original, doc.next_object_id(), doc.last_xref_offset());

    // --- Step 2: staged form-field mutations -------------------------------
    let mut fields_mutated = false;
    for (name, value) in &field_values {
        let field = forms::find_field(doc, name)?;
        update.update_object(field.reference, forms::updated_field_object(&field, value));
        fields_mutated = true;
    }

    // --- Step 3: pre-sign hook ---------------------------------------------
    let mut extra_annotations = ExtraAnnotations::new();
    if let Some(hook) = plan.before_sign.take() {
        let mut ctx = PreSignContext {
            doc,
            update: &mut update,
            extra_annotations: &mut extra_annotations,
        };
        hook(&mut ctx)?;
    }

    // --- Step 4: appearance + widget ---------------------------------------
    let page_index = plan.appearance.as_ref().map(|a| a.page).unwrap_or(0);
    let page_ref = doc.page_ref(page_index)?;
    let rect = plan
        .appearance
        .as_ref()
        .map(|a| a.rect.scaled(unit))
        .unwrap_or_default();
    let appearance_ref = plan
        .appearance
        .as_ref()
        .filter(|a| a.content.is_some())
        .map(|a| update.add_object(appearance::appearance_xobject(a, &rect, compression)));

    let field_name = plan
        .field_name
        .clone()
        .unwrap_or_else(|| format!("Signature{}", existing_signatures + 1));
    let signed_at = Utc::now();

    // --- Step 5: signature dictionary with reserved slots -------------------
    let signer_name = plan
        .name
        .clone()
        .or_else(|| signer_cert.as_ref().and_then(chain::subject_common_name));
    let sig_id = update.peek_next_id();
    let payload = render_signature_dictionary(sig_id, &plan, signer_name.as_deref(), signed_at);
    let (sig_ref, payload_offset) = update.add_object_raw(payload.as_bytes());
    let slots =
        SignatureSlots::locate(payload.as_bytes(), payload_offset as usize, plan.contents_capacity * 2)?;

    let widget_ref = update.add_object(appearance::widget_annotation(
        &field_name,
        &rect,
        sig_ref,
        page_ref,
        appearance_ref,
    ));

    // --- Page update: merge the signature widget with hook annotations -----
    let mut page_dict = doc
        .get_object(page_ref)?
        .as_dict()
        .cloned()
        .ok_or_else(|| Error::InvalidPdf("page is not a dictionary".to_string()))?;
    let mut annots = doc
        .resolve_entry(&page_dict, "Annots")?
        .and_then(|o| o.as_array().cloned())
        .unwrap_or_default();
    annots.push(Object::Reference(widget_ref));
    for extra in extra_annotations.take(page_ref) {
        annots.push(Object::Reference(extra));
    }
    page_dict.insert("Annots".to_string(), Object::Array(annots));
    update.update_object(page_ref, Object::Dictionary(page_dict));

    // Hook annotations for other pages get their own page rewrites.
    for page_id in extra_annotations.remaining_pages() {
        let other_ref = ObjectRef::new(page_id, 0);
        let mut other = doc
            .get_object(other_ref)?
            .as_dict()
            .cloned()
            .ok_or_else(|| Error::InvalidPdf("annotated page is not a dictionary".to_string()))?;
        let mut annots = doc
            .resolve_entry(&other, "Annots")?
            .and_then(|o| o.as_array().cloned())
            .unwrap_or_default();
        for extra in extra_annotations.take(other_ref) {
            annots.push(Object::Reference(extra));
        }
        other.insert("Annots".to_string(), Object::Array(annots));
        update.update_object(other_ref, Object::Dictionary(other));
    }

    // --- AcroForm + catalog -------------------------------------------------
    let catalog_ref = doc.catalog_ref()?;
    let mut catalog = doc.catalog()?;

    let mut form = doc.acro_form()?.unwrap_or_default();
    let mut fields = doc
        .resolve_entry(&form, "Fields")?
        .and_then(|o| o.as_array().cloned())
        .unwrap_or_default();
    fields.push(Object::Reference(widget_ref));
    form.insert("Fields".to_string(), Object::Array(fields));
    let sig_flags = form.get("SigFlags").and_then(|o| o.as_integer()).unwrap_or(0);
    // SignaturesExist | AppendOnly
    form.insert("SigFlags".to_string(), Object::Integer(sig_flags | 3));
    if fields_mutated {
        form.insert("NeedAppearances".to_string(), Object::Boolean(true));
    }
    match doc.acro_form_ref()? {
        Some(form_ref) => update.update_object(form_ref, Object::Dictionary(form)),
        None => {
            let form_ref = update.add_object(Object::Dictionary(form));
            catalog.insert("AcroForm".to_string(), Object::Reference(form_ref));
        },
    }

    if plan.signature_type == SignatureType::Certification {
        let mut perms = doc
            .resolve_entry(&catalog, "Perms")?
            .and_then(|o| o.as_dict().cloned())
            .unwrap_or_default();
        perms.insert("DocMDP".to_string(), Object::Reference(sig_ref));
        catalog.insert("Perms".to_string(), Object::Dictionary(perms));
    }

    if plan.profile.requires_revocation_evidence() {
        let mut dss_bundle = rev_bundle.clone();
        dss_bundle.certs = chain_der_for_dss;
        let dss_value = dss::build_dss(doc, &mut update, &dss_bundle)?;
        catalog.insert("DSS".to_string(), dss_value);
    }

    update.update_object(catalog_ref, Object::Dictionary(catalog));

    // --- Step 6: finalize the revision; offsets are now frozen -------------
    let mut trailer = HashMap::new();
    trailer.insert("Root".to_string(), Object::Reference(catalog_ref));
    if let Some(info) = doc.trailer().get("Info") {
        trailer.insert("Info".to_string(), info.clone());
    }
    let mut out = update.finalize(trailer);

    // --- Step 7: ByteRange patch, digest, CMS, /Contents injection ---------
    let range = slots.byte_range(out.len());
    slots.patch_byte_range(&mut out, range)?;
    let digest_input = byterange::digest_input(&out, &range)?;
    let digest = plan.digest_algorithm.digest(&digest_input);
    log::debug!(
        "signature '{}' covers {} bytes, digest {}",
        field_name,
        digest_input.len(),
        hex::encode(&digest)
    );

    let http_authority = plan
        .tsa
        .as_ref()
        .map(|tsa| timestamp::HttpTimestampAuthority::new(tsa.clone(), network.clone()));
    let authority: Option<&dyn timestamp::TimestampAuthority> = plan
        .timestamp_authority
        .as_deref()
        .or(http_authority.as_ref().map(|a| a as &dyn timestamp::TimestampAuthority));

    let contents_der = match plan.signature_type {
        SignatureType::DocumentTimestamp => {
            let authority = authority
                .ok_or_else(|| Error::TimestampRequired("DocumentTimestamp".to_string()))?;
            authority.timestamp(&digest, plan.digest_algorithm)?
        },
        _ => {
            let keypair = plan
                .keypair
                .as_ref()
                .ok_or_else(|| Error::Signing("plan has no signing capability".to_string()))?;
            let provider =
                authority.map(|a| timestamp::token_provider(a, plan.digest_algorithm));
            let provider_ref: Option<&dyn Fn(&[u8]) -> Result<Vec<u8>>> = match &provider {
                Some(p) => Some(p),
                None => None,
            };
            let opts = CmsOptions {
                digest,
                digest_algorithm: plan.digest_algorithm,
                keypair: keypair.as_ref(),
                certificate_der: plan.certificate_der.as_deref().unwrap_or(&[]),
                chain_der: &plan.chain_der,
                // /M and signing-time come from the same instant; the
                // attribute is omitted when a TSA supplies trusted time.
                signing_time: (!plan.has_timestamp_authority()).then_some(signed_at),
                revocation: (!rev_bundle.is_empty()).then_some(&rev_bundle),
                timestamp_provider: provider_ref,
            };
            cms::assemble_signature(&opts)?
        },
    };
    slots.write_contents(&mut out, &contents_der)?;

    let record = SignatureRecord {
        field_name,
        signature_type: plan.signature_type.name().to_string(),
        sub_filter: plan.sub_filter.as_pdf_name().to_string(),
        signed_at,
        byte_range: range,
        cms_size: contents_der.len(),
    };
    Ok((out, record))
}

/// Render the raw signature-dictionary payload with both fixed-width slots.
fn render_signature_dictionary(
    id: u32,
    plan: &SignaturePlan,
    signer_name: Option<&str>,
    signed_at: chrono::DateTime<Utc>,
) -> String {
    let serializer = ObjectSerializer::new();
    let literal = |value: &str| {
        String::from_utf8_lossy(&serializer.serialize(&Object::String(value.as_bytes().to_vec())))
            .into_owned()
    };

    let type_name = match plan.signature_type {
        SignatureType::DocumentTimestamp => "DocTimeStamp",
        _ => "Sig",
    };
    let mut out = String::new();
    let _ = write!(out, "{} 0 obj\n<< /Type /{}", id, type_name);
    let _ = write!(out, " /Filter /Adobe.PPKLite /SubFilter /{}", plan.sub_filter.as_pdf_name());
    let _ = write!(out, " {}", byterange::byte_range_placeholder());
    let _ = write!(
        out,
        " /Contents {}",
        byterange::contents_placeholder(plan.contents_capacity * 2)
    );
    if plan.signature_type != SignatureType::DocumentTimestamp {
        if let Some(name) = signer_name {
            let _ = write!(out, " /Name {}", literal(name));
        }
        if let Some(reason) = &plan.reason {
            let _ = write!(out, " /Reason {}", literal(reason));
        }
        if let Some(location) = &plan.location {
            let _ = write!(out, " /Location {}", literal(location));
        }
        if let Some(contact) = &plan.contact_info {
            let _ = write!(out, " /ContactInfo {}", literal(contact));
        }
        let _ = write!(out, " /M ({})", format_pdf_date(signed_at));
    }
    if plan.signature_type == SignatureType::Certification {
        let _ = write!(
            out,
            " /Reference [<< /Type /SigRef /TransformMethod /DocMDP /TransformParams << /Type /TransformParams /P {} /V /1.2 >> >>]",
            plan.mdp_permission.as_p_value()
        );
    }
    out.push_str(" >>\nendobj\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::keys::InMemorySigner;
    use crate::signatures::types::{MdpPermission, SignatureProfile, TsaConfig};
    use std::sync::Arc;

    fn dummy_plan() -> SignaturePlan {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        SignaturePlan::new(Arc::new(InMemorySigner::from_rsa(key)), vec![0x30, 0x00])
    }

    #[test]
    fn test_unsupported_profiles_are_gated() {
        for profile in [SignatureProfile::PadesBLta, SignatureProfile::C2pa, SignatureProfile::JadesBT] {
            let plan = dummy_plan().with_profile(profile).with_tsa(TsaConfig::new("http://tsa.example"));
            let err = execute_plans(b"%PDF-1.4\n".to_vec(), vec![plan], Vec::new(), 1.0, 0, &NetworkConfig::default())
                .unwrap_err();
            let msg = format!("{}", err);
            assert!(msg.contains("not currently supported"), "unexpected: {}", msg);
        }
    }

    #[test]
    fn test_bt_requires_tsa() {
        let plan = dummy_plan().with_profile(SignatureProfile::PadesBT);
        let err = execute_plans(
            b"%PDF-1.4\n".to_vec(),
            vec![plan],
            Vec::new(),
            1.0,
            0,
            &NetworkConfig::default(),
        )
        .unwrap_err();
        assert!(format!("{}", err).contains("requires a Timestamp Authority"));
    }

    #[test]
    fn test_render_dictionary_slots() {
        let plan = dummy_plan().with_reason("Approved (final)").certification(MdpPermission::NoChanges);
        let payload = render_signature_dictionary(12, &plan, Some("Alice"), Utc::now());
        assert!(payload.starts_with("12 0 obj"));
        assert!(payload.contains("/SubFilter /adbe.pkcs7.detached"));
        assert!(payload.contains(&byterange::byte_range_placeholder()));
        assert!(payload.contains("/Reason (Approved \\(final\\))"));
        assert!(payload.contains("/TransformParams << /Type /TransformParams /P 1"));
        // Slots are locatable exactly once rendered.
        let slots = SignatureSlots::locate(payload.as_bytes(), 0, plan.contents_capacity * 2).unwrap();
        assert_eq!(slots.contents_hex_len, plan.contents_capacity * 2);
    }

    #[test]
    fn test_document_timestamp_dictionary_is_minimal() {
        let plan = SignaturePlan::document_timestamp(TsaConfig::new("http://tsa.example"));
        let payload = render_signature_dictionary(3, &plan, None, Utc::now());
        assert!(payload.contains("/Type /DocTimeStamp"));
        assert!(payload.contains("/SubFilter /ETSI.RFC3161"));
        assert!(!payload.contains("/Reason"));
        assert!(!payload.contains("/M ("));
    }
}
