//! Certification signatures, DocMDP permissions, and revision policy.

mod common;

use common::{form_pdf, TestIdentity};
use pades_oxide::signatures::{RevocationPolicy, SignaturePlan};
use pades_oxide::{Document, Error, FieldValue, MdpPermission, VerifyOptions};

fn plan_for(identity: &TestIdentity) -> SignaturePlan {
    SignaturePlan::new(identity.signer(), identity.certificate_der.clone())
        .with_revocation(RevocationPolicy::disabled())
}

fn lenient_options() -> VerifyOptions {
    VerifyOptions {
        allow_untrusted_roots: true,
        ..Default::default()
    }
}

fn fill_and_resign(bytes: Vec<u8>, identity: &TestIdentity) -> Vec<u8> {
    let mut doc = Document::from_bytes(bytes).unwrap();
    doc.set_field("Given Name Text Box", FieldValue::Text("X".to_string()));
    doc.add_signature(plan_for(identity));
    doc.finalize().unwrap().bytes
}

#[test]
fn no_changes_certification_rejects_later_edits() {
    let certifier = TestIdentity::generate("Certifier");
    let editor = TestIdentity::generate("Editor");

    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(plan_for(&certifier).certification(MdpPermission::NoChanges));
    let certified = doc.finalize().unwrap();

    // Certified-only: everything valid.
    let report = Document::from_bytes(certified.bytes.clone())
        .unwrap()
        .verify(lenient_options())
        .unwrap();
    assert!(report.valid, "report: {:?}", report.signers);

    // A form-fill revision breaks the NoChanges certification but not the
    // second signature itself.
    let edited = fill_and_resign(certified.bytes, &editor);
    let report = Document::from_bytes(edited)
        .unwrap()
        .verify(lenient_options())
        .unwrap();
    assert_eq!(report.signers.len(), 2);
    assert!(!report.signers[0].valid, "first: {:?}", report.signers[0]);
    assert!(report.signers[0]
        .errors
        .iter()
        .any(|e| e.contains("certification")));
    assert!(report.signers[1].valid, "second: {:?}", report.signers[1]);
    assert!(!report.valid);
}

#[test]
fn form_filling_certification_tolerates_field_edits() {
    let certifier = TestIdentity::generate("Lenient Certifier");
    let editor = TestIdentity::generate("Filler");

    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(plan_for(&certifier).certification(MdpPermission::AllowFormFilling));
    let certified = doc.finalize().unwrap();

    let edited = fill_and_resign(certified.bytes, &editor);
    let report = Document::from_bytes(edited)
        .unwrap()
        .verify(lenient_options())
        .unwrap();
    assert_eq!(report.signers.len(), 2);
    assert!(report.signers[0].valid, "first: {:?}", report.signers[0]);
    assert!(report.signers[1].valid);
    assert!(report.valid);
}

#[test]
fn certification_must_be_first_within_one_batch() {
    let approver = TestIdentity::generate("Approver");
    let certifier = TestIdentity::generate("Late Certifier");

    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(plan_for(&approver));
    doc.add_signature(plan_for(&certifier).certification(MdpPermission::NoChanges));
    let err = doc.finalize().unwrap_err();
    assert!(matches!(err, Error::CertificationNotFirst));
}

#[test]
fn certification_must_be_first_across_revisions() {
    let approver = TestIdentity::generate("Earlier Approver");
    let certifier = TestIdentity::generate("Too Late");

    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(plan_for(&approver));
    let approved = doc.finalize().unwrap();

    let mut doc = Document::from_bytes(approved.bytes).unwrap();
    doc.add_signature(plan_for(&certifier).certification(MdpPermission::AllowFormFilling));
    let err = doc.finalize().unwrap_err();
    assert!(matches!(err, Error::CertificationNotFirst));
}

#[test]
fn docmdp_reference_is_written() {
    let certifier = TestIdentity::generate("Reference Writer");
    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(
        plan_for(&certifier).certification(MdpPermission::AllowFormFillingAndAnnotations),
    );
    let certified = doc.finalize().unwrap();

    let reader = pades_oxide::PdfDocument::from_bytes(certified.bytes).unwrap();
    let catalog = reader.catalog().unwrap();
    let perms = reader
        .resolve_entry(&catalog, "Perms")
        .unwrap()
        .expect("catalog /Perms");
    let perms = perms.as_dict().unwrap().clone();
    let sig = reader.resolve_entry(&perms, "DocMDP").unwrap().expect("/Perms /DocMDP");
    let sig = sig.as_dict().unwrap();
    let reference = sig.get("Reference").unwrap().as_array().unwrap();
    let sig_ref = reference[0].as_dict().unwrap();
    assert_eq!(
        sig_ref.get("TransformMethod").and_then(|o| o.as_name()),
        Some("DocMDP")
    );
    let params = sig_ref.get("TransformParams").unwrap().as_dict().unwrap();
    assert_eq!(params.get("P").and_then(|o| o.as_integer()), Some(3));
}
