//! Revocation evidence evaluation and the before/after-signing time rule.

mod common;

use chrono::{Duration, Utc};
use common::{append_dss_crls, form_pdf, issue_leaf, mint_crl, serial_of, TestIdentity};
use pades_oxide::signatures::revocation::{self, RevocationBundle};
use pades_oxide::signatures::{RevocationPolicy, SignaturePlan};
use pades_oxide::{Document, VerifyOptions};

#[test]
fn crl_evidence_reports_revocation_time() {
    let ca = TestIdentity::generate_ca("Evidence CA");
    let leaf = issue_leaf(&ca, "Evidence Leaf");

    let revoked_at = Utc::now() - Duration::hours(3);
    let crl = mint_crl(&ca, Some((&serial_of(&leaf.certificate), revoked_at)), Utc::now());

    let bundle = RevocationBundle {
        crls: vec![crl],
        ..Default::default()
    };
    let status = revocation::evaluate(&leaf.certificate, Some(&ca.certificate), &bundle, Utc::now());
    assert!(status.has_evidence);
    assert!(status.revoked);
    let reported = status.revocation_time.unwrap();
    assert!((reported - revoked_at).num_seconds().abs() <= 1);

    // A clean CRL from the same issuer is authoritative "not revoked".
    let clean = mint_crl(&ca, None, Utc::now());
    let bundle = RevocationBundle {
        crls: vec![clean],
        ..Default::default()
    };
    let status = revocation::evaluate(&leaf.certificate, Some(&ca.certificate), &bundle, Utc::now());
    assert!(status.has_evidence);
    assert!(!status.revoked);
}

#[test]
fn crl_from_other_issuer_is_not_authoritative() {
    let ca = TestIdentity::generate_ca("Real CA");
    let other = TestIdentity::generate_ca("Unrelated CA");
    let leaf = issue_leaf(&ca, "Leaf");

    let crl = mint_crl(&other, Some((&serial_of(&leaf.certificate), Utc::now())), Utc::now());
    let bundle = RevocationBundle {
        crls: vec![crl],
        ..Default::default()
    };
    let status = revocation::evaluate(&leaf.certificate, Some(&ca.certificate), &bundle, Utc::now());
    assert!(!status.has_evidence);
    assert!(!status.revoked);
}

fn signed_with_chain(ca: &TestIdentity, leaf: &TestIdentity) -> Vec<u8> {
    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(
        SignaturePlan::new(leaf.signer(), leaf.certificate_der.clone())
            .with_chain(vec![ca.certificate_der.clone()])
            .with_revocation(RevocationPolicy::disabled())
            .with_reason("Revocation test"),
    );
    doc.finalize().unwrap().bytes
}

fn options_with_root(ca: &TestIdentity) -> VerifyOptions {
    VerifyOptions {
        trusted_roots: vec![ca.certificate_der.clone()],
        trust_signature_time: true,
        ..Default::default()
    }
}

#[test]
fn revocation_before_signing_invalidates() {
    let ca = TestIdentity::generate_ca("Strict CA");
    let leaf = issue_leaf(&ca, "Revoked Signer");
    let signed = signed_with_chain(&ca, &leaf);

    // Revoked an hour before the claimed signing time; evidence arrives
    // through the DSS of a later revision, as on an airgapped validator.
    let revoked_at = Utc::now() - Duration::hours(1);
    let crl = mint_crl(&ca, Some((&serial_of(&leaf.certificate), revoked_at)), Utc::now());
    let with_dss = append_dss_crls(signed, vec![crl]);

    let report = Document::from_bytes(with_dss)
        .unwrap()
        .verify(options_with_root(&ca))
        .unwrap();
    let signer = &report.signers[0];
    assert!(signer.valid_signature, "errors: {:?}", signer.errors);
    assert!(signer.revoked);
    assert!(signer.revoked_before_signing);
    assert!(!signer.valid);
    assert!(!report.valid);
}

#[test]
fn revocation_after_signing_keeps_signature_valid() {
    let ca = TestIdentity::generate_ca("Lenient CA");
    let leaf = issue_leaf(&ca, "Later Revoked Signer");
    let signed = signed_with_chain(&ca, &leaf);

    let revoked_at = Utc::now() + Duration::hours(2);
    let crl = mint_crl(&ca, Some((&serial_of(&leaf.certificate), revoked_at)), Utc::now());
    let with_dss = append_dss_crls(signed, vec![crl]);

    let report = Document::from_bytes(with_dss)
        .unwrap()
        .verify(options_with_root(&ca))
        .unwrap();
    let signer = &report.signers[0];
    assert!(signer.revoked);
    assert!(!signer.revoked_before_signing);
    assert!(signer.valid, "errors: {:?}", signer.errors);
    assert!(signer
        .warnings
        .iter()
        .any(|w| w.contains("revoked after")));
    assert!(report.valid);
}

#[test]
fn clean_dss_evidence_silences_missing_evidence_warning() {
    let ca = TestIdentity::generate_ca("Clean CA");
    let leaf = issue_leaf(&ca, "Clean Signer");
    let signed = signed_with_chain(&ca, &leaf);

    let crl = mint_crl(&ca, None, Utc::now());
    let with_dss = append_dss_crls(signed, vec![crl]);

    // Airgapped host: no external checks, evidence from the DSS only.
    let report = Document::from_bytes(with_dss)
        .unwrap()
        .verify(options_with_root(&ca))
        .unwrap();
    let signer = &report.signers[0];
    assert!(!signer.revoked);
    assert!(signer.valid, "errors: {:?}", signer.errors);
    assert!(signer
        .warnings
        .iter()
        .all(|w| !w.contains("no revocation evidence")));
}

#[test]
fn chain_resolves_through_provided_intermediates() {
    let ca = TestIdentity::generate_ca("Chain CA");
    let leaf = issue_leaf(&ca, "Chain Leaf");
    let signed = signed_with_chain(&ca, &leaf);

    let report = Document::from_bytes(signed)
        .unwrap()
        .verify(options_with_root(&ca))
        .unwrap();
    let signer = &report.signers[0];
    assert!(signer.trusted_issuer, "errors: {:?}", signer.errors);
    assert_eq!(signer.certificate_chain.len(), 2);
    assert!(signer.certificate_chain[0].subject.contains("Chain Leaf"));
    assert!(signer.certificate_chain[1].self_signed);
    assert!(report.valid);
}
