//! Timestamp paths: signature timestamps (B-T), document timestamps, and
//! the validation-time priority rules, all against an in-process TSA.

mod common;

use common::{form_pdf, LocalTsa, TestIdentity};
use pades_oxide::signatures::{
    RevocationPolicy, SignaturePlan, SignatureProfile, TimeSource,
};
use pades_oxide::{Document, VerifyOptions};
use std::sync::Arc;

fn lenient_options() -> VerifyOptions {
    VerifyOptions {
        allow_untrusted_roots: true,
        ..Default::default()
    }
}

#[test]
fn signature_timestamp_sets_embedded_time_source() {
    let identity = TestIdentity::generate("Timestamped Signer");
    let tsa = Arc::new(LocalTsa::new());

    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(
        SignaturePlan::new(identity.signer(), identity.certificate_der.clone())
            .with_revocation(RevocationPolicy::disabled())
            .with_profile(SignatureProfile::PadesBT)
            .with_timestamp_authority(tsa.clone()),
    );
    let signed = doc.finalize().unwrap();

    let report = Document::from_bytes(signed.bytes)
        .unwrap()
        .verify(lenient_options())
        .unwrap();
    let signer = &report.signers[0];
    assert!(report.valid, "report: {:?}", report.signers);
    assert!(signer.timestamp_present);
    assert!(signer.timestamp_valid, "warnings: {:?}", signer.warnings);
    assert!(signer.timestamp_trusted);
    assert_eq!(signer.time_source, Some(TimeSource::EmbeddedTimestamp));
    assert!(signer.timestamp_time.is_some());
    // A timestamped CMS carries no claimed signing-time attribute; the
    // dictionary /M remains informational.
    assert_eq!(signer.validation_time, signer.timestamp_time);
}

#[test]
fn embedded_timestamp_beats_trusted_claimed_time() {
    let identity = TestIdentity::generate("Priority Signer");
    let tsa = Arc::new(LocalTsa::new());

    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(
        SignaturePlan::new(identity.signer(), identity.certificate_der.clone())
            .with_revocation(RevocationPolicy::disabled())
            .with_timestamp_authority(tsa),
    );
    let signed = doc.finalize().unwrap();

    let options = VerifyOptions {
        allow_untrusted_roots: true,
        trust_signature_time: true,
        ..Default::default()
    };
    let report = Document::from_bytes(signed.bytes)
        .unwrap()
        .verify(options)
        .unwrap();
    // Even with trust_signature_time set, the token wins.
    assert_eq!(
        report.signers[0].time_source,
        Some(TimeSource::EmbeddedTimestamp)
    );
}

#[test]
fn claimed_time_used_only_when_trusted() {
    let identity = TestIdentity::generate("Untimestamped Signer");
    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(
        SignaturePlan::new(identity.signer(), identity.certificate_der.clone())
            .with_revocation(RevocationPolicy::disabled()),
    );
    let signed = doc.finalize().unwrap();

    let trusting = VerifyOptions {
        allow_untrusted_roots: true,
        trust_signature_time: true,
        ..Default::default()
    };
    let report = Document::from_bytes(signed.bytes.clone())
        .unwrap()
        .verify(trusting)
        .unwrap();
    assert_eq!(
        report.signers[0].time_source,
        Some(TimeSource::ClaimedSigningTime)
    );

    let untrusting = lenient_options();
    let report = Document::from_bytes(signed.bytes)
        .unwrap()
        .verify(untrusting)
        .unwrap();
    assert_eq!(report.signers[0].time_source, Some(TimeSource::CurrentTime));
}

#[test]
fn document_timestamp_plan_produces_doctimestamp_field() {
    let tsa = Arc::new(LocalTsa::new());
    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(
        SignaturePlan::document_timestamp(pades_oxide::TsaConfig::new("http://unused.example"))
            .with_timestamp_authority(tsa),
    );
    let stamped = doc.finalize().unwrap();
    assert_eq!(stamped.signatures[0].sub_filter, "ETSI.RFC3161");

    let report = Document::from_bytes(stamped.bytes)
        .unwrap()
        .verify(lenient_options())
        .unwrap();
    let signer = &report.signers[0];
    assert!(signer.document_timestamp);
    assert!(signer.timestamp_present);
    assert!(signer.timestamp_valid, "warnings: {:?}", signer.warnings);
    assert_eq!(signer.time_source, Some(TimeSource::EmbeddedTimestamp));
    assert!(report.valid, "report: {:?}", report.signers);
}

#[test]
fn bt_profile_without_tsa_is_rejected() {
    let identity = TestIdentity::generate("No TSA");
    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(
        SignaturePlan::new(identity.signer(), identity.certificate_der.clone())
            .with_profile(SignatureProfile::PadesBT),
    );
    let err = doc.finalize().unwrap_err();
    assert!(format!("{}", err).contains("requires a Timestamp Authority"));
}

#[test]
fn tampering_invalidates_timestamped_signature() {
    let identity = TestIdentity::generate("Tamper TS");
    let tsa = Arc::new(LocalTsa::new());
    let mut doc = Document::from_bytes(form_pdf()).unwrap();
    doc.add_signature(
        SignaturePlan::new(identity.signer(), identity.certificate_der.clone())
            .with_revocation(RevocationPolicy::disabled())
            .with_timestamp_authority(tsa),
    );
    let mut bytes = doc.finalize().unwrap().bytes;
    let pos = bytes
        .windows(b"Fixture Form".len())
        .position(|w| w == b"Fixture Form")
        .unwrap();
    bytes[pos] ^= 0x01;

    let report = Document::from_bytes(bytes)
        .unwrap()
        .verify(lenient_options())
        .unwrap();
    assert!(!report.valid);
    // The token still matches the (unchanged) signature value; only the
    // document digest breaks.
    assert!(report.signers[0].timestamp_valid);
    assert!(!report.signers[0].valid_signature);
}
