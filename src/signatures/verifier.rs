//! Signature verification.
//!
//! The verifier is total: every discovered signature gets a
//! [`SignerReport`], parse failures land on the verdict that caused them,
//! and only I/O-level problems abort the run. Trust, revocation and
//! timestamp evaluation all happen at one validation time chosen by
//! priority: embedded timestamp, trusted claimed time, caller-supplied
//! anchor, wall clock.

use crate::document::{decode_pdf_text, parse_pdf_date, PdfDocument};
use crate::error::{Error, Result};
use crate::forms;
use crate::object::Object;
use crate::signatures::byterange;
use crate::signatures::chain::{self, CertificatePool};
use crate::signatures::cms::{self, ParsedSignature};
use crate::signatures::dss::{self, DssContents};
use crate::signatures::keys::{self, KeyAlgorithm};
use crate::signatures::revocation::{self, RevocationBundle};
use crate::signatures::timestamp;
use crate::signatures::types::{
    NetworkConfig, SignatureSubFilter, SignerReport, TimeSource, VerificationReport,
};
use chrono::{DateTime, Utc};
use der::asn1::ObjectIdentifier;
use der::Encode;
use std::collections::HashMap;
use x509_cert::Certificate;

/// Verification configuration, mirrored by the CLI's `verify` flags.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Allow live OCSP/CRL lookups during verification
    pub external_checks: bool,
    /// Leaf certificates must assert the digitalSignature key usage
    pub require_digital_signature: bool,
    /// Leaf certificates must assert the nonRepudiation key usage
    pub require_non_repudiation: bool,
    /// Accept the claimed signing time as the validation time
    pub trust_signature_time: bool,
    /// Verify the TSA certificate chain of embedded timestamps
    pub validate_timestamp_certificates: bool,
    /// Tolerate chains terminating in a self-signed root outside the pool
    pub allow_untrusted_roots: bool,
    /// Apply key policy to every chain certificate, not just the leaf
    pub validate_full_chain: bool,
    /// Fixed validation time anchor
    pub at_time: Option<DateTime<Utc>>,
    /// Minimum RSA modulus size in bits
    pub min_rsa_bits: usize,
    /// Minimum ECDSA curve size in bits
    pub min_ecdsa_bits: usize,
    /// When set, restricts acceptable public key algorithms
    pub allowed_algorithms: Option<Vec<KeyAlgorithm>>,
    /// When set, leaf certificates must carry one of these EKUs
    pub allowed_ekus: Option<Vec<ObjectIdentifier>>,
    /// Trusted root certificates, DER
    pub trusted_roots: Vec<Vec<u8>>,
    /// Network behaviour for live checks
    pub network: NetworkConfig,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            external_checks: false,
            require_digital_signature: true,
            require_non_repudiation: false,
            trust_signature_time: false,
            validate_timestamp_certificates: true,
            allow_untrusted_roots: false,
            validate_full_chain: false,
            at_time: None,
            min_rsa_bits: 2048,
            min_ecdsa_bits: 256,
            allowed_algorithms: None,
            allowed_ekus: None,
            trusted_roots: Vec::new(),
            network: NetworkConfig::default(),
        }
    }
}

/// A signature field discovered in the AcroForm tree.
#[derive(Debug, Clone)]
pub struct SignatureField {
    /// Fully qualified field name
    pub field_name: String,
    /// The signature dictionary (`/V`)
    pub dict: HashMap<String, Object>,
}

/// Lazy, single-pass iterator over a document's signature fields.
///
/// Restartable by calling [`signatures`] again; field discovery happens up
/// front, signature-dictionary parsing happens per `next()`.
pub struct SignatureIter<'a> {
    doc: &'a PdfDocument,
    fields: std::vec::IntoIter<forms::FieldInfo>,
}

impl Iterator for SignatureIter<'_> {
    type Item = Result<SignatureField>;

    fn next(&mut self) -> Option<Self::Item> {
        for field in self.fields.by_ref() {
            if field.field_type() != Some("Sig") {
                continue;
            }
            let value = match self.doc.resolve_entry(&field.dict, "V") {
                Ok(Some(value)) => value,
                Ok(None) => continue, // unsigned signature field
                Err(e) => return Some(Err(e)),
            };
            let dict = match value.as_dict() {
                Some(d) => d.clone(),
                None => {
                    return Some(Err(Error::InvalidPdf(format!(
                        "signature value of '{}' is not a dictionary",
                        field.name
                    ))));
                },
            };
            let type_name = dict.get("Type").and_then(|o| o.as_name());
            let looks_signed = matches!(type_name, Some("Sig") | Some("DocTimeStamp"))
                || (dict.contains_key("Filter") && dict.contains_key("Contents"));
            if !looks_signed {
                continue;
            }
            return Some(Ok(SignatureField {
                field_name: field.name.clone(),
                dict,
            }));
        }
        None
    }
}

/// Enumerate signature fields in `/Fields` order, recursing into kids.
pub fn signatures(doc: &PdfDocument) -> Result<SignatureIter<'_>> {
    Ok(SignatureIter {
        doc,
        fields: forms::walk_fields(doc)?.into_iter(),
    })
}

/// Deferred-execution verifier: configure, then read results.
///
/// Models the explicit state machine Unconfigured → Configured → Executed;
/// any result accessor triggers the (single) transition to Executed.
pub struct SignatureValidator {
    doc: PdfDocument,
    state: ValidatorState,
}

enum ValidatorState {
    Unconfigured,
    Configured(Box<VerifyOptions>),
    Executed(Box<VerificationReport>),
}

impl SignatureValidator {
    /// Start validating a document with default options.
    pub fn new(doc: PdfDocument) -> Self {
        Self {
            doc,
            state: ValidatorState::Unconfigured,
        }
    }

    /// Replace the whole option set.
    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.configure(|o| *o = options);
        self
    }

    /// Enable live OCSP/CRL checks.
    pub fn external_checks(mut self, enabled: bool) -> Self {
        self.configure(|o| o.external_checks = enabled);
        self
    }

    /// Tolerate untrusted self-signed roots.
    pub fn allow_untrusted_roots(mut self, allow: bool) -> Self {
        self.configure(|o| o.allow_untrusted_roots = allow);
        self
    }

    /// Trust the claimed signing time as validation time.
    pub fn trust_signature_time(mut self, trust: bool) -> Self {
        self.configure(|o| o.trust_signature_time = trust);
        self
    }

    /// Anchor validation at a fixed time.
    pub fn at_time(mut self, at: DateTime<Utc>) -> Self {
        self.configure(|o| o.at_time = Some(at));
        self
    }

    /// Add trusted roots.
    pub fn with_trusted_roots(mut self, roots: Vec<Vec<u8>>) -> Self {
        self.configure(|o| o.trusted_roots.extend(roots));
        self
    }

    fn configure(&mut self, apply: impl FnOnce(&mut VerifyOptions)) {
        match &mut self.state {
            ValidatorState::Unconfigured => {
                let mut options = Box::<VerifyOptions>::default();
                apply(&mut options);
                self.state = ValidatorState::Configured(options);
            },
            ValidatorState::Configured(options) => apply(options),
            ValidatorState::Executed(_) => {
                log::warn!("validator already executed; configuration change ignored");
            },
        }
    }

    /// The full report; executes verification on first access.
    pub fn report(&mut self) -> &VerificationReport {
        if !matches!(self.state, ValidatorState::Executed(_)) {
            let options = match std::mem::replace(&mut self.state, ValidatorState::Unconfigured) {
                ValidatorState::Configured(options) => *options,
                _ => VerifyOptions::default(),
            };
            let report = verify_document(&self.doc, &options);
            self.state = ValidatorState::Executed(Box::new(report));
        }
        match &self.state {
            ValidatorState::Executed(report) => report,
            _ => unreachable!("state set above"),
        }
    }

    /// Aggregate verdict; executes verification on first access.
    pub fn valid(&mut self) -> bool {
        self.report().valid
    }
}

/// Verify every signature in the document.
pub fn verify_document(doc: &PdfDocument, options: &VerifyOptions) -> VerificationReport {
    let document_info = doc.info().unwrap_or_default();
    let dss_contents = dss::read_dss(doc);

    let mut signers = Vec::new();
    match signatures(doc) {
        Ok(iter) => {
            for item in iter {
                match item {
                    Ok(field) => {
                        signers.push(verify_signature(doc, &field, &dss_contents, options))
                    },
                    Err(e) => {
                        let mut report = SignerReport::default();
                        report.errors.push(e.to_string());
                        signers.push(report);
                    },
                }
            }
        },
        Err(e) => {
            let mut report = SignerReport::default();
            report.errors.push(format!("signature enumeration failed: {}", e));
            signers.push(report);
        },
    }

    let valid = !signers.is_empty() && signers.iter().all(|s| s.valid);
    VerificationReport {
        document_info,
        signers,
        valid,
    }
}

/// Verify one signature field.
pub fn verify_signature(
    doc: &PdfDocument,
    field: &SignatureField,
    dss_contents: &DssContents,
    options: &VerifyOptions,
) -> SignerReport {
    let mut report = SignerReport {
        field_name: field.field_name.clone(),
        ..Default::default()
    };
    let dict = &field.dict;

    let text = |key: &str| dict.get(key).and_then(|o| o.as_string()).map(decode_pdf_text);
    report.name = text("Name");
    report.reason = text("Reason");
    report.location = text("Location");
    report.contact_info = text("ContactInfo");
    let sub_filter = dict
        .get("SubFilter")
        .and_then(|o| o.as_name())
        .and_then(SignatureSubFilter::from_pdf_name);
    report.sub_filter = dict.get("SubFilter").and_then(|o| o.as_name()).map(String::from);
    report.document_timestamp = dict.get("Type").and_then(|o| o.as_name()) == Some("DocTimeStamp")
        || sub_filter == Some(SignatureSubFilter::Rfc3161);
    let claimed_m = text("M").as_deref().and_then(parse_pdf_date);

    // --- ByteRange ---------------------------------------------------------
    let range = match read_byte_range(doc, dict) {
        Ok(range) => range,
        Err(e) => {
            report.errors.push(e.to_string());
            return report;
        },
    };
    report.byte_range = range.to_vec();
    match byterange::validate_byte_range(doc.bytes(), &range) {
        Ok(covers) => report.covers_document = covers,
        Err(e) => {
            report.errors.push(e.to_string());
            return report;
        },
    }
    let digest_input = match byterange::digest_input(doc.bytes(), &range) {
        Ok(input) => input,
        Err(e) => {
            report.errors.push(e.to_string());
            return report;
        },
    };

    let contents = match dict.get("Contents").and_then(|o| o.as_string()) {
        Some(bytes) => bytes.to_vec(),
        None => {
            report.errors.push("signature has no /Contents".to_string());
            return report;
        },
    };

    if report.document_timestamp {
        verify_document_timestamp(&contents, &digest_input, dss_contents, options, &mut report);
        return report;
    }

    // --- CMS ---------------------------------------------------------------
    let parsed = match cms::parse_signature(&contents) {
        Ok(parsed) => parsed,
        Err(e) => {
            report.errors.push(e.to_string());
            return report;
        },
    };
    report.digest_algorithm = Some(parsed.digest_algorithm.name().to_string());
    report.claimed_signing_time = parsed.signing_time.or(claimed_m);

    let recomputed = parsed.digest_algorithm.digest(&digest_input);
    let digest_ok = recomputed == parsed.message_digest;
    if !digest_ok {
        report
            .errors
            .push("message digest does not match the signed byte range".to_string());
    }

    let (signer_cert, signer_der) = match parsed.signer_certificate() {
        Some(cert) => {
            let der_bytes = parsed
                .certificates
                .iter()
                .find(|(c, _)| c == cert)
                .map(|(_, d)| d.clone())
                .unwrap_or_default();
            (cert.clone(), der_bytes)
        },
        None => {
            report
                .errors
                .push("signer certificate is not embedded in the CMS".to_string());
            return report;
        },
    };
    if report.name.is_none() {
        report.name = chain::subject_common_name(&signer_cert);
    }

    let signature_ok = verify_signer_info(&parsed, &signer_cert, &mut report);
    report.valid_signature = digest_ok && signature_ok;

    let (key_algorithm, key_size) = chain::certificate_key_info(&signer_cert);
    report.key_algorithm = key_algorithm.map(|a| a.name().to_string());
    report.key_size = key_size;

    // --- Timestamp ---------------------------------------------------------
    let mut timestamp_time = None;
    if let Some(token) = &parsed.timestamp_token {
        report.timestamp_present = true;
        let outcome =
            verify_timestamp_token(token, &parsed.signature, dss_contents, options, &mut report);
        report.timestamp_valid = outcome.valid;
        report.timestamp_trusted = outcome.trusted;
        report.timestamp_time = outcome.time;
        timestamp_time = outcome.valid.then_some(outcome.time).flatten();
    }

    // --- Validation time ----------------------------------------------------
    let (validation_time, source) = select_validation_time(
        timestamp_time,
        report.claimed_signing_time,
        options,
    );
    report.validation_time = Some(validation_time);
    report.time_source = Some(source);

    // --- Chain -------------------------------------------------------------
    let mut pool = CertificatePool::new();
    for (cert, der_bytes) in &parsed.certificates {
        pool.add(cert.clone(), der_bytes.clone());
    }
    for der_bytes in &dss_contents.certs {
        let _ = pool.add_der(der_bytes);
    }
    let mut trusted_fingerprints = Vec::new();
    for der_bytes in &options.trusted_roots {
        trusted_fingerprints.push(chain::fingerprint(der_bytes));
        let _ = pool.add_der(der_bytes);
    }

    let resolved = chain::resolve_chain(&signer_cert, &signer_der, &pool);
    report.certificate_chain = resolved
        .chain
        .iter()
        .map(|(cert, _)| chain::certificate_report(cert))
        .collect();

    let in_trusted_pool = resolved
        .chain
        .iter()
        .any(|(_, der_bytes)| trusted_fingerprints.contains(&chain::fingerprint(der_bytes)));
    report.trusted_issuer = if in_trusted_pool {
        true
    } else if resolved.ends_at_root && options.allow_untrusted_roots {
        report
            .warnings
            .push("chain ends at a self-signed root outside the trusted pool".to_string());
        true
    } else {
        report.errors.push(if resolved.ends_at_root {
            "chain root is not in the trusted pool".to_string()
        } else {
            "certificate chain is incomplete".to_string()
        });
        false
    };

    for error in chain::validate_window_at(&resolved.chain, validation_time) {
        report.errors.push(error);
        report.trusted_issuer = false;
    }
    for error in chain::verify_chain_signatures(&resolved.chain) {
        report.errors.push(error);
        report.trusted_issuer = false;
    }

    apply_key_policy(&resolved.chain, options, &mut report);

    // --- Revocation --------------------------------------------------------
    let mut evidence = parsed.revocation.clone();
    evidence.merge(dss_contents.to_bundle());
    if options.external_checks {
        collect_live_evidence(&resolved.chain, options, &mut evidence, &mut report);
    }
    evaluate_revocation(&resolved.chain, &evidence, validation_time, &mut report);

    // --- DocMDP ------------------------------------------------------------
    if let Some(p) = docmdp_permission(doc, dict) {
        if p == 1 && !report.covers_document {
            report
                .errors
                .push("document was changed after a no-changes certification".to_string());
            report.valid_signature = false;
        }
    }

    report.valid = report.valid_signature
        && report.trusted_issuer
        && !report.revoked_before_signing
        && report.errors.is_empty();
    report
}

fn read_byte_range(doc: &PdfDocument, dict: &HashMap<String, Object>) -> Result<[i64; 4]> {
    let array = doc
        .resolve_entry(dict, "ByteRange")?
        .and_then(|o| o.as_array().cloned())
        .ok_or_else(|| Error::InvalidPdf("signature has no /ByteRange".to_string()))?;
    let values: Vec<i64> = array.iter().filter_map(|o| o.as_integer()).collect();
    if values.len() != 4 {
        return Err(Error::InvalidPdf(format!(
            "/ByteRange has {} numeric entries, expected 4",
            values.len()
        )));
    }
    Ok([values[0], values[1], values[2], values[3]])
}

fn verify_signer_info(
    parsed: &ParsedSignature,
    signer_cert: &Certificate,
    report: &mut SignerReport,
) -> bool {
    let spki_der = match signer_cert.tbs_certificate.subject_public_key_info.to_der() {
        Ok(der_bytes) => der_bytes,
        Err(e) => {
            report.errors.push(format!("unreadable signer public key: {}", e));
            return false;
        },
    };
    let attrs_digest = parsed.digest_algorithm.digest(&parsed.signed_attrs_der);
    match keys::verify_with_spki(
        &spki_der,
        &parsed.signed_attrs_der,
        &attrs_digest,
        &parsed.signature,
        parsed.digest_algorithm,
    ) {
        Ok(true) => true,
        Ok(false) => {
            report.errors.push("SignerInfo signature is invalid".to_string());
            false
        },
        Err(e) => {
            report.errors.push(format!("SignerInfo signature check failed: {}", e));
            false
        },
    }
}

fn select_validation_time(
    timestamp_time: Option<DateTime<Utc>>,
    claimed: Option<DateTime<Utc>>,
    options: &VerifyOptions,
) -> (DateTime<Utc>, TimeSource) {
    if let Some(ts) = timestamp_time {
        return (ts, TimeSource::EmbeddedTimestamp);
    }
    if options.trust_signature_time {
        if let Some(claimed) = claimed {
            return (claimed, TimeSource::ClaimedSigningTime);
        }
    }
    if let Some(at) = options.at_time {
        return (at, TimeSource::ProvidedTime);
    }
    (Utc::now(), TimeSource::CurrentTime)
}

fn apply_key_policy(
    resolved_chain: &[(Certificate, Vec<u8>)],
    options: &VerifyOptions,
    report: &mut SignerReport,
) {
    let targets: &[(Certificate, Vec<u8>)] = if options.validate_full_chain {
        resolved_chain
    } else {
        &resolved_chain[..resolved_chain.len().min(1)]
    };

    for (index, (cert, _)) in targets.iter().enumerate() {
        let subject = cert.tbs_certificate.subject.to_string();
        let is_leaf = index == 0;

        let ku = chain::key_usage(cert);
        if is_leaf && options.require_digital_signature && !ku.digital_signature {
            report
                .errors
                .push(format!("'{}' does not assert the digitalSignature key usage", subject));
        }
        if is_leaf && options.require_non_repudiation && !ku.non_repudiation {
            report
                .errors
                .push(format!("'{}' does not assert the nonRepudiation key usage", subject));
        }

        if is_leaf {
            if let Some(allowed) = &options.allowed_ekus {
                let ekus = chain::extended_key_usage(cert).unwrap_or_default();
                if !ekus.iter().any(|e| allowed.contains(e)) {
                    report
                        .errors
                        .push(format!("'{}' carries none of the allowed extended key usages", subject));
                }
            }
        }

        let (algorithm, bits) = chain::certificate_key_info(cert);
        match algorithm {
            Some(KeyAlgorithm::Rsa) => {
                if bits.unwrap_or(0) < options.min_rsa_bits {
                    report.errors.push(format!(
                        "'{}' RSA key is {} bits, below the {}-bit floor",
                        subject,
                        bits.unwrap_or(0),
                        options.min_rsa_bits
                    ));
                }
            },
            Some(KeyAlgorithm::EcdsaP256) | Some(KeyAlgorithm::EcdsaP384) => {
                if bits.unwrap_or(0) < options.min_ecdsa_bits {
                    report.errors.push(format!(
                        "'{}' ECDSA key is {} bits, below the {}-bit floor",
                        subject,
                        bits.unwrap_or(0),
                        options.min_ecdsa_bits
                    ));
                }
            },
            Some(KeyAlgorithm::Ed25519) | None => {},
        }
        if let (Some(allowed), Some(algorithm)) = (&options.allowed_algorithms, algorithm) {
            if !allowed.contains(&algorithm) {
                report
                    .errors
                    .push(format!("'{}' uses disallowed key algorithm {}", subject, algorithm.name()));
            }
        }
    }
}

fn collect_live_evidence(
    resolved_chain: &[(Certificate, Vec<u8>)],
    options: &VerifyOptions,
    evidence: &mut RevocationBundle,
    report: &mut SignerReport,
) {
    for (cert, issuer) in revocation::chain_pairs(resolved_chain) {
        match revocation::fetch_ocsp(cert, issuer, &options.network) {
            Ok(der_bytes) => {
                evidence.ocsps.push(der_bytes);
                continue;
            },
            Err(e) => log::debug!("live OCSP failed: {}", e),
        }
        match revocation::fetch_crl(cert, &options.network) {
            Ok(der_bytes) => evidence.crls.push(der_bytes),
            Err(e) => {
                report.warnings.push(format!(
                    "live revocation check unavailable for '{}': {}",
                    cert.tbs_certificate.subject, e
                ));
            },
        }
    }
}

fn evaluate_revocation(
    resolved_chain: &[(Certificate, Vec<u8>)],
    evidence: &RevocationBundle,
    validation_time: DateTime<Utc>,
    report: &mut SignerReport,
) {
    for (index, (cert, _)) in resolved_chain.iter().enumerate() {
        if chain::is_self_signed(cert) {
            continue;
        }
        let issuer = resolved_chain.get(index + 1).map(|(c, _)| c);
        let status = revocation::evaluate(cert, issuer, evidence, validation_time);
        if !status.has_evidence {
            report.warnings.push(format!(
                "no revocation evidence for '{}'",
                cert.tbs_certificate.subject
            ));
            continue;
        }
        if status.revoked {
            report.revoked = true;
            match status.revocation_time {
                Some(revoked_at) if revoked_at <= validation_time => {
                    report.revoked_before_signing = true;
                    report.errors.push(format!(
                        "'{}' was revoked at {}, before the validation time {}",
                        cert.tbs_certificate.subject, revoked_at, validation_time
                    ));
                },
                _ => {
                    report.warnings.push(format!(
                        "'{}' was revoked after the validation time",
                        cert.tbs_certificate.subject
                    ));
                },
            }
        }
    }
}

struct TimestampOutcome {
    valid: bool,
    trusted: bool,
    time: Option<DateTime<Utc>>,
}

/// Verify an RFC 3161 token against the bytes it claims to cover.
fn verify_timestamp_token(
    token_der: &[u8],
    covered: &[u8],
    dss_contents: &DssContents,
    options: &VerifyOptions,
    report: &mut SignerReport,
) -> TimestampOutcome {
    let mut outcome = TimestampOutcome {
        valid: false,
        trusted: false,
        time: None,
    };

    let parsed = match cms::parse_signature(token_der) {
        Ok(parsed) => parsed,
        Err(e) => {
            report.warnings.push(format!("unreadable timestamp token: {}", e));
            return outcome;
        },
    };
    let (tst, tst_bytes) = match timestamp::tst_info_from_signed_data(&parsed.signed_data) {
        Ok(pair) => pair,
        Err(e) => {
            report.warnings.push(e.to_string());
            return outcome;
        },
    };
    outcome.time = timestamp::tst_gen_time(&tst);

    // Imprint over the covered bytes.
    let imprint_ok = match timestamp::tst_message_imprint(&tst) {
        Ok((algorithm, imprint)) => algorithm.digest(covered) == imprint,
        Err(e) => {
            report.warnings.push(e.to_string());
            false
        },
    };
    if !imprint_ok {
        report
            .warnings
            .push("timestamp imprint does not match the signature".to_string());
    }

    // The token's own message-digest attribute covers the TSTInfo bytes.
    let tst_digest_ok = parsed.digest_algorithm.digest(&tst_bytes) == parsed.message_digest;
    let signature_ok = match parsed.signer_certificate() {
        Some(tsa_cert) => {
            let mut scratch = SignerReport::default();
            verify_signer_info(&parsed, tsa_cert, &mut scratch)
        },
        None => {
            report
                .warnings
                .push("TSA certificate is not embedded in the token".to_string());
            false
        },
    };
    outcome.valid = imprint_ok && tst_digest_ok && signature_ok;

    // TSA chain trust.
    if !options.validate_timestamp_certificates {
        outcome.trusted = true;
    } else if let Some(tsa_cert) = parsed.signer_certificate() {
        let tsa_der = parsed
            .certificates
            .iter()
            .find(|(c, _)| c == tsa_cert)
            .map(|(_, d)| d.clone())
            .unwrap_or_default();
        let mut pool = CertificatePool::new();
        for (cert, der_bytes) in &parsed.certificates {
            pool.add(cert.clone(), der_bytes.clone());
        }
        for der_bytes in &dss_contents.certs {
            let _ = pool.add_der(der_bytes);
        }
        let mut trusted_fingerprints = Vec::new();
        for der_bytes in &options.trusted_roots {
            trusted_fingerprints.push(chain::fingerprint(der_bytes));
            let _ = pool.add_der(der_bytes);
        }
        let resolved = chain::resolve_chain(tsa_cert, &tsa_der, &pool);
        let in_pool = resolved
            .chain
            .iter()
            .any(|(_, der_bytes)| trusted_fingerprints.contains(&chain::fingerprint(der_bytes)));
        outcome.trusted =
            in_pool || (resolved.ends_at_root && options.allow_untrusted_roots);
        if !outcome.trusted {
            report.warnings.push("TSA chain is not trusted".to_string());
        }
    }

    outcome
}

/// Verify an `ETSI.RFC3161` document timestamp: the token's imprint covers
/// the ByteRange input itself.
fn verify_document_timestamp(
    contents: &[u8],
    digest_input: &[u8],
    dss_contents: &DssContents,
    options: &VerifyOptions,
    report: &mut SignerReport,
) {
    let trimmed = match cms::der_prefix_len(contents) {
        Ok(len) => &contents[..len],
        Err(e) => {
            report.errors.push(e.to_string());
            return;
        },
    };
    report.timestamp_present = true;
    let outcome = verify_timestamp_token(trimmed, digest_input, dss_contents, options, report);
    report.timestamp_valid = outcome.valid;
    report.timestamp_trusted = outcome.trusted;
    report.timestamp_time = outcome.time;
    report.valid_signature = outcome.valid;
    report.trusted_issuer = outcome.trusted;
    if outcome.valid {
        report.validation_time = outcome.time;
        report.time_source = Some(TimeSource::EmbeddedTimestamp);
    }
    report.valid = outcome.valid && outcome.trusted && report.errors.is_empty();
}

/// The DocMDP `/P` value for a certification signature, from its
/// `/Reference` transform or the catalog `/Perms` entry.
fn docmdp_permission(doc: &PdfDocument, dict: &HashMap<String, Object>) -> Option<i64> {
    let references = doc.resolve_entry(dict, "Reference").ok()??;
    let array = references.as_array()?;
    for item in array {
        let sig_ref = doc.resolve(item).ok()?;
        let sig_ref = sig_ref.as_dict()?;
        if sig_ref.get("TransformMethod").and_then(|o| o.as_name()) != Some("DocMDP") {
            continue;
        }
        let params = doc.resolve_entry(sig_ref, "TransformParams").ok()??;
        let params = params.as_dict()?;
        // Default permission level is 2 when /P is absent.
        return Some(params.get("P").and_then(|o| o.as_integer()).unwrap_or(2));
    }
    None
}
