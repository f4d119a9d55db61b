//! Certificate graph resolution and chain policy.
//!
//! Certificates form a graph with parent-of edges given by issuer /
//! authority-key-identifier matches. Resolution walks from a leaf towards a
//! self-signed root with a visited set keyed by SHA-256 fingerprint, so
//! cross-signed loops terminate. Duplicates are deduplicated by the same
//! fingerprint.

use crate::error::{Error, Result};
use crate::signatures::keys::{self, KeyAlgorithm};
use crate::signatures::oids;
use crate::signatures::types::{CertificateReport, DigestAlgorithm};
use chrono::{DateTime, TimeZone, Utc};
use der::{Decode, Encode};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use x509_cert::Certificate;

/// SHA-256 fingerprint of a DER certificate.
pub fn fingerprint(der_bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(der_bytes).into()
}

/// A pool of candidate certificates (CMS set, DSS, trusted roots).
#[derive(Default, Clone)]
pub struct CertificatePool {
    certs: Vec<(Certificate, Vec<u8>)>,
    fingerprints: HashSet<[u8; 32]>,
}

impl CertificatePool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a DER certificate; duplicates are ignored.
    pub fn add_der(&mut self, der_bytes: &[u8]) -> Result<()> {
        let fp = fingerprint(der_bytes);
        if !self.fingerprints.insert(fp) {
            return Ok(());
        }
        let cert = Certificate::from_der(der_bytes)
            .map_err(|e| Error::Certificate(format!("unreadable certificate: {}", e)))?;
        self.certs.push((cert, der_bytes.to_vec()));
        Ok(())
    }

    /// Add an already-parsed certificate.
    pub fn add(&mut self, cert: Certificate, der_bytes: Vec<u8>) {
        if self.fingerprints.insert(fingerprint(&der_bytes)) {
            self.certs.push((cert, der_bytes));
        }
    }

    /// All certificates in the pool.
    pub fn iter(&self) -> impl Iterator<Item = &(Certificate, Vec<u8>)> {
        self.certs.iter()
    }

    /// Whether a certificate with this fingerprint is present.
    pub fn contains_fingerprint(&self, fp: &[u8; 32]) -> bool {
        self.fingerprints.contains(fp)
    }

    /// Find a certificate whose subject matches `issuer` (and whose SKI
    /// matches the child's AKI when both are present).
    fn find_issuer(&self, child: &Certificate) -> Option<&(Certificate, Vec<u8>)> {
        let child_aki = authority_key_id(child);
        self.certs.iter().find(|(candidate, _)| {
            if candidate.tbs_certificate.subject != child.tbs_certificate.issuer {
                return false;
            }
            match (&child_aki, subject_key_id(candidate)) {
                (Some(aki), Some(ski)) => *aki == ski,
                _ => true,
            }
        })
    }
}

/// A chain resolved from leaf to its terminal certificate.
pub struct ResolvedChain {
    /// Certificates leaf-first, with their DER
    pub chain: Vec<(Certificate, Vec<u8>)>,
    /// The terminal certificate is self-signed
    pub ends_at_root: bool,
}

/// Resolve the chain for `leaf` against a candidate pool.
///
/// Terminates at a self-signed certificate, a dead end, or a repeat
/// (detected via the fingerprint visited set).
pub fn resolve_chain(leaf: &Certificate, leaf_der: &[u8], pool: &CertificatePool) -> ResolvedChain {
    let mut chain = vec![(leaf.clone(), leaf_der.to_vec())];
    let mut visited: HashSet<[u8; 32]> = HashSet::new();
    visited.insert(fingerprint(leaf_der));

    let mut current = leaf.clone();
    loop {
        if is_self_signed(&current) {
            return ResolvedChain {
                chain,
                ends_at_root: true,
            };
        }
        match pool.find_issuer(&current) {
            Some((parent, parent_der)) => {
                if !visited.insert(fingerprint(parent_der)) {
                    // Cycle; treat as a dead end.
                    return ResolvedChain {
                        chain,
                        ends_at_root: false,
                    };
                }
                chain.push((parent.clone(), parent_der.clone()));
                current = parent.clone();
            },
            None => {
                return ResolvedChain {
                    chain,
                    ends_at_root: false,
                }
            },
        }
    }
}

/// Subject and issuer are byte-identical.
pub fn is_self_signed(cert: &Certificate) -> bool {
    cert.tbs_certificate.subject == cert.tbs_certificate.issuer
}

/// Raw bytes of an extension's extnValue, by OID.
pub(crate) fn extension_bytes<'a>(
    cert: &'a Certificate,
    oid: &der::asn1::ObjectIdentifier,
) -> Option<&'a [u8]> {
    cert.tbs_certificate
        .extensions
        .as_ref()?
        .iter()
        .find(|e| e.extn_id == *oid)
        .map(|e| e.extn_value.as_bytes())
}

/// keyIdentifier from the AuthorityKeyIdentifier extension.
pub fn authority_key_id(cert: &Certificate) -> Option<Vec<u8>> {
    let oid = der::asn1::ObjectIdentifier::new_unwrap("2.5.29.35");
    let raw = extension_bytes(cert, &oid)?;
    let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier::from_der(raw).ok()?;
    aki.key_identifier.map(|k| k.as_bytes().to_vec())
}

/// SubjectKeyIdentifier extension bytes.
pub fn subject_key_id(cert: &Certificate) -> Option<Vec<u8>> {
    let oid = der::asn1::ObjectIdentifier::new_unwrap("2.5.29.14");
    let raw = extension_bytes(cert, &oid)?;
    let ski = x509_cert::ext::pkix::SubjectKeyIdentifier::from_der(raw).ok()?;
    Some(ski.0.as_bytes().to_vec())
}

/// Validity window of a certificate as UTC timestamps.
pub fn validity_window(cert: &Certificate) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let to_utc = |t: &x509_cert::time::Time| {
        Utc.timestamp_opt(t.to_unix_duration().as_secs() as i64, 0).single()
    };
    (
        to_utc(&cert.tbs_certificate.validity.not_before),
        to_utc(&cert.tbs_certificate.validity.not_after),
    )
}

/// Check every chain certificate's validity window at `at`.
///
/// Returns one error string per violation; empty means the chain is
/// time-valid.
pub fn validate_window_at(chain: &[(Certificate, Vec<u8>)], at: DateTime<Utc>) -> Vec<String> {
    let mut errors = Vec::new();
    for (cert, _) in chain {
        let subject = cert.tbs_certificate.subject.to_string();
        let (not_before, not_after) = validity_window(cert);
        if let Some(nb) = not_before {
            if at < nb {
                errors.push(format!("certificate '{}' not yet valid at {}", subject, at));
            }
        }
        if let Some(na) = not_after {
            if at > na {
                errors.push(format!("certificate '{}' expired at {}", subject, na));
            }
        }
    }
    errors
}

/// Verify each certificate's signature against its parent's public key
/// (the terminal self-signed certificate against itself).
pub fn verify_chain_signatures(chain: &[(Certificate, Vec<u8>)]) -> Vec<String> {
    let mut errors = Vec::new();
    for (i, (cert, _)) in chain.iter().enumerate() {
        let issuer = match chain.get(i + 1) {
            Some((parent, _)) => parent,
            None if is_self_signed(cert) => cert,
            None => continue, // dead-end chains are reported by trust checks
        };
        match verify_certificate_signature(cert, issuer) {
            Ok(true) => {},
            Ok(false) => errors.push(format!(
                "certificate '{}' has an invalid issuer signature",
                cert.tbs_certificate.subject
            )),
            Err(e) => errors.push(format!(
                "certificate '{}' signature could not be checked: {}",
                cert.tbs_certificate.subject, e
            )),
        }
    }
    errors
}

/// Verify one certificate's signature with its issuer's public key.
pub fn verify_certificate_signature(cert: &Certificate, issuer: &Certificate) -> Result<bool> {
    let tbs = cert.tbs_certificate.to_der()?;
    let signature = cert
        .signature
        .as_bytes()
        .ok_or_else(|| Error::Certificate("certificate signature has unused bits".to_string()))?;

    let sig_oid = cert.signature_algorithm.oid;
    let digest_algorithm = if sig_oid == oids::ID_SHA256_WITH_RSA
        || sig_oid == oids::ID_ECDSA_WITH_SHA256
        || sig_oid == oids::ID_ED25519
    {
        DigestAlgorithm::Sha256
    } else if sig_oid == oids::ID_SHA384_WITH_RSA || sig_oid == oids::ID_ECDSA_WITH_SHA384 {
        DigestAlgorithm::Sha384
    } else if sig_oid == oids::ID_SHA512_WITH_RSA || sig_oid == oids::ID_ECDSA_WITH_SHA512 {
        DigestAlgorithm::Sha512
    } else {
        return Err(Error::Certificate(format!(
            "unsupported certificate signature algorithm {}",
            sig_oid
        )));
    };

    let spki_der = issuer.tbs_certificate.subject_public_key_info.to_der()?;
    let digest = digest_algorithm.digest(&tbs);
    keys::verify_with_spki(&spki_der, &tbs, &digest, signature, digest_algorithm)
}

/// Key usage bits relevant to signing policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyUsageInfo {
    /// Extension present at all
    pub present: bool,
    /// digitalSignature bit
    pub digital_signature: bool,
    /// nonRepudiation / contentCommitment bit
    pub non_repudiation: bool,
}

/// Read the KeyUsage extension.
pub fn key_usage(cert: &Certificate) -> KeyUsageInfo {
    use x509_cert::ext::pkix::{KeyUsage, KeyUsages};
    match extension_bytes(cert, &oids::ID_CE_KEY_USAGE).and_then(|raw| KeyUsage::from_der(raw).ok())
    {
        Some(ku) => KeyUsageInfo {
            present: true,
            digital_signature: ku.0.contains(KeyUsages::DigitalSignature),
            non_repudiation: ku.0.contains(KeyUsages::NonRepudiation),
        },
        None => KeyUsageInfo::default(),
    }
}

/// Extended key usage OIDs, when the extension is present.
pub fn extended_key_usage(cert: &Certificate) -> Option<Vec<der::asn1::ObjectIdentifier>> {
    use x509_cert::ext::pkix::ExtendedKeyUsage;
    extension_bytes(cert, &oids::ID_CE_EXT_KEY_USAGE)
        .and_then(|raw| ExtendedKeyUsage::from_der(raw).ok())
        .map(|eku| eku.0)
}

/// Key algorithm family and size of a certificate's public key.
pub fn certificate_key_info(cert: &Certificate) -> (Option<KeyAlgorithm>, Option<usize>) {
    keys::spki_key_info(&cert.tbs_certificate.subject_public_key_info)
}

/// Build the report entry for one chain certificate.
pub fn certificate_report(cert: &Certificate) -> CertificateReport {
    let (not_before, not_after) = validity_window(cert);
    let (algorithm, key_size) = certificate_key_info(cert);
    CertificateReport {
        subject: cert.tbs_certificate.subject.to_string(),
        issuer: cert.tbs_certificate.issuer.to_string(),
        serial: hex::encode(cert.tbs_certificate.serial_number.as_bytes()),
        not_before,
        not_after,
        self_signed: is_self_signed(cert),
        key_algorithm: algorithm.map(|a| a.name().to_string()).unwrap_or_else(|| "unknown".to_string()),
        key_size,
    }
}

/// The subject common name, when one is present.
pub fn subject_common_name(cert: &Certificate) -> Option<String> {
    // RDNSequence -> first CN attribute value.
    let cn_oid = der::asn1::ObjectIdentifier::new_unwrap("2.5.4.3");
    for rdn in cert.tbs_certificate.subject.0.iter() {
        for attr in rdn.0.iter() {
            if attr.oid == cn_oid {
                if let Ok(s) = attr.value.decode_as::<der::asn1::Utf8StringRef>() {
                    return Some(s.to_string());
                }
                if let Ok(s) = attr.value.decode_as::<der::asn1::PrintableStringRef>() {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use std::str::FromStr;
    use std::time::Duration;
    use x509_cert::builder::{Builder, CertificateBuilder, Profile};
    use x509_cert::name::Name;
    use x509_cert::serial_number::SerialNumber;
    use x509_cert::spki::SubjectPublicKeyInfoOwned;
    use x509_cert::time::Validity;

    fn rsa_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    fn self_signed(cn: &str, key: &RsaPrivateKey) -> (Certificate, Vec<u8>) {
        use rsa::pkcs8::EncodePublicKey;
        let signer = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(key.clone());
        let spki_der = key.to_public_key().to_public_key_der().unwrap();
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).unwrap();
        let builder = CertificateBuilder::new(
            Profile::Root,
            SerialNumber::from(7u32),
            Validity::from_now(Duration::from_secs(3600)).unwrap(),
            Name::from_str(&format!("CN={}", cn)).unwrap(),
            spki,
            &signer,
        )
        .unwrap();
        let cert = builder.build::<rsa::pkcs1v15::Signature>().unwrap();
        let der_bytes = cert.to_der().unwrap();
        (cert, der_bytes)
    }

    #[test]
    fn test_self_signed_resolution() {
        let key = rsa_key();
        let (cert, der_bytes) = self_signed("Chain Test Root", &key);
        assert!(is_self_signed(&cert));

        let pool = CertificatePool::new();
        let resolved = resolve_chain(&cert, &der_bytes, &pool);
        assert_eq!(resolved.chain.len(), 1);
        assert!(resolved.ends_at_root);

        // A self-signed certificate verifies against itself.
        assert!(verify_chain_signatures(&resolved.chain).is_empty());
    }

    #[test]
    fn test_pool_deduplicates_by_fingerprint() {
        let key = rsa_key();
        let (_, der_bytes) = self_signed("Dup", &key);
        let mut pool = CertificatePool::new();
        pool.add_der(&der_bytes).unwrap();
        pool.add_der(&der_bytes).unwrap();
        assert_eq!(pool.iter().count(), 1);
        assert!(pool.contains_fingerprint(&fingerprint(&der_bytes)));
    }

    #[test]
    fn test_validity_window_checks() {
        let key = rsa_key();
        let (cert, der_bytes) = self_signed("Window", &key);
        let chain = vec![(cert, der_bytes)];

        assert!(validate_window_at(&chain, Utc::now()).is_empty());
        let past = Utc::now() - chrono::Duration::days(365);
        assert_eq!(validate_window_at(&chain, past).len(), 1);
        let future = Utc::now() + chrono::Duration::days(365);
        assert_eq!(validate_window_at(&chain, future).len(), 1);
    }

    #[test]
    fn test_common_name_extraction() {
        let key = rsa_key();
        let (cert, _) = self_signed("Alice Example", &key);
        assert_eq!(subject_common_name(&cert).as_deref(), Some("Alice Example"));
    }

    #[test]
    fn test_certificate_report_fields() {
        let key = rsa_key();
        let (cert, _) = self_signed("Report", &key);
        let report = certificate_report(&cert);
        assert!(report.subject.contains("Report"));
        assert!(report.self_signed);
        assert_eq!(report.key_algorithm, "RSA");
        assert_eq!(report.key_size, Some(1024));
    }
}
