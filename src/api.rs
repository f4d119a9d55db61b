//! High-level document handle.
//!
//! [`Document`] owns an open PDF plus the operations staged against it:
//! form-field values, signature plans, and the coordinate-unit scale.
//! `finalize()` consumes the handle exactly once and hands everything to
//! the signing orchestrator; nothing touches the original bytes until then.

use crate::document::PdfDocument;
use crate::error::Result;
use crate::forms::FieldValue;
use crate::signatures::signer;
use crate::signatures::types::{NetworkConfig, SignaturePlan, SignatureRecord};
use crate::signatures::verifier::{SignatureValidator, VerifyOptions};
use std::path::Path;

/// An open PDF plus staged operations.
pub struct Document {
    bytes: Vec<u8>,
    plans: Vec<SignaturePlan>,
    field_values: Vec<(String, FieldValue)>,
    unit: f32,
    compression: u32,
    network: NetworkConfig,
}

/// The product of [`Document::finalize`].
#[derive(Debug)]
pub struct SignedDocument {
    /// The complete signed file
    pub bytes: Vec<u8>,
    /// One record per executed signature plan
    pub signatures: Vec<SignatureRecord>,
}

impl SignedDocument {
    /// Write the signed bytes to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

impl Document {
    /// Open a PDF from a file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// Open a PDF from raw bytes.
    ///
    /// The document is parsed eagerly so structural problems surface here
    /// rather than at finalize time.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        PdfDocument::from_bytes(bytes.clone())?;
        Ok(Self {
            bytes,
            plans: Vec::new(),
            field_values: Vec::new(),
            unit: 1.0,
            compression: 6,
            network: NetworkConfig::default(),
        })
    }

    /// Read access to the parsed document.
    pub fn reader(&self) -> Result<PdfDocument> {
        PdfDocument::from_bytes(self.bytes.clone())
    }

    /// Scale factor applied to appearance coordinates (1.0 = PDF points).
    pub fn set_unit(&mut self, unit: f32) {
        self.unit = unit;
    }

    /// Flate level for streams this handle writes (0 disables compression).
    pub fn set_compression(&mut self, level: u32) {
        self.compression = level.min(9);
    }

    /// Network behaviour for TSA / OCSP / CRL requests.
    pub fn set_network(&mut self, network: NetworkConfig) {
        self.network = network;
    }

    /// Stage a form-field value; applied inside the first signature's
    /// revision. A missing field surfaces as an error during finalize.
    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.field_values.push((name.into(), value));
    }

    /// Stage a signing plan. Plans execute in registration order, each as
    /// its own incremental revision.
    pub fn add_signature(&mut self, plan: SignaturePlan) {
        self.plans.push(plan);
    }

    /// Execute all staged operations, consuming the handle.
    pub fn finalize(self) -> Result<SignedDocument> {
        let (bytes, signatures) = signer::execute_plans(
            self.bytes,
            self.plans,
            self.field_values,
            self.unit,
            self.compression,
            &self.network,
        )?;
        Ok(SignedDocument { bytes, signatures })
    }

    /// Start verification of the document as currently opened.
    pub fn validator(&self) -> Result<SignatureValidator> {
        Ok(SignatureValidator::new(self.reader()?))
    }

    /// One-shot verification with explicit options.
    pub fn verify(&self, options: VerifyOptions) -> Result<crate::signatures::VerificationReport> {
        let doc = self.reader()?;
        Ok(crate::signatures::verifier::verify_document(&doc, &options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pdf() -> Vec<u8> {
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
    fn test_open_rejects_garbage() {
        assert!(Document::from_bytes(b"not a pdf".to_vec()).is_err());
    }

    #[test]
    fn test_finalize_without_plans_is_identity() {
        let original = minimal_pdf();
        let doc = Document::from_bytes(original.clone()).unwrap();
        let signed = doc.finalize().unwrap();
        assert_eq!(signed.bytes, original);
        assert!(signed.signatures.is_empty());
    }

    #[test]
    fn test_missing_field_surfaces_at_finalize() {
        use der::{Decode, Encode};
        use rsa::pkcs8::EncodePublicKey;
        use std::str::FromStr;
        use x509_cert::builder::{Builder, CertificateBuilder, Profile};

        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let signing = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(key.clone());
        let spki_der = key.to_public_key().to_public_key_der().unwrap();
        let cert = CertificateBuilder::new(
            Profile::Root,
            x509_cert::serial_number::SerialNumber::from(1u32),
            x509_cert::time::Validity::from_now(std::time::Duration::from_secs(3600)).unwrap(),
            x509_cert::name::Name::from_str("CN=Missing Field Test").unwrap(),
            x509_cert::spki::SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).unwrap(),
            &signing,
        )
        .unwrap()
        .build::<rsa::pkcs1v15::Signature>()
        .unwrap();

        let mut doc = Document::from_bytes(minimal_pdf()).unwrap();
        doc.set_field("No Such Field", FieldValue::Text("x".to_string()));
        // Field mutations ride inside a signature revision; without a plan
        // they are silently unused, so stage a plan to trigger the error.
        let signer = std::sync::Arc::new(crate::signatures::InMemorySigner::from_rsa(key));
        let plan = SignaturePlan::new(signer, cert.to_der().unwrap())
            .with_revocation(crate::signatures::RevocationPolicy::disabled());
        doc.add_signature(plan);
        let err = doc.finalize().unwrap_err();
        assert!(matches!(err, crate::error::Error::FieldNotFound(_)));
    }
}
