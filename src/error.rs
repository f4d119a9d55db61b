//! Error types for the PAdES signature library.
//!
//! Variants are grouped by kind: input problems (the document), policy
//! violations (the staged plan), external-collaborator failures (signing
//! capability, TSA, OCSP/CRL), and cryptographic verification failures.
//! Verification never surfaces cryptographic failures as `Err`; they are
//! recorded on the per-signature verdict instead.

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during signing and verification.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // === Input errors: the document could not be read ===
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table: {0}")]
    InvalidXref(String),

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Named form field does not exist in the AcroForm tree
    #[error("Form field not found: {0}")]
    FieldNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unsupported feature (encrypted input, exotic filters, ...)
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    // === Policy errors: the staged plan is rejected before any bytes move ===
    /// Signature profile is not supported by this crate
    #[error("signature format {0} is not currently supported")]
    UnsupportedProfile(String),

    /// A Certification signature was staged after another signature
    #[error("a certification signature must be the first signature in the document")]
    CertificationNotFirst,

    /// The profile requires a timestamp but no TSA was configured
    #[error("profile {0} requires a Timestamp Authority URL")]
    TimestampRequired(String),

    /// The assembled CMS does not fit the reserved /Contents slot
    #[error("signature too large: {actual} bytes exceed the reserved {capacity}-byte slot")]
    SignatureTooLarge {
        /// DER size of the assembled CMS
        actual: usize,
        /// Maximum DER size the hex slot can hold
        capacity: usize,
    },

    /// An algorithm forbidden by policy was requested (e.g. SHA-1)
    #[error("algorithm rejected by policy: {0}")]
    WeakAlgorithm(String),

    /// The profile requires revocation evidence that could not be collected
    #[error("revocation evidence unavailable for {subject}: {reason}")]
    RevocationUnavailable {
        /// Certificate subject the evidence was needed for
        subject: String,
        /// Why collection failed
        reason: String,
    },

    // === External collaborator failures ===
    /// The signing capability failed to produce a signature
    #[error("signing capability error: {0}")]
    Signing(String),

    /// Timestamp authority failure (network, status, malformed token)
    #[error("timestamp authority error: {0}")]
    Timestamp(String),

    /// HTTP transport failure (TSA, OCSP, CRL)
    #[error("HTTP error: {0}")]
    Http(String),

    // === Cryptographic material errors ===
    /// ASN.1 / DER encoding or decoding failure
    #[error("ASN.1 error: {0}")]
    Asn1(String),

    /// CMS structure error
    #[error("CMS error: {0}")]
    Cms(String),

    /// X.509 certificate problem
    #[error("certificate error: {0}")]
    Certificate(String),
}

impl From<der::Error> for Error {
    fn from(e: der::Error) -> Self {
        Error::Asn1(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_message() {
        let err = Error::ParseError {
            offset: 1234,
            reason: "invalid token".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("1234"));
        assert!(msg.contains("invalid token"));
    }

    #[test]
    fn test_object_not_found_message() {
        let err = Error::ObjectNotFound(10, 0);
        assert!(format!("{}", err).contains("10 0 R"));
    }

    #[test]
    fn test_profile_gate_messages() {
        // The CLI surfaces these strings; keep them stable.
        let err = Error::TimestampRequired("PAdES_B_T".to_string());
        assert!(format!("{}", err).contains("requires a Timestamp Authority"));

        let err = Error::UnsupportedProfile("PAdES_B_LTA".to_string());
        assert!(format!("{}", err).contains("not currently supported"));
    }

    #[test]
    fn test_signature_too_large_message() {
        let err = Error::SignatureTooLarge {
            actual: 20000,
            capacity: 16384,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("20000"));
        assert!(msg.contains("16384"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
