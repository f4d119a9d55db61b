//! PDF digital signatures: PAdES creation and verification.
//!
//! Signing is the placeholder-then-patch pipeline of ISO 32000-1 §12.8: an
//! incremental revision carrying a signature dictionary with reserved
//! `/ByteRange` and `/Contents` slots, patched in place once the revision's
//! bytes are final. The CMS lives in [`cms`], external collaborators
//! (timestamp authorities, OCSP responders, CRL distribution points) in
//! [`timestamp`] and [`revocation`], and the multi-axis verdict machinery
//! in [`verifier`].
//!
//! ## Signature types supported
//!
//! - Approval signatures (`adbe.pkcs7.detached` / `ETSI.CAdES.detached`)
//! - Certification signatures with DocMDP permission levels
//! - Document timestamps (`ETSI.RFC3161`)
//!
//! ## Profiles
//!
//! PAdES-B, PAdES-B-T (signature timestamp), PAdES-B-LT (embedded
//! revocation evidence + DSS). B-LTA is recognised but not produced.

pub mod appearance;
pub mod byterange;
pub mod chain;
pub mod cms;
pub mod dss;
pub mod keys;
pub mod oids;
pub mod revocation;
pub mod signer;
pub mod timestamp;
pub mod types;
pub mod verifier;

pub use appearance::SignatureAppearance;
pub use keys::{InMemorySigner, KeyAlgorithm, SigningKeypair};
pub use revocation::{RevocationCache, RevocationPolicy};
pub use signer::execute_plans;
pub use types::{
    DigestAlgorithm, MdpPermission, NetworkConfig, SignaturePlan, SignatureProfile,
    SignatureRecord, SignatureSubFilter, SignatureType, SignerReport, TimeSource, TsaConfig,
    VerificationReport,
};
pub use verifier::{SignatureValidator, VerifyOptions};
