//! Core types for signature creation and verification.

use crate::error::{Error, Result};
use crate::signatures::appearance::SignatureAppearance;
use crate::signatures::keys::SigningKeypair;
use crate::signatures::oids;
use crate::signatures::revocation::RevocationPolicy;
use chrono::{DateTime, Utc};
use der::asn1::ObjectIdentifier;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::sync::Arc;
use std::time::Duration;

/// Digest algorithm used for signing.
///
/// SHA-1 is deliberately absent: policy rejects it for both creation and
/// verification, so it only ever appears as a diagnostic string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// The OID for this digest algorithm.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha256 => oids::ID_SHA256,
            DigestAlgorithm::Sha384 => oids::ID_SHA384,
            DigestAlgorithm::Sha512 => oids::ID_SHA512,
        }
    }

    /// Resolve a digest OID, rejecting SHA-1 by policy.
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        match *oid {
            o if o == oids::ID_SHA256 => Ok(DigestAlgorithm::Sha256),
            o if o == oids::ID_SHA384 => Ok(DigestAlgorithm::Sha384),
            o if o == oids::ID_SHA512 => Ok(DigestAlgorithm::Sha512),
            o if o == oids::ID_SHA1 => Err(Error::WeakAlgorithm("SHA-1".to_string())),
            other => Err(Error::Cms(format!("unsupported digest algorithm {}", other))),
        }
    }

    /// Hash `data` with this algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }
}

/// Signature sub-filter (the on-disk signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    CadesDetached,
    /// ETSI.RFC3161 - document timestamp token
    Rfc3161,
}

impl SignatureSubFilter {
    /// The PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::Rfc3161 => "ETSI.RFC3161",
        }
    }

    /// Parse a PDF name into a sub-filter.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            "ETSI.RFC3161" => Some(SignatureSubFilter::Rfc3161),
            _ => None,
        }
    }
}

/// The role a signature plays in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureType {
    /// Ordinary approval signature
    #[default]
    Approval,
    /// Certification signature; must be the first in the document
    Certification,
    /// RFC 3161 document timestamp (no signer key)
    DocumentTimestamp,
}

impl SignatureType {
    /// CLI spelling of the type.
    pub fn name(&self) -> &'static str {
        match self {
            SignatureType::Approval => "ApprovalSignature",
            SignatureType::Certification => "CertificationSignature",
            SignatureType::DocumentTimestamp => "DocumentTimestamp",
        }
    }

    /// Parse the CLI spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ApprovalSignature" => Some(SignatureType::Approval),
            "CertificationSignature" => Some(SignatureType::Certification),
            "DocumentTimestamp" => Some(SignatureType::DocumentTimestamp),
            _ => None,
        }
    }
}

/// DocMDP permission level attached to a certification signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MdpPermission {
    /// No changes allowed after certification
    NoChanges,
    /// Form filling and signing allowed
    #[default]
    AllowFormFilling,
    /// Form filling, signing and annotations allowed
    AllowFormFillingAndAnnotations,
}

impl MdpPermission {
    /// The `/P` value in the DocMDP transform parameters.
    pub fn as_p_value(&self) -> i64 {
        match self {
            MdpPermission::NoChanges => 1,
            MdpPermission::AllowFormFilling => 2,
            MdpPermission::AllowFormFillingAndAnnotations => 3,
        }
    }

    /// Parse a `/P` value.
    pub fn from_p_value(p: i64) -> Option<Self> {
        match p {
            1 => Some(MdpPermission::NoChanges),
            2 => Some(MdpPermission::AllowFormFilling),
            3 => Some(MdpPermission::AllowFormFillingAndAnnotations),
            _ => None,
        }
    }
}

/// PAdES (and neighbouring) signature profiles.
///
/// Unsupported profiles are representable so the gate can name them in its
/// error instead of failing to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureProfile {
    /// PAdES-B: basic signature
    #[default]
    PadesB,
    /// PAdES-B-T: basic + signature timestamp
    PadesBT,
    /// PAdES-B-LT: B-T + embedded revocation evidence (DSS)
    PadesBLt,
    /// PAdES-B-LTA: B-LT + document timestamp chains (not supported)
    PadesBLta,
    /// C2PA manifests (not supported)
    C2pa,
    /// JAdES-B-T (not supported)
    JadesBT,
}

impl SignatureProfile {
    /// Name used in errors and the CLI.
    pub fn name(&self) -> &'static str {
        match self {
            SignatureProfile::PadesB => "PAdES_B",
            SignatureProfile::PadesBT => "PAdES_B_T",
            SignatureProfile::PadesBLt => "PAdES_B_LT",
            SignatureProfile::PadesBLta => "PAdES_B_LTA",
            SignatureProfile::C2pa => "C2PA",
            SignatureProfile::JadesBT => "JAdES_B_T",
        }
    }

    /// Parse the profile name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PAdES_B" => Some(SignatureProfile::PadesB),
            "PAdES_B_T" => Some(SignatureProfile::PadesBT),
            "PAdES_B_LT" => Some(SignatureProfile::PadesBLt),
            "PAdES_B_LTA" => Some(SignatureProfile::PadesBLta),
            "C2PA" => Some(SignatureProfile::C2pa),
            "JAdES_B_T" => Some(SignatureProfile::JadesBT),
            _ => None,
        }
    }

    /// Whether this crate can produce the profile.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            SignatureProfile::PadesB | SignatureProfile::PadesBT | SignatureProfile::PadesBLt
        )
    }

    /// B-T and above require a signature timestamp.
    pub fn requires_timestamp(&self) -> bool {
        !matches!(self, SignatureProfile::PadesB)
    }

    /// B-LT and above require revocation evidence for every chain certificate.
    pub fn requires_revocation_evidence(&self) -> bool {
        matches!(self, SignatureProfile::PadesBLt | SignatureProfile::PadesBLta)
    }
}

/// Timestamp authority configuration.
#[derive(Debug, Clone)]
pub struct TsaConfig {
    /// HTTP(S) endpoint accepting `application/timestamp-query`
    pub url: String,
    /// Optional HTTP Basic auth user
    pub username: Option<String>,
    /// Optional HTTP Basic auth password
    pub password: Option<String>,
}

impl TsaConfig {
    /// Configure a TSA without credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    /// Attach HTTP Basic auth credentials.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Network behaviour for TSA / OCSP / CRL requests.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Pre-sign hook invoked after form mutations but before the signature
/// dictionary is placed, so it can append extra objects (initials widgets,
/// stamp XObjects) that end up covered by the signature.
pub type PreSignHook =
    Box<dyn FnOnce(&mut crate::signatures::appearance::PreSignContext<'_>) -> Result<()> + Send>;

/// A staged signing intent, executed by the orchestrator as one
/// incremental revision.
pub struct SignaturePlan {
    /// The signing capability. `None` only for [`SignatureType::DocumentTimestamp`].
    pub keypair: Option<Arc<dyn SigningKeypair>>,
    /// DER-encoded signer certificate
    pub certificate_der: Option<Vec<u8>>,
    /// DER-encoded chain hints (intermediates, optionally the root)
    pub chain_der: Vec<Vec<u8>>,
    /// Message digest algorithm
    pub digest_algorithm: DigestAlgorithm,
    /// On-disk signature format
    pub sub_filter: SignatureSubFilter,
    /// Approval / Certification / DocumentTimestamp
    pub signature_type: SignatureType,
    /// DocMDP permission for certification signatures
    pub mdp_permission: MdpPermission,
    /// Target profile
    pub profile: SignatureProfile,
    /// Reason for signing (`/Reason`)
    pub reason: Option<String>,
    /// Signing location (`/Location`)
    pub location: Option<String>,
    /// Contact information (`/ContactInfo`)
    pub contact_info: Option<String>,
    /// Signer name override (`/Name`); defaults to the certificate CN
    pub name: Option<String>,
    /// Timestamp authority endpoint
    pub tsa: Option<TsaConfig>,
    /// Custom timestamping capability; overrides the HTTP client built
    /// from `tsa` when set
    pub timestamp_authority: Option<Arc<dyn crate::signatures::timestamp::TimestampAuthority>>,
    /// Visible appearance; `None` produces an invisible signature
    pub appearance: Option<SignatureAppearance>,
    /// Revocation collection policy
    pub revocation: RevocationPolicy,
    /// Signature field name; defaults to `Signature{n}`
    pub field_name: Option<String>,
    /// Reserved `/Contents` capacity in DER bytes
    pub contents_capacity: usize,
    /// Hook adding extra objects before the placeholder is written
    pub before_sign: Option<PreSignHook>,
}

impl SignaturePlan {
    /// Plan an approval signature with the given capability and certificate.
    pub fn new(keypair: Arc<dyn SigningKeypair>, certificate_der: Vec<u8>) -> Self {
        Self {
            keypair: Some(keypair),
            certificate_der: Some(certificate_der),
            chain_der: Vec::new(),
            digest_algorithm: DigestAlgorithm::default(),
            sub_filter: SignatureSubFilter::default(),
            signature_type: SignatureType::Approval,
            mdp_permission: MdpPermission::default(),
            profile: SignatureProfile::default(),
            reason: None,
            location: None,
            contact_info: None,
            name: None,
            tsa: None,
            timestamp_authority: None,
            appearance: None,
            revocation: RevocationPolicy::default(),
            field_name: None,
            contents_capacity: 16 * 1024,
            before_sign: None,
        }
    }

    /// Plan a document timestamp. No signer key; the TSA is mandatory.
    pub fn document_timestamp(tsa: TsaConfig) -> Self {
        Self {
            keypair: None,
            certificate_der: None,
            chain_der: Vec::new(),
            digest_algorithm: DigestAlgorithm::default(),
            sub_filter: SignatureSubFilter::Rfc3161,
            signature_type: SignatureType::DocumentTimestamp,
            mdp_permission: MdpPermission::default(),
            profile: SignatureProfile::PadesB,
            reason: None,
            location: None,
            contact_info: None,
            name: None,
            tsa: Some(tsa),
            timestamp_authority: None,
            appearance: None,
            revocation: RevocationPolicy::default(),
            field_name: None,
            contents_capacity: 16 * 1024,
            before_sign: None,
        }
    }

    /// Set the certificate chain hints.
    pub fn with_chain(mut self, chain_der: Vec<Vec<u8>>) -> Self {
        self.chain_der = chain_der;
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Override the signer name shown in the signature dictionary.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Make this a certification signature with the given permission.
    pub fn certification(mut self, permission: MdpPermission) -> Self {
        self.signature_type = SignatureType::Certification;
        self.mdp_permission = permission;
        self
    }

    /// Select the target profile.
    pub fn with_profile(mut self, profile: SignatureProfile) -> Self {
        self.profile = profile;
        if profile.requires_timestamp() || matches!(profile, SignatureProfile::PadesBLt) {
            self.sub_filter = SignatureSubFilter::CadesDetached;
        }
        self
    }

    /// Configure a timestamp authority endpoint.
    pub fn with_tsa(mut self, tsa: TsaConfig) -> Self {
        self.tsa = Some(tsa);
        self
    }

    /// Install a custom timestamping capability.
    pub fn with_timestamp_authority(
        mut self,
        authority: Arc<dyn crate::signatures::timestamp::TimestampAuthority>,
    ) -> Self {
        self.timestamp_authority = Some(authority);
        self
    }

    /// Whether any timestamping capability is configured.
    pub fn has_timestamp_authority(&self) -> bool {
        self.tsa.is_some() || self.timestamp_authority.is_some()
    }

    /// Attach a visible appearance.
    pub fn with_appearance(mut self, appearance: SignatureAppearance) -> Self {
        self.appearance = Some(appearance);
        self
    }

    /// Set the revocation collection policy.
    pub fn with_revocation(mut self, policy: RevocationPolicy) -> Self {
        self.revocation = policy;
        self
    }

    /// Name the signature field explicitly.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    /// Install a pre-sign hook.
    pub fn with_before_sign(mut self, hook: PreSignHook) -> Self {
        self.before_sign = Some(hook);
        self
    }
}

impl std::fmt::Debug for SignaturePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignaturePlan")
            .field("keypair", &self.keypair.as_ref().map(|k| k.algorithm()))
            .field("certificate", &self.certificate_der.as_ref().map(|c| c.len()))
            .field("chain_len", &self.chain_der.len())
            .field("digest_algorithm", &self.digest_algorithm)
            .field("signature_type", &self.signature_type)
            .field("profile", &self.profile)
            .field("tsa", &self.tsa.as_ref().map(|t| t.url.as_str()))
            .finish_non_exhaustive()
    }
}

/// Record of one executed signature plan, returned by the orchestrator.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SignatureRecord {
    /// Signature field name in the document
    pub field_name: String,
    /// Signature type
    pub signature_type: String,
    /// Sub-filter written to disk
    pub sub_filter: String,
    /// Claimed signing time (`/M`)
    pub signed_at: DateTime<Utc>,
    /// Final ByteRange
    pub byte_range: [i64; 4],
    /// DER size of the embedded CMS
    pub cms_size: usize,
}

/// Where the verifier anchored validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    /// A valid embedded RFC 3161 timestamp
    EmbeddedTimestamp,
    /// The claimed signing time, trusted by configuration
    ClaimedSigningTime,
    /// A caller-supplied anchor time
    ProvidedTime,
    /// The current wall clock
    CurrentTime,
}

/// One certificate in a reported chain.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CertificateReport {
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Serial number, hex
    pub serial: String,
    /// Validity start
    pub not_before: Option<DateTime<Utc>>,
    /// Validity end
    pub not_after: Option<DateTime<Utc>>,
    /// Subject == issuer
    pub self_signed: bool,
    /// Public key algorithm
    pub key_algorithm: String,
    /// Public key size in bits, when determinable
    pub key_size: Option<usize>,
}

/// Per-signature verification verdict.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SignerReport {
    /// Signature field name
    pub field_name: String,
    /// Signer name (`/Name` or certificate CN)
    pub name: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// On-disk sub-filter
    pub sub_filter: Option<String>,
    /// Whether this is a document timestamp
    pub document_timestamp: bool,
    /// ByteRange as read
    pub byte_range: Vec<i64>,
    /// Whether the range extends to the end of the current file
    pub covers_document: bool,

    /// Digest + SignerInfo signature verify
    pub valid_signature: bool,
    /// Chain terminates in a trusted (or tolerated self-signed) root
    pub trusted_issuer: bool,
    /// Any chain certificate has authoritative revoked status
    pub revoked: bool,
    /// Revocation time precedes the validation time
    pub revoked_before_signing: bool,

    /// Timestamp token present
    pub timestamp_present: bool,
    /// Timestamp token cryptographically valid
    pub timestamp_valid: bool,
    /// TSA chain trusted
    pub timestamp_trusted: bool,
    /// Timestamp genTime
    pub timestamp_time: Option<DateTime<Utc>>,

    /// Claimed signing time (CMS attribute or `/M`)
    pub claimed_signing_time: Option<DateTime<Utc>>,
    /// Time the verdict was evaluated at
    pub validation_time: Option<DateTime<Utc>>,
    /// Where the validation time came from
    pub time_source: Option<TimeSource>,

    /// Digest algorithm diagnostics
    pub digest_algorithm: Option<String>,
    /// Public key algorithm diagnostics
    pub key_algorithm: Option<String>,
    /// Public key size in bits
    pub key_size: Option<usize>,

    /// Full resolved chain, leaf first
    pub certificate_chain: Vec<CertificateReport>,
    /// Non-fatal findings
    pub warnings: Vec<String>,
    /// Fatal findings for this signature
    pub errors: Vec<String>,

    /// Aggregate verdict for this signature
    pub valid: bool,
}

/// Whole-document verification report (the CLI's JSON body).
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerificationReport {
    /// Document metadata
    pub document_info: crate::document::DocumentInfo,
    /// One verdict per discovered signature, in field order
    pub signers: Vec<SignerReport>,
    /// True iff every signature's verdict is valid
    pub valid: bool,
}
