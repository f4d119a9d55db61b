//! CMS `SignedData` assembly and parsing (RFC 5652).
//!
//! Assembly produces the DER `ContentInfo` embedded in `/Contents`:
//! detached, `id-data` encapsulated content, exactly one `SignerInfo`, the
//! PAdES-required signed attributes (content-type, message-digest, ESS
//! signing-certificate-v2), optional signing-time and
//! `adbe-revocationInfoArchival`, and an optional unsigned
//! `signatureTimeStampToken`.
//!
//! Parsing is the verifier's inverse: it pulls the signer info, embedded
//! certificates, attribute values and the raw signed-attributes DER back
//! out of an arbitrary `/Contents` blob.

use crate::error::{Error, Result};
use crate::signatures::keys::{KeyAlgorithm, SigningKeypair};
use crate::signatures::oids;
use crate::signatures::revocation::RevocationBundle;
use crate::signatures::types::DigestAlgorithm;
use chrono::{DateTime, TimeZone, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::revocation::{RevocationInfoChoice, RevocationInfoChoices};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo,
    SignerInfos,
};
use der::asn1::{OctetString, SetOfVec};
use der::{Any, Decode, Encode};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::{Attribute, Attributes};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Time;
use x509_cert::Certificate;

/// ESSCertIDv2 (RFC 5035).
#[derive(Clone, Debug, der::Sequence)]
pub struct EssCertIdV2 {
    /// Hash algorithm; always SHA-256 here, written explicitly
    pub hash_algorithm: AlgorithmIdentifierOwned,
    /// Hash of the entire DER-encoded certificate
    pub cert_hash: OctetString,
    /// Issuer and serial binding
    #[asn1(optional = "true")]
    pub issuer_serial: Option<IssuerSerial>,
}

/// IssuerSerial (RFC 5035).
#[derive(Clone, Debug, der::Sequence)]
pub struct IssuerSerial {
    /// Issuer as GeneralNames
    pub issuer: Vec<GeneralName>,
    /// Certificate serial number
    pub serial_number: SerialNumber,
}

/// SigningCertificateV2 (RFC 5035).
#[derive(Clone, Debug, der::Sequence)]
pub struct SigningCertificateV2 {
    /// Certificates the signature commits to; first is the signer
    pub certs: Vec<EssCertIdV2>,
}

/// adbe-revocationInfoArchival (Adobe, carried as a signed attribute).
///
/// The members hold raw DER: `CertificateList`s under `crl` and full
/// `OCSPResponse`s under `ocsp`.
#[derive(Clone, Debug, Default, der::Sequence)]
pub struct RevocationInfoArchival {
    /// CRLs
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub crl: Option<Vec<Any>>,
    /// OCSP responses
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub ocsp: Option<Vec<Any>>,
    /// Other revocation formats (never produced here)
    #[asn1(context_specific = "2", tag_mode = "EXPLICIT", optional = "true")]
    pub other_rev_info: Option<Vec<Any>>,
}

/// Inputs to [`assemble_signature`].
pub struct CmsOptions<'a> {
    /// Digest over the ByteRange input
    pub digest: Vec<u8>,
    /// Message digest algorithm
    pub digest_algorithm: DigestAlgorithm,
    /// The signing capability
    pub keypair: &'a dyn SigningKeypair,
    /// DER signer certificate
    pub certificate_der: &'a [u8],
    /// DER chain hints
    pub chain_der: &'a [Vec<u8>],
    /// Claimed signing time; set only when no TSA is configured
    pub signing_time: Option<DateTime<Utc>>,
    /// Revocation evidence for the signer chain
    pub revocation: Option<&'a RevocationBundle>,
    /// Maps the signature value to an RFC 3161 token; `None` skips the
    /// unsigned timestamp attribute
    pub timestamp_provider: Option<&'a dyn Fn(&[u8]) -> Result<Vec<u8>>>,
}

/// Build the detached CMS `SignedData` for a ByteRange digest.
pub fn assemble_signature(opts: &CmsOptions<'_>) -> Result<Vec<u8>> {
    let signer_cert = Certificate::from_der(opts.certificate_der)
        .map_err(|e| Error::Certificate(format!("unreadable signer certificate: {}", e)))?;

    // --- Signed attributes -------------------------------------------------
    let mut attrs: Vec<Attribute> = Vec::new();
    attrs.push(attribute(
        oids::ID_CONTENT_TYPE,
        Any::encode_from(&oids::ID_DATA)?,
    )?);
    attrs.push(attribute(
        oids::ID_MESSAGE_DIGEST,
        Any::encode_from(&OctetString::new(opts.digest.clone())?)?,
    )?);
    attrs.push(attribute(
        oids::ID_AA_SIGNING_CERTIFICATE_V2,
        Any::encode_from(&signing_certificate_v2(&signer_cert, opts.certificate_der)?)?,
    )?);
    if let Some(time) = opts.signing_time {
        attrs.push(attribute(oids::ID_SIGNING_TIME, Any::encode_from(&utc_time(time)?)?)?);
    }
    if let Some(bundle) = opts.revocation {
        if !bundle.is_empty() {
            let archival = revocation_archival(bundle)?;
            attrs.push(attribute(
                oids::ID_ADBE_REVOCATION_INFO_ARCHIVAL,
                Any::encode_from(&archival)?,
            )?);
        }
    }
    let signed_attrs: Attributes =
        SetOfVec::try_from(attrs).map_err(|e| Error::Asn1(e.to_string()))?;

    // The signature covers the explicit SET OF encoding of the attributes.
    let attrs_der = signed_attrs.to_der()?;
    let attrs_digest = opts.digest_algorithm.digest(&attrs_der);

    // Ed25519 signs the message itself; everything else signs the digest.
    let sign_input = match opts.keypair.algorithm() {
        KeyAlgorithm::Ed25519 => attrs_der.as_slice(),
        _ => attrs_digest.as_slice(),
    };
    let signature_value = opts.keypair.sign(sign_input, opts.digest_algorithm)?;

    // --- Unsigned attributes ----------------------------------------------
    let unsigned_attrs = match &opts.timestamp_provider {
        Some(provider) => {
            let token = provider(&signature_value)?;
            let token_any = Any::from_der(&token)
                .map_err(|e| Error::Timestamp(format!("malformed TimeStampToken: {}", e)))?;
            let attr = attribute(oids::ID_AA_TIME_STAMP_TOKEN, token_any)?;
            Some(SetOfVec::try_from(vec![attr]).map_err(|e| Error::Asn1(e.to_string()))?)
        },
        None => None,
    };

    // --- SignerInfo --------------------------------------------------------
    let digest_alg = AlgorithmIdentifierOwned {
        oid: opts.digest_algorithm.oid(),
        parameters: Some(Any::null()),
    };
    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: signer_cert.tbs_certificate.issuer.clone(),
            serial_number: signer_cert.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: digest_alg.clone(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: opts.keypair.signature_algorithm(opts.digest_algorithm),
        signature: OctetString::new(signature_value)?,
        unsigned_attrs,
    };

    // --- SignedData --------------------------------------------------------
    let mut cert_choices = vec![CertificateChoices::Certificate(signer_cert)];
    for der_bytes in opts.chain_der {
        let cert = Certificate::from_der(der_bytes)
            .map_err(|e| Error::Certificate(format!("unreadable chain certificate: {}", e)))?;
        cert_choices.push(CertificateChoices::Certificate(cert));
    }

    let crls = match opts.revocation {
        Some(bundle) if !bundle.crls.is_empty() => {
            let mut choices = Vec::new();
            for crl_der in &bundle.crls {
                let crl = x509_cert::crl::CertificateList::from_der(crl_der)
                    .map_err(|e| Error::Certificate(format!("unreadable CRL: {}", e)))?;
                choices.push(RevocationInfoChoice::Crl(crl));
            }
            Some(RevocationInfoChoices(
                SetOfVec::try_from(choices).map_err(|e| Error::Asn1(e.to_string()))?,
            ))
        },
        _ => None,
    };

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![digest_alg])
            .map_err(|e| Error::Asn1(e.to_string()))?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: oids::ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(
            SetOfVec::try_from(cert_choices).map_err(|e| Error::Asn1(e.to_string()))?,
        )),
        crls,
        signer_infos: SignerInfos(
            SetOfVec::try_from(vec![signer_info]).map_err(|e| Error::Asn1(e.to_string()))?,
        ),
    };

    let content_info = ContentInfo {
        content_type: oids::ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };
    Ok(content_info.to_der()?)
}

fn attribute(oid: der::asn1::ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value]).map_err(|e| Error::Asn1(e.to_string()))?,
    })
}

fn signing_certificate_v2(cert: &Certificate, cert_der: &[u8]) -> Result<SigningCertificateV2> {
    // The ESS hash is always SHA-256, independent of the message digest.
    let cert_hash = DigestAlgorithm::Sha256.digest(cert_der);
    Ok(SigningCertificateV2 {
        certs: vec![EssCertIdV2 {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: oids::ID_SHA256,
                parameters: None,
            },
            cert_hash: OctetString::new(cert_hash)?,
            issuer_serial: Some(IssuerSerial {
                issuer: vec![GeneralName::DirectoryName(cert.tbs_certificate.issuer.clone())],
                serial_number: cert.tbs_certificate.serial_number.clone(),
            }),
        }],
    })
}

fn revocation_archival(bundle: &RevocationBundle) -> Result<RevocationInfoArchival> {
    let to_any = |items: &[Vec<u8>]| -> Result<Option<Vec<Any>>> {
        if items.is_empty() {
            return Ok(None);
        }
        let mut out = Vec::with_capacity(items.len());
        for der_bytes in items {
            out.push(Any::from_der(der_bytes).map_err(|e| Error::Asn1(e.to_string()))?);
        }
        Ok(Some(out))
    };
    Ok(RevocationInfoArchival {
        crl: to_any(&bundle.crls)?,
        ocsp: to_any(&bundle.ocsps)?,
        other_rev_info: None,
    })
}

fn utc_time(time: DateTime<Utc>) -> Result<Time> {
    let duration = std::time::Duration::from_secs(time.timestamp().max(0) as u64);
    // UTCTime covers 1950..2050; fall back to GeneralizedTime past that.
    if time.timestamp() < 2_524_608_000 {
        Ok(Time::UtcTime(
            der::asn1::UtcTime::from_unix_duration(duration).map_err(|e| Error::Asn1(e.to_string()))?,
        ))
    } else {
        Ok(Time::GeneralTime(
            der::asn1::GeneralizedTime::from_unix_duration(duration)
                .map_err(|e| Error::Asn1(e.to_string()))?,
        ))
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A `/Contents` blob pulled apart for verification.
pub struct ParsedSignature {
    /// The decoded SignedData
    pub signed_data: SignedData,
    /// The single SignerInfo
    pub signer_info: SignerInfo,
    /// Certificates embedded in the CMS, paired with their DER
    pub certificates: Vec<(Certificate, Vec<u8>)>,
    /// Message digest algorithm (policy-checked)
    pub digest_algorithm: DigestAlgorithm,
    /// The message-digest signed attribute value
    pub message_digest: Vec<u8>,
    /// DER of the signed attributes as covered by the signature
    pub signed_attrs_der: Vec<u8>,
    /// The SignerInfo signature value
    pub signature: Vec<u8>,
    /// signing-time attribute, when present
    pub signing_time: Option<DateTime<Utc>>,
    /// Raw DER of the unsigned signatureTimeStampToken, when present
    pub timestamp_token: Option<Vec<u8>>,
    /// Revocation evidence from adbe-revocationInfoArchival
    pub revocation: RevocationBundle,
}

impl ParsedSignature {
    /// The certificate matching the SignerInfo's sid, when embedded.
    pub fn signer_certificate(&self) -> Option<&Certificate> {
        match &self.signer_info.sid {
            SignerIdentifier::IssuerAndSerialNumber(isn) => {
                self.certificates.iter().map(|(c, _)| c).find(|c| {
                    c.tbs_certificate.issuer == isn.issuer
                        && c.tbs_certificate.serial_number == isn.serial_number
                })
            },
            SignerIdentifier::SubjectKeyIdentifier(ski) => {
                self.certificates.iter().map(|(c, _)| c).find(|c| {
                    certificate_ski(c).map(|id| id == ski.0.as_bytes()).unwrap_or(false)
                })
            },
        }
    }
}

/// Subject key identifier extension bytes of a certificate.
fn certificate_ski(cert: &Certificate) -> Option<Vec<u8>> {
    let exts = cert.tbs_certificate.extensions.as_ref()?;
    let ext = exts
        .iter()
        .find(|e| e.extn_id == der::asn1::ObjectIdentifier::new_unwrap("2.5.29.14"))?;
    let ski = x509_cert::ext::pkix::SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes()).ok()?;
    Some(ski.0.as_bytes().to_vec())
}

/// Length of the leading DER TLV in `bytes`.
///
/// `/Contents` slots are zero-padded past the DER, so decoding must stop at
/// the structure's own declared length.
pub fn der_prefix_len(bytes: &[u8]) -> Result<usize> {
    if bytes.len() < 2 {
        return Err(Error::Cms("truncated DER header".to_string()));
    }
    let first_len = bytes[1];
    let (header, len) = match first_len {
        n if n < 0x80 => (2usize, n as usize),
        0x80 => return Err(Error::Cms("indefinite length is not DER".to_string())),
        n => {
            let count = (n & 0x7F) as usize;
            if count > 8 || bytes.len() < 2 + count {
                return Err(Error::Cms("unreasonable DER length".to_string()));
            }
            let mut len = 0usize;
            for &b in &bytes[2..2 + count] {
                len = (len << 8) | b as usize;
            }
            (2 + count, len)
        },
    };
    let total = header + len;
    if total > bytes.len() {
        return Err(Error::Cms("DER length exceeds available bytes".to_string()));
    }
    Ok(total)
}

/// Parse a `/Contents` blob into its verification-relevant parts.
pub fn parse_signature(contents: &[u8]) -> Result<ParsedSignature> {
    let len = der_prefix_len(contents)?;
    let content_info = ContentInfo::from_der(&contents[..len])
        .map_err(|e| Error::Cms(format!("unreadable ContentInfo: {}", e)))?;
    if content_info.content_type != oids::ID_SIGNED_DATA {
        return Err(Error::Cms(format!(
            "unexpected content type {}",
            content_info.content_type
        )));
    }
    let signed_data: SignedData = content_info
        .content
        .decode_as()
        .map_err(|e| Error::Cms(format!("unreadable SignedData: {}", e)))?;

    let signer_info = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .cloned()
        .ok_or_else(|| Error::Cms("SignedData has no SignerInfo".to_string()))?;
    if signed_data.signer_infos.0.len() != 1 {
        log::warn!("SignedData carries {} SignerInfos; verifying the first", signed_data.signer_infos.0.len());
    }

    let digest_algorithm = DigestAlgorithm::from_oid(&signer_info.digest_alg.oid)?;

    let mut certificates = Vec::new();
    if let Some(set) = &signed_data.certificates {
        for choice in set.0.iter() {
            if let CertificateChoices::Certificate(cert) = choice {
                let der_bytes = cert.to_der()?;
                certificates.push((cert.clone(), der_bytes));
            }
        }
    }

    let signed_attrs = signer_info
        .signed_attrs
        .as_ref()
        .ok_or_else(|| Error::Cms("SignerInfo has no signed attributes".to_string()))?;
    let signed_attrs_der = signed_attrs.to_der()?;

    let message_digest = attr_value(signed_attrs, oids::ID_MESSAGE_DIGEST)
        .ok_or_else(|| Error::Cms("missing message-digest attribute".to_string()))?
        .decode_as::<OctetString>()
        .map_err(|e| Error::Cms(format!("bad message-digest attribute: {}", e)))?
        .as_bytes()
        .to_vec();

    let signing_time = attr_value(signed_attrs, oids::ID_SIGNING_TIME)
        .and_then(|any| any.to_der().ok())
        .and_then(|der| Time::from_der(&der).ok())
        .and_then(|t| Utc.timestamp_opt(t.to_unix_duration().as_secs() as i64, 0).single());

    let revocation = attr_value(signed_attrs, oids::ID_ADBE_REVOCATION_INFO_ARCHIVAL)
        .and_then(|any| any.decode_as::<RevocationInfoArchival>().ok())
        .map(|archival| RevocationBundle {
            crls: anys_to_der(archival.crl),
            ocsps: anys_to_der(archival.ocsp),
            certs: Vec::new(),
        })
        .unwrap_or_default();

    let timestamp_token = signer_info
        .unsigned_attrs
        .as_ref()
        .and_then(|attrs| attr_value(attrs, oids::ID_AA_TIME_STAMP_TOKEN))
        .and_then(|any| any.to_der().ok());

    Ok(ParsedSignature {
        signature: signer_info.signature.as_bytes().to_vec(),
        signer_info,
        certificates,
        digest_algorithm,
        message_digest,
        signed_attrs_der,
        signing_time,
        timestamp_token,
        revocation,
        signed_data,
    })
}

fn attr_value(attrs: &Attributes, oid: der::asn1::ObjectIdentifier) -> Option<&Any> {
    attrs
        .iter()
        .find(|a| a.oid == oid)
        .and_then(|a| a.values.iter().next())
}

fn anys_to_der(items: Option<Vec<Any>>) -> Vec<Vec<u8>> {
    items
        .unwrap_or_default()
        .iter()
        .filter_map(|any| any.to_der().ok())
        .collect()
}
