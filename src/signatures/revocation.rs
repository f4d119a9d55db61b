//! Revocation evidence collection and evaluation (OCSP + CRL).
//!
//! Collection is best-effort by default: fetch failures degrade to
//! warnings, and the orchestrator upgrades missing evidence to an error
//! only for profiles that require it (PAdES-B-LT and above). The cache is
//! the one component designed for concurrent use; writes are serialised by
//! an internal mutex.

use crate::error::{Error, Result};
use crate::signatures::chain;
use crate::signatures::oids;
use crate::signatures::types::{DigestAlgorithm, NetworkConfig};
use chrono::{DateTime, TimeZone, Utc};
use der::{Decode, Encode};
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use x509_cert::crl::CertificateList;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::Certificate;
use x509_ocsp::{BasicOcspResponse, CertId, CertStatus, OcspRequest, OcspResponse, OcspResponseStatus, Request, TbsRequest, Version};

/// Which mechanism produced a piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationSource {
    /// OCSP responder
    Ocsp,
    /// Certificate revocation list
    Crl,
}

/// Collection policy for one signing plan.
#[derive(Clone)]
pub struct RevocationPolicy {
    /// Fetch and embed OCSP responses
    pub embed_ocsp: bool,
    /// Fetch and embed CRLs
    pub embed_crl: bool,
    /// Try CRL before OCSP
    pub prefer_crl: bool,
    /// Stop after the first fetched artifact per certificate
    pub stop_on_success: bool,
    /// Shared response cache
    pub cache: Option<Arc<RevocationCache>>,
}

impl Default for RevocationPolicy {
    fn default() -> Self {
        Self {
            embed_ocsp: true,
            embed_crl: true,
            prefer_crl: false,
            stop_on_success: true,
            cache: None,
        }
    }
}

impl std::fmt::Debug for RevocationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationPolicy")
            .field("embed_ocsp", &self.embed_ocsp)
            .field("embed_crl", &self.embed_crl)
            .field("prefer_crl", &self.prefer_crl)
            .field("stop_on_success", &self.stop_on_success)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl RevocationPolicy {
    /// OCSP only.
    pub fn ocsp_only() -> Self {
        Self {
            embed_crl: false,
            ..Default::default()
        }
    }

    /// CRL only.
    pub fn crl_only() -> Self {
        Self {
            embed_ocsp: false,
            prefer_crl: true,
            ..Default::default()
        }
    }

    /// Disable collection entirely.
    pub fn disabled() -> Self {
        Self {
            embed_ocsp: false,
            embed_crl: false,
            ..Default::default()
        }
    }

    /// Prefer CRL over OCSP.
    pub fn with_prefer_crl(mut self, prefer: bool) -> Self {
        self.prefer_crl = prefer;
        self
    }

    /// Keep fetching the alternate source after a success.
    pub fn with_stop_on_success(mut self, stop: bool) -> Self {
        self.stop_on_success = stop;
        self
    }

    /// Attach a shared cache.
    pub fn with_cache(mut self, cache: Arc<RevocationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn sources(&self) -> Vec<RevocationSource> {
        let mut order = Vec::new();
        if self.prefer_crl {
            if self.embed_crl {
                order.push(RevocationSource::Crl);
            }
            if self.embed_ocsp {
                order.push(RevocationSource::Ocsp);
            }
        } else {
            if self.embed_ocsp {
                order.push(RevocationSource::Ocsp);
            }
            if self.embed_crl {
                order.push(RevocationSource::Crl);
            }
        }
        order
    }
}

/// Raw revocation artifacts, DER-encoded.
#[derive(Debug, Clone, Default)]
pub struct RevocationBundle {
    /// Full `OCSPResponse`s
    pub ocsps: Vec<Vec<u8>>,
    /// `CertificateList`s
    pub crls: Vec<Vec<u8>>,
    /// Certificates accompanying the evidence (DSS use)
    pub certs: Vec<Vec<u8>>,
}

impl RevocationBundle {
    /// No artifacts at all.
    pub fn is_empty(&self) -> bool {
        self.ocsps.is_empty() && self.crls.is_empty() && self.certs.is_empty()
    }

    /// Merge another bundle's artifacts into this one.
    pub fn merge(&mut self, other: RevocationBundle) {
        self.ocsps.extend(other.ocsps);
        self.crls.extend(other.crls);
        self.certs.extend(other.certs);
    }
}

type CacheKey = (Vec<u8>, Vec<u8>, RevocationSource);

/// TTL cache for fetched revocation artifacts, keyed by
/// `(issuer key hash, serial, source)`.
///
/// Safe for concurrent use; per-key writes are serialised by the map mutex.
pub struct RevocationCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, (Instant, Vec<u8>)>>,
}

impl RevocationCache {
    /// Create a cache with the given entry TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a live entry.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let entries = self.entries.lock().ok()?;
        let (stored_at, data) = entries.get(key)?;
        if stored_at.elapsed() < self.ttl {
            Some(data.clone())
        } else {
            None
        }
    }

    /// Store an entry.
    pub fn put(&self, key: CacheKey, data: Vec<u8>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (Instant::now(), data));
        }
    }

    /// Number of live entries (expired ones are counted until overwritten).
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cache_key(cert: &Certificate, issuer: &Certificate, source: RevocationSource) -> Result<CacheKey> {
    let issuer_key = issuer_key_hash(issuer)?;
    let serial = cert.tbs_certificate.serial_number.as_bytes().to_vec();
    Ok((issuer_key, serial, source))
}

/// Build the (certificate, issuer) pairs for a leaf-first chain, skipping
/// the self-signed terminal.
pub fn chain_pairs(chain: &[(Certificate, Vec<u8>)]) -> Vec<(&Certificate, &Certificate)> {
    let mut pairs = Vec::new();
    for (i, (cert, _)) in chain.iter().enumerate() {
        if chain::is_self_signed(cert) {
            continue;
        }
        if let Some((issuer, _)) = chain.get(i + 1) {
            pairs.push((cert, issuer));
        }
    }
    pairs
}

/// Collect evidence for an ordered list of (certificate, issuer) pairs.
///
/// Network failures are recorded as warnings, never errors; callers enforce
/// profile requirements on the returned bundle.
pub fn collect(
    pairs: &[(&Certificate, &Certificate)],
    policy: &RevocationPolicy,
    network: &NetworkConfig,
) -> (RevocationBundle, Vec<String>) {
    let mut bundle = RevocationBundle::default();
    let mut warnings = Vec::new();

    for (cert, issuer) in pairs {
        let subject = cert.tbs_certificate.subject.to_string();
        let mut fetched = false;
        for source in policy.sources() {
            if fetched && policy.stop_on_success {
                break;
            }
            let outcome = match source {
                RevocationSource::Ocsp => fetch_ocsp_cached(cert, issuer, policy, network)
                    .map(|der| bundle.ocsps.push(der)),
                RevocationSource::Crl => fetch_crl_cached(cert, issuer, policy, network)
                    .map(|der| bundle.crls.push(der)),
            };
            match outcome {
                Ok(()) => fetched = true,
                Err(e) => {
                    log::warn!("revocation fetch ({:?}) failed for '{}': {}", source, subject, e);
                    warnings.push(format!(
                        "no {:?} evidence for '{}': {}",
                        source, subject, e
                    ));
                },
            }
        }
        if !fetched {
            warnings.push(format!("no revocation evidence collected for '{}'", subject));
        }
    }
    (bundle, warnings)
}

/// Certificates in `pairs` that have no artifact in `bundle`, used to
/// enforce PAdES-B-LT's evidence requirement.
pub fn missing_evidence(
    pairs: &[(&Certificate, &Certificate)],
    bundle: &RevocationBundle,
) -> Vec<String> {
    pairs
        .iter()
        .filter(|(cert, issuer)| {
            let status = evaluate(cert, Some(issuer), bundle, Utc::now());
            !status.has_evidence
        })
        .map(|(cert, _)| cert.tbs_certificate.subject.to_string())
        .collect()
}

fn fetch_ocsp_cached(
    cert: &Certificate,
    issuer: &Certificate,
    policy: &RevocationPolicy,
    network: &NetworkConfig,
) -> Result<Vec<u8>> {
    let key = cache_key(cert, issuer, RevocationSource::Ocsp)?;
    if let Some(cache) = &policy.cache {
        if let Some(hit) = cache.get(&key) {
            log::debug!("OCSP cache hit for {:?}", hex::encode(&key.1));
            return Ok(hit);
        }
    }
    let der = fetch_ocsp(cert, issuer, network)?;
    if let Some(cache) = &policy.cache {
        cache.put(key, der.clone());
    }
    Ok(der)
}

fn fetch_crl_cached(
    cert: &Certificate,
    issuer: &Certificate,
    policy: &RevocationPolicy,
    network: &NetworkConfig,
) -> Result<Vec<u8>> {
    let key = cache_key(cert, issuer, RevocationSource::Crl)?;
    if let Some(cache) = &policy.cache {
        if let Some(hit) = cache.get(&key) {
            return Ok(hit);
        }
    }
    let der = fetch_crl(cert, network)?;
    if let Some(cache) = &policy.cache {
        cache.put(key, der.clone());
    }
    Ok(der)
}

/// The OCSP responder URL from the certificate's AIA extension.
pub fn ocsp_url(cert: &Certificate) -> Option<String> {
    use x509_cert::ext::pkix::AuthorityInfoAccessSyntax;
    let raw = chain::extension_bytes(cert, &oids::ID_PE_AUTHORITY_INFO_ACCESS)?;
    let aia = AuthorityInfoAccessSyntax::from_der(raw).ok()?;
    aia.0.iter().find_map(|desc| {
        if desc.access_method != oids::ID_AD_OCSP {
            return None;
        }
        match &desc.access_location {
            GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
            _ => None,
        }
    })
}

/// CRL distribution point URLs declared in the certificate.
pub fn crl_urls(cert: &Certificate) -> Vec<String> {
    use x509_cert::ext::pkix::name::DistributionPointName;
    use x509_cert::ext::pkix::CrlDistributionPoints;
    let raw = match chain::extension_bytes(cert, &oids::ID_CE_CRL_DISTRIBUTION_POINTS) {
        Some(raw) => raw,
        None => return Vec::new(),
    };
    let dps = match CrlDistributionPoints::from_der(raw) {
        Ok(dps) => dps,
        Err(_) => return Vec::new(),
    };
    let mut urls = Vec::new();
    for dp in dps.0.iter() {
        if let Some(DistributionPointName::FullName(names)) = &dp.distribution_point {
            for name in names {
                if let GeneralName::UniformResourceIdentifier(uri) = name {
                    urls.push(uri.to_string());
                }
            }
        }
    }
    urls
}

/// SHA-256 over the issuer's subject public key bits (RFC 6960 CertID).
fn issuer_key_hash(issuer: &Certificate) -> Result<Vec<u8>> {
    let bits = issuer
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| Error::Certificate("issuer key has unused bits".to_string()))?;
    Ok(Sha256::digest(bits).to_vec())
}

fn cert_id(cert: &Certificate, issuer: &Certificate) -> Result<CertId> {
    let name_der = issuer.tbs_certificate.subject.to_der()?;
    Ok(CertId {
        hash_algorithm: AlgorithmIdentifierOwned {
            oid: DigestAlgorithm::Sha256.oid(),
            parameters: Some(der::Any::null()),
        },
        issuer_name_hash: der::asn1::OctetString::new(Sha256::digest(&name_der).to_vec())?,
        issuer_key_hash: der::asn1::OctetString::new(issuer_key_hash(issuer)?)?,
        serial_number: cert.tbs_certificate.serial_number.clone(),
    })
}

/// Fetch an OCSP response for one certificate. Returns the full
/// `OCSPResponse` DER after checking it is successful and parseable.
pub fn fetch_ocsp(
    cert: &Certificate,
    issuer: &Certificate,
    network: &NetworkConfig,
) -> Result<Vec<u8>> {
    let url = ocsp_url(cert).ok_or_else(|| {
        Error::Http("certificate declares no OCSP responder".to_string())
    })?;

    let request = OcspRequest {
        tbs_request: TbsRequest {
            version: Version::V1,
            requestor_name: None,
            request_list: vec![Request {
                req_cert: cert_id(cert, issuer)?,
                single_request_extensions: None,
            }],
            request_extensions: None,
        },
        optional_signature: None,
    };
    let body = request.to_der()?;

    log::debug!("querying OCSP responder {}", url);
    let client = reqwest::blocking::Client::builder()
        .timeout(network.timeout)
        .build()?;
    // RFC 6960 A.1: requests up to 255 bytes may ride in a GET path as
    // URL-safe base64, which lets responder-side caches work; larger
    // requests use POST.
    let response = if body.len() <= 255 {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&body);
        let separator = if url.ends_with('/') { "" } else { "/" };
        client
            .get(format!("{}{}{}", url, separator, urlencode(&encoded)))
            .send()?
    } else {
        client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/ocsp-request")
            .body(body)
            .send()?
    };
    if !response.status().is_success() {
        return Err(Error::Http(format!("OCSP responder returned HTTP {}", response.status())));
    }
    let bytes = response.bytes()?.to_vec();

    // Parse once so garbage is rejected before it is embedded anywhere.
    let parsed = OcspResponse::from_der(&bytes)
        .map_err(|e| Error::Asn1(format!("malformed OCSPResponse: {}", e)))?;
    if parsed.response_status != OcspResponseStatus::Successful {
        return Err(Error::Http(format!(
            "OCSP responder status {:?}",
            parsed.response_status
        )));
    }
    Ok(bytes)
}

/// Percent-encode the characters base64 can put in a path segment.
fn urlencode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '+' => out.push_str("%2B"),
            '/' => out.push_str("%2F"),
            '=' => out.push_str("%3D"),
            other => out.push(other),
        }
    }
    out
}

/// Fetch the first reachable CRL declared by the certificate.
pub fn fetch_crl(cert: &Certificate, network: &NetworkConfig) -> Result<Vec<u8>> {
    let urls = crl_urls(cert);
    if urls.is_empty() {
        return Err(Error::Http("certificate declares no CRL distribution point".to_string()));
    }
    let client = reqwest::blocking::Client::builder()
        .timeout(network.timeout)
        .build()?;
    let mut last_error = None;
    for url in urls {
        log::debug!("fetching CRL from {}", url);
        match client.get(&url).send().and_then(|r| r.error_for_status()) {
            Ok(response) => match response.bytes() {
                Ok(bytes) => {
                    let bytes = bytes.to_vec();
                    CertificateList::from_der(&bytes)
                        .map_err(|e| Error::Asn1(format!("malformed CRL: {}", e)))?;
                    return Ok(bytes);
                },
                Err(e) => last_error = Some(Error::from(e)),
            },
            Err(e) => last_error = Some(Error::from(e)),
        }
    }
    Err(last_error.unwrap_or_else(|| Error::Http("no CRL distribution point reachable".to_string())))
}

/// Outcome of evaluating evidence for one certificate.
#[derive(Debug, Clone, Default)]
pub struct RevocationStatus {
    /// Authoritative evidence was found
    pub has_evidence: bool,
    /// The evidence says the certificate is revoked
    pub revoked: bool,
    /// When it was revoked
    pub revocation_time: Option<DateTime<Utc>>,
    /// Which mechanism answered
    pub source: Option<RevocationSource>,
}

/// Evaluate a bundle's evidence for one certificate.
///
/// OCSP answers win over CRLs; "unknown" OCSP status is not authoritative.
pub fn evaluate(
    cert: &Certificate,
    issuer: Option<&Certificate>,
    bundle: &RevocationBundle,
    _at: DateTime<Utc>,
) -> RevocationStatus {
    let serial = &cert.tbs_certificate.serial_number;
    let key_hash = issuer.and_then(|i| issuer_key_hash(i).ok());

    for ocsp_der in &bundle.ocsps {
        let Some(basic) = basic_response(ocsp_der) else {
            continue;
        };
        for single in &basic.tbs_response_data.responses {
            if single.cert_id.serial_number != *serial {
                continue;
            }
            if let Some(hash) = &key_hash {
                // Hash algorithms other than ours can't be compared; fall
                // back to the serial match alone.
                let matches = single.cert_id.issuer_key_hash.as_bytes() == hash.as_slice()
                    || single.cert_id.hash_algorithm.oid != DigestAlgorithm::Sha256.oid();
                if !matches {
                    continue;
                }
            }
            match &single.cert_status {
                CertStatus::Good(_) => {
                    return RevocationStatus {
                        has_evidence: true,
                        revoked: false,
                        revocation_time: None,
                        source: Some(RevocationSource::Ocsp),
                    };
                },
                CertStatus::Revoked(info) => {
                    let time = Utc
                        .timestamp_opt(info.revocation_time.0.to_unix_duration().as_secs() as i64, 0)
                        .single();
                    return RevocationStatus {
                        has_evidence: true,
                        revoked: true,
                        revocation_time: time,
                        source: Some(RevocationSource::Ocsp),
                    };
                },
                CertStatus::Unknown(_) => {
                    // Inconclusive; keep looking.
                },
            }
        }
    }

    for crl_der in &bundle.crls {
        let Ok(crl) = CertificateList::from_der(crl_der) else {
            continue;
        };
        if crl.tbs_cert_list.issuer != cert.tbs_certificate.issuer {
            continue;
        }
        let revoked_entry = crl
            .tbs_cert_list
            .revoked_certificates
            .as_ref()
            .and_then(|list| list.iter().find(|r| r.serial_number == *serial));
        match revoked_entry {
            Some(entry) => {
                let time = Utc
                    .timestamp_opt(entry.revocation_date.to_unix_duration().as_secs() as i64, 0)
                    .single();
                return RevocationStatus {
                    has_evidence: true,
                    revoked: true,
                    revocation_time: time,
                    source: Some(RevocationSource::Crl),
                };
            },
            None => {
                return RevocationStatus {
                    has_evidence: true,
                    revoked: false,
                    revocation_time: None,
                    source: Some(RevocationSource::Crl),
                };
            },
        }
    }

    RevocationStatus::default()
}

/// Decode the BasicOCSPResponse out of a full OCSPResponse.
fn basic_response(ocsp_der: &[u8]) -> Option<BasicOcspResponse> {
    let response = OcspResponse::from_der(ocsp_der).ok()?;
    if response.response_status != OcspResponseStatus::Successful {
        return None;
    }
    let bytes = response.response_bytes?;
    if bytes.response_type != oids::ID_PKIX_OCSP_BASIC {
        return None;
    }
    BasicOcspResponse::from_der(bytes.response.as_bytes()).ok()
}
