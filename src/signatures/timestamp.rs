//! RFC 3161 Time-Stamp Protocol client.
//!
//! Sends a `TimeStampReq` for a digest over HTTP (content type
//! `application/timestamp-query`), accepts only granted responses, checks
//! the nonce echo, and returns the embedded `TimeStampToken` DER: itself a
//! CMS `SignedData` whose encapsulated content is a `TSTInfo`.

use crate::error::{Error, Result};
use crate::signatures::oids;
use crate::signatures::types::{DigestAlgorithm, NetworkConfig, TsaConfig};
use chrono::{DateTime, TimeZone, Utc};
use cms::signed_data::SignedData;
use der::asn1::{Int, OctetString};
use der::{Decode, Encode};
use spki::AlgorithmIdentifierOwned;
use cmpv2::status::PkiStatus;
use x509_tsp::{MessageImprint, TimeStampReq, TimeStampResp, TspVersion, TstInfo};

/// HTTP content type of the request body.
pub const CONTENT_TYPE_REQUEST: &str = "application/timestamp-query";
/// HTTP content type of the response body.
pub const CONTENT_TYPE_RESPONSE: &str = "application/timestamp-reply";

/// A timestamping capability: digest in, `TimeStampToken` DER out.
///
/// The RFC 3161 HTTP client is the production implementation; test
/// fixtures and alternative transports implement the same trait.
pub trait TimestampAuthority: Send + Sync {
    /// Obtain a token committing to `digest` under `algorithm`.
    fn timestamp(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>>;
}

/// The RFC 3161-over-HTTP authority.
pub struct HttpTimestampAuthority {
    config: TsaConfig,
    network: NetworkConfig,
}

impl HttpTimestampAuthority {
    /// Wrap a TSA endpoint configuration.
    pub fn new(config: TsaConfig, network: NetworkConfig) -> Self {
        Self { config, network }
    }
}

impl TimestampAuthority for HttpTimestampAuthority {
    fn timestamp(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        request_timestamp(&self.config, &self.network, digest, algorithm)
    }
}

/// Request a timestamp token over the given digest.
///
/// Returns the DER of the `TimeStampToken` ContentInfo.
pub fn request_timestamp(
    tsa: &TsaConfig,
    network: &NetworkConfig,
    digest: &[u8],
    algorithm: DigestAlgorithm,
) -> Result<Vec<u8>> {
    let nonce: [u8; 8] = rand::random();
    let request = TimeStampReq {
        version: TspVersion::V1,
        message_imprint: MessageImprint {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: algorithm.oid(),
                parameters: Some(der::Any::null()),
            },
            hashed_message: OctetString::new(digest.to_vec())?,
        },
        req_policy: None,
        nonce: Some(Int::new(&nonce)?),
        cert_req: true,
        extensions: None,
    };
    let body = request.to_der()?;

    log::debug!("requesting timestamp from {}", tsa.url);
    let client = reqwest::blocking::Client::builder()
        .timeout(network.timeout)
        .build()?;
    let mut http = client
        .post(&tsa.url)
        .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_REQUEST)
        .body(body);
    if let Some(user) = &tsa.username {
        http = http.basic_auth(user, tsa.password.as_deref());
    }
    let response = http.send()?;
    if !response.status().is_success() {
        return Err(Error::Timestamp(format!(
            "TSA returned HTTP {}",
            response.status()
        )));
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.starts_with(CONTENT_TYPE_RESPONSE) {
        return Err(Error::Timestamp(format!(
            "TSA returned unexpected content type '{}'",
            content_type
        )));
    }

    let body = response.bytes()?;
    extract_granted_token(&body, Some(&nonce))
}

/// Parse a `TimeStampResp`, require granted status, verify the nonce echo,
/// and return the token's DER.
pub fn extract_granted_token(response_der: &[u8], nonce: Option<&[u8]>) -> Result<Vec<u8>> {
    let response = TimeStampResp::from_der(response_der)
        .map_err(|e| Error::Timestamp(format!("malformed TimeStampResp: {}", e)))?;

    match response.status.status {
        PkiStatus::Accepted | PkiStatus::GrantedWithMods => {},
        other => {
            return Err(Error::Timestamp(format!(
                "TSA rejected the request: {:?}",
                other
            )));
        },
    }

    let token = response
        .time_stamp_token
        .ok_or_else(|| Error::Timestamp("granted response carries no token".to_string()))?;
    let token_der = token.to_der()?;

    if let Some(sent) = nonce {
        let tst = tst_info_from_token(&token_der)?.0;
        match &tst.nonce {
            Some(echoed) if trim_leading_zeros(echoed.as_bytes()) == trim_leading_zeros(sent) => {},
            Some(_) => return Err(Error::Timestamp("TSA nonce mismatch".to_string())),
            // A granted token without a nonce echo is tolerated by some
            // authorities; treat it as a soft failure.
            None => log::warn!("TSA did not echo the request nonce"),
        }
    }
    Ok(token_der)
}

/// A closure mapping a signature value to its timestamp token, for the CMS
/// assembler's unsigned-attribute step.
pub fn token_provider(
    authority: &dyn TimestampAuthority,
    algorithm: DigestAlgorithm,
) -> impl Fn(&[u8]) -> Result<Vec<u8>> + '_ {
    move |signature_value: &[u8]| {
        let digest = algorithm.digest(signature_value);
        authority.timestamp(&digest, algorithm)
    }
}

/// Decode the `TSTInfo` (and its exact DER bytes) from a token's ContentInfo.
pub fn tst_info_from_token(token_der: &[u8]) -> Result<(TstInfo, Vec<u8>)> {
    let content_info = cms::content_info::ContentInfo::from_der(token_der)
        .map_err(|e| Error::Timestamp(format!("malformed TimeStampToken: {}", e)))?;
    if content_info.content_type != oids::ID_SIGNED_DATA {
        return Err(Error::Timestamp("token is not a SignedData".to_string()));
    }
    let signed_data: SignedData = content_info
        .content
        .decode_as()
        .map_err(|e| Error::Timestamp(format!("unreadable token SignedData: {}", e)))?;
    tst_info_from_signed_data(&signed_data)
}

/// Decode the `TSTInfo` carried as a SignedData's encapsulated content.
pub fn tst_info_from_signed_data(signed_data: &SignedData) -> Result<(TstInfo, Vec<u8>)> {
    if signed_data.encap_content_info.econtent_type != oids::ID_CT_TST_INFO {
        return Err(Error::Timestamp(format!(
            "token content type is {}, not TSTInfo",
            signed_data.encap_content_info.econtent_type
        )));
    }
    let econtent = signed_data
        .encap_content_info
        .econtent
        .as_ref()
        .ok_or_else(|| Error::Timestamp("token SignedData is detached".to_string()))?;
    let inner = econtent
        .decode_as::<OctetString>()
        .map_err(|e| Error::Timestamp(format!("bad TSTInfo wrapper: {}", e)))?;
    let bytes = inner.as_bytes().to_vec();
    let tst = TstInfo::from_der(&bytes)
        .map_err(|e| Error::Timestamp(format!("malformed TSTInfo: {}", e)))?;
    Ok((tst, bytes))
}

/// The token's generation time as UTC.
pub fn tst_gen_time(tst: &TstInfo) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(tst.gen_time.to_unix_duration().as_secs() as i64, 0)
        .single()
}

/// The digest algorithm and value the token commits to.
pub fn tst_message_imprint(tst: &TstInfo) -> Result<(DigestAlgorithm, Vec<u8>)> {
    let algorithm = DigestAlgorithm::from_oid(&tst.message_imprint.hash_algorithm.oid)?;
    Ok((algorithm, tst.message_imprint.hashed_message.as_bytes().to_vec()))
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encoding_roundtrip() {
        let request = TimeStampReq {
            version: TspVersion::V1,
            message_imprint: MessageImprint {
                hash_algorithm: AlgorithmIdentifierOwned {
                    oid: oids::ID_SHA256,
                    parameters: Some(der::Any::null()),
                },
                hashed_message: OctetString::new(vec![0xAA; 32]).unwrap(),
            },
            req_policy: None,
            nonce: Some(Int::new(&[0x01, 0x02, 0x03]).unwrap()),
            cert_req: true,
            extensions: None,
        };
        let der_bytes = request.to_der().unwrap();
        let decoded = TimeStampReq::from_der(&der_bytes).unwrap();
        assert!(decoded.cert_req);
        assert_eq!(decoded.message_imprint.hashed_message.as_bytes(), &[0xAA; 32]);
    }

    #[test]
    fn test_trim_leading_zeros() {
        assert_eq!(trim_leading_zeros(&[0, 0, 1, 2]), &[1, 2]);
        assert_eq!(trim_leading_zeros(&[1, 2]), &[1, 2]);
        assert!(trim_leading_zeros(&[0, 0]).is_empty());
    }

    #[test]
    fn test_rejection_status_is_fatal() {
        use cmpv2::status::PkiStatusInfo;
        let response = TimeStampResp {
            status: PkiStatusInfo {
                status: PkiStatus::Rejection,
                status_string: None,
                fail_info: None,
            },
            time_stamp_token: None,
        };
        let der_bytes = response.to_der().unwrap();
        assert!(matches!(
            extract_granted_token(&der_bytes, None),
            Err(Error::Timestamp(_))
        ));
    }

    #[test]
    fn test_granted_without_token_is_fatal() {
        use cmpv2::status::PkiStatusInfo;
        let response = TimeStampResp {
            status: PkiStatusInfo {
                status: PkiStatus::Accepted,
                status_string: None,
                fail_info: None,
            },
            time_stamp_token: None,
        };
        let der_bytes = response.to_der().unwrap();
        assert!(extract_granted_token(&der_bytes, None).is_err());
    }
}
