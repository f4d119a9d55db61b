//! Signing capability and in-memory key backends.
//!
//! The engine consumes keys only through [`SigningKeypair`]: a public key
//! and a "given a digest, return a signature" operation. The in-memory
//! RSA / ECDSA / Ed25519 backends live here; PKCS#11, cloud-KMS and remote
//! CSC backends are out-of-crate implementations of the same trait. The
//! engine never sees private key material.

use crate::error::{Error, Result};
use crate::signatures::oids;
use crate::signatures::types::DigestAlgorithm;
use der::asn1::ObjectIdentifier;
use der::Decode;
use pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

/// Public key algorithm families the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    /// RSA with PKCS#1 v1.5 padding
    Rsa,
    /// ECDSA over P-256
    EcdsaP256,
    /// ECDSA over P-384
    EcdsaP384,
    /// Ed25519 (PureEdDSA)
    Ed25519,
}

impl KeyAlgorithm {
    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::EcdsaP256 => "ECDSA-P256",
            KeyAlgorithm::EcdsaP384 => "ECDSA-P384",
            KeyAlgorithm::Ed25519 => "Ed25519",
        }
    }
}

/// The signing capability consumed by the CMS assembler.
pub trait SigningKeypair: Send + Sync {
    /// Key algorithm family.
    fn algorithm(&self) -> KeyAlgorithm;

    /// DER-encoded SubjectPublicKeyInfo of the public key.
    fn public_key_der(&self) -> Result<Vec<u8>>;

    /// Produce a signature.
    ///
    /// `digest` is the already-computed message digest for RSA and ECDSA.
    /// Ed25519 has no prehashed mode, so callers pass the full message
    /// there instead; `digest_algorithm` is ignored by that backend.
    fn sign(&self, digest: &[u8], digest_algorithm: DigestAlgorithm) -> Result<Vec<u8>>;

    /// The SignerInfo `signatureAlgorithm` for this key and digest.
    fn signature_algorithm(&self, digest: DigestAlgorithm) -> AlgorithmIdentifierOwned {
        signature_algorithm_identifier(self.algorithm(), digest)
    }
}

/// AlgorithmIdentifier for a key/digest combination.
pub fn signature_algorithm_identifier(
    key: KeyAlgorithm,
    digest: DigestAlgorithm,
) -> AlgorithmIdentifierOwned {
    match key {
        // rsaEncryption with NULL parameters: the most widely accepted
        // spelling for PDF SignerInfos.
        KeyAlgorithm::Rsa => AlgorithmIdentifierOwned {
            oid: oids::ID_RSA_ENCRYPTION,
            parameters: Some(der::Any::null()),
        },
        KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384 => AlgorithmIdentifierOwned {
            oid: match digest {
                DigestAlgorithm::Sha256 => oids::ID_ECDSA_WITH_SHA256,
                DigestAlgorithm::Sha384 => oids::ID_ECDSA_WITH_SHA384,
                DigestAlgorithm::Sha512 => oids::ID_ECDSA_WITH_SHA512,
            },
            parameters: None,
        },
        KeyAlgorithm::Ed25519 => AlgorithmIdentifierOwned {
            oid: oids::ID_ED25519,
            parameters: None,
        },
    }
}

enum PrivateKey {
    Rsa(Box<RsaPrivateKey>),
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    Ed25519(Box<ed25519_dalek::SigningKey>),
}

/// An in-memory signing key.
pub struct InMemorySigner {
    key: PrivateKey,
}

impl InMemorySigner {
    /// Wrap an RSA private key.
    pub fn from_rsa(key: RsaPrivateKey) -> Self {
        Self {
            key: PrivateKey::Rsa(Box::new(key)),
        }
    }

    /// Wrap a P-256 signing key.
    pub fn from_p256(key: p256::ecdsa::SigningKey) -> Self {
        Self {
            key: PrivateKey::P256(key),
        }
    }

    /// Wrap a P-384 signing key.
    pub fn from_p384(key: p384::ecdsa::SigningKey) -> Self {
        Self {
            key: PrivateKey::P384(key),
        }
    }

    /// Wrap an Ed25519 signing key.
    pub fn from_ed25519(key: ed25519_dalek::SigningKey) -> Self {
        Self {
            key: PrivateKey::Ed25519(Box::new(key)),
        }
    }

    /// Load a private key from PEM or DER bytes.
    ///
    /// Accepts PKCS#8 (`PRIVATE KEY`) for every algorithm and PKCS#1
    /// (`RSA PRIVATE KEY`) for RSA.
    pub fn load(data: &[u8]) -> Result<Self> {
        if data.starts_with(b"-----BEGIN") {
            let text = std::str::from_utf8(data)
                .map_err(|_| Error::Signing("key PEM is not valid UTF-8".to_string()))?;
            let (label, doc) = pkcs8::SecretDocument::from_pem(text)
                .map_err(|e| Error::Signing(format!("unreadable key PEM: {}", e)))?;
            match label {
                "PRIVATE KEY" => Self::from_pkcs8_der(doc.as_bytes()),
                "RSA PRIVATE KEY" => {
                    RsaPrivateKey::from_pkcs1_der(doc.as_bytes())
                        .map(Self::from_rsa)
                        .map_err(|e| Error::Signing(format!("bad PKCS#1 key: {}", e)))
                },
                other => Err(Error::Signing(format!("unsupported key PEM label '{}'", other))),
            }
        } else {
            Self::from_pkcs8_der(data).or_else(|_| {
                RsaPrivateKey::from_pkcs1_der(data)
                    .map(Self::from_rsa)
                    .map_err(|e| Error::Signing(format!("unreadable key DER: {}", e)))
            })
        }
    }

    /// Load a PKCS#8 DER private key, dispatching on the algorithm OID.
    pub fn from_pkcs8_der(der_bytes: &[u8]) -> Result<Self> {
        let info = pkcs8::PrivateKeyInfo::try_from(der_bytes)
            .map_err(|e| Error::Signing(format!("bad PKCS#8 structure: {}", e)))?;
        let oid = info.algorithm.oid;

        if oid == oids::ID_RSA_ENCRYPTION {
            use rsa::pkcs8::DecodePrivateKey;
            return RsaPrivateKey::from_pkcs8_der(der_bytes)
                .map(Self::from_rsa)
                .map_err(|e| Error::Signing(format!("bad RSA key: {}", e)));
        }
        if oid == oids::ID_EC_PUBLIC_KEY {
            let curve = info
                .algorithm
                .parameters_oid()
                .map_err(|e| Error::Signing(format!("EC key missing curve: {}", e)))?;
            if curve == oids::ID_SECP256R1 {
                use p256::pkcs8::DecodePrivateKey;
                return p256::ecdsa::SigningKey::from_pkcs8_der(der_bytes)
                    .map(Self::from_p256)
                    .map_err(|e| Error::Signing(format!("bad P-256 key: {}", e)));
            }
            if curve == oids::ID_SECP384R1 {
                use p384::pkcs8::DecodePrivateKey;
                return p384::ecdsa::SigningKey::from_pkcs8_der(der_bytes)
                    .map(Self::from_p384)
                    .map_err(|e| Error::Signing(format!("bad P-384 key: {}", e)));
            }
            return Err(Error::Signing(format!("unsupported EC curve {}", curve)));
        }
        if oid == oids::ID_ED25519 {
            use ed25519_dalek::pkcs8::DecodePrivateKey;
            return ed25519_dalek::SigningKey::from_pkcs8_der(der_bytes)
                .map(Self::from_ed25519)
                .map_err(|e| Error::Signing(format!("bad Ed25519 key: {}", e)));
        }
        Err(Error::Signing(format!("unsupported key algorithm {}", oid)))
    }
}

impl SigningKeypair for InMemorySigner {
    fn algorithm(&self) -> KeyAlgorithm {
        match &self.key {
            PrivateKey::Rsa(_) => KeyAlgorithm::Rsa,
            PrivateKey::P256(_) => KeyAlgorithm::EcdsaP256,
            PrivateKey::P384(_) => KeyAlgorithm::EcdsaP384,
            PrivateKey::Ed25519(_) => KeyAlgorithm::Ed25519,
        }
    }

    fn public_key_der(&self) -> Result<Vec<u8>> {
        let doc = match &self.key {
            PrivateKey::Rsa(key) => key.to_public_key().to_public_key_der(),
            PrivateKey::P256(key) => {
                p256::PublicKey::from(key.verifying_key()).to_public_key_der()
            },
            PrivateKey::P384(key) => {
                p384::PublicKey::from(key.verifying_key()).to_public_key_der()
            },
            PrivateKey::Ed25519(key) => key.verifying_key().to_public_key_der(),
        };
        doc.map(|d| d.as_bytes().to_vec())
            .map_err(|e| Error::Signing(format!("cannot export public key: {}", e)))
    }

    fn sign(&self, digest: &[u8], digest_algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        match &self.key {
            PrivateKey::Rsa(key) => {
                let padding = match digest_algorithm {
                    DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
                    DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
                    DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
                };
                key.sign(padding, digest)
                    .map_err(|e| Error::Signing(format!("RSA signing failed: {}", e)))
            },
            PrivateKey::P256(key) => {
                let sig: p256::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|e| Error::Signing(format!("P-256 signing failed: {}", e)))?;
                Ok(sig.to_der().as_bytes().to_vec())
            },
            PrivateKey::P384(key) => {
                let sig: p384::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|e| Error::Signing(format!("P-384 signing failed: {}", e)))?;
                Ok(sig.to_der().as_bytes().to_vec())
            },
            PrivateKey::Ed25519(key) => {
                // `digest` carries the full message for PureEdDSA.
                use ed25519_dalek::Signer;
                Ok(key.sign(digest).to_bytes().to_vec())
            },
        }
    }
}

impl std::fmt::Debug for InMemorySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySigner")
            .field("algorithm", &self.algorithm().name())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Key family and size, read from a SubjectPublicKeyInfo.
pub fn spki_key_info(spki: &SubjectPublicKeyInfoOwned) -> (Option<KeyAlgorithm>, Option<usize>) {
    let oid = spki.algorithm.oid;
    if oid == oids::ID_RSA_ENCRYPTION {
        let bits = spki
            .subject_public_key
            .as_bytes()
            .and_then(|raw| RsaPublicKey::from_pkcs1_der(raw).ok())
            .map(|key| rsa::traits::PublicKeyParts::n(&key).bits());
        return (Some(KeyAlgorithm::Rsa), bits);
    }
    if oid == oids::ID_EC_PUBLIC_KEY {
        let curve = spki
            .algorithm
            .parameters
            .as_ref()
            .and_then(|p| p.decode_as::<ObjectIdentifier>().ok());
        return match curve {
            Some(c) if c == oids::ID_SECP256R1 => (Some(KeyAlgorithm::EcdsaP256), Some(256)),
            Some(c) if c == oids::ID_SECP384R1 => (Some(KeyAlgorithm::EcdsaP384), Some(384)),
            _ => (None, None),
        };
    }
    if oid == oids::ID_ED25519 {
        return (Some(KeyAlgorithm::Ed25519), Some(256));
    }
    (None, None)
}

/// Verify a signature with a public key in SPKI form.
///
/// `message` is the exact signed byte string (DER of the signed attributes);
/// `digest` is its hash under `digest_algorithm`. RSA and ECDSA verify the
/// digest, Ed25519 verifies the message. Returns `Ok(false)` on a bad
/// signature and `Err` only when the key material itself is unusable.
pub fn verify_with_spki(
    spki_der: &[u8],
    message: &[u8],
    digest: &[u8],
    signature_bytes: &[u8],
    digest_algorithm: DigestAlgorithm,
) -> Result<bool> {
    let spki = SubjectPublicKeyInfoOwned::from_der(spki_der)
        .map_err(|e| Error::Certificate(format!("bad SubjectPublicKeyInfo: {}", e)))?;
    let raw = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| Error::Certificate("public key has unused bits".to_string()))?;

    let oid = spki.algorithm.oid;
    if oid == oids::ID_RSA_ENCRYPTION {
        let key = RsaPublicKey::from_pkcs1_der(raw)
            .map_err(|e| Error::Certificate(format!("bad RSA public key: {}", e)))?;
        let padding = match digest_algorithm {
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
            DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
            DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
        };
        return Ok(key.verify(padding, digest, signature_bytes).is_ok());
    }
    if oid == oids::ID_EC_PUBLIC_KEY {
        let curve = spki
            .algorithm
            .parameters
            .as_ref()
            .and_then(|p| p.decode_as::<ObjectIdentifier>().ok())
            .ok_or_else(|| Error::Certificate("EC key missing curve parameter".to_string()))?;
        if curve == oids::ID_SECP256R1 {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(raw)
                .map_err(|e| Error::Certificate(format!("bad P-256 public key: {}", e)))?;
            let sig = match p256::ecdsa::Signature::from_der(signature_bytes) {
                Ok(sig) => sig,
                Err(_) => return Ok(false),
            };
            return Ok(key.verify_prehash(digest, &sig).is_ok());
        }
        if curve == oids::ID_SECP384R1 {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(raw)
                .map_err(|e| Error::Certificate(format!("bad P-384 public key: {}", e)))?;
            let sig = match p384::ecdsa::Signature::from_der(signature_bytes) {
                Ok(sig) => sig,
                Err(_) => return Ok(false),
            };
            return Ok(key.verify_prehash(digest, &sig).is_ok());
        }
        return Err(Error::Certificate(format!("unsupported EC curve {}", curve)));
    }
    if oid == oids::ID_ED25519 {
        let key_bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| Error::Certificate("bad Ed25519 public key length".to_string()))?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| Error::Certificate(format!("bad Ed25519 public key: {}", e)))?;
        let sig = match ed25519_dalek::Signature::from_slice(signature_bytes) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };
        return Ok(key.verify_strict(message, &sig).is_ok());
    }
    Err(Error::Certificate(format!("unsupported public key algorithm {}", oid)))
}
