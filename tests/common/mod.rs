//! Shared fixtures: a minimal AcroForm PDF, an ad-hoc PKI, a local
//! timestamp authority, and CRL minting. Everything is generated in-process
//! so the suite never touches the network.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use der::asn1::{GeneralizedTime, OctetString};
use der::{Any, Decode, Encode};
use pades_oxide::signatures::timestamp::TimestampAuthority;
use pades_oxide::signatures::{DigestAlgorithm, InMemorySigner};
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use spki::AlgorithmIdentifierOwned;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate;

/// A single-page PDF with one AcroForm text field, matching the layout of
/// common fillable forms.
pub fn form_pdf() -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();
    buf.extend_from_slice(b"%PDF-1.7\n");
    let mut offsets = Vec::new();
    let objects = [
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /AcroForm 5 0 R >>\nendobj\n".to_string(),
        "2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n".to_string(),
        "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [4 0 R] >>\nendobj\n"
            .to_string(),
        "4 0 obj\n<< /Type /Annot /Subtype /Widget /FT /Tx /T (Given Name Text Box) /Rect [100 700 300 720] /P 3 0 R >>\nendobj\n"
            .to_string(),
        "5 0 obj\n<< /Fields [4 0 R] >>\nendobj\n".to_string(),
        "6 0 obj\n<< /Title (Fixture Form) /Author (Test Suite) >>\nendobj\n".to_string(),
    ];
    for obj in &objects {
        offsets.push(buf.len());
        buf.extend_from_slice(obj.as_bytes());
    }
    let xref_offset = buf.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for off in &offsets {
        xref.push_str(&format!("{:010} 00000 n \n", off));
    }
    buf.extend_from_slice(xref.as_bytes());
    buf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R /Info 6 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    buf
}

/// A self-signed signer identity: key plus leaf-profile certificate (KU
/// digitalSignature set, nonRepudiation not set).
pub struct TestIdentity {
    pub key: RsaPrivateKey,
    pub certificate: Certificate,
    pub certificate_der: Vec<u8>,
}

impl TestIdentity {
    pub fn generate(common_name: &str) -> Self {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("keygen");
        Self::from_key(common_name, key)
    }

    /// A self-signed CA (root profile: keyCertSign/cRLSign usage).
    pub fn generate_ca(common_name: &str) -> Self {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("keygen");
        let subject = Name::from_str(&format!("CN={}", common_name)).expect("subject DN");
        let signing_key = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(key.clone());
        let spki_der = key.to_public_key().to_public_key_der().expect("spki");
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).expect("spki parse");
        let certificate = CertificateBuilder::new(
            Profile::Root,
            SerialNumber::from(rand::random::<u32>()),
            Validity::from_now(Duration::from_secs(365 * 24 * 3600)).expect("validity"),
            subject,
            spki,
            &signing_key,
        )
        .expect("builder")
        .build::<rsa::pkcs1v15::Signature>()
        .expect("cert build");
        let certificate_der = certificate.to_der().expect("cert der");
        Self {
            key,
            certificate,
            certificate_der,
        }
    }

    pub fn from_key(common_name: &str, key: RsaPrivateKey) -> Self {
        let subject = Name::from_str(&format!("CN={}", common_name)).expect("subject DN");
        let signing_key = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(key.clone());
        let spki_der = key.to_public_key().to_public_key_der().expect("spki");
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).expect("spki parse");

        // Self-issued leaf: subject == issuer, but with end-entity key usage.
        let certificate = CertificateBuilder::new(
            Profile::Leaf {
                issuer: subject.clone(),
                enable_key_agreement: false,
                enable_key_encipherment: false,
            },
            SerialNumber::from(rand::random::<u32>()),
            Validity::from_now(Duration::from_secs(365 * 24 * 3600)).expect("validity"),
            subject,
            spki,
            &signing_key,
        )
        .expect("builder")
        .build::<rsa::pkcs1v15::Signature>()
        .expect("cert build");
        let certificate_der = certificate.to_der().expect("cert der");
        Self {
            key,
            certificate,
            certificate_der,
        }
    }

    pub fn signer(&self) -> Arc<InMemorySigner> {
        Arc::new(InMemorySigner::from_rsa(self.key.clone()))
    }

    pub fn subject(&self) -> Name {
        self.certificate.tbs_certificate.subject.clone()
    }
}

/// Mint a leaf certificate for a fresh key, signed by `ca`.
pub fn issue_leaf(ca: &TestIdentity, common_name: &str) -> TestIdentity {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("keygen");
    let subject = Name::from_str(&format!("CN={}", common_name)).expect("subject DN");
    let ca_signing_key = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(ca.key.clone());
    let spki_der = key.to_public_key().to_public_key_der().expect("spki");
    let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).expect("spki parse");

    let certificate = CertificateBuilder::new(
        Profile::Leaf {
            issuer: ca.subject(),
            enable_key_agreement: false,
            enable_key_encipherment: false,
        },
        SerialNumber::from(rand::random::<u32>()),
        Validity::from_now(Duration::from_secs(365 * 24 * 3600)).expect("validity"),
        subject,
        spki,
        &ca_signing_key,
    )
    .expect("builder")
    .build::<rsa::pkcs1v15::Signature>()
    .expect("cert build");
    let certificate_der = certificate.to_der().expect("cert der");
    TestIdentity {
        key,
        certificate,
        certificate_der,
    }
}

/// Append an incremental revision that installs CRLs into the DSS.
pub fn append_dss_crls(bytes: Vec<u8>, crls: Vec<Vec<u8>>) -> Vec<u8> {
    use pades_oxide::object::Object;
    use pades_oxide::signatures::revocation::RevocationBundle;
    use pades_oxide::writer::IncrementalUpdate;
    use pades_oxide::PdfDocument;
    use std::collections::HashMap;

    let doc = PdfDocument::from_bytes(bytes.clone()).unwrap();
    let mut update = IncrementalUpdate::new(&bytes, doc.next_object_id(), doc.last_xref_offset());
    let bundle = RevocationBundle {
        crls,
        ..Default::default()
    };
    let dss = pades_oxide::signatures::dss::build_dss(&doc, &mut update, &bundle).unwrap();

    let catalog_ref = doc.catalog_ref().unwrap();
    let mut catalog = doc.catalog().unwrap();
    catalog.insert("DSS".to_string(), dss);
    update.update_object(catalog_ref, Object::Dictionary(catalog));

    let mut trailer = HashMap::new();
    trailer.insert("Root".to_string(), Object::Reference(catalog_ref));
    update.finalize(trailer)
}

/// An in-process RFC 3161 authority that signs tokens with its own
/// self-signed certificate.
pub struct LocalTsa {
    pub identity: TestIdentity,
}

impl LocalTsa {
    pub fn new() -> Self {
        Self {
            identity: TestIdentity::generate("Fixture TSA"),
        }
    }
}

impl TimestampAuthority for LocalTsa {
    fn timestamp(
        &self,
        digest: &[u8],
        algorithm: DigestAlgorithm,
    ) -> pades_oxide::Result<Vec<u8>> {
        Ok(mint_timestamp_token(&self.identity, digest, algorithm, Utc::now()))
    }
}

/// Build a granted TimeStampToken over `digest`, signed by `identity`.
pub fn mint_timestamp_token(
    identity: &TestIdentity,
    digest: &[u8],
    algorithm: DigestAlgorithm,
    gen_time: DateTime<Utc>,
) -> Vec<u8> {
    use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
    use cms::content_info::{CmsVersion, ContentInfo};
    use cms::signed_data::{
        CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo,
        SignerInfos,
    };
    use der::asn1::SetOfVec;
    use x509_cert::attr::Attribute;
    use x509_tsp::{MessageImprint, TspVersion, TstInfo};

    let id_signed_data = der::asn1::ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
    let id_tst_info = der::asn1::ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");
    let id_content_type = der::asn1::ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
    let id_message_digest = der::asn1::ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

    let tst = TstInfo {
        version: TspVersion::V1,
        policy: der::asn1::ObjectIdentifier::new_unwrap("1.3.6.1.4.1.99999.1"),
        message_imprint: MessageImprint {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: algorithm.oid(),
                parameters: Some(Any::null()),
            },
            hashed_message: OctetString::new(digest.to_vec()).unwrap(),
        },
        serial_number: der::asn1::Int::new(&rand::random::<u32>().to_be_bytes()).unwrap(),
        gen_time: GeneralizedTime::from_unix_duration(Duration::from_secs(
            gen_time.timestamp().max(0) as u64,
        ))
        .unwrap(),
        accuracy: None,
        ordering: false,
        nonce: None,
        tsa: None,
        extensions: None,
    };
    let tst_der = tst.to_der().unwrap();

    // Signed attributes: content-type (TSTInfo) + message-digest over it.
    let attr = |oid, value: Any| Attribute {
        oid,
        values: SetOfVec::try_from(vec![value]).unwrap(),
    };
    let signed_attrs = SetOfVec::try_from(vec![
        attr(id_content_type, Any::encode_from(&id_tst_info).unwrap()),
        attr(
            id_message_digest,
            Any::encode_from(&OctetString::new(algorithm.digest(&tst_der)).unwrap()).unwrap(),
        ),
    ])
    .unwrap();
    let attrs_der = signed_attrs.to_der().unwrap();

    let attrs_digest = algorithm.digest(&attrs_der);
    let signature = identity
        .key
        .sign(rsa::Pkcs1v15Sign::new::<sha2::Sha256>(), &attrs_digest)
        .unwrap();

    let digest_alg = AlgorithmIdentifierOwned {
        oid: algorithm.oid(),
        parameters: Some(Any::null()),
    };
    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: identity.certificate.tbs_certificate.issuer.clone(),
            serial_number: identity.certificate.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: digest_alg.clone(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: AlgorithmIdentifierOwned {
            oid: der::asn1::ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1"),
            parameters: Some(Any::null()),
        },
        signature: OctetString::new(signature).unwrap(),
        unsigned_attrs: None,
    };

    let signed_data = SignedData {
        version: CmsVersion::V3,
        digest_algorithms: SetOfVec::try_from(vec![digest_alg]).unwrap(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: id_tst_info,
            econtent: Some(Any::encode_from(&OctetString::new(tst_der).unwrap()).unwrap()),
        },
        certificates: Some(CertificateSet(
            SetOfVec::try_from(vec![CertificateChoices::Certificate(
                identity.certificate.clone(),
            )])
            .unwrap(),
        )),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info]).unwrap()),
    };

    ContentInfo {
        content_type: id_signed_data,
        content: Any::encode_from(&signed_data).unwrap(),
    }
    .to_der()
    .unwrap()
}

/// Mint a CRL issued by `issuer` revoking `revoked_serial` at `revoked_at`.
pub fn mint_crl(
    issuer: &TestIdentity,
    revoked_serial: Option<(&SerialNumber, DateTime<Utc>)>,
    this_update: DateTime<Utc>,
) -> Vec<u8> {
    use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
    use x509_cert::time::Time;

    let to_time = |t: DateTime<Utc>| {
        Time::GeneralTime(
            GeneralizedTime::from_unix_duration(Duration::from_secs(t.timestamp().max(0) as u64))
                .unwrap(),
        )
    };

    let signature_algorithm = AlgorithmIdentifierOwned {
        oid: der::asn1::ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11"),
        parameters: Some(Any::null()),
    };
    let revoked_certificates = revoked_serial.map(|(serial, at)| {
        vec![RevokedCert {
            serial_number: serial.clone(),
            revocation_date: to_time(at),
            crl_entry_extensions: None,
        }]
    });
    let tbs = TbsCertList {
        version: x509_cert::certificate::Version::V2,
        signature: signature_algorithm.clone(),
        issuer: issuer.certificate.tbs_certificate.subject.clone(),
        this_update: to_time(this_update),
        next_update: Some(to_time(this_update + chrono::Duration::days(7))),
        revoked_certificates,
        crl_extensions: None,
    };
    let tbs_der = tbs.to_der().unwrap();
    let digest = DigestAlgorithm::Sha256.digest(&tbs_der);
    let signature = issuer
        .key
        .sign(rsa::Pkcs1v15Sign::new::<sha2::Sha256>(), &digest)
        .unwrap();

    CertificateList {
        tbs_cert_list: tbs,
        signature_algorithm,
        signature: der::asn1::BitString::from_bytes(&signature).unwrap(),
    }
    .to_der()
    .unwrap()
}

/// Serial-number helper for CRL fixtures.
pub fn serial_of(cert: &Certificate) -> SerialNumber {
    cert.tbs_certificate.serial_number.clone()
}
