//! Shared fixtures: generated CSCAs, DSCs, CRLs and assembled SODs.
//!
//! Everything is generated in-process (no binary fixture files): rcgen for
//! X.509 material, the der/cms stack for SOD assembly, ring for the SOD
//! signature.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::ContentInfo;
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{ObjectIdentifier, OctetString, SetOfVec};
use der::{Any, Decode, Encode, Sequence};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose,
    RevokedCertParams, SerialNumber,
};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use x509_cert::attr::Attribute;
use x509_cert::spki::AlgorithmIdentifierOwned;

use local_pkd::models::{CertType, CertificateRecord, CrlRecord, RevokedEntry};

pub const OID_SHA256: &str = "2.16.840.1.101.3.4.2.1";
const OID_ECDSA_SHA256: &str = "1.2.840.10045.4.3.2";
const OID_SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
const OID_LDS_SECURITY_OBJECT: &str = "2.23.136.1.1.1";
const OID_ATTR_CONTENT_TYPE: &str = "1.2.840.113549.1.9.3";
const OID_ATTR_MESSAGE_DIGEST: &str = "1.2.840.113549.1.9.4";

fn odt(ts: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(ts.timestamp()).expect("timestamp in range")
}

/// A CA able to sign leaves and CRLs.
pub struct CaFixture {
    pub params: CertificateParams,
    pub key: KeyPair,
    pub der: Vec<u8>,
    pub country: String,
}

impl CaFixture {
    fn issuer(&self) -> Issuer<'static, KeyPair> {
        let key = KeyPair::try_from(self.key.serialize_der()).expect("valid key der");
        Issuer::new(self.params.clone(), key)
    }
}

fn dn(country: &str, organization: &str, common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, country);
    dn.push(DnType::OrganizationName, organization);
    dn.push(DnType::CommonName, common_name);
    dn
}

/// Self-signed CSCA with the given validity window.
pub fn make_csca(
    country: &str,
    common_name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> CaFixture {
    let key = KeyPair::generate().expect("generate CA key");
    let mut params = CertificateParams::default();
    params.distinguished_name = dn(country, "GOV", common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.serial_number = Some(SerialNumber::from(vec![0x01]));
    params.not_before = odt(not_before);
    params.not_after = odt(not_after);
    let cert = params.self_signed(&key).expect("self-sign CSCA");
    CaFixture {
        der: cert.der().to_vec(),
        params,
        key,
        country: country.to_string(),
    }
}

/// DSC signed by `ca`, returning the DER and its PKCS#8 key (for SOD
/// signing).
pub fn make_dsc(
    ca: &CaFixture,
    common_name: &str,
    serial: &[u8],
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> (Vec<u8>, Vec<u8>) {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
        .expect("generate DSC key");
    let key = KeyPair::try_from(pkcs8.as_ref()).expect("rcgen key from PKCS#8");

    let mut params = CertificateParams::default();
    params.distinguished_name = dn(&ca.country, "GOV", common_name);
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.serial_number = Some(SerialNumber::from(serial.to_vec()));
    params.not_before = odt(not_before);
    params.not_after = odt(not_after);

    let issuer = ca.issuer();
    let cert = params.signed_by(&key, &issuer).expect("sign DSC");
    (cert.der().to_vec(), pkcs8.as_ref().to_vec())
}

/// Master List Signer certificate (EKU 2.23.136.1.1.9), signed by `ca`.
/// Returns the DER plus the signer's PKCS#8 key.
pub fn make_mlsc(ca: &CaFixture, common_name: &str) -> (Vec<u8>, Vec<u8>) {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
        .expect("generate MLSC key");
    let key = KeyPair::try_from(pkcs8.as_ref()).expect("rcgen key from PKCS#8");
    let mut params = CertificateParams::default();
    params.distinguished_name = dn(&ca.country, "GOV", common_name);
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    // ICAO Master List Signer EKU.
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::Other(vec![2, 23, 136, 1, 1, 9])];
    params.serial_number = Some(SerialNumber::from(vec![0x7F]));
    params.not_before = odt(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    params.not_after = odt(Utc.with_ymd_and_hms(2034, 1, 1, 0, 0, 0).unwrap());
    let issuer = ca.issuer();
    let cert = params.signed_by(&key, &issuer).expect("sign MLSC");
    (cert.der().to_vec(), pkcs8.as_ref().to_vec())
}

/// CRL issued by `ca` with the given revoked serials.
pub fn make_crl(
    ca: &CaFixture,
    revoked_serials: &[&[u8]],
    this_update: DateTime<Utc>,
    next_update: DateTime<Utc>,
) -> Vec<u8> {
    let params = CertificateRevocationListParams {
        this_update: odt(this_update),
        next_update: odt(next_update),
        crl_number: SerialNumber::from(vec![0x01]),
        issuing_distribution_point: None,
        revoked_certs: revoked_serials
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: SerialNumber::from(serial.to_vec()),
                revocation_time: odt(this_update),
                reason_code: Some(rcgen::RevocationReason::KeyCompromise),
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    let issuer = ca.issuer();
    let crl = params.signed_by(&issuer).expect("sign CRL");
    crl.der().to_vec()
}

#[derive(Clone, Debug, Sequence)]
struct DataGroupHash {
    data_group_number: u64,
    data_group_hash_value: OctetString,
}

#[derive(Clone, Debug, Sequence)]
struct LdsSecurityObject {
    version: u64,
    hash_algorithm: AlgorithmIdentifierOwned,
    data_group_hash_values: Vec<DataGroupHash>,
}

fn oid(s: &str) -> ObjectIdentifier {
    s.parse().expect("valid OID")
}

/// Assemble a CMS SignedData with signed attributes over `econtent`, signed
/// by the certificate whose PKCS#8 key is given. Additional certificates
/// ride along in the certificate set after the signer.
fn build_signed_cms(
    econtent_type: &str,
    econtent: Vec<u8>,
    signer_der: &[u8],
    signer_pkcs8: &[u8],
    extra_certs: &[Vec<u8>],
) -> Vec<u8> {
    let message_digest = Sha256::digest(&econtent).to_vec();
    let attrs: Vec<Attribute> = vec![
        Attribute {
            oid: oid(OID_ATTR_CONTENT_TYPE),
            values: SetOfVec::try_from(vec![
                Any::encode_from(&oid(econtent_type)).expect("encode content type")
            ])
            .expect("attribute values"),
        },
        Attribute {
            oid: oid(OID_ATTR_MESSAGE_DIGEST),
            values: SetOfVec::try_from(vec![Any::encode_from(
                &OctetString::new(message_digest).expect("octet string"),
            )
            .expect("encode message digest")])
            .expect("attribute values"),
        },
    ];
    let signed_attrs: SetOfVec<Attribute> =
        SetOfVec::try_from(attrs).expect("signed attributes set");
    let attrs_der = signed_attrs.to_der().expect("encode signed attributes");

    let rng = SystemRandom::new();
    let signing_key = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, signer_pkcs8, &rng)
        .expect("CMS signing key");
    let signature = signing_key.sign(&rng, &attrs_der).expect("sign CMS");

    let signer = x509_cert::Certificate::from_der(signer_der).expect("parse signer certificate");
    let signer_info = SignerInfo {
        version: cms::content_info::CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: signer.tbs_certificate.issuer.clone(),
            serial_number: signer.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: AlgorithmIdentifierOwned {
            oid: oid(OID_SHA256),
            parameters: None,
        },
        signed_attrs: Some(signed_attrs),
        signature_algorithm: AlgorithmIdentifierOwned {
            oid: oid(OID_ECDSA_SHA256),
            parameters: None,
        },
        signature: OctetString::new(signature.as_ref().to_vec()).expect("signature value"),
        unsigned_attrs: None,
    };

    let mut cert_choices = vec![CertificateChoices::Certificate(signer)];
    for der in extra_certs {
        cert_choices.push(CertificateChoices::Certificate(
            x509_cert::Certificate::from_der(der).expect("parse embedded certificate"),
        ));
    }

    let signed_data = SignedData {
        version: cms::content_info::CmsVersion::V3,
        digest_algorithms: SetOfVec::try_from(vec![AlgorithmIdentifierOwned {
            oid: oid(OID_SHA256),
            parameters: None,
        }])
        .expect("digest algorithms"),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: oid(econtent_type),
            econtent: Some(
                Any::encode_from(&OctetString::new(econtent).expect("econtent octets"))
                    .expect("encode econtent"),
            ),
        },
        certificates: Some(CertificateSet(
            SetOfVec::try_from(cert_choices).expect("certificate set"),
        )),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info]).expect("signer infos")),
    };

    let content_info = ContentInfo {
        content_type: oid(OID_SIGNED_DATA),
        content: Any::encode_from(&signed_data).expect("encode SignedData"),
    };
    content_info.to_der().expect("encode ContentInfo")
}

/// Assemble a signed SOD for the given data groups. `wrap` adds the outer
/// application Tag 0x77.
pub fn build_sod(
    dsc_der: &[u8],
    dsc_pkcs8: &[u8],
    data_groups: &[(u8, &[u8])],
    wrap: bool,
) -> Vec<u8> {
    let lds = LdsSecurityObject {
        version: 0,
        hash_algorithm: AlgorithmIdentifierOwned {
            oid: oid(OID_SHA256),
            parameters: None,
        },
        data_group_hash_values: data_groups
            .iter()
            .map(|(number, content)| DataGroupHash {
                data_group_number: *number as u64,
                data_group_hash_value: OctetString::new(Sha256::digest(content).to_vec())
                    .expect("octet string"),
            })
            .collect(),
    };
    let econtent = lds.to_der().expect("encode LDS Security Object");
    let body = build_signed_cms(OID_LDS_SECURITY_OBJECT, econtent, dsc_der, dsc_pkcs8, &[]);

    if wrap {
        wrap_application_77(&body)
    } else {
        body
    }
}

/// CscaMasterList ::= SEQUENCE { version INTEGER, certList SET OF Certificate }
#[derive(Clone, Debug, Sequence)]
struct CscaMasterList {
    version: u64,
    cert_list: SetOfVec<Any>,
}

const OID_ICAO_MASTER_LIST: &str = "2.23.136.1.1.2";

/// Assemble a signed ICAO Master List carrying the given CSCA certificates.
pub fn build_master_list(
    mlsc_der: &[u8],
    mlsc_pkcs8: &[u8],
    csca_ders: &[Vec<u8>],
) -> Vec<u8> {
    let cert_list = SetOfVec::try_from(
        csca_ders
            .iter()
            .map(|der| Any::from_der(der).expect("certificate as Any"))
            .collect::<Vec<_>>(),
    )
    .expect("master list certificate set");
    let list = CscaMasterList {
        version: 0,
        cert_list,
    };
    let econtent = list.to_der().expect("encode CscaMasterList");
    build_signed_cms(OID_ICAO_MASTER_LIST, econtent, mlsc_der, mlsc_pkcs8, &[])
}

/// Prepend the ICAO application Tag 0x77 wrapper.
pub fn wrap_application_77(body: &[u8]) -> Vec<u8> {
    let mut out = vec![0x77];
    let len = body.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.push(0x81);
        out.push(len as u8);
    } else {
        out.push(0x82);
        out.push((len >> 8) as u8);
        out.push((len & 0xFF) as u8);
    }
    out.extend_from_slice(body);
    out
}

/// Build a store-shaped certificate record from DER the same way the ingest
/// pipeline does.
pub fn record_from_der(der: &[u8], cert_type: CertType) -> CertificateRecord {
    use local_pkd::crypto::x509::{extract_metadata, fingerprint_hex, normalize_dn_for_comparison};

    let metadata = extract_metadata(der).expect("metadata");
    CertificateRecord {
        id: uuid::Uuid::new_v4(),
        fingerprint: fingerprint_hex(der),
        der: der.to_vec(),
        cert_type,
        country: metadata.subject_country.clone().unwrap_or_default(),
        subject_dn_normalized: normalize_dn_for_comparison(&metadata.subject_dn),
        issuer_dn_normalized: normalize_dn_for_comparison(&metadata.issuer_dn),
        subject_dn: metadata.subject_dn,
        issuer_dn: metadata.issuer_dn,
        serial: metadata.serial,
        not_before: metadata.not_before,
        not_after: metadata.not_after,
        signature_algorithm_oid: metadata.signature_algorithm_oid,
        signature_hash_algorithm: metadata.signature_hash_algorithm,
        public_key_algorithm: metadata.public_key_algorithm,
        public_key_size: metadata.public_key_size,
        public_key_curve: metadata.public_key_curve,
        ski: metadata.ski,
        aki: metadata.aki,
        is_ca: metadata.is_ca,
        path_len_constraint: metadata.path_len_constraint,
        key_usage: metadata.key_usage,
        extended_key_usage: metadata.extended_key_usage,
        crl_distribution_points: metadata.crl_distribution_points,
        ocsp_url: metadata.ocsp_url,
        self_signed: metadata.self_signed,
        source_verified: true,
        stored_in_directory: false,
        deleted: false,
        first_ingested_at: Utc::now(),
        source_upload_id: None,
    }
}

/// CRL record shaped the way the ingest pipeline persists it.
pub fn crl_record_from_der(der: &[u8]) -> CrlRecord {
    use local_pkd::crypto::x509::{fingerprint_hex, normalize_dn_for_comparison, parse_crl_info};

    let info = parse_crl_info(der).expect("CRL info");
    CrlRecord {
        id: uuid::Uuid::new_v4(),
        fingerprint: fingerprint_hex(der),
        der: der.to_vec(),
        issuer_dn_normalized: normalize_dn_for_comparison(&info.issuer_dn),
        issuer_dn: info.issuer_dn,
        country: info.issuer_country.unwrap_or_default(),
        this_update: info.this_update,
        next_update: info.next_update,
        crl_number: info.crl_number,
        revoked: info
            .revoked
            .into_iter()
            .map(|r| RevokedEntry {
                serial: r.serial,
                revoked_at: r.revoked_at,
                reason: r.reason,
            })
            .collect(),
        stored_in_directory: false,
        first_ingested_at: Utc::now(),
        source_upload_id: None,
    }
}
