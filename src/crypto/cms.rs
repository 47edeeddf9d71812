//! CMS SignedData handling: ICAO SODs, Master Lists and Deviation Lists.
//!
//! The outer structure is RFC 5652 SignedData; SODs may additionally carry an
//! application Tag 0x77 wrapper which is stripped idempotently before
//! parsing.

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier};
use der::asn1::{ObjectIdentifier, OctetString, SetOfVec};
use der::{Any, Decode, Encode, Sequence};
use sha2::{Digest, Sha256, Sha384, Sha512};
use x509_parser::prelude::{FromDer, X509Certificate};

use super::signature::{verify_with_spki, VerifyOutcome};
use crate::error::{PkdError, Result};

pub const OID_SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
pub const OID_ICAO_LDS_SECURITY_OBJECT: &str = "2.23.136.1.1.1";
pub const OID_ICAO_MASTER_LIST: &str = "2.23.136.1.1.2";
pub const OID_ICAO_DEVIATION_LIST: &str = "2.23.136.1.1.7";

const OID_ATTR_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

/// One resolved SignerInfo.
#[derive(Debug, Clone)]
pub struct CmsSigner {
    pub digest_algorithm_oid: String,
    pub signature_algorithm_oid: String,
    pub signature: Vec<u8>,
    /// DER of the signed attributes re-encoded as SET OF (the bytes the
    /// signature covers), when signed attributes are present.
    pub signed_attrs_der: Option<Vec<u8>>,
    /// messageDigest attribute value, when signed attributes are present.
    pub message_digest: Option<Vec<u8>>,
    /// Issuer DN string + uppercase hex serial, when the signer identifier
    /// is issuerAndSerialNumber.
    pub issuer: Option<String>,
    pub serial: Option<String>,
    /// Uppercase hex SKI, when the signer identifier is subjectKeyIdentifier.
    pub ski: Option<String>,
}

/// Parsed CMS SignedData container.
#[derive(Debug, Clone)]
pub struct ParsedCms {
    pub econtent_type: String,
    /// Attached content, absent for detached signatures.
    pub signed_content: Option<Vec<u8>>,
    pub digest_algorithm_oids: Vec<String>,
    pub signers: Vec<CmsSigner>,
    /// Embedded certificates as DER.
    pub embedded_certs: Vec<Vec<u8>>,
}

/// Strip an outer ASN.1 application tag 0x77 if present. Idempotent: bytes
/// without the wrapper are returned unchanged.
pub fn strip_application_wrapper(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.first() != Some(&0x77) {
        return Ok(bytes);
    }
    if bytes.len() < 2 {
        return Err(PkdError::parse("SOD wrapper", 0, "truncated tag 0x77"));
    }
    let (content_len, header_len) = match bytes[1] {
        n if n < 0x80 => (n as usize, 2),
        0x81 => {
            if bytes.len() < 3 {
                return Err(PkdError::parse("SOD wrapper", 1, "truncated length"));
            }
            (bytes[2] as usize, 3)
        }
        0x82 => {
            if bytes.len() < 4 {
                return Err(PkdError::parse("SOD wrapper", 1, "truncated length"));
            }
            (((bytes[2] as usize) << 8) | bytes[3] as usize, 4)
        }
        0x83 => {
            if bytes.len() < 5 {
                return Err(PkdError::parse("SOD wrapper", 1, "truncated length"));
            }
            (
                ((bytes[2] as usize) << 16) | ((bytes[3] as usize) << 8) | bytes[4] as usize,
                5,
            )
        }
        other => {
            return Err(PkdError::parse(
                "SOD wrapper",
                1,
                format!("unsupported length form 0x{other:02x}"),
            ))
        }
    };
    let end = header_len + content_len;
    if bytes.len() < end {
        return Err(PkdError::parse(
            "SOD wrapper",
            header_len,
            "wrapper length exceeds input",
        ));
    }
    Ok(&bytes[header_len..end])
}

fn decode_signer(si: &cms::signed_data::SignerInfo) -> Result<CmsSigner> {
    let (issuer, serial, ski) = match &si.sid {
        SignerIdentifier::IssuerAndSerialNumber(isn) => {
            let serial = hex::encode_upper(isn.serial_number.as_bytes());
            (Some(isn.issuer.to_string()), Some(serial), None)
        }
        SignerIdentifier::SubjectKeyIdentifier(id) => {
            (None, None, Some(hex::encode_upper(id.0.as_bytes())))
        }
    };

    let (signed_attrs_der, message_digest) = match &si.signed_attrs {
        Some(attrs) => {
            let der = attrs
                .to_der()
                .map_err(|e| PkdError::parse("CMS signedAttrs", 0, e.to_string()))?;
            let mut digest = None;
            for attr in attrs.iter() {
                if attr.oid == OID_ATTR_MESSAGE_DIGEST {
                    if let Some(value) = attr.values.iter().next() {
                        let octets = value
                            .decode_as::<OctetString>()
                            .map_err(|e| PkdError::parse("messageDigest", 0, e.to_string()))?;
                        digest = Some(octets.as_bytes().to_vec());
                    }
                }
            }
            (Some(der), digest)
        }
        None => (None, None),
    };

    Ok(CmsSigner {
        digest_algorithm_oid: si.digest_alg.oid.to_string(),
        signature_algorithm_oid: si.signature_algorithm.oid.to_string(),
        signature: si.signature.as_bytes().to_vec(),
        signed_attrs_der,
        message_digest,
        issuer,
        serial,
        ski,
    })
}

/// Parse CMS SignedData from `bytes` (optionally 0x77-wrapped). Supports
/// attached and detached content.
pub fn parse_cms(bytes: &[u8]) -> Result<ParsedCms> {
    let body = strip_application_wrapper(bytes)?;

    let ci = ContentInfo::from_der(body)
        .map_err(|e| PkdError::parse("CMS ContentInfo", 0, e.to_string()))?;
    if ci.content_type.to_string() != OID_SIGNED_DATA {
        return Err(PkdError::parse(
            "CMS ContentInfo",
            0,
            format!("not SignedData: {}", ci.content_type),
        ));
    }

    let sd: SignedData = ci
        .content
        .decode_as::<SignedData>()
        .map_err(|e| PkdError::parse("CMS SignedData", 0, e.to_string()))?;

    let econtent_type = sd.encap_content_info.econtent_type.to_string();
    let signed_content = match &sd.encap_content_info.econtent {
        Some(any) => {
            let octets = any
                .decode_as::<OctetString>()
                .map_err(|e| PkdError::parse("CMS eContent", 0, e.to_string()))?;
            Some(octets.as_bytes().to_vec())
        }
        None => None,
    };

    let digest_algorithm_oids = sd
        .digest_algorithms
        .iter()
        .map(|a| a.oid.to_string())
        .collect();

    let mut signers = Vec::new();
    for si in sd.signer_infos.0.iter() {
        signers.push(decode_signer(si)?);
    }

    let mut embedded_certs = Vec::new();
    if let Some(cert_set) = &sd.certificates {
        for choice in cert_set.0.iter() {
            if let CertificateChoices::Certificate(cert) = choice {
                let der = cert
                    .to_der()
                    .map_err(|e| PkdError::parse("embedded certificate", 0, e.to_string()))?;
                embedded_certs.push(der);
            }
        }
    }

    Ok(ParsedCms {
        econtent_type,
        signed_content,
        digest_algorithm_oids,
        signers,
        embedded_certs,
    })
}

/// Digest `data` with the algorithm named by `oid`; None for unsupported
/// algorithms.
pub fn digest_with(oid: &str, data: &[u8]) -> Option<Vec<u8>> {
    match oid {
        "1.3.14.3.2.26" => {
            let mut h = sha1::Sha1::new();
            h.update(data);
            Some(h.finalize().to_vec())
        }
        "2.16.840.1.101.3.4.2.1" => Some(Sha256::digest(data).to_vec()),
        "2.16.840.1.101.3.4.2.2" => Some(Sha384::digest(data).to_vec()),
        "2.16.840.1.101.3.4.2.3" => Some(Sha512::digest(data).to_vec()),
        _ => None,
    }
}

/// Verify one signer of a parsed CMS structure against the signer
/// certificate.
///
/// With signed attributes present, RFC 5652 requires both that the
/// messageDigest attribute equals the digest of the content and that the
/// signature covers the re-encoded SET OF attributes; without them, the
/// signature covers the content directly.
pub fn verify_cms_signature(
    signer: &CmsSigner,
    content: &[u8],
    signer_cert_der: &[u8],
) -> VerifyOutcome {
    let (_, cert) = match X509Certificate::from_der(signer_cert_der) {
        Ok(c) => c,
        Err(e) => return VerifyOutcome::fail(format!("signer certificate parse failed: {e}")),
    };

    let message: &[u8] = match &signer.signed_attrs_der {
        Some(attrs_der) => {
            let Some(expected) = &signer.message_digest else {
                return VerifyOutcome::fail("signed attributes without messageDigest");
            };
            let actual = match digest_with(&signer.digest_algorithm_oid, content) {
                Some(d) => d,
                None => {
                    return VerifyOutcome::fail(format!(
                        "unsupported digest algorithm {}",
                        signer.digest_algorithm_oid
                    ))
                }
            };
            if &actual != expected {
                return VerifyOutcome::fail("messageDigest attribute does not match content");
            }
            attrs_der
        }
        None => content,
    };

    verify_with_spki(
        cert.public_key(),
        &signer.signature_algorithm_oid,
        message,
        &signer.signature,
    )
}

/// CscaMasterList ::= SEQUENCE { version INTEGER, certList SET OF Certificate }
#[derive(Sequence)]
struct CscaMasterList {
    version: u64,
    cert_list: SetOfVec<Any>,
}

/// Decode the eContent of an ICAO Master List into the embedded CSCA
/// certificates (DER, in list order).
pub fn parse_master_list_content(content: &[u8]) -> Result<Vec<Vec<u8>>> {
    let list = CscaMasterList::from_der(content)
        .map_err(|e| PkdError::parse("CscaMasterList", 0, e.to_string()))?;
    let mut out = Vec::with_capacity(list.cert_list.len());
    for entry in list.cert_list.iter() {
        let der = entry
            .to_der()
            .map_err(|e| PkdError::parse("master list entry", 0, e.to_string()))?;
        out.push(der);
    }
    log::debug!(
        "master list v{} with {} certificates",
        list.version,
        out.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_strip_is_idempotent() {
        // 0x77, short length 3, then a fake SEQUENCE.
        let wrapped = [0x77, 0x03, 0x30, 0x01, 0x00];
        let inner = strip_application_wrapper(&wrapped).unwrap();
        assert_eq!(inner, &[0x30, 0x01, 0x00]);
        // Already-unwrapped input passes through unchanged.
        let again = strip_application_wrapper(inner).unwrap();
        assert_eq!(again, inner);
    }

    #[test]
    fn wrapper_long_form_lengths() {
        let mut wrapped = vec![0x77, 0x81, 0x80];
        wrapped.extend(std::iter::repeat(0xAA).take(0x80));
        let inner = strip_application_wrapper(&wrapped).unwrap();
        assert_eq!(inner.len(), 0x80);

        let mut wrapped = vec![0x77, 0x82, 0x01, 0x00];
        wrapped.extend(std::iter::repeat(0xBB).take(0x100));
        let inner = strip_application_wrapper(&wrapped).unwrap();
        assert_eq!(inner.len(), 0x100);
    }

    #[test]
    fn wrapper_rejects_truncation() {
        assert!(strip_application_wrapper(&[0x77]).is_err());
        assert!(strip_application_wrapper(&[0x77, 0x05, 0x30]).is_err());
    }

    #[test]
    fn digest_dispatch() {
        let data = b"hello";
        assert_eq!(
            digest_with("2.16.840.1.101.3.4.2.1", data).unwrap().len(),
            32
        );
        assert_eq!(
            digest_with("2.16.840.1.101.3.4.2.2", data).unwrap().len(),
            48
        );
        assert_eq!(digest_with("1.3.14.3.2.26", data).unwrap().len(), 20);
        assert!(digest_with("1.2.3", data).is_none());
    }
}
