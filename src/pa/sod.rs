//! ICAO 9303 Security Object (SOD) parsing.
//!
//! The SOD is CMS SignedData whose eContent is the LDS Security Object:
//! the digest algorithm plus one expected hash per data group. The Document
//! Signer Certificate travels inside the CMS certificate set.

use std::collections::BTreeMap;

use der::asn1::{OctetString, PrintableString};
use der::{Decode, Sequence};
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::crypto::cms::{parse_cms, CmsSigner, OID_ICAO_LDS_SECURITY_OBJECT};
use crate::error::{PkdError, Result};

/// ICAO 9303-10 4.6.2.3.
#[derive(Clone, Debug, Sequence)]
struct DataGroupHash {
    data_group_number: u64,
    data_group_hash_value: OctetString,
}

/// ICAO 9303-10 4.6.2.3.
#[derive(Clone, Debug, Sequence)]
struct LdsVersionInfo {
    lds_version: PrintableString,
    unicode_version: PrintableString,
}

/// ICAO 9303-10 4.6.2.3.
#[derive(Clone, Debug, Sequence)]
struct LdsSecurityObject {
    version: u64,
    hash_algorithm: AlgorithmIdentifierOwned,
    data_group_hash_values: Vec<DataGroupHash>,
    lds_version_info: Option<LdsVersionInfo>,
}

/// Everything Passive Authentication needs from one SOD.
#[derive(Debug, Clone)]
pub struct ParsedSod {
    pub lds_version: u64,
    pub lds_version_info: Option<String>,
    /// Digest algorithm declared for the data group hashes.
    pub digest_algorithm_oid: String,
    /// Expected hash per data group number (1..=16).
    pub dg_hashes: BTreeMap<u8, Vec<u8>>,
    /// The embedded Document Signer Certificate, DER.
    pub dsc_der: Vec<u8>,
    pub signer: CmsSigner,
    /// The signed eContent bytes (hash input for the messageDigest check).
    pub econtent: Vec<u8>,
}

/// Parse SOD bytes (with or without the outer Tag 0x77 wrapper).
pub fn parse_sod(bytes: &[u8]) -> Result<ParsedSod> {
    let cms = parse_cms(bytes)?;

    if cms.econtent_type != OID_ICAO_LDS_SECURITY_OBJECT {
        return Err(PkdError::parse(
            "SOD",
            0,
            format!(
                "eContentType is {}, expected LDS Security Object",
                cms.econtent_type
            ),
        ));
    }

    let econtent = cms
        .signed_content
        .clone()
        .ok_or_else(|| PkdError::parse("SOD", 0, "SOD carries no attached content"))?;

    let lds = LdsSecurityObject::from_der(&econtent)
        .map_err(|e| PkdError::parse("LDS Security Object", 0, e.to_string()))?;

    let mut dg_hashes = BTreeMap::new();
    for entry in &lds.data_group_hash_values {
        if !(1..=16).contains(&entry.data_group_number) {
            return Err(PkdError::parse(
                "LDS Security Object",
                0,
                format!("data group number out of range: {}", entry.data_group_number),
            ));
        }
        dg_hashes.insert(
            entry.data_group_number as u8,
            entry.data_group_hash_value.as_bytes().to_vec(),
        );
    }

    let signer = cms
        .signers
        .first()
        .cloned()
        .ok_or_else(|| PkdError::parse("SOD", 0, "no SignerInfo in SOD"))?;

    let dsc_der = cms
        .embedded_certs
        .first()
        .cloned()
        .ok_or_else(|| PkdError::parse("SOD", 0, "no embedded Document Signer Certificate"))?;

    Ok(ParsedSod {
        lds_version: lds.version,
        lds_version_info: lds
            .lds_version_info
            .as_ref()
            .map(|v| format!("LDS {} / Unicode {}", v.lds_version, v.unicode_version)),
        digest_algorithm_oid: lds.hash_algorithm.oid.to_string(),
        dg_hashes,
        dsc_der,
        signer,
        econtent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::Encode;

    #[test]
    fn lds_security_object_round_trip() {
        let lds = LdsSecurityObject {
            version: 0,
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: "2.16.840.1.101.3.4.2.1".parse().unwrap(),
                parameters: None,
            },
            data_group_hash_values: vec![
                DataGroupHash {
                    data_group_number: 1,
                    data_group_hash_value: OctetString::new(vec![0u8; 32]).unwrap(),
                },
                DataGroupHash {
                    data_group_number: 14,
                    data_group_hash_value: OctetString::new(vec![1u8; 32]).unwrap(),
                },
            ],
            lds_version_info: None,
        };
        let der = lds.to_der().unwrap();
        let back = LdsSecurityObject::from_der(&der).unwrap();
        assert_eq!(back.version, 0);
        assert_eq!(back.data_group_hash_values.len(), 2);
        assert_eq!(back.data_group_hash_values[1].data_group_number, 14);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_sod(&[0xDE, 0xAD, 0xBE, 0xEF]).is_err());
    }
}
