//! Master List / Deviation List ingestion.
//!
//! Both arrive as CMS SignedData. A Master List's content is the ICAO
//! CscaMasterList sequence; a Deviation List's content describes known
//! non-conformant issuer behaviours and carries no certificates of its own.
//! The CMS signature is verified but a failure does not abort ingest: the
//! contained material is persisted with `source_verified = false` and the
//! failure recorded as a parsing error.

use x509_parser::prelude::*;

use crate::classifier::{OID_EKU_DVL_SIGNER, OID_EKU_MLSC};
use crate::crypto::cms::{
    parse_cms, parse_master_list_content, verify_cms_signature, OID_ICAO_DEVIATION_LIST,
    OID_ICAO_LDS_SECURITY_OBJECT, OID_ICAO_MASTER_LIST,
};
use crate::crypto::x509::dn_to_rfc2253;
use crate::error::{PkdError, Result};
use crate::models::CertType;

/// Parsed list container, ready for the pipeline to persist.
#[derive(Debug, Clone)]
pub struct ListOutcome {
    /// DER of the resolved signer certificate, when one was found.
    pub signer_der: Option<Vec<u8>>,
    pub signer_type: CertType,
    /// Certificates carried in the list content (Master List) or embedded
    /// alongside the signer (Deviation List).
    pub content_certs: Vec<Vec<u8>>,
    pub signature_verified: bool,
    pub signature_error: Option<String>,
    pub is_deviation_list: bool,
}

fn cert_has_eku(der: &[u8], oid: &str) -> bool {
    let Ok((_, cert)) = X509Certificate::from_der(der) else {
        return false;
    };
    match cert.extended_key_usage() {
        Ok(Some(eku)) => eku.value.other.iter().any(|o| o.to_id_string() == oid),
        _ => false,
    }
}

fn matches_signer(der: &[u8], issuer: Option<&str>, serial: Option<&str>, ski: Option<&str>) -> bool {
    let Ok((_, cert)) = X509Certificate::from_der(der) else {
        return false;
    };
    if let (Some(issuer), Some(serial)) = (issuer, serial) {
        let cert_serial = hex::encode_upper(cert.raw_serial());
        let cert_issuer = dn_to_rfc2253(cert.issuer());
        // Serial matching tolerates leading zero octets either side.
        let serial_eq =
            cert_serial.trim_start_matches('0') == serial.trim_start_matches('0');
        if serial_eq && crate::crypto::x509::normalize_dn_for_comparison(&cert_issuer)
            == crate::crypto::x509::normalize_dn_for_comparison(issuer)
        {
            return true;
        }
    }
    if let Some(wanted_ski) = ski {
        for ext in cert.extensions() {
            if let ParsedExtension::SubjectKeyIdentifier(id) = ext.parsed_extension() {
                if hex::encode_upper(id.0) == wanted_ski {
                    return true;
                }
            }
        }
    }
    false
}

/// Parse one CMS list file and verify its signature.
pub fn parse_list(bytes: &[u8]) -> Result<ListOutcome> {
    let cms = parse_cms(bytes)?;

    let is_deviation_list = match cms.econtent_type.as_str() {
        OID_ICAO_MASTER_LIST => false,
        OID_ICAO_DEVIATION_LIST => true,
        OID_ICAO_LDS_SECURITY_OBJECT => {
            return Err(PkdError::parse(
                "CMS list",
                0,
                "content is an LDS Security Object, not a list",
            ))
        }
        // Some historical lists use the generic id-data content type; decide
        // by attempting the Master List decode below.
        _ => false,
    };

    let signer_type = if is_deviation_list {
        CertType::DvlSigner
    } else {
        CertType::Mlsc
    };
    let signer_eku = if is_deviation_list {
        OID_EKU_DVL_SIGNER
    } else {
        OID_EKU_MLSC
    };

    // Resolve the signer certificate among the embedded ones: by signer
    // identifier first, by the list-signer EKU as a fallback.
    let signer = cms.signers.first();
    let signer_der = signer
        .and_then(|si| {
            cms.embedded_certs.iter().find(|der| {
                matches_signer(
                    der,
                    si.issuer.as_deref(),
                    si.serial.as_deref(),
                    si.ski.as_deref(),
                )
            })
        })
        .or_else(|| {
            cms.embedded_certs
                .iter()
                .find(|der| cert_has_eku(der, signer_eku))
        })
        .cloned();

    let (signature_verified, signature_error) = match (signer, &signer_der, &cms.signed_content) {
        (Some(si), Some(signer_der), Some(content)) => {
            let outcome = verify_cms_signature(si, content, signer_der);
            (outcome.valid, outcome.reason)
        }
        (None, _, _) => (false, Some("no SignerInfo in CMS structure".to_string())),
        (_, None, _) => (
            false,
            Some("signer certificate not found among embedded certificates".to_string()),
        ),
        (_, _, None) => (false, Some("detached content not provided".to_string())),
    };

    let content_certs = if is_deviation_list {
        // A DVL carries deviation records, not certificates; only the
        // embedded signer chain is of interest and that is handled above.
        Vec::new()
    } else {
        match &cms.signed_content {
            Some(content) => parse_master_list_content(content)?,
            None => Vec::new(),
        }
    };

    Ok(ListOutcome {
        signer_der,
        signer_type,
        content_certs,
        signature_verified,
        signature_error,
        is_deviation_list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sod_content_type() {
        // Not a full CMS structure; the content-type gate is exercised via
        // parse_cms failure paths in the integration tests. Here: garbage in,
        // parse error out.
        assert!(parse_list(&[0x30, 0x03, 0x02, 0x01, 0x00]).is_err());
    }
}
