//! Certificate classification.
//!
//! Decides CSCA / LINK / DSC / MLSC / DVL_SIGNER from extensions,
//! self-signedness and the CA flag. The non-conformant tag (DSC_NC) is a
//! container-level signal applied by the ingest caller, never derived from
//! the certificate itself.

use serde::{Deserialize, Serialize};

use crate::crypto::x509::{extract_metadata, fingerprint_hex, CertificateMetadata};
use crate::error::{PkdError, Result};
use crate::models::CertType;

/// ICAO Master List Signer extended key usage.
pub const OID_EKU_MLSC: &str = "2.23.136.1.1.9";
/// ICAO Deviation List Signer extended key usage.
pub const OID_EKU_DVL_SIGNER: &str = "2.23.136.1.1.10";

/// Operator policy for certificates without a subject country.
///
/// CSCA and DSC always require a country; the policy only applies to list
/// signers (some legacy MLSC certificates omit `C=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CountryPolicy {
    Reject,
    #[default]
    Warn,
}

/// Classification outcome for one certificate.
#[derive(Debug, Clone)]
pub struct Classification {
    pub cert_type: CertType,
    pub country: String,
    pub fingerprint: String,
    pub is_ca: bool,
    pub is_self_signed: bool,
    /// Set when the country is missing and the policy allowed the record
    /// through.
    pub country_warning: Option<String>,
}

/// Classify raw DER. Convenience wrapper over [`classify_metadata`].
pub fn classify(der: &[u8], policy: CountryPolicy) -> Result<Classification> {
    let metadata = extract_metadata(der)?;
    classify_metadata(&metadata, fingerprint_hex(der), policy)
}

/// Classify an already-extracted metadata record. First match wins.
pub fn classify_metadata(
    metadata: &CertificateMetadata,
    fingerprint: String,
    policy: CountryPolicy,
) -> Result<Classification> {
    let cert_type = if metadata
        .extended_key_usage
        .iter()
        .any(|oid| oid == OID_EKU_MLSC)
    {
        CertType::Mlsc
    } else if metadata
        .extended_key_usage
        .iter()
        .any(|oid| oid == OID_EKU_DVL_SIGNER)
    {
        CertType::DvlSigner
    } else if metadata.is_ca && metadata.self_signed {
        CertType::Csca
    } else if metadata.is_ca {
        CertType::Link
    } else {
        CertType::Dsc
    };

    let mut country_warning = None;
    let country = match &metadata.subject_country {
        Some(c) if !c.is_empty() => c.clone(),
        _ => match cert_type {
            CertType::Csca | CertType::Dsc | CertType::Link => {
                return Err(PkdError::Validation(format!(
                    "{} certificate without subject country: {}",
                    cert_type, metadata.subject_dn
                )))
            }
            _ => match policy {
                CountryPolicy::Reject => {
                    return Err(PkdError::Validation(format!(
                        "{} certificate without subject country rejected by policy: {}",
                        cert_type, metadata.subject_dn
                    )))
                }
                CountryPolicy::Warn => {
                    country_warning = Some(format!(
                        "{} certificate without subject country recorded with empty country: {}",
                        cert_type, metadata.subject_dn
                    ));
                    String::new()
                }
            },
        },
    };

    Ok(Classification {
        cert_type,
        country,
        fingerprint,
        is_ca: metadata.is_ca,
        is_self_signed: metadata.self_signed,
        country_warning,
    })
}
