use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{
    CertType, FileFormat, IcaoCollection, IcaoVersionStatus, PaStatus, UploadStatus,
};

/// One parsed X.509 certificate, as persisted in the trust store.
///
/// Identity is the SHA-256 fingerprint of the DER body (64 lowercase hex).
/// Records are created on ingest and never mutated; `stored_in_directory` is
/// the only flag flipped afterwards (by the reconciler), and `deleted` only
/// by explicit operator action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: Uuid,
    pub fingerprint: String,
    #[serde(skip_serializing)]
    pub der: Vec<u8>,
    pub cert_type: CertType,
    /// ISO-3166 alpha-2; empty only for MLSC/DVL signers under the warn
    /// policy.
    pub country: String,
    pub subject_dn: String,
    pub issuer_dn: String,
    /// Lowercased pipe-joined form used only for cross-store matching.
    pub subject_dn_normalized: String,
    pub issuer_dn_normalized: String,
    /// Uppercase hex.
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub signature_algorithm_oid: String,
    pub signature_hash_algorithm: String,
    pub public_key_algorithm: String,
    pub public_key_size: Option<u32>,
    pub public_key_curve: Option<String>,
    pub ski: Option<String>,
    pub aki: Option<String>,
    pub is_ca: bool,
    pub path_len_constraint: Option<u32>,
    pub key_usage: Vec<String>,
    pub extended_key_usage: Vec<String>,
    pub crl_distribution_points: Vec<String>,
    pub ocsp_url: Option<String>,
    pub self_signed: bool,
    /// False when the containing Master List / DVL signature did not verify.
    pub source_verified: bool,
    pub stored_in_directory: bool,
    pub deleted: bool,
    pub first_ingested_at: DateTime<Utc>,
    pub source_upload_id: Option<Uuid>,
}

impl CertificateRecord {
    /// The CSCA structural invariant: self-signed CA with keyCertSign.
    pub fn satisfies_csca_invariant(&self) -> bool {
        self.self_signed && self.is_ca && self.key_usage.iter().any(|u| u == "keyCertSign")
    }

    pub fn validity_contains(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// One revoked-certificate entry from a CRL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedEntry {
    /// Uppercase hex serial.
    pub serial: String,
    pub revoked_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// One X.509 CRL, identity = SHA-256 fingerprint. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlRecord {
    pub id: Uuid,
    pub fingerprint: String,
    #[serde(skip_serializing)]
    pub der: Vec<u8>,
    pub issuer_dn: String,
    pub issuer_dn_normalized: String,
    pub country: String,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    pub crl_number: Option<String>,
    pub revoked: Vec<RevokedEntry>,
    pub stored_in_directory: bool,
    pub first_ingested_at: DateTime<Utc>,
    pub source_upload_id: Option<Uuid>,
}

impl CrlRecord {
    /// True when `at` falls within [thisUpdate, nextUpdate]. A CRL without
    /// nextUpdate never goes stale.
    pub fn is_current_at(&self, at: DateTime<Utc>) -> bool {
        self.this_update <= at && self.next_update.map_or(true, |nu| at <= nu)
    }

    pub fn revokes_serial(&self, serial: &str) -> Option<&RevokedEntry> {
        let wanted = serial.trim_start_matches('0');
        self.revoked
            .iter()
            .find(|e| e.serial.trim_start_matches('0') == wanted)
    }
}

/// Per-type counters accumulated over one ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCounters {
    pub csca: u32,
    pub dsc: u32,
    pub dsc_nc: u32,
    pub mlsc: u32,
    pub dvl_signer: u32,
    pub link: u32,
    pub crl: u32,
    pub master_lists: u32,
    pub duplicates: u32,
    pub errors: u32,
}

impl IngestCounters {
    pub fn inserted_certificates(&self) -> u32 {
        self.csca + self.dsc + self.dsc_nc + self.mlsc + self.dvl_signer + self.link
    }

    pub fn record_cert(&mut self, cert_type: CertType) {
        match cert_type {
            CertType::Csca => self.csca += 1,
            CertType::Dsc => self.dsc += 1,
            CertType::DscNc => self.dsc_nc += 1,
            CertType::Mlsc => self.mlsc += 1,
            CertType::Link => self.link += 1,
            CertType::DvlSigner => self.dvl_signer += 1,
        }
    }
}

/// Records one ingest event and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: Uuid,
    pub original_filename: String,
    pub canonical_filename: String,
    /// SHA-256 of the file content; unique - duplicate uploads are rejected.
    pub content_sha256: String,
    pub size_bytes: u64,
    pub format: FileFormat,
    pub status: UploadStatus,
    pub counters: IngestCounters,
    /// LDIF collection number, when the source carries one.
    pub collection_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// A per-entry diagnostic emitted by the ingest pipeline; the upload
/// continues past these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingError {
    pub entry_dn: Option<String>,
    pub code: String,
    pub message: String,
}

/// DB vs LDAP counts for one country.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryCounts {
    pub db: u64,
    pub ldap: u64,
}

/// Immutable snapshot of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub csca_db: u64,
    pub dsc_db: u64,
    pub dsc_nc_db: u64,
    pub crl_db: u64,
    pub csca_ldap: u64,
    pub dsc_ldap: u64,
    pub dsc_nc_ldap: u64,
    pub crl_ldap: u64,
    pub csca_discrepancy: u64,
    pub dsc_discrepancy: u64,
    pub dsc_nc_discrepancy: u64,
    pub crl_discrepancy: u64,
    pub total_discrepancy: u64,
    pub sync_required: bool,
    pub country_breakdown: BTreeMap<String, CountryCounts>,
}

/// Subject/serial/issuer/fingerprint tuple identifying a certificate inside
/// a PA verdict without carrying its body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertDescriptor {
    pub subject_dn: String,
    pub serial: String,
    pub issuer_dn: String,
    pub fingerprint: String,
}

/// Result of one Passive Authentication request, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaVerification {
    pub id: Uuid,
    pub issuing_country: Option<String>,
    pub document_number: Option<String>,
    pub sod_hash: String,
    pub dsc: Option<CertDescriptor>,
    pub csca: Option<CertDescriptor>,
    pub trust_chain_valid: Option<bool>,
    pub sod_signature_valid: Option<bool>,
    pub dg_hashes_valid: Option<bool>,
    pub crl_clean: Option<bool>,
    pub status: PaStatus,
    pub message: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A file version detected on the ICAO portal. (collection, version) is
/// unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcaoVersion {
    pub id: Uuid,
    pub collection: IcaoCollection,
    pub filename: String,
    pub version: u32,
    pub status: IcaoVersionStatus,
    pub detected_at: DateTime<Utc>,
    pub notified: bool,
    pub upload_id: Option<Uuid>,
}

/// One failed repair operation inside a reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationFailure {
    pub cert_type: String,
    pub operation: String,
    pub country: String,
    pub subject: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn crl_currency_window() {
        let crl = CrlRecord {
            id: Uuid::new_v4(),
            fingerprint: "ab".repeat(32),
            der: vec![],
            issuer_dn: "CN=CSCA,C=UN".into(),
            issuer_dn_normalized: "c=un|cn=csca".into(),
            country: "UN".into(),
            this_update: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            next_update: Some(Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()),
            crl_number: Some("01".into()),
            revoked: vec![RevokedEntry {
                serial: "0001".into(),
                revoked_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
                reason: None,
            }],
            stored_in_directory: false,
            first_ingested_at: Utc::now(),
            source_upload_id: None,
        };
        assert!(crl.is_current_at(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()));
        assert!(!crl.is_current_at(Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap()));
        assert!(!crl.is_current_at(Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()));
        // Leading zeros do not defeat the serial match.
        assert!(crl.revokes_serial("1").is_some());
        assert!(crl.revokes_serial("02").is_none());
    }

    #[test]
    fn ingest_counter_totals() {
        let mut c = IngestCounters::default();
        c.record_cert(CertType::Csca);
        c.record_cert(CertType::Dsc);
        c.record_cert(CertType::Dsc);
        c.duplicates += 1;
        c.errors += 1;
        assert_eq!(c.inserted_certificates(), 3);
        assert_eq!(c.inserted_certificates() + c.duplicates + c.errors, 5);
    }
}
