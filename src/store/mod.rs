//! Canonical persistence for trust material and operational records.
//!
//! Repository traits with two implementations: PostgreSQL (production) and
//! in-memory (dry-run CLI path and tests). All writes are short transactions;
//! inserts rely on a unique index on fingerprint so concurrent duplicates
//! collapse to a single row.

pub mod memory;
pub mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    CertType, CertificateRecord, CrlRecord, IcaoCollection, IcaoVersion, IcaoVersionStatus,
    PaVerification, ReconciliationFailure, SyncStatus, UploadedFile,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of an insert-if-absent: either the row was created, or an
/// existing row with the same identity was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: bool,
    pub existing_id: Option<Uuid>,
}

impl InsertOutcome {
    pub fn inserted() -> Self {
        InsertOutcome {
            inserted: true,
            existing_id: None,
        }
    }

    pub fn duplicate(existing_id: Uuid) -> Self {
        InsertOutcome {
            inserted: false,
            existing_id: Some(existing_id),
        }
    }
}

/// Pagination filter for certificate listings.
#[derive(Debug, Clone, Default)]
pub struct CertificateFilter {
    pub cert_type: Option<CertType>,
    pub country: Option<String>,
    pub offset: u64,
    pub limit: u64,
}

#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn insert_certificate_if_absent(&self, cert: &CertificateRecord)
        -> Result<InsertOutcome>;
    async fn certificate_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CertificateRecord>>;
    /// Lookup by normalised subject DN (cross-store matching form).
    async fn certificates_by_subject(&self, normalized_dn: &str)
        -> Result<Vec<CertificateRecord>>;
    /// CSCA candidates whose subject matches the given normalised issuer DN.
    async fn cscas_by_subject(&self, normalized_dn: &str) -> Result<Vec<CertificateRecord>>;
    async fn count_certificates_by_type(&self, cert_type: CertType) -> Result<u64>;
    async fn count_certificates_by_country(
        &self,
        cert_type: CertType,
    ) -> Result<BTreeMap<String, u64>>;
    async fn paginate_certificates(
        &self,
        filter: &CertificateFilter,
    ) -> Result<Vec<CertificateRecord>>;
    /// Certificates of one type not yet published to the directory.
    async fn unpublished_certificates(
        &self,
        cert_type: CertType,
        limit: u32,
    ) -> Result<Vec<CertificateRecord>>;
    async fn mark_certificate_stored(&self, fingerprint: &str, stored: bool) -> Result<()>;
    /// Soft delete; returns false when no such fingerprint exists.
    async fn soft_delete_certificate(&self, fingerprint: &str) -> Result<bool>;
    /// Certificates whose notAfter falls within the next `days` days.
    async fn certificates_expiring_within(&self, days: i64) -> Result<Vec<CertificateRecord>>;
}

#[async_trait]
pub trait CrlStore: Send + Sync {
    async fn insert_crl_if_absent(&self, crl: &CrlRecord) -> Result<InsertOutcome>;
    async fn crl_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CrlRecord>>;
    /// CRLs issued under the given normalised issuer DN and country.
    async fn crls_by_issuer(&self, normalized_dn: &str, country: &str) -> Result<Vec<CrlRecord>>;
    async fn count_crls(&self) -> Result<u64>;
    async fn count_crls_by_country(&self) -> Result<BTreeMap<String, u64>>;
    async fn unpublished_crls(&self, limit: u32) -> Result<Vec<CrlRecord>>;
    async fn mark_crl_stored(&self, fingerprint: &str, stored: bool) -> Result<()>;
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Rejects a second upload with the same content hash with
    /// `PkdError::Conflict`.
    async fn insert_upload(&self, upload: &UploadedFile) -> Result<()>;
    async fn update_upload(&self, upload: &UploadedFile) -> Result<()>;
    async fn upload_by_id(&self, id: Uuid) -> Result<Option<UploadedFile>>;
    async fn upload_by_content_hash(&self, sha256: &str) -> Result<Option<UploadedFile>>;
}

#[async_trait]
pub trait SyncStatusStore: Send + Sync {
    async fn insert_sync_status(&self, status: &SyncStatus) -> Result<()>;
    async fn latest_sync_status(&self) -> Result<Option<SyncStatus>>;
}

#[async_trait]
pub trait PaVerificationStore: Send + Sync {
    async fn insert_pa_verification(&self, verification: &PaVerification) -> Result<()>;
    async fn pa_verification_by_id(&self, id: Uuid) -> Result<Option<PaVerification>>;
}

#[async_trait]
pub trait IcaoVersionStore: Send + Sync {
    /// Insert keyed on (collection, version); duplicate keys are a no-op.
    async fn insert_icao_version_if_absent(&self, version: &IcaoVersion) -> Result<InsertOutcome>;
    async fn icao_versions(&self, collection: IcaoCollection) -> Result<Vec<IcaoVersion>>;
    async fn update_icao_version_status(
        &self,
        id: Uuid,
        status: IcaoVersionStatus,
        notified: bool,
    ) -> Result<()>;
}

/// One reconciliation pass summary plus its failure log.
#[derive(Debug, Clone)]
pub struct ReconciliationSummary {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub additions: u32,
    pub deletions: u32,
    pub failures: u32,
    pub status: String,
    pub message: Option<String>,
}

#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn insert_reconciliation_summary(&self, summary: &ReconciliationSummary) -> Result<()>;
    async fn insert_reconciliation_failures(
        &self,
        summary_id: Uuid,
        failures: &[ReconciliationFailure],
    ) -> Result<()>;
}

/// Umbrella trait: one store object serves every repository.
pub trait TrustStore:
    CertificateStore
    + CrlStore
    + UploadStore
    + SyncStatusStore
    + PaVerificationStore
    + IcaoVersionStore
    + ReconciliationStore
{
}

impl<T> TrustStore for T where
    T: CertificateStore
        + CrlStore
        + UploadStore
        + SyncStatusStore
        + PaVerificationStore
        + IcaoVersionStore
        + ReconciliationStore
{
}
