//! In-memory trust store.
//!
//! Backs the dry-run CLI path and the test suite; semantics mirror the
//! PostgreSQL implementation, including fingerprint uniqueness and the
//! duplicate-upload rejection.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{
    CertificateFilter, CertificateStore, CrlStore, IcaoVersionStore, InsertOutcome,
    PaVerificationStore, ReconciliationStore, ReconciliationSummary, SyncStatusStore, UploadStore,
};
use crate::error::{PkdError, Result};
use crate::models::{
    CertType, CertificateRecord, CrlRecord, IcaoCollection, IcaoVersion, IcaoVersionStatus,
    PaVerification, ReconciliationFailure, SyncStatus, UploadedFile,
};

#[derive(Default)]
struct Inner {
    certificates: BTreeMap<String, CertificateRecord>,
    crls: BTreeMap<String, CrlRecord>,
    uploads: BTreeMap<Uuid, UploadedFile>,
    sync_statuses: Vec<SyncStatus>,
    pa_verifications: BTreeMap<Uuid, PaVerification>,
    icao_versions: Vec<IcaoVersion>,
    reconciliation_summaries: Vec<ReconciliationSummary>,
    reconciliation_failures: Vec<(Uuid, ReconciliationFailure)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens after a panic in another holder; the
        // store data is plain records, so continue with them.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn insert_certificate_if_absent(
        &self,
        cert: &CertificateRecord,
    ) -> Result<InsertOutcome> {
        let mut inner = self.lock();
        if let Some(existing) = inner.certificates.get(&cert.fingerprint) {
            return Ok(InsertOutcome::duplicate(existing.id));
        }
        inner
            .certificates
            .insert(cert.fingerprint.clone(), cert.clone());
        Ok(InsertOutcome::inserted())
    }

    async fn certificate_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CertificateRecord>> {
        Ok(self.lock().certificates.get(fingerprint).cloned())
    }

    async fn certificates_by_subject(
        &self,
        normalized_dn: &str,
    ) -> Result<Vec<CertificateRecord>> {
        Ok(self
            .lock()
            .certificates
            .values()
            .filter(|c| !c.deleted && c.subject_dn_normalized == normalized_dn)
            .cloned()
            .collect())
    }

    async fn cscas_by_subject(&self, normalized_dn: &str) -> Result<Vec<CertificateRecord>> {
        Ok(self
            .lock()
            .certificates
            .values()
            .filter(|c| {
                !c.deleted
                    && c.cert_type == CertType::Csca
                    && c.subject_dn_normalized == normalized_dn
            })
            .cloned()
            .collect())
    }

    async fn count_certificates_by_type(&self, cert_type: CertType) -> Result<u64> {
        Ok(self
            .lock()
            .certificates
            .values()
            .filter(|c| !c.deleted && c.cert_type == cert_type)
            .count() as u64)
    }

    async fn count_certificates_by_country(
        &self,
        cert_type: CertType,
    ) -> Result<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        for cert in self.lock().certificates.values() {
            if !cert.deleted && cert.cert_type == cert_type {
                *counts.entry(cert.country.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn paginate_certificates(
        &self,
        filter: &CertificateFilter,
    ) -> Result<Vec<CertificateRecord>> {
        let inner = self.lock();
        let mut rows: Vec<_> = inner
            .certificates
            .values()
            .filter(|c| {
                !c.deleted
                    && filter.cert_type.map_or(true, |t| c.cert_type == t)
                    && filter.country.as_ref().map_or(true, |co| &c.country == co)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.first_ingested_at.cmp(&b.first_ingested_at));
        Ok(rows
            .into_iter()
            .skip(filter.offset as usize)
            .take(if filter.limit == 0 {
                usize::MAX
            } else {
                filter.limit as usize
            })
            .collect())
    }

    async fn unpublished_certificates(
        &self,
        cert_type: CertType,
        limit: u32,
    ) -> Result<Vec<CertificateRecord>> {
        Ok(self
            .lock()
            .certificates
            .values()
            .filter(|c| !c.deleted && c.cert_type == cert_type && !c.stored_in_directory)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_certificate_stored(&self, fingerprint: &str, stored: bool) -> Result<()> {
        let mut inner = self.lock();
        match inner.certificates.get_mut(fingerprint) {
            Some(cert) => {
                cert.stored_in_directory = stored;
                Ok(())
            }
            None => Err(PkdError::Store(format!(
                "no certificate with fingerprint {fingerprint}"
            ))),
        }
    }

    async fn soft_delete_certificate(&self, fingerprint: &str) -> Result<bool> {
        let mut inner = self.lock();
        match inner.certificates.get_mut(fingerprint) {
            Some(cert) => {
                cert.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn certificates_expiring_within(&self, days: i64) -> Result<Vec<CertificateRecord>> {
        let horizon = Utc::now() + Duration::days(days);
        Ok(self
            .lock()
            .certificates
            .values()
            .filter(|c| !c.deleted && c.not_after <= horizon && c.not_after >= Utc::now())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CrlStore for MemoryStore {
    async fn insert_crl_if_absent(&self, crl: &CrlRecord) -> Result<InsertOutcome> {
        let mut inner = self.lock();
        if let Some(existing) = inner.crls.get(&crl.fingerprint) {
            return Ok(InsertOutcome::duplicate(existing.id));
        }
        inner.crls.insert(crl.fingerprint.clone(), crl.clone());
        Ok(InsertOutcome::inserted())
    }

    async fn crl_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CrlRecord>> {
        Ok(self.lock().crls.get(fingerprint).cloned())
    }

    async fn crls_by_issuer(&self, normalized_dn: &str, country: &str) -> Result<Vec<CrlRecord>> {
        Ok(self
            .lock()
            .crls
            .values()
            .filter(|c| c.issuer_dn_normalized == normalized_dn && c.country == country)
            .cloned()
            .collect())
    }

    async fn count_crls(&self) -> Result<u64> {
        Ok(self.lock().crls.len() as u64)
    }

    async fn count_crls_by_country(&self) -> Result<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        for crl in self.lock().crls.values() {
            *counts.entry(crl.country.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn unpublished_crls(&self, limit: u32) -> Result<Vec<CrlRecord>> {
        Ok(self
            .lock()
            .crls
            .values()
            .filter(|c| !c.stored_in_directory)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_crl_stored(&self, fingerprint: &str, stored: bool) -> Result<()> {
        let mut inner = self.lock();
        match inner.crls.get_mut(fingerprint) {
            Some(crl) => {
                crl.stored_in_directory = stored;
                Ok(())
            }
            None => Err(PkdError::Store(format!(
                "no CRL with fingerprint {fingerprint}"
            ))),
        }
    }
}

#[async_trait]
impl UploadStore for MemoryStore {
    async fn insert_upload(&self, upload: &UploadedFile) -> Result<()> {
        let mut inner = self.lock();
        if inner
            .uploads
            .values()
            .any(|u| u.content_sha256 == upload.content_sha256)
        {
            return Err(PkdError::Conflict(format!(
                "duplicate upload content: {}",
                upload.content_sha256
            )));
        }
        inner.uploads.insert(upload.id, upload.clone());
        Ok(())
    }

    async fn update_upload(&self, upload: &UploadedFile) -> Result<()> {
        let mut inner = self.lock();
        match inner.uploads.get_mut(&upload.id) {
            Some(existing) => {
                *existing = upload.clone();
                Ok(())
            }
            None => Err(PkdError::Store(format!("no upload with id {}", upload.id))),
        }
    }

    async fn upload_by_id(&self, id: Uuid) -> Result<Option<UploadedFile>> {
        Ok(self.lock().uploads.get(&id).cloned())
    }

    async fn upload_by_content_hash(&self, sha256: &str) -> Result<Option<UploadedFile>> {
        Ok(self
            .lock()
            .uploads
            .values()
            .find(|u| u.content_sha256 == sha256)
            .cloned())
    }
}

#[async_trait]
impl SyncStatusStore for MemoryStore {
    async fn insert_sync_status(&self, status: &SyncStatus) -> Result<()> {
        self.lock().sync_statuses.push(status.clone());
        Ok(())
    }

    async fn latest_sync_status(&self) -> Result<Option<SyncStatus>> {
        Ok(self.lock().sync_statuses.last().cloned())
    }
}

#[async_trait]
impl PaVerificationStore for MemoryStore {
    async fn insert_pa_verification(&self, verification: &PaVerification) -> Result<()> {
        self.lock()
            .pa_verifications
            .insert(verification.id, verification.clone());
        Ok(())
    }

    async fn pa_verification_by_id(&self, id: Uuid) -> Result<Option<PaVerification>> {
        Ok(self.lock().pa_verifications.get(&id).cloned())
    }
}

#[async_trait]
impl IcaoVersionStore for MemoryStore {
    async fn insert_icao_version_if_absent(&self, version: &IcaoVersion) -> Result<InsertOutcome> {
        let mut inner = self.lock();
        if let Some(existing) = inner
            .icao_versions
            .iter()
            .find(|v| v.collection == version.collection && v.version == version.version)
        {
            return Ok(InsertOutcome::duplicate(existing.id));
        }
        inner.icao_versions.push(version.clone());
        Ok(InsertOutcome::inserted())
    }

    async fn icao_versions(&self, collection: IcaoCollection) -> Result<Vec<IcaoVersion>> {
        Ok(self
            .lock()
            .icao_versions
            .iter()
            .filter(|v| v.collection == collection)
            .cloned()
            .collect())
    }

    async fn update_icao_version_status(
        &self,
        id: Uuid,
        status: IcaoVersionStatus,
        notified: bool,
    ) -> Result<()> {
        let mut inner = self.lock();
        match inner.icao_versions.iter_mut().find(|v| v.id == id) {
            Some(version) => {
                version.status = status;
                version.notified = notified;
                Ok(())
            }
            None => Err(PkdError::Store(format!("no ICAO version with id {id}"))),
        }
    }
}

#[async_trait]
impl ReconciliationStore for MemoryStore {
    async fn insert_reconciliation_summary(&self, summary: &ReconciliationSummary) -> Result<()> {
        self.lock().reconciliation_summaries.push(summary.clone());
        Ok(())
    }

    async fn insert_reconciliation_failures(
        &self,
        summary_id: Uuid,
        failures: &[ReconciliationFailure],
    ) -> Result<()> {
        let mut inner = self.lock();
        for failure in failures {
            inner
                .reconciliation_failures
                .push((summary_id, failure.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileFormat, UploadStatus};
    use chrono::Utc;

    fn cert(fingerprint: &str, cert_type: CertType, country: &str) -> CertificateRecord {
        CertificateRecord {
            id: Uuid::new_v4(),
            fingerprint: fingerprint.to_string(),
            der: vec![0x30],
            cert_type,
            country: country.to_string(),
            subject_dn: format!("CN=c-{fingerprint},C={country}"),
            issuer_dn: format!("CN=c-{fingerprint},C={country}"),
            subject_dn_normalized: format!("c={}|cn=c-{fingerprint}", country.to_lowercase()),
            issuer_dn_normalized: format!("c={}|cn=c-{fingerprint}", country.to_lowercase()),
            serial: "01".into(),
            not_before: Utc::now(),
            not_after: Utc::now(),
            signature_algorithm_oid: String::new(),
            signature_hash_algorithm: String::new(),
            public_key_algorithm: String::new(),
            public_key_size: None,
            public_key_curve: None,
            ski: None,
            aki: None,
            is_ca: true,
            path_len_constraint: None,
            key_usage: vec!["keyCertSign".into()],
            extended_key_usage: vec![],
            crl_distribution_points: vec![],
            ocsp_url: None,
            self_signed: true,
            source_verified: true,
            stored_in_directory: false,
            deleted: false,
            first_ingested_at: Utc::now(),
            source_upload_id: None,
        }
    }

    #[tokio::test]
    async fn duplicate_fingerprint_collapses() {
        let store = MemoryStore::new();
        let a = cert("aa", CertType::Csca, "UN");
        let mut b = cert("aa", CertType::Csca, "UN");
        b.id = Uuid::new_v4();

        let first = store.insert_certificate_if_absent(&a).await.unwrap();
        assert!(first.inserted);
        let second = store.insert_certificate_if_absent(&b).await.unwrap();
        assert!(!second.inserted);
        assert_eq!(second.existing_id, Some(a.id));
        assert_eq!(
            store.count_certificates_by_type(CertType::Csca).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn pagination_respects_filter_and_bounds() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .insert_certificate_if_absent(&cert(&format!("f{i}"), CertType::Dsc, "NL"))
                .await
                .unwrap();
        }
        store
            .insert_certificate_if_absent(&cert("other", CertType::Dsc, "DE"))
            .await
            .unwrap();

        let page = store
            .paginate_certificates(&CertificateFilter {
                cert_type: Some(CertType::Dsc),
                country: Some("NL".into()),
                offset: 1,
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|c| c.country == "NL"));
    }

    #[tokio::test]
    async fn duplicate_upload_content_rejected() {
        let store = MemoryStore::new();
        let upload = UploadedFile {
            id: Uuid::new_v4(),
            original_filename: "a.pem".into(),
            canonical_filename: "a.pem".into(),
            content_sha256: "cafe".into(),
            size_bytes: 4,
            format: FileFormat::Pem,
            status: UploadStatus::Pending,
            counters: Default::default(),
            collection_number: None,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        };
        store.insert_upload(&upload).await.unwrap();

        let mut again = upload.clone();
        again.id = Uuid::new_v4();
        assert!(store.insert_upload(&again).await.is_err());
    }

    #[tokio::test]
    async fn soft_delete_hides_from_counts() {
        let store = MemoryStore::new();
        store
            .insert_certificate_if_absent(&cert("dead", CertType::Csca, "UN"))
            .await
            .unwrap();
        assert!(store.soft_delete_certificate("dead").await.unwrap());
        assert_eq!(
            store.count_certificates_by_type(CertType::Csca).await.unwrap(),
            0
        );
        // The row still exists for audit lookups.
        assert!(store
            .certificate_by_fingerprint("dead")
            .await
            .unwrap()
            .unwrap()
            .deleted);
    }
}
