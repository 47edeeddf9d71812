//! DB <-> directory reconciliation.
//!
//! One pass: count both stores, compute per-type discrepancies, repair by
//! publishing unpublished rows in bounded batches, persist a SyncStatus
//! snapshot. Only one pass runs at a time; contention short-circuits with a
//! conflict. Counts are read once per pass and may lag writes that commit
//! during the repair phase.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ReconcileConfig;
use crate::directory::{DirectoryKind, DirectoryPort};
use crate::error::{PkdError, Result};
use crate::models::{
    CertType, ChainStatus, CountryCounts, ReconciliationFailure, SyncStatus,
};
use crate::store::{ReconciliationSummary, TrustStore};
use crate::validation::chain::ChainValidator;

/// Observable state of the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Counting,
    Repairing,
    Persisting,
    Failed,
}

pub struct Reconciler {
    store: Arc<dyn TrustStore>,
    directory: Arc<dyn DirectoryPort>,
    config: ReconcileConfig,
    /// Single-holder guard; try-lock rejection implements the
    /// one-pass-at-a-time rule.
    running: Mutex<()>,
    state: std::sync::Mutex<PassState>,
}

struct Counts {
    csca_db: u64,
    dsc_db: u64,
    dsc_nc_db: u64,
    crl_db: u64,
    csca_ldap: u64,
    dsc_ldap: u64,
    dsc_nc_ldap: u64,
    crl_ldap: u64,
    country_breakdown: BTreeMap<String, CountryCounts>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TrustStore>,
        directory: Arc<dyn DirectoryPort>,
        config: ReconcileConfig,
    ) -> Self {
        Reconciler {
            store,
            directory,
            config,
            running: Mutex::new(()),
            state: std::sync::Mutex::new(PassState::Idle),
        }
    }

    pub fn state(&self) -> PassState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: PassState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Run one reconciliation pass. Returns the persisted snapshot, or a
    /// conflict when a pass is already running.
    pub async fn run_pass(&self) -> Result<SyncStatus> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| PkdError::Conflict("RECONCILIATION_IN_PROGRESS".to_string()))?;

        let started_at = Utc::now();
        let summary_id = Uuid::new_v4();
        let result = self.pass_inner(summary_id, started_at).await;
        match &result {
            Ok(_) => self.set_state(PassState::Idle),
            Err(e) => {
                self.set_state(PassState::Failed);
                let summary = ReconciliationSummary {
                    id: summary_id,
                    started_at,
                    finished_at: Some(Utc::now()),
                    additions: 0,
                    deletions: 0,
                    failures: 0,
                    status: "FAILED".to_string(),
                    message: Some(e.to_string()),
                };
                if let Err(persist_err) = self.store.insert_reconciliation_summary(&summary).await {
                    log::error!("cannot persist failed pass summary: {persist_err}");
                }
            }
        }
        result
    }

    async fn pass_inner(
        &self,
        summary_id: Uuid,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<SyncStatus> {
        self.set_state(PassState::Counting);
        let counts = self.gather_counts().await?;

        let csca_discrepancy = counts.csca_db.abs_diff(counts.csca_ldap);
        let dsc_discrepancy = counts.dsc_db.abs_diff(counts.dsc_ldap);
        let dsc_nc_discrepancy = counts.dsc_nc_db.abs_diff(counts.dsc_nc_ldap);
        let crl_discrepancy = counts.crl_db.abs_diff(counts.crl_ldap);
        let total_discrepancy =
            csca_discrepancy + dsc_discrepancy + dsc_nc_discrepancy + crl_discrepancy;

        let mut additions = 0u32;
        let mut failures: Vec<ReconciliationFailure> = Vec::new();

        if self.config.auto_reconcile && total_discrepancy > 0 {
            self.set_state(PassState::Repairing);
            additions = self.repair(&mut failures).await?;
        }

        self.set_state(PassState::Persisting);
        let status = SyncStatus {
            id: Uuid::new_v4(),
            checked_at: started_at,
            csca_db: counts.csca_db,
            dsc_db: counts.dsc_db,
            dsc_nc_db: counts.dsc_nc_db,
            crl_db: counts.crl_db,
            csca_ldap: counts.csca_ldap,
            dsc_ldap: counts.dsc_ldap,
            dsc_nc_ldap: counts.dsc_nc_ldap,
            crl_ldap: counts.crl_ldap,
            csca_discrepancy,
            dsc_discrepancy,
            dsc_nc_discrepancy,
            crl_discrepancy,
            total_discrepancy,
            sync_required: total_discrepancy > 0,
            country_breakdown: counts.country_breakdown,
        };
        self.store.insert_sync_status(&status).await?;

        let summary = ReconciliationSummary {
            id: summary_id,
            started_at,
            finished_at: Some(Utc::now()),
            additions,
            deletions: 0,
            failures: failures.len() as u32,
            status: "COMPLETED".to_string(),
            message: None,
        };
        self.store.insert_reconciliation_summary(&summary).await?;
        if !failures.is_empty() {
            self.store
                .insert_reconciliation_failures(summary_id, &failures)
                .await?;
        }

        if self.config.revalidate_on_sync {
            self.revalidate_expiring().await?;
        }

        log::info!(
            "reconciliation pass: total discrepancy {}, {} additions, {} failures",
            total_discrepancy,
            additions,
            failures.len()
        );
        Ok(status)
    }

    async fn gather_counts(&self) -> Result<Counts> {
        let csca_db = self.store.count_certificates_by_type(CertType::Csca).await?;
        let dsc_db = self.store.count_certificates_by_type(CertType::Dsc).await?;
        let dsc_nc_db = self
            .store
            .count_certificates_by_type(CertType::DscNc)
            .await?;
        let crl_db = self.store.count_crls().await?;

        let csca_ldap = self.directory.count_by_kind(DirectoryKind::Csca).await?;
        let dsc_ldap = self.directory.count_by_kind(DirectoryKind::Dsc).await?;
        let dsc_nc_ldap = self.directory.count_by_kind(DirectoryKind::DscNc).await?;
        let crl_ldap = self.directory.count_by_kind(DirectoryKind::Crl).await?;

        let mut country_breakdown: BTreeMap<String, CountryCounts> = BTreeMap::new();
        for cert_type in CertType::published_types() {
            for (country, n) in self.store.count_certificates_by_country(cert_type).await? {
                country_breakdown.entry(country).or_default().db += n;
            }
        }
        for (country, n) in self.store.count_crls_by_country().await? {
            country_breakdown.entry(country).or_default().db += n;
        }
        for kind in DirectoryKind::all() {
            for (country, n) in self.directory.count_by_kind_and_country(kind).await? {
                country_breakdown.entry(country).or_default().ldap += n;
            }
        }

        Ok(Counts {
            csca_db,
            dsc_db,
            dsc_nc_db,
            crl_db,
            csca_ldap,
            dsc_ldap,
            dsc_nc_ldap,
            crl_ldap,
            country_breakdown,
        })
    }

    /// Publish unpublished rows, bounded per type by the configured batch
    /// size. Individual failures are recorded and the batch continues.
    async fn repair(&self, failures: &mut Vec<ReconciliationFailure>) -> Result<u32> {
        let batch = self.config.max_batch_size;
        let mut additions = 0u32;

        for cert_type in CertType::published_types() {
            let pending = self.store.unpublished_certificates(cert_type, batch).await?;
            for cert in pending {
                match self.directory.add_certificate(&cert).await {
                    Ok(dn) => {
                        self.store
                            .mark_certificate_stored(&cert.fingerprint, true)
                            .await?;
                        additions += 1;
                        log::debug!("published {dn}");
                    }
                    Err(e) => {
                        failures.push(ReconciliationFailure {
                            cert_type: cert_type.as_str().to_string(),
                            operation: "ADD".to_string(),
                            country: cert.country.clone(),
                            subject: cert.subject_dn.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        let pending_crls = self.store.unpublished_crls(batch).await?;
        for crl in pending_crls {
            match self.directory.add_crl(&crl).await {
                Ok(dn) => {
                    self.store.mark_crl_stored(&crl.fingerprint, true).await?;
                    additions += 1;
                    log::debug!("published {dn}");
                }
                Err(e) => {
                    failures.push(ReconciliationFailure {
                        cert_type: "CRL".to_string(),
                        operation: "ADD".to_string(),
                        country: crl.country.clone(),
                        subject: crl.issuer_dn.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(additions)
    }

    /// Re-run chain validation over everything expiring within 30 days;
    /// outcomes are logged for the operator, nothing is mutated.
    async fn revalidate_expiring(&self) -> Result<()> {
        let validator = ChainValidator::new(self.store.clone());
        let expiring = self.store.certificates_expiring_within(30).await?;
        for cert in expiring {
            if cert.cert_type == CertType::Csca {
                continue;
            }
            let verdict = validator.validate(&cert, None).await?;
            if verdict.status != ChainStatus::Valid {
                log::warn!(
                    "expiring certificate {} ({}) no longer validates: {:?} {:?}",
                    cert.subject_dn,
                    cert.fingerprint,
                    verdict.status,
                    verdict.errors
                );
            } else {
                log::info!(
                    "expiring certificate {} still valid until {}",
                    cert.subject_dn,
                    cert.not_after
                );
            }
        }
        Ok(())
    }
}

/// Seconds until the next wall-clock occurrence of `hour:minute` (UTC).
pub fn seconds_until_next(hour: u32, minute: u32, now: chrono::DateTime<Utc>) -> i64 {
    let today = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now);
    let next = if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    };
    (next - now).num_seconds().max(1)
}

/// Daily scheduler loop; runs until the process exits.
pub async fn run_daily(reconciler: Arc<Reconciler>, hour: u32, minute: u32) {
    loop {
        let wait = seconds_until_next(hour, minute, Utc::now());
        log::info!("next reconciliation pass in {wait}s");
        tokio::time::sleep(std::time::Duration::from_secs(wait as u64)).await;
        match reconciler.run_pass().await {
            Ok(status) => log::info!(
                "scheduled pass done, discrepancy {}",
                status.total_discrepancy
            ),
            Err(PkdError::Conflict(_)) => {
                log::warn!("scheduled pass skipped, reconciliation already running")
            }
            Err(e) => log::error!("scheduled pass failed: {e}"),
        }
    }
}
