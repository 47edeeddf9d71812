//! Offline trust chain validation.
//!
//! Builds a path from a leaf to a self-signed anchor through issuer-DN
//! lookups in the trust store, then walks the path verifying signatures,
//! validity windows, key usage, basic constraints and CRL revocation.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

use crate::crypto::signature::verify_certificate_signature;
use crate::crypto::signature::verify_crl_signature;
use crate::crypto::x509::dn_equal;
use crate::error::Result;
use crate::models::{
    CertDescriptor, CertType, CertificateRecord, ChainStatus, CrlRecord, CrlStatus,
};
use crate::store::TrustStore;

const DEFAULT_MAX_DEPTH: usize = 10;

/// Verdict of one chain validation.
#[derive(Debug, Clone)]
pub struct ChainVerdict {
    pub status: ChainStatus,
    pub signature_valid: bool,
    pub chain_valid: bool,
    pub not_revoked: bool,
    pub validity_valid: bool,
    pub constraints_valid: bool,
    pub crl_status: CrlStatus,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    /// Leaf-to-anchor path that was examined.
    pub chain: Vec<CertDescriptor>,
    /// The trust anchor the path terminated at, when one was found.
    pub anchor: Option<CertificateRecord>,
}

impl ChainVerdict {
    fn describe(cert: &CertificateRecord) -> CertDescriptor {
        CertDescriptor {
            subject_dn: cert.subject_dn.clone(),
            serial: cert.serial.clone(),
            issuer_dn: cert.issuer_dn.clone(),
            fingerprint: cert.fingerprint.clone(),
        }
    }
}

/// Pick the best CSCA when several share a subject DN (renewals): prefer one
/// whose validity contains `at`, else the highest notBefore.
pub fn select_anchor_candidate(
    mut candidates: Vec<CertificateRecord>,
    at: DateTime<Utc>,
) -> Option<CertificateRecord> {
    candidates.sort_by(|a, b| {
        let a_current = a.validity_contains(at);
        let b_current = b.validity_contains(at);
        b_current
            .cmp(&a_current)
            .then(b.not_before.cmp(&a.not_before))
    });
    candidates.into_iter().next()
}

pub struct ChainValidator {
    store: Arc<dyn TrustStore>,
    max_depth: usize,
}

struct WalkState {
    signature_valid: bool,
    chain_valid: bool,
    not_revoked: bool,
    validity_valid: bool,
    constraints_valid: bool,
    crl_status: CrlStatus,
    errors: Vec<String>,
}

impl WalkState {
    fn new() -> Self {
        WalkState {
            signature_valid: true,
            chain_valid: true,
            not_revoked: true,
            validity_valid: true,
            constraints_valid: true,
            crl_status: CrlStatus::Clean,
            errors: Vec::new(),
        }
    }
}

impl ChainValidator {
    pub fn new(store: Arc<dyn TrustStore>) -> Self {
        ChainValidator {
            store,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Validate `leaf` against `anchor` (or an anchor located in the store).
    pub async fn validate(
        &self,
        leaf: &CertificateRecord,
        anchor: Option<&CertificateRecord>,
    ) -> Result<ChainVerdict> {
        self.validate_at(leaf, anchor, Utc::now()).await
    }

    /// Validation with an explicit evaluation instant, used by tests and the
    /// expiry audit.
    pub async fn validate_at(
        &self,
        leaf: &CertificateRecord,
        anchor: Option<&CertificateRecord>,
        at: DateTime<Utc>,
    ) -> Result<ChainVerdict> {
        let started = Instant::now();
        let mut state = WalkState::new();

        let chain = self.build_path(leaf, anchor, at, &mut state).await?;
        let anchor_record = chain
            .last()
            .filter(|c| c.self_signed)
            .cloned();

        if let Some(anchor) = &anchor_record {
            self.check_anchor(anchor, at, &mut state);
        }

        // Per-hop checks, child against parent, walking towards the anchor.
        for pair in chain.windows(2) {
            self.check_hop(&pair[0], &pair[1], at, &mut state).await?;
        }

        // Leaf role key usage: a DSC signs documents.
        if matches!(leaf.cert_type, CertType::Dsc | CertType::DscNc)
            && !leaf.key_usage.iter().any(|u| u == "digitalSignature")
        {
            state.constraints_valid = false;
            state
                .errors
                .push(format!("DSC without digitalSignature: {}", leaf.subject_dn));
        }

        let status = if !state.not_revoked {
            ChainStatus::Revoked
        } else if !state.validity_valid {
            ChainStatus::Expired
        } else if !(state.signature_valid && state.chain_valid && state.constraints_valid) {
            ChainStatus::Invalid
        } else {
            ChainStatus::Valid
        };

        Ok(ChainVerdict {
            status,
            signature_valid: state.signature_valid,
            chain_valid: state.chain_valid,
            not_revoked: state.not_revoked,
            validity_valid: state.validity_valid,
            constraints_valid: state.constraints_valid,
            crl_status: state.crl_status,
            duration_ms: started.elapsed().as_millis() as u64,
            errors: state.errors,
            chain: chain.iter().map(ChainVerdict::describe).collect(),
            anchor: anchor_record,
        })
    }

    /// Follow issuer-DN -> subject-DN lookups until a self-signed
    /// certificate or the depth limit.
    async fn build_path(
        &self,
        leaf: &CertificateRecord,
        nominated: Option<&CertificateRecord>,
        at: DateTime<Utc>,
        state: &mut WalkState,
    ) -> Result<Vec<CertificateRecord>> {
        let mut chain = vec![leaf.clone()];
        let mut current = leaf.clone();

        while !current.self_signed {
            if chain.len() >= self.max_depth {
                state.chain_valid = false;
                state.errors.push(format!(
                    "chain exceeds maximum depth {}",
                    self.max_depth
                ));
                return Ok(chain);
            }

            if let Some(anchor) = nominated {
                if anchor.subject_dn_normalized == current.issuer_dn_normalized {
                    chain.push(anchor.clone());
                    return Ok(chain);
                }
            }

            let mut candidates: Vec<CertificateRecord> = self
                .store
                .certificates_by_subject(&current.issuer_dn_normalized)
                .await?
                .into_iter()
                .filter(|c| c.is_ca && c.fingerprint != current.fingerprint)
                .collect();
            // Prefer CSCAs over link certificates at every step.
            let cscas: Vec<CertificateRecord> = candidates
                .iter()
                .filter(|c| c.cert_type == CertType::Csca)
                .cloned()
                .collect();
            if !cscas.is_empty() {
                candidates = cscas;
            }

            match select_anchor_candidate(candidates, at) {
                Some(parent) => {
                    current = parent.clone();
                    chain.push(parent);
                }
                None => {
                    state.chain_valid = false;
                    state.errors.push(format!(
                        "ISSUER_NOT_FOUND: no stored CA matches issuer {}",
                        current.issuer_dn
                    ));
                    return Ok(chain);
                }
            }
        }
        Ok(chain)
    }

    /// CSCA checks: self-signed CA, keyCertSign, self-signature, validity.
    fn check_anchor(&self, anchor: &CertificateRecord, at: DateTime<Utc>, state: &mut WalkState) {
        if !anchor.is_ca {
            state.constraints_valid = false;
            state.errors.push(format!(
                "trust anchor is not a CA: {}",
                anchor.subject_dn
            ));
        }
        if !anchor.key_usage.iter().any(|u| u == "keyCertSign") {
            state.constraints_valid = false;
            state.errors.push(format!(
                "trust anchor without keyCertSign: {}",
                anchor.subject_dn
            ));
        }
        if !anchor.validity_contains(at) {
            state.validity_valid = false;
            state.errors.push(format!(
                "trust anchor outside validity window: {}",
                anchor.subject_dn
            ));
        }
        let outcome = verify_certificate_signature(&anchor.der, &anchor.der);
        if !outcome.valid {
            state.signature_valid = false;
            state.errors.push(format!(
                "trust anchor self-signature failed: {}",
                outcome.reason.unwrap_or_default()
            ));
        }
    }

    async fn check_hop(
        &self,
        child: &CertificateRecord,
        parent: &CertificateRecord,
        at: DateTime<Utc>,
        state: &mut WalkState,
    ) -> Result<()> {
        // ASN.1-aware issuer/subject agreement on the actual DER names; the
        // normalised lookup that found the parent is only a search key.
        let names_match = {
            let child_parsed = X509Certificate::from_der(&child.der);
            let parent_parsed = X509Certificate::from_der(&parent.der);
            match (child_parsed, parent_parsed) {
                (Ok((_, c)), Ok((_, p))) => dn_equal(c.issuer(), p.subject()),
                _ => false,
            }
        };
        if !names_match {
            state.chain_valid = false;
            state.errors.push(format!(
                "issuer/subject mismatch between {} and {}",
                child.subject_dn, parent.subject_dn
            ));
        }

        let outcome = verify_certificate_signature(&child.der, &parent.der);
        if !outcome.valid {
            state.signature_valid = false;
            state.errors.push(format!(
                "signature of {} under {} failed: {}",
                child.subject_dn,
                parent.subject_dn,
                outcome.reason.unwrap_or_default()
            ));
        }

        if !child.validity_contains(at) {
            state.validity_valid = false;
            state.errors.push(format!(
                "certificate outside validity window: {}",
                child.subject_dn
            ));
        }

        if !parent.is_ca {
            state.constraints_valid = false;
            state.errors.push(format!(
                "issuing certificate is not a CA: {}",
                parent.subject_dn
            ));
        }

        self.check_revocation(child, parent, at, state).await
    }

    /// CRL lookup for `child` under `parent`: the CRL must be issued by the
    /// parent's subject DN in the parent's country, be current, and verify
    /// under the parent key. A missing CRL is surfaced as a warning, not a
    /// failure.
    async fn check_revocation(
        &self,
        child: &CertificateRecord,
        parent: &CertificateRecord,
        at: DateTime<Utc>,
        state: &mut WalkState,
    ) -> Result<()> {
        let crls = self
            .store
            .crls_by_issuer(&parent.subject_dn_normalized, &parent.country)
            .await?;
        if crls.is_empty() {
            if state.crl_status == CrlStatus::Clean {
                state.crl_status = CrlStatus::Unavailable;
            }
            state.errors.push(format!(
                "CRL_UNAVAILABLE: no CRL on file for {}",
                parent.subject_dn
            ));
            return Ok(());
        }

        let mut current: Vec<&CrlRecord> = crls.iter().filter(|c| c.is_current_at(at)).collect();
        if current.is_empty() {
            if state.crl_status == CrlStatus::Clean {
                state.crl_status = CrlStatus::Stale;
            }
            state.errors.push(format!(
                "no current CRL for {} (all outside [thisUpdate, nextUpdate])",
                parent.subject_dn
            ));
            return Ok(());
        }
        // Newest snapshot decides.
        current.sort_by(|a, b| b.this_update.cmp(&a.this_update));
        let crl = current[0];

        let outcome = verify_crl_signature(&crl.der, &parent.der);
        if !outcome.valid {
            if state.crl_status == CrlStatus::Clean {
                state.crl_status = CrlStatus::Unavailable;
            }
            state.errors.push(format!(
                "CRL signature under {} failed: {}",
                parent.subject_dn,
                outcome.reason.unwrap_or_default()
            ));
            return Ok(());
        }

        if let Some(entry) = crl.revokes_serial(&child.serial) {
            state.not_revoked = false;
            state.crl_status = CrlStatus::Revoked;
            state.errors.push(format!(
                "certificate {} serial {} revoked at {}{}",
                child.subject_dn,
                child.serial,
                entry.revoked_at,
                entry
                    .reason
                    .as_ref()
                    .map(|r| format!(" ({r})"))
                    .unwrap_or_default()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn record(subject: &str, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> CertificateRecord {
        CertificateRecord {
            id: Uuid::new_v4(),
            fingerprint: format!("{:064x}", not_before.timestamp()),
            der: vec![],
            cert_type: CertType::Csca,
            country: "UN".into(),
            subject_dn: subject.into(),
            issuer_dn: subject.into(),
            subject_dn_normalized: subject.to_lowercase(),
            issuer_dn_normalized: subject.to_lowercase(),
            serial: "01".into(),
            not_before,
            not_after,
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

    #[test]
    fn anchor_tie_break_prefers_currently_valid() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let expired = record("CN=CSCA", now - Duration::days(3650), now - Duration::days(1));
        let current = record("CN=CSCA", now - Duration::days(100), now + Duration::days(100));
        let picked =
            select_anchor_candidate(vec![expired.clone(), current.clone()], now).unwrap();
        assert_eq!(picked.fingerprint, current.fingerprint);
    }

    #[test]
    fn anchor_tie_break_falls_back_to_newest() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let older = record("CN=CSCA", now - Duration::days(400), now - Duration::days(300));
        let newer = record("CN=CSCA", now - Duration::days(200), now - Duration::days(10));
        let picked = select_anchor_candidate(vec![older, newer.clone()], now).unwrap();
        assert_eq!(picked.fingerprint, newer.fingerprint);
    }
}
