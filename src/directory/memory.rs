//! In-memory directory double for the test suite and dry runs.
//!
//! Mirrors the LDAP adapter's semantics: DN-keyed entries, idempotent
//! parent provisioning, idempotent add/delete.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::dn::{entry_dn, ou_dn, DirectoryKind};
use super::DirectoryPort;
use crate::error::{PkdError, Result};
use crate::models::{CertificateRecord, CrlRecord};

#[derive(Debug, Clone)]
struct Entry {
    kind: DirectoryKind,
    country: String,
    fingerprint: String,
}

#[derive(Default)]
struct Inner {
    parents: HashSet<String>,
    entries: BTreeMap<String, Entry>,
}

pub struct MemoryDirectory {
    base_dn: String,
    inner: Mutex<Inner>,
}

impl MemoryDirectory {
    pub fn new(base_dn: impl Into<String>) -> Self {
        MemoryDirectory {
            base_dn: base_dn.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains_dn(&self, dn: &str) -> bool {
        self.lock().entries.contains_key(dn)
    }

    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn add_entry(&self, kind: DirectoryKind, country: &str, fingerprint: &str) -> Result<String> {
        if country.is_empty() {
            return Err(PkdError::Directory(format!(
                "cannot publish {fingerprint} without a country"
            )));
        }
        let dn = entry_dn(&self.base_dn, kind, country, fingerprint);
        let parent = ou_dn(&self.base_dn, kind, country);
        let mut inner = self.lock();
        if !inner.parents.contains(&parent) {
            return Err(PkdError::Directory(format!(
                "parent entry missing for {dn}"
            )));
        }
        inner.entries.insert(
            dn.clone(),
            Entry {
                kind,
                country: country.to_string(),
                fingerprint: fingerprint.to_string(),
            },
        );
        Ok(dn)
    }
}

#[async_trait]
impl DirectoryPort for MemoryDirectory {
    async fn add_certificate(&self, cert: &CertificateRecord) -> Result<String> {
        let kind = DirectoryKind::for_cert_type(cert.cert_type).ok_or_else(|| {
            PkdError::Directory(format!(
                "certificate type {} is not published",
                cert.cert_type
            ))
        })?;
        self.ensure_parent_dn_exists(kind, &cert.country).await?;
        self.add_entry(kind, &cert.country, &cert.fingerprint)
    }

    async fn add_crl(&self, crl: &CrlRecord) -> Result<String> {
        self.ensure_parent_dn_exists(DirectoryKind::Crl, &crl.country)
            .await?;
        self.add_entry(DirectoryKind::Crl, &crl.country, &crl.fingerprint)
    }

    async fn delete_entry(&self, dn: &str) -> Result<()> {
        self.lock().entries.remove(dn);
        Ok(())
    }

    async fn ensure_parent_dn_exists(&self, kind: DirectoryKind, country: &str) -> Result<()> {
        let mut inner = self.lock();
        inner
            .parents
            .insert(super::dn::container_dn(&self.base_dn, kind));
        inner
            .parents
            .insert(super::dn::country_dn(&self.base_dn, kind, country));
        inner.parents.insert(ou_dn(&self.base_dn, kind, country));
        Ok(())
    }

    async fn count_by_kind(&self, kind: DirectoryKind) -> Result<u64> {
        Ok(self
            .lock()
            .entries
            .values()
            .filter(|e| e.kind == kind)
            .count() as u64)
    }

    async fn count_by_kind_and_country(
        &self,
        kind: DirectoryKind,
    ) -> Result<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        for entry in self.lock().entries.values() {
            if entry.kind == kind {
                *counts.entry(entry.country.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn list_fingerprints(&self, kind: DirectoryKind) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .entries
            .values()
            .filter(|e| e.kind == kind)
            .map(|e| e.fingerprint.clone())
            .collect())
    }
}
