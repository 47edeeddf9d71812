//! LDAP directory adapter.
//!
//! Speaks to the border-control directory over ldap3: separate read and
//! write endpoints, simple bind, bounded operation timeout. "Already
//! exists" on add and "no such object" on delete/search are treated as
//! success so concurrent publishers converge.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};

use super::dn::{container_dn, country_dn, entry_dn, ou_dn, DirectoryKind};
use super::DirectoryPort;
use crate::config::LdapConfig;
use crate::error::{PkdError, Result};
use crate::models::{CertificateRecord, CrlRecord};

const RC_ENTRY_ALREADY_EXISTS: u32 = 68;
const RC_NO_SUCH_OBJECT: u32 = 32;
const OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

pub struct LdapDirectory {
    config: LdapConfig,
}

type BinAttrs = Vec<(Vec<u8>, HashSet<Vec<u8>>)>;

fn attr(name: &str, values: &[&[u8]]) -> (Vec<u8>, HashSet<Vec<u8>>) {
    (
        name.as_bytes().to_vec(),
        values.iter().map(|v| v.to_vec()).collect(),
    )
}

/// Treat entryAlreadyExists as success (idempotent add).
fn swallow_exists(result: ldap3::result::Result<ldap3::LdapResult>) -> Result<()> {
    match result {
        Ok(res) => match res.success() {
            Ok(_) => Ok(()),
            Err(LdapError::LdapResult { result }) if result.rc == RC_ENTRY_ALREADY_EXISTS => Ok(()),
            Err(e) => Err(e.into()),
        },
        Err(e) => Err(e.into()),
    }
}

impl LdapDirectory {
    pub fn new(config: LdapConfig) -> Self {
        LdapDirectory { config }
    }

    async fn open(&self, write: bool) -> Result<Ldap> {
        let url = if write {
            self.config.write_url()
        } else {
            self.config.read_url()
        };
        let settings = LdapConnSettings::new().set_conn_timeout(OPERATION_TIMEOUT);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| PkdError::Directory(format!("cannot reach directory {url}: {e}")))?;
        ldap3::drive!(conn);
        ldap.with_timeout(OPERATION_TIMEOUT)
            .simple_bind(&self.config.bind_dn, &self.config.bind_password)
            .await?
            .success()
            .map_err(|e| PkdError::Directory(format!("bind failed: {e}")))?;
        Ok(ldap)
    }

    async fn countries(&self, ldap: &mut Ldap, kind: DirectoryKind) -> Result<Vec<String>> {
        let base = container_dn(&self.config.base_dn, kind);
        let result = ldap
            .with_timeout(OPERATION_TIMEOUT)
            .search(&base, Scope::OneLevel, "(c=*)", vec!["c"])
            .await;
        let (entries, _) = match result {
            Ok(res) => match res.success() {
                Ok(ok) => ok,
                Err(LdapError::LdapResult { result }) if result.rc == RC_NO_SUCH_OBJECT => {
                    return Ok(Vec::new())
                }
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };
        let mut countries = Vec::new();
        for entry in entries {
            let entry = SearchEntry::construct(entry);
            if let Some(values) = entry.attrs.get("c") {
                if let Some(c) = values.first() {
                    countries.push(c.clone());
                }
            }
        }
        Ok(countries)
    }

    async fn leaf_entries(
        &self,
        ldap: &mut Ldap,
        kind: DirectoryKind,
        country: &str,
    ) -> Result<Vec<String>> {
        let base = ou_dn(&self.config.base_dn, kind, country);
        let filter = match kind {
            DirectoryKind::Crl => "(objectClass=cRLDistributionPoint)",
            _ => "(objectClass=pkdDownload)",
        };
        let result = ldap
            .with_timeout(OPERATION_TIMEOUT)
            .search(&base, Scope::OneLevel, filter, vec!["cn"])
            .await;
        let (entries, _) = match result {
            Ok(res) => match res.success() {
                Ok(ok) => ok,
                Err(LdapError::LdapResult { result }) if result.rc == RC_NO_SUCH_OBJECT => {
                    return Ok(Vec::new())
                }
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };
        let mut fingerprints = Vec::new();
        for entry in entries {
            let entry = SearchEntry::construct(entry);
            if let Some(values) = entry.attrs.get("cn") {
                if let Some(cn) = values.first() {
                    fingerprints.push(cn.clone());
                }
            }
        }
        Ok(fingerprints)
    }

    async fn add_leaf(
        &self,
        kind: DirectoryKind,
        country: &str,
        fingerprint: &str,
        der: &[u8],
    ) -> Result<String> {
        if country.is_empty() {
            return Err(PkdError::Directory(format!(
                "cannot publish {fingerprint} without a country"
            )));
        }
        self.ensure_parent_dn_exists(kind, country).await?;

        let dn = entry_dn(&self.config.base_dn, kind, country, fingerprint);
        let attrs: BinAttrs = match kind {
            DirectoryKind::Crl => vec![
                attr("objectClass", &[b"top", b"cRLDistributionPoint"]),
                attr("cn", &[fingerprint.as_bytes()]),
                attr("certificateRevocationList;binary", &[der]),
            ],
            _ => vec![
                attr("objectClass", &[b"top", b"pkdDownload"]),
                attr("cn", &[fingerprint.as_bytes()]),
                attr("userCertificate;binary", &[der]),
            ],
        };

        let mut ldap = self.open(true).await?;
        let outcome = swallow_exists(ldap.with_timeout(OPERATION_TIMEOUT).add(&dn, attrs).await);
        let _ = ldap.unbind().await;
        outcome?;
        Ok(dn)
    }
}

#[async_trait]
impl DirectoryPort for LdapDirectory {
    async fn add_certificate(&self, cert: &CertificateRecord) -> Result<String> {
        let kind = DirectoryKind::for_cert_type(cert.cert_type).ok_or_else(|| {
            PkdError::Directory(format!(
                "certificate type {} is not published",
                cert.cert_type
            ))
        })?;
        self.add_leaf(kind, &cert.country, &cert.fingerprint, &cert.der)
            .await
    }

    async fn add_crl(&self, crl: &CrlRecord) -> Result<String> {
        self.add_leaf(DirectoryKind::Crl, &crl.country, &crl.fingerprint, &crl.der)
            .await
    }

    async fn delete_entry(&self, dn: &str) -> Result<()> {
        let mut ldap = self.open(true).await?;
        let result = ldap.with_timeout(OPERATION_TIMEOUT).delete(dn).await;
        let _ = ldap.unbind().await;
        match result {
            Ok(res) => match res.success() {
                Ok(_) => Ok(()),
                Err(LdapError::LdapResult { result }) if result.rc == RC_NO_SUCH_OBJECT => Ok(()),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_parent_dn_exists(&self, kind: DirectoryKind, country: &str) -> Result<()> {
        let mut ldap = self.open(true).await?;

        // Container, country, ou - parents first. Duplicate creates from
        // concurrent callers collapse to success.
        let container = container_dn(&self.config.base_dn, kind);
        let dc_value = kind.container().trim_start_matches("dc=").to_string();
        let container_attrs: BinAttrs = vec![
            attr("objectClass", &[b"top", b"dcObject", b"organization"]),
            attr("dc", &[dc_value.as_bytes()]),
            attr("o", &[dc_value.as_bytes()]),
        ];
        let outcome = swallow_exists(
            ldap.with_timeout(OPERATION_TIMEOUT)
                .add(&container, container_attrs)
                .await,
        );
        if let Err(e) = outcome {
            let _ = ldap.unbind().await;
            return Err(e);
        }

        let country_entry = country_dn(&self.config.base_dn, kind, country);
        let country_attrs: BinAttrs = vec![
            attr("objectClass", &[b"top", b"country"]),
            attr("c", &[country.as_bytes()]),
        ];
        let outcome = swallow_exists(
            ldap.with_timeout(OPERATION_TIMEOUT)
                .add(&country_entry, country_attrs)
                .await,
        );
        if let Err(e) = outcome {
            let _ = ldap.unbind().await;
            return Err(e);
        }

        let ou_entry = ou_dn(&self.config.base_dn, kind, country);
        let ou_attrs: BinAttrs = vec![
            attr("objectClass", &[b"top", b"organization"]),
            attr("o", &[kind.ou().as_bytes()]),
        ];
        let outcome = swallow_exists(
            ldap.with_timeout(OPERATION_TIMEOUT)
                .add(&ou_entry, ou_attrs)
                .await,
        );
        let _ = ldap.unbind().await;
        outcome
    }

    async fn count_by_kind(&self, kind: DirectoryKind) -> Result<u64> {
        Ok(self
            .count_by_kind_and_country(kind)
            .await?
            .values()
            .sum::<u64>())
    }

    async fn count_by_kind_and_country(
        &self,
        kind: DirectoryKind,
    ) -> Result<BTreeMap<String, u64>> {
        let mut ldap = self.open(false).await?;
        let mut counts = BTreeMap::new();
        let countries = self.countries(&mut ldap, kind).await?;
        for country in countries {
            let entries = self.leaf_entries(&mut ldap, kind, &country).await?;
            counts.insert(country, entries.len() as u64);
        }
        let _ = ldap.unbind().await;
        Ok(counts)
    }

    async fn list_fingerprints(&self, kind: DirectoryKind) -> Result<Vec<String>> {
        let mut ldap = self.open(false).await?;
        let mut fingerprints = Vec::new();
        let countries = self.countries(&mut ldap, kind).await?;
        for country in countries {
            fingerprints.extend(self.leaf_entries(&mut ldap, kind, &country).await?);
        }
        let _ = ldap.unbind().await;
        Ok(fingerprints)
    }
}
