//! Directory publication: deterministic DNs over an LDAP port.

pub mod client;
pub mod dn;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CertificateRecord, CrlRecord};

pub use client::LdapDirectory;
pub use dn::{container_dn, country_dn, entry_dn, ou_dn, DirectoryKind};
pub use memory::MemoryDirectory;

/// The directory contract the reconciler and publishers program against.
///
/// Implementations guarantee idempotence: adding an entry or parent that
/// already exists is success, as is deleting one that is already gone.
#[async_trait]
pub trait DirectoryPort: Send + Sync {
    /// Publish one certificate; returns the entry DN.
    async fn add_certificate(&self, cert: &CertificateRecord) -> Result<String>;
    /// Publish one CRL; returns the entry DN.
    async fn add_crl(&self, crl: &CrlRecord) -> Result<String>;
    async fn delete_entry(&self, dn: &str) -> Result<()>;
    /// Idempotent provisioning of container, country and ou parents.
    async fn ensure_parent_dn_exists(&self, kind: DirectoryKind, country: &str) -> Result<()>;
    async fn count_by_kind(&self, kind: DirectoryKind) -> Result<u64>;
    async fn count_by_kind_and_country(
        &self,
        kind: DirectoryKind,
    ) -> Result<BTreeMap<String, u64>>;
    async fn list_fingerprints(&self, kind: DirectoryKind) -> Result<Vec<String>>;
}
