//! Deterministic directory DN construction.
//!
//! The DN is a pure function of (fingerprint, type, country) plus the
//! configured base, so every entry is reproducible from its database row
//! without stored directory state. All components are ASCII (the
//! fingerprint is hex), so no DN escaping is required.

use crate::models::CertType;

/// The four directory subtrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryKind {
    Csca,
    Dsc,
    DscNc,
    Crl,
}

impl DirectoryKind {
    /// Organisational unit component.
    pub fn ou(&self) -> &'static str {
        match self {
            DirectoryKind::Csca => "csca",
            DirectoryKind::Dsc => "dsc",
            DirectoryKind::DscNc => "dsc_nc",
            DirectoryKind::Crl => "crl",
        }
    }

    /// Container: conformant material under dc=data, non-conformant under
    /// dc=nc-data.
    pub fn container(&self) -> &'static str {
        match self {
            DirectoryKind::DscNc => "dc=nc-data",
            _ => "dc=data",
        }
    }

    pub fn for_cert_type(cert_type: CertType) -> Option<DirectoryKind> {
        match cert_type {
            CertType::Csca => Some(DirectoryKind::Csca),
            CertType::Dsc => Some(DirectoryKind::Dsc),
            CertType::DscNc => Some(DirectoryKind::DscNc),
            // List signers and link certificates are not published.
            CertType::Mlsc | CertType::Link | CertType::DvlSigner => None,
        }
    }

    pub fn all() -> [DirectoryKind; 4] {
        [
            DirectoryKind::Csca,
            DirectoryKind::Dsc,
            DirectoryKind::DscNc,
            DirectoryKind::Crl,
        ]
    }
}

impl std::fmt::Display for DirectoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ou())
    }
}

/// `<container>,<base>` - e.g. `dc=data,dc=pkd,dc=local`.
pub fn container_dn(base: &str, kind: DirectoryKind) -> String {
    format!("{},{}", kind.container(), base)
}

/// `c=<country>,<container>,<base>`.
pub fn country_dn(base: &str, kind: DirectoryKind, country: &str) -> String {
    format!("c={},{}", country, container_dn(base, kind))
}

/// `o=<ou>,c=<country>,<container>,<base>`.
pub fn ou_dn(base: &str, kind: DirectoryKind, country: &str) -> String {
    format!("o={},{}", kind.ou(), country_dn(base, kind, country))
}

/// Leaf DN: `cn=<fingerprint>,o=<ou>,c=<country>,<container>,<base>`.
pub fn entry_dn(base: &str, kind: DirectoryKind, country: &str, fingerprint: &str) -> String {
    format!("cn={},{}", fingerprint, ou_dn(base, kind, country))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "dc=pkd,dc=local";

    #[test]
    fn dn_shapes() {
        let fp = "ab".repeat(32);
        assert_eq!(
            entry_dn(BASE, DirectoryKind::Csca, "NL", &fp),
            format!("cn={fp},o=csca,c=NL,dc=data,dc=pkd,dc=local")
        );
        assert_eq!(
            entry_dn(BASE, DirectoryKind::DscNc, "DE", &fp),
            format!("cn={fp},o=dsc_nc,c=DE,dc=nc-data,dc=pkd,dc=local")
        );
        assert_eq!(
            entry_dn(BASE, DirectoryKind::Crl, "FR", &fp),
            format!("cn={fp},o=crl,c=FR,dc=data,dc=pkd,dc=local")
        );
    }

    #[test]
    fn dn_is_deterministic() {
        let fp = "cd".repeat(32);
        let a = entry_dn(BASE, DirectoryKind::Dsc, "KR", &fp);
        let b = entry_dn(BASE, DirectoryKind::Dsc, "KR", &fp);
        assert_eq!(a, b);
    }

    #[test]
    fn unpublished_types_have_no_kind() {
        assert!(DirectoryKind::for_cert_type(CertType::Mlsc).is_none());
        assert!(DirectoryKind::for_cert_type(CertType::Link).is_none());
        assert_eq!(
            DirectoryKind::for_cert_type(CertType::DscNc),
            Some(DirectoryKind::DscNc)
        );
    }
}
