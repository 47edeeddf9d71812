use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PkdError;

/// Trust-material classification of one X.509 certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertType {
    Csca,
    Dsc,
    DscNc,
    Mlsc,
    Link,
    DvlSigner,
}

impl CertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertType::Csca => "CSCA",
            CertType::Dsc => "DSC",
            CertType::DscNc => "DSC_NC",
            CertType::Mlsc => "MLSC",
            CertType::Link => "LINK",
            CertType::DvlSigner => "DVL_SIGNER",
        }
    }

    /// Types that are published into the directory tree.
    pub fn published_types() -> [CertType; 3] {
        [CertType::Csca, CertType::Dsc, CertType::DscNc]
    }
}

impl fmt::Display for CertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertType {
    type Err = PkdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CSCA" => Ok(CertType::Csca),
            "DSC" => Ok(CertType::Dsc),
            "DSC_NC" => Ok(CertType::DscNc),
            "MLSC" => Ok(CertType::Mlsc),
            "LINK" => Ok(CertType::Link),
            "DVL_SIGNER" => Ok(CertType::DvlSigner),
            other => Err(PkdError::Store(format!("unknown certificate type: {other}"))),
        }
    }
}

/// Detected format of one uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    Pem,
    Der,
    Ldif,
    MasterList,
    DeviationList,
    Unknown,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Pem => "PEM",
            FileFormat::Der => "DER",
            FileFormat::Ldif => "LDIF",
            FileFormat::MasterList => "MASTER_LIST",
            FileFormat::DeviationList => "DEVIATION_LIST",
            FileFormat::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileFormat {
    type Err = PkdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PEM" => Ok(FileFormat::Pem),
            "DER" => Ok(FileFormat::Der),
            "LDIF" => Ok(FileFormat::Ldif),
            "MASTER_LIST" => Ok(FileFormat::MasterList),
            "DEVIATION_LIST" => Ok(FileFormat::DeviationList),
            "UNKNOWN" => Ok(FileFormat::Unknown),
            other => Err(PkdError::Store(format!("unknown file format: {other}"))),
        }
    }
}

/// Lifecycle of one ingest event. Transitions form an acyclic graph:
/// PENDING -> PROCESSING -> {COMPLETED | FAILED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "PENDING",
            UploadStatus::Processing => "PROCESSING",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Failed => "FAILED",
        }
    }

    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (UploadStatus::Pending, UploadStatus::Processing)
                | (UploadStatus::Processing, UploadStatus::Completed)
                | (UploadStatus::Processing, UploadStatus::Failed)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = PkdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(UploadStatus::Pending),
            "PROCESSING" => Ok(UploadStatus::Processing),
            "COMPLETED" => Ok(UploadStatus::Completed),
            "FAILED" => Ok(UploadStatus::Failed),
            other => Err(PkdError::Store(format!("unknown upload status: {other}"))),
        }
    }
}

/// Overall Passive Authentication outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaStatus {
    Valid,
    Invalid,
    Error,
}

impl PaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaStatus::Valid => "VALID",
            PaStatus::Invalid => "INVALID",
            PaStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for PaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaStatus {
    type Err = PkdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALID" => Ok(PaStatus::Valid),
            "INVALID" => Ok(PaStatus::Invalid),
            "ERROR" => Ok(PaStatus::Error),
            other => Err(PkdError::Store(format!("unknown PA status: {other}"))),
        }
    }
}

/// Trust-chain verdict status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainStatus {
    Valid,
    Expired,
    Revoked,
    Invalid,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::Valid => "VALID",
            ChainStatus::Expired => "EXPIRED",
            ChainStatus::Revoked => "REVOKED",
            ChainStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the CRL lookup for one chain hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrlStatus {
    Clean,
    Revoked,
    /// No CRL on file for the issuer; surfaced as a warning, not a failure.
    Unavailable,
    /// A CRL exists but now is outside [thisUpdate, nextUpdate].
    Stale,
}

impl CrlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrlStatus::Clean => "CLEAN",
            CrlStatus::Revoked => "REVOKED",
            CrlStatus::Unavailable => "CRL_UNAVAILABLE",
            CrlStatus::Stale => "CRL_STALE",
        }
    }
}

impl fmt::Display for CrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICAO PKD download collections, keyed by the numeric prefix of the
/// published LDIF bundles (001/002/003).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IcaoCollection {
    DscCrl,
    MasterList,
    DscNc,
}

impl IcaoCollection {
    pub fn as_str(&self) -> &'static str {
        match self {
            IcaoCollection::DscCrl => "DSC_CRL",
            IcaoCollection::MasterList => "MASTERLIST",
            IcaoCollection::DscNc => "DSC_NC",
        }
    }

    pub fn all() -> [IcaoCollection; 3] {
        [
            IcaoCollection::DscCrl,
            IcaoCollection::MasterList,
            IcaoCollection::DscNc,
        ]
    }

    /// The `00N` prefix the portal uses for this collection's bundles.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            IcaoCollection::DscCrl => "001",
            IcaoCollection::MasterList => "002",
            IcaoCollection::DscNc => "003",
        }
    }
}

impl fmt::Display for IcaoCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IcaoCollection {
    type Err = PkdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DSC_CRL" => Ok(IcaoCollection::DscCrl),
            "MASTERLIST" => Ok(IcaoCollection::MasterList),
            "DSC_NC" => Ok(IcaoCollection::DscNc),
            other => Err(PkdError::Store(format!("unknown ICAO collection: {other}"))),
        }
    }
}

/// Lifecycle of one detected ICAO portal file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IcaoVersionStatus {
    Detected,
    Notified,
    Downloaded,
    Imported,
    Failed,
}

impl IcaoVersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IcaoVersionStatus::Detected => "DETECTED",
            IcaoVersionStatus::Notified => "NOTIFIED",
            IcaoVersionStatus::Downloaded => "DOWNLOADED",
            IcaoVersionStatus::Imported => "IMPORTED",
            IcaoVersionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for IcaoVersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IcaoVersionStatus {
    type Err = PkdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DETECTED" => Ok(IcaoVersionStatus::Detected),
            "NOTIFIED" => Ok(IcaoVersionStatus::Notified),
            "DOWNLOADED" => Ok(IcaoVersionStatus::Downloaded),
            "IMPORTED" => Ok(IcaoVersionStatus::Imported),
            "FAILED" => Ok(IcaoVersionStatus::Failed),
            other => Err(PkdError::Store(format!(
                "unknown ICAO version status: {other}"
            ))),
        }
    }
}
