mod entities;
mod enums;

pub use entities::{
    CertDescriptor, CertificateRecord, CountryCounts, CrlRecord, IcaoVersion, IngestCounters,
    PaVerification, ParsingError, ReconciliationFailure, RevokedEntry, SyncStatus, UploadedFile,
};
pub use enums::{
    CertType, ChainStatus, CrlStatus, FileFormat, IcaoCollection, IcaoVersionStatus, PaStatus,
    UploadStatus,
};
