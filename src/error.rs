use thiserror::Error;

/// Top-level error taxonomy for the PKD mirror.
///
/// Every user-visible failure carries a stable machine code (`code()`) and a
/// human message. Messages never include key material or full certificate
/// bodies.
#[derive(Debug, Error)]
pub enum PkdError {
    #[error("parse error in {what} at offset {offset}: {message}")]
    Parse {
        what: String,
        offset: usize,
        message: String,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("revocation data error: {0}")]
    Revocation(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("directory error: {0}")]
    Directory(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PkdError {
    pub fn parse(what: impl Into<String>, offset: usize, message: impl Into<String>) -> Self {
        PkdError::Parse {
            what: what.into(),
            offset,
            message: message.into(),
        }
    }

    /// Stable machine-readable code for operator-facing surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            PkdError::Parse { .. } => "PARSE_ERROR",
            PkdError::Validation(_) => "VALIDATION_ERROR",
            PkdError::Revocation(_) => "REVOCATION_ERROR",
            PkdError::Store(_) => "STORE_ERROR",
            PkdError::Directory(_) => "DIRECTORY_ERROR",
            PkdError::Network(_) => "NETWORK_ERROR",
            PkdError::Config(_) => "CONFIG_ERROR",
            PkdError::Conflict(_) => "CONFLICT",
            PkdError::Io(_) => "IO_ERROR",
        }
    }

    /// Process exit code for startup failures: 1 config, 2 storage,
    /// 3 directory.
    pub fn exit_code(&self) -> i32 {
        match self {
            PkdError::Config(_) => 1,
            PkdError::Store(_) => 2,
            PkdError::Directory(_) => 3,
            _ => 1,
        }
    }
}

impl From<sqlx::Error> for PkdError {
    fn from(e: sqlx::Error) -> Self {
        PkdError::Store(e.to_string())
    }
}

impl From<ldap3::LdapError> for PkdError {
    fn from(e: ldap3::LdapError) -> Self {
        PkdError::Directory(e.to_string())
    }
}

impl From<reqwest::Error> for PkdError {
    fn from(e: reqwest::Error) -> Self {
        PkdError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PkdError>;
