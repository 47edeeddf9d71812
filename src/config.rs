//! Environment-driven configuration.
//!
//! All keys from the deployment contract are read once at startup; an
//! invalid value aborts the process with exit code 1 before any I/O is
//! attempted.

use serde::{Deserialize, Serialize};

use crate::classifier::CountryPolicy;
use crate::error::{PkdError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub pool_min: u32,
    pub pool_max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    pub host: String,
    pub port: u16,
    /// Write endpoint; defaults to the read endpoint when not set.
    pub write_host: String,
    pub write_port: u16,
    pub bind_dn: String,
    pub bind_password: String,
    pub base_dn: String,
}

impl LdapConfig {
    pub fn read_url(&self) -> String {
        format!("ldap://{}:{}", self.host, self.port)
    }

    pub fn write_url(&self) -> String {
        format!("ldap://{}:{}", self.write_host, self.write_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub auto_reconcile: bool,
    pub max_batch_size: u32,
    pub daily_sync_enabled: bool,
    pub daily_sync_hour: u32,
    pub daily_sync_minute: u32,
    pub revalidate_on_sync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub url: String,
    pub notify_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ldap: LdapConfig,
    pub reconcile: ReconcileConfig,
    pub portal: PortalConfig,
    pub country_policy: CountryPolicy,
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PkdError::Config(format!("invalid value for {key}: {value}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(PkdError::Config(format!(
            "invalid boolean for {key}: {other}"
        ))),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; the environment variant is the
    /// production path.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key).ok_or_else(|| PkdError::Config(format!("missing required key {key}")))
        };

        let database = DatabaseConfig {
            host: get("DB_HOST", "localhost"),
            port: parse("DB_PORT", &get("DB_PORT", "5432"))?,
            name: get("DB_NAME", "pkd"),
            user: get("DB_USER", "pkd"),
            password: required("DB_PASSWORD")?,
            pool_min: parse("DB_POOL_MIN", &get("DB_POOL_MIN", "1"))?,
            pool_max: parse("DB_POOL_MAX", &get("DB_POOL_MAX", "10"))?,
        };
        if database.pool_min > database.pool_max {
            return Err(PkdError::Config(format!(
                "DB_POOL_MIN ({}) exceeds DB_POOL_MAX ({})",
                database.pool_min, database.pool_max
            )));
        }

        let ldap_host = get("LDAP_HOST", "localhost");
        let ldap_port: u16 = parse("LDAP_PORT", &get("LDAP_PORT", "389"))?;
        let ldap = LdapConfig {
            write_host: lookup("LDAP_WRITE_HOST").unwrap_or_else(|| ldap_host.clone()),
            write_port: match lookup("LDAP_WRITE_PORT") {
                Some(v) => parse("LDAP_WRITE_PORT", &v)?,
                None => ldap_port,
            },
            host: ldap_host,
            port: ldap_port,
            bind_dn: get("LDAP_BIND_DN", "cn=admin,dc=pkd,dc=local"),
            bind_password: required("LDAP_BIND_PASSWORD")?,
            base_dn: get("LDAP_BASE_DN", "dc=pkd,dc=local"),
        };

        let reconcile = ReconcileConfig {
            auto_reconcile: parse_bool("AUTO_RECONCILE", &get("AUTO_RECONCILE", "true"))?,
            max_batch_size: parse(
                "MAX_RECONCILE_BATCH_SIZE",
                &get("MAX_RECONCILE_BATCH_SIZE", "500"),
            )?,
            daily_sync_enabled: parse_bool(
                "DAILY_SYNC_ENABLED",
                &get("DAILY_SYNC_ENABLED", "true"),
            )?,
            daily_sync_hour: parse("DAILY_SYNC_HOUR", &get("DAILY_SYNC_HOUR", "2"))?,
            daily_sync_minute: parse("DAILY_SYNC_MINUTE", &get("DAILY_SYNC_MINUTE", "0"))?,
            revalidate_on_sync: parse_bool(
                "REVALIDATE_CERTS_ON_SYNC",
                &get("REVALIDATE_CERTS_ON_SYNC", "false"),
            )?,
        };
        if reconcile.daily_sync_hour > 23 {
            return Err(PkdError::Config(format!(
                "DAILY_SYNC_HOUR out of range: {}",
                reconcile.daily_sync_hour
            )));
        }
        if reconcile.daily_sync_minute > 59 {
            return Err(PkdError::Config(format!(
                "DAILY_SYNC_MINUTE out of range: {}",
                reconcile.daily_sync_minute
            )));
        }
        if reconcile.max_batch_size == 0 {
            return Err(PkdError::Config(
                "MAX_RECONCILE_BATCH_SIZE must be positive".to_string(),
            ));
        }

        let portal = PortalConfig {
            url: get(
                "ICAO_PORTAL_URL",
                "https://download.pkd.icao.int/",
            ),
            notify_email: lookup("NOTIFY_EMAIL"),
        };

        let country_policy = match get("COUNTRY_POLICY", "warn").to_ascii_lowercase().as_str() {
            "warn" => CountryPolicy::Warn,
            "reject" => CountryPolicy::Reject,
            other => {
                return Err(PkdError::Config(format!(
                    "invalid COUNTRY_POLICY: {other} (expected warn or reject)"
                )))
            }
        };

        Ok(Config {
            database,
            ldap,
            reconcile,
            portal,
            country_policy,
        })
    }
}
