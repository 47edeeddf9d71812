//! ICAO portal auto-sync.
//!
//! Polls the public download page, extracts bundle filenames per
//! collection, records newly published versions and notifies the operator.
//! A network failure leaves state unchanged; a malformed filename skips that
//! filename only.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use regex::Regex;
use uuid::Uuid;

use crate::config::PortalConfig;
use crate::error::{PkdError, Result};
use crate::models::{IcaoCollection, IcaoVersion, IcaoVersionStatus};
use crate::notify::NotificationPort;
use crate::store::TrustStore;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_ATTEMPTS: u32 = 5;
const RETRY_BASE: Duration = Duration::from_secs(30);
const RETRY_CAP: Duration = Duration::from_secs(300);

/// One filename successfully extracted from the portal page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedFile {
    pub collection: IcaoCollection,
    pub filename: String,
    pub version: u32,
}

/// Extract bundle filenames per collection. Filenames whose version digits
/// overflow are skipped, not fatal.
pub fn extract_versions(html: &str) -> Vec<DetectedFile> {
    let mut found = Vec::new();
    for collection in IcaoCollection::all() {
        let pattern = format!(
            r"icaopkd-{}-complete-(\d+)\.ldif",
            collection.file_prefix()
        );
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        for caps in re.captures_iter(html) {
            let filename = caps[0].to_string();
            let Ok(version) = caps[1].parse::<u32>() else {
                log::warn!("skipping unparsable portal filename: {filename}");
                continue;
            };
            let detected = DetectedFile {
                collection,
                filename,
                version,
            };
            if !found.contains(&detected) {
                found.push(detected);
            }
        }
    }
    found
}

pub struct PortalSync {
    store: Arc<dyn TrustStore>,
    notifier: Arc<dyn NotificationPort>,
    config: PortalConfig,
    client: reqwest::Client,
    auto_notify: bool,
}

/// Outcome of one portal pass.
#[derive(Debug)]
pub struct PortalCheckOutcome {
    pub new_versions: Vec<IcaoVersion>,
    pub notified: bool,
}

impl PortalSync {
    pub fn new(
        store: Arc<dyn TrustStore>,
        notifier: Arc<dyn NotificationPort>,
        config: PortalConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| PkdError::Network(e.to_string()))?;
        let auto_notify = config.notify_email.is_some();
        Ok(PortalSync {
            store,
            notifier,
            config,
            client,
            auto_notify,
        })
    }

    async fn fetch_portal_html(&self) -> Result<String> {
        let mut last_error = None;
        for attempt in 0..RETRY_ATTEMPTS {
            match self.client.get(&self.config.url).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(ok) => return Ok(ok.text().await?),
                    Err(e) => last_error = Some(PkdError::Network(e.to_string())),
                },
                Err(e) => last_error = Some(PkdError::Network(e.to_string())),
            }
            if attempt + 1 < RETRY_ATTEMPTS {
                let backoff = RETRY_BASE
                    .saturating_mul(1u32 << attempt.min(4))
                    .min(RETRY_CAP);
                let jitter_ms = rand::thread_rng().gen_range(0..=1000 * (attempt as u64 + 1));
                let wait = backoff + Duration::from_millis(jitter_ms);
                log::warn!(
                    "portal fetch attempt {} failed, retrying in {:?}",
                    attempt + 1,
                    wait
                );
                tokio::time::sleep(wait).await;
            }
        }
        Err(last_error.unwrap_or_else(|| PkdError::Network("portal fetch failed".to_string())))
    }

    /// One full portal pass: fetch, diff, insert DETECTED rows, notify.
    pub async fn check_once(&self) -> Result<PortalCheckOutcome> {
        let html = self.fetch_portal_html().await?;
        self.process_page(&html).await
    }

    /// Diff a fetched page against the stored versions (separated from the
    /// fetch so the parsing path is directly testable).
    pub async fn process_page(&self, html: &str) -> Result<PortalCheckOutcome> {
        let detected = extract_versions(html);
        log::debug!("portal page lists {} bundle filenames", detected.len());

        let mut new_versions = Vec::new();
        for file in detected {
            let version = IcaoVersion {
                id: Uuid::new_v4(),
                collection: file.collection,
                filename: file.filename,
                version: file.version,
                status: IcaoVersionStatus::Detected,
                detected_at: Utc::now(),
                notified: false,
                upload_id: None,
            };
            let outcome = self.store.insert_icao_version_if_absent(&version).await?;
            if outcome.inserted {
                log::info!(
                    "detected new ICAO bundle {} (collection {}, version {})",
                    version.filename,
                    version.collection,
                    version.version
                );
                new_versions.push(version);
            }
        }

        let mut notified = false;
        if self.auto_notify && !new_versions.is_empty() {
            let body = new_versions
                .iter()
                .map(|v| format!("{} {} v{}", v.collection, v.filename, v.version))
                .collect::<Vec<_>>()
                .join("\n");
            let subject = format!("{} new ICAO PKD file(s) available", new_versions.len());
            self.notifier.notify(&subject, &body).await?;
            for version in &mut new_versions {
                self.store
                    .update_icao_version_status(version.id, IcaoVersionStatus::Notified, true)
                    .await?;
                version.status = IcaoVersionStatus::Notified;
                version.notified = true;
            }
            notified = true;
        }

        Ok(PortalCheckOutcome {
            new_versions,
            notified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_all_three_collections() {
        let html = r#"
            <a href="/download/icaopkd-001-complete-005973.ldif">DSC/CRL</a>
            <a href="/download/icaopkd-002-complete-000350.ldif">Master Lists</a>
            <a href="/download/icaopkd-003-complete-000118.ldif">NC</a>
        "#;
        let found = extract_versions(html);
        assert_eq!(found.len(), 3);
        assert!(found.contains(&DetectedFile {
            collection: IcaoCollection::DscCrl,
            filename: "icaopkd-001-complete-005973.ldif".into(),
            version: 5973,
        }));
        assert!(found.contains(&DetectedFile {
            collection: IcaoCollection::MasterList,
            filename: "icaopkd-002-complete-000350.ldif".into(),
            version: 350,
        }));
        assert!(found.contains(&DetectedFile {
            collection: IcaoCollection::DscNc,
            filename: "icaopkd-003-complete-000118.ldif".into(),
            version: 118,
        }));
    }

    #[test]
    fn duplicate_links_collapse() {
        let html = "icaopkd-001-complete-005973.ldif icaopkd-001-complete-005973.ldif";
        assert_eq!(extract_versions(html).len(), 1);
    }

    #[test]
    fn unrelated_filenames_ignored() {
        let html = "icaopkd-004-complete-000001.ldif notes.txt icaopkd-001-partial-5.ldif";
        assert!(extract_versions(html).is_empty());
    }
}
