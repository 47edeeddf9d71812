//! Service container: wires configuration, store, directory and notifier at
//! startup. There is no process-global mutable state beyond the pools the
//! container owns.

use std::sync::Arc;
use std::time::Duration;

use crate::classifier::CountryPolicy;
use crate::config::Config;
use crate::directory::{DirectoryKind, DirectoryPort, LdapDirectory, MemoryDirectory};
use crate::error::{PkdError, Result};
use crate::ingest::IngestPipeline;
use crate::notify::{LogNotifier, NotificationPort};
use crate::pa::PaEngine;
use crate::portal::PortalSync;
use crate::reconcile::{run_daily, Reconciler};
use crate::store::{MemoryStore, PgStore, TrustStore};

const PORTAL_POLL_INTERVAL: Duration = Duration::from_secs(6 * 3600);

pub struct ServiceContainer {
    pub config: Config,
    pub store: Arc<dyn TrustStore>,
    pub directory: Arc<dyn DirectoryPort>,
    pub notifier: Arc<dyn NotificationPort>,
}

impl ServiceContainer {
    /// Connect to the configured backends. Startup failures map to the
    /// process exit contract: storage unreachable -> 2, directory
    /// unreachable -> 3.
    pub async fn connect(config: Config) -> Result<Self> {
        let store = PgStore::connect(&config.database).await?;
        let directory = LdapDirectory::new(config.ldap.clone());
        // Probe the directory so an unreachable endpoint fails startup
        // instead of the first reconciliation pass.
        directory
            .count_by_kind(DirectoryKind::Csca)
            .await
            .map_err(|e| PkdError::Directory(format!("directory probe failed: {e}")))?;

        let notifier = LogNotifier::new(config.portal.notify_email.clone());
        Ok(ServiceContainer {
            config,
            store: Arc::new(store),
            directory: Arc::new(directory),
            notifier: Arc::new(notifier),
        })
    }

    /// Fully in-memory container for dry runs and tests.
    pub fn in_memory(config: Config) -> Self {
        let base_dn = config.ldap.base_dn.clone();
        let notifier = LogNotifier::new(config.portal.notify_email.clone());
        ServiceContainer {
            config,
            store: Arc::new(MemoryStore::new()),
            directory: Arc::new(MemoryDirectory::new(base_dn)),
            notifier: Arc::new(notifier),
        }
    }

    pub fn country_policy(&self) -> CountryPolicy {
        self.config.country_policy
    }

    pub fn pipeline(&self) -> IngestPipeline {
        IngestPipeline::new(self.store.clone(), self.country_policy())
    }

    pub fn pa_engine(&self) -> PaEngine {
        PaEngine::new(self.store.clone(), self.country_policy())
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::new(Reconciler::new(
            self.store.clone(),
            self.directory.clone(),
            self.config.reconcile.clone(),
        ))
    }

    pub fn portal_sync(&self) -> Result<PortalSync> {
        PortalSync::new(
            self.store.clone(),
            self.notifier.clone(),
            self.config.portal.clone(),
        )
    }

    /// Long-running mode: daily reconciliation timer plus periodic portal
    /// polling, until interrupted.
    pub async fn serve(self) -> Result<()> {
        let reconciler = self.reconciler();
        if self.config.reconcile.daily_sync_enabled {
            let hour = self.config.reconcile.daily_sync_hour;
            let minute = self.config.reconcile.daily_sync_minute;
            tokio::spawn(run_daily(reconciler.clone(), hour, minute));
        } else {
            log::info!("daily reconciliation disabled");
        }

        let portal = self.portal_sync()?;
        tokio::spawn(async move {
            loop {
                match portal.check_once().await {
                    Ok(outcome) => {
                        if !outcome.new_versions.is_empty() {
                            log::info!(
                                "portal pass found {} new version(s)",
                                outcome.new_versions.len()
                            );
                        }
                    }
                    Err(e) => log::error!("portal pass failed: {e}"),
                }
                tokio::time::sleep(PORTAL_POLL_INTERVAL).await;
            }
        });

        log::info!("serving; press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| PkdError::Io(e))?;
        log::info!("shutting down");
        Ok(())
    }
}
