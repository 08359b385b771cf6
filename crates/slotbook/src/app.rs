//! Wiring of store, platform client, authentication and scheduler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::Result;
use slotbook_auth::{AuthenticationService, CredentialsStore, EncryptionKey, TokenStore};
use slotbook_client::{BookingApi, HttpBookingClient};
use slotbook_scheduler::{JobRuntime, JobStore, Scheduler, SchedulerConfig};
use slotbook_store::{KvStore, SqliteKv};
use tracing::debug;

/// Default database location: `<data dir>/slotbook/slotbook.db`.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("slotbook")
        .join("slotbook.db")
}

/// Parse the key that seals stored secrets.
pub fn encryption_key(encoded: Option<&str>) -> Result<EncryptionKey> {
    let encoded = encoded.ok_or_else(|| {
        miette::miette!(
            help = "generate one with `slotbook keygen` and pass it as --encryption-key or SLOTBOOK_ENCRYPTION_KEY",
            "no encryption key given"
        )
    })?;
    EncryptionKey::parse(encoded).map_err(|e| miette::miette!("{}", e))
}

/// Everything a command needs, built over one store.
pub struct App {
    pub credentials: CredentialsStore,
    pub auth: Arc<AuthenticationService>,
    pub api: Arc<dyn BookingApi>,
    pub scheduler: Arc<Scheduler>,
}

impl App {
    /// Open the SQLite database at `db` and talk to the platform at `base_url`.
    pub fn open(
        db: &Path,
        base_url: &str,
        key: EncryptionKey,
        config: SchedulerConfig,
    ) -> Result<Self> {
        if let Some(parent) = db.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                miette::miette!("failed to create {}: {}", parent.display(), e)
            })?;
        }
        let kv = SqliteKv::open(db)
            .map_err(|e| miette::miette!("failed to open {}: {}", db.display(), e))?;
        let api = HttpBookingClient::new(base_url).map_err(|e| miette::miette!("{}", e))?;
        debug!(db = %db.display(), base_url, "opened app");

        Ok(Self::with_parts(Arc::new(kv), Arc::new(api), key, config))
    }

    pub fn with_parts(
        kv: Arc<dyn KvStore>,
        api: Arc<dyn BookingApi>,
        key: EncryptionKey,
        config: SchedulerConfig,
    ) -> Self {
        let credentials = CredentialsStore::new(Arc::clone(&kv), key.clone());
        let auth = Arc::new(AuthenticationService::new(
            TokenStore::new(Arc::clone(&kv), key),
            credentials.clone(),
            Arc::clone(&api),
        ));
        let runtime = JobRuntime::new(auth.clone(), Arc::clone(&api));
        let scheduler = Arc::new(Scheduler::new(JobStore::new(kv), runtime, config));

        Self {
            credentials,
            auth,
            api,
            scheduler,
        }
    }
}
