use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::SyncConfig;
use crate::local_store::LocalStore;
use crate::migration::trigger::{MigrationTrigger, NoticeSink};
use crate::migration::MigrationEngine;
use crate::remote::{RemoteBackend, RemoteClient};
use crate::session::SessionHandle;
use crate::{AppError, AppResult};

/// Everything the CLI and the desktop shell share, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: LocalStore,
    pub session: SessionHandle,
    pub remote: RemoteClient,
    pub engine: MigrationEngine,
    pub trigger: MigrationTrigger,
    pub catalog: Catalog,
}

impl AppState {
    pub fn new(
        store: LocalStore,
        backend: Arc<dyn RemoteBackend>,
        sink: Arc<dyn NoticeSink>,
    ) -> Self {
        let session = SessionHandle::with_store(store.clone());
        let remote = RemoteClient::new(backend, session.clone());
        let engine = MigrationEngine::new(store.clone(), remote.clone());
        let trigger = MigrationTrigger::new(engine.clone(), sink);
        let catalog = Catalog::new(
            store.clone(),
            remote.clone(),
            session.clone(),
            trigger.migrating_flag(),
        );
        Self {
            store,
            session,
            remote,
            engine,
            trigger,
            catalog,
        }
    }

    /// Opens the local store file and the configured backend.
    pub async fn from_config(config: &SyncConfig, sink: Arc<dyn NoticeSink>) -> AppResult<Self> {
        let store = LocalStore::open_file(&config.store_path).map_err(|err| {
            AppError::from(err).with_context("path", config.store_path.display().to_string())
        })?;
        let backend = config.connect_backend().await?;
        Ok(Self::new(store, backend, sink))
    }

    pub fn is_migrating(&self) -> bool {
        self.trigger.is_migrating()
    }
}
