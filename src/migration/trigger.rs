//! Binds the migration engine to authentication transitions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ts_rs::TS;

use super::{MigrationEngine, MigrationSummary};
use crate::session::AuthState;
use crate::util::dispatch_async_with_fence;
use crate::AppError;

pub const NOTICE_EVENT: &str = "migration:notice";

/// Shown for any failed attempt. Details go to the log, not the notice.
pub const FAILURE_MESSAGE: &str =
    "There was an issue migrating your local data. Your songs are still on this device; please try again later.";

/// User-facing outcome of a migration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum MigrationNotice {
    Success {
        music_migrated: usize,
        playlists_migrated: usize,
    },
    Failure {
        message: String,
    },
    NoLocalData,
}

impl MigrationNotice {
    pub fn title(&self) -> &'static str {
        match self {
            MigrationNotice::Success { .. } => "Data Migration Successful",
            MigrationNotice::Failure { .. } => "Data Migration Failed",
            MigrationNotice::NoLocalData => "No Local Data",
        }
    }

    pub fn description(&self) -> String {
        match self {
            MigrationNotice::Success {
                music_migrated,
                playlists_migrated,
            } => format!("Migrated {music_migrated} songs and {playlists_migrated} playlists."),
            MigrationNotice::Failure { message } => message.clone(),
            MigrationNotice::NoLocalData => "There is no local data to migrate.".to_string(),
        }
    }
}

impl From<MigrationSummary> for MigrationNotice {
    fn from(summary: MigrationSummary) -> Self {
        MigrationNotice::Success {
            music_migrated: summary.music_migrated,
            playlists_migrated: summary.playlists_migrated,
        }
    }
}

pub trait NoticeSink: Send + Sync {
    fn deliver(&self, notice: &MigrationNotice);
}

/// Writes notices to the log only.
pub struct LogNoticeSink;

impl NoticeSink for LogNoticeSink {
    fn deliver(&self, notice: &MigrationNotice) {
        match notice {
            MigrationNotice::Failure { message } => warn!(
                target: "cantoral",
                event = "migration_notice",
                kind = "failure",
                message = %message
            ),
            other => info!(
                target: "cantoral",
                event = "migration_notice",
                title = other.title(),
                description = %other.description()
            ),
        }
    }
}

/// Fans notices out to any number of subscribers.
#[derive(Clone)]
pub struct ChannelNoticeSink {
    tx: broadcast::Sender<MigrationNotice>,
}

impl ChannelNoticeSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MigrationNotice> {
        self.tx.subscribe()
    }
}

impl NoticeSink for ChannelNoticeSink {
    fn deliver(&self, notice: &MigrationNotice) {
        LogNoticeSink.deliver(notice);
        // No subscribers is not an error.
        let _ = self.tx.send(notice.clone());
    }
}

struct MigrationGuard {
    flag: Arc<AtomicBool>,
}

impl MigrationGuard {
    fn begin(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for MigrationGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct MigrationTrigger {
    engine: MigrationEngine,
    sink: Arc<dyn NoticeSink>,
    migrating: Arc<AtomicBool>,
    /// Epoch of the last session a migration was started for. Epochs start at 1.
    handled_epoch: Arc<AtomicU64>,
}

impl MigrationTrigger {
    pub fn new(engine: MigrationEngine, sink: Arc<dyn NoticeSink>) -> Self {
        Self {
            engine,
            sink,
            migrating: Arc::new(AtomicBool::new(false)),
            handled_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_migrating(&self) -> bool {
        self.migrating.load(Ordering::SeqCst)
    }

    /// Shared view of the in-progress flag, for components that must stay out
    /// of the local store while a migration runs.
    pub fn migrating_flag(&self) -> Arc<AtomicBool> {
        self.migrating.clone()
    }

    /// Reacts to an authentication state. Runs at most one migration per
    /// session epoch; returns `None` when nothing was attempted.
    pub async fn on_auth_state(&self, state: &AuthState) -> Option<MigrationNotice> {
        let session = state.session()?;
        let seen = self.handled_epoch.load(Ordering::SeqCst);
        if session.epoch <= seen {
            debug!(
                target: "cantoral",
                event = "migration_trigger_duplicate",
                epoch = session.epoch
            );
            return None;
        }
        let Some(guard) = MigrationGuard::begin(&self.migrating) else {
            debug!(target: "cantoral", event = "migration_trigger_busy", epoch = session.epoch);
            return None;
        };
        if self
            .handled_epoch
            .compare_exchange(seen, session.epoch, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        if !self.engine.store().has_local_data() {
            debug!(
                target: "cantoral",
                event = "migration_trigger_no_local_data",
                epoch = session.epoch
            );
            return None;
        }
        Some(self.run_guarded(guard, &session.user_id).await)
    }

    /// Explicit migration request for `user_id`.
    pub async fn run_for(&self, user_id: &str) -> MigrationNotice {
        if !self.engine.store().has_local_data() {
            let notice = MigrationNotice::NoLocalData;
            self.sink.deliver(&notice);
            return notice;
        }
        match MigrationGuard::begin(&self.migrating) {
            Some(guard) => self.run_guarded(guard, user_id).await,
            None => MigrationNotice::Failure {
                message: "A migration is already in progress.".to_string(),
            },
        }
    }

    /// Watches `auth` and migrates on every new authenticated session,
    /// including the one current when the listener starts. Returns once the
    /// sender side is gone.
    pub async fn listen(self, mut auth: watch::Receiver<AuthState>) {
        loop {
            let state = auth.borrow_and_update().clone();
            self.on_auth_state(&state).await;
            if auth.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn spawn_listener(&self, auth: watch::Receiver<AuthState>) -> JoinHandle<()> {
        tokio::spawn(self.clone().listen(auth))
    }

    async fn run_guarded(&self, guard: MigrationGuard, user_id: &str) -> MigrationNotice {
        let engine = self.engine.clone();
        let user = user_id.to_string();
        let outcome =
            dispatch_async_with_fence(|| async move { engine.migrate(Some(&user)).await }).await;
        drop(guard);

        let notice = match outcome {
            Ok(Ok(summary)) => MigrationNotice::from(summary),
            Ok(Err(err)) => {
                AppError::from(err).log_with_event("migration_failed");
                MigrationNotice::Failure {
                    message: FAILURE_MESSAGE.to_string(),
                }
            }
            // The fence has already logged the panic with its crash id.
            Err(_fault) => MigrationNotice::Failure {
                message: FAILURE_MESSAGE.to_string(),
            },
        };
        self.sink.deliver(&notice);
        notice
    }
}
