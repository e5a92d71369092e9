//! One-way migration of the local music and playlist collections into the
//! remote store.
//!
//! Music is uploaded before playlists so a playlist never lands remotely
//! ahead of the songs it references. Local data is only removed after both
//! uploads succeed; any earlier failure leaves it exactly as it was, and a
//! re-run is harmless because existing remote ids are skipped.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;

use crate::local_store::{LocalStore, StoreError, MUSIC_KEY, PLAYLISTS_KEY};
use crate::model::{MusicRecord, PlaylistRecord, RemoteMusicRow, RemotePlaylistRow};
use crate::remote::{RemoteClient, RemoteError};
use crate::{time, AppError};

pub mod trigger;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MigrationSummary {
    pub music_migrated: usize,
    pub playlists_migrated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Music,
    Playlists,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Music => "music",
            Phase::Playlists => "playlists",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("user not authenticated")]
    Unauthenticated,
    #[error("failed to upload {phase} to the remote store")]
    Remote {
        phase: Phase,
        #[source]
        source: RemoteError,
    },
    #[error("data was uploaded but the local copy could not be cleared")]
    Cleanup(#[source] StoreError),
}

impl From<MigrationError> for AppError {
    fn from(err: MigrationError) -> Self {
        let message = err.to_string();
        match err {
            MigrationError::Unauthenticated => AppError::new("MIGRATION/UNAUTHENTICATED", message),
            MigrationError::Remote { phase, source } => AppError::new("MIGRATION/REMOTE", message)
                .with_context("phase", phase.as_str())
                .with_cause(source),
            MigrationError::Cleanup(source) => {
                AppError::new("MIGRATION/CLEANUP", message).with_cause(source)
            }
        }
    }
}

/// Remote rows for `records`, assigning ids where missing. Assigned ids depend
/// only on each record and its position, so a retry reuses them.
pub fn to_remote_music(
    records: Vec<MusicRecord>,
    created_by: &str,
    now: DateTime<Utc>,
) -> Vec<RemoteMusicRow> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, mut record)| {
            record.ensure_id(index);
            record.to_remote(created_by, now)
        })
        .collect()
}

pub fn to_remote_playlists(
    records: Vec<PlaylistRecord>,
    created_by: &str,
    now: DateTime<Utc>,
) -> Vec<RemotePlaylistRow> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, mut record)| {
            record.ensure_id(index);
            record.to_remote(created_by, now)
        })
        .collect()
}

/// Corrupt collections are treated as empty; the key is remembered so the
/// raw text can be set aside instead of deleted.
fn read_or_empty<T>(
    result: Result<Vec<T>, StoreError>,
    key: &'static str,
    quarantine: &mut Vec<&'static str>,
) -> Vec<T> {
    match result {
        Ok(records) => records,
        Err(err) => {
            warn!(
                target: "cantoral",
                event = "local_collection_unreadable",
                key,
                error = %err
            );
            quarantine.push(key);
            Vec::new()
        }
    }
}

#[derive(Clone)]
pub struct MigrationEngine {
    store: LocalStore,
    remote: RemoteClient,
}

impl MigrationEngine {
    pub fn new(store: LocalStore, remote: RemoteClient) -> Self {
        Self { store, remote }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub async fn migrate(
        &self,
        current_user_id: Option<&str>,
    ) -> Result<MigrationSummary, MigrationError> {
        let user_id = match current_user_id.map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => return Err(MigrationError::Unauthenticated),
        };

        // Held until cleanup so no local write slips between read and clear.
        let _writes = self.store.write_lock().await;
        let mut quarantine = Vec::new();
        let music = read_or_empty(self.store.read_music_collection(), MUSIC_KEY, &mut quarantine);
        let playlists = read_or_empty(
            self.store.read_playlist_collection(),
            PLAYLISTS_KEY,
            &mut quarantine,
        );

        if music.is_empty() && playlists.is_empty() {
            if self.store.has_local_data() {
                self.store
                    .clear_collections(&quarantine)
                    .map_err(MigrationError::Cleanup)?;
            }
            info!(target: "cantoral", event = "migration_nothing_to_do", user_id);
            return Ok(MigrationSummary::default());
        }

        info!(
            target: "cantoral",
            event = "migration_started",
            user_id,
            backend = self.remote.backend_name(),
            music = music.len(),
            playlists = playlists.len()
        );

        let now = time::now();
        let music_rows = to_remote_music(music, user_id, now);
        let playlist_rows = to_remote_playlists(playlists, user_id, now);

        if !music_rows.is_empty() {
            self.upload(Phase::Music, self.remote.upsert_music(&music_rows))
                .await?;
        }
        if !playlist_rows.is_empty() {
            self.upload(Phase::Playlists, self.remote.upsert_playlists(&playlist_rows))
                .await?;
        }

        self.store
            .clear_collections(&quarantine)
            .map_err(MigrationError::Cleanup)?;

        let summary = MigrationSummary {
            music_migrated: music_rows.len(),
            playlists_migrated: playlist_rows.len(),
        };
        info!(
            target: "cantoral",
            event = "migration_complete",
            user_id,
            music_migrated = summary.music_migrated,
            playlists_migrated = summary.playlists_migrated,
            quarantined = quarantine.len()
        );
        Ok(summary)
    }

    async fn upload(
        &self,
        phase: Phase,
        request: impl std::future::Future<Output = Result<(), RemoteError>>,
    ) -> Result<(), MigrationError> {
        match request.await {
            Ok(()) => {
                info!(target: "cantoral", event = "migration_phase_uploaded", phase = phase.as_str());
                Ok(())
            }
            Err(source) => {
                warn!(
                    target: "cantoral",
                    event = "migration_phase_failed",
                    phase = phase.as_str(),
                    error = %source
                );
                Err(MigrationError::Remote { phase, source })
            }
        }
    }
}
