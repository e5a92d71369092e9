//! Catalog operations. Anonymous users work against the local store; once a
//! session is authenticated every read and write goes to the remote store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use ts_rs::TS;

use crate::id::new_id;
use tokio::sync::OwnedMutexGuard;

use crate::local_store::{LocalStore, StoreError};
use crate::model::{MusicRecord, PlaylistRecord};
use crate::remote::{RemoteClient, RemoteError};
use crate::session::SessionHandle;
use crate::{time, AppError};

pub mod query;

/// Fields accepted when importing a song.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NewMusic {
    pub title: String,
    pub lyrics: String,
    #[serde(default)]
    #[ts(optional)]
    pub author: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub tempo: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub key: Option<String>,
    #[serde(default)]
    pub liturgical_moment: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    #[ts(optional)]
    pub chords: Option<String>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0}")]
    Validation(String),
    #[error("{kind} `{id}` was not found")]
    NotFound { kind: &'static str, id: String },
    #[error("local data is being migrated, try again shortly")]
    MigrationInProgress,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Store(inner) => inner.into(),
            CatalogError::Remote(inner) => inner.into(),
            CatalogError::Validation(message) => AppError::new("CATALOG/VALIDATION", message),
            CatalogError::NotFound { kind, id } => {
                AppError::new("CATALOG/NOT_FOUND", format!("{kind} `{id}` was not found"))
                    .with_context("kind", kind)
                    .with_context("id", id)
            }
            CatalogError::MigrationInProgress => AppError::new(
                "CATALOG/MIGRATION_IN_PROGRESS",
                "local data is being migrated, try again shortly",
            ),
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require(value: &str, field: &str) -> Result<String, CatalogError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CatalogError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

enum Mode {
    Local,
    Remote { user_id: String },
}

#[derive(Clone)]
pub struct Catalog {
    store: LocalStore,
    remote: RemoteClient,
    session: SessionHandle,
    migrating: Arc<AtomicBool>,
}

impl Catalog {
    pub fn new(
        store: LocalStore,
        remote: RemoteClient,
        session: SessionHandle,
        migrating: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            remote,
            session,
            migrating,
        }
    }

    fn mode(&self) -> Mode {
        match self.session.current().user_id() {
            Some(user_id) => Mode::Remote {
                user_id: user_id.to_string(),
            },
            None => Mode::Local,
        }
    }

    fn ensure_local_writable(&self) -> Result<(), CatalogError> {
        if self.migrating.load(Ordering::SeqCst) {
            return Err(CatalogError::MigrationInProgress);
        }
        Ok(())
    }

    /// Holds the store's write lock for one read-modify-write. A migration
    /// that starts while we wait for the lock is reported as busy rather than
    /// racing its cleanup.
    async fn local_write(&self) -> Result<OwnedMutexGuard<()>, CatalogError> {
        self.ensure_local_writable()?;
        let guard = self.store.write_lock().await;
        self.ensure_local_writable()?;
        Ok(guard)
    }

    pub async fn import_music(&self, input: NewMusic) -> Result<MusicRecord, CatalogError> {
        let now = time::now();
        let record = MusicRecord {
            id: new_id(),
            title: require(&input.title, "title")?,
            lyrics: require(&input.lyrics, "lyrics")?,
            author: trimmed(input.author),
            tempo: trimmed(input.tempo),
            key: trimmed(input.key),
            liturgical_moment: input.liturgical_moment,
            tags: input.tags,
            chords: trimmed(input.chords),
            date_added: Some(now),
            favorite: false,
        };
        match self.mode() {
            Mode::Local => {
                let _guard = self.local_write().await?;
                let mut music = self.store.read_music_collection()?;
                music.push(record.clone());
                self.store.write_music_collection(&music)?;
            }
            Mode::Remote { user_id } => {
                self.remote.save_music(&record.to_remote(&user_id, now)).await?;
            }
        }
        info!(target: "cantoral", event = "music_imported", id = %record.id);
        Ok(record)
    }

    pub async fn create_playlist(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<PlaylistRecord, CatalogError> {
        let now = time::now();
        let playlist = PlaylistRecord {
            id: new_id(),
            name: require(name, "name")?,
            description: trimmed(description),
            music_ids: Vec::new(),
            date_created: Some(now),
            date_modified: Some(now),
        };
        match self.mode() {
            Mode::Local => {
                let _guard = self.local_write().await?;
                let mut playlists = self.store.read_playlist_collection()?;
                playlists.push(playlist.clone());
                self.store.write_playlist_collection(&playlists)?;
            }
            Mode::Remote { user_id } => {
                self.remote
                    .save_playlist(&playlist.to_remote(&user_id, now))
                    .await?;
            }
        }
        info!(target: "cantoral", event = "playlist_created", id = %playlist.id);
        Ok(playlist)
    }

    /// Appends `music_id` unless the playlist already holds it.
    pub async fn add_to_playlist(
        &self,
        playlist_id: &str,
        music_id: &str,
    ) -> Result<PlaylistRecord, CatalogError> {
        let mode = self.mode();
        let _guard = match mode {
            Mode::Local => Some(self.local_write().await?),
            Mode::Remote { .. } => None,
        };
        let mut playlists = match mode {
            Mode::Local => self.store.read_playlist_collection()?,
            Mode::Remote { .. } => self.remote.list_playlists().await?,
        };
        let index = playlists
            .iter()
            .position(|p| p.id == playlist_id)
            .ok_or_else(|| CatalogError::NotFound {
                kind: "playlist",
                id: playlist_id.to_string(),
            })?;
        if playlists[index].music_ids.iter().any(|id| id == music_id) {
            return Ok(playlists.swap_remove(index));
        }

        let playlist = &mut playlists[index];
        playlist.music_ids.push(music_id.to_string());
        let now = time::now();
        playlist.date_modified = Some(match playlist.date_created {
            Some(created) => now.max(created),
            None => now,
        });
        let updated = playlist.clone();
        match mode {
            Mode::Local => self.store.write_playlist_collection(&playlists)?,
            Mode::Remote { user_id } => {
                self.remote
                    .save_playlist(&updated.to_remote(&user_id, now))
                    .await?;
            }
        }
        Ok(updated)
    }

    pub async fn toggle_favorite(
        &self,
        music_id: &str,
        favorite: bool,
    ) -> Result<MusicRecord, CatalogError> {
        let not_found = || CatalogError::NotFound {
            kind: "music",
            id: music_id.to_string(),
        };
        match self.mode() {
            Mode::Local => {
                let _guard = self.local_write().await?;
                let mut music = self.store.read_music_collection()?;
                let record = music
                    .iter_mut()
                    .find(|m| m.id == music_id)
                    .ok_or_else(not_found)?;
                record.favorite = favorite;
                let updated = record.clone();
                self.store.write_music_collection(&music)?;
                Ok(updated)
            }
            Mode::Remote { user_id } => {
                let mut record = self
                    .remote
                    .list_music()
                    .await?
                    .into_iter()
                    .find(|m| m.id == music_id)
                    .ok_or_else(not_found)?;
                record.favorite = favorite;
                self.remote
                    .save_music(&record.to_remote(&user_id, time::now()))
                    .await?;
                Ok(record)
            }
        }
    }

    pub async fn list_music(&self) -> Result<Vec<MusicRecord>, CatalogError> {
        match self.mode() {
            Mode::Local => Ok(self.store.read_music_collection()?),
            Mode::Remote { .. } => Ok(self.remote.list_music().await?),
        }
    }

    pub async fn list_playlists(&self) -> Result<Vec<PlaylistRecord>, CatalogError> {
        match self.mode() {
            Mode::Local => Ok(self.store.read_playlist_collection()?),
            Mode::Remote { .. } => Ok(self.remote.list_playlists().await?),
        }
    }

    pub async fn get_music(&self, id: &str) -> Result<Option<MusicRecord>, CatalogError> {
        Ok(self.list_music().await?.into_iter().find(|m| m.id == id))
    }

    pub async fn get_playlist(&self, id: &str) -> Result<Option<PlaylistRecord>, CatalogError> {
        Ok(self.list_playlists().await?.into_iter().find(|p| p.id == id))
    }

    /// Records for `ids` in the order given. Unknown ids are skipped.
    pub async fn get_music_by_ids(&self, ids: &[String]) -> Result<Vec<MusicRecord>, CatalogError> {
        let music = self.list_music().await?;
        Ok(ids
            .iter()
            .filter_map(|id| music.iter().find(|m| &m.id == id).cloned())
            .collect())
    }
}
