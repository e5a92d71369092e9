//! Remote store client. Writes are keyed by record id; the backend decides how
//! a colliding id is resolved according to [`UpsertOptions`].

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::model::{MusicRecord, PlaylistRecord, RemoteMusicRow, RemotePlaylistRow};
use crate::session::{SessionHandle, UserSession};
use crate::AppError;

pub mod rest;
pub mod sqlite;

pub const MUSIC_TABLE: &str = "music";
pub const PLAYLISTS_TABLE: &str = "playlists";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOptions {
    pub conflict_key: &'static str,
    /// When set, rows whose key already exists are skipped instead of merged.
    pub ignore_duplicates: bool,
}

impl UpsertOptions {
    pub const IGNORE: UpsertOptions = UpsertOptions {
        conflict_key: "id",
        ignore_duplicates: true,
    };
    pub const MERGE: UpsertOptions = UpsertOptions {
        conflict_key: "id",
        ignore_duplicates: false,
    };
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("no authenticated session")]
    Unauthenticated,
    #[error("remote request failed")]
    Transport(#[from] reqwest::Error),
    #[error("remote backend answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("remote payload could not be decoded")]
    Decode(#[from] serde_json::Error),
    #[error("remote database error")]
    Database(#[from] sqlx::Error),
}

impl From<RemoteError> for AppError {
    fn from(err: RemoteError) -> Self {
        let message = err.to_string();
        match err {
            RemoteError::Unauthenticated => AppError::new("REMOTE/UNAUTHENTICATED", message),
            RemoteError::Transport(inner) => AppError::new("REMOTE/TRANSPORT", message)
                .with_cause(AppError::from_chain("HTTP/REQUEST", &inner)),
            RemoteError::Status { status, .. } => {
                AppError::new("REMOTE/STATUS", message).with_context("status", status.to_string())
            }
            RemoteError::Decode(inner) => AppError::new("REMOTE/DECODE", message).with_cause(inner),
            RemoteError::Database(inner) => {
                AppError::new("REMOTE/DATABASE", message).with_cause(inner)
            }
        }
    }
}

/// Storage behind the remote client.
pub trait RemoteBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn upsert<'a>(
        &'a self,
        table: &'a str,
        rows: Vec<Value>,
        options: UpsertOptions,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>>;

    /// Rows of `table` owned by `created_by`.
    fn select<'a>(
        &'a self,
        table: &'a str,
        created_by: &'a str,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Value>, RemoteError>>;
}

/// Typed, session-aware access to the remote tables.
#[derive(Clone)]
pub struct RemoteClient {
    backend: Arc<dyn RemoteBackend>,
    session: SessionHandle,
}

impl RemoteClient {
    pub fn new(backend: Arc<dyn RemoteBackend>, session: SessionHandle) -> Self {
        Self { backend, session }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Inserts rows, leaving any existing row with the same id untouched.
    pub async fn upsert_music(&self, rows: &[RemoteMusicRow]) -> Result<(), RemoteError> {
        self.write(MUSIC_TABLE, rows, UpsertOptions::IGNORE).await
    }

    pub async fn upsert_playlists(&self, rows: &[RemotePlaylistRow]) -> Result<(), RemoteError> {
        self.write(PLAYLISTS_TABLE, rows, UpsertOptions::IGNORE).await
    }

    /// Inserts or overwrites a single row.
    pub async fn save_music(&self, row: &RemoteMusicRow) -> Result<(), RemoteError> {
        self.write(MUSIC_TABLE, std::slice::from_ref(row), UpsertOptions::MERGE)
            .await
    }

    pub async fn save_playlist(&self, row: &RemotePlaylistRow) -> Result<(), RemoteError> {
        self.write(PLAYLISTS_TABLE, std::slice::from_ref(row), UpsertOptions::MERGE)
            .await
    }

    pub async fn list_music(&self) -> Result<Vec<MusicRecord>, RemoteError> {
        let rows: Vec<RemoteMusicRow> = self.read(MUSIC_TABLE).await?;
        Ok(rows.into_iter().map(MusicRecord::from).collect())
    }

    pub async fn list_playlists(&self) -> Result<Vec<PlaylistRecord>, RemoteError> {
        let rows: Vec<RemotePlaylistRow> = self.read(PLAYLISTS_TABLE).await?;
        Ok(rows.into_iter().map(PlaylistRecord::from).collect())
    }

    fn require_session(&self) -> Result<UserSession, RemoteError> {
        self.session
            .current()
            .session()
            .cloned()
            .ok_or(RemoteError::Unauthenticated)
    }

    async fn write<T: Serialize>(
        &self,
        table: &str,
        rows: &[T],
        options: UpsertOptions,
    ) -> Result<(), RemoteError> {
        let session = self.require_session()?;
        let payload = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            target: "cantoral",
            event = "remote_upsert",
            backend = self.backend.name(),
            table,
            rows = payload.len(),
            ignore_duplicates = options.ignore_duplicates
        );
        self.backend
            .upsert(table, payload, options, &session.access_token)
            .await
    }

    async fn read<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, RemoteError> {
        let session = self.require_session()?;
        let values = self
            .backend
            .select(table, &session.user_id, &session.access_token)
            .await?;
        debug!(
            target: "cantoral",
            event = "remote_select",
            backend = self.backend.name(),
            table,
            rows = values.len()
        );
        values
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(RemoteError::from))
            .collect()
    }
}
