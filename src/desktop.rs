//! Tauri shell integration: the plugin-store backed local store, notice
//! events and the IPC commands.

use std::sync::Arc;

use serde_json::Value;
use tauri::{AppHandle, Emitter, Manager, Runtime, State};
use tauri_plugin_store::StoreExt;
use tracing::warn;

use crate::catalog::query::{self, MusicFilter, SortKey};
use crate::catalog::NewMusic;
use crate::config::SyncConfig;
use crate::local_store::{KeyValueBackend, LocalStore};
use crate::migration::trigger::{LogNoticeSink, MigrationNotice, NoticeSink, NOTICE_EVENT};
use crate::model::{MusicRecord, PlaylistRecord};
use crate::state::AppState;
use crate::util::dispatch_async_app_result;
use crate::{AppError, AppResult};

pub const STORE_FILE: &str = "cantoral.store.json";

struct TauriStore<R: Runtime> {
    inner: Arc<tauri_plugin_store::Store<R>>,
}

impl<R: Runtime> KeyValueBackend for TauriStore<R> {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).map(|value| match value {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.inner.set(key, value);
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.inner.delete(key))
    }

    fn save(&self) -> anyhow::Result<()> {
        self.inner.save().map_err(anyhow::Error::from)
    }
}

struct EventNoticeSink<R: Runtime> {
    app: AppHandle<R>,
}

impl<R: Runtime> NoticeSink for EventNoticeSink<R> {
    fn deliver(&self, notice: &MigrationNotice) {
        LogNoticeSink.deliver(notice);
        if let Err(err) = self.app.emit(NOTICE_EVENT, notice) {
            warn!(
                target: "cantoral",
                event = "migration_notice_emit_failed",
                error = %err
            );
        }
    }
}

#[tauri::command]
async fn music_list(
    state: State<'_, AppState>,
    filter: Option<MusicFilter>,
    sort: Option<SortKey>,
) -> AppResult<Vec<MusicRecord>> {
    let catalog = state.catalog.clone();
    dispatch_async_app_result(move || async move {
        let music = catalog.list_music().await?;
        let mut hits = query::search(&music, &filter.unwrap_or_default());
        query::sort(&mut hits, sort.unwrap_or_default());
        Ok::<_, AppError>(hits)
    })
    .await
}

#[tauri::command]
async fn music_moments(state: State<'_, AppState>) -> AppResult<Vec<String>> {
    let music = state.catalog.list_music().await?;
    Ok(query::liturgical_moments(&music))
}

#[tauri::command]
async fn music_get(state: State<'_, AppState>, id: String) -> AppResult<Option<MusicRecord>> {
    Ok(state.catalog.get_music(&id).await?)
}

#[tauri::command]
async fn music_by_ids(state: State<'_, AppState>, ids: Vec<String>) -> AppResult<Vec<MusicRecord>> {
    Ok(state.catalog.get_music_by_ids(&ids).await?)
}

#[tauri::command]
async fn music_import(state: State<'_, AppState>, input: NewMusic) -> AppResult<MusicRecord> {
    let catalog = state.catalog.clone();
    dispatch_async_app_result(move || async move {
        Ok::<_, AppError>(catalog.import_music(input).await?)
    })
    .await
}

#[tauri::command]
async fn music_set_favorite(
    state: State<'_, AppState>,
    id: String,
    favorite: bool,
) -> AppResult<MusicRecord> {
    Ok(state.catalog.toggle_favorite(&id, favorite).await?)
}

#[tauri::command]
async fn playlist_list(
    state: State<'_, AppState>,
    term: Option<String>,
) -> AppResult<Vec<PlaylistRecord>> {
    let playlists = state.catalog.list_playlists().await?;
    Ok(query::filter_playlists(&playlists, term.as_deref().unwrap_or("")))
}

#[tauri::command]
async fn playlist_get(state: State<'_, AppState>, id: String) -> AppResult<Option<PlaylistRecord>> {
    Ok(state.catalog.get_playlist(&id).await?)
}

#[tauri::command]
async fn playlist_create(
    state: State<'_, AppState>,
    name: String,
    description: Option<String>,
) -> AppResult<PlaylistRecord> {
    Ok(state.catalog.create_playlist(&name, description).await?)
}

#[tauri::command]
async fn playlist_add_music(
    state: State<'_, AppState>,
    playlist_id: String,
    music_id: String,
) -> AppResult<PlaylistRecord> {
    Ok(state.catalog.add_to_playlist(&playlist_id, &music_id).await?)
}

#[tauri::command]
fn session_sign_in(state: State<'_, AppState>, user_id: String, access_token: String) -> AppResult<()> {
    state.session.sign_in(user_id, access_token)?;
    Ok(())
}

#[tauri::command]
fn session_sign_out(state: State<'_, AppState>) -> AppResult<()> {
    Ok(state.session.sign_out()?)
}

#[tauri::command]
async fn migration_run(state: State<'_, AppState>) -> AppResult<MigrationNotice> {
    match state.session.current().user_id() {
        Some(user_id) => Ok(state.trigger.run_for(user_id).await),
        None => Err(AppError::new(
            "MIGRATION/UNAUTHENTICATED",
            "You must be logged in to migrate data.",
        )),
    }
}

#[tauri::command]
fn migration_status(state: State<'_, AppState>) -> bool {
    state.is_migrating()
}

/// Builder with the store plugin, shared state and commands registered.
/// The embedding binary supplies the context:
/// `cantoral_lib::desktop::builder().run(tauri::generate_context!())`.
pub fn builder() -> tauri::Builder<tauri::Wry> {
    tauri::Builder::default()
        .plugin(tauri_plugin_store::Builder::default().build())
        .setup(|app| {
            let store = app.store(STORE_FILE)?;
            let local = LocalStore::from_shared(Arc::new(TauriStore { inner: store }));
            let config = SyncConfig::from_env()?;
            let backend = tauri::async_runtime::block_on(config.connect_backend())?;
            let sink = Arc::new(EventNoticeSink {
                app: app.handle().clone(),
            });
            let state = AppState::new(local, backend, sink);
            state.session.restore()?;
            tauri::async_runtime::spawn(
                state.trigger.clone().listen(state.session.subscribe()),
            );
            app.manage(state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            music_list,
            music_moments,
            music_get,
            music_by_ids,
            music_import,
            music_set_favorite,
            playlist_list,
            playlist_get,
            playlist_create,
            playlist_add_music,
            session_sign_in,
            session_sign_out,
            migration_run,
            migration_status,
        ])
}
