//! Music and playlist records in their two shapes: the camelCase local
//! shape kept in the key-value store and the snake_case row shape the remote
//! backend stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use ts_rs::TS;

use crate::id::stored_record_id;
use crate::local_store::{MUSIC_KEY, PLAYLISTS_KEY};
use crate::time;

/// `null` and missing both read as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Empty and whitespace-only text is treated as absent.
fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct MusicRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub tempo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub liturgical_moment: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lyrics: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub chords: Option<String>,
    #[serde(default, with = "time::lenient")]
    #[ts(type = "string | null")]
    pub date_added: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub favorite: bool,
}

impl MusicRecord {
    /// Assigns an identifier derived from the record and its `index` in the
    /// stored collection when it has none. Returns whether one was assigned.
    pub fn ensure_id(&mut self, index: usize) -> bool {
        if !self.id.trim().is_empty() {
            return false;
        }
        self.id.clear();
        let canonical = serde_json::to_string(&*self).unwrap_or_default();
        self.id = stored_record_id(MUSIC_KEY, index, &canonical);
        true
    }

    /// Remote row for this record, owned by `created_by`. A missing `dateAdded`
    /// falls back to `now`.
    pub fn to_remote(&self, created_by: &str, now: DateTime<Utc>) -> RemoteMusicRow {
        RemoteMusicRow {
            id: self.id.clone(),
            title: self.title.clone(),
            author: non_blank(&self.author),
            tempo: non_blank(&self.tempo),
            key: non_blank(&self.key),
            liturgical_moment: self.liturgical_moment.clone(),
            tags: self.tags.clone(),
            lyrics: self.lyrics.clone(),
            chords: non_blank(&self.chords),
            date_added: self.date_added.unwrap_or(now),
            favorite: self.favorite,
            created_by: created_by.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PlaylistRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub music_ids: Vec<String>,
    #[serde(default, with = "time::lenient")]
    #[ts(type = "string | null")]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default, with = "time::lenient")]
    #[ts(type = "string | null")]
    pub date_modified: Option<DateTime<Utc>>,
}

impl PlaylistRecord {
    pub fn ensure_id(&mut self, index: usize) -> bool {
        if !self.id.trim().is_empty() {
            return false;
        }
        self.id.clear();
        let canonical = serde_json::to_string(&*self).unwrap_or_default();
        self.id = stored_record_id(PLAYLISTS_KEY, index, &canonical);
        true
    }

    /// Remote row for this playlist. `date_modified` is never earlier than `date_created`.
    pub fn to_remote(&self, created_by: &str, now: DateTime<Utc>) -> RemotePlaylistRow {
        let date_created = self.date_created.unwrap_or(now);
        let date_modified = self.date_modified.unwrap_or(now).max(date_created);
        RemotePlaylistRow {
            id: self.id.clone(),
            name: self.name.clone(),
            description: non_blank(&self.description),
            music_ids: self.music_ids.clone(),
            date_created,
            date_modified,
            created_by: created_by.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMusicRow {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub tempo: Option<String>,
    pub key: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub liturgical_moment: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    pub lyrics: String,
    pub chords: Option<String>,
    #[serde(with = "time::iso")]
    pub date_added: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub favorite: bool,
    pub created_by: String,
}

impl From<RemoteMusicRow> for MusicRecord {
    fn from(row: RemoteMusicRow) -> Self {
        MusicRecord {
            id: row.id,
            title: row.title,
            author: row.author,
            tempo: row.tempo,
            key: row.key,
            liturgical_moment: row.liturgical_moment,
            tags: row.tags,
            lyrics: row.lyrics,
            chords: row.chords,
            date_added: Some(row.date_added),
            favorite: row.favorite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePlaylistRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub music_ids: Vec<String>,
    #[serde(with = "time::iso")]
    pub date_created: DateTime<Utc>,
    #[serde(with = "time::iso")]
    pub date_modified: DateTime<Utc>,
    pub created_by: String,
}

impl From<RemotePlaylistRow> for PlaylistRecord {
    fn from(row: RemotePlaylistRow) -> Self {
        PlaylistRecord {
            id: row.id,
            name: row.name,
            description: row.description,
            music_ids: row.music_ids,
            date_created: Some(row.date_created),
            date_modified: Some(row.date_modified),
        }
    }
}
