//! Self-hosted backend: the remote tables kept in a SQLite database.

use std::path::Path;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{ConnectOptions, Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use super::{RemoteBackend, RemoteError, UpsertOptions, MUSIC_TABLE, PLAYLISTS_TABLE};
use crate::model::{RemoteMusicRow, RemotePlaylistRow};
use crate::time::to_iso;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS music (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        author TEXT,
        tempo TEXT,
        "key" TEXT,
        liturgical_moment TEXT NOT NULL DEFAULT '[]',
        tags TEXT NOT NULL DEFAULT '[]',
        lyrics TEXT NOT NULL,
        chords TEXT,
        date_added TEXT NOT NULL,
        favorite INTEGER NOT NULL DEFAULT 0,
        created_by TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS music_created_by_idx ON music(created_by)",
    r#"CREATE TABLE IF NOT EXISTS playlists (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        music_ids TEXT NOT NULL DEFAULT '[]',
        date_created TEXT NOT NULL,
        date_modified TEXT NOT NULL,
        created_by TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS playlists_created_by_idx ON playlists(created_by)",
];

const MUSIC_INSERT: &str = r#"INSERT INTO music
    (id, title, author, tempo, "key", liturgical_moment, tags, lyrics, chords, date_added, favorite, created_by)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#;

const MUSIC_MERGE: &str = r#" ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    author = excluded.author,
    tempo = excluded.tempo,
    "key" = excluded."key",
    liturgical_moment = excluded.liturgical_moment,
    tags = excluded.tags,
    lyrics = excluded.lyrics,
    chords = excluded.chords,
    date_added = excluded.date_added,
    favorite = excluded.favorite"#;

const PLAYLIST_INSERT: &str = r#"INSERT INTO playlists
    (id, name, description, music_ids, date_created, date_modified, created_by)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#;

const PLAYLIST_MERGE: &str = r#" ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    description = excluded.description,
    music_ids = excluded.music_ids,
    date_created = excluded.date_created,
    date_modified = excluded.date_modified"#;

const IGNORE_CLAUSE: &str = " ON CONFLICT(id) DO NOTHING";

#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn open(path: &Path) -> Result<Self, RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .log_statements(log::LevelFilter::Off);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .ok();
        Self::from_pool(pool).await
    }

    pub async fn in_memory() -> Result<Self, RemoteError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, RemoteError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn upsert_rows(
        &self,
        table: &str,
        rows: Vec<Value>,
        options: UpsertOptions,
    ) -> Result<(), RemoteError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        match table {
            MUSIC_TABLE => {
                let sql = statement(MUSIC_INSERT, MUSIC_MERGE, options);
                for value in rows {
                    let row: RemoteMusicRow = serde_json::from_value(value)?;
                    written += insert_music(&mut tx, &sql, &row).await?;
                }
            }
            PLAYLISTS_TABLE => {
                let sql = statement(PLAYLIST_INSERT, PLAYLIST_MERGE, options);
                for value in rows {
                    let row: RemotePlaylistRow = serde_json::from_value(value)?;
                    written += insert_playlist(&mut tx, &sql, &row).await?;
                }
            }
            other => return Err(unknown_table(other)),
        }
        tx.commit().await?;
        debug!(
            target: "cantoral",
            event = "sqlite_upsert",
            table,
            written,
            ignore_duplicates = options.ignore_duplicates
        );
        Ok(())
    }

    async fn select_rows(&self, table: &str, created_by: &str) -> Result<Vec<Value>, RemoteError> {
        let sql = match table {
            MUSIC_TABLE => {
                r#"SELECT id, title, author, tempo, "key", liturgical_moment, tags, lyrics, chords,
                          date_added, favorite, created_by
                   FROM music WHERE created_by = ?1 ORDER BY date_added, id"#
            }
            PLAYLISTS_TABLE => {
                "SELECT id, name, description, music_ids, date_created, date_modified, created_by
                 FROM playlists WHERE created_by = ?1 ORDER BY date_created, id"
            }
            other => return Err(unknown_table(other)),
        };
        let rows = sqlx::query(sql)
            .bind(created_by)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                if table == MUSIC_TABLE {
                    music_json(row)
                } else {
                    playlist_json(row)
                }
            })
            .collect()
    }
}

fn statement(insert: &str, merge: &str, options: UpsertOptions) -> String {
    if options.ignore_duplicates {
        format!("{insert}{IGNORE_CLAUSE}")
    } else {
        format!("{insert}{merge}")
    }
}

fn unknown_table(table: &str) -> RemoteError {
    RemoteError::Status {
        status: 404,
        body: format!("unknown table `{table}`"),
    }
}

async fn insert_music(
    tx: &mut Transaction<'_, Sqlite>,
    sql: &str,
    row: &RemoteMusicRow,
) -> Result<u64, RemoteError> {
    let result = sqlx::query(sql)
        .bind(&row.id)
        .bind(&row.title)
        .bind(&row.author)
        .bind(&row.tempo)
        .bind(&row.key)
        .bind(serde_json::to_string(&row.liturgical_moment)?)
        .bind(serde_json::to_string(&row.tags)?)
        .bind(&row.lyrics)
        .bind(&row.chords)
        .bind(to_iso(&row.date_added))
        .bind(row.favorite)
        .bind(&row.created_by)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

async fn insert_playlist(
    tx: &mut Transaction<'_, Sqlite>,
    sql: &str,
    row: &RemotePlaylistRow,
) -> Result<u64, RemoteError> {
    let result = sqlx::query(sql)
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.description)
        .bind(serde_json::to_string(&row.music_ids)?)
        .bind(to_iso(&row.date_created))
        .bind(to_iso(&row.date_modified))
        .bind(&row.created_by)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

fn list_column(row: &SqliteRow, column: &str) -> Result<Value, RemoteError> {
    let text: Option<String> = row.try_get(column)?;
    match text {
        Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(&text)?),
        _ => Ok(Value::Array(Vec::new())),
    }
}

fn music_json(row: &SqliteRow) -> Result<Value, RemoteError> {
    Ok(json!({
        "id": row.try_get::<String, _>("id")?,
        "title": row.try_get::<String, _>("title")?,
        "author": row.try_get::<Option<String>, _>("author")?,
        "tempo": row.try_get::<Option<String>, _>("tempo")?,
        "key": row.try_get::<Option<String>, _>("key")?,
        "liturgical_moment": list_column(row, "liturgical_moment")?,
        "tags": list_column(row, "tags")?,
        "lyrics": row.try_get::<String, _>("lyrics")?,
        "chords": row.try_get::<Option<String>, _>("chords")?,
        "date_added": row.try_get::<String, _>("date_added")?,
        "favorite": row.try_get::<bool, _>("favorite")?,
        "created_by": row.try_get::<String, _>("created_by")?,
    }))
}

fn playlist_json(row: &SqliteRow) -> Result<Value, RemoteError> {
    Ok(json!({
        "id": row.try_get::<String, _>("id")?,
        "name": row.try_get::<String, _>("name")?,
        "description": row.try_get::<Option<String>, _>("description")?,
        "music_ids": list_column(row, "music_ids")?,
        "date_created": row.try_get::<String, _>("date_created")?,
        "date_modified": row.try_get::<String, _>("date_modified")?,
        "created_by": row.try_get::<String, _>("created_by")?,
    }))
}

impl RemoteBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn upsert<'a>(
        &'a self,
        table: &'a str,
        rows: Vec<Value>,
        options: UpsertOptions,
        _access_token: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            if rows.is_empty() {
                return Ok(());
            }
            self.upsert_rows(table, rows, options).await
        })
    }

    fn select<'a>(
        &'a self,
        table: &'a str,
        created_by: &'a str,
        _access_token: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Value>, RemoteError>> {
        Box::pin(self.select_rows(table, created_by))
    }
}
