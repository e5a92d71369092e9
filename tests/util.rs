#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Notify;

use cantoral_lib::local_store::LocalStore;
use cantoral_lib::remote::sqlite::SqliteBackend;
use cantoral_lib::remote::{RemoteBackend, RemoteClient, RemoteError, UpsertOptions};
use cantoral_lib::{MigrationEngine, SessionHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertCall {
    pub table: String,
    pub ids: Vec<String>,
    pub ignore_duplicates: bool,
}

/// SQLite-backed remote that records calls and can be told to fail, panic or
/// wait before writing.
pub struct ScriptedBackend {
    inner: SqliteBackend,
    calls: Mutex<Vec<UpsertCall>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub entered: Arc<Notify>,
}

impl ScriptedBackend {
    pub async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteBackend::in_memory().await.expect("in-memory backend"),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            gate: Mutex::new(None),
            entered: Arc::new(Notify::new()),
        })
    }

    pub fn fail_table(&self, table: &str) {
        self.failing.lock().unwrap().insert(table.to_string());
    }

    pub fn heal_table(&self, table: &str) {
        self.failing.lock().unwrap().remove(table);
    }

    pub fn panic_on(&self, table: &str) {
        self.panicking.lock().unwrap().insert(table.to_string());
    }

    /// Upserts wait for the returned handle to be notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<UpsertCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sqlite(&self) -> &SqliteBackend {
        &self.inner
    }

    pub async fn remote_ids(&self, table: &str, owner: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .select(table, owner, "")
            .await
            .expect("select")
            .into_iter()
            .map(|row| row["id"].as_str().unwrap().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub async fn remote_rows(&self, table: &str, owner: &str) -> Vec<Value> {
        self.inner.select(table, owner, "").await.expect("select")
    }
}

impl RemoteBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn upsert<'a>(
        &'a self,
        table: &'a str,
        rows: Vec<Value>,
        options: UpsertOptions,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(UpsertCall {
                table: table.to_string(),
                ids: rows
                    .iter()
                    .map(|row| row["id"].as_str().unwrap_or_default().to_string())
                    .collect(),
                ignore_duplicates: options.ignore_duplicates,
            });
            self.entered.notify_one();
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.panicking.lock().unwrap().contains(table) {
                panic!("scripted panic on {table}");
            }
            if self.failing.lock().unwrap().contains(table) {
                return Err(RemoteError::Status {
                    status: 503,
                    body: format!("{table} unavailable"),
                });
            }
            self.inner.upsert(table, rows, options, access_token).await
        })
    }

    fn select<'a>(
        &'a self,
        table: &'a str,
        created_by: &'a str,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Value>, RemoteError>> {
        self.inner.select(table, created_by, access_token)
    }
}

pub struct Harness {
    pub store: LocalStore,
    pub session: SessionHandle,
    pub backend: Arc<ScriptedBackend>,
    pub engine: MigrationEngine,
}

/// Engine over an in-memory local store with `user` already signed in.
pub async fn harness(user: &str) -> Harness {
    let store = LocalStore::in_memory();
    let session = SessionHandle::new();
    session.sign_in(user, "token").expect("sign in");
    let backend = ScriptedBackend::new().await;
    let remote = RemoteClient::new(backend.clone(), session.clone());
    let engine = MigrationEngine::new(store.clone(), remote);
    Harness {
        store,
        session,
        backend,
        engine,
    }
}

pub fn music_json(entries: &[(&str, &str)]) -> String {
    let records: Vec<Value> = entries
        .iter()
        .map(|(id, title)| {
            serde_json::json!({
                "id": id,
                "title": title,
                "lyrics": format!("{title} lyrics"),
                "liturgicalMoment": ["Communion"],
                "dateAdded": "2023-01-01T00:00:00.000Z",
                "favorite": false
            })
        })
        .collect();
    serde_json::to_string(&records).unwrap()
}

pub fn playlists_json(entries: &[(&str, &str, &[&str])]) -> String {
    let records: Vec<Value> = entries
        .iter()
        .map(|(id, name, music)| {
            serde_json::json!({
                "id": id,
                "name": name,
                "musicIds": music,
                "dateCreated": "2023-02-01T00:00:00.000Z",
                "dateModified": "2023-02-02T00:00:00.000Z"
            })
        })
        .collect();
    serde_json::to_string(&records).unwrap()
}
