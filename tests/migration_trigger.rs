#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cantoral_lib::local_store::{LocalStore, MUSIC_KEY, PLAYLISTS_KEY};
use cantoral_lib::migration::trigger::{ChannelNoticeSink, LogNoticeSink, FAILURE_MESSAGE};
use cantoral_lib::remote::{RemoteClient, MUSIC_TABLE, PLAYLISTS_TABLE};
use cantoral_lib::{MigrationEngine, MigrationNotice, MigrationTrigger, SessionHandle};
use tokio::time::timeout;
use util::{harness, music_json, playlists_json, ScriptedBackend};

const WAIT: Duration = Duration::from_secs(5);

fn seed(store: &LocalStore) -> Result<()> {
    store.write_raw(MUSIC_KEY, &music_json(&[("m1", "Ave Maria")]))?;
    store.write_raw(PLAYLISTS_KEY, &playlists_json(&[("p1", "Sunday", &["m1"])]))?;
    Ok(())
}

#[tokio::test]
async fn runs_once_per_session_epoch() -> Result<()> {
    let h = harness("u1").await;
    seed(&h.store)?;
    let trigger = MigrationTrigger::new(h.engine.clone(), Arc::new(LogNoticeSink));

    let state = h.session.current();
    let notice = trigger.on_auth_state(&state).await;
    assert_eq!(
        notice,
        Some(MigrationNotice::Success {
            music_migrated: 1,
            playlists_migrated: 1
        })
    );

    // Data reappearing under the same session is left alone.
    seed(&h.store)?;
    assert_eq!(trigger.on_auth_state(&state).await, None);
    assert_eq!(h.backend.calls().len(), 2);

    // A fresh sign-in is a new epoch.
    h.session.sign_in("u1", "token")?;
    assert!(trigger.on_auth_state(&h.session.current()).await.is_some());
    assert_eq!(h.backend.calls().len(), 4);
    Ok(())
}

#[tokio::test]
async fn anonymous_and_empty_states_do_nothing() -> Result<()> {
    let h = harness("u1").await;
    let trigger = MigrationTrigger::new(h.engine.clone(), Arc::new(LogNoticeSink));

    assert_eq!(trigger.on_auth_state(&Default::default()).await, None);
    assert_eq!(trigger.on_auth_state(&h.session.current()).await, None);
    assert!(h.backend.calls().is_empty());

    assert_eq!(trigger.run_for("u1").await, MigrationNotice::NoLocalData);
    assert!(h.backend.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn second_request_while_running_is_refused() -> Result<()> {
    let h = harness("u1").await;
    seed(&h.store)?;
    let trigger = MigrationTrigger::new(h.engine.clone(), Arc::new(LogNoticeSink));
    let gate = h.backend.hold();

    let running = {
        let trigger = trigger.clone();
        tokio::spawn(async move { trigger.run_for("u1").await })
    };
    timeout(WAIT, h.backend.entered.notified()).await?;
    assert!(trigger.is_migrating());

    let refused = trigger.run_for("u1").await;
    assert_eq!(
        refused,
        MigrationNotice::Failure {
            message: "A migration is already in progress.".to_string()
        }
    );
    assert_eq!(trigger.on_auth_state(&h.session.current()).await, None);

    gate.notify_one();
    timeout(WAIT, h.backend.entered.notified()).await?;
    gate.notify_one();
    let notice = timeout(WAIT, running).await??;
    assert!(matches!(notice, MigrationNotice::Success { .. }));
    assert!(!trigger.is_migrating());

    let tables: Vec<String> = h.backend.calls().into_iter().map(|c| c.table).collect();
    assert_eq!(tables, vec![MUSIC_TABLE, PLAYLISTS_TABLE]);
    Ok(())
}

#[tokio::test]
async fn failure_releases_flag_and_allows_retry() -> Result<()> {
    let h = harness("u1").await;
    seed(&h.store)?;
    h.backend.fail_table(PLAYLISTS_TABLE);
    let trigger = MigrationTrigger::new(h.engine.clone(), Arc::new(LogNoticeSink));

    let notice = trigger.run_for("u1").await;
    match &notice {
        MigrationNotice::Failure { message } => {
            assert_eq!(message, FAILURE_MESSAGE);
            assert!(!message.contains("playlists"));
            assert!(!message.contains("scripted"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!trigger.is_migrating());
    assert!(h.store.has_local_data());

    h.backend.heal_table(PLAYLISTS_TABLE);
    assert_eq!(
        trigger.run_for("u1").await,
        MigrationNotice::Success {
            music_migrated: 1,
            playlists_migrated: 1
        }
    );
    assert_eq!(h.backend.remote_ids(MUSIC_TABLE, "u1").await, vec!["m1"]);
    Ok(())
}

#[tokio::test]
async fn panic_inside_upload_becomes_failure() -> Result<()> {
    let h = harness("u1").await;
    seed(&h.store)?;
    h.backend.panic_on(MUSIC_TABLE);
    let trigger = MigrationTrigger::new(h.engine.clone(), Arc::new(LogNoticeSink));

    let notice = trigger.run_for("u1").await;
    match notice {
        MigrationNotice::Failure { message } => {
            assert_eq!(message, FAILURE_MESSAGE);
            assert!(!message.contains("scripted panic"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!trigger.is_migrating());
    assert!(h.store.has_local_data());
    Ok(())
}

#[tokio::test]
async fn listener_migrates_on_sign_in_and_notifies() -> Result<()> {
    let store = LocalStore::in_memory();
    seed(&store)?;
    let session = SessionHandle::new();
    let backend = ScriptedBackend::new().await;
    let engine = MigrationEngine::new(
        store.clone(),
        RemoteClient::new(backend.clone(), session.clone()),
    );
    let sink = ChannelNoticeSink::new(8);
    let mut notices = sink.subscribe();
    let trigger = MigrationTrigger::new(engine, Arc::new(sink));
    let listener = trigger.spawn_listener(session.subscribe());

    session.sign_in("u7", "token")?;
    let notice = timeout(WAIT, notices.recv()).await??;
    assert_eq!(
        notice,
        MigrationNotice::Success {
            music_migrated: 1,
            playlists_migrated: 1
        }
    );
    assert!(!store.has_local_data());
    assert_eq!(backend.remote_ids(PLAYLISTS_TABLE, "u7").await, vec!["p1"]);

    listener.abort();
    Ok(())
}
