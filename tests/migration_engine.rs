#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::time::Duration;

use anyhow::Result;
use cantoral_lib::local_store::{MUSIC_KEY, PLAYLISTS_KEY};
use cantoral_lib::migration::Phase;
use cantoral_lib::remote::{MUSIC_TABLE, PLAYLISTS_TABLE};
use cantoral_lib::{MigrationError, MigrationSummary};
use serde_json::json;
use tokio::time::timeout;
use util::{harness, music_json, playlists_json};

#[tokio::test]
async fn refuses_without_user_and_touches_nothing() -> Result<()> {
    let h = harness("u1").await;
    let music = music_json(&[("m1", "Ave Maria")]);
    h.store.write_raw(MUSIC_KEY, &music)?;

    for user in [None, Some(""), Some("   ")] {
        let err = h.engine.migrate(user).await.expect_err("no user");
        assert!(matches!(err, MigrationError::Unauthenticated));
    }
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.store.read_raw(MUSIC_KEY).as_deref(), Some(music.as_str()));
    Ok(())
}

#[tokio::test]
async fn empty_store_short_circuits() -> Result<()> {
    let h = harness("u1").await;
    let summary = h.engine.migrate(Some("u1")).await?;
    assert_eq!(summary, MigrationSummary::default());
    assert!(h.backend.calls().is_empty());

    h.store.write_raw(MUSIC_KEY, "[]")?;
    h.store.write_raw(PLAYLISTS_KEY, "[]")?;
    let summary = h.engine.migrate(Some("u1")).await?;
    assert_eq!(summary.music_migrated + summary.playlists_migrated, 0);
    assert!(h.backend.calls().is_empty());
    assert!(!h.store.has_local_data());
    Ok(())
}

#[tokio::test]
async fn uploads_music_before_playlists_then_clears() -> Result<()> {
    let h = harness("u1").await;
    h.store
        .write_raw(MUSIC_KEY, &music_json(&[("m1", "Ave Maria"), ("m2", "Kyrie")]))?;
    h.store
        .write_raw(PLAYLISTS_KEY, &playlists_json(&[("p1", "Sunday", &["m1", "m2"])]))?;

    let summary = h.engine.migrate(Some("u1")).await?;
    assert_eq!(
        summary,
        MigrationSummary {
            music_migrated: 2,
            playlists_migrated: 1
        }
    );

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].table, MUSIC_TABLE);
    assert_eq!(calls[1].table, PLAYLISTS_TABLE);
    assert!(calls.iter().all(|c| c.ignore_duplicates));

    assert_eq!(h.backend.remote_ids(MUSIC_TABLE, "u1").await, vec!["m1", "m2"]);
    assert_eq!(h.backend.remote_ids(PLAYLISTS_TABLE, "u1").await, vec!["p1"]);
    assert!(!h.store.has_local_data());

    let again = h.engine.migrate(Some("u1")).await?;
    assert_eq!(again, MigrationSummary::default());
    assert_eq!(h.backend.calls().len(), 2);
    Ok(())
}

#[tokio::test]
async fn music_failure_leaves_everything_local() -> Result<()> {
    let h = harness("u1").await;
    let music = music_json(&[("m1", "Ave Maria")]);
    let playlists = playlists_json(&[("p1", "Sunday", &["m1"])]);
    h.store.write_raw(MUSIC_KEY, &music)?;
    h.store.write_raw(PLAYLISTS_KEY, &playlists)?;
    h.backend.fail_table(MUSIC_TABLE);

    let err = h.engine.migrate(Some("u1")).await.expect_err("music fails");
    assert!(matches!(
        err,
        MigrationError::Remote {
            phase: Phase::Music,
            ..
        }
    ));
    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1, "playlists must not be attempted");
    assert_eq!(h.store.read_raw(MUSIC_KEY).as_deref(), Some(music.as_str()));
    assert_eq!(h.store.read_raw(PLAYLISTS_KEY).as_deref(), Some(playlists.as_str()));
    Ok(())
}

#[tokio::test]
async fn retry_after_playlist_failure_creates_no_duplicates() -> Result<()> {
    let h = harness("u1").await;
    h.store
        .write_raw(MUSIC_KEY, &music_json(&[("m1", "Ave Maria"), ("m2", "Kyrie")]))?;
    h.store
        .write_raw(PLAYLISTS_KEY, &playlists_json(&[("p1", "Sunday", &["m1"])]))?;
    h.backend.fail_table(PLAYLISTS_TABLE);

    let err = h.engine.migrate(Some("u1")).await.expect_err("playlists fail");
    assert!(matches!(
        err,
        MigrationError::Remote {
            phase: Phase::Playlists,
            ..
        }
    ));
    assert_eq!(h.backend.remote_ids(MUSIC_TABLE, "u1").await, vec!["m1", "m2"]);
    assert!(h.store.has_local_data());

    h.backend.heal_table(PLAYLISTS_TABLE);
    let summary = h.engine.migrate(Some("u1")).await?;
    assert_eq!(summary.music_migrated, 2);
    assert_eq!(summary.playlists_migrated, 1);
    assert_eq!(h.backend.remote_ids(MUSIC_TABLE, "u1").await, vec!["m1", "m2"]);
    assert_eq!(h.backend.remote_ids(PLAYLISTS_TABLE, "u1").await, vec!["p1"]);
    assert!(!h.store.has_local_data());
    Ok(())
}

#[tokio::test]
async fn rerun_with_same_ids_keeps_remote_copy() -> Result<()> {
    let h = harness("u1").await;
    h.store.write_raw(MUSIC_KEY, &music_json(&[("m1", "Ave Maria")]))?;
    h.engine.migrate(Some("u1")).await?;

    // Leftover local data from an earlier client, edited since.
    h.store.write_raw(MUSIC_KEY, &music_json(&[("m1", "Ave Maria (edited)")]))?;
    let summary = h.engine.migrate(Some("u1")).await?;
    assert_eq!(summary.music_migrated, 1);

    let rows = h.backend.remote_rows(MUSIC_TABLE, "u1").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], json!("Ave Maria"));
    Ok(())
}

#[tokio::test]
async fn records_without_ids_get_assigned_ones() -> Result<()> {
    let h = harness("u1").await;
    h.store.write_raw(
        MUSIC_KEY,
        r#"[{"title":"Salve Regina","lyrics":"Salve"},{"id":"","title":"Regina Caeli","lyrics":"Regina"}]"#,
    )?;
    let summary = h.engine.migrate(Some("u1")).await?;
    assert_eq!(summary.music_migrated, 2);

    let ids = h.backend.remote_ids(MUSIC_TABLE, "u1").await;
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|id| uuid::Uuid::parse_str(id).is_ok()));
    Ok(())
}

#[tokio::test]
async fn retry_reuses_ids_assigned_to_id_less_records() -> Result<()> {
    let h = harness("u1").await;
    h.store
        .write_raw(MUSIC_KEY, r#"[{"title":"Salve Regina","lyrics":"Salve"}]"#)?;
    h.store
        .write_raw(PLAYLISTS_KEY, &playlists_json(&[("p1", "Compline", &[])]))?;
    h.backend.fail_table(PLAYLISTS_TABLE);

    h.engine.migrate(Some("u1")).await.expect_err("playlists fail");
    let first = h.backend.remote_ids(MUSIC_TABLE, "u1").await;
    assert_eq!(first.len(), 1);

    h.backend.heal_table(PLAYLISTS_TABLE);
    let summary = h.engine.migrate(Some("u1")).await?;
    assert_eq!(summary.music_migrated, 1);
    assert_eq!(h.backend.remote_ids(MUSIC_TABLE, "u1").await, first);
    assert!(!h.store.has_local_data());
    Ok(())
}

#[tokio::test]
async fn remote_rows_follow_the_field_mapping() -> Result<()> {
    let h = harness("user-42").await;
    h.store.write_raw(
        MUSIC_KEY,
        r#"[{"id":"m1","title":"Ave Maria","lyrics":"Ave Maria, gratia plena","liturgicalMoment":["Offertory"],"dateAdded":"2023-01-01","favorite":true,"author":""}]"#,
    )?;
    h.store.write_raw(
        PLAYLISTS_KEY,
        r#"[{"id":"p1","name":"Advent","musicIds":["m1"],"dateCreated":"2023-12-01T00:00:00Z","dateModified":"2023-11-01T00:00:00Z"}]"#,
    )?;
    h.engine.migrate(Some("user-42")).await?;

    let music = h.backend.remote_rows(MUSIC_TABLE, "user-42").await;
    assert_eq!(
        music[0],
        json!({
            "id": "m1",
            "title": "Ave Maria",
            "author": null,
            "tempo": null,
            "key": null,
            "liturgical_moment": ["Offertory"],
            "tags": [],
            "lyrics": "Ave Maria, gratia plena",
            "chords": null,
            "date_added": "2023-01-01T00:00:00.000Z",
            "favorite": true,
            "created_by": "user-42"
        })
    );

    let playlists = h.backend.remote_rows(PLAYLISTS_TABLE, "user-42").await;
    assert_eq!(playlists[0]["music_ids"], json!(["m1"]));
    assert_eq!(playlists[0]["description"], json!(null));
    assert_eq!(playlists[0]["date_created"], json!("2023-12-01T00:00:00.000Z"));
    assert_eq!(playlists[0]["date_modified"], json!("2023-12-01T00:00:00.000Z"));
    Ok(())
}

#[tokio::test]
async fn corrupt_collection_is_quarantined_not_lost() -> Result<()> {
    let h = harness("u1").await;
    h.store.write_raw(MUSIC_KEY, "{definitely not json")?;
    h.store
        .write_raw(PLAYLISTS_KEY, &playlists_json(&[("p1", "Sunday", &[])]))?;

    let summary = h.engine.migrate(Some("u1")).await?;
    assert_eq!(summary.music_migrated, 0);
    assert_eq!(summary.playlists_migrated, 1);
    assert_eq!(h.backend.calls().len(), 1);
    assert!(!h.store.has_local_data());
    assert_eq!(
        h.store.read_raw("userMusic.corrupt").as_deref(),
        Some("{definitely not json")
    );
    Ok(())
}

#[tokio::test]
async fn anonymous_session_surfaces_as_remote_error() -> Result<()> {
    let h = harness("u1").await;
    h.session.sign_out()?;
    let music = music_json(&[("m1", "Ave Maria")]);
    h.store.write_raw(MUSIC_KEY, &music)?;

    let err = h.engine.migrate(Some("u1")).await.expect_err("no token");
    assert!(matches!(
        err,
        MigrationError::Remote {
            phase: Phase::Music,
            source: cantoral_lib::remote::RemoteError::Unauthenticated
        }
    ));
    assert_eq!(h.store.read_raw(MUSIC_KEY).as_deref(), Some(music.as_str()));
    Ok(())
}

#[tokio::test]
async fn migration_waits_for_in_flight_local_write() -> Result<()> {
    let h = harness("u1").await;
    h.store.write_raw(MUSIC_KEY, &music_json(&[("m1", "Ave Maria")]))?;
    let held = h.store.write_lock().await;

    let running = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.migrate(Some("u1")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.backend.calls().is_empty());

    // The write that owned the lock lands before the migration reads.
    let mut music = h.store.read_music_collection()?;
    music.extend(serde_json::from_str::<Vec<_>>(&music_json(&[("m2", "Kyrie")]))?);
    h.store.write_music_collection(&music)?;
    drop(held);

    let summary = timeout(Duration::from_secs(5), running).await???;
    assert_eq!(summary.music_migrated, 2);
    assert_eq!(h.backend.remote_ids(MUSIC_TABLE, "u1").await, vec!["m1", "m2"]);
    assert!(!h.store.has_local_data());
    Ok(())
}
