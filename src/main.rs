use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use cantoral_lib::catalog::query::{self, MusicFilter, SortKey};
use cantoral_lib::catalog::NewMusic;
use cantoral_lib::config::{BackendKind, SyncConfig};
use cantoral_lib::local_store::{LocalStore, MUSIC_KEY, PLAYLISTS_KEY};
use cantoral_lib::logging::init_logging;
use cantoral_lib::migration::trigger::LogNoticeSink;
use cantoral_lib::{AppError, AppState, MigrationNotice, MusicRecord};

#[derive(Debug, Parser)]
#[command(name = "cantoral", about = "Liturgical music catalog", version)]
struct Cli {
    /// Local store file. Defaults to `store.json` in the data directory.
    #[arg(long, global = true, env = "CANTORAL_STORE_PATH")]
    store: Option<PathBuf>,
    /// Remote backend to talk to.
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendKind>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show what is stored locally and who is signed in.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Sign in as `user` and move local songs and playlists to the remote store.
    Migrate {
        #[arg(long)]
        user: String,
        /// Access token for the remote store.
        #[arg(long, env = "CANTORAL_ACCESS_TOKEN", default_value = "")]
        token: String,
    },
    /// Forget the signed-in user.
    Logout,
    /// Add a song to the catalog.
    Import {
        #[arg(long)]
        title: String,
        #[arg(long)]
        lyrics: String,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        tempo: Option<String>,
        #[arg(long)]
        key: Option<String>,
        /// Liturgical moment; repeat for several.
        #[arg(long = "moment")]
        moments: Vec<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        chords: Option<String>,
    },
    /// List songs, optionally filtered and sorted.
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        moment: Option<String>,
        #[arg(long, value_enum, default_value = "title")]
        sort: SortKey,
        #[arg(long)]
        json: bool,
    },
    /// Mark or unmark a song as favorite.
    Favorite {
        id: String,
        #[arg(long)]
        off: bool,
    },
    #[command(subcommand)]
    Playlist(PlaylistCommand),
}

#[derive(Debug, Subcommand)]
enum PlaylistCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Add {
        #[arg(long)]
        playlist: String,
        #[arg(long)]
        music: String,
    },
    List {
        #[arg(long)]
        search: Option<String>,
    },
    /// Print the songs of a playlist in playlist order.
    Show { id: String },
}

#[tokio::main]
async fn main() {
    let _logging = init_logging();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = SyncConfig::from_env().map_err(AppError::from)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    let state = AppState::from_config(&config, Arc::new(LogNoticeSink))
        .await
        .context("open catalog")?;
    state.session.restore().map_err(AppError::from)?;
    tracing::debug!(target: "cantoral", event = "cli_started", git = cantoral_lib::GIT_HASH);

    match cli.command {
        Command::Status { json } => status(&state, &config, json),
        Command::Migrate { user, token } => migrate(&state, &user, &token).await,
        Command::Logout => {
            state.session.sign_out().map_err(AppError::from)?;
            println!("signed out");
            Ok(0)
        }
        Command::Import {
            title,
            lyrics,
            author,
            tempo,
            key,
            moments,
            tags,
            chords,
        } => {
            let record = state
                .catalog
                .import_music(NewMusic {
                    title,
                    lyrics,
                    author,
                    tempo,
                    key,
                    liturgical_moment: moments,
                    tags,
                    chords,
                })
                .await
                .map_err(AppError::from)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(0)
        }
        Command::List {
            search,
            moment,
            sort,
            json,
        } => {
            let music = state.catalog.list_music().await.map_err(AppError::from)?;
            let mut hits = query::search(&music, &MusicFilter { term: search, moment });
            query::sort(&mut hits, sort);
            print_music(&hits, json)?;
            Ok(0)
        }
        Command::Favorite { id, off } => {
            let record = state
                .catalog
                .toggle_favorite(&id, !off)
                .await
                .map_err(AppError::from)?;
            println!("{}\t{}", record.id, if record.favorite { "favorite" } else { "-" });
            Ok(0)
        }
        Command::Playlist(command) => playlist(&state, command).await,
    }
}

fn collection_summary<T>(
    result: Result<Vec<T>, cantoral_lib::local_store::StoreError>,
) -> Result<serde_json::Value> {
    match result {
        Ok(records) => Ok(json!(records.len())),
        Err(err) if err.is_corrupt() => Ok(json!("corrupt")),
        Err(err) => Err(err.into()),
    }
}

fn status(state: &AppState, config: &SyncConfig, as_json: bool) -> Result<i32> {
    let store: &LocalStore = &state.store;
    let music = collection_summary(store.read_music_collection())?;
    let playlists = collection_summary(store.read_playlist_collection())?;
    let report = json!({
        "store_path": config.store_path.display().to_string(),
        "backend": state.remote.backend_name(),
        "user": state.session.current().user_id(),
        "has_local_data": store.has_local_data(),
        MUSIC_KEY: music,
        PLAYLISTS_KEY: playlists,
    });
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(fields) = report.as_object() {
        for (name, value) in fields {
            println!("{name:<16} {value}");
        }
    }
    Ok(0)
}

async fn migrate(state: &AppState, user: &str, token: &str) -> Result<i32> {
    state
        .session
        .sign_in(user, token)
        .map_err(AppError::from)?;
    let notice = state.trigger.run_for(user).await;
    println!("{}", serde_json::to_string(&notice)?);
    eprintln!("{}: {}", notice.title(), notice.description());
    Ok(match notice {
        MigrationNotice::Failure { .. } => 1,
        MigrationNotice::Success { .. } | MigrationNotice::NoLocalData => 0,
    })
}

async fn playlist(state: &AppState, command: PlaylistCommand) -> Result<i32> {
    let catalog = &state.catalog;
    match command {
        PlaylistCommand::Create { name, description } => {
            let playlist = catalog
                .create_playlist(&name, description)
                .await
                .map_err(AppError::from)?;
            println!("{}", serde_json::to_string_pretty(&playlist)?);
        }
        PlaylistCommand::Add { playlist, music } => {
            let updated = catalog
                .add_to_playlist(&playlist, &music)
                .await
                .map_err(AppError::from)?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        PlaylistCommand::List { search } => {
            let playlists = catalog.list_playlists().await.map_err(AppError::from)?;
            for p in query::filter_playlists(&playlists, search.as_deref().unwrap_or("")) {
                println!("{}\t{}\t{} songs", p.id, p.name, p.music_ids.len());
            }
        }
        PlaylistCommand::Show { id } => {
            let playlist = catalog
                .get_playlist(&id)
                .await
                .map_err(AppError::from)?
                .with_context(|| format!("playlist {id} not found"))?;
            let songs = catalog
                .get_music_by_ids(&playlist.music_ids)
                .await
                .map_err(AppError::from)?;
            println!("{}", playlist.name);
            print_music(&songs, false)?;
        }
    }
    Ok(0)
}

fn print_music(records: &[MusicRecord], as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    for record in records {
        println!(
            "{}\t{}\t{}{}",
            record.id,
            record.title,
            record.author.as_deref().unwrap_or("-"),
            if record.favorite { "\t*" } else { "" }
        );
    }
    Ok(())
}
