//! Liturgical music catalog with a one-way migration of locally kept songs
//! and playlists into a remote store once the user signs in.

pub mod catalog;
pub mod config;
#[cfg(feature = "desktop")]
pub mod desktop;
pub mod error;
pub mod id;
pub mod local_store;
pub mod logging;
pub mod migration;
pub mod model;
pub mod remote;
pub mod session;
pub mod state;
pub mod time;
pub mod util;

pub use error::{AppError, AppResult};
pub use local_store::LocalStore;
pub use migration::trigger::{MigrationNotice, MigrationTrigger};
pub use migration::{MigrationEngine, MigrationError, MigrationSummary};
pub use model::{MusicRecord, PlaylistRecord};
pub use session::{AuthState, SessionHandle};
pub use state::AppState;

/// Commit the crate was built from, or `unknown`.
pub const GIT_HASH: &str = env!("CANTORAL_GIT_HASH");
