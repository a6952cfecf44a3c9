mod error;
mod playlist_manager;
pub mod playlist_models;
mod playlist_store;
mod sqlite_playlist_store;

pub use error::PlaylistError;
pub use playlist_manager::{ConditionalGet, PlaylistManager};
pub use playlist_models::{Music, NewPlaylist, Playlist};
pub use playlist_store::{CatalogStore, PlaylistStore};
pub use sqlite_playlist_store::SqlitePlaylistStore;
