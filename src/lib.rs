//! Spotish Playlist Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod freshness;
pub mod playlist;
pub mod server;
mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use freshness::{FreshnessCache, InMemoryFreshnessCache};
pub use playlist::{PlaylistManager, PlaylistStore, SqlitePlaylistStore};
pub use server::{run_server, RequestsLoggingLevel};
