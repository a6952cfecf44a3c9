use super::playlist_models::Playlist;
use anyhow::Result;

/// Durable persistence for playlists and their music membership.
///
/// The store knows nothing about callers or freshness: authorization,
/// idempotence and cache bookkeeping are the manager's concern.
pub trait PlaylistStore: Send + Sync {
    /// Inserts the playlist row and one membership row per music id, all in
    /// the same transaction, and returns the generated playlist id. If any
    /// membership insert fails (e.g. a music id that does not exist) the
    /// whole insert is rolled back.
    fn create_playlist(
        &self,
        name: &str,
        description: Option<&str>,
        creator_name: &str,
        music_ids: &[i64],
    ) -> Result<i64>;

    /// Returns the playlist with its full music membership.
    /// Returns Ok(None) if the playlist does not exist.
    fn get_playlist(&self, playlist_id: i64) -> Result<Option<Playlist>>;

    fn playlist_exists(&self, playlist_id: i64) -> Result<bool>;

    /// Returns all playlists created by the given user, memberships included.
    fn get_creator_playlists(&self, creator_name: &str) -> Result<Vec<Playlist>>;

    /// Returns all playlists the given user follows, memberships included.
    fn get_followed_playlists(&self, username: &str) -> Result<Vec<Playlist>>;

    fn follow_playlist(&self, username: &str, playlist_id: i64) -> Result<()>;

    fn is_following(&self, username: &str, playlist_id: i64) -> Result<bool>;

    /// Inserts a single membership row. Fails on a duplicate membership.
    fn add_music(&self, playlist_id: i64, music_id: i64) -> Result<()>;

    /// Deletes a single membership row, whether or not it exists.
    fn remove_music(&self, playlist_id: i64, music_id: i64) -> Result<()>;
}

/// Existence oracle over the user directory and the music catalogue. The
/// manager only ever asks "does this entity exist"; everything else about
/// users and musics is out of scope here.
pub trait CatalogStore: Send + Sync {
    fn user_exists(&self, username: &str) -> Result<bool>;

    fn music_exists(&self, music_id: i64) -> Result<bool>;
}
