use super::error::PlaylistError;
use super::playlist_models::{NewPlaylist, Playlist, MAX_DESCRIPTION_LENGTH, MAX_NAME_LENGTH};
use super::playlist_store::{CatalogStore, PlaylistStore};
use crate::freshness::{now_to_the_second, FreshnessCache, FreshnessKey};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Outcome of a conditional read: either the caller's timestamp matched the
/// cached one exactly and the store was never touched, or the value is
/// returned together with its freshness timestamp.
pub enum ConditionalGet<T> {
    NotModified,
    Fresh {
        value: T,
        last_modified: SystemTime,
    },
}

/// Orchestrates the playlist store, the existence oracles and the freshness
/// cache. This is the only component aware of who is calling: it enforces
/// validation, the creator-ownership predicate and the optimistic-concurrency
/// precondition before any mutation reaches the store.
pub struct PlaylistManager {
    store: Arc<dyn PlaylistStore>,
    catalog: Arc<dyn CatalogStore>,
    freshness: Arc<dyn FreshnessCache>,
}

impl PlaylistManager {
    pub fn new(
        store: Arc<dyn PlaylistStore>,
        catalog: Arc<dyn CatalogStore>,
        freshness: Arc<dyn FreshnessCache>,
    ) -> Self {
        Self {
            store,
            catalog,
            freshness,
        }
    }

    /// Creates a playlist owned by the caller and returns its id with the
    /// freshness timestamp stamped for it. Whatever creator name the payload
    /// carries is overwritten with the caller's identity.
    pub fn create_playlist(
        &self,
        playlist: NewPlaylist,
        caller: &str,
    ) -> Result<(i64, SystemTime), PlaylistError> {
        if let Some(id) = playlist.id {
            if self.store.playlist_exists(id)? {
                return Err(PlaylistError::Conflict(format!(
                    "Playlist with id {} already exists",
                    id
                )));
            }
        }

        if playlist.name.is_empty() {
            return Err(PlaylistError::Validation("Name must not be empty".into()));
        }
        // Limits are in characters, not bytes; multibyte names count once.
        if playlist.name.chars().count() > MAX_NAME_LENGTH {
            return Err(PlaylistError::Validation(format!(
                "Name must be at most {} characters",
                MAX_NAME_LENGTH
            )));
        }
        if let Some(description) = &playlist.description {
            if description.chars().count() > MAX_DESCRIPTION_LENGTH {
                return Err(PlaylistError::Validation(format!(
                    "Description must be at most {} characters",
                    MAX_DESCRIPTION_LENGTH
                )));
            }
        }
        if playlist.music_ids.is_empty() {
            return Err(PlaylistError::Validation(
                "Playlist must contain at least one music".into(),
            ));
        }

        // Membership is a set: repeated ids in the payload collapse to one
        // row, keeping first-occurrence order.
        let mut music_ids: Vec<i64> = vec![];
        for music_id in &playlist.music_ids {
            if !music_ids.contains(music_id) {
                music_ids.push(*music_id);
            }
        }

        let id = self.store.create_playlist(
            &playlist.name,
            playlist.description.as_deref(),
            caller,
            &music_ids,
        )?;
        debug!("Created playlist {} for {}", id, caller);

        let now = now_to_the_second();
        self.freshness.put(FreshnessKey::Playlist(id), now);
        self.freshness
            .invalidate(&FreshnessKey::AllPlaylists(caller.to_owned()));
        Ok((id, now))
    }

    pub fn get_playlist(
        &self,
        playlist_id: i64,
        if_modified_since: Option<SystemTime>,
    ) -> Result<ConditionalGet<Playlist>, PlaylistError> {
        self.conditional_get(FreshnessKey::Playlist(playlist_id), if_modified_since, || {
            self.store.get_playlist(playlist_id)?.ok_or_else(|| {
                PlaylistError::not_found(format!("Playlist with id {} not found", playlist_id))
            })
        })
    }

    pub fn get_creator_playlists(
        &self,
        creator_name: &str,
        if_modified_since: Option<SystemTime>,
    ) -> Result<ConditionalGet<Vec<Playlist>>, PlaylistError> {
        if !self.catalog.user_exists(creator_name)? {
            return Err(PlaylistError::not_found(format!(
                "User {} does not exist",
                creator_name
            )));
        }
        self.conditional_get(
            FreshnessKey::AllPlaylists(creator_name.to_owned()),
            if_modified_since,
            || Ok(self.store.get_creator_playlists(creator_name)?),
        )
    }

    pub fn get_followed_playlists(
        &self,
        username: &str,
        if_modified_since: Option<SystemTime>,
    ) -> Result<ConditionalGet<Vec<Playlist>>, PlaylistError> {
        if !self.catalog.user_exists(username)? {
            return Err(PlaylistError::not_found(format!(
                "User {} does not exist",
                username
            )));
        }
        self.conditional_get(
            FreshnessKey::FollowedAllPlaylists(username.to_owned()),
            if_modified_since,
            || Ok(self.store.get_followed_playlists(username)?),
        )
    }

    /// Makes the user follow the playlist. Following a playlist that is
    /// already followed is a no-op, not an error.
    pub fn follow_playlist(&self, username: &str, playlist_id: i64) -> Result<(), PlaylistError> {
        if !self.store.playlist_exists(playlist_id)? {
            return Err(PlaylistError::not_found(format!(
                "Playlist with id {} not found",
                playlist_id
            )));
        }
        if self.store.is_following(username, playlist_id)? {
            debug!("{} already follows playlist {}", username, playlist_id);
            return Ok(());
        }
        self.store.follow_playlist(username, playlist_id)?;
        self.freshness
            .invalidate(&FreshnessKey::FollowedAllPlaylists(username.to_owned()));
        Ok(())
    }

    pub fn add_music_to_playlist(
        &self,
        caller: &str,
        playlist_id: i64,
        music_id: i64,
        if_unmodified_since: Option<SystemTime>,
    ) -> Result<SystemTime, PlaylistError> {
        let playlist =
            self.checked_for_mutation(caller, playlist_id, music_id, if_unmodified_since)?;

        if playlist.musics.iter().any(|m| m.music_id == music_id) {
            // Already a member: idempotent success without a store write.
            return Ok(self.stamp_untouched(playlist_id));
        }

        self.store.add_music(playlist_id, music_id)?;
        Ok(self.stamp_mutation(playlist_id, &playlist.creator_name))
    }

    pub fn remove_music_from_playlist(
        &self,
        caller: &str,
        playlist_id: i64,
        music_id: i64,
        if_unmodified_since: Option<SystemTime>,
    ) -> Result<SystemTime, PlaylistError> {
        let playlist =
            self.checked_for_mutation(caller, playlist_id, music_id, if_unmodified_since)?;

        if !playlist.musics.iter().any(|m| m.music_id == music_id) {
            return Ok(self.stamp_untouched(playlist_id));
        }

        self.store.remove_music(playlist_id, music_id)?;
        Ok(self.stamp_mutation(playlist_id, &playlist.creator_name))
    }

    /// Runs every check that must pass before a membership mutation, in
    /// order: music exists, playlist exists, caller owns the playlist, and
    /// the caller's belief about the playlist's last-modified time is still
    /// correct. Nothing is written if any of them fails.
    fn checked_for_mutation(
        &self,
        caller: &str,
        playlist_id: i64,
        music_id: i64,
        if_unmodified_since: Option<SystemTime>,
    ) -> Result<Playlist, PlaylistError> {
        if !self.catalog.music_exists(music_id)? {
            return Err(PlaylistError::not_found(format!(
                "Music with id {} not found",
                music_id
            )));
        }
        let playlist = self.store.get_playlist(playlist_id)?.ok_or_else(|| {
            PlaylistError::not_found(format!("Playlist with id {} not found", playlist_id))
        })?;
        if playlist.creator_name != caller {
            return Err(PlaylistError::Unauthorized(format!(
                "Only {} may modify playlist {}",
                playlist.creator_name, playlist_id
            )));
        }
        if let Some(supplied) = if_unmodified_since {
            let cached = self.freshness.get(&FreshnessKey::Playlist(playlist_id));
            if cached != Some(supplied) {
                debug!(
                    "Stale precondition on playlist {}: supplied {:?}, cached {:?}",
                    playlist_id, supplied, cached
                );
                return Err(PlaylistError::PreconditionFailed(format!(
                    "Playlist {} was modified since the supplied timestamp",
                    playlist_id
                )));
            }
        }
        Ok(playlist)
    }

    fn stamp_mutation(&self, playlist_id: i64, creator_name: &str) -> SystemTime {
        let now = now_to_the_second();
        self.freshness.put(FreshnessKey::Playlist(playlist_id), now);
        self.freshness
            .invalidate(&FreshnessKey::AllPlaylists(creator_name.to_owned()));
        now
    }

    /// Freshness timestamp to report when a mutation turned out to be a
    /// no-op: the existing entry, seeded now if absent.
    fn stamp_untouched(&self, playlist_id: i64) -> SystemTime {
        let key = FreshnessKey::Playlist(playlist_id);
        match self.freshness.get(&key) {
            Some(t) => t,
            None => {
                let now = now_to_the_second();
                self.freshness.put(key, now);
                now
            }
        }
    }

    fn conditional_get<T>(
        &self,
        key: FreshnessKey,
        if_modified_since: Option<SystemTime>,
        fetch: impl FnOnce() -> Result<T, PlaylistError>,
    ) -> Result<ConditionalGet<T>, PlaylistError> {
        let cached = self.freshness.get(&key);
        if let (Some(cached), Some(supplied)) = (cached, if_modified_since) {
            // Exact equality on purpose: any other timestamp, earlier or
            // later, means the caller's copy is not trusted.
            if cached == supplied {
                return Ok(ConditionalGet::NotModified);
            }
        }

        let value = fetch()?;
        let last_modified = match cached {
            Some(t) => t,
            None => {
                let now = now_to_the_second();
                self.freshness.put(key, now);
                now
            }
        };
        Ok(ConditionalGet::Fresh {
            value,
            last_modified,
        })
    }
}
