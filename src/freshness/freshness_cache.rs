use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Key identifying either a single playlist or one of the coarser collection
/// views whose freshness is tracked separately per user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FreshnessKey {
    Playlist(i64),
    AllPlaylists(String),
    FollowedAllPlaylists(String),
}

impl fmt::Display for FreshnessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreshnessKey::Playlist(id) => write!(f, "playlist:{}", id),
            FreshnessKey::AllPlaylists(name) => write!(f, "ALL_PLAYLISTS:{}", name),
            FreshnessKey::FollowedAllPlaylists(name) => {
                write!(f, "FOLLOWED_ALL_PLAYLISTS:{}", name)
            }
        }
    }
}

/// Tracks when a logical entity last changed, in-process only. The cache is
/// advisory: it backs conditional reads and mutation preconditions but is
/// never the system of record, and its content does not survive a restart.
pub trait FreshnessCache: Send + Sync {
    fn get(&self, key: &FreshnessKey) -> Option<SystemTime>;

    fn put(&self, key: FreshnessKey, timestamp: SystemTime);

    /// Removes the entry so the next reader reseeds it. Aggregate keys are
    /// invalidated rather than re-stamped when their collection changes.
    fn invalidate(&self, key: &FreshnessKey);
}

#[derive(Default)]
pub struct InMemoryFreshnessCache {
    entries: Mutex<HashMap<FreshnessKey, SystemTime>>,
}

impl FreshnessCache for InMemoryFreshnessCache {
    fn get(&self, key: &FreshnessKey) -> Option<SystemTime> {
        self.entries.lock().unwrap().get(key).copied()
    }

    fn put(&self, key: FreshnessKey, timestamp: SystemTime) {
        self.entries.lock().unwrap().insert(key, timestamp);
    }

    fn invalidate(&self, key: &FreshnessKey) {
        self.entries.lock().unwrap().remove(key);
    }
}

/// The current time truncated to whole seconds, the granularity of the
/// Last-Modified header. Stamping sub-second instants would make a timestamp
/// echoed back by a client never compare equal to the cached one.
pub fn now_to_the_second() -> SystemTime {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    UNIX_EPOCH + Duration::from_secs(secs)
}
