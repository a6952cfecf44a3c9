use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const MAX_NAME_LENGTH: usize = 250;
pub const MAX_DESCRIPTION_LENGTH: usize = 250;

/// Read-only projection of a catalogue music entry. `creator_names` holds
/// every creator of the music (e.g. on a featuring), comma-joined and sorted
/// alphabetically.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Music {
    pub music_id: i64,
    pub title: String,
    pub release_date: Option<NaiveDate>,
    pub duration: i64,
    pub genre: Option<String>,
    pub creator_names: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub creator_name: String,
    pub musics: Vec<Music>,
}

impl Playlist {
    pub fn music_ids(&self) -> Vec<i64> {
        self.musics.iter().map(|m| m.music_id).collect()
    }
}

/// Client payload for playlist creation. The id is only ever used for the
/// duplicate check, and the creator name is overwritten with the caller's
/// identity before anything is persisted.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewPlaylist {
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub creator_name: Option<String>,
    pub music_ids: Vec<i64>,
}
