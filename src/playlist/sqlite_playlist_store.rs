use crate::playlist::playlist_models::{Music, Playlist};
use crate::playlist::playlist_store::{CatalogStore, PlaylistStore};
use crate::sqlite_persistence::{Table, VersionedSchema, BASE_DB_VERSION};
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::{
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::info;

/// V 0
const USER_TABLE_V_0: Table = Table {
    name: "user",
    schema: "CREATE TABLE user (name TEXT NOT NULL UNIQUE, created INTEGER DEFAULT (cast(strftime('%s','now') as int)), PRIMARY KEY (name));",
    indices: &[],
};
const MUSIC_TABLE_V_0: Table = Table {
    name: "music",
    schema: "CREATE TABLE music (id INTEGER UNIQUE, title TEXT NOT NULL, release_date TEXT, duration INTEGER NOT NULL, genre TEXT, PRIMARY KEY (id));",
    indices: &[],
};
const MUSIC_CREATOR_TABLE_V_0: Table = Table {
    name: "music_creator",
    schema: "CREATE TABLE music_creator (music_id INTEGER NOT NULL, creator_name TEXT NOT NULL, UNIQUE (music_id, creator_name), CONSTRAINT music_id FOREIGN KEY (music_id) REFERENCES music (id) ON DELETE CASCADE);",
    indices: &[],
};
const PLAYLIST_TABLE_V_0: Table = Table {
    name: "playlist",
    schema: "CREATE TABLE playlist (id INTEGER UNIQUE, name TEXT NOT NULL, description TEXT, creator_name TEXT NOT NULL, created INTEGER DEFAULT (cast(strftime('%s','now') as int)), PRIMARY KEY (id), CONSTRAINT creator_name FOREIGN KEY (creator_name) REFERENCES user (name));",
    indices: &["CREATE INDEX playlist_creator_index ON playlist (creator_name);"],
};
const PLAYLIST_MUSIC_TABLE_V_0: Table = Table {
    name: "playlist_music",
    schema: "CREATE TABLE playlist_music (playlist_id INTEGER NOT NULL, music_id INTEGER NOT NULL, UNIQUE (playlist_id, music_id), CONSTRAINT playlist_id FOREIGN KEY (playlist_id) REFERENCES playlist (id) ON DELETE CASCADE, CONSTRAINT music_id FOREIGN KEY (music_id) REFERENCES music (id));",
    indices: &["CREATE INDEX playlist_music_playlist_index ON playlist_music (playlist_id);"],
};
const PLAYLIST_FOLLOWER_TABLE_V_0: Table = Table {
    name: "playlist_follower",
    schema: "CREATE TABLE playlist_follower (username TEXT NOT NULL, playlist_id INTEGER NOT NULL, created INTEGER DEFAULT (cast(strftime('%s','now') as int)), UNIQUE (username, playlist_id), CONSTRAINT username FOREIGN KEY (username) REFERENCES user (name), CONSTRAINT playlist_id FOREIGN KEY (playlist_id) REFERENCES playlist (id) ON DELETE CASCADE);",
    indices: &["CREATE INDEX playlist_follower_username_index ON playlist_follower (username);"],
};

fn create_v0(conn: &Connection, schema: &VersionedSchema) -> Result<()> {
    for table in schema.tables {
        conn.execute(table.schema, [])?;
        for index in table.indices {
            conn.execute(index, [])?;
        }
    }
    conn.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + schema.version),
        [],
    )?;
    Ok(())
}

fn validate_schema_0(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(playlist);")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get(1))?
        .collect::<Result<_, _>>()?;

    if columns != ["id", "name", "description", "creator_name", "created"] {
        bail!(
            "Schema validation failed for playlist table. found {:?}",
            columns
        );
    }

    let mut stmt = conn.prepare("PRAGMA table_info(playlist_music);")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get(1))?
        .collect::<Result<_, _>>()?;

    for name in ["playlist_id", "music_id"] {
        if !columns.contains(&name.to_string()) {
            bail!(
                "Schema validation failed for playlist_music table, missing {} column.",
                name
            );
        }
    }

    Ok(())
}

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        USER_TABLE_V_0,
        MUSIC_TABLE_V_0,
        MUSIC_CREATOR_TABLE_V_0,
        PLAYLIST_TABLE_V_0,
        PLAYLIST_MUSIC_TABLE_V_0,
        PLAYLIST_FOLLOWER_TABLE_V_0,
    ],
    create: create_v0,
    migration: None,
    validate: validate_schema_0,
}];

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct SqlitePlaylistStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePlaylistStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(db_path)?;
            Self::create_schema(&conn)?;
            conn
        };

        // Foreign keys enforcement is per-connection in SQLite; the create
        // transaction relies on it to reject membership rows with unknown
        // music ids.
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        // Read the database version
        let version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, usize>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION;

        if version >= VERSIONED_SCHEMAS.len() {
            bail!("Database version {} is too new", version);
        } else {
            (VERSIONED_SCHEMAS
                .get(version)
                .context("Failed to get schema")?
                .validate)(&conn)?;
        }

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqlitePlaylistStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        let latest_version = VERSIONED_SCHEMAS.last().unwrap();
        let create_fn = latest_version.create;
        create_fn(conn, latest_version)
    }

    fn migrate_if_needed(conn: &Connection, version: usize) -> Result<()> {
        let mut latest_from = version;
        for schema in VERSIONED_SCHEMAS.iter().skip(version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!(
                    "Migrating db from version {} to {}",
                    latest_from, schema.version
                );
                migration_fn(conn)?;
                latest_from = schema.version;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;

        Ok(())
    }

    /// Registers a user. User account management proper lives elsewhere; this
    /// exists so the directory can be seeded.
    pub fn create_user(&self, username: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("INSERT INTO {} (name) VALUES (?1)", USER_TABLE_V_0.name),
            params![username],
        )
        .with_context(|| format!("Failed to create user {}", username))?;
        Ok(())
    }

    /// Inserts a catalogue music entry with its creators and returns the id.
    pub fn insert_music(
        &self,
        title: &str,
        release_date: Option<NaiveDate>,
        duration: i64,
        genre: Option<&str>,
        creator_names: &[&str],
    ) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {} (title, release_date, duration, genre) VALUES (?1, ?2, ?3, ?4)",
                MUSIC_TABLE_V_0.name
            ),
            params![
                title,
                release_date.map(|d| d.format(DATE_FORMAT).to_string()),
                duration,
                genre
            ],
        )?;
        let music_id = tx.last_insert_rowid();
        for creator_name in creator_names {
            tx.execute(
                &format!(
                    "INSERT INTO {} (music_id, creator_name) VALUES (?1, ?2)",
                    MUSIC_CREATOR_TABLE_V_0.name
                ),
                params![music_id, creator_name],
            )?;
        }
        tx.commit()?;
        Ok(music_id)
    }

    fn get_playlist_musics(conn: &Connection, playlist_id: i64) -> Result<Vec<Music>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT m.id, m.title, m.release_date, m.duration, m.genre, mc.creator_name \
             FROM {} pm \
             JOIN {} m ON m.id = pm.music_id \
             JOIN {} mc ON mc.music_id = m.id \
             WHERE pm.playlist_id = ?1 \
             ORDER BY m.id, mc.creator_name",
            PLAYLIST_MUSIC_TABLE_V_0.name, MUSIC_TABLE_V_0.name, MUSIC_CREATOR_TABLE_V_0.name
        ))?;

        let rows = stmt
            .query_map(params![playlist_id], |row| {
                Ok((
                    row.get::<usize, i64>(0)?,
                    row.get::<usize, String>(1)?,
                    row.get::<usize, Option<String>>(2)?,
                    row.get::<usize, i64>(3)?,
                    row.get::<usize, Option<String>>(4)?,
                    row.get::<usize, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // One row per (music, creator): fold the creators of each music into
        // a single comma-joined string, as the API has always exposed them.
        let mut musics: Vec<Music> = vec![];
        for (music_id, title, release_date, duration, genre, creator_name) in rows {
            match musics.last_mut() {
                Some(last) if last.music_id == music_id => {
                    last.creator_names.push_str(", ");
                    last.creator_names.push_str(&creator_name);
                }
                _ => musics.push(Music {
                    music_id,
                    title,
                    release_date: release_date
                        .and_then(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).ok()),
                    duration,
                    genre,
                    creator_names: creator_name,
                }),
            }
        }
        Ok(musics)
    }

    fn get_playlists_where(
        &self,
        where_sql: &str,
        param: &str,
    ) -> Result<Vec<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT p.id, p.name, p.description, p.creator_name FROM {} p {}",
            PLAYLIST_TABLE_V_0.name, where_sql
        ))?;
        let headers = stmt
            .query_map(params![param], |row| {
                Ok((
                    row.get::<usize, i64>(0)?,
                    row.get::<usize, String>(1)?,
                    row.get::<usize, Option<String>>(2)?,
                    row.get::<usize, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut playlists = vec![];
        for (id, name, description, creator_name) in headers {
            playlists.push(Playlist {
                id,
                name,
                description,
                creator_name,
                musics: Self::get_playlist_musics(&conn, id)?,
            });
        }
        Ok(playlists)
    }
}

impl PlaylistStore for SqlitePlaylistStore {
    fn create_playlist(
        &self,
        name: &str,
        description: Option<&str>,
        creator_name: &str,
        music_ids: &[i64],
    ) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        // Dropping the transaction on any early return rolls everything back:
        // a playlist is never visible without its musics.
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO {} (name, description, creator_name) VALUES (?1, ?2, ?3)",
                PLAYLIST_TABLE_V_0.name
            ),
            params![name, description, creator_name],
        )
        .context("Could not create playlist")?;
        let playlist_id = tx.last_insert_rowid();

        for music_id in music_ids {
            tx.execute(
                &format!(
                    "INSERT INTO {} (playlist_id, music_id) VALUES (?1, ?2)",
                    PLAYLIST_MUSIC_TABLE_V_0.name
                ),
                params![playlist_id, music_id],
            )
            .with_context(|| format!("Could not add music {} to new playlist", music_id))?;
        }

        tx.commit()?;
        Ok(playlist_id)
    }

    fn get_playlist(&self, playlist_id: i64) -> Result<Option<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, description, creator_name FROM {} WHERE id = ?1",
            PLAYLIST_TABLE_V_0.name
        ))?;
        let header = stmt
            .query_row(params![playlist_id], |row| {
                Ok((
                    row.get::<usize, i64>(0)?,
                    row.get::<usize, String>(1)?,
                    row.get::<usize, Option<String>>(2)?,
                    row.get::<usize, String>(3)?,
                ))
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;

        match header {
            None => Ok(None),
            Some((id, name, description, creator_name)) => Ok(Some(Playlist {
                id,
                name,
                description,
                creator_name,
                musics: Self::get_playlist_musics(&conn, id)?,
            })),
        }
    }

    fn playlist_exists(&self, playlist_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE id = ?1",
                PLAYLIST_TABLE_V_0.name
            ),
            params![playlist_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get_creator_playlists(&self, creator_name: &str) -> Result<Vec<Playlist>> {
        self.get_playlists_where("WHERE p.creator_name = ?1", creator_name)
    }

    fn get_followed_playlists(&self, username: &str) -> Result<Vec<Playlist>> {
        self.get_playlists_where(
            &format!(
                "JOIN {} pf ON pf.playlist_id = p.id WHERE pf.username = ?1",
                PLAYLIST_FOLLOWER_TABLE_V_0.name
            ),
            username,
        )
    }

    fn follow_playlist(&self, username: &str, playlist_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (username, playlist_id) VALUES (?1, ?2)",
                PLAYLIST_FOLLOWER_TABLE_V_0.name
            ),
            params![username, playlist_id],
        )
        .with_context(|| format!("{} could not follow playlist {}", username, playlist_id))?;
        Ok(())
    }

    fn is_following(&self, username: &str, playlist_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE username = ?1 AND playlist_id = ?2",
                PLAYLIST_FOLLOWER_TABLE_V_0.name
            ),
            params![username, playlist_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn add_music(&self, playlist_id: i64, music_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (playlist_id, music_id) VALUES (?1, ?2)",
                PLAYLIST_MUSIC_TABLE_V_0.name
            ),
            params![playlist_id, music_id],
        )
        .with_context(|| {
            format!(
                "Could not add music {} to playlist {}",
                music_id, playlist_id
            )
        })?;
        Ok(())
    }

    fn remove_music(&self, playlist_id: i64, music_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE playlist_id = ?1 AND music_id = ?2",
                PLAYLIST_MUSIC_TABLE_V_0.name
            ),
            params![playlist_id, music_id],
        )?;
        Ok(())
    }
}

impl CatalogStore for SqlitePlaylistStore {
    fn user_exists(&self, username: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE name = ?1",
                USER_TABLE_V_0.name
            ),
            params![username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn music_exists(&self, music_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", MUSIC_TABLE_V_0.name),
            params![music_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
