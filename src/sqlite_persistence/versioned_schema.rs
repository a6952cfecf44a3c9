use anyhow::Result;
use rusqlite::Connection;

/// Offset applied to `PRAGMA user_version` so that an unrelated SQLite file
/// (which defaults to version 0) is never mistaken for one of our databases.
pub const BASE_DB_VERSION: usize = 310;

pub struct Table {
    pub name: &'static str,
    pub schema: &'static str,
    pub indices: &'static [&'static str],
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub create: fn(&Connection, &VersionedSchema) -> Result<()>,
    pub migration: Option<fn(&Connection) -> Result<()>>,
    pub validate: fn(&Connection) -> Result<()>,
}
