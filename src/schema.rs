use log::warn;
use rusqlite::Connection;

use crate::error::MigrateError;

pub const PLAYER_TABLE: &str = "player";
pub const PLAYER_NEW_TABLE: &str = "player_new";

/// Columns of the `player` table, in declaration order. Both the source and
/// the rebuilt table must carry exactly these.
pub const PLAYER_COLUMNS: [&str; 18] = [
    "username",
    "game",
    "multiplayer_name",
    "icon",
    "deck",
    "deck_rank",
    "landscapes",
    "helper_creature",
    "leader",
    "leader_level",
    "allyboxspace",
    "level",
    "friends",
    "friend_requests",
    "last_online",
    "helpcount",
    "anonymoushelpcount",
    "devicename",
];

/// Free-text columns that lose their length bound.
pub const WIDENED_COLUMNS: [&str; 3] = ["game", "friends", "friend_requests"];

pub const CREATE_PLAYER_NEW_SQL: &str = r#"
CREATE TABLE player_new (
    username VARCHAR(80) NOT NULL,
    game TEXT,
    multiplayer_name VARCHAR(128),
    icon VARCHAR(128),
    deck VARCHAR(1024),
    deck_rank VARCHAR(16),
    landscapes VARCHAR(1024),
    helper_creature VARCHAR(1024),
    leader VARCHAR(128),
    leader_level INTEGER,
    allyboxspace INTEGER,
    level INTEGER,
    friends TEXT,
    friend_requests TEXT,
    last_online INTEGER,
    helpcount INTEGER,
    anonymoushelpcount INTEGER,
    devicename VARCHAR(128),
    PRIMARY KEY (username),
    UNIQUE (username)
);
"#;

pub const COPY_PLAYER_ROWS_SQL: &str = r#"
INSERT INTO player_new (
    username, game, multiplayer_name, icon, deck, deck_rank,
    landscapes, helper_creature, leader, leader_level, allyboxspace,
    level, friends, friend_requests, last_online, helpcount,
    anonymoushelpcount, devicename
)
SELECT
    username, game, multiplayer_name, icon, deck, deck_rank,
    landscapes, helper_creature, leader, leader_level, allyboxspace,
    level, friends, friend_requests, last_online, helpcount,
    anonymoushelpcount, devicename
FROM player;
"#;

pub const DROP_PLAYER_SQL: &str = "DROP TABLE player;";

pub const RENAME_PLAYER_NEW_SQL: &str = "ALTER TABLE player_new RENAME TO player;";

/// A column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
}

impl ColumnInfo {
    /// True for an unbounded text affinity declaration (`TEXT`, `CLOB`).
    pub fn is_unbounded_text(&self) -> bool {
        let t = self.decl_type.trim().to_ascii_uppercase();
        t == "TEXT" || t == "CLOB"
    }
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type='table' AND name = ?",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")?;
    let rows = stmt.query_map([table], |row| {
        Ok(ColumnInfo {
            name: row.get(0)?,
            decl_type: row.get(1)?,
        })
    })?;
    rows.collect()
}

pub fn row_count(conn: &Connection, table: &str) -> Result<i64, rusqlite::Error> {
    // Table names come from the constants above, never from user input
    conn.query_row(&format!("SELECT count(*) FROM \"{}\"", table), [], |row| {
        row.get(0)
    })
}

/// SQL of explicitly created indexes on `table`. Automatic indexes backing
/// PRIMARY KEY / UNIQUE constraints have NULL sql and are skipped.
pub fn index_definitions(conn: &Connection, table: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master
         WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL
         ORDER BY name",
    )?;
    let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;
    rows.collect()
}

/// SQL of triggers attached to `table`. They are dropped along with it.
pub fn trigger_definitions(conn: &Connection, table: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master
         WHERE type = 'trigger' AND tbl_name = ? AND sql IS NOT NULL
         ORDER BY name",
    )?;
    let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;
    rows.collect()
}

/// Checks that `player` exists, has exactly the expected columns in order,
/// and still needs widening.
pub fn validate_source(conn: &Connection) -> Result<Vec<ColumnInfo>, MigrateError> {
    if !table_exists(conn, PLAYER_TABLE)? {
        return Err(MigrateError::MissingTable(PLAYER_TABLE.to_owned()));
    }

    let columns = table_columns(conn, PLAYER_TABLE)?;
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

    if names != PLAYER_COLUMNS {
        let missing: Vec<String> = PLAYER_COLUMNS
            .iter()
            .filter(|expected| !names.contains(*expected))
            .map(|s| s.to_string())
            .collect();
        // Columns outside the fixed list would be lost by the copy, so they
        // are rejected here rather than silently dropped.
        let unexpected: Vec<String> = names
            .iter()
            .filter(|found| !PLAYER_COLUMNS.contains(*found))
            .map(|s| s.to_string())
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            return Err(MigrateError::ColumnOrderMismatch {
                expected: PLAYER_COLUMNS.iter().map(|s| s.to_string()).collect(),
                found: names.iter().map(|s| s.to_string()).collect(),
            });
        }

        if !unexpected.is_empty() {
            warn!(
                "Table '{}' has columns that are not part of the migrated schema: {}",
                PLAYER_TABLE,
                unexpected.join(", ")
            );
        }

        return Err(MigrateError::SchemaMismatch {
            missing,
            unexpected,
        });
    }

    let already_widened = columns
        .iter()
        .filter(|c| WIDENED_COLUMNS.contains(&c.name.as_str()))
        .all(ColumnInfo::is_unbounded_text);

    if already_widened {
        return Err(MigrateError::AlreadyMigrated(PLAYER_TABLE.to_owned()));
    }

    Ok(columns)
}
