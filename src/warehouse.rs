use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, ffi, params};
use tracing::{debug, warn};

use crate::dimensions::{ObjectiveSpec, Side, StructureSpec, TimeFrame};
use crate::error::{EtlError, Result};
use crate::schema::{self, ETL_META};

/// Where the store lives, parsed from a connection URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
}

impl StoreLocation {
    /// Accepts `sqlite::memory:`, `sqlite://<path>`, `sqlite:<path>` or a
    /// bare path.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(EtlError::config("connection_uri must not be empty"));
        }

        if uri == ":memory:" || uri == "sqlite::memory:" || uri == "sqlite://:memory:" {
            return Ok(StoreLocation::Memory);
        }

        let path = uri
            .strip_prefix("sqlite://")
            .or_else(|| uri.strip_prefix("sqlite:"))
            .unwrap_or(uri);

        if path.is_empty() {
            return Err(EtlError::config(format!("connection_uri '{uri}' has no path")));
        }

        if let Some((scheme, _)) = path.split_once("://") {
            return Err(EtlError::config(format!(
                "unsupported store scheme '{scheme}', only sqlite is available"
            )));
        }

        Ok(StoreLocation::File(PathBuf::from(path)))
    }
}

/// Owned handle on the relational store. The connection closes when the
/// warehouse is dropped.
pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    pub fn open(uri: &str) -> Result<Self> {
        let location = StoreLocation::parse(uri)?;
        schema::ensure_database(&location)?;

        let conn = match &location {
            StoreLocation::Memory => Connection::open_in_memory(),
            StoreLocation::File(path) => Connection::open(path),
        }
        .map_err(|source| EtlError::Connectivity {
            uri: uri.to_string(),
            source,
        })?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|source| EtlError::Connectivity {
                uri: uri.to_string(),
                source,
            })?;

        debug!(?location, "opened store");
        Ok(Self { conn })
    }

    pub fn init_schema(&self) -> Result<()> {
        schema::create_star_schema(&self.conn)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        count_rows(&self.conn, table)
    }
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM \"{table}\"");
    Ok(conn.query_row(&sql, [], |row| row.get(0))?)
}

pub fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn meta_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let sql = format!("SELECT value FROM {ETL_META} WHERE key = ?1");
    Ok(conn
        .query_row(&sql, params![key], |row| row.get(0))
        .optional()?)
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let sql = format!(
        "INSERT INTO {ETL_META} (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value"
    );
    conn.execute(&sql, params![key, value])?;
    Ok(())
}

/// Returns true when a new `dim_game` row was written.
pub fn insert_game(
    conn: &Connection,
    game_id: i64,
    duration: i64,
    created_at: &str,
) -> Result<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO dim_game (game_id, game_duration, game_date, game_type)
             VALUES (?1, ?2, ?3, 'Ranked')",
        )?
        .execute(params![game_id, duration, created_at])?;
    Ok(changed > 0)
}

pub fn insert_time_frame(conn: &Connection, time_frame: &TimeFrame) -> Result<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO dim_time (frame, minute, second, game_phase)
             VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![
            time_frame.frame,
            time_frame.minute,
            time_frame.second,
            time_frame.phase.as_str()
        ])?;
    Ok(changed > 0)
}

/// Writes a team row under a caller-chosen id. Re-writing an identical row is
/// a no-op; an id already held by a different team is a constraint error.
pub fn insert_team(
    conn: &Connection,
    team_id: i64,
    game_id: i64,
    side: Side,
    has_won: bool,
) -> Result<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO dim_team (team_id, game_id, side, has_won)
             VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![team_id, game_id, side.as_str(), has_won])?;
    if changed > 0 {
        return Ok(true);
    }

    let (stored_game, stored_side, stored_won): (i64, String, bool) = conn
        .prepare_cached("SELECT game_id, side, has_won FROM dim_team WHERE team_id = ?1")?
        .query_row(params![team_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;

    if stored_game != game_id || stored_side != side.as_str() || stored_won != has_won {
        return Err(EtlError::Constraint(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_CONSTRAINT_PRIMARYKEY),
            Some(format!(
                "team {team_id} already belongs to game {stored_game} ({stored_side}), \
                 cannot reuse it for game {game_id} ({side})",
                side = side.as_str(),
            )),
        )));
    }

    Ok(false)
}

/// Finds the team keyed by (game, side), creating it when absent.
/// Returns the team id and whether it was created.
pub fn resolve_natural_team(
    conn: &Connection,
    game_id: i64,
    side: Side,
    has_won: bool,
) -> Result<(i64, bool)> {
    let existing: Option<i64> = conn
        .prepare_cached(
            "SELECT team_id FROM dim_team WHERE game_id = ?1 AND side = ?2
             ORDER BY team_id LIMIT 1",
        )?
        .query_row(params![game_id, side.as_str()], |row| row.get(0))
        .optional()?;

    if let Some(team_id) = existing {
        return Ok((team_id, false));
    }

    conn.prepare_cached("INSERT INTO dim_team (game_id, side, has_won) VALUES (?1, ?2, ?3)")?
        .execute(params![game_id, side.as_str(), has_won])?;
    Ok((conn.last_insert_rowid(), true))
}

/// Column layout of a versioned (SCD type 2) dimension.
#[derive(Debug, Clone, Copy)]
pub struct VersionedTable {
    pub table: &'static str,
    pub key: &'static str,
    pub name: &'static str,
    pub attributes: [&'static str; 2],
}

pub const OBJECTIVE_TABLE: VersionedTable = VersionedTable {
    table: "dim_objective",
    key: "objective_tk",
    name: "objective_name",
    attributes: ["category", "type"],
};

pub const STRUCTURE_TABLE: VersionedTable = VersionedTable {
    table: "dim_structure",
    key: "structure_tk",
    name: "structure_name",
    attributes: ["lane", "structure_type"],
};

/// A member of a versioned dimension as the loader wants it to look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub attributes: [String; 2],
}

impl From<&ObjectiveSpec> for Member {
    fn from(spec: &ObjectiveSpec) -> Self {
        Self {
            name: spec.name.to_string(),
            attributes: [spec.category.to_string(), spec.kind.to_string()],
        }
    }
}

impl From<&StructureSpec> for Member {
    fn from(spec: &StructureSpec) -> Self {
        Self {
            name: spec.name.to_string(),
            attributes: [spec.lane.to_string(), spec.structure_type.to_string()],
        }
    }
}

/// The current (open) version of a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentVersion {
    pub key: i64,
    pub version: i64,
    pub attributes: [Option<String>; 2],
}

impl CurrentVersion {
    fn matches(&self, member: &Member) -> bool {
        self.attributes[0].as_deref() == Some(member.attributes[0].as_str())
            && self.attributes[1].as_deref() == Some(member.attributes[1].as_str())
    }
}

/// Result of resolving a member against its current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Existing(i64),
    Created(i64),
    Versioned { key: i64, version: i64 },
}

impl Resolution {
    pub fn key(&self) -> i64 {
        match self {
            Resolution::Existing(key) | Resolution::Created(key) => *key,
            Resolution::Versioned { key, .. } => *key,
        }
    }
}

/// Reads every open version of a dimension, keyed by member name.
pub fn current_versions(
    conn: &Connection,
    table: &VersionedTable,
) -> Result<HashMap<String, CurrentVersion>> {
    let sql = format!(
        "SELECT {name}, {key}, version, {a0}, {a1} FROM {table} WHERE valid_to IS NULL",
        name = table.name,
        key = table.key,
        a0 = table.attributes[0],
        a1 = table.attributes[1],
        table = table.table,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            CurrentVersion {
                key: row.get(1)?,
                version: row.get(2)?,
                attributes: [row.get(3)?, row.get(4)?],
            },
        ))
    })?;

    let mut versions = HashMap::new();
    for row in rows {
        let (name, current) = row?;
        versions.insert(name, current);
    }
    Ok(versions)
}

/// Makes `member` the current version of its name. An unchanged member is
/// reused; a changed one closes the open row and opens `version + 1`.
pub fn resolve_member(
    conn: &Connection,
    table: &VersionedTable,
    member: &Member,
    current: Option<&CurrentVersion>,
    now: &str,
) -> Result<Resolution> {
    match current {
        Some(current) if current.matches(member) => Ok(Resolution::Existing(current.key)),
        Some(current) => {
            let close = format!(
                "UPDATE {table} SET valid_to = ?1 WHERE {key} = ?2",
                table = table.table,
                key = table.key,
            );
            conn.execute(&close, params![now, current.key])?;

            let version = current.version + 1;
            let key = insert_version(conn, table, member, version, now)?;
            warn!(
                table = table.table,
                name = %member.name,
                version,
                "attributes changed, opened new dimension version"
            );
            Ok(Resolution::Versioned { key, version })
        }
        None => {
            let key = insert_version(conn, table, member, 1, now)?;
            debug!(table = table.table, name = %member.name, key, "created dimension member");
            Ok(Resolution::Created(key))
        }
    }
}

fn insert_version(
    conn: &Connection,
    table: &VersionedTable,
    member: &Member,
    version: i64,
    now: &str,
) -> Result<i64> {
    let sql = format!(
        "INSERT INTO {table} ({name}, {a0}, {a1}, version, valid_from, valid_to)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
        table = table.table,
        name = table.name,
        a0 = table.attributes[0],
        a1 = table.attributes[1],
    );
    conn.execute(
        &sql,
        params![
            member.name,
            member.attributes[0],
            member.attributes[1],
            version,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// One `fact_game_event` row, keys already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub game_id: i64,
    pub frame: i64,
    pub team_id: i64,
    pub objective_tk: Option<i64>,
    pub structure_tk: Option<i64>,
    pub gold_diff: i64,
    pub exp_diff: i64,
    pub champ_level_diff: f64,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub wards_placed: i64,
    pub wards_destroyed: i64,
    pub wards_lost: i64,
    pub is_first_tower: bool,
    pub is_first_blood: bool,
    pub event_time: Option<i64>,
}

/// Returns false when a fact with the same (game, frame, team) grain exists.
pub fn insert_fact(conn: &Connection, fact: &FactRow) -> Result<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO fact_game_event (
                game_id, frame, team_id, objective_tk, structure_tk,
                gold_diff, exp_diff, champ_level_diff,
                kills, deaths, assists,
                wards_placed, wards_destroyed, wards_lost,
                is_first_tower, is_first_blood, event_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )?
        .execute(params![
            fact.game_id,
            fact.frame,
            fact.team_id,
            fact.objective_tk,
            fact.structure_tk,
            fact.gold_diff,
            fact.exp_diff,
            fact.champ_level_diff,
            fact.kills,
            fact.deaths,
            fact.assists,
            fact.wards_placed,
            fact.wards_destroyed,
            fact.wards_lost,
            fact.is_first_tower,
            fact.is_first_blood,
            fact.event_time,
        ])?;
    Ok(changed > 0)
}
