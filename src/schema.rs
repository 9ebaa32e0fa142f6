//! Star-schema creation: four dimensions around `fact_game_event`.

use std::fs;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::Result;
use crate::warehouse::StoreLocation;

pub const DIM_GAME: &str = "dim_game";
pub const DIM_TIME: &str = "dim_time";
pub const DIM_TEAM: &str = "dim_team";
pub const DIM_OBJECTIVE: &str = "dim_objective";
pub const DIM_STRUCTURE: &str = "dim_structure";
pub const FACT_GAME_EVENT: &str = "fact_game_event";
pub const ETL_META: &str = "etl_meta";

const STAR_SCHEMA: &[(&str, &str)] = &[
    (
        DIM_GAME,
        "CREATE TABLE IF NOT EXISTS dim_game (
            game_id INTEGER PRIMARY KEY,
            game_duration INTEGER,
            game_date TEXT DEFAULT CURRENT_TIMESTAMP,
            game_type TEXT DEFAULT 'Ranked'
        )",
    ),
    (
        DIM_TIME,
        "CREATE TABLE IF NOT EXISTS dim_time (
            time_id INTEGER PRIMARY KEY AUTOINCREMENT,
            frame INTEGER NOT NULL UNIQUE,
            minute INTEGER,
            second INTEGER,
            game_phase TEXT
        )",
    ),
    (
        DIM_TEAM,
        "CREATE TABLE IF NOT EXISTS dim_team (
            team_id INTEGER PRIMARY KEY,
            game_id INTEGER REFERENCES dim_game(game_id),
            side TEXT,
            has_won INTEGER
        )",
    ),
    (
        DIM_OBJECTIVE,
        "CREATE TABLE IF NOT EXISTS dim_objective (
            objective_tk INTEGER PRIMARY KEY AUTOINCREMENT,
            objective_name TEXT NOT NULL,
            category TEXT,
            type TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            valid_from TEXT DEFAULT CURRENT_TIMESTAMP,
            valid_to TEXT,
            UNIQUE (objective_name, version)
        )",
    ),
    (
        DIM_STRUCTURE,
        "CREATE TABLE IF NOT EXISTS dim_structure (
            structure_tk INTEGER PRIMARY KEY AUTOINCREMENT,
            structure_name TEXT NOT NULL,
            lane TEXT,
            structure_type TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            valid_from TEXT DEFAULT CURRENT_TIMESTAMP,
            valid_to TEXT,
            UNIQUE (structure_name, version)
        )",
    ),
    (
        FACT_GAME_EVENT,
        "CREATE TABLE IF NOT EXISTS fact_game_event (
            fact_tk INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL REFERENCES dim_game(game_id),
            frame INTEGER NOT NULL REFERENCES dim_time(frame),
            team_id INTEGER NOT NULL REFERENCES dim_team(team_id),
            objective_tk INTEGER REFERENCES dim_objective(objective_tk),
            structure_tk INTEGER REFERENCES dim_structure(structure_tk),
            gold_diff INTEGER,
            exp_diff INTEGER,
            champ_level_diff REAL,
            kills INTEGER,
            deaths INTEGER,
            assists INTEGER,
            wards_placed INTEGER,
            wards_destroyed INTEGER,
            wards_lost INTEGER,
            is_first_tower INTEGER,
            is_first_blood INTEGER,
            event_time INTEGER
        )",
    ),
    (
        ETL_META,
        "CREATE TABLE IF NOT EXISTS etl_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
    ),
];

const STAR_INDEXES: &[&str] = &[
    // One current version per name; closed versions keep their valid_to.
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_dim_objective_current
        ON dim_objective(objective_name) WHERE valid_to IS NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_dim_structure_current
        ON dim_structure(structure_name) WHERE valid_to IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_dim_team_game_side ON dim_team(game_id, side)",
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_fact_game_event_grain
        ON fact_game_event(game_id, frame, team_id)",
];

/// Tables making up the dimensional model, dimensions first.
pub fn table_names() -> [&'static str; 6] {
    [
        DIM_GAME,
        DIM_TIME,
        DIM_TEAM,
        DIM_OBJECTIVE,
        DIM_STRUCTURE,
        FACT_GAME_EVENT,
    ]
}

/// Creates the database container when it does not exist yet. For a file
/// store that means its parent directories; SQLite creates the file itself
/// on first open.
pub fn ensure_database(location: &StoreLocation) -> Result<()> {
    if let StoreLocation::File(path) = location {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!(dir = %parent.display(), "created database directory");
            }
        }
    }

    Ok(())
}

/// Idempotently creates the star schema. Existing tables are left untouched.
pub fn create_star_schema(conn: &Connection) -> Result<()> {
    for (table, ddl) in STAR_SCHEMA {
        conn.execute(ddl, [])?;
        debug!(table, "ensured table");
    }

    for ddl in STAR_INDEXES {
        conn.execute(ddl, [])?;
    }

    info!("dimensional model ready");
    Ok(())
}

pub fn existing_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(names
        .into_iter()
        .filter(|name| !name.starts_with("sqlite_"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_all_model_tables() {
        let conn = Connection::open_in_memory().unwrap();
        create_star_schema(&conn).unwrap();

        let tables = existing_tables(&conn).unwrap();
        for name in table_names() {
            assert!(tables.iter().any(|t| t == name), "missing {name}");
        }
        assert!(tables.iter().any(|t| t == ETL_META));
    }

    #[test]
    fn rerunning_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_star_schema(&conn).unwrap();
        conn.execute("INSERT INTO dim_game (game_id, game_duration) VALUES (1, 1200)", [])
            .unwrap();

        create_star_schema(&conn).unwrap();

        let objects: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'dim_game'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let games: i64 = conn
            .query_row("SELECT COUNT(*) FROM dim_game", [], |row| row.get(0))
            .unwrap();
        let game_type: String = conn
            .query_row("SELECT game_type FROM dim_game", [], |row| row.get(0))
            .unwrap();

        assert_eq!(objects, 1);
        assert_eq!(games, 1);
        assert_eq!(game_type, "Ranked");
    }

    #[test]
    fn frame_is_unique_in_time_dimension() {
        let conn = Connection::open_in_memory().unwrap();
        create_star_schema(&conn).unwrap();
        conn.execute("INSERT INTO dim_time (frame) VALUES (60)", []).unwrap();

        assert!(conn.execute("INSERT INTO dim_time (frame) VALUES (60)", []).is_err());
    }

    #[test]
    fn only_one_current_objective_version() {
        let conn = Connection::open_in_memory().unwrap();
        create_star_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO dim_objective (objective_name, version) VALUES ('FireDrake', 1)",
            [],
        )
        .unwrap();

        assert!(conn
            .execute(
                "INSERT INTO dim_objective (objective_name, version) VALUES ('FireDrake', 2)",
                [],
            )
            .is_err());

        conn.execute(
            "UPDATE dim_objective SET valid_to = CURRENT_TIMESTAMP
             WHERE objective_name = 'FireDrake'",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO dim_objective (objective_name, version) VALUES ('FireDrake', 2)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn ensure_database_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lol.db");

        ensure_database(&StoreLocation::File(path.clone())).unwrap();
        assert!(path.parent().unwrap().is_dir());

        ensure_database(&StoreLocation::Memory).unwrap();
    }
}
