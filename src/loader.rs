//! Row-wise star-schema loader.
//!
//! Every source row resolves its Game, TimeFrame and Team keys, optionally
//! links the tracked objective and structure, and appends one fact row.
//! Rows are committed in batches; each batch is a single transaction, so a
//! failure leaves only whole batches behind.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{EtlConfig, TeamKey};
use crate::dimensions::{
    ObjectiveSpec, Side, StructureSpec, TimeFrame, objective_for_column, positional_team_id,
    structure_for_column,
};
use crate::error::{EtlError, Result};
use crate::source::{SourceRow, read_source};
use crate::warehouse::{
    self, CurrentVersion, FactRow, Member, OBJECTIVE_TABLE, Resolution, STRUCTURE_TABLE,
    VersionedTable, Warehouse,
};

const TEAM_KEY_META: &str = "team_key";

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub team_key: TeamKey,
    pub objective: &'static ObjectiveSpec,
    pub structure: &'static StructureSpec,
}

impl LoadOptions {
    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        let objective = objective_for_column(&config.objective_column).ok_or_else(|| {
            EtlError::config(format!("unknown objective column '{}'", config.objective_column))
        })?;
        let structure = structure_for_column(&config.structure_column).ok_or_else(|| {
            EtlError::config(format!("unknown structure column '{}'", config.structure_column))
        })?;

        Ok(Self {
            batch_size: config.batch_size,
            team_key: config.team_key,
            objective,
            structure,
        })
    }

    pub fn tracked_columns(&self) -> [&'static str; 2] {
        [self.objective.column, self.structure.column]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub rows_read: usize,
    pub batches_committed: usize,
    pub games_created: usize,
    pub frames_created: usize,
    pub teams_created: usize,
    pub objectives_created: usize,
    pub structures_created: usize,
    pub facts_inserted: usize,
    pub facts_skipped: usize,
}

/// Keys already resolved during this run. Versioned members start from the
/// store's current rows so only genuinely new names are inserted.
struct DimensionCache {
    games: HashSet<i64>,
    frames: HashSet<i64>,
    natural_teams: HashMap<(i64, Side), i64>,
    objectives: VersionedCache,
    structures: VersionedCache,
}

struct VersionedCache {
    table: VersionedTable,
    current: HashMap<String, CurrentVersion>,
    resolved: HashMap<String, i64>,
}

impl VersionedCache {
    fn load(conn: &Connection, table: VersionedTable) -> Result<Self> {
        Ok(Self {
            current: warehouse::current_versions(conn, &table)?,
            table,
            resolved: HashMap::new(),
        })
    }

    /// Returns the member key and whether a row was written for it.
    fn key_for(&mut self, conn: &Connection, member: &Member, now: &str) -> Result<(i64, bool)> {
        if let Some(key) = self.resolved.get(&member.name) {
            return Ok((*key, false));
        }

        let resolution = warehouse::resolve_member(
            conn,
            &self.table,
            member,
            self.current.get(&member.name),
            now,
        )?;
        self.resolved.insert(member.name.clone(), resolution.key());

        Ok((resolution.key(), !matches!(resolution, Resolution::Existing(_))))
    }
}

/// Reads the source file, then loads it. Source errors surface before the
/// store is touched.
pub fn load_source(
    warehouse: &mut Warehouse,
    path: &Path,
    options: &LoadOptions,
) -> Result<LoadReport> {
    let rows = read_source(path, &options.tracked_columns())?;
    info!(rows = rows.len(), path = %path.display(), "source parsed");
    load(warehouse, &rows, options)
}

pub fn load(
    warehouse: &mut Warehouse,
    rows: &[SourceRow],
    options: &LoadOptions,
) -> Result<LoadReport> {
    if options.batch_size == 0 {
        return Err(EtlError::config("batch_size must be greater than zero"));
    }

    check_team_key(warehouse.connection(), options.team_key)?;

    let mut cache = DimensionCache {
        games: HashSet::new(),
        frames: HashSet::new(),
        natural_teams: HashMap::new(),
        objectives: VersionedCache::load(warehouse.connection(), OBJECTIVE_TABLE)?,
        structures: VersionedCache::load(warehouse.connection(), STRUCTURE_TABLE)?,
    };

    let mut report = LoadReport {
        rows_read: rows.len(),
        ..LoadReport::default()
    };
    let mut rows_committed = 0usize;
    let now = warehouse::now_timestamp();

    for (batch_idx, batch) in rows.chunks(options.batch_size).enumerate() {
        let first_position = batch_idx * options.batch_size;

        let outcome = (|| -> Result<()> {
            let tx = warehouse.connection_mut().transaction()?;
            for (offset, row) in batch.iter().enumerate() {
                let position = first_position + offset;
                load_row(&tx, position, row, options, &mut cache, &mut report, &now)?;
            }
            tx.commit()?;
            Ok(())
        })();

        if let Err(source) = outcome {
            return Err(EtlError::PartialBatch {
                rows_committed,
                source: Box::new(source),
            });
        }

        rows_committed += batch.len();
        report.batches_committed += 1;
        info!(batch = batch_idx + 1, rows_committed, "committed batch");
    }

    info!(
        rows = report.rows_read,
        batches = report.batches_committed,
        facts = report.facts_inserted,
        skipped = report.facts_skipped,
        "star load complete"
    );
    Ok(report)
}

fn check_team_key(conn: &Connection, team_key: TeamKey) -> Result<()> {
    match warehouse::meta_value(conn, TEAM_KEY_META)? {
        Some(stored) if stored != team_key.as_str() => Err(EtlError::config(format!(
            "store was loaded with team_key '{stored}', refusing to load with '{}'",
            team_key.as_str()
        ))),
        Some(_) => Ok(()),
        None => warehouse::set_meta(conn, TEAM_KEY_META, team_key.as_str()),
    }
}

fn load_row(
    conn: &Connection,
    position: usize,
    row: &SourceRow,
    options: &LoadOptions,
    cache: &mut DimensionCache,
    report: &mut LoadReport,
    now: &str,
) -> Result<()> {
    if cache.games.insert(row.game_id)
        && warehouse::insert_game(conn, row.game_id, row.game_duration, now)?
    {
        report.games_created += 1;
    }

    if cache.frames.insert(row.frame)
        && warehouse::insert_time_frame(conn, &TimeFrame::from_frame(row.frame))?
    {
        report.frames_created += 1;
    }

    let positional_id = positional_team_id(position);
    let side = Side::from_team_id(positional_id);
    let team_id = match options.team_key {
        TeamKey::Positional => {
            if warehouse::insert_team(conn, positional_id, row.game_id, side, row.has_won)? {
                report.teams_created += 1;
            }
            positional_id
        }
        TeamKey::Natural => match cache.natural_teams.get(&(row.game_id, side)) {
            Some(team_id) => *team_id,
            None => {
                let (team_id, created) =
                    warehouse::resolve_natural_team(conn, row.game_id, side, row.has_won)?;
                if created {
                    report.teams_created += 1;
                }
                cache.natural_teams.insert((row.game_id, side), team_id);
                team_id
            }
        },
    };

    let objective_tk = if row.event_count(options.objective.column) > 0 {
        let (key, written) = cache
            .objectives
            .key_for(conn, &Member::from(options.objective), now)?;
        if written {
            report.objectives_created += 1;
        }
        Some(key)
    } else {
        None
    };

    let structure_tk = if row.event_count(options.structure.column) > 0 {
        let (key, written) = cache
            .structures
            .key_for(conn, &Member::from(options.structure), now)?;
        if written {
            report.structures_created += 1;
        }
        Some(key)
    } else {
        None
    };

    let fact = FactRow {
        game_id: row.game_id,
        frame: row.frame,
        team_id,
        objective_tk,
        structure_tk,
        gold_diff: row.gold_diff,
        exp_diff: row.exp_diff,
        champ_level_diff: row.champ_level_diff,
        kills: row.kills,
        deaths: row.deaths,
        assists: row.assists,
        wards_placed: row.wards_placed,
        wards_destroyed: row.wards_destroyed,
        wards_lost: row.wards_lost,
        is_first_tower: row.is_first_tower,
        is_first_blood: row.is_first_blood,
        event_time: Some(row.frame),
    };

    if warehouse::insert_fact(conn, &fact)? {
        report.facts_inserted += 1;
    } else {
        report.facts_skipped += 1;
        debug!(game_id = row.game_id, frame = row.frame, team_id, "fact already present");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn source_row(game_id: i64, frame: i64, fire_drakes: i64, top_inhibitors: i64) -> SourceRow {
        let mut event_counts = BTreeMap::new();
        event_counts.insert("killedFireDrake", fire_drakes);
        event_counts.insert("destroyedTopInhibitor", top_inhibitors);

        SourceRow {
            game_id,
            game_duration: 1800,
            has_won: game_id % 2 == 0,
            frame,
            gold_diff: 250,
            exp_diff: -40,
            champ_level_diff: 0.4,
            is_first_tower: false,
            is_first_blood: true,
            kills: 3,
            deaths: 1,
            assists: 4,
            wards_placed: 10,
            wards_destroyed: 2,
            wards_lost: 1,
            event_counts,
        }
    }

    fn options(batch_size: usize, team_key: TeamKey) -> LoadOptions {
        let config = EtlConfig {
            batch_size,
            team_key,
            ..EtlConfig::default()
        };
        LoadOptions::from_config(&config).unwrap()
    }

    fn warehouse() -> Warehouse {
        let warehouse = Warehouse::open("sqlite::memory:").unwrap();
        warehouse.init_schema().unwrap();
        warehouse
    }

    /// `count` rows spread over games of ten frames each.
    fn rows(count: usize) -> Vec<SourceRow> {
        (0..count)
            .map(|i| source_row(1000 + (i / 10) as i64, ((i % 10) * 60) as i64, 0, 0))
            .collect()
    }

    #[test]
    fn fire_drake_row_links_objective_only() {
        let mut warehouse = warehouse();
        let rows = vec![source_row(1, 600, 1, 0)];

        load(&mut warehouse, &rows, &options(100, TeamKey::Positional)).unwrap();

        let (objective_tk, structure_tk): (Option<i64>, Option<i64>) = warehouse
            .connection()
            .query_row(
                "SELECT objective_tk, structure_tk FROM fact_game_event",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(structure_tk.is_none());

        let name: String = warehouse
            .connection()
            .query_row(
                "SELECT objective_name FROM dim_objective WHERE objective_tk = ?1",
                [objective_tk.unwrap()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "FireDrake");
    }

    #[test]
    fn team_ids_follow_row_position() {
        let mut warehouse = warehouse();
        load(&mut warehouse, &rows(5), &options(100, TeamKey::Positional)).unwrap();

        let (team_id, side): (i64, String) = warehouse
            .connection()
            .query_row(
                "SELECT t.team_id, t.side FROM fact_game_event f
                 JOIN dim_team t ON t.team_id = f.team_id
                 WHERE f.frame = 180",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();

        assert_eq!(team_id, 4);
        assert_eq!(side, "Blue");
        assert_eq!(warehouse.count_rows("dim_team").unwrap(), 5);
    }

    #[test]
    fn commits_once_per_full_batch_and_once_for_the_tail() {
        for (count, batches) in [(0, 0), (1, 1), (100, 1), (101, 2), (250, 3)] {
            let mut warehouse = warehouse();
            let report =
                load(&mut warehouse, &rows(count), &options(100, TeamKey::Positional)).unwrap();
            assert_eq!(report.batches_committed, batches, "{count} rows");
            assert_eq!(report.facts_inserted, count);
        }
    }

    #[test]
    fn games_and_frames_are_deduplicated() {
        let mut warehouse = warehouse();
        let report = load(&mut warehouse, &rows(25), &options(10, TeamKey::Positional)).unwrap();

        assert_eq!(report.games_created, 3);
        assert_eq!(report.frames_created, 10);
        assert_eq!(warehouse.count_rows("dim_game").unwrap(), 3);
        assert_eq!(warehouse.count_rows("dim_time").unwrap(), 10);
        assert_eq!(warehouse.count_rows("fact_game_event").unwrap(), 25);
    }

    #[test]
    fn rerunning_the_same_source_adds_nothing() {
        let mut warehouse = warehouse();
        let rows = rows(30);
        let options = options(7, TeamKey::Positional);

        load(&mut warehouse, &rows, &options).unwrap();
        let second = load(&mut warehouse, &rows, &options).unwrap();

        assert_eq!(second.games_created, 0);
        assert_eq!(second.frames_created, 0);
        assert_eq!(second.teams_created, 0);
        assert_eq!(second.facts_inserted, 0);
        assert_eq!(second.facts_skipped, 30);
        assert_eq!(warehouse.count_rows("dim_team").unwrap(), 30);
        assert_eq!(warehouse.count_rows("fact_game_event").unwrap(), 30);
    }

    #[test]
    fn objectives_and_structures_are_created_once_per_name() {
        let mut warehouse = warehouse();
        let rows: Vec<SourceRow> = (0..40)
            .map(|i| source_row(5 + i / 10, (i % 10) * 60, 1, i % 2))
            .collect();

        let report = load(&mut warehouse, &rows, &options(8, TeamKey::Positional)).unwrap();
        assert_eq!(report.objectives_created, 1);
        assert_eq!(report.structures_created, 1);

        let second = load(&mut warehouse, &rows, &options(8, TeamKey::Positional)).unwrap();
        assert_eq!(second.objectives_created, 0);
        assert_eq!(second.structures_created, 0);

        assert_eq!(warehouse.count_rows("dim_objective").unwrap(), 1);
        assert_eq!(warehouse.count_rows("dim_structure").unwrap(), 1);

        let linked: i64 = warehouse
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM fact_game_event WHERE structure_tk IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(linked, 20);
    }

    #[test]
    fn natural_teams_dedupe_by_game_and_side() {
        let mut warehouse = warehouse();
        let rows = rows(20);

        let report = load(&mut warehouse, &rows, &options(100, TeamKey::Natural)).unwrap();
        assert_eq!(report.teams_created, 4);
        assert_eq!(report.facts_inserted, 20);

        let second = load(&mut warehouse, &rows, &options(100, TeamKey::Natural)).unwrap();
        assert_eq!(second.teams_created, 0);
        assert_eq!(second.facts_inserted, 0);
        assert_eq!(warehouse.count_rows("dim_team").unwrap(), 4);
    }

    #[test]
    fn switching_team_key_on_a_loaded_store_is_rejected() {
        let mut warehouse = warehouse();
        load(&mut warehouse, &rows(3), &options(100, TeamKey::Positional)).unwrap();

        let err = load(&mut warehouse, &rows(3), &options(100, TeamKey::Natural)).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn failing_batch_is_rolled_back_whole() {
        let mut warehouse = warehouse();
        warehouse
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_frame BEFORE INSERT ON fact_game_event
                 WHEN NEW.frame = 999
                 BEGIN SELECT RAISE(ABORT, 'rejected frame'); END;",
            )
            .unwrap();

        let mut rows = rows(5);
        rows[3].frame = 999;

        let err = load(&mut warehouse, &rows, &options(2, TeamKey::Positional)).unwrap_err();
        match err {
            EtlError::PartialBatch { rows_committed, source } => {
                assert_eq!(rows_committed, 2);
                assert!(matches!(*source, EtlError::Constraint(_)));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(warehouse.count_rows("fact_game_event").unwrap(), 2);
        assert_eq!(warehouse.count_rows("dim_team").unwrap(), 2);
        assert_eq!(warehouse.count_rows("dim_time").unwrap(), 2);
    }

    #[test]
    fn positional_load_of_a_different_game_is_rejected() {
        let mut warehouse = warehouse();
        let options = options(100, TeamKey::Positional);
        load(&mut warehouse, &[source_row(1, 60, 0, 0)], &options).unwrap();

        let err = load(&mut warehouse, &[source_row(2, 60, 0, 0)], &options).unwrap_err();
        match err {
            EtlError::PartialBatch { rows_committed, source } => {
                assert_eq!(rows_committed, 0);
                assert!(matches!(*source, EtlError::Constraint(_)));
            }
            other => panic!("unexpected error: {other}"),
        }

        let game_id: i64 = warehouse
            .connection()
            .query_row("SELECT game_id FROM fact_game_event", [], |row| row.get(0))
            .unwrap();
        assert_eq!(game_id, 1);
        assert_eq!(warehouse.count_rows("dim_game").unwrap(), 1);
        assert_eq!(warehouse.count_rows("fact_game_event").unwrap(), 1);
    }

    #[test]
    fn changed_catalog_attributes_open_a_new_version() {
        let mut warehouse = warehouse();
        warehouse
            .connection()
            .execute(
                "INSERT INTO dim_objective (objective_name, category, type, version)
                 VALUES ('FireDrake', 'Drake', 'Infernal', 1)",
                [],
            )
            .unwrap();

        let rows = [source_row(1, 60, 2, 0)];
        let report = load(&mut warehouse, &rows, &options(100, TeamKey::Positional)).unwrap();
        assert_eq!(report.objectives_created, 1);

        let (version, category, open_rows): (i64, String, i64) = warehouse
            .connection()
            .query_row(
                "SELECT version, category,
                        (SELECT COUNT(*) FROM dim_objective WHERE valid_to IS NULL)
                 FROM dim_objective WHERE valid_to IS NULL",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!((version, category.as_str(), open_rows), (2, "Dragon", 1));
        assert_eq!(warehouse.count_rows("dim_objective").unwrap(), 2);
    }

    #[test]
    fn load_source_fails_before_writing_on_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "gameId,frame\n1,60\n").unwrap();

        let mut warehouse = warehouse();
        let options = options(100, TeamKey::Positional);
        let err = load_source(&mut warehouse, &path, &options).unwrap_err();

        assert!(matches!(err, EtlError::MissingColumn { .. }));
        assert_eq!(warehouse.count_rows("fact_game_event").unwrap(), 0);
        let team_key = warehouse::meta_value(warehouse.connection(), TEAM_KEY_META).unwrap();
        assert_eq!(team_key, None);
    }
}
