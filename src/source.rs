use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::dimensions::{OBJECTIVES, STRUCTURES};
use crate::error::{EtlError, Result};

/// Metric and key columns every source file must carry.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "gameId",
    "gameDuration",
    "hasWon",
    "frame",
    "goldDiff",
    "expDiff",
    "champLevelDiff",
    "isFirstTower",
    "isFirstBlood",
    "kills",
    "deaths",
    "assists",
    "wardsPlaced",
    "wardsDestroyed",
    "wardsLost",
];

/// One row of the ranked-games dataset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRow {
    #[serde(deserialize_with = "int")]
    pub game_id: i64,
    #[serde(deserialize_with = "int")]
    pub game_duration: i64,
    #[serde(deserialize_with = "flag")]
    pub has_won: bool,
    #[serde(deserialize_with = "int")]
    pub frame: i64,
    #[serde(deserialize_with = "int")]
    pub gold_diff: i64,
    #[serde(deserialize_with = "int")]
    pub exp_diff: i64,
    pub champ_level_diff: f64,
    #[serde(deserialize_with = "flag")]
    pub is_first_tower: bool,
    #[serde(deserialize_with = "flag")]
    pub is_first_blood: bool,
    #[serde(deserialize_with = "int")]
    pub kills: i64,
    #[serde(deserialize_with = "int")]
    pub deaths: i64,
    #[serde(deserialize_with = "int")]
    pub assists: i64,
    #[serde(deserialize_with = "int")]
    pub wards_placed: i64,
    #[serde(deserialize_with = "int")]
    pub wards_destroyed: i64,
    #[serde(deserialize_with = "int")]
    pub wards_lost: i64,
    /// Objective and structure counts keyed by source column name. Only
    /// catalog columns present in the file are kept.
    #[serde(skip)]
    pub event_counts: BTreeMap<&'static str, i64>,
}

impl SourceRow {
    pub fn event_count(&self, column: &str) -> i64 {
        self.event_counts.get(column).copied().unwrap_or_default()
    }
}

/// Reads and fully parses the source file. `tracked_columns` must exist in
/// addition to [`REQUIRED_COLUMNS`]. Nothing is returned unless every row
/// parses, so callers can fail before touching the store.
pub fn read_source(path: &Path, tracked_columns: &[&str]) -> Result<Vec<SourceRow>> {
    let file = File::open(path)?;
    read_source_from(file, path, tracked_columns)
}

pub fn read_source_from<R: Read>(
    reader: R,
    label: &Path,
    tracked_columns: &[&str],
) -> Result<Vec<SourceRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let event_columns = check_header(&headers, label, tracked_columns)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row: SourceRow = record
            .deserialize(Some(&headers))
            .map_err(|err| deserialize_error(&headers, &record, err))?;

        for (column, idx) in &event_columns {
            let raw = record.get(*idx).unwrap_or_default();
            let count = parse_int(raw).ok_or_else(|| EtlError::SourceFormat {
                line: line_of(&record),
                column: column.to_string(),
                message: format!("'{raw}' is not an integer"),
            })?;
            row.event_counts.insert(*column, count);
        }

        rows.push(row);
    }

    Ok(rows)
}

/// Fails on the first missing required or tracked column and returns the
/// positions of the catalog count columns present in the file.
fn check_header(
    headers: &StringRecord,
    label: &Path,
    tracked_columns: &[&str],
) -> Result<Vec<(&'static str, usize)>> {
    let by_name: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name, idx))
        .collect();

    for column in REQUIRED_COLUMNS.iter().chain(tracked_columns) {
        if !by_name.contains_key(column) {
            return Err(EtlError::MissingColumn {
                path: label.to_path_buf(),
                column: column.to_string(),
            });
        }
    }

    Ok(OBJECTIVES
        .iter()
        .map(|spec| spec.column)
        .chain(STRUCTURES.iter().map(|spec| spec.column))
        .filter_map(|column| by_name.get(column).map(|idx| (column, *idx)))
        .collect())
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|pos| pos.line()).unwrap_or_default()
}

fn deserialize_error(headers: &StringRecord, record: &StringRecord, err: csv::Error) -> EtlError {
    match err.kind() {
        csv::ErrorKind::Deserialize { err: inner, .. } => EtlError::SourceFormat {
            line: line_of(record),
            column: inner
                .field()
                .and_then(|idx| headers.get(idx as usize))
                .unwrap_or_default()
                .to_string(),
            message: inner.kind().to_string(),
        },
        _ => EtlError::Csv(err),
    }
}

fn int<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_int(&raw).ok_or_else(|| de::Error::custom(format!("'{raw}' is not an integer")))
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_flag(&raw).ok_or_else(|| de::Error::custom(format!("'{raw}' is not a boolean")))
}

/// Integers may be written with a trailing `.0` by dataframe exporters.
fn parse_int(raw: &str) -> Option<i64> {
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }

    let value = raw.parse::<f64>().ok()?;
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range.
    let in_range = (i64::MIN as f64..i64::MAX as f64).contains(&value);
    if in_range && value.fract() == 0.0 {
        Some(value as i64)
    } else {
        None
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "1" | "1.0" | "true" | "True" | "TRUE" => Some(true),
        "0" | "0.0" | "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}
