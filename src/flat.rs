//! Flat (non-dimensional) load: five column projections of the source file
//! appended to plain tables.

use std::path::Path;

use polars::prelude::*;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;
use tracing::info;

use crate::error::{EtlError, Result};
use crate::warehouse::Warehouse;

const CHUNK_SIZE: usize = 1000;

const GAMESTATE_COLUMNS: &[&str] = &[
    "gameId",
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

const OBJECTIVESTATUS_COLUMNS: &[&str] = &[
    "gameId",
    "frame",
    "killedFireDrake",
    "killedWaterDrake",
    "killedAirDrake",
    "killedEarthDrake",
    "killedElderDrake",
    "lostFireDrake",
    "lostWaterDrake",
    "lostAirDrake",
    "lostEarthDrake",
    "lostElderDrake",
    "killedBaronNashor",
    "lostBaronNashor",
    "killedRiftHerald",
    "lostRiftHerald",
];

/// Columns matching the structure pattern that describe something else.
const NON_STRUCTURE_COLUMNS: &[&str] = &[
    "lostFireDrake",
    "lostWaterDrake",
    "lostAirDrake",
    "lostEarthDrake",
    "lostElderDrake",
    "lostBaronNashor",
    "lostRiftHerald",
    "wardsLost",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatTable {
    pub name: &'static str,
    pub columns: Vec<String>,
    pub dedupe: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatTableReport {
    pub table: String,
    pub rows_appended: usize,
}

/// Projections for the given source header. Fails when a fixed column is
/// absent.
pub fn flat_tables(source: &Path, available: &[&str]) -> Result<Vec<FlatTable>> {
    let fixed = |name: &'static str, columns: &[&'static str], dedupe: bool| -> Result<FlatTable> {
        for column in columns {
            if !available.contains(column) {
                return Err(EtlError::MissingColumn {
                    path: source.to_path_buf(),
                    column: column.to_string(),
                });
            }
        }
        Ok(FlatTable {
            name,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            dedupe,
        })
    };

    let mut structure_columns = vec!["gameId".to_string(), "frame".to_string()];
    structure_columns.extend(
        available
            .iter()
            .filter(|column| {
                let lower = column.to_lowercase();
                (lower.contains("destroyed") || lower.contains("lost"))
                    && !NON_STRUCTURE_COLUMNS.iter().any(|skip| *skip == **column)
            })
            .map(|column| column.to_string()),
    );

    Ok(vec![
        fixed("game", &["gameId", "gameDuration"], true)?,
        fixed("gamestate", GAMESTATE_COLUMNS, false)?,
        fixed("objectivestatus", OBJECTIVESTATUS_COLUMNS, false)?,
        fixed("structurestatus", &["gameId", "frame"], false).map(|table| FlatTable {
            columns: structure_columns,
            ..table
        })?,
        fixed("teamresult", &["gameId", "hasWon"], true)?,
    ])
}

pub fn load_flat(warehouse: &mut Warehouse, source: &Path) -> Result<Vec<FlatTableReport>> {
    let df = LazyCsvReader::new(source)
        .with_has_header(true)
        .finish()?
        .collect()?;
    info!(rows = df.height(), columns = df.width(), "source scanned");

    let available = df.get_column_names();
    let tables = flat_tables(source, &available)?;

    let mut reports = Vec::with_capacity(tables.len());
    for table in &tables {
        let selection: Vec<Expr> = table.columns.iter().map(|c| col(c)).collect();
        let mut projected = df.clone().lazy().select(selection);
        if table.dedupe {
            projected = projected.unique_stable(None, UniqueKeepStrategy::First);
        }
        let projected = projected.collect()?;

        let rows_appended = append_frame(warehouse.connection_mut(), table.name, &projected)?;
        info!(table = table.name, rows = rows_appended, "flat table appended");
        reports.push(FlatTableReport {
            table: table.name.to_string(),
            rows_appended,
        });
    }

    Ok(reports)
}

fn sql_type(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Boolean
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt32
        | DataType::UInt64 => "INTEGER",
        DataType::Float32 | DataType::Float64 => "REAL",
        _ => "TEXT",
    }
}

fn sql_value(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(v) => Value::Integer(i64::from(v)),
        AnyValue::Int32(v) => Value::Integer(i64::from(v)),
        AnyValue::Int64(v) => Value::Integer(v),
        AnyValue::UInt32(v) => Value::Integer(i64::from(v)),
        AnyValue::UInt64(v) => Value::Integer(v as i64),
        AnyValue::Float32(v) => Value::Real(f64::from(v)),
        AnyValue::Float64(v) => Value::Real(v),
        AnyValue::String(v) => Value::Text(v.to_string()),
        other => Value::Text(other.to_string()),
    }
}

/// Creates `table` from the frame's columns if needed and appends every row,
/// one transaction per chunk.
fn append_frame(conn: &mut Connection, table: &str, df: &DataFrame) -> Result<usize> {
    let columns = df.get_columns();

    let definitions: Vec<String> = columns
        .iter()
        .map(|series| format!("\"{}\" {}", series.name(), sql_type(series.dtype())))
        .collect();
    conn.execute(
        &format!("CREATE TABLE IF NOT EXISTS \"{table}\" ({})", definitions.join(", ")),
        [],
    )?;

    let names: Vec<String> = columns
        .iter()
        .map(|series| format!("\"{}\"", series.name()))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let insert = format!(
        "INSERT INTO \"{table}\" ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    );

    let height = df.height();
    let mut start = 0;
    while start < height {
        let end = (start + CHUNK_SIZE).min(height);
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&insert)?;
            for idx in start..end {
                let mut values = Vec::with_capacity(columns.len());
                for series in columns {
                    values.push(sql_value(series.get(idx)?));
                }
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
        start = end;
    }

    Ok(height)
}
