use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::info;

use crate::error::Error;
use crate::row::{self, MetricRow, Table, Value};

const DATE_COLUMN: &str = "date";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Row accounting for one merge, logged and returned for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub previous_rows: usize,
    pub kept_rows: usize,
    pub superseded_rows: usize,
    pub total_rows: usize,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
}

/// A durable CSV table of merged metrics, unique and sorted by its declared
/// key columns. The upstream API only serves a bounded trailing window, so
/// rows older than a fresh fetch are irreplaceable and must survive every
/// merge.
pub struct HistoricalStore {
    path: PathBuf,
    key_columns: Vec<String>,
}

impl HistoricalStore {
    pub fn new(path: impl Into<PathBuf>, key_columns: &[&str]) -> Self {
        HistoricalStore {
            path: path.into(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Merges freshly fetched rows into the persisted table.
    ///
    /// Rows dated before the earliest date in `new_rows` are kept untouched;
    /// everything on or after that cutoff is superseded by the fresh fetch,
    /// which re-validates the whole currently-fetchable window. The combined
    /// table is deduplicated by key tuple (last occurrence wins, so fresh
    /// rows beat stale duplicates), sorted ascending and written back.
    ///
    /// # Returns
    /// A Result containing either the merged table with its [`MergeSummary`]
    /// or an [`Error`]. A corrupt persisted table is propagated, never
    /// discarded.
    pub fn merge(&self, new_rows: Vec<MetricRow>) -> Result<(Table, MergeSummary), Error> {
        if new_rows.is_empty() {
            return Err(Error::NoData {
                message: "no rows to merge into the historical store".to_string(),
            });
        }

        // Validate up front; a bad batch must not leave a partial write.
        for new_row in &new_rows {
            new_row.key_tuple(&self.key_columns)?;
        }

        if !self.path.exists() {
            let table = dedup_sorted(Vec::new(), new_rows, &self.key_columns)?;
            self.save(&table)?;
            info!(
                "created historical file {} with {} rows",
                self.path.display(),
                table.len()
            );
            let summary = self.summarize(0, 0, 0, &table);
            return Ok((table, summary));
        }

        let existing = self.load()?;
        let previous_rows = existing.len();
        let cutoff = self.min_new_date(&new_rows)?;

        let mut kept = Vec::new();
        let mut superseded_rows = 0usize;
        for row in existing {
            if self.stored_date(&row)? < cutoff {
                kept.push(row);
            } else {
                superseded_rows += 1;
            }
        }
        let kept_rows = kept.len();
        info!(
            "keeping {} rows older than {}, replacing {} rows with fresh data",
            kept_rows, cutoff, superseded_rows
        );

        let table = dedup_sorted(kept, new_rows, &self.key_columns)?;
        self.save(&table)?;

        let summary = self.summarize(previous_rows, kept_rows, superseded_rows, &table);
        info!(
            "updated historical file {}: {} -> {} rows (net {:+}), covering {} to {}",
            self.path.display(),
            summary.previous_rows,
            summary.total_rows,
            summary.total_rows as i64 - summary.previous_rows as i64,
            summary.first_date.as_deref().unwrap_or("-"),
            summary.last_date.as_deref().unwrap_or("-"),
        );
        Ok((table, summary))
    }

    fn summarize(
        &self,
        previous_rows: usize,
        kept_rows: usize,
        superseded_rows: usize,
        table: &[MetricRow],
    ) -> MergeSummary {
        MergeSummary {
            previous_rows,
            kept_rows,
            superseded_rows,
            total_rows: table.len(),
            first_date: table
                .first()
                .and_then(|row| row.keys.get(DATE_COLUMN).cloned()),
            last_date: table
                .last()
                .and_then(|row| row.keys.get(DATE_COLUMN).cloned()),
        }
    }

    fn min_new_date(&self, new_rows: &[MetricRow]) -> Result<NaiveDate, Error> {
        let mut min: Option<NaiveDate> = None;
        for row in new_rows {
            let raw = row.keys.get(DATE_COLUMN).cloned().unwrap_or_default();
            let date = NaiveDate::parse_from_str(&raw, DATE_FORMAT)
                .map_err(|_| Error::InvalidDate { date: raw.clone() })?;
            min = Some(match min {
                Some(current) => current.min(date),
                None => date,
            });
        }
        min.ok_or_else(|| Error::NoData {
            message: "no rows to merge into the historical store".to_string(),
        })
    }

    fn stored_date(&self, row: &MetricRow) -> Result<NaiveDate, Error> {
        let raw = row.keys.get(DATE_COLUMN).cloned().unwrap_or_default();
        NaiveDate::parse_from_str(&raw, DATE_FORMAT)
            .map_err(|_| self.persistence(format!("row with unparseable date '{}'", raw)))
    }

    fn load(&self) -> Result<Table, Error> {
        let mut reader =
            csv::Reader::from_path(&self.path).map_err(|err| self.persistence(err))?;
        let headers = reader
            .headers()
            .map_err(|err| self.persistence(err))?
            .clone();

        for column in &self.key_columns {
            if !headers.iter().any(|name| name == column) {
                return Err(self.persistence(format!("header lacks key column '{}'", column)));
            }
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| self.persistence(err))?;
            let mut row = MetricRow::default();
            for (name, cell) in headers.iter().zip(record.iter()) {
                if cell.is_empty() {
                    continue;
                }
                if self.key_columns.iter().any(|key| key == name) {
                    row.keys.insert(name.to_string(), cell.to_string());
                } else {
                    row.values.insert(name.to_string(), Value::parse(cell));
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }

    fn save(&self, table: &Table) -> Result<(), Error> {
        write_table(&self.path, table, &self.key_columns)
    }

    fn persistence(&self, message: impl fmt::Display) -> Error {
        Error::Persistence {
            path: self.path.display().to_string(),
            message: message.to_string(),
        }
    }
}

/// Writes a one-off CSV table (top-pin snapshots) without merge semantics.
pub fn write_snapshot(
    path: &Path,
    rows: &[MetricRow],
    key_columns: &[&str],
) -> Result<(), Error> {
    let key_columns: Vec<String> = key_columns.iter().map(|c| c.to_string()).collect();
    write_table(path, rows, &key_columns)
}

// Staged write: the previous table stays intact if this run dies mid-write.
fn write_table(path: &Path, table: &[MetricRow], key_columns: &[String]) -> Result<(), Error> {
    let persistence = |message: &dyn fmt::Display| Error::Persistence {
        path: path.display().to_string(),
        message: message.to_string(),
    };

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).map_err(|err| persistence(&err))?;
        }
    }

    let staging = path.with_extension("tmp");
    let mut writer = csv::Writer::from_path(&staging).map_err(|err| persistence(&err))?;
    for record in row::to_values(table, key_columns) {
        writer
            .write_record(&record)
            .map_err(|err| persistence(&err))?;
    }
    writer.flush().map_err(|err| persistence(&err))?;
    drop(writer);

    fs::rename(&staging, path).map_err(|err| persistence(&err))
}

fn dedup_sorted(
    kept: Vec<MetricRow>,
    new_rows: Vec<MetricRow>,
    key_columns: &[String],
) -> Result<Table, Error> {
    let mut merged: BTreeMap<Vec<String>, MetricRow> = BTreeMap::new();
    for row in kept.into_iter().chain(new_rows) {
        let key = row.key_tuple(key_columns)?;
        // later occurrences win; fresh rows are chained last
        merged.insert(key, row);
    }
    Ok(merged.into_values().collect())
}
