//! Cache layer for the merged table.
//!
//! `ParquetTableCache` layout:
//! - `{path}`: the table as Parquet, a `date` Date column plus one
//!   nullable Float64 column per series
//! - `{path without extension}.meta.json`: save time, shape and a blake3
//!   hash of the table contents
//!
//! Features:
//! - Atomic writes (both files go to .tmp, then the table and the sidecar
//!   are renamed into place in that order)
//! - TTL freshness check against the sidecar save time, or the file mtime
//!   when the sidecar is missing
//! - Integrity validation on load (column list and content hash)
//! - Quarantine for corrupt files (`{filename}.quarantined`), treated as a miss
//! - A sidecar older than the table file belongs to an unfinished save, so a
//!   mismatch against it is a plain miss rather than corruption

use super::provider::DataError;
use crate::clock::Clock;
use crate::table::SeriesTable;
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const DATE_COLUMN: &str = "date";

/// Persistent store for the merged table.
pub trait TableStore: Send + Sync {
    /// Load the stored table if present and fresh. Stale, missing and
    /// corrupt entries are all a miss.
    fn load(&self) -> Result<Option<SeriesTable>, DataError>;

    /// Replace the stored table.
    fn save(&self, table: &SeriesTable) -> Result<(), DataError>;

    /// Describe the stored entry, fresh or not.
    fn entry_info(&self) -> Option<CacheEntryInfo>;

    fn clear(&self) -> Result<(), DataError>;
}

/// Metadata sidecar written next to the Parquet file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub saved_at: DateTime<Utc>,
    pub rows: usize,
    pub columns: Vec<String>,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub data_hash: String,
}

/// Description of a stored entry, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub saved_at: DateTime<Utc>,
    pub age_secs: i64,
    pub fresh: bool,
    pub rows: Option<usize>,
    pub columns: Vec<String>,
}

fn table_hash(table: &SeriesTable) -> Result<String, DataError> {
    let bytes = serde_json::to_vec(table)
        .map_err(|e| DataError::CacheError(format!("hash serialization: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// True while `saved_at` is younger than `ttl`. A save time in the future
/// (clock skew) counts as fresh.
fn is_fresh(saved_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match (now - saved_at).to_std() {
        Ok(age) => age < ttl,
        Err(_) => true,
    }
}

// ── Parquet-backed cache ────────────────────────────────────────────

pub struct ParquetTableCache {
    path: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    // serializes save and load within this process
    io: Mutex<()>,
}

impl ParquetTableCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            ttl,
            clock,
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn meta_path(&self) -> PathBuf {
        self.path.with_extension("meta.json")
    }

    fn read_meta(&self) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path()).ok()?;
        match serde_json::from_str(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable cache sidecar");
                None
            }
        }
    }

    /// Save time from the sidecar, falling back to the file mtime.
    fn saved_at(&self, meta: Option<&CacheMeta>) -> Option<DateTime<Utc>> {
        if let Some(meta) = meta {
            return Some(meta.saved_at);
        }
        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// True when the sidecar was written strictly before the table file,
    /// as happens between the two renames of a save.
    fn sidecar_predates_table(&self) -> bool {
        let modified = |path: &Path| fs::metadata(path).and_then(|m| m.modified()).ok();
        match (modified(&self.meta_path()), modified(&self.path)) {
            (Some(meta), Some(table)) => meta < table,
            _ => false,
        }
    }

    fn quarantine(&self, reason: &str) {
        tracing::warn!(path = %self.path.display(), reason, "quarantining corrupt cache file");
        for path in [self.path.clone(), self.meta_path()] {
            if path.exists() {
                let mut target = path.clone().into_os_string();
                target.push(".quarantined");
                let _ = fs::rename(&path, PathBuf::from(target));
            }
        }
    }

    fn validate(table: &SeriesTable, meta: &CacheMeta) -> Result<(), String> {
        let columns: Vec<&str> = table.column_names().collect();
        if columns != meta.columns.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err("column list does not match sidecar".into());
        }
        if table.height() != meta.rows {
            return Err(format!(
                "row count {} does not match sidecar {}",
                table.height(),
                meta.rows
            ));
        }
        match table_hash(table) {
            Ok(hash) if hash == meta.data_hash => Ok(()),
            Ok(_) => Err("content hash mismatch".into()),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl TableStore for ParquetTableCache {
    fn load(&self) -> Result<Option<SeriesTable>, DataError> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "cache miss: no file");
            return Ok(None);
        }

        let meta = self.read_meta();
        let Some(saved_at) = self.saved_at(meta.as_ref()) else {
            return Ok(None);
        };
        if !is_fresh(saved_at, self.clock.now(), self.ttl) {
            tracing::debug!(%saved_at, ttl_secs = self.ttl.as_secs(), "cache miss: expired");
            return Ok(None);
        }

        let table = match read_parquet(&self.path) {
            Ok(table) => table,
            Err(e) => {
                self.quarantine(&e.to_string());
                return Ok(None);
            }
        };

        if let Some(meta) = &meta {
            if let Err(reason) = Self::validate(&table, meta) {
                if self.sidecar_predates_table() {
                    tracing::debug!(reason, "cache miss: sidecar from an earlier save");
                } else {
                    self.quarantine(&reason);
                }
                return Ok(None);
            }
        }

        tracing::debug!(rows = table.height(), columns = table.width(), "cache hit");
        Ok(Some(table))
    }

    fn save(&self, table: &SeriesTable) -> Result<(), DataError> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;
        }

        let meta = CacheMeta {
            saved_at: self.clock.now(),
            rows: table.height(),
            columns: table.column_names().map(String::from).collect(),
            first_date: table.first_date(),
            last_date: table.last_date(),
            data_hash: table_hash(table)?,
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;

        let mut df = table_to_dataframe(table)?;
        let tmp_path = self.path.with_extension("parquet.tmp");
        let meta_tmp_path = self.path.with_extension("meta.json.tmp");
        let cleanup = || {
            let _ = fs::remove_file(&tmp_path);
            let _ = fs::remove_file(&meta_tmp_path);
        };
        if let Err(e) = write_parquet(&mut df, &tmp_path) {
            cleanup();
            return Err(e);
        }
        fs::write(&meta_tmp_path, meta_json).map_err(|e| {
            cleanup();
            DataError::CacheError(format!("meta write: {e}"))
        })?;

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            cleanup();
            DataError::CacheError(format!("atomic rename failed: {e}"))
        })?;
        fs::rename(&meta_tmp_path, self.meta_path()).map_err(|e| {
            cleanup();
            DataError::CacheError(format!("meta rename failed: {e}"))
        })?;

        tracing::debug!(path = %self.path.display(), rows = meta.rows, "cache saved");
        Ok(())
    }

    fn entry_info(&self) -> Option<CacheEntryInfo> {
        if !self.path.exists() {
            return None;
        }
        let meta = self.read_meta();
        let saved_at = self.saved_at(meta.as_ref())?;
        let now = self.clock.now();
        Some(CacheEntryInfo {
            saved_at,
            age_secs: (now - saved_at).num_seconds(),
            fresh: is_fresh(saved_at, now, self.ttl),
            rows: meta.as_ref().map(|m| m.rows),
            columns: meta.map(|m| m.columns).unwrap_or_default(),
        })
    }

    fn clear(&self) -> Result<(), DataError> {
        for path in [self.path.clone(), self.meta_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(DataError::CacheError(format!(
                        "remove {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }
}

// ── In-memory cache ─────────────────────────────────────────────────

/// Process-local store with the same TTL semantics as the Parquet cache.
pub struct MemoryTableCache {
    slot: Mutex<Option<(SeriesTable, DateTime<Utc>)>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryTableCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
            clock,
        }
    }
}

impl TableStore for MemoryTableCache {
    fn load(&self) -> Result<Option<SeriesTable>, DataError> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slot
            .as_ref()
            .filter(|(_, saved_at)| is_fresh(*saved_at, self.clock.now(), self.ttl))
            .map(|(table, _)| table.clone()))
    }

    fn save(&self, table: &SeriesTable) -> Result<(), DataError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some((table.clone(), self.clock.now()));
        Ok(())
    }

    fn entry_info(&self) -> Option<CacheEntryInfo> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (table, saved_at) = slot.as_ref()?;
        let now = self.clock.now();
        Some(CacheEntryInfo {
            saved_at: *saved_at,
            age_secs: (now - *saved_at).num_seconds(),
            fresh: is_fresh(*saved_at, now, self.ttl),
            rows: Some(table.height()),
            columns: table.column_names().map(String::from).collect(),
        })
    }

    fn clear(&self) -> Result<(), DataError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn unix_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn table_to_dataframe(table: &SeriesTable) -> Result<DataFrame, DataError> {
    let epoch = unix_epoch();
    let days: Vec<i32> = table
        .dates()
        .iter()
        .map(|d| (*d - epoch).num_days() as i32)
        .collect();

    let mut columns = Vec::with_capacity(table.width() + 1);
    columns.push(
        Column::new(DATE_COLUMN.into(), days)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
    );
    for (name, values) in table.columns() {
        columns.push(Column::new(name.into(), values.to_vec()));
    }

    DataFrame::new(columns).map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<SeriesTable, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;
    dataframe_to_table(&df)
}

fn dataframe_to_table(df: &DataFrame) -> Result<SeriesTable, DataError> {
    let date_ca = df
        .column(DATE_COLUMN)
        .map_err(|e| DataError::ValidationError(format!("missing '{DATE_COLUMN}' column: {e}")))?
        .date()
        .map_err(|e| DataError::ParquetError(format!("date column type: {e}")))?;

    let epoch = unix_epoch();
    let mut dates = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))?;
        dates.push(epoch + chrono::Duration::days(days as i64));
    }

    let mut columns = IndexMap::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == DATE_COLUMN {
            continue;
        }
        let ca = column
            .f64()
            .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?;
        columns.insert(name.to_string(), ca.into_iter().collect::<Vec<Option<f64>>>());
    }

    SeriesTable::new(dates, columns).map_err(|e| DataError::ValidationError(e.to_string()))
}
