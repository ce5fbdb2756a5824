//! Period persistence.
//!
//! A period is stored wholesale under its `"<year>-<MM>"` key: one record, the ordered rows and
//! the manual mappings. Saving replaces everything previously stored for the key inside a
//! single transaction.

use crate::engine::validate_exchange_rate;
use crate::error::Result;
use crate::schema::{
    LedgerRow, ManualMapping, ManualMappings, PeriodDescriptor, DEFAULT_ROW_NAME, UNCLASSIFIED,
};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS periods (
    period_key TEXT PRIMARY KEY,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL,
    filename TEXT,
    exchange_rate REAL NOT NULL,
    uploaded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS period_rows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    period_key TEXT NOT NULL,
    row_id TEXT NOT NULL,
    sort_order INTEGER NOT NULL,
    code TEXT NOT NULL,
    name TEXT,
    sid REAL NOT NULL DEFAULT 0,
    sia REAL NOT NULL DEFAULT 0,
    cargos REAL NOT NULL DEFAULT 0,
    abonos REAL NOT NULL DEFAULT 0,
    sfd REAL NOT NULL DEFAULT 0,
    sfa REAL NOT NULL DEFAULT 0,
    is_new INTEGER NOT NULL DEFAULT 0,
    exclude_from_analysis INTEGER NOT NULL DEFAULT 0,
    UNIQUE (period_key, row_id),
    FOREIGN KEY (period_key) REFERENCES periods(period_key) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS period_manual_mappings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    period_key TEXT NOT NULL,
    row_id TEXT NOT NULL,
    pgc TEXT,
    pgc_name TEXT,
    grupo TEXT,
    subgrupo TEXT,
    UNIQUE (period_key, row_id),
    FOREIGN KEY (period_key) REFERENCES periods(period_key) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_period_rows_key ON period_rows(period_key, sort_order);
";

/// Everything needed to persist one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePeriodRequest {
    pub period: PeriodDescriptor,
    pub exchange_rate: f64,
    pub rows: Vec<LedgerRow>,
    #[serde(default)]
    pub manual_mappings: ManualMappings,
    #[serde(default)]
    pub filename: Option<String>,
    /// RFC 3339 timestamp supplied by the caller.
    pub uploaded_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRecord {
    pub period_key: String,
    pub year: i32,
    pub month: u32,
    pub filename: Option<String>,
    pub exchange_rate: f64,
    pub uploaded_at: String,
}

impl PeriodRecord {
    pub fn descriptor(&self) -> PeriodDescriptor {
        PeriodDescriptor {
            month: self.month,
            year: self.year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPeriod {
    pub period: PeriodRecord,
    pub rows: Vec<LedgerRow>,
    pub manual_mappings: ManualMappings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    #[serde(flatten)]
    pub period: PeriodRecord,
    pub row_count: usize,
}

pub trait PeriodRepository {
    /// Upserts the period record and replaces its rows and manual mappings atomically.
    fn save_period(&mut self, request: &SavePeriodRequest) -> Result<()>;

    fn load_period(&self, period: PeriodDescriptor) -> Result<Option<StoredPeriod>>;

    /// Saved periods, most recent first.
    fn list_periods(&self) -> Result<Vec<PeriodSummary>>;

    /// Returns `false` when nothing was stored under the key.
    fn delete_period(&mut self, period: PeriodDescriptor) -> Result<bool>;

    /// Periods of `period.year` up to and including `period.month`, in ascending month order.
    fn load_year_until_month(
        &self,
        period: PeriodDescriptor,
        exclude_key: Option<&str>,
    ) -> Result<Vec<StoredPeriod>>;
}

pub struct SqlitePeriodStore {
    conn: Connection,
}

impl SqlitePeriodStore {
    /// Opens (or creates) the database file, creating its parent directory if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!("Opening period database at {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn load_by_key(&self, period_key: &str) -> Result<Option<StoredPeriod>> {
        let record = self
            .conn
            .query_row(
                "SELECT period_key, year, month, filename, exchange_rate, uploaded_at
                 FROM periods WHERE period_key = ?1",
                params![period_key],
                record_from_row,
            )
            .optional()?;

        let Some(record) = record else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT row_id, code, name, sid, sia, cargos, abonos, sfd, sfa, is_new, exclude_from_analysis
             FROM period_rows WHERE period_key = ?1 ORDER BY sort_order ASC",
        )?;
        let rows = stmt
            .query_map(params![period_key], |row| {
                Ok(LedgerRow {
                    row_id: row.get("row_id")?,
                    is_new: row.get("is_new")?,
                    exclude_from_analysis: row.get("exclude_from_analysis")?,
                    code: row.get("code")?,
                    name: row
                        .get::<_, Option<String>>("name")?
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_ROW_NAME.to_string()),
                    sid: row.get::<_, Option<f64>>("sid")?.unwrap_or(0.0),
                    sia: row.get::<_, Option<f64>>("sia")?.unwrap_or(0.0),
                    cargos: row.get::<_, Option<f64>>("cargos")?.unwrap_or(0.0),
                    abonos: row.get::<_, Option<f64>>("abonos")?.unwrap_or(0.0),
                    sfd: row.get::<_, Option<f64>>("sfd")?.unwrap_or(0.0),
                    sfa: row.get::<_, Option<f64>>("sfa")?.unwrap_or(0.0),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT row_id, pgc, pgc_name, grupo, subgrupo
             FROM period_manual_mappings WHERE period_key = ?1",
        )?;
        let manual_mappings = stmt
            .query_map(params![period_key], |row| {
                let row_id: String = row.get("row_id")?;
                let text = |column: &str, fallback: &str| -> rusqlite::Result<String> {
                    Ok(row
                        .get::<_, Option<String>>(column)?
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| fallback.to_string()))
                };
                let mapping = ManualMapping {
                    pgc: text("pgc", "")?,
                    pgc_name: text("pgc_name", "")?,
                    grupo: text("grupo", UNCLASSIFIED)?,
                    subgrupo: text("subgrupo", UNCLASSIFIED)?,
                };
                Ok((row_id, mapping))
            })?
            .collect::<rusqlite::Result<ManualMappings>>()?;

        Ok(Some(StoredPeriod {
            period: record,
            rows,
            manual_mappings,
        }))
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PeriodRecord> {
    Ok(PeriodRecord {
        period_key: row.get("period_key")?,
        year: row.get("year")?,
        month: row.get("month")?,
        filename: row.get("filename")?,
        exchange_rate: row.get("exchange_rate")?,
        uploaded_at: row.get("uploaded_at")?,
    })
}

impl PeriodRepository for SqlitePeriodStore {
    fn save_period(&mut self, request: &SavePeriodRequest) -> Result<()> {
        let period = PeriodDescriptor::new(request.period.year, request.period.month)?;
        let exchange_rate = validate_exchange_rate(request.exchange_rate)?;
        let period_key = period.key();

        // Dropping the transaction without commit rolls everything back.
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO periods (period_key, year, month, filename, exchange_rate, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(period_key) DO UPDATE SET
                 year = excluded.year,
                 month = excluded.month,
                 filename = excluded.filename,
                 exchange_rate = excluded.exchange_rate,
                 uploaded_at = excluded.uploaded_at",
            params![
                period_key,
                period.year,
                period.month,
                request.filename,
                exchange_rate,
                request.uploaded_at
            ],
        )?;

        tx.execute(
            "DELETE FROM period_rows WHERE period_key = ?1",
            params![period_key],
        )?;
        tx.execute(
            "DELETE FROM period_manual_mappings WHERE period_key = ?1",
            params![period_key],
        )?;

        {
            let mut insert_row = tx.prepare(
                "INSERT INTO period_rows (
                    period_key, row_id, sort_order, code, name,
                    sid, sia, cargos, abonos, sfd, sfa, is_new, exclude_from_analysis
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for (sort_order, row) in request.rows.iter().enumerate() {
                insert_row.execute(params![
                    period_key,
                    row.row_id,
                    sort_order as i64,
                    row.code,
                    row.name,
                    row.sid,
                    row.sia,
                    row.cargos,
                    row.abonos,
                    row.sfd,
                    row.sfa,
                    row.is_new,
                    row.exclude_from_analysis
                ])?;
            }

            let mut insert_mapping = tx.prepare(
                "INSERT INTO period_manual_mappings (period_key, row_id, pgc, pgc_name, grupo, subgrupo)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (row_id, mapping) in &request.manual_mappings {
                insert_mapping.execute(params![
                    period_key,
                    row_id,
                    mapping.pgc,
                    mapping.pgc_name,
                    mapping.grupo,
                    mapping.subgrupo
                ])?;
            }
        }

        tx.commit()?;

        info!(
            "Saved period {} ({} rows, {} manual mappings)",
            period_key,
            request.rows.len(),
            request.manual_mappings.len()
        );
        Ok(())
    }

    fn load_period(&self, period: PeriodDescriptor) -> Result<Option<StoredPeriod>> {
        self.load_by_key(&period.key())
    }

    fn list_periods(&self) -> Result<Vec<PeriodSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.period_key, p.year, p.month, p.filename, p.exchange_rate, p.uploaded_at,
                    (SELECT COUNT(*) FROM period_rows r WHERE r.period_key = p.period_key) AS row_count
             FROM periods p
             ORDER BY p.year DESC, p.month DESC",
        )?;
        let summaries = stmt
            .query_map([], |row| {
                let row_count: i64 = row.get("row_count")?;
                Ok(PeriodSummary {
                    period: record_from_row(row)?,
                    row_count: usize::try_from(row_count).unwrap_or(0),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(summaries)
    }

    fn delete_period(&mut self, period: PeriodDescriptor) -> Result<bool> {
        let period_key = period.key();
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM period_manual_mappings WHERE period_key = ?1",
            params![period_key],
        )?;
        tx.execute(
            "DELETE FROM period_rows WHERE period_key = ?1",
            params![period_key],
        )?;
        let deleted = tx.execute(
            "DELETE FROM periods WHERE period_key = ?1",
            params![period_key],
        )?;

        tx.commit()?;

        if deleted > 0 {
            info!("Deleted period {}", period_key);
        } else {
            debug!("No stored period under {}", period_key);
        }
        Ok(deleted > 0)
    }

    fn load_year_until_month(
        &self,
        period: PeriodDescriptor,
        exclude_key: Option<&str>,
    ) -> Result<Vec<StoredPeriod>> {
        let mut stmt = self.conn.prepare(
            "SELECT period_key FROM periods
             WHERE year = ?1 AND month <= ?2
             ORDER BY month ASC",
        )?;
        let keys = stmt
            .query_map(params![period.year, period.month], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut periods = Vec::with_capacity(keys.len());
        for key in keys.iter().filter(|k| Some(k.as_str()) != exclude_key) {
            if let Some(stored) = self.load_by_key(key)? {
                periods.push(stored);
            }
        }
        Ok(periods)
    }
}
