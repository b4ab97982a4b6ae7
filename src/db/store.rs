//! SQLite database store implementation.

use super::models::*;
use super::MetricStore;
use crate::protocol::MetricType;

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metric not found")]
    NotFound,
    #[error("invalid metric: {0}")]
    InvalidMetric(String),
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
///
/// Writes go through a single writer connection, which serializes every
/// transaction. Reads use their own connection so they never queue behind
/// the write lock; WAL mode gives them a consistent snapshot. An in-memory
/// database has a single connection shared by both.
#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = open_connection(path)?;
        writer
            .execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;

        let writer = Arc::new(Mutex::new(writer));

        // Every in-memory connection is its own database, so reads must go
        // through the writer.
        let reader = if is_in_memory(path) {
            writer.clone()
        } else {
            Arc::new(Mutex::new(open_connection(path)?))
        };

        Ok(Self { writer, reader })
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.writer.lock().map_err(|_| DbError::Poisoned)
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.reader.lock().map_err(|_| DbError::Poisoned)
    }
}

fn is_in_memory(path: &Path) -> bool {
    let path = path.to_string_lossy();
    path.is_empty() || path == ":memory:" || path.contains("mode=memory")
}

fn open_connection(path: &Path) -> Result<Connection, DbError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    // Needed per connection for ON DELETE CASCADE.
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

impl MetricStore for Store {
    fn save_metric(
        &self,
        name: &str,
        metric_type: MetricType,
        num_aggregation: u32,
        value: &str,
        recorded_at: i64,
    ) -> Result<(), DbError> {
        if name.is_empty() {
            return Err(DbError::InvalidMetric("empty metric name".to_string()));
        }
        if num_aggregation == 0 {
            return Err(DbError::InvalidMetric(format!(
                "{}: retention count must be at least 1",
                name
            )));
        }

        let mut conn = self.writer()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO metrics (name, type, num_aggregation) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
             type=excluded.type, num_aggregation=excluded.num_aggregation",
            params![name, metric_type, num_aggregation],
        )?;

        tx.execute(
            "INSERT INTO metric_values (metric_name, value, recorded_at) VALUES (?1, ?2, ?3)",
            params![name, value, recorded_at],
        )?;

        // Ties on recorded_at fall back to insertion order.
        tx.execute(
            "DELETE FROM metric_values
             WHERE metric_name = ?1
               AND id NOT IN (
                   SELECT id FROM metric_values
                   WHERE metric_name = ?1
                   ORDER BY recorded_at DESC, id DESC
                   LIMIT ?2
               )",
            params![name, num_aggregation],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get_latest_metrics(&self) -> Result<Vec<LatestMetric>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT m.name, m.type, m.num_aggregation, m.display_order, v.value, v.recorded_at
             FROM metrics m
             LEFT JOIN (
                 SELECT metric_name, value, recorded_at,
                        ROW_NUMBER() OVER (
                            PARTITION BY metric_name ORDER BY recorded_at DESC, id DESC
                        ) AS rn
                 FROM metric_values
             ) v ON v.metric_name = m.name AND v.rn = 1
             ORDER BY m.display_order ASC, m.name ASC",
        )?;

        let metrics = stmt
            .query_map([], |row| {
                let value: Option<String> = row.get(4)?;
                let recorded_at: Option<i64> = row.get(5)?;
                Ok(LatestMetric {
                    definition: MetricDefinition {
                        name: row.get(0)?,
                        metric_type: row.get(1)?,
                        num_aggregation: row.get(2)?,
                        display_order: row.get(3)?,
                    },
                    latest: match (value, recorded_at) {
                        (Some(value), Some(recorded_at)) => Some(MetricValue { value, recorded_at }),
                        _ => None,
                    },
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(metrics)
    }

    fn get_metric_history(&self, name: &str) -> Result<MetricHistory, DbError> {
        let conn = self.reader()?;
        let tx = conn.unchecked_transaction()?;

        let definition = tx
            .query_row(
                "SELECT name, type, num_aggregation, display_order FROM metrics WHERE name = ?1",
                params![name],
                |row| {
                    Ok(MetricDefinition {
                        name: row.get(0)?,
                        metric_type: row.get(1)?,
                        num_aggregation: row.get(2)?,
                        display_order: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or(DbError::NotFound)?;

        let history = {
            let mut stmt = tx.prepare(
                "SELECT value, recorded_at FROM metric_values
                 WHERE metric_name = ?1 ORDER BY recorded_at ASC, id ASC",
            )?;
            let values = stmt
                .query_map(params![name], |row| {
                    Ok(MetricValue {
                        value: row.get(0)?,
                        recorded_at: row.get(1)?,
                    })
                })?
                .collect::<SqlResult<Vec<_>>>()?;
            values
        };

        tx.commit()?;
        Ok(MetricHistory { definition, history })
    }

    fn delete_metric(&self, name: &str) -> Result<(), DbError> {
        let conn = self.writer()?;
        conn.execute("DELETE FROM metrics WHERE name = ?1", params![name])?;
        Ok(())
    }

    fn update_metric_order(&self, name: &str, order: i64) -> Result<(), DbError> {
        let conn = self.writer()?;
        let updated = conn.execute(
            "UPDATE metrics SET display_order = ?1 WHERE name = ?2",
            params![order, name],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    fn update_panel_order(&self, panel: &str, order: i64) -> Result<(), DbError> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO panel_configs (name, display_order) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET display_order=excluded.display_order",
            params![panel, order],
        )?;
        Ok(())
    }

    fn get_panel_orders(&self) -> Result<HashMap<String, i64>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT name, display_order FROM panel_configs")?;
        let orders = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<SqlResult<HashMap<String, i64>>>()?;
        Ok(orders)
    }

    fn delete_values_before(&self, cutoff: i64) -> Result<usize, DbError> {
        let conn = self.writer()?;
        let deleted = conn.execute(
            "DELETE FROM metric_values WHERE recorded_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}
