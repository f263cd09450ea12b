use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, NaiveDateTime};
use rusqlite::{params, params_from_iter, types::Value, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_timestamp, parse_timestamp, to_u32},
    models::{Detection, DetectionFilter, NewDetection},
};

const DETECTION_COLUMNS: &str = "id, timestamp, stork_count, image_path";

pub(crate) fn row_to_detection(row: &Row) -> Result<Detection, rusqlite::Error> {
    let timestamp_str: String = row.get("timestamp")?;
    let stork_count: i64 = row.get("stork_count")?;

    Ok(Detection {
        id: row.get("id")?,
        timestamp: parse_timestamp(&timestamp_str, "timestamp").map_err(conversion_error)?,
        stork_count: to_u32(stork_count, "stork_count").map_err(conversion_error)?,
        image_path: row.get("image_path")?,
    })
}

fn day_start(day: NaiveDate) -> String {
    format_timestamp(&day.and_time(chrono::NaiveTime::MIN))
}

impl Database {
    /// Inserts one record in its own transaction and returns it with its id.
    pub async fn insert_detection(&self, detection: &NewDetection) -> Result<Detection> {
        let record = detection.clone();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open detection transaction")?;
            tx.execute(
                "INSERT INTO detections (timestamp, stork_count, image_path)
                 VALUES (?1, ?2, ?3)",
                params![
                    format_timestamp(&record.timestamp),
                    record.stork_count,
                    record.image_path,
                ],
            )
            .with_context(|| "failed to insert detection")?;
            let id = tx.last_insert_rowid();
            tx.commit().context("failed to commit detection")?;

            Ok(Detection {
                id,
                timestamp: record.timestamp,
                stork_count: record.stork_count,
                image_path: record.image_path,
            })
        })
        .await
    }

    /// Newest first by insertion order; wall-clock timestamps can repeat or step back.
    pub async fn recent_detections(&self, limit: usize) -> Result<Vec<Detection>> {
        let limit = limit as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DETECTION_COLUMNS} FROM detections
                 ORDER BY id DESC
                 LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], row_to_detection)?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("failed to load recent detections")
        })
        .await
    }

    /// Time series for a trailing window, oldest first.
    pub async fn detections_since(&self, since: NaiveDateTime) -> Result<Vec<Detection>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DETECTION_COLUMNS} FROM detections
                 WHERE timestamp >= ?1
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![format_timestamp(&since)], row_to_detection)?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("failed to load detection window")
        })
        .await
    }

    /// Full hot-table dump, oldest first.
    pub async fn all_detections(&self) -> Result<Vec<Detection>> {
        self.filter_detections(&DetectionFilter::default()).await
    }

    pub async fn filter_detections(&self, filter: &DetectionFilter) -> Result<Vec<Detection>> {
        let filter = filter.clone();
        self.execute(move |conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some((comparison, count)) = filter.count {
                values.push(Value::Integer(i64::from(count)));
                clauses.push(format!("stork_count {} ?{}", comparison.as_sql(), values.len()));
            }
            if let Some(from) = filter.from {
                values.push(Value::Text(day_start(from)));
                clauses.push(format!("timestamp >= ?{}", values.len()));
            }
            if let Some(to) = filter.to {
                // Inclusive end date: everything before the following midnight.
                let next_day = to
                    .checked_add_days(Days::new(1))
                    .context("filter end date out of range")?;
                values.push(Value::Text(day_start(next_day)));
                clauses.push(format!("timestamp < ?{}", values.len()));
            }

            let where_clause = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", clauses.join(" AND "))
            };

            let mut stmt = conn.prepare(&format!(
                "SELECT {DETECTION_COLUMNS} FROM detections
                 {where_clause}
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params_from_iter(values), row_to_detection)?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("failed to filter detections")
        })
        .await
    }

    /// Most recently inserted record that carries an image.
    pub async fn latest_image_path(&self) -> Result<Option<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT image_path FROM detections
                 WHERE image_path IS NOT NULL
                 ORDER BY id DESC
                 LIMIT 1",
            )?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn hot_count(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}
