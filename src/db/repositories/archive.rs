use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, TransactionBehavior};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_timestamp, parse_timestamp, to_u32},
    models::{ArchiveSummary, ArchivedDetection},
};

impl Database {
    /// Moves every hot row older than `cutoff` into the archive table.
    ///
    /// Copy and delete share one immediate transaction and the same predicate,
    /// so a row lands in exactly one of the two tables. A pass with nothing
    /// older than `cutoff` changes nothing.
    pub async fn archive_older_than(
        &self,
        cutoff: NaiveDateTime,
        archived_at: NaiveDateTime,
    ) -> Result<ArchiveSummary> {
        self.execute(move |conn| {
            let cutoff = format_timestamp(&cutoff);
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("failed to open archive transaction")?;

            let copied = tx
                .execute(
                    "INSERT INTO detections_archive (id, timestamp, stork_count, image_path, archived_at)
                     SELECT id, timestamp, stork_count, image_path, ?2
                     FROM detections
                     WHERE timestamp < ?1",
                    params![cutoff, format_timestamp(&archived_at)],
                )
                .context("failed to copy rows into archive")?;

            let deleted = tx
                .execute("DELETE FROM detections WHERE timestamp < ?1", params![cutoff])
                .context("failed to delete archived rows")?;

            if copied != deleted {
                // Dropping the transaction rolls both statements back.
                bail!("archive copied {copied} rows but deleted {deleted}");
            }

            tx.commit().context("failed to commit archive transaction")?;
            Ok(ArchiveSummary { moved: copied })
        })
        .await
    }

    /// Archive contents, oldest first.
    pub async fn archived_detections(&self) -> Result<Vec<ArchivedDetection>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, stork_count, image_path, archived_at
                 FROM detections_archive
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                let timestamp: String = row.get(1)?;
                let stork_count: i64 = row.get(2)?;
                let archived_at: String = row.get(4)?;
                Ok(ArchivedDetection {
                    id: row.get(0)?,
                    timestamp: parse_timestamp(&timestamp, "timestamp")
                        .map_err(conversion_error)?,
                    stork_count: to_u32(stork_count, "stork_count").map_err(conversion_error)?,
                    image_path: row.get(3)?,
                    archived_at: parse_timestamp(&archived_at, "archived_at")
                        .map_err(conversion_error)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("failed to load archived detections")
        })
        .await
    }

    pub async fn archived_count(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM detections_archive", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}
