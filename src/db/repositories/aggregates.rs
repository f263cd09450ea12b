use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, to_u32},
    models::{ActivityLevel, CurrentStatus, DailyBucket, HourlyBucket},
};

use super::detections::row_to_detection;

const HOURS_PER_DAY: u32 = 24;

fn hourly_buckets(conn: &rusqlite::Connection) -> Result<Vec<HourlyBucket>> {
    let mut buckets: Vec<HourlyBucket> = (0..HOURS_PER_DAY)
        .map(|hour| HourlyBucket {
            label: format!("{hour:02}:00"),
            hour,
            average_count: 0.0,
            samples: 0,
        })
        .collect();

    let mut stmt = conn.prepare(
        "SELECT CAST(strftime('%H', timestamp) AS INTEGER) AS hour,
                AVG(stork_count),
                COUNT(*)
         FROM detections
         GROUP BY hour",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let hour = to_u32(row.get::<_, i64>(0)?, "hour")?;
        let Some(bucket) = buckets.get_mut(hour as usize) else {
            continue;
        };
        bucket.average_count = row.get(1)?;
        bucket.samples = to_u32(row.get::<_, i64>(2)?, "samples")?;
    }

    Ok(buckets)
}

/// Hour with the highest mean count; the earliest hour wins a tie.
pub fn busiest_hour(buckets: &[HourlyBucket]) -> Option<HourlyBucket> {
    buckets
        .iter()
        .filter(|bucket| bucket.samples > 0)
        .fold(None::<&HourlyBucket>, |best, bucket| match best {
            Some(current) if current.average_count >= bucket.average_count => Some(current),
            _ => Some(bucket),
        })
        .cloned()
}

impl Database {
    /// Always 24 buckets, `"00:00"` to `"23:00"`.
    pub async fn hourly_averages(&self) -> Result<Vec<HourlyBucket>> {
        self.execute(|conn| hourly_buckets(conn).context("failed to aggregate by hour"))
            .await
    }

    /// One bucket per day with rows on or after `since`, oldest first.
    pub async fn daily_averages(&self, since: NaiveDate) -> Result<Vec<DailyBucket>> {
        let since = format_timestamp(&since.and_time(NaiveTime::MIN));
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT date(timestamp) AS day,
                        AVG(stork_count),
                        MAX(stork_count),
                        COUNT(*)
                 FROM detections
                 WHERE timestamp >= ?1
                 GROUP BY day
                 ORDER BY day ASC",
            )?;
            let mut rows = stmt.query(params![since])?;
            let mut buckets = Vec::new();
            while let Some(row) = rows.next()? {
                let day: String = row.get(0)?;
                buckets.push(DailyBucket {
                    day: NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                        .with_context(|| format!("failed to parse day '{day}'"))?,
                    average_count: row.get(1)?,
                    max_count: to_u32(row.get::<_, i64>(2)?, "max_count")?,
                    samples: to_u32(row.get::<_, i64>(3)?, "samples")?,
                });
            }
            Ok(buckets)
        })
        .await
    }

    pub async fn current_status(&self) -> Result<Option<CurrentStatus>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, stork_count, image_path FROM detections
                 ORDER BY id DESC
                 LIMIT 1",
            )?;
            let mut rows = stmt.query_map([], row_to_detection)?;
            let Some(latest) = rows.next().transpose()? else {
                return Ok(None);
            };

            let buckets = hourly_buckets(conn)?;
            Ok(Some(CurrentStatus {
                status: ActivityLevel::from_count(latest.stork_count),
                latest,
                busiest_hour: busiest_hour(&buckets),
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewDetection;
    use chrono::{Duration, NaiveDateTime};

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store.sqlite3")).unwrap();
        (dir, db)
    }

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    async fn insert(db: &Database, timestamp: NaiveDateTime, stork_count: u32) {
        db.insert_detection(&NewDetection {
            timestamp,
            stork_count,
            image_path: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn hourly_has_24_labeled_buckets_with_means() {
        let (_dir, db) = open();
        // Two samples per hour for even hours, none for odd hours.
        for hour in (0..24).step_by(2) {
            insert(&db, at(1, hour, 10), hour).await;
            insert(&db, at(2, hour, 40), hour + 2).await;
        }

        let buckets = db.hourly_averages().await.unwrap();
        assert_eq!(buckets.len(), 24);
        assert_eq!(buckets[0].label, "00:00");
        assert_eq!(buckets[23].label, "23:00");
        for bucket in &buckets {
            if bucket.hour % 2 == 0 {
                assert_eq!(bucket.samples, 2);
                assert!((bucket.average_count - (bucket.hour as f64 + 1.0)).abs() < 1e-9);
            } else {
                assert_eq!(bucket.samples, 0);
                assert_eq!(bucket.average_count, 0.0);
            }
        }
    }

    #[tokio::test]
    async fn hourly_on_empty_store_is_all_zero() {
        let (_dir, db) = open();
        let buckets = db.hourly_averages().await.unwrap();
        assert_eq!(buckets.len(), 24);
        assert!(buckets.iter().all(|b| b.average_count == 0.0 && b.samples == 0));
        assert!(db.current_status().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_reports_latest_and_busiest_hour() {
        let (_dir, db) = open();
        insert(&db, at(3, 6, 0), 1).await;
        let start = at(3, 14, 20);
        for (offset, count) in [0u32, 3, 0, 5].into_iter().enumerate() {
            insert(&db, start + Duration::minutes(offset as i64), count).await;
        }

        let status = db.current_status().await.unwrap().unwrap();
        assert_eq!(status.latest.stork_count, 5);
        assert_eq!(status.latest.timestamp, start + Duration::minutes(3));
        assert_eq!(status.status, ActivityLevel::Busy);
        assert_eq!(status.status.as_str(), "Busy");

        let busiest = status.busiest_hour.unwrap();
        assert_eq!(busiest.hour, 14);
        assert!((busiest.average_count - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn status_uses_last_inserted_row_after_clock_steps_back() {
        let (_dir, db) = open();
        insert(&db, at(26, 2, 50), 0).await;
        insert(&db, at(26, 2, 10), 4).await;

        let status = db.current_status().await.unwrap().unwrap();
        assert_eq!(status.latest.stork_count, 4);
        assert_eq!(status.latest.timestamp, at(26, 2, 10));
        assert_eq!(status.status, ActivityLevel::Busy);
    }

    #[tokio::test]
    async fn daily_buckets_respect_start_date() {
        let (_dir, db) = open();
        insert(&db, at(1, 9, 0), 8).await;
        insert(&db, at(2, 9, 0), 2).await;
        insert(&db, at(2, 18, 0), 4).await;
        insert(&db, at(3, 7, 0), 1).await;

        let days = db
            .daily_averages(NaiveDate::from_ymd_opt(2025, 5, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].day, NaiveDate::from_ymd_opt(2025, 5, 2).unwrap());
        assert_eq!(days[0].samples, 2);
        assert_eq!(days[0].max_count, 4);
        assert!((days[0].average_count - 3.0).abs() < 1e-9);
        assert_eq!(days[1].max_count, 1);
    }

    #[test]
    fn busiest_hour_prefers_earliest_on_tie() {
        let bucket = |hour: u32, average_count: f64, samples: u32| HourlyBucket {
            label: format!("{hour:02}:00"),
            hour,
            average_count,
            samples,
        };
        let buckets = vec![bucket(3, 0.0, 0), bucket(7, 4.0, 2), bucket(9, 4.0, 1), bucket(11, 1.0, 5)];
        assert_eq!(busiest_hour(&buckets).unwrap().hour, 7);
        assert!(busiest_hour(&[bucket(0, 0.0, 0)]).is_none());
    }
}
