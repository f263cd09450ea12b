//! Detection record models.
//!
//! One `Detection` is written per successful monitoring cycle. Rows past the
//! retention window move to the archive table as `ArchivedDetection`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A row of the hot `detections` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub stork_count: u32,
    pub image_path: Option<String>,
}

/// Values for a row that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    pub timestamp: NaiveDateTime,
    pub stork_count: u32,
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedDetection {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub stork_count: u32,
    pub image_path: Option<String>,
    pub archived_at: NaiveDateTime,
}

/// Outcome of one archival pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSummary {
    pub moved: usize,
}
