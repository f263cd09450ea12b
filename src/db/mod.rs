mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{
    ActivityLevel, ArchiveSummary, ArchivedDetection, CountComparison, CurrentStatus, DailyBucket,
    Detection, DetectionFilter, HourlyBucket, NewDetection,
};
