pub mod aggregate;
pub mod detection;

pub use aggregate::{
    ActivityLevel, CountComparison, CurrentStatus, DailyBucket, DetectionFilter, HourlyBucket,
};
pub use detection::{ArchiveSummary, ArchivedDetection, Detection, NewDetection};
