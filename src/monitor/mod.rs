mod loop_worker;
mod pipeline;

pub use loop_worker::{monitor_loop, MonitorStats, Schedule};
pub use pipeline::{local_now, Clock, CycleReport, Pipeline};
