//! Read projections served to the dashboard.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};

use super::Detection;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HourlyBucket {
    /// `"HH:00"`
    pub label: String,
    pub hour: u32,
    pub average_count: f64,
    pub samples: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyBucket {
    pub day: NaiveDate,
    pub average_count: f64,
    pub max_count: u32,
    pub samples: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActivityLevel {
    Empty,
    Active,
    Busy,
}

impl ActivityLevel {
    pub fn from_count(count: u32) -> Self {
        match count {
            0 => ActivityLevel::Empty,
            1..=2 => ActivityLevel::Active,
            _ => ActivityLevel::Busy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLevel::Empty => "Empty",
            ActivityLevel::Active => "Active",
            ActivityLevel::Busy => "Busy",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStatus {
    pub latest: Detection,
    pub status: ActivityLevel,
    pub busiest_hour: Option<HourlyBucket>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CountComparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CountComparison {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CountComparison::Eq => "=",
            CountComparison::Ne => "!=",
            CountComparison::Lt => "<",
            CountComparison::Le => "<=",
            CountComparison::Gt => ">",
            CountComparison::Ge => ">=",
        }
    }
}

impl fmt::Display for CountComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for CountComparison {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "=" | "==" | "eq" => Ok(CountComparison::Eq),
            "!=" | "ne" => Ok(CountComparison::Ne),
            "<" | "lt" => Ok(CountComparison::Lt),
            "<=" | "le" => Ok(CountComparison::Le),
            ">" | "gt" => Ok(CountComparison::Gt),
            ">=" | "ge" => Ok(CountComparison::Ge),
            other => Err(anyhow!("unknown count comparison '{other}'")),
        }
    }
}

/// Parameters of `filter_detections`. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionFilter {
    pub count: Option<(CountComparison, u32)>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}
