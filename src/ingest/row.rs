//! Core data types of the ingestion boundary
//!
//! - `Label`: one name/value pair of a series
//! - `Row`: a single ingested point (metric, labels, timestamp, value)
//! - `TimeRange`: a `[start, end)` interval for searches

use crate::storage::METRIC_NAME_LABEL;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A label of a series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.name, self.value)
    }
}

/// A single ingested row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Metric name (indexed as `__name__`)
    pub metric: String,
    /// Labels in arrival order
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    /// Raw sample text or log line
    #[serde(default)]
    pub value: String,
}

impl Row {
    /// Create a row stamped with the current time
    pub fn new(metric: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            labels: Vec::new(),
            timestamp: now_millis(),
            value: value.into(),
        }
    }

    /// Builder method: set timestamp
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Builder method: add a label
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(Label::new(name, value));
        self
    }

    /// Labels in canonical order: `__name__` first, then by name
    ///
    /// Labels with an empty value are dropped; for duplicate names the last
    /// one wins.
    pub fn canonical_labels(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = Vec::with_capacity(self.labels.len() + 1);
        for label in self.labels.iter().rev() {
            if label.value.is_empty() || label.name == METRIC_NAME_LABEL {
                continue;
            }
            if labels.iter().any(|l| l.name == label.name) {
                continue;
            }
            labels.push(label.clone());
        }
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        labels.insert(0, Label::new(METRIC_NAME_LABEL, self.metric.clone()));
        labels
    }
}

/// Search time interval in milliseconds, `start` inclusive, `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

impl TimeRange {
    /// Create a time range, returning None if `start > end`
    ///
    /// `start == end` is allowed.
    pub fn try_new(start: u64, end: u64) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Range for the last N hours from now
    pub fn last_hours(hours: u64) -> Self {
        let end = now_millis();
        let start = end.saturating_sub(hours * 3600 * 1000);
        Self { start, end }
    }

    /// Range for the last N days from now
    pub fn last_days(days: u64) -> Self {
        Self::last_hours(days * 24)
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: u64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

/// Current Unix time in milliseconds
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
