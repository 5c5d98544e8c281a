//! ==============================================================================
//! domain.rs - typed records at the backend boundary
//! ==============================================================================
//!
//! rows come back from the remote store as loose json. everything is converted
//! into these records on ingress (gateway.rs / comments.rs); a shape mismatch
//! is a MalformedPayload error, never an untyped map flowing inward.
//!
//! ==============================================================================

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

/// time ranges offered by the dashboard, in hours
pub const RANGE_OPTIONS: [u32; 6] = [1, 6, 12, 24, 48, 72];

/// one row of the sensor table, written by the device and read-only here
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: i64,

    /// stored in the `created_at` column
    #[serde(rename = "created_at", deserialize_with = "flexible_timestamp")]
    pub recorded_at: DateTime<Utc>,

    /// celsius; null when the device skipped the sensor
    #[serde(default)]
    pub temperature: Option<f64>,

    /// relative humidity (0-100%)
    #[serde(default)]
    pub humidity: Option<f64>,

    /// light level as reported by the device
    #[serde(default)]
    pub light: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// postgrest `order` suffix
    pub fn as_param(self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// a bounded time range plus a row cap
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesWindow {
    pub start: DateTime<Utc>,
    /// `None` means "up to now"
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
    pub order: SortOrder,
}

impl SeriesWindow {
    /// the last `hours` hours ending at `now`, newest first
    pub fn last_hours(hours: u32, now: DateTime<Utc>, limit: usize) -> Result<Self, ValidationError> {
        if !RANGE_OPTIONS.contains(&hours) {
            return Err(ValidationError::UnsupportedRange(hours));
        }
        Ok(Self {
            start: now - Duration::hours(i64::from(hours)),
            end: None,
            limit,
            order: SortOrder::Descending,
        })
    }

    /// window span rounded to whole hours
    pub fn span_hours(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end.unwrap_or(now);
        let minutes = (end - self.start).num_minutes().max(0);
        (minutes + 30) / 60
    }
}

/// rows for one window, in the order the window asked for
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeriesLoad {
    pub readings: Vec<SensorReading>,
    /// the row cap was hit; older rows in the range may be missing
    pub truncated: bool,
}

impl SeriesLoad {
    pub fn new(readings: Vec<SensorReading>, limit: usize) -> Self {
        let truncated = limit > 0 && readings.len() >= limit;
        Self { readings, truncated }
    }

    /// readings sorted newest first regardless of how they were fetched
    pub fn descending(&self) -> Vec<SensorReading> {
        let mut rows = self.readings.clone();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        rows
    }
}

/// comment kind, stored in the `type` column
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentCategory {
    #[serde(rename = "comment")]
    Endorsement,
    #[serde(rename = "question")]
    Question,
}

impl CommentCategory {
    pub fn label(self) -> &'static str {
        match self {
            CommentCategory::Endorsement => "cheer",
            CommentCategory::Question => "question",
        }
    }
}

/// a row of `user_comments`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<String>,
    pub username: String,
    pub content: String,
    #[serde(rename = "type")]
    pub category: CommentCategory,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// a row of `comment_replies`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: i64,
    pub comment_id: i64,
    #[serde(default)]
    pub user_id: Option<String>,
    pub username: String,
    pub content: String,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// accepts rfc3339 and naive iso-8601 (treated as utc); `timestamp` columns
/// come back without an offset
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
