//! ==============================================================================
//! stats.rs - per-metric aggregation over a loaded window
//! ==============================================================================
//!
//! current / mean / max / min for temperature, humidity and light.
//! null values are left out of that metric's aggregate (never counted as zero);
//! a metric with no values at all has no stats. an empty window yields None and
//! the page shows its "no data" state instead.
//!
//! "current" is the value from the latest reading that reports the metric, so
//! the result does not depend on whether the rows came newest-first or not.
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::SensorReading;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MetricStats {
    pub current: f64,
    pub mean: f64,
    pub max: f64,
    pub min: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorStats {
    pub temperature: Option<MetricStats>,
    pub humidity: Option<MetricStats>,
    pub light: Option<MetricStats>,
    /// rows in the window
    pub count: usize,
    /// timestamp of the latest reading
    pub latest_at: DateTime<Utc>,
}

pub fn compute_stats(series: &[SensorReading]) -> Option<SensorStats> {
    let latest_at = series.iter().map(|r| r.recorded_at).max()?;
    Some(SensorStats {
        temperature: metric(series, |r| r.temperature),
        humidity: metric(series, |r| r.humidity),
        light: metric(series, |r| r.light),
        count: series.len(),
        latest_at,
    })
}

fn metric(series: &[SensorReading], value: impl Fn(&SensorReading) -> Option<f64>) -> Option<MetricStats> {
    let mut current: Option<(DateTime<Utc>, f64)> = None;
    let mut sum = 0.0;
    let mut n = 0usize;
    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;

    for reading in series {
        let Some(v) = value(reading).filter(|v| v.is_finite()) else { continue };
        sum += v;
        n += 1;
        max = max.max(v);
        min = min.min(v);
        // ties keep the first row seen (index 0 of a newest-first series)
        if current.map_or(true, |(at, _)| reading.recorded_at > at) {
            current = Some((reading.recorded_at, v));
        }
    }

    let (_, current) = current?;
    Some(MetricStats { current, mean: sum / n as f64, max, min })
}

/// the `n` most recent readings, newest first
pub fn recent(series: &[SensorReading], n: usize) -> Vec<SensorReading> {
    let mut rows = series.to_vec();
    rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
    rows.truncate(n);
    rows
}
