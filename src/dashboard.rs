//! ==============================================================================
//! dashboard.rs - one refresh cycle of the sensor pipeline
//! ==============================================================================
//!
//!     window -> cache (gateway on miss) -> newest-first rows -> stats -> view
//!
//! a failed read does not block the page: the view comes back empty with the
//! error message attached, and the page shows its "no data" state.
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::cache::SeriesCache;
use crate::domain::{SensorReading, SeriesWindow};
use crate::error::ValidationError;
use crate::gateway::DataGateway;
use crate::stats::{compute_stats, recent, SensorStats};

/// rows shown in the "recent measurements" table
pub const RECENT_ROWS: usize = 10;

#[derive(Clone, Debug, Default, Serialize)]
pub struct DashboardView {
    pub hours: u32,
    /// newest first
    pub readings: Vec<SensorReading>,
    pub stats: Option<SensorStats>,
    pub recent: Vec<SensorReading>,
    pub truncated: bool,
    pub row_limit: usize,
    pub error: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl DashboardView {
    pub fn has_data(&self) -> bool {
        self.stats.is_some()
    }
}

pub async fn load_view(
    cache: &mut SeriesCache,
    gateway: &dyn DataGateway,
    hours: u32,
    row_limit: usize,
    now: DateTime<Utc>,
) -> Result<DashboardView, ValidationError> {
    let window = SeriesWindow::last_hours(hours, now, row_limit)?;
    let mut view = DashboardView { hours, row_limit, loaded_at: Some(now), ..Default::default() };

    match cache.get_or_fetch(gateway, &window, now).await {
        Ok(load) => {
            if load.truncated {
                warn!(hours, row_limit, "window hit the row cap; older rows may be missing");
            }
            view.truncated = load.truncated;
            view.readings = load.descending();
            view.stats = compute_stats(&view.readings);
            view.recent = recent(&view.readings, RECENT_ROWS);
        }
        Err(e) => {
            warn!(hours, error = %e, "sensor read failed");
            view.error = Some(e.to_string());
        }
    }
    Ok(view)
}
