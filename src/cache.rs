//! ==============================================================================
//! cache.rs - sensor series cache
//! ==============================================================================
//!
//! purpose:
//!     keeps the last load of each window for a fixed ttl so a refresh cycle
//!     does not refetch what it just fetched.
//!
//! policy:
//!     - key: window span rounded to whole hours + limit + order; fixed
//!       (bounded) windows also key on their start/end hour buckets so two
//!       equal-length windows at different positions never share an entry
//!     - hit within ttl: stored rows, no gateway call
//!     - miss / expired: gateway call, result replaces the entry
//!     - failures are not stored
//!     - nothing is evicted; the ui offers six spans, so the map stays tiny
//!     - invalidate_all() drops every entry (manual "refresh" button)
//!
//! one cache per session context, plus the page cache behind the html view
//! (server.rs), which the refresh loop clears on every tick.
//!
//! ==============================================================================

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{SeriesLoad, SeriesWindow, SortOrder};
use crate::error::GatewayError;
use crate::gateway::DataGateway;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowKey {
    span_hours: i64,
    /// (start, end) hour buckets; None for rolling "last N hours" windows
    anchor: Option<(i64, i64)>,
    limit: usize,
    order: SortOrder,
}

fn hour_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(3600)
}

impl WindowKey {
    pub fn of(window: &SeriesWindow, now: DateTime<Utc>) -> Self {
        Self {
            span_hours: window.span_hours(now),
            anchor: window.end.map(|end| (hour_bucket(window.start), hour_bucket(end))),
            limit: window.limit,
            order: window.order,
        }
    }
}

struct CachedSeries {
    fetched_at: Instant,
    load: SeriesLoad,
}

pub struct SeriesCache {
    ttl: Duration,
    entries: HashMap<WindowKey, CachedSeries>,
}

impl Default for SeriesCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SeriesCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: HashMap::new() }
    }

    /// cached rows for `window`, or a fresh gateway fetch
    pub async fn get_or_fetch(
        &mut self,
        gateway: &dyn DataGateway,
        window: &SeriesWindow,
        now: DateTime<Utc>,
    ) -> Result<SeriesLoad, GatewayError> {
        let key = WindowKey::of(window, now);

        if let Some(entry) = self.entries.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                debug!(span_hours = key.span_hours, "series cache hit");
                return Ok(entry.load.clone());
            }
        }

        debug!(span_hours = key.span_hours, "series cache miss");
        let readings = gateway.fetch_readings(window).await?;
        let load = SeriesLoad::new(readings, window.limit);
        self.entries.insert(key, CachedSeries { fetched_at: Instant::now(), load: load.clone() });
        Ok(load)
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
