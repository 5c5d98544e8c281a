//! ==============================================================================
//! gateway.rs - backend data gateway (postgrest-style REST surface)
//! ==============================================================================
//!
//! purpose:
//!     issues reads and writes against the hosted tabular store and converts
//!     rows into typed records. every failure comes back as a GatewayError;
//!     nothing raises past this boundary.
//!
//! wire surface (consumed, not owned):
//!     GET  {base}/rest/v1/{table}?select=..&{col}=op.value&order=..&limit=..
//!     POST {base}/rest/v1/{table}        json body, single row
//!     headers: apikey, Authorization: Bearer {key}
//!
//! relationships:
//!     - used by: cache.rs (fetch_readings), comments.rs (query / insert_record)
//!     - implemented by: SupabaseGateway here, fakes in tests
//!
//! ==============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{SensorReading, SeriesWindow, SortOrder};
use crate::error::GatewayError;

/// sensor table used when the config does not name one
pub const DEFAULT_READINGS_TABLE: &str = "maintable2";

const READING_COLUMNS: &str = "id,created_at,light,temperature,humidity";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
    /// value is a parenthesised list: `(1,2,3)`
    In,
}

impl FilterOp {
    fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: impl ToString) -> Self {
        Self { column: column.to_string(), op: FilterOp::Eq, value: value.to_string() }
    }

    pub fn gte(column: &str, value: impl ToString) -> Self {
        Self { column: column.to_string(), op: FilterOp::Gte, value: value.to_string() }
    }

    pub fn lte(column: &str, value: impl ToString) -> Self {
        Self { column: column.to_string(), op: FilterOp::Lte, value: value.to_string() }
    }

    pub fn is_in<T: ToString>(column: &str, values: &[T]) -> Self {
        let list = values.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        Self { column: column.to_string(), op: FilterOp::In, value: format!("({list})") }
    }
}

/// generic read: select / filters / order / limit
#[derive(Clone, Debug, PartialEq)]
pub struct TableQuery {
    pub select: String,
    pub filters: Vec<Filter>,
    pub order: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl Default for TableQuery {
    fn default() -> Self {
        Self { select: "*".to_string(), filters: Vec::new(), order: None, limit: None }
    }
}

impl TableQuery {
    pub fn select(mut self, columns: &str) -> Self {
        self.select = columns.to_string();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, column: &str, order: SortOrder) -> Self {
        self.order = Some((column.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// query-string pairs; a column may appear more than once (gte + lte)
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.select.clone())];
        for f in &self.filters {
            params.push((f.column.clone(), format!("{}.{}", f.op.as_str(), f.value)));
        }
        if let Some((column, order)) = &self.order {
            params.push(("order".to_string(), format!("{}.{}", column, order.as_param())));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

/// read/write access to the remote store
#[async_trait]
pub trait DataGateway: Send + Sync {
    /// generic read used by the comment/reply tables
    async fn query(&self, table: &str, query: &TableQuery) -> Result<Vec<Value>, GatewayError>;

    /// single-row insert; no retry
    async fn insert_record(&self, table: &str, record: Value) -> Result<(), GatewayError>;

    fn readings_table(&self) -> &str {
        DEFAULT_READINGS_TABLE
    }

    /// sensor rows inside `window`, sorted per `window.order`, at most `window.limit`
    async fn fetch_readings(&self, window: &SeriesWindow) -> Result<Vec<SensorReading>, GatewayError> {
        let mut query = TableQuery::default()
            .select(READING_COLUMNS)
            .filter(Filter::gte("created_at", window.start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)))
            .order("created_at", window.order)
            .limit(window.limit);
        if let Some(end) = window.end {
            query = query.filter(Filter::lte("created_at", end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
        }

        let rows = self.query(self.readings_table(), &query).await?;
        let mut readings = rows
            .into_iter()
            .map(serde_json::from_value::<SensorReading>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::MalformedPayload(format!("sensor row: {e}")))?;

        // the backend already sorts and caps; enforce it anyway
        match window.order {
            SortOrder::Ascending => readings.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at)),
            SortOrder::Descending => readings.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at)),
        }
        readings.truncate(window.limit);
        Ok(readings)
    }
}

/// REST client for a hosted postgrest backend
#[derive(Debug, Clone)]
pub struct SupabaseGateway {
    client: reqwest::Client,
    base_url: String,
    readings_table: String,
}

impl SupabaseGateway {
    pub fn new(base_url: &str, api_key: &str, timeout: Option<Duration>) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(api_key)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {api_key}"))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| GatewayError::TransportFailure(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            readings_table: DEFAULT_READINGS_TABLE.to_string(),
        })
    }

    pub fn with_readings_table(mut self, table: &str) -> Self {
        self.readings_table = table.to_string();
        self
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(raw)
        .map_err(|e| GatewayError::TransportFailure(format!("invalid header value: {e}")))
}

#[async_trait]
impl DataGateway for SupabaseGateway {
    async fn query(&self, table: &str, query: &TableQuery) -> Result<Vec<Value>, GatewayError> {
        let response = self
            .client
            .get(self.endpoint(table))
            .query(&query.to_params())
            .send()
            .await
            .map_err(|e| {
                warn!(table, error = %e, "backend read failed");
                GatewayError::TransportFailure(e.to_string())
            })?;

        let status = response.status();
        let body = response.text().await?;
        if status.as_u16() != 200 {
            warn!(table, status = status.as_u16(), "backend read rejected");
            return Err(GatewayError::NonSuccessStatus { status: status.as_u16(), body });
        }

        let rows: Vec<Value> = serde_json::from_str(&body)
            .map_err(|e| GatewayError::MalformedPayload(format!("{table}: {e}")))?;
        debug!(table, rows = rows.len(), "backend read ok");
        Ok(rows)
    }

    async fn insert_record(&self, table: &str, record: Value) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.endpoint(table))
            .header("Prefer", "return=representation")
            .json(&record)
            .send()
            .await
            .map_err(|e| {
                warn!(table, error = %e, "backend insert failed");
                GatewayError::TransportFailure(e.to_string())
            })?;

        let status = response.status().as_u16();
        if status == 200 || status == 201 {
            debug!(table, status, "backend insert ok");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        warn!(table, status, "backend insert rejected");
        Err(GatewayError::NonSuccessStatus { status, body })
    }

    fn readings_table(&self) -> &str {
        &self.readings_table
    }
}
