//! in-process stand-in for the remote store, used by unit tests

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::auth::{AuthProvider, AuthUser};
use crate::domain::{parse_timestamp, SensorReading, SortOrder};
use crate::error::{AuthError, GatewayError};
use crate::gateway::{DataGateway, FilterOp, TableQuery, DEFAULT_READINGS_TABLE};

/// tables as json rows; counts every call so tests can assert on traffic
#[derive(Default)]
pub struct MemoryGateway {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    next_id: AtomicUsize,
    pub reads: AtomicUsize,
    pub inserts: AtomicUsize,
    pub fail_reads: AtomicBool,
    /// simulated backend latency per read
    delay: Option<Duration>,
    /// reads of these tables fail
    failing_tables: Mutex<Vec<String>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_readings(readings: &[SensorReading]) -> Self {
        let gateway = Self::new();
        let rows = readings
            .iter()
            .map(|r| serde_json::to_value(r).expect("reading serializes"))
            .collect();
        gateway.tables.lock().unwrap().insert(DEFAULT_READINGS_TABLE.to_string(), rows);
        gateway
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_reads_on(&self, table: &str) {
        self.failing_tables.lock().unwrap().push(table.to_string());
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(AtomicOrdering::SeqCst)
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.load(AtomicOrdering::SeqCst)
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.lock().unwrap().get(table).cloned().unwrap_or_default()
    }
}

pub fn reading(id: i64, at: DateTime<Utc>, temperature: f64, humidity: f64, light: f64) -> SensorReading {
    SensorReading {
        id,
        recorded_at: at,
        temperature: Some(temperature),
        humidity: Some(humidity),
        light: Some(light),
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => {
            let (x, y) = (as_text(a), as_text(b));
            match (parse_timestamp(&x), parse_timestamp(&y)) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => x.cmp(&y),
            }
        }
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl DataGateway for MemoryGateway {
    async fn query(&self, table: &str, query: &TableQuery) -> Result<Vec<Value>, GatewayError> {
        self.reads.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reads.load(AtomicOrdering::SeqCst) || self.failing_tables.lock().unwrap().iter().any(|t| t == table) {
            return Err(GatewayError::TransportFailure("backend offline".to_string()));
        }

        let mut rows: Vec<Value> = self
            .rows(table)
            .into_iter()
            .filter(|row| {
                query.filters.iter().all(|f| {
                    let Some(cell) = row.get(&f.column) else { return false };
                    let wanted = Value::String(f.value.clone());
                    let ord = compare(cell, &wanted);
                    match f.op {
                        FilterOp::Eq => as_text(cell) == f.value,
                        FilterOp::Gte => ord != Ordering::Less,
                        FilterOp::Lte => ord != Ordering::Greater,
                        FilterOp::In => f
                            .value
                            .trim_matches(|c| c == '(' || c == ')')
                            .split(',')
                            .any(|v| v == as_text(cell)),
                    }
                })
            })
            .collect();

        if let Some((column, order)) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare(&a[column.as_str()], &b[column.as_str()]);
                match order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert_record(&self, table: &str, mut record: Value) -> Result<(), GatewayError> {
        self.inserts.fetch_add(1, AtomicOrdering::SeqCst);
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        if let Value::Object(map) = &mut record {
            map.entry("id").or_insert(Value::from(id as i64));
        }
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(record);
        Ok(())
    }
}

/// provider that accepts one password and counts calls
#[derive(Default)]
pub struct FakeAuth {
    pub calls: AtomicUsize,
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn sign_up(&self, email: &str, _password: &str, display_name: &str) -> Result<AuthUser, AuthError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(AuthUser {
            id: format!("id-{email}"),
            email: Some(email.to_string()),
            display_name: Some(display_name.to_string()),
            access_token: None,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        if password != "secret1" {
            return Err(AuthError::Rejected("Invalid login credentials".to_string()));
        }
        Ok(AuthUser {
            id: "u-1".to_string(),
            email: Some(email.to_string()),
            display_name: Some("Kim".to_string()),
            access_token: Some("jwt".to_string()),
        })
    }

    async fn sign_out(&self, _user: &AuthUser) -> Result<(), AuthError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }
}
