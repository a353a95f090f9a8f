//! Shared fixtures for integration tests: a scripted transport and builders
//! for ESRI / NOMIS response bodies.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use geolookup::{
    CatalogRequest, CatalogTransport, MapSettings, RawResponse, SourceSettings, TransportError,
};
use serde_json::{json, Value};

type Handler = dyn Fn(&CatalogRequest) -> Result<RawResponse, TransportError> + Send + Sync;

/// Transport that answers every request through a closure and records it
pub struct ScriptedTransport {
    handler: Box<Handler>,
    delay: Duration,
    requests: Mutex<Vec<CatalogRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&CatalogRequest) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Simulated network latency per request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<CatalogRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose query has `key=value`
    pub fn count_with_param(&self, key: &str, value: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| query_param(&r.url, key).as_deref() == Some(value))
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogTransport for ScriptedTransport {
    async fn get(&self, request: CatalogRequest) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = (self.handler)(&request);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

pub fn query_param(url: &str, key: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

pub fn offset_of(request: &CatalogRequest, param: &str) -> usize {
    query_param(&request.url, param)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

pub fn is_count_request(request: &CatalogRequest) -> bool {
    query_param(&request.url, "returnCountOnly").as_deref() == Some("true")
}

// =============================================================================
// Response bodies
// =============================================================================

/// ESRI query page from attribute objects
pub fn esri_page(rows: &[Value], exceeded_transfer_limit: bool) -> RawResponse {
    let features: Vec<Value> = rows.iter().map(|r| json!({ "attributes": r })).collect();
    RawResponse::ok(
        json!({
            "objectIdFieldName": "FID",
            "features": features,
            "exceededTransferLimit": exceeded_transfer_limit,
        })
        .to_string(),
    )
}

pub fn esri_count(count: usize) -> RawResponse {
    RawResponse::ok(json!({ "count": count }).to_string())
}

pub fn esri_error(code: i64, message: &str) -> RawResponse {
    RawResponse::ok(json!({ "error": { "code": code, "message": message, "details": [] } }).to_string())
}

/// `count` local authority rows `E090000nn` with names `LA nn`
pub fn lad_rows(count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| json!({ "LAD23CD": format!("E09{:06}", i), "LAD23NM": format!("LA {}", i), "FID": i }))
        .collect()
}

/// ESRI handler serving `rows` with a server-side cap per page
pub fn esri_server(
    rows: Vec<Value>,
    server_cap: usize,
) -> impl Fn(&CatalogRequest) -> Result<RawResponse, TransportError> + Send + Sync + 'static {
    move |request| {
        if is_count_request(request) {
            return Ok(esri_count(rows.len()));
        }
        let offset = offset_of(request, "resultOffset");
        let limit = offset_of(request, "resultRecordCount").min(server_cap);
        let start = offset.min(rows.len());
        let end = (offset + limit).min(rows.len());
        Ok(esri_page(&rows[start..end], end < rows.len()))
    }
}

pub fn nomis_csv(header: &str, rows: &[String]) -> RawResponse {
    let mut body = String::from(header);
    body.push('\n');
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    RawResponse::ok(body)
}

// =============================================================================
// Settings
// =============================================================================

/// Settings with no rate-limit spacing and millisecond backoff
pub fn fast_settings(source: &str, base_url: &str) -> SourceSettings {
    SourceSettings::new(source, base_url)
        .with_min_interval(Duration::ZERO)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
        .with_max_retries(3)
}

/// Provider equivalent of [`fast_settings`] for pipeline tests
pub fn fast_provider(sources: &[(&str, &str)]) -> MapSettings {
    sources.iter().fold(MapSettings::new(), |settings, (source, base_url)| {
        settings
            .with(format!("{}.base_url", source), *base_url)
            .with(format!("{}.min_interval_ms", source), "0")
            .with(format!("{}.backoff_base_ms", source), "1")
            .with(format!("{}.backoff_max_ms", source), "5")
            .with(format!("{}.max_retries", source), "3")
    })
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
