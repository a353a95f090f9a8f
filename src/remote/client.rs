//! Remote catalog client
//!
//! Rate-limited, retried, paginated fetches of one dataset from one source.
//! Transient page failures are absorbed into partial-table metadata; schema,
//! authentication and not-found failures end the fetch immediately.

use super::codec::{decode_count, decode_page, parse_json, DecodeError, DecodedPage, RawRow};
use super::dataset::DatasetSpec;
use super::retry::{backoff_delay, AttemptOutcome, PageState};
use super::transport::{CatalogRequest, CatalogTransport, RawResponse};
use crate::config::{Credential, SourceSettings};
use crate::error::{FailureKind, LookupError, PageRef, Result, SourceFailure};
use crate::model::{CellValue, GeographyCode, LookupRecord, LookupTable};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Upper bound on pages per dataset when the service never signals the end
const MAX_PAGES: usize = 10_000;

/// Error from one attempt, already classified
#[derive(Debug)]
enum AttemptError {
    Transient(String),
    Fatal(LookupError),
}

/// Final outcome of a retried request
#[derive(Debug)]
enum Fetched<T> {
    Done(T),
    Exhausted { attempts: u32, last_error: String },
    Fatal(LookupError),
    Cancelled,
}

/// Client for one remote source
pub struct RemoteCatalogClient {
    settings: SourceSettings,
    transport: Arc<dyn CatalogTransport>,
    last_request: Mutex<Option<Instant>>,
}

impl RemoteCatalogClient {
    pub fn new(settings: SourceSettings, transport: Arc<dyn CatalogTransport>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            transport,
            last_request: Mutex::new(None),
        })
    }

    pub fn source(&self) -> &str {
        &self.settings.source
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Enforce minimum spacing between request starts
    async fn rate_limit(&self) {
        if self.settings.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.settings.min_interval {
                sleep(self.settings.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn request(&self, url: String) -> CatalogRequest {
        let request = CatalogRequest::get(url).with_timeout(self.settings.request_timeout);
        match &self.settings.credential {
            Credential::Bearer(token) => request.with_bearer(token.clone()),
            _ => request,
        }
    }

    fn page_size_for(&self, spec: &DatasetSpec) -> usize {
        let max = spec.codec.max_page_size();
        if self.settings.page_size > max {
            tracing::warn!(
                source = %self.settings.source,
                dataset = %spec.name,
                requested = self.settings.page_size,
                max,
                "Page size above service maximum, clamping"
            );
            max
        } else {
            self.settings.page_size
        }
    }

    // =========================================================================
    // Retry driver
    // =========================================================================

    /// Run one request through the retry state machine
    async fn with_retry<T, F>(
        &self,
        dataset: &str,
        url: &str,
        cancel: &CancellationToken,
        decode: F,
    ) -> Fetched<T>
    where
        F: Fn(&RawResponse) -> std::result::Result<T, AttemptError>,
    {
        let policy = self.settings.retry;
        let mut state = PageState::Pending;
        let mut last_error = String::new();

        loop {
            if cancel.is_cancelled() {
                return Fetched::Cancelled;
            }

            let failed = state.failed_attempts();
            if failed > 0 {
                let delay = backoff_delay(&policy, failed);
                tracing::warn!(
                    source = %self.settings.source,
                    dataset,
                    attempt = failed + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Retrying request"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Fetched::Cancelled,
                    _ = sleep(delay) => {}
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Fetched::Cancelled,
                _ = self.rate_limit() => {}
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => return Fetched::Cancelled,
                r = self.transport.get(self.request(url.to_string())) => r,
            };

            let result = match response {
                Ok(raw) => self.check_status(dataset, &raw).and_then(|_| decode(&raw)),
                Err(e) => Err(AttemptError::Transient(e.to_string())),
            };

            match result {
                Ok(value) => return Fetched::Done(value),
                Err(AttemptError::Fatal(e)) => {
                    state = state.advance(AttemptOutcome::Fatal, &policy);
                    debug_assert_eq!(state, PageState::FailedTerminal);
                    return Fetched::Fatal(e);
                }
                Err(AttemptError::Transient(message)) => {
                    last_error = message;
                    state = state.advance(AttemptOutcome::Transient, &policy);
                    if state == PageState::FailedTerminal {
                        return Fetched::Exhausted {
                            attempts: policy.max_attempts,
                            last_error,
                        };
                    }
                }
            }
        }
    }

    /// Classify the HTTP status line
    fn check_status(&self, dataset: &str, raw: &RawResponse) -> std::result::Result<(), AttemptError> {
        if raw.is_success() {
            return Ok(());
        }
        Err(self.classify_code(dataset, raw.status as i64, raw.snippet()))
    }

    /// Map an HTTP status or ESRI error code onto the failure taxonomy
    fn classify_code(&self, dataset: &str, code: i64, message: String) -> AttemptError {
        match code {
            401 | 403 | 498 | 499 => AttemptError::Fatal(LookupError::Authentication {
                source_id: self.settings.source.clone(),
                message: format!("{}: {}", code, message),
            }),
            404 => AttemptError::Fatal(LookupError::DatasetNotFound {
                dataset: dataset.to_string(),
            }),
            408 | 429 | 500..=599 => AttemptError::Transient(format!("HTTP {}: {}", code, message)),
            _ => AttemptError::Fatal(LookupError::SchemaMismatch {
                dataset: dataset.to_string(),
                message: format!("remote rejected query ({}): {}", code, message),
            }),
        }
    }

    fn classify_decode(&self, dataset: &str, e: DecodeError) -> AttemptError {
        match e {
            DecodeError::Remote { code, message } => self.classify_code(dataset, code, message),
            DecodeError::Malformed(message) => AttemptError::Fatal(LookupError::SchemaMismatch {
                dataset: dataset.to_string(),
                message,
            }),
        }
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Fetch a single JSON document with retries (service metadata, catalogs)
    pub async fn fetch_json(
        &self,
        label: &str,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let outcome = self
            .with_retry(label, url, cancel, |raw| {
                parse_json(&raw.body).map_err(|e| self.classify_decode(label, e))
            })
            .await;

        match outcome {
            Fetched::Done(value) => Ok(value),
            Fetched::Fatal(e) => Err(e),
            Fetched::Cancelled => Err(LookupError::Cancelled),
            Fetched::Exhausted {
                attempts,
                last_error,
            } => Err(LookupError::TransientFetch {
                dataset: label.to_string(),
                message: format!("gave up after {} attempts: {}", attempts, last_error),
            }),
        }
    }

    /// Fetch every page of a dataset into a lookup table.
    ///
    /// Pages that exhaust their retries or are cut short by cancellation mark
    /// the table partial and are listed in its provenance; everything fetched
    /// before (and, with a known total, around) them is kept.
    pub async fn fetch_all(
        &self,
        spec: &DatasetSpec,
        cancel: &CancellationToken,
    ) -> Result<LookupTable> {
        spec.validate()?;
        let page_size = self.page_size_for(spec);
        let started = Instant::now();

        let mut table = LookupTable::new(
            spec.output_code_column(),
            spec.output_columns(),
            &self.settings.source,
        );
        let mut projector = Projector::new(spec);

        tracing::info!(
            source = %self.settings.source,
            dataset = %spec.name,
            page_size,
            concurrency = self.settings.concurrency,
            "Fetching dataset"
        );

        // Up-front count lets the remaining pages run in parallel
        let mut total = match self.fetch_count(spec, cancel).await {
            Ok(total) => total,
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    source = %self.settings.source,
                    dataset = %spec.name,
                    error = %e,
                    "Count request failed, paging sequentially"
                );
                None
            }
            Err(LookupError::Cancelled) => {
                table.provenance.record_failure(self.cancelled_failure(spec, 0, 0));
                return Ok(table);
            }
            Err(e) => return Err(e),
        };

        // First page is always sequential: it reveals server-side caps and totals
        let first = match self.fetch_page(spec, 0, 0, page_size, cancel).await {
            Fetched::Done(page) => page,
            other => {
                self.absorb_failure(spec, &mut table, other, 0, 0)?;
                return Ok(table);
            }
        };
        total = total.or(first.total);
        let first_len = first.rows.len();
        // A short first page with more records to come means the server caps pages
        let more_to_come = first.more == Some(true) || total.is_some_and(|t| t > first_len as u64);
        let server_capped = more_to_come && first_len > 0 && first_len < page_size;
        let step = if server_capped { first_len } else { page_size };
        if server_capped {
            tracing::debug!(
                source = %self.settings.source,
                dataset = %spec.name,
                requested = page_size,
                served = first_len,
                "Server caps page size, stepping by served rows"
            );
        }
        let mut more = page_has_more(&first, step);
        projector.accept(spec, &mut table, first.rows)?;
        table.provenance.page_count += 1;

        match total {
            Some(total) => {
                let (offsets, truncated) = remaining_offsets(total, step);

                let mut pages = stream::iter(offsets.into_iter().enumerate())
                    .map(|(i, offset)| async move {
                        let index = i + 1;
                        (index, offset, self.fetch_page(spec, index, offset, step, cancel).await)
                    })
                    .buffered(self.settings.concurrency);

                while let Some((index, offset, fetched)) = pages.next().await {
                    match fetched {
                        Fetched::Done(page) => {
                            projector.accept(spec, &mut table, page.rows)?;
                            table.provenance.page_count += 1;
                        }
                        other => self.absorb_failure(spec, &mut table, other, index, offset)?,
                    }
                }
                if let Some(page) = truncated {
                    table
                        .provenance
                        .record_failure(self.page_limit_failure(spec, page));
                }
            }
            None => {
                let mut offset = first_len as u64;
                let mut index = 1;
                while more {
                    if index >= MAX_PAGES {
                        table
                            .provenance
                            .record_failure(self.page_limit_failure(spec, PageRef { index, offset }));
                        break;
                    }
                    match self.fetch_page(spec, index, offset, step, cancel).await {
                        Fetched::Done(page) => {
                            more = page_has_more(&page, step);
                            let len = page.rows.len();
                            projector.accept(spec, &mut table, page.rows)?;
                            table.provenance.page_count += 1;
                            offset += len as u64;
                            index += 1;
                        }
                        other => {
                            self.absorb_failure(spec, &mut table, other, index, offset)?;
                            break;
                        }
                    }
                }
            }
        }

        table.fill_missing_columns();
        projector.report(&self.settings.source, spec);

        tracing::info!(
            source = %self.settings.source,
            dataset = %spec.name,
            records = table.len(),
            pages = table.provenance.page_count,
            partial = table.is_partial(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Dataset fetched"
        );
        Ok(table)
    }

    async fn fetch_count(&self, spec: &DatasetSpec, cancel: &CancellationToken) -> Result<Option<u64>> {
        let Some(url) = spec.count_url(&self.settings.base_url, &self.settings.credential)? else {
            return Ok(None);
        };
        let outcome = self
            .with_retry(&spec.name, url.as_str(), cancel, |raw| {
                decode_count(&raw.body).map_err(|e| self.classify_decode(&spec.name, e))
            })
            .await;

        match outcome {
            Fetched::Done(count) => {
                tracing::debug!(dataset = %spec.name, count, "Record count");
                Ok(Some(count))
            }
            Fetched::Fatal(e) => Err(e),
            Fetched::Cancelled => Err(LookupError::Cancelled),
            Fetched::Exhausted { last_error, .. } => Err(LookupError::TransientFetch {
                dataset: spec.name.clone(),
                message: last_error,
            }),
        }
    }

    async fn fetch_page(
        &self,
        spec: &DatasetSpec,
        index: usize,
        offset: u64,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Fetched<DecodedPage> {
        let url = match spec.page_url(
            &self.settings.base_url,
            &self.settings.credential,
            offset,
            limit,
        ) {
            Ok(url) => url,
            Err(e) => return Fetched::Fatal(e),
        };

        let fetched = self
            .with_retry(&spec.name, url.as_str(), cancel, |raw| {
                decode_page(&spec.codec, &raw.body).map_err(|e| self.classify_decode(&spec.name, e))
            })
            .await;

        if let Fetched::Done(page) = &fetched {
            tracing::debug!(
                source = %self.settings.source,
                dataset = %spec.name,
                page = index,
                offset,
                rows = page.rows.len(),
                "Fetched page"
            );
        }
        fetched
    }

    /// Turn a failed page into partial metadata, or propagate a fatal error
    fn absorb_failure(
        &self,
        spec: &DatasetSpec,
        table: &mut LookupTable,
        outcome: Fetched<DecodedPage>,
        index: usize,
        offset: u64,
    ) -> Result<()> {
        let failure = match outcome {
            Fetched::Done(_) => return Ok(()),
            Fetched::Fatal(e) => return Err(e),
            Fetched::Cancelled => self.cancelled_failure(spec, index, offset),
            Fetched::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::warn!(
                    source = %self.settings.source,
                    dataset = %spec.name,
                    page = index,
                    offset,
                    attempts,
                    "Page failed after retries, table will be partial"
                );
                SourceFailure {
                    source: self.settings.source.clone(),
                    dataset: spec.name.clone(),
                    page: Some(PageRef { index, offset }),
                    kind: FailureKind::TransientExhausted { attempts },
                    message: last_error,
                }
            }
        };
        table.provenance.record_failure(failure);
        Ok(())
    }

    fn page_limit_failure(&self, spec: &DatasetSpec, page: PageRef) -> SourceFailure {
        tracing::warn!(
            source = %self.settings.source,
            dataset = %spec.name,
            max_pages = MAX_PAGES,
            offset = page.offset,
            "Reached max pages, stopping"
        );
        SourceFailure {
            source: self.settings.source.clone(),
            dataset: spec.name.clone(),
            page: Some(page),
            kind: FailureKind::Other,
            message: format!("stopped after {} pages", MAX_PAGES),
        }
    }

    fn cancelled_failure(&self, spec: &DatasetSpec, index: usize, offset: u64) -> SourceFailure {
        tracing::info!(
            source = %self.settings.source,
            dataset = %spec.name,
            page = index,
            "Fetch cancelled"
        );
        SourceFailure {
            source: self.settings.source.clone(),
            dataset: spec.name.clone(),
            page: Some(PageRef { index, offset }),
            kind: FailureKind::Cancelled,
            message: "cancelled by caller".to_string(),
        }
    }
}

/// Offsets of the pages after the first, plus the first page left unfetched
/// when `total` needs more than [`MAX_PAGES`] pages
fn remaining_offsets(total: u64, step: usize) -> (Vec<u64>, Option<PageRef>) {
    let step = step.max(1) as u64;
    let offsets: Vec<u64> = (1..MAX_PAGES as u64)
        .map(|i| i * step)
        .take_while(|offset| *offset < total)
        .collect();
    let next = (offsets.len() as u64 + 1) * step;
    let truncated = (next < total).then(|| PageRef {
        index: offsets.len() + 1,
        offset: next,
    });
    (offsets, truncated)
}

/// More pages follow when the service says so or the page came back full
fn page_has_more(page: &DecodedPage, limit: usize) -> bool {
    if page.rows.is_empty() {
        return false;
    }
    page.more == Some(true) || page.rows.len() >= limit
}

// =============================================================================
// Projection onto the declared schema
// =============================================================================

/// Maps raw rows onto declared columns (case-insensitive), drops unknown
/// columns, null-fills missing ones and extracts the geography code.
struct Projector {
    /// lower-cased source name → output name
    columns: HashMap<String, String>,
    code_source: String,
    code_output: String,
    dropped_columns: BTreeMap<String, usize>,
    rows_without_code: usize,
}

impl Projector {
    fn new(spec: &DatasetSpec) -> Self {
        let columns = spec
            .columns
            .iter()
            .map(|c| (c.to_ascii_lowercase(), spec.output_name(c).to_string()))
            .collect();
        Self {
            columns,
            code_source: spec.code_column.to_ascii_lowercase(),
            code_output: spec.output_code_column().to_string(),
            dropped_columns: BTreeMap::new(),
            rows_without_code: 0,
        }
    }

    fn accept(&mut self, spec: &DatasetSpec, table: &mut LookupTable, rows: Vec<RawRow>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let carries_code = rows.iter().any(|row| {
            row.iter()
                .any(|(name, _)| name.to_ascii_lowercase() == self.code_source)
        });
        if !carries_code {
            return Err(LookupError::SchemaMismatch {
                dataset: spec.name.clone(),
                message: format!("code column '{}' missing from response", spec.code_column),
            });
        }

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut code = None;
            let mut values = BTreeMap::new();
            for (name, value) in row {
                let lower = name.to_ascii_lowercase();
                if lower == self.code_source {
                    code = value.as_code_text().as_deref().and_then(GeographyCode::new);
                    continue;
                }
                match self.columns.get(&lower) {
                    Some(output) => {
                        values.insert(output.clone(), value);
                    }
                    None => *self.dropped_columns.entry(name).or_default() += 1,
                }
            }

            let Some(code) = code else {
                self.rows_without_code += 1;
                continue;
            };
            for output in self.columns.values() {
                if output != &self.code_output {
                    values.entry(output.clone()).or_insert(CellValue::Null);
                }
            }
            records.push(LookupRecord { code, values });
        }

        table.upsert_records(records);
        Ok(())
    }

    fn report(&self, source: &str, spec: &DatasetSpec) {
        if !self.dropped_columns.is_empty() {
            tracing::debug!(
                source,
                dataset = %spec.name,
                columns = ?self.dropped_columns.keys().collect::<Vec<_>>(),
                "Dropped undeclared columns"
            );
        }
        if self.rows_without_code > 0 {
            tracing::warn!(
                source,
                dataset = %spec.name,
                rows = self.rows_without_code,
                "Skipped rows without a geography code"
            );
        }
    }
}
