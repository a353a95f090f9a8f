//! End-to-end lookup build for one geography type
//!
//! ```text
//! SourceRequest ─▶ RemoteCatalogClient ─▶ LookupTableBuilder ─┐
//! SourceRequest ─▶ RemoteCatalogClient ─▶ LookupTableBuilder ─┼─▶ GeocodeMerger
//! ...                                                         ┘        │
//!                                  lock ─▶ load ─▶ merge_with_local ─▶ save
//! ```

use crate::builder::LookupTableBuilder;
use crate::config::{SettingsProvider, SourceSettings};
use crate::error::{LookupError, Result, SourceFailure};
use crate::merge::{merge_with_local, GeocodeMerger, MergeMode, Precedence};
use crate::model::{LookupTable, MergeResult};
use crate::remote::{CatalogTransport, DatasetSpec, HttpTransport, RemoteCatalogClient};
use crate::storage::{LocalTableLocks, LookupStore};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Datasets to fetch from one configured source
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub source: String,
    pub datasets: Vec<DatasetSpec>,
}

impl SourceRequest {
    pub fn new(source: impl Into<String>, datasets: Vec<DatasetSpec>) -> Self {
        Self {
            source: source.into(),
            datasets,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LookupRequest {
    /// Geography type being built (e.g. `lad`), also the storage key
    pub geography: String,
    pub sources: Vec<SourceRequest>,
    pub precedence: Precedence,
    pub mode: MergeMode,
}

impl LookupRequest {
    pub fn new(geography: impl Into<String>) -> Self {
        Self {
            geography: geography.into(),
            sources: Vec::new(),
            precedence: Precedence::default(),
            mode: MergeMode::default(),
        }
    }

    pub fn with_source(mut self, source: SourceRequest) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }
}

pub struct LookupPipeline {
    settings: Arc<dyn SettingsProvider>,
    transport: Arc<dyn CatalogTransport>,
    store: Arc<dyn LookupStore>,
    locks: LocalTableLocks,
}

impl LookupPipeline {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        transport: Arc<dyn CatalogTransport>,
        store: Arc<dyn LookupStore>,
    ) -> Self {
        Self {
            settings,
            transport,
            store,
            locks: LocalTableLocks::new(),
        }
    }

    /// Pipeline over the reqwest transport. `default_timeout` is the client's
    /// own deadline; each source's `timeout_secs` overrides it per request.
    pub fn over_http(
        settings: Arc<dyn SettingsProvider>,
        store: Arc<dyn LookupStore>,
        default_timeout: Duration,
    ) -> Result<Self> {
        let transport = HttpTransport::new(default_timeout)?;
        Ok(Self::new(settings, Arc::new(transport), store))
    }

    /// Share advisory locks with other pipelines writing the same store
    pub fn with_locks(mut self, locks: LocalTableLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Fetch every source concurrently, merge by precedence, then merge into
    /// and persist the local table.
    pub async fn run(&self, request: LookupRequest, cancel: &CancellationToken) -> Result<MergeResult> {
        tracing::info!(
            geography = %request.geography,
            sources = request.sources.len(),
            mode = %request.mode,
            "Starting lookup build"
        );

        let builds = request
            .sources
            .iter()
            .map(|source| self.build_source(source, cancel));
        let outcomes = join_all(builds).await;

        let mut tables = Vec::new();
        let mut source_failures: Vec<SourceFailure> = Vec::new();
        for (source, outcome) in request.sources.iter().zip(outcomes) {
            match outcome {
                Ok(table) => tables.push(table),
                Err(e) => {
                    tracing::warn!(source = %source.source, error = %e, "Source failed");
                    match e {
                        LookupError::SourceFailed { failures, .. } => {
                            source_failures.extend(failures)
                        }
                        other => source_failures.push(SourceFailure::from_error(
                            &source.source,
                            "*",
                            &other,
                        )),
                    }
                }
            }
        }

        if tables.is_empty() {
            tracing::warn!(
                geography = %request.geography,
                failures = source_failures.len(),
                "No source produced a table"
            );
            return Err(LookupError::EmptyMergeInput);
        }

        let merged = GeocodeMerger::new(request.precedence.clone()).merge(tables)?;
        let mut remote = merged.table;
        for failure in source_failures {
            remote.provenance.record_failure(failure);
        }

        let _guard = self.locks.acquire(&request.geography).await;
        let local = self.store.load_local(&request.geography).await?;
        let mut result = merge_with_local(remote, local, request.mode, &request.geography)?;
        self.store
            .save_local(&request.geography, &result.table)
            .await?;
        result.summary.conflicts = merged.conflicts;

        tracing::info!(
            geography = %request.geography,
            records = result.table.len(),
            partial = result.is_partial(),
            conflicts = result.summary.conflicts.len(),
            "Lookup build complete"
        );
        Ok(result)
    }

    async fn build_source(
        &self,
        source: &SourceRequest,
        cancel: &CancellationToken,
    ) -> Result<LookupTable> {
        let settings = SourceSettings::resolve(self.settings.as_ref(), &source.source)?;
        let client = RemoteCatalogClient::new(settings, self.transport.clone())?;
        LookupTableBuilder::new(client)
            .build(&source.datasets, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapSettings;
    use crate::storage::InMemoryStore;

    #[tokio::test]
    async fn test_over_http_pipeline_reports_unconfigured_source() {
        let pipeline = LookupPipeline::over_http(
            Arc::new(MapSettings::new()),
            Arc::new(InMemoryStore::new()),
            Duration::from_secs(5),
        )
        .unwrap();

        let request = LookupRequest::new("lad").with_source(SourceRequest::new(
            "ons",
            vec![DatasetSpec::esri_layer("LAD", 0, "LAD23CD", vec![])],
        ));
        let err = pipeline
            .run(request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::EmptyMergeInput));
    }
}
