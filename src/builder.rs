//! Lookup table builder
//!
//! Runs every dataset of one source through a single client (so they share
//! its rate limit) and folds the pages into one deduplicated table.

use crate::error::{FailureKind, LookupError, Result, SourceFailure};
use crate::model::LookupTable;
use crate::remote::{DatasetSpec, RemoteCatalogClient};
use tokio_util::sync::CancellationToken;

pub struct LookupTableBuilder {
    client: RemoteCatalogClient,
}

impl LookupTableBuilder {
    pub fn new(client: RemoteCatalogClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RemoteCatalogClient {
        &self.client
    }

    pub fn source(&self) -> &str {
        self.client.source()
    }

    /// Build one table from every spec.
    ///
    /// Fails with [`LookupError::SourceFailed`] only when no dataset contributed
    /// anything; otherwise the table is returned, flagged partial when any
    /// dataset or page failed. An authentication failure disables the source for
    /// the remaining datasets.
    pub async fn build(
        &self,
        specs: &[DatasetSpec],
        cancel: &CancellationToken,
    ) -> Result<LookupTable> {
        let source = self.source().to_string();
        let code_column = canonical_code_column(&source, specs)?;

        let mut table = LookupTable::new(code_column, Vec::new(), &source);
        let mut failures: Vec<SourceFailure> = Vec::new();
        let mut contributed = 0usize;
        let mut disabled = false;

        for spec in specs {
            if disabled {
                failures.push(SourceFailure {
                    source: source.clone(),
                    dataset: spec.name.clone(),
                    page: None,
                    kind: FailureKind::Authentication,
                    message: "skipped: source disabled after authentication failure".to_string(),
                });
                continue;
            }

            match self.client.fetch_all(spec, cancel).await {
                Ok(part) => {
                    if !part.is_partial() || !part.is_empty() {
                        contributed += 1;
                    }
                    table.extend_schema(&part.schema);
                    table.provenance.page_count += part.provenance.page_count;
                    failures.extend(part.provenance.failures);
                    let replaced = table.upsert_records(part.records);
                    if replaced > 0 {
                        tracing::debug!(
                            source = %source,
                            dataset = %spec.name,
                            replaced,
                            "Duplicate codes across datasets, later rows kept"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        source = %source,
                        dataset = %spec.name,
                        error = %e,
                        "Dataset failed"
                    );
                    if matches!(e, LookupError::Authentication { .. }) {
                        disabled = true;
                    }
                    failures.push(SourceFailure::from_error(&source, &spec.name, &e));
                }
            }
        }

        if contributed == 0 && !cancel.is_cancelled() {
            return Err(LookupError::SourceFailed {
                source_id: source,
                failures,
            });
        }

        for failure in failures {
            table.provenance.record_failure(failure);
        }
        table.fill_missing_columns();

        if table.is_partial() {
            tracing::warn!(
                source = %source,
                records = table.len(),
                failures = table.provenance.failures.len(),
                "Built partial lookup table"
            );
        } else {
            tracing::info!(
                source = %source,
                records = table.len(),
                columns = table.schema.len(),
                "Built lookup table"
            );
        }
        Ok(table)
    }
}

/// All specs must agree on the (renamed) code column
fn canonical_code_column(source: &str, specs: &[DatasetSpec]) -> Result<String> {
    let first = specs
        .first()
        .ok_or_else(|| LookupError::config(format!("{}: no datasets requested", source)))?;
    let canonical = first.output_code_column();

    if let Some(other) = specs
        .iter()
        .find(|s| s.output_code_column() != canonical)
    {
        return Err(LookupError::config(format!(
            "{}: dataset '{}' keys on '{}' but '{}' keys on '{}'",
            source,
            other.name,
            other.output_code_column(),
            first.name,
            canonical
        )));
    }
    Ok(canonical.to_string())
}
