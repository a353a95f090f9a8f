//! ArcGIS service catalog
//!
//! Discovers the FeatureServer services a portal publishes and records their
//! fields, key and last edit date in a *service table*: a lookup table keyed
//! by service name. Comparing two service tables tells which datasets changed
//! upstream and need a rebuild.

use crate::config::Credential;
use crate::error::{FailureKind, LookupError, Result, SourceFailure};
use crate::model::{CellValue, GeographyCode, LookupRecord, LookupTable};
use crate::remote::RemoteCatalogClient;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const SERVICE_CODE_COLUMN: &str = "service";

/// Columns of a service table, in order
pub const SERVICE_TABLE_COLUMNS: [&str; 7] = [
    "url",
    "description",
    "primary_key",
    "fields",
    "matchable_fields",
    "last_edit_date",
    "has_geometry",
];

const FEATURE_SERVER: &str = "FeatureServer";

/// One entry of the portal's service listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// What a FeatureServer service and its first layer describe about themselves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMetadata {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub fields: Vec<String>,
    pub primary_key: Option<String>,
    pub last_edit_date: Option<DateTime<Utc>>,
    pub has_geometry: bool,
}

impl ServiceMetadata {
    pub fn matchable_fields(&self) -> Vec<String> {
        matchable_fields(&self.fields)
    }

    /// Service table row; `None` when the service name is blank
    pub fn into_record(self) -> Option<LookupRecord> {
        let matchable = self.matchable_fields().join(",");
        let last_edit = self
            .last_edit_date
            .map(|d| CellValue::from(d.timestamp_millis()))
            .unwrap_or_default();
        let record = LookupRecord::new(GeographyCode::new(&self.name)?)
            .with("url", self.url)
            .with("description", self.description.map(CellValue::from).unwrap_or_default())
            .with("primary_key", self.primary_key.map(CellValue::from).unwrap_or_default())
            .with("fields", self.fields.join(","))
            .with("matchable_fields", matchable)
            .with("last_edit_date", last_edit)
            .with("has_geometry", self.has_geometry.to_string());
        Some(record)
    }
}

#[derive(Debug, Deserialize)]
struct ServiceListing {
    #[serde(default)]
    services: Vec<ServiceEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceInfo {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    service_description: Option<String>,
    #[serde(default)]
    layers: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerInfo {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    fields: Vec<FieldInfo>,
    #[serde(default)]
    unique_id_field: Option<FieldInfo>,
    #[serde(default)]
    editing_info: Option<EditingInfo>,
}

#[derive(Debug, Deserialize)]
struct FieldInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditingInfo {
    #[serde(default)]
    last_edit_date: Option<i64>,
}

/// Fields usable as join keys: `XXnnCD`, `XXnnNM`, `XXnnCDH`, `XXnnNMW`
/// style geography columns plus postcode columns.
pub fn matchable_fields(fields: &[String]) -> Vec<String> {
    fields
        .iter()
        .map(|f| f.to_uppercase())
        .filter(|f| is_geography_field(f) || is_postcode_field(f))
        .collect()
}

fn is_geography_field(field: &str) -> bool {
    ["CDH", "NMW", "CD", "NM"].iter().any(|suffix| {
        field
            .strip_suffix(suffix)
            .map(|stem| {
                let digits: Vec<char> = stem.chars().rev().take(2).collect();
                digits.len() == 2 && digits.iter().all(char::is_ascii_digit)
            })
            .unwrap_or(false)
    })
}

fn is_postcode_field(field: &str) -> bool {
    match field {
        "PCD" | "PCDS" => true,
        _ => field
            .strip_prefix("PCD")
            .map(|rest| rest.len() == 1 && matches!(rest.as_bytes()[0], b'2'..=b'9'))
            .unwrap_or(false),
    }
}

/// Empty service table in the column layout [`ServiceCatalog`] produces
pub fn new_service_table(source: &str) -> LookupTable {
    LookupTable::new(
        SERVICE_CODE_COLUMN,
        SERVICE_TABLE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        source,
    )
}

/// Services needing a rebuild: present in `current` but not in `local`, or
/// edited upstream after the locally recorded edit date.
pub fn services_needing_refresh(local: &LookupTable, current: &LookupTable) -> Vec<GeographyCode> {
    let known: HashMap<&GeographyCode, &LookupRecord> =
        local.records.iter().map(|r| (&r.code, r)).collect();

    current
        .records
        .iter()
        .filter(|record| match known.get(&record.code) {
            None => true,
            Some(previous) => {
                match (edit_millis(previous), edit_millis(record)) {
                    (Some(before), Some(now)) => now > before,
                    (None, Some(_)) => true,
                    _ => false,
                }
            }
        })
        .map(|record| record.code.clone())
        .collect()
}

fn edit_millis(record: &LookupRecord) -> Option<i64> {
    match record.get("last_edit_date") {
        CellValue::Number(n) => n.as_i64(),
        CellValue::Text(s) => s.parse().ok(),
        CellValue::Null => None,
    }
}

pub struct ServiceCatalog {
    client: RemoteCatalogClient,
}

impl ServiceCatalog {
    /// `client`'s base URL is the portal's `rest/services` root
    pub fn new(client: RemoteCatalogClient) -> Self {
        Self { client }
    }

    fn json_url(&self, base: &str) -> Result<Url> {
        let mut url = Url::parse(base.trim_end_matches('/'))
            .map_err(|e| LookupError::config(format!("invalid catalog url '{}': {}", base, e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("f", "json");
            if let Credential::QueryKey { param, value } = &self.client.settings().credential {
                query.append_pair(param, value);
            }
        }
        Ok(url)
    }

    fn service_url(&self, entry: &ServiceEntry) -> String {
        entry.url.clone().unwrap_or_else(|| {
            format!(
                "{}/{}/{}",
                self.client.settings().base_url.trim_end_matches('/'),
                entry.name,
                FEATURE_SERVER
            )
        })
    }

    /// FeatureServer services published under the portal root
    pub async fn list_services(&self, cancel: &CancellationToken) -> Result<Vec<ServiceEntry>> {
        let url = self.json_url(&self.client.settings().base_url)?;
        let body = self.client.fetch_json("services", url.as_str(), cancel).await?;
        let listing: ServiceListing =
            serde_json::from_value(body).map_err(|e| LookupError::SchemaMismatch {
                dataset: "services".to_string(),
                message: e.to_string(),
            })?;

        let services: Vec<ServiceEntry> = listing
            .services
            .into_iter()
            .filter(|s| s.service_type == FEATURE_SERVER)
            .collect();
        tracing::info!(
            source = %self.client.source(),
            services = services.len(),
            "Listed feature services"
        );
        Ok(services)
    }

    /// Service description plus field metadata of layer 0
    pub async fn service_metadata(
        &self,
        entry: &ServiceEntry,
        cancel: &CancellationToken,
    ) -> Result<ServiceMetadata> {
        let service_url = self.service_url(entry);
        let schema_error = |e: serde_json::Error| LookupError::SchemaMismatch {
            dataset: entry.name.clone(),
            message: e.to_string(),
        };

        let info_url = self.json_url(&service_url)?;
        let info: ServiceInfo = serde_json::from_value(
            self.client
                .fetch_json(&entry.name, info_url.as_str(), cancel)
                .await?,
        )
        .map_err(schema_error)?;

        let layer_url = self.json_url(&format!("{}/0", service_url.trim_end_matches('/')))?;
        let layer: LayerInfo = serde_json::from_value(
            self.client
                .fetch_json(&entry.name, layer_url.as_str(), cancel)
                .await?,
        )
        .map_err(schema_error)?;

        let last_edit_date = layer
            .editing_info
            .and_then(|e| e.last_edit_date)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Ok(ServiceMetadata {
            name: entry.name.clone(),
            url: service_url,
            description: [info.description, info.service_description, layer.description]
                .into_iter()
                .flatten()
                .find(|d| !d.trim().is_empty()),
            fields: layer.fields.into_iter().map(|f| f.name).collect(),
            primary_key: layer.unique_id_field.map(|f| f.name),
            last_edit_date,
            has_geometry: !info.layers.is_empty(),
        })
    }

    /// Service table for `services`; services whose metadata cannot be read
    /// are recorded as failures and mark the table partial.
    pub async fn build_service_table(
        &self,
        services: &[ServiceEntry],
        cancel: &CancellationToken,
    ) -> Result<LookupTable> {
        let mut table = new_service_table(self.client.source());

        let mut results = stream::iter(services)
            .map(|entry| async move { (entry, self.service_metadata(entry, cancel).await) })
            .buffered(self.client.settings().concurrency);

        while let Some((entry, result)) = results.next().await {
            match result {
                Ok(metadata) => match metadata.into_record() {
                    Some(record) => {
                        table.upsert_records([record]);
                        table.provenance.page_count += 1;
                    }
                    None => tracing::warn!(service = %entry.name, "Service without a name, skipped"),
                },
                Err(e) => {
                    tracing::warn!(
                        source = %self.client.source(),
                        service = %entry.name,
                        error = %e,
                        "Service metadata unavailable"
                    );
                    let cancelled = matches!(e, LookupError::Cancelled);
                    table.provenance.record_failure(SourceFailure::from_error(
                        self.client.source(),
                        &entry.name,
                        &e,
                    ));
                    if cancelled {
                        break;
                    }
                }
            }
        }

        if cancel.is_cancelled()
            && !table
                .provenance
                .failures
                .iter()
                .any(|f| f.kind == FailureKind::Cancelled)
        {
            table.provenance.record_failure(SourceFailure {
                source: self.client.source().to_string(),
                dataset: "services".to_string(),
                page: None,
                kind: FailureKind::Cancelled,
                message: "cancelled by caller".to_string(),
            });
        }

        table.fill_missing_columns();
        tracing::info!(
            source = %self.client.source(),
            services = table.len(),
            failures = table.provenance.failures.len(),
            "Built service table"
        );
        Ok(table)
    }
}
