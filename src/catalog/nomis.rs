//! NOMIS dataset catalog
//!
//! NOMIS describes every published dataset in one SDMX-JSON document
//! (`dataset/def.sdmx.json`): id, title, annotations and the dimensions a
//! query can filter on.

use crate::config::Credential;
use crate::error::{LookupError, Result};
use crate::remote::{DatasetSpec, RemoteCatalogClient};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

const DEFINITIONS_LABEL: &str = "def.sdmx.json";

/// One filterable dimension of a NOMIS dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NomisDimension {
    /// Query parameter name, e.g. `GEOGRAPHY`
    pub concept: String,
    /// Code list describing the allowed values, e.g. `CL_2002_1_GEOGRAPHY`
    pub codelist: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NomisDataset {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// `(title, text)` pairs such as contact details and release dates
    pub annotations: Vec<(String, String)>,
    pub dimensions: Vec<NomisDimension>,
}

impl NomisDataset {
    pub fn has_dimension(&self, concept: &str) -> bool {
        self.dimensions
            .iter()
            .any(|d| d.concept.eq_ignore_ascii_case(concept))
    }

    /// Query spec for this dataset
    pub fn dataset_spec(&self, code_column: &str, columns: Vec<String>) -> DatasetSpec {
        DatasetSpec::nomis(&self.id, code_column, columns)
    }
}

impl std::fmt::Display for NomisDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.name)
    }
}

// SDMX-JSON wire shape

#[derive(Debug, Deserialize)]
struct Definitions {
    structure: Structure,
}

#[derive(Debug, Deserialize)]
struct Structure {
    keyfamilies: KeyFamilies,
}

#[derive(Debug, Deserialize)]
struct KeyFamilies {
    #[serde(default)]
    keyfamily: Vec<KeyFamily>,
}

#[derive(Debug, Deserialize)]
struct KeyFamily {
    id: String,
    name: Localized,
    #[serde(default)]
    description: Option<Localized>,
    #[serde(default)]
    annotations: Option<Annotations>,
    #[serde(default)]
    components: Option<Components>,
}

#[derive(Debug, Deserialize)]
struct Localized {
    value: String,
}

#[derive(Debug, Deserialize)]
struct Annotations {
    #[serde(default)]
    annotation: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
struct Annotation {
    annotationtitle: String,
    /// A string, or a list of strings for multi-line notes
    #[serde(default)]
    annotationtext: Value,
}

#[derive(Debug, Deserialize)]
struct Components {
    #[serde(default)]
    dimension: Vec<Dimension>,
}

#[derive(Debug, Deserialize)]
struct Dimension {
    conceptref: String,
    #[serde(default)]
    codelist: String,
}

impl From<KeyFamily> for NomisDataset {
    fn from(family: KeyFamily) -> Self {
        let annotations = family
            .annotations
            .map(|a| a.annotation)
            .unwrap_or_default()
            .into_iter()
            .map(|a| (a.annotationtitle, annotation_text(&a.annotationtext)))
            .collect();
        let dimensions = family
            .components
            .map(|c| c.dimension)
            .unwrap_or_default()
            .into_iter()
            .map(|d| NomisDimension {
                concept: d.conceptref,
                codelist: d.codelist,
            })
            .collect();

        Self {
            id: family.id,
            name: family.name.value,
            description: family
                .description
                .map(|d| d.value)
                .filter(|d| !d.trim().is_empty()),
            annotations,
            dimensions,
        }
    }
}

fn annotation_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse a `def.sdmx.json` document
pub fn parse_definitions(body: Value) -> Result<Vec<NomisDataset>> {
    let definitions: Definitions =
        serde_json::from_value(body).map_err(|e| LookupError::SchemaMismatch {
            dataset: DEFINITIONS_LABEL.to_string(),
            message: e.to_string(),
        })?;
    Ok(definitions
        .structure
        .keyfamilies
        .keyfamily
        .into_iter()
        .map(NomisDataset::from)
        .collect())
}

pub struct NomisCatalog {
    client: RemoteCatalogClient,
}

impl NomisCatalog {
    /// `client`'s base URL is the API root, e.g. `https://www.nomisweb.co.uk/api/v01`
    pub fn new(client: RemoteCatalogClient) -> Self {
        Self { client }
    }

    fn definitions_url(&self) -> Result<Url> {
        let base = self.client.settings().base_url.trim_end_matches('/');
        let raw = format!("{}/dataset/{}", base, DEFINITIONS_LABEL);
        let mut url = Url::parse(&raw)
            .map_err(|e| LookupError::config(format!("invalid catalog url '{}': {}", raw, e)))?;
        if let Credential::QueryKey { param, value } = &self.client.settings().credential {
            url.query_pairs_mut().append_pair(param, value);
        }
        Ok(url)
    }

    /// Every dataset NOMIS publishes
    pub async fn list_datasets(&self, cancel: &CancellationToken) -> Result<Vec<NomisDataset>> {
        let url = self.definitions_url()?;
        let body = self
            .client
            .fetch_json(DEFINITIONS_LABEL, url.as_str(), cancel)
            .await?;
        let datasets = parse_definitions(body)?;
        tracing::info!(
            source = %self.client.source(),
            datasets = datasets.len(),
            "Listed NOMIS datasets"
        );
        Ok(datasets)
    }

    /// One dataset by id (case-insensitive)
    pub async fn find_dataset(&self, id: &str, cancel: &CancellationToken) -> Result<NomisDataset> {
        self.list_datasets(cancel)
            .await?
            .into_iter()
            .find(|d| d.id.eq_ignore_ascii_case(id))
            .ok_or_else(|| LookupError::DatasetNotFound {
                dataset: id.to_string(),
            })
    }
}
