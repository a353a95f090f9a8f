//! Dataset specifications and request URL construction
//!
//! A [`DatasetSpec`] names one remote dataset/layer, the columns wanted from
//! it and the [`PageCodec`] describing how the endpoint pages its records.

use super::nomis::compress_geography_codes;
use crate::config::Credential;
use crate::error::{LookupError, Result};
use std::collections::BTreeMap;
use url::Url;

/// Placeholder substituted with the source's configured base URL
pub const BASE_URL_PLACEHOLDER: &str = "{base_url}";

/// ArcGIS Online rejects `resultRecordCount` above the layer's maxRecordCount
pub const ESRI_MAX_PAGE_SIZE: usize = 2000;
pub const NOMIS_MAX_PAGE_SIZE: usize = 25_000;
pub const JSON_MAX_PAGE_SIZE: usize = 5000;

/// Paging convention of a generic JSON endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPaging {
    /// JSON pointer to the records array (e.g. `/data` or `/values`)
    pub records_pointer: String,
    /// JSON pointer to the total record count, when the service reports one
    pub total_pointer: Option<String>,
    pub offset_param: String,
    pub limit_param: String,
}

impl JsonPaging {
    pub fn new(records_pointer: impl Into<String>) -> Self {
        Self {
            records_pointer: records_pointer.into(),
            total_pointer: None,
            offset_param: "offset".to_string(),
            limit_param: "limit".to_string(),
        }
    }

    pub fn with_total(mut self, total_pointer: impl Into<String>) -> Self {
        self.total_pointer = Some(total_pointer.into());
        self
    }

    pub fn with_params(mut self, offset: impl Into<String>, limit: impl Into<String>) -> Self {
        self.offset_param = offset.into();
        self.limit_param = limit.into();
        self
    }
}

/// Wire format and paging convention of an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCodec {
    /// ArcGIS REST `query` (Open Geography Portal, TfL, other ESRI hosts)
    EsriJson,
    /// NOMIS `.data.csv` with `RecordOffset`/`RecordLimit`
    NomisCsv,
    /// Any JSON API exposing an array of flat objects
    JsonRecords(JsonPaging),
}

impl PageCodec {
    pub fn max_page_size(&self) -> usize {
        match self {
            Self::EsriJson => ESRI_MAX_PAGE_SIZE,
            Self::NomisCsv => NOMIS_MAX_PAGE_SIZE,
            Self::JsonRecords(_) => JSON_MAX_PAGE_SIZE,
        }
    }

    /// Whether a separate count request can report the total up front
    pub fn supports_count(&self) -> bool {
        matches!(self, Self::EsriJson)
    }
}

/// One dataset/layer to fetch from a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    pub name: String,
    /// Endpoint URL, usually starting with `{base_url}`
    pub endpoint: String,
    /// ESRI: SQL `where` clause. Other codecs: `key=value&...` query pairs.
    pub filter: Option<String>,
    /// Fixed extra query parameters
    pub params: Vec<(String, String)>,
    /// Requested source columns, including the code column
    pub columns: Vec<String>,
    pub code_column: String,
    /// Source column → output column
    pub renames: BTreeMap<String, String>,
    pub codec: PageCodec,
}

impl DatasetSpec {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        code_column: impl Into<String>,
        columns: Vec<String>,
        codec: PageCodec,
    ) -> Self {
        let code_column = code_column.into();
        let mut columns = columns;
        if !columns.iter().any(|c| c.eq_ignore_ascii_case(&code_column)) {
            columns.insert(0, code_column.clone());
        }
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            filter: None,
            params: Vec::new(),
            columns,
            code_column,
            renames: BTreeMap::new(),
            codec,
        }
    }

    /// Query a FeatureServer layer, e.g. `("LAD_DEC_2023_UK_NC", 0)`
    pub fn esri_layer(
        service: &str,
        layer: u32,
        code_column: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self::new(
            service,
            format!(
                "{}/{}/FeatureServer/{}/query",
                BASE_URL_PLACEHOLDER, service, layer
            ),
            code_column,
            columns,
            PageCodec::EsriJson,
        )
    }

    /// NOMIS dataset such as `NM_2021_1`
    pub fn nomis(dataset_id: &str, code_column: impl Into<String>, columns: Vec<String>) -> Self {
        Self::new(
            dataset_id,
            format!("{}/dataset/{}.data.csv", BASE_URL_PLACEHOLDER, dataset_id),
            code_column,
            columns,
            PageCodec::NomisCsv,
        )
    }

    /// Generic paged JSON endpoint (TfL, LG Inform)
    pub fn json_records(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        code_column: impl Into<String>,
        columns: Vec<String>,
        paging: JsonPaging,
    ) -> Self {
        Self::new(
            name,
            endpoint,
            code_column,
            columns,
            PageCodec::JsonRecords(paging),
        )
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    /// Restrict a NOMIS query to the given geographies, sent as compressed ranges
    pub fn with_geographies(self, codes: &[String]) -> Self {
        let compressed = compress_geography_codes(codes);
        self.with_param("geography", compressed)
    }

    /// Output name of a declared source column
    pub fn output_name<'a>(&'a self, column: &'a str) -> &'a str {
        self.renames.get(column).map(String::as_str).unwrap_or(column)
    }

    /// Output name of the code column
    pub fn output_code_column(&self) -> &str {
        self.output_name(&self.code_column)
    }

    /// Output names of the non-key columns, in declaration order
    pub fn output_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !c.eq_ignore_ascii_case(&self.code_column))
            .map(|c| self.output_name(c).to_string())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.code_column.trim().is_empty() {
            return Err(LookupError::config(format!(
                "{}: code column is empty",
                self.name
            )));
        }
        let mut outputs = std::collections::HashSet::new();
        for column in &self.columns {
            if !outputs.insert(self.output_name(column).to_ascii_lowercase()) {
                return Err(LookupError::config(format!(
                    "{}: column '{}' declared twice",
                    self.name,
                    self.output_name(column)
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // URL construction
    // =========================================================================

    fn endpoint_url(&self, base_url: &str) -> Result<Url> {
        let rendered = self
            .endpoint
            .replace(BASE_URL_PLACEHOLDER, base_url.trim_end_matches('/'));
        Url::parse(&rendered).map_err(|e| {
            LookupError::config(format!("{}: invalid endpoint '{}': {}", self.name, rendered, e))
        })
    }

    /// URL for one page of records
    pub fn page_url(
        &self,
        base_url: &str,
        credential: &Credential,
        offset: u64,
        limit: usize,
    ) -> Result<Url> {
        let mut url = self.endpoint_url(base_url)?;
        {
            let mut query = url.query_pairs_mut();
            match &self.codec {
                PageCodec::EsriJson => {
                    query
                        .append_pair("where", self.filter.as_deref().unwrap_or("1=1"))
                        .append_pair("outFields", &self.columns.join(","))
                        .append_pair("orderByFields", &self.code_column)
                        .append_pair("returnGeometry", "false")
                        .append_pair("resultOffset", &offset.to_string())
                        .append_pair("resultRecordCount", &limit.to_string())
                        .append_pair("f", "json");
                }
                PageCodec::NomisCsv => {
                    append_filter_pairs(&mut query, self.filter.as_deref());
                    query
                        .append_pair("select", &self.columns.join(","))
                        .append_pair("RecordOffset", &offset.to_string())
                        .append_pair("RecordLimit", &limit.to_string());
                }
                PageCodec::JsonRecords(paging) => {
                    append_filter_pairs(&mut query, self.filter.as_deref());
                    query
                        .append_pair(&paging.offset_param, &offset.to_string())
                        .append_pair(&paging.limit_param, &limit.to_string());
                }
            }
            for (key, value) in &self.params {
                query.append_pair(key, value);
            }
            if let Credential::QueryKey { param, value } = credential {
                query.append_pair(param, value);
            }
        }
        Ok(url)
    }

    /// ESRI `returnCountOnly` request; `None` for codecs without one
    pub fn count_url(&self, base_url: &str, credential: &Credential) -> Result<Option<Url>> {
        if !self.codec.supports_count() {
            return Ok(None);
        }
        let mut url = self.endpoint_url(base_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("where", self.filter.as_deref().unwrap_or("1=1"))
                .append_pair("returnCountOnly", "true")
                .append_pair("f", "json");
            for (key, value) in &self.params {
                query.append_pair(key, value);
            }
            if let Credential::QueryKey { param, value } = credential {
                query.append_pair(param, value);
            }
        }
        Ok(Some(url))
    }
}

fn append_filter_pairs(
    query: &mut url::form_urlencoded::Serializer<'_, url::UrlQuery<'_>>,
    filter: Option<&str>,
) {
    let Some(filter) = filter else {
        return;
    };
    for pair in filter.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) => query.append_pair(key, value),
            None => query.append_pair(pair, ""),
        };
    }
}
