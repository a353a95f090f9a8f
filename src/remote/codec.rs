//! Page decoding for each supported wire format

use super::dataset::{JsonPaging, PageCodec};
use crate::model::CellValue;
use serde::Deserialize;
use serde_json::Value;

/// Raw column/value pairs of one record, in wire order
pub type RawRow = Vec<(String, CellValue)>;

/// One decoded page, before projection onto the declared schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPage {
    pub rows: Vec<RawRow>,
    /// Total records across all pages, when the service reports it
    pub total: Option<u64>,
    /// Explicit next-page indicator, when the service provides one
    pub more: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Body does not have the expected shape
    Malformed(String),
    /// Service answered with an error envelope (ESRI returns these with HTTP 200)
    Remote { code: i64, message: String },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed response: {}", msg),
            Self::Remote { code, message } => write!(f, "remote error {}: {}", code, message),
        }
    }
}

pub fn decode_page(codec: &PageCodec, body: &str) -> Result<DecodedPage, DecodeError> {
    match codec {
        PageCodec::EsriJson => decode_esri(body),
        PageCodec::NomisCsv => decode_nomis_csv(body),
        PageCodec::JsonRecords(paging) => decode_json_records(paging, body),
    }
}

/// Parse JSON, surfacing an ESRI error envelope as [`DecodeError::Remote`]
pub fn parse_json(body: &str) -> Result<Value, DecodeError> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        DecodeError::Malformed(format!(
            "invalid JSON at line {} col {}: {}",
            e.line(),
            e.column(),
            e
        ))
    })?;
    if let Some(err) = esri_error(&value) {
        return Err(err);
    }
    Ok(value)
}

fn esri_error(value: &Value) -> Option<DecodeError> {
    #[derive(Deserialize)]
    struct Envelope {
        error: EsriError,
    }
    #[derive(Deserialize)]
    struct EsriError {
        code: i64,
        #[serde(default)]
        message: String,
        #[serde(default)]
        details: Vec<String>,
    }

    let envelope: Envelope = serde_json::from_value(value.clone()).ok()?;
    let mut message = envelope.error.message;
    if !envelope.error.details.is_empty() {
        message = format!("{} ({})", message, envelope.error.details.join("; "));
    }
    Some(DecodeError::Remote {
        code: envelope.error.code,
        message,
    })
}

// =============================================================================
// ESRI
// =============================================================================

#[derive(Debug, Deserialize)]
struct EsriQueryResponse {
    features: Vec<EsriFeature>,
    #[serde(rename = "exceededTransferLimit", default)]
    exceeded_transfer_limit: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct EsriFeature {
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
}

fn decode_esri(body: &str) -> Result<DecodedPage, DecodeError> {
    let value = parse_json(body)?;
    let response: EsriQueryResponse = serde_json::from_value(value)
        .map_err(|e| DecodeError::Malformed(format!("ESRI query response: {}", e)))?;

    let rows = response
        .features
        .into_iter()
        .map(|feature| object_row(&feature.attributes))
        .collect();

    Ok(DecodedPage {
        rows,
        total: None,
        more: Some(response.exceeded_transfer_limit.unwrap_or(false)),
    })
}

/// Decode an ESRI `returnCountOnly` response
pub fn decode_count(body: &str) -> Result<u64, DecodeError> {
    let value = parse_json(body)?;
    value
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| DecodeError::Malformed("count response without 'count'".to_string()))
}

// =============================================================================
// NOMIS CSV
// =============================================================================

fn decode_nomis_csv(body: &str) -> Result<DecodedPage, DecodeError> {
    if body.trim_start().starts_with('<') {
        return Err(DecodeError::Malformed(
            "expected CSV, got markup".to_string(),
        ));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| DecodeError::Malformed(format!("CSV header: {}", e)))?
        .clone();

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| DecodeError::Malformed(format!("CSV row {}: {}", idx + 1, e)))?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(name, field)| (name.to_string(), CellValue::from_csv_field(field)))
            .collect();
        rows.push(row);
    }

    Ok(DecodedPage {
        rows,
        total: None,
        more: None,
    })
}

// =============================================================================
// Generic JSON
// =============================================================================

fn decode_json_records(paging: &JsonPaging, body: &str) -> Result<DecodedPage, DecodeError> {
    let value = parse_json(body)?;
    let records = value
        .pointer(&paging.records_pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            DecodeError::Malformed(format!(
                "no records array at '{}'",
                paging.records_pointer
            ))
        })?;

    let mut rows = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        let object = record.as_object().ok_or_else(|| {
            DecodeError::Malformed(format!("record {} is not an object", idx))
        })?;
        rows.push(object_row(object));
    }

    let total = paging
        .total_pointer
        .as_deref()
        .and_then(|p| value.pointer(p))
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())));

    Ok(DecodedPage {
        rows,
        total,
        more: None,
    })
}

fn object_row(object: &serde_json::Map<String, Value>) -> RawRow {
    object
        .iter()
        .map(|(k, v)| (k.clone(), CellValue::from_json(v).unwrap_or(CellValue::Null)))
        .collect()
}
