//! Integration tests for LookupTableBuilder across several datasets of one source
//!
//! These tests verify that:
//! 1. The table schema is the union of every dataset's columns
//! 2. Records from a dataset lacking a column carry an explicit null for it
//! 3. A code seen in two datasets keeps the later values at its first position

mod helpers;

use geolookup::{CellValue, DatasetSpec, GeographyCode, LookupTableBuilder, RemoteCatalogClient};
use helpers::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const BASE: &str = "https://portal.test/arcgis/rest/services";

fn two_layer_portal() -> ScriptedTransport {
    let names = esri_server(
        vec![
            json!({ "LAD23CD": "E09000001", "NM": "City of London" }),
            json!({ "LAD23CD": "E09000007", "NM": "Camden" }),
        ],
        2000,
    );
    let populations = esri_server(
        vec![
            json!({ "LAD23CD": "E09000007", "NM": "Camden (2023)", "POP": 210_390 }),
            json!({ "LAD23CD": "E09000011", "NM": "Greenwich", "POP": 291_549 }),
        ],
        2000,
    );
    ScriptedTransport::new(move |request| {
        if request.url.contains("/LAD_NAMES/") {
            names(request)
        } else {
            populations(request)
        }
    })
}

fn code(s: &str) -> GeographyCode {
    GeographyCode::new(s).unwrap()
}

#[tokio::test]
async fn test_datasets_with_different_columns_union_their_schema() {
    let client =
        RemoteCatalogClient::new(fast_settings("ons", BASE), shared(two_layer_portal())).unwrap();
    let specs = vec![
        DatasetSpec::esri_layer("LAD_NAMES", 0, "LAD23CD", vec!["NM".into()]),
        DatasetSpec::esri_layer("LAD_POPULATION", 0, "LAD23CD", vec!["NM".into(), "POP".into()]),
    ];

    let table = LookupTableBuilder::new(client)
        .build(&specs, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!table.is_partial());
    assert_eq!(table.schema, vec!["NM".to_string(), "POP".to_string()]);
    assert_eq!(table.provenance.page_count, 2);
    assert!(table.has_unique_codes());

    let codes: Vec<_> = table.codes().map(|c| c.as_str()).collect();
    assert_eq!(codes, vec!["E09000001", "E09000007", "E09000011"]);

    let city = table.get(&code("E09000001")).unwrap();
    assert_eq!(city.get("NM"), &CellValue::from("City of London"));
    assert_eq!(city.values.get("POP"), Some(&CellValue::Null));

    let camden = table.get(&code("E09000007")).unwrap();
    assert_eq!(camden.get("NM"), &CellValue::from("Camden (2023)"));
    assert_eq!(camden.get("POP"), &CellValue::from(210_390i64));
}

#[tokio::test]
async fn test_later_dataset_wins_regardless_of_order() {
    let client =
        RemoteCatalogClient::new(fast_settings("ons", BASE), shared(two_layer_portal())).unwrap();
    let specs = vec![
        DatasetSpec::esri_layer("LAD_POPULATION", 0, "LAD23CD", vec!["NM".into(), "POP".into()]),
        DatasetSpec::esri_layer("LAD_NAMES", 0, "LAD23CD", vec!["NM".into()]),
    ];

    let table = LookupTableBuilder::new(client)
        .build(&specs, &CancellationToken::new())
        .await
        .unwrap();

    let codes: Vec<_> = table.codes().map(|c| c.as_str()).collect();
    assert_eq!(codes, vec!["E09000007", "E09000011", "E09000001"]);

    // the names layer replaced the whole record, so POP is back to null
    let camden = table.get(&code("E09000007")).unwrap();
    assert_eq!(camden.get("NM"), &CellValue::from("Camden"));
    assert_eq!(camden.values.get("POP"), Some(&CellValue::Null));
}
