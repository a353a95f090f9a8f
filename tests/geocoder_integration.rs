//! Integration tests for path finding and joined downloads across services
//!
//! These tests verify that:
//! 1. The graph built from a service table finds the shortest join chain
//! 2. An area filter narrows the start table with a query `where` clause
//! 3. Later tables are fetched with an `IN (...)` filter on the join column
//! 4. Unmatched rows survive the left join with null-filled columns

mod helpers;

use geolookup::{
    new_service_table, AreaFilter, CatalogRequest, CellValue, GeometryScope, LookupError,
    PathGeocoder, RawResponse, RemoteCatalogClient, ServiceGraph, ServiceMetadata,
    TransportError,
};
use helpers::*;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

const BASE: &str = "https://portal.test/arcgis/rest/services";

fn service(name: &str, fields: &[&str], has_geometry: bool) -> ServiceMetadata {
    ServiceMetadata {
        name: name.to_string(),
        url: format!("{}/{}/FeatureServer", BASE, name),
        description: None,
        fields: fields.iter().map(|f| f.to_string()).collect(),
        primary_key: Some("FID".to_string()),
        last_edit_date: None,
        has_geometry,
    }
}

fn graph() -> ServiceGraph {
    let mut table = new_service_table("ogp");
    table.upsert_records(
        [
            service("LAD_2023", &["FID", "LAD23CD", "LAD23NM"], true),
            service("WD_LAD_LU", &["FID", "WD23CD", "WD23NM", "LAD23CD", "LAD23NM"], false),
            service("OA_WD_LU", &["FID", "OA21CD", "WD23CD"], false),
            service("CTRY_2023", &["FID", "CTRY23CD"], true),
        ]
        .into_iter()
        .filter_map(ServiceMetadata::into_record),
    );
    ServiceGraph::from_service_table(&table, GeometryScope::All)
}

/// Rows matching a `COL IN ('a','b')` clause; `1=1` keeps everything
fn apply_where(rows: &[Value], clause: &str) -> Vec<Value> {
    let Some((column, list)) = clause.split_once(" IN (") else {
        return rows.to_vec();
    };
    let wanted: Vec<String> = list
        .trim_end_matches(')')
        .split(',')
        .map(|v| v.trim().trim_matches('\'').replace("''", "'"))
        .collect();
    rows.iter()
        .filter(|row| {
            row[column]
                .as_str()
                .is_some_and(|v| wanted.iter().any(|w| w == v))
        })
        .cloned()
        .collect()
}

fn layer(request: &CatalogRequest, rows: &[Value]) -> Result<RawResponse, TransportError> {
    let clause = query_param(&request.url, "where").unwrap_or_else(|| "1=1".to_string());
    let matching = apply_where(rows, &clause);
    if is_count_request(request) {
        return Ok(esri_count(matching.len()));
    }
    let offset = offset_of(request, "resultOffset").min(matching.len());
    let end = (offset + offset_of(request, "resultRecordCount")).min(matching.len());
    Ok(esri_page(&matching[offset..end], end < matching.len()))
}

fn portal() -> ScriptedTransport {
    let lads = vec![
        json!({ "FID": 1, "LAD23CD": "E09000007", "LAD23NM": "Camden" }),
        json!({ "FID": 2, "LAD23CD": "E09000033", "LAD23NM": "Westminster" }),
        json!({ "FID": 3, "LAD23CD": "E09000001", "LAD23NM": "City of London" }),
    ];
    let wards = vec![
        json!({ "FID": 1, "WD23CD": "E05000128", "WD23NM": "Belsize", "LAD23CD": "E09000007", "LAD23NM": "Camden" }),
        json!({ "FID": 2, "WD23CD": "E05000129", "WD23NM": "Bloomsbury", "LAD23CD": "E09000007", "LAD23NM": "Camden" }),
        json!({ "FID": 3, "WD23CD": "E05000400", "WD23NM": "Abbey Road", "LAD23CD": "E09000033", "LAD23NM": "Westminster" }),
    ];
    let oas = vec![
        json!({ "FID": 1, "OA21CD": "E00000001", "WD23CD": "E05000128" }),
        json!({ "FID": 2, "OA21CD": "E00000002", "WD23CD": "E05000128" }),
        json!({ "FID": 3, "OA21CD": "E00000003", "WD23CD": "E05000129" }),
        json!({ "FID": 4, "OA21CD": "E00000004", "WD23CD": "E05000400" }),
    ];
    ScriptedTransport::new(move |request| {
        if request.url.contains("/LAD_2023/FeatureServer/0/query") {
            layer(request, &lads)
        } else if request.url.contains("/WD_LAD_LU/FeatureServer/0/query") {
            layer(request, &wards)
        } else if request.url.contains("/OA_WD_LU/FeatureServer/0/query") {
            layer(request, &oas)
        } else {
            Ok(RawResponse::status(404, "Not Found"))
        }
    })
}

/// `where` clauses of the page requests sent to one service
fn page_filters(transport: &ScriptedTransport, service: &str) -> Vec<String> {
    transport
        .requests()
        .iter()
        .filter(|r| r.url.contains(&format!("/{}/", service)) && !is_count_request(r))
        .filter_map(|r| query_param(&r.url, "where"))
        .collect()
}

fn text(s: &str) -> CellValue {
    CellValue::from(s)
}

#[tokio::test]
async fn test_area_filtered_geocodes_down_to_output_areas() {
    let transport = shared(portal());
    let client = RemoteCatalogClient::new(fast_settings("ogp", BASE), transport.clone()).unwrap();
    let geocoder = PathGeocoder::new(client, graph());

    let paths = geocoder
        .graph()
        .paths_within_area("LAD23NM", "LAD23CD", "OA21CD")
        .unwrap();
    assert_eq!(paths[0].services(), vec!["WD_LAD_LU", "OA_WD_LU"]);

    let area = AreaFilter::new("LAD23NM", ["Camden"]);
    let table = geocoder
        .geocodes(&paths[0], Some(&area), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!table.is_partial());
    assert_eq!(
        table.columns,
        vec!["WD23CD", "WD23NM", "LAD23CD", "LAD23NM", "OA21CD"]
    );
    let mut oas: Vec<_> = table.rows.iter().map(|r| r["OA21CD"].clone()).collect();
    oas.sort_by_key(|v| v.as_code_text());
    assert_eq!(oas, vec![text("E00000001"), text("E00000002"), text("E00000003")]);
    assert!(table.rows.iter().all(|r| r["LAD23NM"] == text("Camden")));

    assert_eq!(page_filters(&transport, "WD_LAD_LU"), vec!["LAD23NM IN ('Camden')"]);
    assert_eq!(
        page_filters(&transport, "OA_WD_LU"),
        vec!["WD23CD IN ('E05000128','E05000129')"]
    );
}

#[tokio::test]
async fn test_unmatched_rows_survive_the_join() {
    let transport = shared(portal());
    let client = RemoteCatalogClient::new(fast_settings("ogp", BASE), transport.clone()).unwrap();
    let geocoder = PathGeocoder::new(client, graph());

    let path = geocoder.graph().shortest_path("LAD_2023", "OA_WD_LU").unwrap();
    let table = geocoder
        .geocodes(&path, None, &CancellationToken::new())
        .await
        .unwrap();

    // Camden fans out to three output areas, Westminster to one, City has no wards
    assert_eq!(table.len(), 5);
    assert_eq!(table.columns, vec!["LAD23CD", "LAD23NM", "WD23CD", "WD23NM", "OA21CD"]);

    let city = table
        .rows
        .iter()
        .find(|r| r["LAD23CD"] == text("E09000001"))
        .unwrap();
    assert_eq!(city["LAD23NM"], text("City of London"));
    assert_eq!(city["WD23CD"], CellValue::Null);
    assert_eq!(city["OA21CD"], CellValue::Null);

    assert_eq!(page_filters(&transport, "LAD_2023"), vec!["1=1"]);
    assert_eq!(
        page_filters(&transport, "WD_LAD_LU"),
        vec!["LAD23CD IN ('E09000007','E09000033','E09000001')"]
    );
}

#[tokio::test]
async fn test_area_column_missing_from_start_service() {
    let transport = shared(portal());
    let client = RemoteCatalogClient::new(fast_settings("ogp", BASE), transport.clone()).unwrap();
    let geocoder = PathGeocoder::new(client, graph());

    let path = geocoder.graph().shortest_path("OA_WD_LU", "WD_LAD_LU").unwrap();
    let err = geocoder
        .geocodes(
            &path,
            Some(&AreaFilter::new("LAD23NM", ["Camden"])),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LookupError::Config(_)));
    assert!(transport.requests().is_empty());
}

#[test]
fn test_unrelated_service_has_no_path() {
    let err = graph().paths("LAD23CD", "CTRY23CD").unwrap_err();
    assert!(matches!(err, LookupError::NoConnectingPath { .. }));
}
