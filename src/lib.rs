//! geolookup - geography code lookup tables
//!
//! Builds lookup tables (geography code → names, parent codes, statistics)
//! from remote catalogs such as ArcGIS FeatureServers and NOMIS, merges them
//! across sources by caller-supplied precedence, and reconciles the result
//! with a persisted local copy.
//!
//! ## Call chain
//! Source settings -> RemoteCatalogClient (paged, retried, rate-limited)
//! -> LookupTableBuilder (per source) -> GeocodeMerger (across sources)
//! -> merge_with_local (against the stored table) -> LookupStore
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use geolookup::{
//!     DatasetSpec, HttpTransport, InMemoryStore, LookupPipeline, LookupRequest, MapSettings,
//!     MergeMode, Precedence, SourceRequest,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = MapSettings::new()
//!     .with("ons.base_url", "https://services1.arcgis.com/ESMARspQHYMw9BZ9/arcgis/rest/services");
//! let transport = Arc::new(HttpTransport::new(std::time::Duration::from_secs(30))?);
//! let pipeline = LookupPipeline::new(Arc::new(settings), transport, Arc::new(InMemoryStore::new()));
//!
//! let lad = DatasetSpec::esri_layer("LAD_DEC_2023_UK_NC", 0, "LAD23CD", vec!["LAD23NM".into()]);
//! let request = LookupRequest::new("lad")
//!     .with_source(SourceRequest::new("ons", vec![lad]))
//!     .with_precedence(Precedence::new(["ons"]))
//!     .with_mode(MergeMode::Union);
//!
//! let result = pipeline.run(request, &CancellationToken::new()).await?;
//! println!("{} records, partial: {}", result.table.len(), result.is_partial());
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Tables, records and merge results
pub mod model;

// Per-source settings
pub mod config;

// Remote acquisition: transport, codecs, retry, paging client
pub mod remote;

// Per-source table assembly
pub mod builder;

// Cross-source and local merging
pub mod merge;

// Local table persistence and advisory locks
pub mod storage;

// End-to-end build for one geography type
pub mod pipeline;

// ArcGIS service discovery, staleness checks and the NOMIS dataset catalog
pub mod catalog;

// Shortest join paths between services and their joined download
pub mod geocoder;

pub use builder::LookupTableBuilder;
pub use catalog::{
    matchable_fields, new_service_table, services_needing_refresh, NomisCatalog, NomisDataset,
    NomisDimension, ServiceCatalog, ServiceEntry, ServiceMetadata, SERVICE_CODE_COLUMN,
    SERVICE_TABLE_COLUMNS,
};
pub use config::{Credential, EnvSettings, MapSettings, RetryPolicy, SettingsProvider, SourceSettings};
pub use error::{FailureKind, LookupError, PageRef, Result, SourceFailure};
pub use geocoder::{
    AreaFilter, GeocodePath, GeocodeTable, GeometryScope, PathGeocoder, PathStep, ServiceGraph,
};
pub use merge::{merge_with_local, GeocodeMerger, MergeMode, Precedence, SourceMerge};
pub use model::{
    CellValue, ChangeSummary, GeographyCode, LookupRecord, LookupTable, MergeResult, Provenance,
    ValueConflict,
};
pub use pipeline::{LookupPipeline, LookupRequest, SourceRequest};
pub use remote::{
    CatalogRequest, CatalogTransport, DatasetSpec, HttpTransport, JsonPaging, PageCodec,
    RawResponse, RemoteCatalogClient, TransportError,
};
pub use storage::{InMemoryStore, JsonFileStore, LocalTableLocks, LookupStore};
