//! Remote catalog discovery: ArcGIS services and NOMIS datasets

pub mod arcgis;
pub mod nomis;

pub use arcgis::{
    matchable_fields, new_service_table, services_needing_refresh, ServiceCatalog, ServiceEntry,
    ServiceMetadata, SERVICE_CODE_COLUMN, SERVICE_TABLE_COLUMNS,
};
pub use nomis::{NomisCatalog, NomisDataset, NomisDimension};
