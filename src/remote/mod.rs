//! Remote catalog access: transport seam, dataset descriptions, wire
//! codecs, retry policy and the paging client.

pub mod client;
pub mod codec;
pub mod dataset;
pub mod nomis;
pub mod retry;
pub mod transport;

pub use client::RemoteCatalogClient;
pub use dataset::{DatasetSpec, JsonPaging, PageCodec};
pub use transport::{CatalogRequest, CatalogTransport, HttpTransport, RawResponse, TransportError};
