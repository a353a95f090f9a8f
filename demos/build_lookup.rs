//! Build a local-authority lookup from the ONS Open Geography Portal and
//! NOMIS population estimates, merged into `./lookups/lad.json`.
//!
//! Settings come from the environment (or a `.env` file), e.g.
//! `GEOLOOKUP_ONS_BASE_URL`, `GEOLOOKUP_NOMIS_API_KEY`,
//! `GEOLOOKUP_NOMIS_API_KEY_PARAM=uid`. Public endpoints are used when unset.
//!
//! ```text
//! RUST_LOG=geolookup=debug cargo run --example build_lookup -- replace
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use geolookup::{
    DatasetSpec, EnvSettings, JsonFileStore, LookupPipeline, LookupRequest,
    MapSettings, MergeMode, Precedence, SettingsProvider, SourceRequest,
};
use tokio_util::sync::CancellationToken;

const ONS_SERVICES: &str = "https://services1.arcgis.com/ESMARspQHYMw9BZ9/arcgis/rest/services";
const NOMIS_API: &str = "https://www.nomisweb.co.uk/api/v01";

/// Environment first, then built-in defaults
struct Layered {
    env: EnvSettings,
    defaults: MapSettings,
}

impl SettingsProvider for Layered {
    fn get(&self, key: &str) -> Option<String> {
        self.env.get(key).or_else(|| self.defaults.get(key))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mode: MergeMode = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or_default();
    let store_dir = std::env::var("GEOLOOKUP_STORE_DIR").unwrap_or_else(|_| "lookups".into());

    let settings = Layered {
        env: EnvSettings::new(),
        defaults: MapSettings::new()
            .with("ons.base_url", ONS_SERVICES)
            .with("nomis.base_url", NOMIS_API)
            .with("nomis.api_key_param", "uid"),
    };
    let pipeline = LookupPipeline::over_http(
        Arc::new(settings),
        Arc::new(JsonFileStore::new(&store_dir)),
        Duration::from_secs(30),
    )?;

    let lad = DatasetSpec::esri_layer(
        "LAD_DEC_2023_UK_NC",
        0,
        "LAD23CD",
        vec!["LAD23NM".into(), "LAD23NMW".into()],
    );
    let population = DatasetSpec::nomis(
        "NM_2002_1",
        "GEOGRAPHY_CODE",
        vec!["GEOGRAPHY_NAME".into(), "OBS_VALUE".into()],
    )
    .with_filter("date=latest&gender=0&c_age=200&measures=20100&geography=TYPE424")
    .with_rename("GEOGRAPHY_CODE", "LAD23CD")
    .with_rename("OBS_VALUE", "population");

    let request = LookupRequest::new("lad")
        .with_source(SourceRequest::new("ons", vec![lad]))
        .with_source(SourceRequest::new("nomis", vec![population]))
        .with_precedence(Precedence::new(["ons", "nomis"]))
        .with_mode(mode);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing with what has been fetched");
            on_interrupt.cancel();
        }
    });

    let result = pipeline
        .run(request, &cancel)
        .await
        .context("lookup build failed")?;

    let summary = &result.summary;
    println!(
        "lad: {} records (added {}, overwritten {}, unchanged {}, preserved {}, dropped {})",
        result.table.len(),
        summary.added,
        summary.overwritten,
        summary.unchanged,
        summary.preserved,
        summary.dropped
    );
    if !summary.conflicts.is_empty() {
        println!("{} values kept from a higher-precedence source", summary.conflicts.len());
    }
    for failure in &result.failures {
        println!("partial: {}", failure);
    }
    Ok(())
}
