//! Geocoding across services by shortest join path
//!
//! Services sharing a matchable column (`LAD23CD`, `WD23CD`, ...) are
//! neighbours in a [`ServiceGraph`]. Breadth-first search from the services
//! carrying a start column to those carrying an end column gives the
//! shortest chains of joins. [`PathGeocoder::geocodes`] downloads one chain
//! and left-joins it into a [`GeocodeTable`], e.g. local authorities down to
//! output areas.
//!
//! Several chains of equal length are usually found and not all of them join
//! sensibly; callers pick one from [`ServiceGraph::paths`].

use crate::error::{LookupError, Result, SourceFailure};
use crate::model::{CellValue, LookupTable};
use crate::remote::{DatasetSpec, PageCodec, RemoteCatalogClient};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio_util::sync::CancellationToken;

/// Join keys above this count fetch the next table whole instead of by `IN (...)`
const MAX_IN_CLAUSE_VALUES: usize = 100;

/// Area names above this count fetch the start table whole and filter locally
const MAX_AREA_FILTER_VALUES: usize = 200;

/// Which services the graph may route through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeometryScope {
    #[default]
    All,
    GeometryOnly,
    NonGeometry,
}

impl GeometryScope {
    fn admits(self, has_geometry: bool) -> bool {
        match self {
            Self::All => true,
            Self::GeometryOnly => has_geometry,
            Self::NonGeometry => !has_geometry,
        }
    }
}

/// One hop of a path: the service reached and the column joining it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathStep {
    pub service: String,
    pub via: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeocodePath {
    pub start: String,
    pub steps: Vec<PathStep>,
}

impl GeocodePath {
    pub fn single(start: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            steps: Vec::new(),
        }
    }

    /// Services in join order
    pub fn services(&self) -> Vec<&str> {
        std::iter::once(self.start.as_str())
            .chain(self.steps.iter().map(|s| s.service.as_str()))
            .collect()
    }

    /// Number of services on the path
    pub fn len(&self) -> usize {
        self.steps.len() + 1
    }

    /// Always false: a path holds at least its start service
    pub fn is_empty(&self) -> bool {
        false
    }

    fn last_service(&self) -> &str {
        self.steps
            .last()
            .map(|s| s.service.as_str())
            .unwrap_or(&self.start)
    }
}

impl std::fmt::Display for GeocodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.start)?;
        for step in &self.steps {
            write!(f, " -[{}]-> {}", step.via, step.service)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ServiceNode {
    name: String,
    url: Option<String>,
    fields: Vec<String>,
    matchable: Vec<String>,
    primary_key: Option<String>,
}

impl ServiceNode {
    /// Field as the service spells it
    fn field_named(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.eq_ignore_ascii_case(column))
            .map(String::as_str)
    }
}

fn text(value: &CellValue) -> Option<String> {
    value.as_code_text().filter(|s| !s.trim().is_empty())
}

fn split_list(value: &CellValue) -> Vec<String> {
    text(value)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Graph
// =============================================================================

/// Services connected by shared matchable columns
#[derive(Debug, Clone)]
pub struct ServiceGraph {
    nodes: Vec<ServiceNode>,
    edges: HashMap<String, Vec<PathStep>>,
}

impl ServiceGraph {
    /// Build from a service table (see [`crate::catalog::ServiceCatalog`])
    pub fn from_service_table(table: &LookupTable, scope: GeometryScope) -> Self {
        let nodes: Vec<ServiceNode> = table
            .records
            .iter()
            .filter(|record| {
                let has_geometry =
                    matches!(record.get("has_geometry"), CellValue::Text(t) if t == "true");
                scope.admits(has_geometry)
            })
            .map(|record| ServiceNode {
                name: record.code.as_str().to_string(),
                url: text(record.get("url")),
                fields: split_list(record.get("fields")),
                matchable: split_list(record.get("matchable_fields"))
                    .into_iter()
                    .map(|c| c.to_uppercase())
                    .collect(),
                primary_key: text(record.get("primary_key")),
            })
            .collect();

        let mut edges = HashMap::new();
        for node in &nodes {
            if node.matchable.is_empty() {
                continue;
            }
            let mut steps = Vec::new();
            for other in nodes.iter().filter(|o| o.name != node.name) {
                for column in node.matchable.iter().filter(|c| other.matchable.contains(c)) {
                    steps.push(PathStep {
                        service: other.name.clone(),
                        via: column.clone(),
                    });
                }
            }
            edges.insert(node.name.clone(), steps);
        }

        tracing::debug!(
            services = nodes.len(),
            edges = edges.values().map(Vec::len).sum::<usize>(),
            ?scope,
            "Built service graph"
        );
        Self { nodes, edges }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, service: &str) -> Option<&ServiceNode> {
        self.nodes
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(service))
    }

    pub fn neighbours(&self, service: &str) -> &[PathStep] {
        self.edges
            .get(&service.to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Fewest-hop path between two services, by breadth-first search
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<GeocodePath> {
        let from = self.node(from)?.name.clone();
        let to = self.node(to)?.name.clone();
        if from == to {
            return Some(GeocodePath::single(from));
        }

        let mut explored = HashSet::new();
        let mut queue = VecDeque::from([GeocodePath::single(from)]);
        while let Some(path) = queue.pop_front() {
            let last = path.last_service().to_string();
            if !explored.insert(last.clone()) {
                continue;
            }
            for step in self.neighbours(&last) {
                if explored.contains(&step.service) {
                    continue;
                }
                let mut next = path.clone();
                next.steps.push(step.clone());
                if step.service == to {
                    return Some(next);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Shortest paths from any service carrying `start_column` to any
    /// service carrying `end_column`. Every returned path has the minimum
    /// length; start services are tried in name order.
    pub fn paths(&self, start_column: &str, end_column: &str) -> Result<Vec<GeocodePath>> {
        self.find_paths(start_column, end_column, None)
    }

    /// As [`Self::paths`], but only starting from services that also carry
    /// `area_column` (e.g. `LAD23NM`) so the start table can be filtered by area
    pub fn paths_within_area(
        &self,
        area_column: &str,
        start_column: &str,
        end_column: &str,
    ) -> Result<Vec<GeocodePath>> {
        self.find_paths(start_column, end_column, Some(area_column))
    }

    fn find_paths(
        &self,
        start_column: &str,
        end_column: &str,
        area_column: Option<&str>,
    ) -> Result<Vec<GeocodePath>> {
        let start = start_column.trim().to_uppercase();
        let end = end_column.trim().to_uppercase();

        let mut starts: Vec<&ServiceNode> = self
            .nodes
            .iter()
            .filter(|n| n.matchable.contains(&start))
            .filter(|n| area_column.map_or(true, |a| n.field_named(a).is_some()))
            .collect();
        if starts.is_empty() {
            return Err(LookupError::ColumnNotFound { column: start });
        }
        starts.sort_by(|a, b| a.name.cmp(&b.name));

        let ends: Vec<&ServiceNode> = self
            .nodes
            .iter()
            .filter(|n| n.matchable.contains(&end))
            .collect();
        if ends.is_empty() {
            return Err(LookupError::ColumnNotFound { column: end });
        }

        let mut found: Vec<GeocodePath> = starts
            .iter()
            .flat_map(|s| ends.iter().map(move |e| (s, e)))
            .filter_map(|(s, e)| self.shortest_path(&s.name, &e.name))
            .collect();

        let Some(shortest) = found.iter().map(GeocodePath::len).min() else {
            return Err(LookupError::NoConnectingPath { start, end });
        };
        let mut seen = HashSet::new();
        found.retain(|p| p.len() == shortest && seen.insert(p.clone()));

        tracing::info!(
            start = %start,
            end = %end,
            paths = found.len(),
            services = shortest,
            "Found shortest geocode paths"
        );
        Ok(found)
    }
}

// =============================================================================
// Joined output
// =============================================================================

/// Restrict the start table to named areas, e.g. `LAD23NM in [Lewisham, Southwark]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaFilter {
    pub column: String,
    pub values: Vec<String>,
}

impl AreaFilter {
    pub fn new<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Rows of a left-joined path; column names are upper-case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeTable {
    pub path: GeocodePath,
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, CellValue>>,
    /// Failures from the underlying downloads; non-empty means rows may be missing
    pub failures: Vec<SourceFailure>,
}

impl GeocodeTable {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct Relation {
    columns: Vec<String>,
    rows: Vec<BTreeMap<String, CellValue>>,
}

impl Relation {
    fn from_table(table: &LookupTable, include_code: bool) -> Self {
        let code_column = table.code_column.to_uppercase();
        let mut columns = Vec::new();
        if include_code {
            columns.push(code_column.clone());
        }
        for column in &table.schema {
            let upper = column.to_uppercase();
            if !columns.contains(&upper) {
                columns.push(upper);
            }
        }

        let rows = table
            .records
            .iter()
            .map(|record| {
                let mut row: BTreeMap<String, CellValue> = record
                    .values
                    .iter()
                    .map(|(k, v)| (k.to_uppercase(), v.clone()))
                    .collect();
                if include_code {
                    row.insert(code_column.clone(), CellValue::from(record.code.as_str()));
                }
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Distinct non-null values of `column`, in first-seen order
    fn distinct(&self, column: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter_map(|row| row.get(column).and_then(CellValue::as_code_text))
            .filter(|v| seen.insert(v.clone()))
            .collect()
    }

    fn retain_values(&mut self, column: &str, values: &[String]) {
        let wanted: HashSet<&str> = values.iter().map(String::as_str).collect();
        self.rows.retain(|row| {
            row.get(column)
                .and_then(CellValue::as_code_text)
                .is_some_and(|v| wanted.contains(v.as_str()))
        });
    }

    /// Left join on `on`; on a column clash the left value is kept
    fn left_join(self, right: Relation, on: &str) -> Relation {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in right.rows.iter().enumerate() {
            if let Some(key) = row.get(on).and_then(CellValue::as_code_text) {
                index.entry(key).or_default().push(i);
            }
        }

        let mut columns = self.columns;
        for column in &right.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }

        let mut rows = Vec::with_capacity(self.rows.len());
        for row in self.rows {
            let matches = row
                .get(on)
                .and_then(CellValue::as_code_text)
                .and_then(|key| index.get(&key));
            match matches {
                Some(found) => {
                    for &i in found {
                        let mut joined = row.clone();
                        for (column, value) in &right.rows[i] {
                            joined
                                .entry(column.clone())
                                .or_insert_with(|| value.clone());
                        }
                        rows.push(joined);
                    }
                }
                None => rows.push(row),
            }
        }
        Relation { columns, rows }
    }

    /// Null-fill, drop duplicate rows, then drop columns that are null everywhere
    fn finish(mut self) -> Relation {
        for row in &mut self.rows {
            for column in &self.columns {
                row.entry(column.clone()).or_insert(CellValue::Null);
            }
        }

        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row.clone()));

        let rows = &self.rows;
        let empty: Vec<String> = self
            .columns
            .iter()
            .filter(|c| rows.iter().all(|r| r.get(*c).map_or(true, CellValue::is_null)))
            .cloned()
            .collect();
        if !empty.is_empty() {
            self.columns.retain(|c| !empty.contains(c));
            for row in &mut self.rows {
                for column in &empty {
                    row.remove(column);
                }
            }
        }
        self
    }
}

/// SQL `IN` clause with single quotes escaped
fn in_clause(column: &str, values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect();
    format!("{} IN ({})", column, quoted.join(","))
}

// =============================================================================
// Download and join
// =============================================================================

/// Downloads the services of a [`GeocodePath`] and joins them
pub struct PathGeocoder {
    client: RemoteCatalogClient,
    graph: ServiceGraph,
}

impl PathGeocoder {
    pub fn new(client: RemoteCatalogClient, graph: ServiceGraph) -> Self {
        Self { client, graph }
    }

    pub fn graph(&self) -> &ServiceGraph {
        &self.graph
    }

    fn node(&self, service: &str) -> Result<&ServiceNode> {
        self.graph
            .node(service)
            .ok_or_else(|| LookupError::config(format!("service '{}' is not in the graph", service)))
    }

    /// Download every service on `path` and left-join them in order.
    ///
    /// Each later table is fetched with an `IN (...)` filter on the joining
    /// column when the previous rows hold few enough distinct keys.
    pub async fn geocodes(
        &self,
        path: &GeocodePath,
        area: Option<&AreaFilter>,
        cancel: &CancellationToken,
    ) -> Result<GeocodeTable> {
        let start = self.node(&path.start)?;
        let mut failures = Vec::new();

        let mut start_filter = None;
        if let Some(area) = area {
            let column = start.field_named(&area.column).ok_or_else(|| {
                LookupError::config(format!("{} has no column {}", start.name, area.column))
            })?;
            if area.values.len() < MAX_AREA_FILTER_VALUES {
                start_filter = Some(in_clause(column, &area.values));
            } else {
                tracing::debug!(
                    service = %start.name,
                    areas = area.values.len(),
                    "Too many areas for a query filter, filtering locally"
                );
            }
        }

        let hint = path.steps.first().map(|s| s.via.as_str());
        let mut joined = self.fetch(start, hint, start_filter, &mut failures, cancel).await?;
        if let Some(area) = area {
            joined.retain_values(&area.column.to_uppercase(), &area.values);
        }

        for step in &path.steps {
            let node = self.node(&step.service)?;
            let keys = joined.distinct(&step.via);
            if keys.is_empty() {
                tracing::warn!(
                    service = %node.name,
                    via = %step.via,
                    "No join keys left, skipping table"
                );
                continue;
            }
            let filter = if keys.len() < MAX_IN_CLAUSE_VALUES {
                let column = node.field_named(&step.via).unwrap_or(&step.via);
                Some(in_clause(column, &keys))
            } else {
                None
            };
            let next = self
                .fetch(node, Some(&step.via), filter, &mut failures, cancel)
                .await?;
            joined = joined.left_join(next, &step.via);
        }

        let joined = joined.finish();
        tracing::info!(
            path = %path,
            rows = joined.rows.len(),
            columns = joined.columns.len(),
            partial = !failures.is_empty(),
            "Geocodes joined"
        );
        Ok(GeocodeTable {
            path: path.clone(),
            columns: joined.columns,
            rows: joined.rows,
            failures,
        })
    }

    /// Fetch a whole service layer keyed by its primary key, so that no rows
    /// collapse on a shared geography code
    async fn fetch(
        &self,
        node: &ServiceNode,
        key_hint: Option<&str>,
        filter: Option<String>,
        failures: &mut Vec<SourceFailure>,
        cancel: &CancellationToken,
    ) -> Result<Relation> {
        let url = node
            .url
            .as_deref()
            .ok_or_else(|| LookupError::config(format!("service '{}' has no url", node.name)))?;

        let (code_column, include_code) = match &node.primary_key {
            Some(pk) => (pk.clone(), false),
            None => {
                let fallback = key_hint
                    .and_then(|hint| node.field_named(hint))
                    .or_else(|| node.matchable.first().and_then(|m| node.field_named(m)))
                    .ok_or_else(|| {
                        LookupError::config(format!(
                            "service '{}' has neither a primary key nor a matchable field",
                            node.name
                        ))
                    })?;
                tracing::debug!(
                    service = %node.name,
                    key = fallback,
                    "No primary key, rows sharing a key will collapse"
                );
                (fallback.to_string(), true)
            }
        };

        let columns = node
            .fields
            .iter()
            .filter(|f| !f.eq_ignore_ascii_case(&code_column))
            .cloned()
            .collect();
        let mut spec = DatasetSpec::new(
            &node.name,
            format!("{}/0/query", url.trim_end_matches('/')),
            code_column,
            columns,
            PageCodec::EsriJson,
        );
        if let Some(filter) = filter {
            spec = spec.with_filter(filter);
        }

        let table = self.client.fetch_all(&spec, cancel).await?;
        failures.extend(table.provenance.failures.iter().cloned());
        Ok(Relation::from_table(&table, include_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{new_service_table, ServiceMetadata};

    fn service(name: &str, fields: &[&str], has_geometry: bool) -> ServiceMetadata {
        ServiceMetadata {
            name: name.to_string(),
            url: format!("https://portal.test/{}/FeatureServer", name),
            description: None,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            primary_key: Some("FID".to_string()),
            last_edit_date: None,
            has_geometry,
        }
    }

    fn graph(scope: GeometryScope) -> ServiceGraph {
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
        ServiceGraph::from_service_table(&table, scope)
    }

    #[test]
    fn test_neighbours_share_matchable_columns() {
        let g = graph(GeometryScope::All);
        assert_eq!(g.len(), 4);

        let vias: Vec<_> = g
            .neighbours("wd_lad_lu")
            .iter()
            .map(|s| format!("{}:{}", s.service, s.via))
            .collect();
        assert_eq!(
            vias,
            vec!["LAD_2023:LAD23CD", "LAD_2023:LAD23NM", "OA_WD_LU:WD23CD"]
        );
        assert!(g.neighbours("CTRY_2023").is_empty());
    }

    #[test]
    fn test_shortest_path_between_services() {
        let g = graph(GeometryScope::All);
        let path = g.shortest_path("LAD_2023", "OA_WD_LU").unwrap();
        assert_eq!(path.services(), vec!["LAD_2023", "WD_LAD_LU", "OA_WD_LU"]);
        assert_eq!(path.steps[1].via, "WD23CD");
        assert_eq!(
            path.to_string(),
            "LAD_2023 -[LAD23CD]-> WD_LAD_LU -[WD23CD]-> OA_WD_LU"
        );

        assert_eq!(g.shortest_path("LAD_2023", "LAD_2023").unwrap().len(), 1);
        assert!(g.shortest_path("LAD_2023", "CTRY_2023").is_none());
    }

    #[test]
    fn test_paths_keep_only_the_shortest() {
        let g = graph(GeometryScope::All);
        let paths = g.paths("lad23cd", "OA21CD").unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].services(), vec!["WD_LAD_LU", "OA_WD_LU"]);
    }

    #[test]
    fn test_start_and_end_in_one_service() {
        let g = graph(GeometryScope::All);
        let paths = g.paths("WD23CD", "LAD23CD").unwrap();
        assert_eq!(paths, vec![GeocodePath::single("WD_LAD_LU")]);
    }

    #[test]
    fn test_missing_columns_and_disconnected_services() {
        let g = graph(GeometryScope::All);
        assert!(matches!(
            g.paths("MSOA21CD", "OA21CD"),
            Err(LookupError::ColumnNotFound { column }) if column == "MSOA21CD"
        ));
        assert!(matches!(
            g.paths("LAD23CD", "CTRY23CD"),
            Err(LookupError::NoConnectingPath { .. })
        ));
    }

    #[test]
    fn test_geometry_scope_limits_the_graph() {
        let g = graph(GeometryScope::GeometryOnly);
        assert_eq!(g.len(), 2);
        assert!(matches!(
            g.paths("LAD23CD", "OA21CD"),
            Err(LookupError::ColumnNotFound { .. })
        ));
        assert_eq!(graph(GeometryScope::NonGeometry).len(), 2);
    }

    #[test]
    fn test_area_column_restricts_start_services() {
        let g = graph(GeometryScope::All);
        let paths = g.paths_within_area("LAD23NM", "LAD23CD", "OA21CD").unwrap();
        assert_eq!(paths[0].start, "WD_LAD_LU");
        assert!(matches!(
            g.paths_within_area("RGN23NM", "LAD23CD", "OA21CD"),
            Err(LookupError::ColumnNotFound { .. })
        ));
    }

    fn relation(columns: &[&str], rows: &[&[(&str, &str)]]) -> Relation {
        Relation {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|(k, v)| (k.to_string(), CellValue::from(*v)))
                        .collect()
                })
                .collect(),
        }
    }

    #[test]
    fn test_left_join_fans_out_and_keeps_unmatched_rows() {
        let wards = relation(
            &["WD23CD", "WD23NM"],
            &[
                &[("WD23CD", "W1"), ("WD23NM", "Belsize")],
                &[("WD23CD", "W2"), ("WD23NM", "Bloomsbury")],
                &[("WD23CD", "W3"), ("WD23NM", "Unmatched")],
            ],
        );
        let oas = relation(
            &["OA21CD", "WD23CD", "WD23NM"],
            &[
                &[("OA21CD", "O1"), ("WD23CD", "W1"), ("WD23NM", "ignored")],
                &[("OA21CD", "O2"), ("WD23CD", "W1"), ("WD23NM", "ignored")],
                &[("OA21CD", "O3"), ("WD23CD", "W2"), ("WD23NM", "ignored")],
            ],
        );

        let joined = wards.left_join(oas, "WD23CD").finish();
        assert_eq!(joined.columns, vec!["WD23CD", "WD23NM", "OA21CD"]);
        assert_eq!(joined.rows.len(), 4);
        assert_eq!(joined.rows[0]["OA21CD"], CellValue::from("O1"));
        assert_eq!(joined.rows[1]["OA21CD"], CellValue::from("O2"));
        assert_eq!(joined.rows[0]["WD23NM"], CellValue::from("Belsize"));
        assert_eq!(joined.rows[3]["OA21CD"], CellValue::Null);
    }

    #[test]
    fn test_finish_drops_duplicates_and_empty_columns() {
        let rows = relation(
            &["A", "B"],
            &[&[("A", "1")], &[("A", "1")], &[("A", "2")]],
        );
        let finished = rows.finish();
        assert_eq!(finished.columns, vec!["A"]);
        assert_eq!(finished.rows.len(), 2);
        assert!(!finished.rows[0].contains_key("B"));
    }

    #[test]
    fn test_in_clause_escapes_quotes() {
        let clause = in_clause("LAD23NM", &["Bath".to_string(), "King's Lynn".to_string()]);
        assert_eq!(clause, "LAD23NM IN ('Bath','King''s Lynn')");
    }
}
