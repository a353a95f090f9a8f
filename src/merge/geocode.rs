//! Cross-source merge under caller-supplied precedence

use crate::error::{LookupError, Result};
use crate::model::{GeographyCode, LookupRecord, LookupTable, Provenance, ValueConflict};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered source ids, highest precedence first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precedence(Vec<String>);

impl Precedence {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(sources.into_iter().map(Into::into).collect())
    }

    /// Position of `source`, or `None` when unlisted
    pub fn rank(&self, source: &str) -> Option<usize> {
        self.0.iter().position(|s| s == source)
    }

    pub fn sources(&self) -> &[String] {
        &self.0
    }
}

/// Merged table plus every value a lower source could not contribute
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMerge {
    pub table: LookupTable,
    pub conflicts: Vec<ValueConflict>,
}

pub struct GeocodeMerger {
    precedence: Precedence,
}

impl GeocodeMerger {
    pub fn new(precedence: Precedence) -> Self {
        Self { precedence }
    }

    /// Left-biased union of `tables` in precedence order.
    ///
    /// The highest-ranked table defining a code owns the record; lower tables
    /// only fill columns that are absent or null there. Unlisted sources rank
    /// after listed ones, keeping input order.
    pub fn merge(&self, tables: Vec<LookupTable>) -> Result<SourceMerge> {
        if tables.is_empty() {
            return Err(LookupError::EmptyMergeInput);
        }

        let ranked = self.rank(tables);
        let names: Vec<String> = ranked.iter().map(|t| t.source().to_string()).collect();
        let mut out = LookupTable::new(ranked[0].code_column.clone(), Vec::new(), &names.join("+"));
        out.provenance = combined_provenance(&ranked, &names);

        let mut index: HashMap<GeographyCode, usize> = HashMap::new();
        // Per record: column -> rank of the source that supplied it
        let mut origins: Vec<HashMap<String, usize>> = Vec::new();
        let mut conflicts = Vec::new();

        for (rank, table) in ranked.into_iter().enumerate() {
            out.extend_schema(&table.schema);
            for record in table.records {
                match index.get(&record.code) {
                    Some(&pos) => fill_record(
                        &mut out.records[pos],
                        &mut origins[pos],
                        record,
                        rank,
                        &names,
                        &mut conflicts,
                    ),
                    None => {
                        index.insert(record.code.clone(), out.records.len());
                        origins.push(
                            record
                                .values
                                .iter()
                                .filter(|(_, v)| !v.is_null())
                                .map(|(k, _)| (k.clone(), rank))
                                .collect(),
                        );
                        out.records.push(record);
                    }
                }
            }
        }
        out.fill_missing_columns();

        if !conflicts.is_empty() {
            tracing::warn!(
                sources = %out.source(),
                conflicts = conflicts.len(),
                "Lower-precedence values discarded"
            );
        }
        tracing::info!(
            sources = %out.source(),
            records = out.len(),
            columns = out.schema.len(),
            partial = out.is_partial(),
            "Merged source tables"
        );

        Ok(SourceMerge {
            table: out,
            conflicts,
        })
    }

    fn rank(&self, tables: Vec<LookupTable>) -> Vec<LookupTable> {
        let listed = self.precedence.sources().len();
        let mut ranked: Vec<(usize, LookupTable)> = tables
            .into_iter()
            .map(|t| {
                let rank = self.precedence.rank(t.source()).unwrap_or_else(|| {
                    tracing::info!(
                        source = %t.source(),
                        "Source not in precedence list, ranking last"
                    );
                    listed
                });
                (rank, t)
            })
            .collect();
        // stable: unlisted sources keep input order
        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, t)| t).collect()
    }
}

fn fill_record(
    kept: &mut LookupRecord,
    origin: &mut HashMap<String, usize>,
    incoming: LookupRecord,
    rank: usize,
    names: &[String],
    conflicts: &mut Vec<ValueConflict>,
) {
    for (column, value) in incoming.values {
        if value.is_null() {
            continue;
        }
        let existing = kept.values.get(&column);
        match existing {
            Some(current) if !current.is_null() => {
                if current != &value {
                    let kept_rank = origin.get(&column).copied().unwrap_or(0);
                    conflicts.push(ValueConflict {
                        code: kept.code.clone(),
                        column,
                        kept_source: names[kept_rank].clone(),
                        kept: current.clone(),
                        discarded_source: names[rank].clone(),
                        discarded: value,
                    });
                }
            }
            _ => {
                origin.insert(column.clone(), rank);
                kept.values.insert(column, value);
            }
        }
    }
}

fn combined_provenance(ranked: &[LookupTable], names: &[String]) -> Provenance {
    let mut provenance = Provenance::new(names.join("+"));
    if let Some(oldest) = ranked.iter().map(|t| t.provenance.fetched_at).min() {
        provenance.fetched_at = oldest;
    }
    for table in ranked {
        provenance.page_count += table.provenance.page_count;
        provenance.partial |= table.is_partial();
        provenance
            .failures
            .extend(table.provenance.failures.iter().cloned());
    }
    provenance
}
