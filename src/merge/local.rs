//! Merge a freshly built table into the persisted local copy

use crate::error::{LookupError, Result};
use crate::model::{CellValue, ChangeSummary, GeographyCode, LookupTable, MergeResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Remote supersedes local; refused for partial tables
    Replace,
    /// Remote overlays local; local-only records survive
    #[default]
    Union,
}

impl FromStr for MergeMode {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "union" => Ok(Self::Union),
            other => Err(LookupError::config(format!("unknown merge mode '{}'", other))),
        }
    }
}

impl std::fmt::Display for MergeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => f.write_str("replace"),
            Self::Union => f.write_str("union"),
        }
    }
}

/// Merge `remote` into `local` for one geography type.
///
/// A partial remote table never replaces local data: `Replace` fails with
/// [`LookupError::StalenessGuardViolation`] and leaves the caller's copy
/// untouched.
pub fn merge_with_local(
    remote: LookupTable,
    local: Option<LookupTable>,
    mode: MergeMode,
    geography: &str,
) -> Result<MergeResult> {
    if mode == MergeMode::Replace && remote.is_partial() {
        tracing::warn!(
            geography,
            failures = remote.provenance.failures.len(),
            "Refusing to replace local table with partial build"
        );
        return Err(LookupError::StalenessGuardViolation {
            geography: geography.to_string(),
            failures: remote.provenance.failures.clone(),
        });
    }

    let (table, summary) = match local {
        None => {
            let summary = ChangeSummary {
                added: remote.len(),
                ..ChangeSummary::default()
            };
            (remote, summary)
        }
        Some(local) => match mode {
            MergeMode::Replace => replace(remote, local),
            MergeMode::Union => union(remote, local),
        },
    };

    tracing::info!(
        geography,
        mode = %mode,
        added = summary.added,
        overwritten = summary.overwritten,
        unchanged = summary.unchanged,
        preserved = summary.preserved,
        dropped = summary.dropped,
        "Merged with local table"
    );

    let failures = table.provenance.failures.clone();
    Ok(MergeResult {
        table,
        summary,
        failures,
    })
}

fn replace(remote: LookupTable, local: LookupTable) -> (LookupTable, ChangeSummary) {
    let previous: HashMap<&GeographyCode, _> =
        local.records.iter().map(|r| (&r.code, &r.values)).collect();
    let mut summary = ChangeSummary::default();

    for record in &remote.records {
        match previous.get(&record.code) {
            None => summary.added += 1,
            Some(values) if same_values(values, &record.values) => summary.unchanged += 1,
            Some(_) => summary.overwritten += 1,
        }
    }
    let incoming: HashSet<&GeographyCode> = remote.codes().collect();
    summary.dropped = local
        .records
        .iter()
        .filter(|r| !incoming.contains(&r.code))
        .count();

    (remote, summary)
}

fn union(remote: LookupTable, mut local: LookupTable) -> (LookupTable, ChangeSummary) {
    let mut summary = ChangeSummary::default();
    let index: HashMap<GeographyCode, usize> = local
        .records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.code.clone(), i))
        .collect();
    let mut touched = HashSet::new();

    local.code_column = remote.code_column.clone();
    local.extend_schema(&remote.schema);
    local.provenance = remote.provenance;

    for record in remote.records {
        match index.get(&record.code) {
            Some(&pos) => {
                touched.insert(pos);
                let existing = &mut local.records[pos];
                let before = existing.values.clone();
                for (column, value) in record.values {
                    // a null only fills; it never erases a local value
                    if !value.is_null() || !existing.values.contains_key(&column) {
                        existing.values.insert(column, value);
                    }
                }
                if same_values(&existing.values, &before) {
                    summary.unchanged += 1;
                } else {
                    summary.overwritten += 1;
                }
            }
            None => {
                summary.added += 1;
                local.records.push(record);
            }
        }
    }
    summary.preserved = index.len() - touched.len();
    local.fill_missing_columns();

    (local, summary)
}

/// Equal column for column, an absent column counting as null
fn same_values(a: &BTreeMap<String, CellValue>, b: &BTreeMap<String, CellValue>) -> bool {
    let null = CellValue::Null;
    a.keys()
        .chain(b.keys())
        .all(|column| a.get(column).unwrap_or(&null) == b.get(column).unwrap_or(&null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, SourceFailure};
    use crate::model::{CellValue, LookupRecord};

    fn code(s: &str) -> GeographyCode {
        GeographyCode::new(s).unwrap()
    }

    fn table(source: &str, rows: &[(&str, &str)]) -> LookupTable {
        let mut t = LookupTable::new("code", vec!["name".to_string()], source);
        t.upsert_records(
            rows.iter()
                .map(|(c, n)| LookupRecord::new(code(c)).with("name", *n)),
        );
        t
    }

    fn partial(mut t: LookupTable) -> LookupTable {
        t.provenance.record_failure(SourceFailure {
            source: t.source().to_string(),
            dataset: "ds".into(),
            page: None,
            kind: FailureKind::TransientExhausted { attempts: 3 },
            message: "timeout".into(),
        });
        t
    }

    #[test]
    fn test_union_scenario_counts() {
        let local = table("local", &[("A", "Alpha"), ("B", "Beta")]);
        let remote = table("remote", &[("B", "Beta v2"), ("C", "Gamma")]);

        let result = merge_with_local(remote, Some(local), MergeMode::Union, "lad").unwrap();
        assert_eq!(result.summary.added, 1);
        assert_eq!(result.summary.overwritten, 1);
        assert_eq!(result.summary.preserved, 1);
        assert_eq!(result.summary.dropped, 0);

        let codes: Vec<_> = result.table.codes().map(|c| c.as_str()).collect();
        assert_eq!(codes, vec!["A", "B", "C"]);
        assert_eq!(
            result.table.get(&code("B")).unwrap().get("name"),
            &CellValue::from("Beta v2")
        );
    }

    #[test]
    fn test_union_keeps_local_only_columns() {
        let mut local = table("local", &[("A", "Alpha")]);
        local.schema.push("note".into());
        local.records[0]
            .values
            .insert("note".into(), CellValue::from("keep me"));
        let remote = table("remote", &[("A", "Alpha")]);

        let result = merge_with_local(remote, Some(local), MergeMode::Union, "lad").unwrap();
        assert_eq!(result.summary.unchanged, 1);
        assert_eq!(
            result.table.records[0].get("note"),
            &CellValue::from("keep me")
        );
    }

    #[test]
    fn test_null_in_new_column_is_unchanged() {
        let local = table("local", &[("A", "Alpha")]);
        let mut remote = table("remote", &[("A", "Alpha")]);
        remote.schema.push("population".into());
        remote.fill_missing_columns();

        let result =
            merge_with_local(remote.clone(), Some(local.clone()), MergeMode::Union, "lad").unwrap();
        assert_eq!(result.summary.unchanged, 1);
        assert_eq!(result.summary.overwritten, 0);
        assert_eq!(result.table.records[0].get("population"), &CellValue::Null);

        let result = merge_with_local(remote, Some(local), MergeMode::Replace, "lad").unwrap();
        assert_eq!(result.summary.unchanged, 1);
        assert_eq!(result.summary.overwritten, 0);
    }

    #[test]
    fn test_replace_counts_dropped() {
        let local = table("local", &[("A", "Alpha"), ("B", "Beta")]);
        let remote = table("remote", &[("B", "Beta"), ("C", "Gamma")]);

        let result = merge_with_local(remote, Some(local), MergeMode::Replace, "lad").unwrap();
        assert_eq!(result.summary.added, 1);
        assert_eq!(result.summary.unchanged, 1);
        assert_eq!(result.summary.dropped, 1);
        assert_eq!(result.table.len(), 2);
    }

    #[test]
    fn test_replace_refuses_partial() {
        let local = table("local", &[("A", "Alpha")]);
        let remote = partial(table("remote", &[("B", "Beta")]));

        let err = merge_with_local(remote, Some(local), MergeMode::Replace, "lad").unwrap_err();
        match err {
            LookupError::StalenessGuardViolation {
                geography,
                failures,
            } => {
                assert_eq!(geography, "lad");
                assert_eq!(failures.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_union_accepts_partial_and_reports_failures() {
        let local = table("local", &[("A", "Alpha")]);
        let remote = partial(table("remote", &[("B", "Beta")]));

        let result = merge_with_local(remote, Some(local), MergeMode::Union, "lad").unwrap();
        assert!(result.is_partial());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.summary.preserved, 1);
    }

    #[test]
    fn test_no_local_means_everything_added() {
        let remote = table("remote", &[("A", "Alpha"), ("B", "Beta")]);
        let result = merge_with_local(remote, None, MergeMode::Replace, "lad").unwrap();
        assert_eq!(result.summary.added, 2);
        assert_eq!(result.summary.dropped, 0);
    }

    #[test]
    fn test_merge_mode_parse() {
        assert_eq!("Replace".parse::<MergeMode>().unwrap(), MergeMode::Replace);
        assert_eq!("union".parse::<MergeMode>().unwrap(), MergeMode::Union);
        assert!("append".parse::<MergeMode>().is_err());
    }
}
