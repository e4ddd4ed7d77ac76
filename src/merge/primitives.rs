//! Set operations shared by the merge steps
//!
//! Every primitive works over the whole canonical table at once. Null keys
//! never match; when several staging rows share a key the last one in file
//! order wins.

use crate::error::StepFailure;
use crate::ingestion::types::{StagingRow, Value};
use crate::merge::canonical::{CanonicalTable, Institution, JoinKey};
use std::collections::{HashMap, HashSet};

/// Separator for caution reasons
pub const REASON_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    /// Copy the staging value whatever the canonical value is
    Always,
    /// Copy only into columns that are still null
    IfNull,
}

/// Last staging row per key
pub fn index_last(rows: &[StagingRow], key: JoinKey) -> HashMap<String, &StagingRow> {
    let mut index = HashMap::new();
    for row in rows {
        if let Some(k) = key.of_staging(row) {
            index.insert(k, row);
        }
    }
    index
}

/// All staging rows per key, in file order
pub fn group_by(rows: &[StagingRow], key: JoinKey) -> HashMap<String, Vec<&StagingRow>> {
    let mut groups: HashMap<String, Vec<&StagingRow>> = HashMap::new();
    for row in rows {
        if let Some(k) = key.of_staging(row) {
            groups.entry(k).or_default().push(row);
        }
    }
    groups
}

/// Copy `columns` from the matching staging row into each canonical row the guard admits.
/// Returns the number of canonical rows matched.
pub fn copy_columns<G>(
    table: &mut CanonicalTable,
    rows: &[StagingRow],
    key: JoinKey,
    columns: &[&str],
    mode: Overwrite,
    guard: G,
) -> Result<usize, StepFailure>
where
    G: Fn(&Institution, &StagingRow) -> bool,
{
    let index = index_last(rows, key);
    let mut matched = 0;

    for institution in table.iter_mut() {
        let Some(row) = key.of_institution(institution).and_then(|k| index.get(&k)) else {
            continue;
        };
        if !guard(institution, row) {
            continue;
        }

        matched += 1;
        for column in columns {
            if mode == Overwrite::IfNull && !institution.get(column).is_null() {
                continue;
            }
            institution.set(column, row.get(column).clone())?;
        }
    }

    Ok(matched)
}

/// Set a boolean column to true on every matched row; never resets to false
pub fn set_flag(
    table: &mut CanonicalTable,
    rows: &[StagingRow],
    key: JoinKey,
    column: &str,
) -> Result<usize, StepFailure> {
    let keys: HashSet<String> = rows.iter().filter_map(|r| key.of_staging(r)).collect();
    let mut matched = 0;

    for institution in table.iter_mut() {
        if key.of_institution(institution).is_some_and(|k| keys.contains(&k)) {
            institution.set(column, Value::Bool(true))?;
            matched += 1;
        }
    }

    Ok(matched)
}

/// Append reasons to `caution_flag_reason`: set if null, else joined after ", "
pub fn append_caution_reasons(
    institution: &mut Institution,
    reasons: &[String],
) -> Result<(), StepFailure> {
    if reasons.is_empty() {
        return Ok(());
    }

    let joined = reasons.join(REASON_SEPARATOR);
    let combined = match institution.text("caution_flag_reason") {
        Some(existing) => format!("{}{}{}", existing, REASON_SEPARATOR, joined),
        None => joined,
    };

    institution.set("caution_flag_reason", Value::Text(combined))
}

/// Caution flags and reasons gathered from one staging relation, keyed by join value
#[derive(Debug, Clone)]
pub struct Cautions {
    key: JoinKey,
    flagged: HashSet<String>,
    reasons: HashMap<String, Vec<String>>,
}

impl Cautions {
    pub fn new(key: JoinKey) -> Self {
        Cautions {
            key,
            flagged: HashSet::new(),
            reasons: HashMap::new(),
        }
    }

    /// Walk the staging rows. `trigger` decides whether a row raises the flag and
    /// which reason (if any) it contributes.
    pub fn collect<F>(key: JoinKey, rows: &[StagingRow], trigger: F) -> Self
    where
        F: Fn(&StagingRow) -> Option<Option<String>>,
    {
        let mut cautions = Cautions::new(key);

        for row in rows {
            let Some(k) = key.of_staging(row) else {
                continue;
            };
            let Some(reason) = trigger(row) else {
                continue;
            };

            cautions.flagged.insert(k.clone());
            if let Some(reason) = reason {
                let reasons = cautions.reasons.entry(k).or_default();
                if !reasons.contains(&reason) {
                    reasons.push(reason);
                }
            }
        }

        cautions
    }

    pub fn reasons_for(&self, key_value: &str) -> &[String] {
        self.reasons.get(key_value).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Raise the flag and append reasons on matched rows the guard admits
    pub fn apply<G>(&self, table: &mut CanonicalTable, guard: G) -> Result<usize, StepFailure>
    where
        G: Fn(&Institution) -> bool,
    {
        let mut flagged = 0;

        for institution in table.iter_mut() {
            let Some(k) = self.key.of_institution(institution) else {
                continue;
            };
            if !self.flagged.contains(&k) || !guard(institution) {
                continue;
            }

            institution.set("caution_flag", Value::Bool(true))?;
            append_caution_reasons(institution, self.reasons_for(&k))?;
            flagged += 1;
        }

        Ok(flagged)
    }
}
