//! Accreditation merge: ranked type, dominant status, cautions
//!
//! Only current institutional accreditations count. When an institution has
//! several, the highest-ranked type wins (HYBRID < NATIONAL < REGIONAL), and
//! its status is taken from rows of that type only (PROBATION < SHOW CAUSE).

use crate::error::StepFailure;
use crate::ingestion::types::{StagingRow, StagingSnapshot, SourceType, Value};
use crate::merge::canonical::{CanonicalTable, JoinKey};
use crate::merge::primitives::{group_by, Cautions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccreditationType {
    Hybrid,
    National,
    Regional,
}

impl AccreditationType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "hybrid" => Some(AccreditationType::Hybrid),
            "national" => Some(AccreditationType::National),
            "regional" => Some(AccreditationType::Regional),
            _ => None,
        }
    }
}

/// Statuses that carry over to the canonical row, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccreditationStatus {
    Probation,
    ShowCause,
}

impl AccreditationStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "probation" => Some(AccreditationStatus::Probation),
            "show cause" => Some(AccreditationStatus::ShowCause),
            _ => None,
        }
    }
}

fn is_current_institutional(row: &StagingRow) -> bool {
    let current = row
        .text("periods")
        .is_some_and(|p| p.to_lowercase().contains("current"));
    let institutional = row
        .text("csv_accreditation_type")
        .is_some_and(|t| t.eq_ignore_ascii_case("institutional"));

    current && institutional && JoinKey::Cross.of_staging(row).is_some()
}

/// Highest-ranked type among the rows, with the row text it came from
fn resolve_type<'a>(rows: &[&'a StagingRow]) -> Option<(AccreditationType, &'a str)> {
    rows.iter()
        .filter_map(|row| {
            let text = row.text("accreditation_type")?;
            AccreditationType::parse(text).map(|rank| (rank, text))
        })
        .max_by_key(|(rank, _)| *rank)
}

/// Dominant status among rows of the resolved type. Ties go to the later row.
fn resolve_status<'a>(rows: &[&'a StagingRow], resolved: &str) -> Option<&'a str> {
    rows.iter()
        .filter(|row| row.text("accreditation_type") == Some(resolved))
        .filter_map(|row| {
            let text = row.text("accreditation_status")?;
            AccreditationStatus::parse(text).map(|rank| (rank, text))
        })
        .max_by_key(|(rank, _)| *rank)
        .map(|(_, text)| text)
}

pub fn apply(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    let rows: Vec<StagingRow> = staging
        .rows(SourceType::Accreditation)
        .iter()
        .filter(|row| is_current_institutional(row))
        .cloned()
        .collect();

    let groups = group_by(&rows, JoinKey::Cross);
    let mut matched = 0;

    for institution in table.iter_mut() {
        let Some(group) = JoinKey::Cross
            .of_institution(institution)
            .and_then(|k| groups.get(&k))
        else {
            continue;
        };

        let Some((_, type_text)) = resolve_type(group) else {
            continue;
        };
        institution.set("accreditation_type", Value::Text(type_text.to_string()))?;
        matched += 1;

        if let Some(status) = resolve_status(group, type_text) {
            institution.set("accreditation_status", Value::Text(status.to_string()))?;
        }
    }

    let cautions = Cautions::collect(JoinKey::Cross, &rows, |row| {
        row.text("accreditation_status")
            .map(|status| Some(format!("Accreditation ({})", status)))
    });
    cautions.apply(table, |_| true)?;

    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::canonical::Institution;

    fn mock_table() -> CanonicalTable {
        let mut table = CanonicalTable::new();
        let mut inst = Institution::new();
        inst.set("facility_code", Value::Text("11000123".to_string())).unwrap();
        inst.set("cross", Value::Text("123456".to_string())).unwrap();
        table.insert(inst).unwrap();
        table
    }

    fn accreditation(kind: &str, status: Option<&str>) -> StagingRow {
        StagingRow::from([
            ("cross", Value::Text("123456".to_string())),
            ("accreditation_type", Value::Text(kind.to_string())),
            ("csv_accreditation_type", Value::Text("Institutional".to_string())),
            ("periods", Value::Text("01/01/2010 - Current".to_string())),
            (
                "accreditation_status",
                status.map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null),
            ),
        ])
    }

    fn resolved(rows: Vec<StagingRow>) -> Institution {
        let mut staging = StagingSnapshot::new();
        staging.insert(SourceType::Accreditation, rows);

        let mut table = mock_table();
        apply(&mut table, &staging).unwrap();
        table.get("11000123").unwrap().clone()
    }

    #[test]
    fn test_type_ranking_triples() {
        for (types, expected) in [
            (["HYBRID", "NATIONAL", "HYBRID"], "NATIONAL"),
            (["HYBRID", "REGIONAL", "HYBRID"], "REGIONAL"),
            (["NATIONAL", "REGIONAL", "NATIONAL"], "REGIONAL"),
        ] {
            let rows = types.iter().map(|t| accreditation(t, None)).collect();
            let inst = resolved(rows);
            assert_eq!(inst.text("accreditation_type"), Some(expected), "{:?}", types);
        }
    }

    #[test]
    fn test_show_cause_dominates_probation() {
        let inst = resolved(vec![
            accreditation("REGIONAL", Some("show cause")),
            accreditation("REGIONAL", Some("probation")),
        ]);
        assert_eq!(inst.text("accreditation_status"), Some("show cause"));
    }

    #[test]
    fn test_status_only_from_resolved_type() {
        let inst = resolved(vec![
            accreditation("HYBRID", Some("show cause")),
            accreditation("REGIONAL", Some("probation")),
        ]);
        assert_eq!(inst.text("accreditation_type"), Some("REGIONAL"));
        assert_eq!(inst.text("accreditation_status"), Some("probation"));

        // Both statuses still raise cautions
        assert_eq!(inst.get("caution_flag"), &Value::Bool(true));
        assert_eq!(
            inst.text("caution_flag_reason"),
            Some("Accreditation (show cause), Accreditation (probation)")
        );
    }

    #[test]
    fn test_non_current_and_specialized_rows_are_ignored() {
        let mut expired = accreditation("REGIONAL", Some("probation"));
        expired.set("periods", Value::Text("01/01/2001 - 01/01/2005".to_string()));
        let mut specialized = accreditation("NATIONAL", None);
        specialized.set("csv_accreditation_type", Value::Text("Specialized".to_string()));

        let inst = resolved(vec![expired, specialized, accreditation("HYBRID", None)]);

        assert_eq!(inst.text("accreditation_type"), Some("HYBRID"));
        assert!(inst.get("accreditation_status").is_null());
        assert!(inst.get("caution_flag").is_null());
    }
}
