//! Complaint counts per facility, rolled up per parent organisation (ope6)

use crate::error::StepFailure;
use crate::ingestion::types::{SourceType, StagingRow, StagingSnapshot, Value};
use crate::merge::canonical::{CanonicalTable, JoinKey};
use crate::merge::primitives::group_by;
use std::collections::HashMap;

/// Complaint category with the keywords that place an issue in it
struct Category {
    by_fac_code: &'static str,
    by_ope_id: &'static str,
    keywords: &'static [&'static str],
}

const CATEGORIES: &[Category] = &[
    Category {
        by_fac_code: "complaints_financial_by_fac_code",
        by_ope_id: "complaints_financial_by_ope_id_do_not_sum",
        keywords: &["financial"],
    },
    Category {
        by_fac_code: "complaints_quality_by_fac_code",
        by_ope_id: "complaints_quality_by_ope_id_do_not_sum",
        keywords: &["quality"],
    },
    Category {
        by_fac_code: "complaints_refund_by_fac_code",
        by_ope_id: "complaints_refund_by_ope_id_do_not_sum",
        keywords: &["refund"],
    },
    Category {
        by_fac_code: "complaints_marketing_by_fac_code",
        by_ope_id: "complaints_marketing_by_ope_id_do_not_sum",
        keywords: &["recruit", "marketing"],
    },
    Category {
        by_fac_code: "complaints_accreditation_by_fac_code",
        by_ope_id: "complaints_accreditation_by_ope_id_do_not_sum",
        keywords: &["accreditation"],
    },
    Category {
        by_fac_code: "complaints_degree_requirements_by_fac_code",
        by_ope_id: "complaints_degree_requirements_by_ope_id_do_not_sum",
        keywords: &["degree plan", "requirements"],
    },
    Category {
        by_fac_code: "complaints_student_loans_by_fac_code",
        by_ope_id: "complaints_student_loans_by_ope_id_do_not_sum",
        keywords: &["student loan"],
    },
    Category {
        by_fac_code: "complaints_grades_by_fac_code",
        by_ope_id: "complaints_grades_by_ope_id_do_not_sum",
        keywords: &["grade"],
    },
    Category {
        by_fac_code: "complaints_credit_transfer_by_fac_code",
        by_ope_id: "complaints_credit_transfer_by_ope_id_do_not_sum",
        keywords: &["transfer"],
    },
    Category {
        by_fac_code: "complaints_job_by_fac_code",
        by_ope_id: "complaints_jobs_by_ope_id_do_not_sum",
        keywords: &["job", "post-graduation"],
    },
    Category {
        by_fac_code: "complaints_transcript_by_fac_code",
        by_ope_id: "complaints_transcript_by_ope_id_do_not_sum",
        keywords: &["transcript"],
    },
    Category {
        by_fac_code: "complaints_other_by_fac_code",
        by_ope_id: "complaints_other_by_ope_id_do_not_sum",
        keywords: &["other"],
    },
];

/// Index of the catch-all category
const OTHER: usize = CATEGORIES.len() - 1;

/// Categories an issue text falls into; unmatched issues count as "other"
fn categorize(issues: &str) -> Vec<usize> {
    let issues = issues.to_lowercase();
    let matched: Vec<usize> = CATEGORIES
        .iter()
        .enumerate()
        .filter(|(_, c)| c.keywords.iter().any(|k| issues.contains(k)))
        .map(|(i, _)| i)
        .collect();

    if matched.is_empty() {
        vec![OTHER]
    } else {
        matched
    }
}

/// Total and per-category counts for one facility
fn count(rows: &[&StagingRow]) -> (i64, [i64; CATEGORIES.len()]) {
    let mut counts = [0; CATEGORIES.len()];
    for row in rows {
        for i in categorize(row.text("issues").unwrap_or("")) {
            counts[i] += 1;
        }
    }
    (rows.len() as i64, counts)
}

pub fn apply(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    let by_facility = group_by(staging.rows(SourceType::Complaint), JoinKey::FacilityCode);
    let mut matched = 0;

    for institution in table.iter_mut() {
        let Some(rows) = by_facility.get(institution.facility_code()) else {
            continue;
        };

        let (total, counts) = count(rows);
        institution.set("complaints_facility_code", Value::Int(total))?;
        for (category, n) in CATEGORIES.iter().zip(counts) {
            institution.set(category.by_fac_code, Value::Int(n))?;
        }
        matched += 1;
    }

    roll_up_by_ope6(table)?;

    Ok(matched)
}

/// Sum facility counts across each ope6 group that has any complaint data
fn roll_up_by_ope6(table: &mut CanonicalTable) -> Result<(), StepFailure> {
    let mut sums: HashMap<String, (i64, [i64; CATEGORIES.len()])> = HashMap::new();

    for institution in table.iter() {
        let Some(ope6) = JoinKey::Ope6.of_institution(institution) else {
            continue;
        };
        let Some(total) = institution.get("complaints_facility_code").as_i64() else {
            continue;
        };

        let entry = sums.entry(ope6).or_insert((0, [0; CATEGORIES.len()]));
        entry.0 += total;
        for (i, category) in CATEGORIES.iter().enumerate() {
            entry.1[i] += institution.get(category.by_fac_code).as_i64().unwrap_or(0);
        }
    }

    for institution in table.iter_mut() {
        let Some((total, counts)) = JoinKey::Ope6
            .of_institution(institution)
            .and_then(|k| sums.get(&k))
            .copied()
        else {
            continue;
        };

        institution.set("complaints_main_campus_roll_up", Value::Int(total))?;
        for (category, n) in CATEGORIES.iter().zip(counts) {
            institution.set(category.by_ope_id, Value::Int(n))?;
        }
    }

    Ok(())
}
