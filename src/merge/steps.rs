//! Update steps - one function per staging relation
//!
//! Each step takes the whole canonical table and the staging snapshot and
//! returns how many canonical rows it matched.

use crate::error::StepFailure;
use crate::ingestion::types::{SourceType, StagingSnapshot};
use crate::merge::canonical::{CanonicalTable, JoinKey};
use crate::merge::primitives::{copy_columns, set_flag, Cautions, Overwrite};
use std::collections::HashSet;

pub const DOD_PROBATION: &str = "DoD Probation For Military Tuition Assistance";
pub const NO_IN_STATE_TUITION: &str = "Does Not Offer Required In-State Tuition Rates";

/// Columns a roster row contributes to its canonical row
pub const WEAMS_COLUMNS: &[&str] = &[
    "facility_code",
    "institution",
    "city",
    "state",
    "zip",
    "country",
    "type",
    "correspondence",
    "flight",
    "bah",
    "accredited",
    "poe",
    "yr",
    "va_highest_degree_offered",
];

fn copy(
    table: &mut CanonicalTable,
    staging: &StagingSnapshot,
    source: SourceType,
    key: JoinKey,
    columns: &[&str],
) -> Result<usize, StepFailure> {
    copy_columns(table, staging.rows(source), key, columns, Overwrite::Always, |_, _| true)
}

pub fn crosswalk(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy(table, staging, SourceType::VaCrosswalk, JoinKey::FacilityCode, &["cross", "ope", "ope6"])
}

pub fn sva(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    set_flag(table, staging.rows(SourceType::Sva), JoinKey::Cross, "student_veteran")?;
    copy(table, staging, SourceType::Sva, JoinKey::Cross, &["student_veteran_link"])
}

pub fn vsoc(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy(
        table,
        staging,
        SourceType::Vsoc,
        JoinKey::FacilityCode,
        &["vetsuccess_name", "vetsuccess_email"],
    )
}

pub fn eight_key(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    set_flag(table, staging.rows(SourceType::EightKey), JoinKey::Cross, "eight_keys")
}

pub fn arf_gibill(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy(table, staging, SourceType::ArfGibill, JoinKey::FacilityCode, &["gibill"])
}

pub fn p911_tf(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy(
        table,
        staging,
        SourceType::P911Tf,
        JoinKey::FacilityCode,
        &["p911_tuition_fees", "p911_recipients"],
    )
}

pub fn p911_yr(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy(
        table,
        staging,
        SourceType::P911Yr,
        JoinKey::FacilityCode,
        &["p911_yellow_ribbon", "p911_yr_recipients"],
    )
}

pub fn mou(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    let rows = staging.rows(SourceType::Mou);
    let matched = copy(table, staging, SourceType::Mou, JoinKey::Ope6, &["dodmou"])?;

    let cautions = Cautions::collect(JoinKey::Ope6, rows, |row| {
        row.is_true("dod_status")
            .then(|| Some(DOD_PROBATION.to_string()))
    });
    cautions.apply(table, |_| true)?;

    Ok(matched)
}

pub fn scorecard(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy(
        table,
        staging,
        SourceType::Scorecard,
        JoinKey::Cross,
        &[
            "insturl",
            "pred_degree_awarded",
            "locale",
            "undergrad_enrollment",
            "retention_all_students_ba",
            "retention_all_students_otb",
            "graduation_rate_all_students",
            "salary_all_students",
            "repayment_rate_all_students",
            "avg_stu_loan_debt",
        ],
    )
}

pub fn ipeds_ic(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy(
        table,
        staging,
        SourceType::IpedsIc,
        JoinKey::Cross,
        &[
            "credit_for_mil_training",
            "vet_poc",
            "student_vet_grp_ipeds",
            "soc_member",
            "calendar",
            "online_all",
        ],
    )
}

pub fn ipeds_hd(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy(table, staging, SourceType::IpedsHd, JoinKey::Cross, &["vet_tuition_policy_url"])
}

const TUITION_COLUMNS: &[&str] = &["tuition_in_state", "tuition_out_of_state", "books"];

pub fn ipeds_ic_ay(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy(table, staging, SourceType::IpedsIcAy, JoinKey::Cross, TUITION_COLUMNS)
}

/// Program-year charges only fill gaps left by the academic-year extract
pub fn ipeds_ic_py(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy_columns(
        table,
        staging.rows(SourceType::IpedsIcPy),
        JoinKey::Cross,
        TUITION_COLUMNS,
        Overwrite::IfNull,
        |_, _| true,
    )
}

/// Facility-level Section 702 compliance; public schools only
pub fn sec702_school(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    let rows = staging.rows(SourceType::Sec702School);

    let matched = copy_columns(
        table,
        rows,
        JoinKey::FacilityCode,
        &["sec_702"],
        Overwrite::Always,
        |institution, row| institution.is_public() && !row.get("sec_702").is_null(),
    )?;

    let cautions = Cautions::collect(JoinKey::FacilityCode, rows, |row| {
        row.is_false("sec_702")
            .then(|| Some(NO_IN_STATE_TUITION.to_string()))
    });
    cautions.apply(table, |institution| institution.is_public())?;

    Ok(matched)
}

/// State-level Section 702 compliance. Subordinate to the facility-level step:
/// it only touches public schools that step left without a value, and never
/// repeats a reason already recorded.
pub fn sec702(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    let rows = staging.rows(SourceType::Sec702);

    let unset: HashSet<String> = table
        .iter()
        .filter(|i| i.is_public() && i.get("sec_702").is_null())
        .map(|i| i.facility_code().to_string())
        .collect();

    let matched = copy_columns(
        table,
        rows,
        JoinKey::State,
        &["sec_702"],
        Overwrite::IfNull,
        |institution, _| institution.is_public(),
    )?;

    let cautions = Cautions::collect(JoinKey::State, rows, |row| {
        row.is_false("sec_702")
            .then(|| Some(NO_IN_STATE_TUITION.to_string()))
    });
    cautions.apply(table, |institution| {
        let already_noted = institution
            .text("caution_flag_reason")
            .is_some_and(|reason| reason.contains(NO_IN_STATE_TUITION));

        institution.is_public() && unset.contains(institution.facility_code()) && !already_noted
    })?;

    Ok(matched)
}

pub fn settlement(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    let cautions = Cautions::collect(JoinKey::Cross, staging.rows(SourceType::Settlement), |row| {
        Some(row.text("settlement_description").map(str::to_string))
    });
    cautions.apply(table, |_| true)
}

pub fn hcm(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    let cautions = Cautions::collect(JoinKey::Ope6, staging.rows(SourceType::Hcm), |row| {
        Some(
            row.text("hcm_reason")
                .map(|reason| format!("Heightened Cash Monitoring ({})", reason)),
        )
    });
    cautions.apply(table, |_| true)
}

pub fn outcome(table: &mut CanonicalTable, staging: &StagingSnapshot) -> Result<usize, StepFailure> {
    copy(
        table,
        staging,
        SourceType::Outcome,
        JoinKey::FacilityCode,
        &[
            "retention_rate_veteran_ba",
            "retention_rate_veteran_otb",
            "persistance_rate_veteran_ba",
            "persistance_rate_veteran_otb",
            "graduation_rate_veteran",
            "transfer_out_rate_veteran",
            "transfer_out_rate_all_students",
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::types::{StagingRow, Value};
    use crate::merge::canonical::Institution;

    fn text(value: &str) -> Value {
        Value::Text(value.to_string())
    }

    fn mock_institution(code: &str, kind: &str, state: &str) -> Institution {
        let mut inst = Institution::new();
        inst.set("facility_code", text(code)).unwrap();
        inst.set("type", text(kind)).unwrap();
        inst.set("state", text(state)).unwrap();
        inst.set("cross", text(&format!("{}0", &code[..5]))).unwrap();
        inst.set("ope6", text("001234")).unwrap();
        inst
    }

    fn mock_table() -> CanonicalTable {
        let mut table = CanonicalTable::new();
        table.insert(mock_institution("11000001", "public", "TX")).unwrap();
        table.insert(mock_institution("21000002", "for profit", "TX")).unwrap();
        table
    }

    fn snapshot(source: SourceType, rows: Vec<StagingRow>) -> StagingSnapshot {
        let mut staging = StagingSnapshot::new();
        staging.insert(source, rows);
        staging
    }

    #[test]
    fn test_sec702_reason_appears_once() {
        let mut table = mock_table();
        let mut staging = snapshot(
            SourceType::Sec702School,
            vec![StagingRow::from([
                ("facility_code", text("11000001")),
                ("sec_702", Value::Bool(false)),
            ])],
        );
        staging.insert(
            SourceType::Sec702,
            vec![StagingRow::from([("state", text("TX")), ("sec_702", Value::Bool(false))])],
        );

        sec702_school(&mut table, &staging).unwrap();
        sec702(&mut table, &staging).unwrap();

        let public = table.get("11000001").unwrap();
        assert_eq!(public.get("caution_flag"), &Value::Bool(true));
        assert_eq!(public.text("caution_flag_reason"), Some(NO_IN_STATE_TUITION));
        assert_eq!(public.get("sec_702"), &Value::Bool(false));

        // Non-public schools never carry Section 702 data
        let private = table.get("21000002").unwrap();
        assert!(private.get("sec_702").is_null());
        assert!(private.get("caution_flag").is_null());
    }

    #[test]
    fn test_sec702_state_level_fills_gaps() {
        let mut table = mock_table();
        let staging = snapshot(
            SourceType::Sec702,
            vec![StagingRow::from([("state", text("TX")), ("sec_702", Value::Bool(false))])],
        );

        sec702(&mut table, &staging).unwrap();

        let public = table.get("11000001").unwrap();
        assert_eq!(public.get("sec_702"), &Value::Bool(false));
        assert_eq!(public.text("caution_flag_reason"), Some(NO_IN_STATE_TUITION));
    }

    #[test]
    fn test_sec702_state_level_accepts_state_names() {
        use crate::ingestion::parse::parse_source;
        use crate::ingestion::types::Delimiter;

        let parsed = parse_source(SourceType::Sec702, b"state,sec_702\nTexas,no\n", Delimiter::Comma).unwrap();
        let rows = parsed.rows.into_iter().map(|(_, row)| row).collect();
        let mut table = mock_table();

        sec702(&mut table, &snapshot(SourceType::Sec702, rows)).unwrap();

        let public = table.get("11000001").unwrap();
        assert_eq!(public.get("sec_702"), &Value::Bool(false));
        assert_eq!(public.text("caution_flag_reason"), Some(NO_IN_STATE_TUITION));
    }

    #[test]
    fn test_sec702_state_level_respects_compliant_school() {
        let mut table = mock_table();
        let mut staging = snapshot(
            SourceType::Sec702School,
            vec![StagingRow::from([
                ("facility_code", text("11000001")),
                ("sec_702", Value::Bool(true)),
            ])],
        );
        staging.insert(
            SourceType::Sec702,
            vec![StagingRow::from([("state", text("TX")), ("sec_702", Value::Bool(false))])],
        );

        sec702_school(&mut table, &staging).unwrap();
        sec702(&mut table, &staging).unwrap();

        let public = table.get("11000001").unwrap();
        assert_eq!(public.get("sec_702"), &Value::Bool(true));
        assert!(public.get("caution_flag_reason").is_null());
    }

    #[test]
    fn test_settlement_reasons_are_distinct() {
        let cross = table_cross();
        let settlement_row = |description: &str| {
            StagingRow::from([("cross", text(&cross)), ("settlement_description", text(description))])
        };

        for order in [
            vec!["A Settlement", "Another Settlement", "A Settlement"],
            vec!["Another Settlement", "A Settlement"],
        ] {
            let mut table = mock_table();
            let staging = snapshot(
                SourceType::Settlement,
                order.iter().map(|d| settlement_row(*d)).collect(),
            );
            settlement(&mut table, &staging).unwrap();

            let inst = table.get("11000001").unwrap();
            assert_eq!(inst.get("caution_flag"), &Value::Bool(true));

            let reasons: HashSet<&str> = inst.text("caution_flag_reason").unwrap().split(", ").collect();
            assert_eq!(reasons, HashSet::from(["A Settlement", "Another Settlement"]));
            assert_eq!(inst.text("caution_flag_reason").unwrap().matches(", ").count(), 1);
        }
    }

    fn table_cross() -> String {
        mock_table().get("11000001").unwrap().text("cross").unwrap().to_string()
    }

    #[test]
    fn test_hcm_skips_null_reasons_but_still_flags() {
        let mut table = mock_table();
        let staging = snapshot(
            SourceType::Hcm,
            vec![
                StagingRow::from([("ope6", text("001234")), ("hcm_reason", Value::Null)]),
                StagingRow::from([("ope6", text("001234")), ("hcm_reason", text("Financial Responsibility"))]),
            ],
        );

        let flagged = hcm(&mut table, &staging).unwrap();
        assert_eq!(flagged, 2);

        let inst = table.get("21000002").unwrap();
        assert_eq!(
            inst.text("caution_flag_reason"),
            Some("Heightened Cash Monitoring (Financial Responsibility)")
        );
    }

    #[test]
    fn test_mou_probation_caution() {
        let mut table = mock_table();
        let staging = snapshot(
            SourceType::Mou,
            vec![
                StagingRow::from([("ope6", text("001234")), ("dodmou", Value::Bool(true)), ("dod_status", Value::Bool(true))]),
                StagingRow::from([("ope6", text("001234")), ("dodmou", Value::Bool(true)), ("dod_status", Value::Bool(true))]),
            ],
        );

        mou(&mut table, &staging).unwrap();

        let inst = table.get("11000001").unwrap();
        assert_eq!(inst.get("dodmou"), &Value::Bool(true));
        assert_eq!(inst.text("caution_flag_reason"), Some(DOD_PROBATION));
    }

    #[test]
    fn test_ipeds_ic_py_only_fills_nulls() {
        let mut table = mock_table();
        let cross = table_cross();
        let mut staging = snapshot(
            SourceType::IpedsIcAy,
            vec![StagingRow::from([
                ("cross", text(&cross)),
                ("tuition_in_state", Value::Float(5000.0)),
                ("tuition_out_of_state", Value::Null),
                ("books", Value::Null),
            ])],
        );
        staging.insert(
            SourceType::IpedsIcPy,
            vec![StagingRow::from([
                ("cross", text(&cross)),
                ("tuition_in_state", Value::Float(9000.0)),
                ("tuition_out_of_state", Value::Float(9000.0)),
                ("books", Value::Float(800.0)),
            ])],
        );

        ipeds_ic_ay(&mut table, &staging).unwrap();
        ipeds_ic_py(&mut table, &staging).unwrap();

        let inst = table.get("11000001").unwrap();
        assert_eq!(inst.get("tuition_in_state"), &Value::Float(5000.0));
        assert_eq!(inst.get("tuition_out_of_state"), &Value::Float(9000.0));
        assert_eq!(inst.get("books"), &Value::Float(800.0));
    }
}
