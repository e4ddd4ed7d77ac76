//! The canonical institution table - one row per approved facility

use crate::error::StepFailure;
use crate::ingestion::types::{ColumnType, StagingRow, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
}

const fn col(name: &'static str, kind: ColumnType) -> Column {
    Column { name, kind }
}

use crate::ingestion::types::ColumnType::{Boolean as B, Float as F, Integer as I, Text as T};

/// Every column of the canonical table, in export order (`ope6` is internal)
pub const CANONICAL_COLUMNS: &[Column] = &[
    col("facility_code", T),
    col("institution", T),
    col("city", T),
    col("state", T),
    col("zip", T),
    col("country", T),
    col("type", T),
    col("correspondence", B),
    col("flight", B),
    col("bah", F),
    col("cross", T),
    col("ope", T),
    col("ope6", T),
    col("insturl", T),
    col("vet_tuition_policy_url", T),
    col("pred_degree_awarded", I),
    col("locale", I),
    col("gibill", I),
    col("undergrad_enrollment", I),
    col("yr", B),
    col("student_veteran", B),
    col("student_veteran_link", T),
    col("poe", B),
    col("eight_keys", B),
    col("dodmou", B),
    col("sec_702", B),
    col("vetsuccess_name", T),
    col("vetsuccess_email", T),
    col("credit_for_mil_training", B),
    col("vet_poc", B),
    col("student_vet_grp_ipeds", B),
    col("soc_member", B),
    col("va_highest_degree_offered", T),
    col("retention_rate_veteran_ba", F),
    col("retention_all_students_ba", F),
    col("retention_rate_veteran_otb", F),
    col("retention_all_students_otb", F),
    col("persistance_rate_veteran_ba", F),
    col("persistance_rate_veteran_otb", F),
    col("graduation_rate_veteran", F),
    col("graduation_rate_all_students", F),
    col("transfer_out_rate_veteran", F),
    col("transfer_out_rate_all_students", F),
    col("salary_all_students", F),
    col("repayment_rate_all_students", F),
    col("avg_stu_loan_debt", F),
    col("calendar", T),
    col("tuition_in_state", F),
    col("tuition_out_of_state", F),
    col("books", F),
    col("online_all", B),
    col("p911_tuition_fees", F),
    col("p911_recipients", I),
    col("p911_yellow_ribbon", F),
    col("p911_yr_recipients", I),
    col("accredited", B),
    col("accreditation_type", T),
    col("accreditation_status", T),
    col("caution_flag", B),
    col("caution_flag_reason", T),
    col("complaints_facility_code", I),
    col("complaints_financial_by_fac_code", I),
    col("complaints_quality_by_fac_code", I),
    col("complaints_refund_by_fac_code", I),
    col("complaints_marketing_by_fac_code", I),
    col("complaints_accreditation_by_fac_code", I),
    col("complaints_degree_requirements_by_fac_code", I),
    col("complaints_student_loans_by_fac_code", I),
    col("complaints_grades_by_fac_code", I),
    col("complaints_credit_transfer_by_fac_code", I),
    col("complaints_job_by_fac_code", I),
    col("complaints_transcript_by_fac_code", I),
    col("complaints_other_by_fac_code", I),
    col("complaints_main_campus_roll_up", I),
    col("complaints_financial_by_ope_id_do_not_sum", I),
    col("complaints_quality_by_ope_id_do_not_sum", I),
    col("complaints_refund_by_ope_id_do_not_sum", I),
    col("complaints_marketing_by_ope_id_do_not_sum", I),
    col("complaints_accreditation_by_ope_id_do_not_sum", I),
    col("complaints_degree_requirements_by_ope_id_do_not_sum", I),
    col("complaints_student_loans_by_ope_id_do_not_sum", I),
    col("complaints_grades_by_ope_id_do_not_sum", I),
    col("complaints_credit_transfer_by_ope_id_do_not_sum", I),
    col("complaints_jobs_by_ope_id_do_not_sum", I),
    col("complaints_transcript_by_ope_id_do_not_sum", I),
    col("complaints_other_by_ope_id_do_not_sum", I),
];

pub fn column(name: &str) -> Option<&'static Column> {
    CANONICAL_COLUMNS.iter().find(|c| c.name == name)
}

/// How a staging relation is matched to canonical rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKey {
    FacilityCode,
    Cross,
    Ope6,
    State,
}

impl JoinKey {
    pub fn column(&self) -> &'static str {
        match self {
            JoinKey::FacilityCode => "facility_code",
            JoinKey::Cross => "cross",
            JoinKey::Ope6 => "ope6",
            JoinKey::State => "state",
        }
    }

    pub fn of_staging(&self, row: &StagingRow) -> Option<String> {
        row.get(self.column()).as_key()
    }

    pub fn of_institution(&self, institution: &Institution) -> Option<String> {
        institution.get(self.column()).as_key()
    }
}

/// One canonical row; only canonical columns can be set, each with its declared kind
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Institution {
    values: BTreeMap<&'static str, Value>,
}

impl Institution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(name).unwrap_or(&NULL)
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<(), StepFailure> {
        let column = column(name).ok_or_else(|| StepFailure::UnknownColumn(name.to_string()))?;

        if !column.kind.accepts(&value) {
            return Err(StepFailure::TypeMismatch {
                column: name.to_string(),
                expected: column.kind.name(),
                found: format!("{:?}", value),
            });
        }

        self.values.insert(column.name, value.conform(column.kind));
        Ok(())
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).as_text()
    }

    pub fn facility_code(&self) -> &str {
        self.text("facility_code").unwrap_or("")
    }

    pub fn is_public(&self) -> bool {
        self.text("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("public"))
    }
}

/// Canonical rows keyed by facility code
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalTable {
    rows: BTreeMap<String, Institution>,
}

impl CanonicalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row; facility codes must be present and unique
    pub fn insert(&mut self, institution: Institution) -> Result<(), StepFailure> {
        let code = institution
            .get("facility_code")
            .as_key()
            .ok_or(StepFailure::MissingKey)?;

        if self.rows.contains_key(&code) {
            return Err(StepFailure::DuplicateKey(code));
        }

        self.rows.insert(code, institution);
        Ok(())
    }

    pub fn get(&self, facility_code: &str) -> Option<&Institution> {
        self.rows.get(facility_code)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Institution> {
        self.rows.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Institution> {
        self.rows.values_mut()
    }

    /// Rows ordered by institution name, then facility code
    pub fn by_institution(&self) -> Vec<&Institution> {
        let mut rows: Vec<&Institution> = self.rows.values().collect();
        rows.sort_by(|a, b| {
            a.text("institution")
                .unwrap_or("")
                .cmp(b.text("institution").unwrap_or(""))
                .then_with(|| a.facility_code().cmp(b.facility_code()))
        });
        rows
    }

    /// Distinct non-null values of a column, sorted
    pub fn distinct(&self, name: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .rows
            .values()
            .filter_map(|row| row.text(name).map(str::to_string))
            .collect();
        values.sort();
        values.dedup();
        values
    }
}
