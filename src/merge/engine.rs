//! Build orchestration: initialize from the roster, run every update step in
//! order, persist the result atomically.

use crate::error::{BuildError, MergeStepError, StepFailure};
use crate::ingestion::types::{SourceType, StagingSnapshot};
use crate::ingestion::write::{is_complete, load_staging};
use crate::merge::canonical::{CanonicalTable, Institution};
use crate::merge::steps::{self, WEAMS_COLUMNS};
use crate::merge::write::replace_canonical;
use crate::merge::{accreditation, complaints};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info};

pub type MergeStep = fn(&mut CanonicalTable, &StagingSnapshot) -> Result<usize, StepFailure>;

/// Update steps in application order
pub const UPDATE_STEPS: [(&str, MergeStep); 20] = [
    ("crosswalk", steps::crosswalk),
    ("sva", steps::sva),
    ("vsoc", steps::vsoc),
    ("eight_key", steps::eight_key),
    ("accreditation", accreditation::apply),
    ("arf_gibill", steps::arf_gibill),
    ("p911_tf", steps::p911_tf),
    ("p911_yr", steps::p911_yr),
    ("mou", steps::mou),
    ("scorecard", steps::scorecard),
    ("ipeds_ic", steps::ipeds_ic),
    ("ipeds_hd", steps::ipeds_hd),
    ("ipeds_ic_ay", steps::ipeds_ic_ay),
    ("ipeds_ic_py", steps::ipeds_ic_py),
    ("sec702_school", steps::sec702_school),
    ("sec702", steps::sec702),
    ("settlement", steps::settlement),
    ("hcm", steps::hcm),
    ("complaint", complaints::apply),
    ("outcome", steps::outcome),
];

/// Build statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct BuildStats {
    pub institutions: usize,
    /// Canonical rows matched by each update step
    pub steps: Vec<(String, usize)>,
}

impl std::fmt::Display for BuildStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "institutions: {}, steps: {}", self.institutions, self.steps.len())
    }
}

/// One canonical row per approved roster row
pub fn initialize(staging: &StagingSnapshot) -> Result<CanonicalTable, MergeStepError> {
    let fail = |cause| MergeStepError::new("initialize", cause);
    let mut table = CanonicalTable::new();

    for row in staging.rows(SourceType::Weams) {
        if !row.is_true("approved") {
            continue;
        }

        let mut institution = Institution::new();
        for column in WEAMS_COLUMNS {
            institution.set(column, row.get(column).clone()).map_err(fail)?;
        }
        table.insert(institution).map_err(fail)?;
    }

    Ok(table)
}

/// Full in-memory merge of a staging snapshot
pub fn run(staging: &StagingSnapshot) -> Result<(CanonicalTable, BuildStats), MergeStepError> {
    let mut table = initialize(staging)?;
    info!("Initialized {} approved institutions", table.len());

    let mut stats = BuildStats {
        institutions: table.len(),
        steps: Vec::with_capacity(UPDATE_STEPS.len()),
    };

    for (name, step) in UPDATE_STEPS {
        let matched = step(&mut table, staging).map_err(|cause| MergeStepError::new(name, cause))?;
        debug!("Step {} matched {} institutions", name, matched);
        stats.steps.push((name.to_string(), matched));
    }

    Ok((table, stats))
}

/// Rebuild the canonical table from current staging contents.
/// Returns `None` without touching anything when some source has no upload.
pub async fn build(db: &PgPool) -> Result<Option<BuildStats>, BuildError> {
    if !is_complete(db).await? {
        info!("Build skipped: not every source has been uploaded");
        return Ok(None);
    }

    let staging = load_staging(db).await?;
    let (table, stats) = run(&staging)?;
    replace_canonical(db, &table).await?;

    info!("Build complete: {}", stats);

    Ok(Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::parse::parse_source;
    use crate::ingestion::types::{Delimiter, StagingRow, Value};

    fn text(value: &str) -> Value {
        Value::Text(value.to_string())
    }

    fn roster_row(code: &str, name: &str, approved: bool) -> StagingRow {
        StagingRow::from([
            ("facility_code", text(code)),
            ("institution", text(name)),
            ("state", text("TX")),
            ("type", text("public")),
            ("approved", Value::Bool(approved)),
            ("poo_status", text("aprvd")),
        ])
    }

    #[test]
    fn test_initialize_copies_only_approved_roster_columns() {
        let mut staging = StagingSnapshot::new();
        staging.insert(
            SourceType::Weams,
            vec![
                roster_row("11000001", "Approved U", true),
                roster_row("11000002", "Withdrawn U", false),
            ],
        );

        let table = initialize(&staging).unwrap();

        assert_eq!(table.len(), 1);
        let inst = table.get("11000001").unwrap();
        assert_eq!(inst.text("institution"), Some("Approved U"));
        assert!(inst.get("poo_status").is_null());
    }

    #[test]
    fn test_initialize_rejects_duplicate_facility_codes() {
        let mut staging = StagingSnapshot::new();
        staging.insert(
            SourceType::Weams,
            vec![roster_row("11000001", "A", true), roster_row("11000001", "B", true)],
        );

        let err = initialize(&staging).unwrap_err();
        assert_eq!(err.step, "initialize");
        assert_eq!(err.cause, StepFailure::DuplicateKey("11000001".to_string()));
    }

    #[test]
    fn test_step_failure_names_the_step() {
        let mut staging = StagingSnapshot::new();
        staging.insert(SourceType::Weams, vec![roster_row("11000001", "A", true)]);
        // A text value in an integer column
        staging.insert(
            SourceType::ArfGibill,
            vec![StagingRow::from([("facility_code", text("11000001")), ("gibill", text("many"))])],
        );

        let err = run(&staging).unwrap_err();
        assert_eq!(err.step, "arf_gibill");
    }

    fn parsed(source: SourceType, csv: &str) -> Vec<StagingRow> {
        parse_source(source, csv.as_bytes(), Delimiter::Comma)
            .unwrap()
            .rows
            .into_iter()
            .map(|(_, row)| row)
            .collect()
    }

    fn sample_snapshot() -> StagingSnapshot {
        let mut staging = StagingSnapshot::new();
        staging.insert(
            SourceType::Weams,
            parsed(
                SourceType::Weams,
                "facility code,institution name,institution city,institution state,institution zip code,\
                 institution country,accredited,current academic year bah rate,principles of excellence,\
                 current academic year yellow ribbon indicator,poo status,applicable law code,\
                 institution of higher learning indicator,ojt indicator,correspondence indicator,\
                 flight indicator,highest degree offered\n\
                 11000001,Test University,Austin,tx,78701,USA,Yes,\"$1,500.00\",yes,no,aprvd,\
                 Educational Institution Approved For All Chapters,yes,no,no,no,4-year\n\
                 12000002,Career College,Dallas,TX,75201,USA,No,1200,no,yes,aprvd,\
                 Educational Institution Approved For All Chapters,yes,no,no,no,2-year\n",
            ),
        );
        staging.insert(
            SourceType::VaCrosswalk,
            parsed(
                SourceType::VaCrosswalk,
                "facility code,institution name,ipeds,ope\n\
                 11000001,Test University,100001,123400\n\
                 12000002,Career College,200002,987600\n",
            ),
        );
        staging.insert(
            SourceType::Settlement,
            parsed(
                SourceType::Settlement,
                "school,ipeds,settlement description\n\
                 Career College,200002,A Settlement\n\
                 Career College,200002,Another Settlement\n",
            ),
        );
        staging.insert(
            SourceType::Hcm,
            parsed(
                SourceType::Hcm,
                "ope id,institution name,city,state,monitor method,reason\n\
                 987600,Career College,Dallas,TX,HCM2,Financial Responsibility\n",
            ),
        );
        staging
    }

    #[test]
    fn test_run_merges_sources() {
        let (table, stats) = run(&sample_snapshot()).unwrap();

        assert_eq!(stats.institutions, 2);
        assert_eq!(stats.steps.len(), UPDATE_STEPS.len());

        let public = table.get("11000001").unwrap();
        assert_eq!(public.text("type"), Some("public"));
        assert_eq!(public.text("state"), Some("TX"));
        assert_eq!(public.get("bah"), &Value::Float(1500.0));
        assert_eq!(public.text("ope6"), Some("001234"));
        assert!(public.get("caution_flag").is_null());

        let career = table.get("12000002").unwrap();
        assert_eq!(career.text("type"), Some("for profit"));
        assert_eq!(career.get("caution_flag"), &Value::Bool(true));
        assert_eq!(
            career.text("caution_flag_reason"),
            Some("A Settlement, Another Settlement, Heightened Cash Monitoring (Financial Responsibility)")
        );
    }

    #[test]
    fn test_run_is_idempotent() {
        let staging = sample_snapshot();
        let (first, _) = run(&staging).unwrap();
        let (second, _) = run(&staging).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            crate::export::csv_file::to_csv(&first).unwrap(),
            crate::export::csv_file::to_csv(&second).unwrap()
        );
    }
}
