//! Format registry - one static descriptor per source type
//!
//! A descriptor says which header columns a file must carry, which canonical
//! field each one lands in and as what kind, how field text is filtered and
//! normalized, and how many lines surround the header. The generic parser in
//! `parse.rs` is driven entirely by these tables.

use crate::ingestion::normalize::{self as n};
use crate::ingestion::types::{ColumnType, SourceType, StagingRow};

pub type Normalizer = fn(&str) -> String;
pub type Derivation = fn(&mut StagingRow);
pub type KeepPredicate = fn(&StagingRow) -> bool;

/// Characters kept in a field: ASCII alphanumerics, '_' and `extra`
#[derive(Debug, Clone, Copy)]
pub struct CharFilter {
    pub extra: &'static str,
}

/// Names, addresses and URLs
const TEXT: CharFilter = CharFilter {
    extra: " -/@.,'&():?=%~#+",
};

/// Purely numeric extracts; drops `$`, `,` and `%`
const NUMERIC: CharFilter = CharFilter { extra: " .-" };

impl CharFilter {
    pub fn apply(&self, field: &str) -> String {
        field
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || self.extra.contains(*c))
            .collect()
    }
}

#[derive(Clone, Copy)]
pub struct FieldSpec {
    /// Lowercase header as it appears in the file
    pub header: &'static str,
    pub column: &'static str,
    pub kind: ColumnType,
    pub normalize: Option<Normalizer>,
}

impl FieldSpec {
    const fn text(header: &'static str, column: &'static str) -> Self {
        FieldSpec {
            header,
            column,
            kind: ColumnType::Text,
            normalize: None,
        }
    }

    const fn typed(header: &'static str, column: &'static str, kind: ColumnType) -> Self {
        FieldSpec {
            header,
            column,
            kind,
            normalize: None,
        }
    }

    const fn with(self, normalize: Normalizer) -> Self {
        FieldSpec {
            normalize: Some(normalize),
            ..self
        }
    }
}

pub struct FormatDescriptor {
    pub source: SourceType,
    pub fields: &'static [FieldSpec],
    pub allowed: CharFilter,
    pub skip_lines_before_header: usize,
    pub skip_lines_after_header: usize,
    /// Computed columns, applied after a row is parsed
    pub derive: Option<Derivation>,
    /// Rows failing this are dropped silently
    pub keep: Option<KeepPredicate>,
}

impl FormatDescriptor {
    pub fn required_headers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.header)
    }
}

use crate::ingestion::types::ColumnType::{Boolean as B, Float as F, Integer as I};

const fn plain(source: SourceType, fields: &'static [FieldSpec]) -> FormatDescriptor {
    FormatDescriptor {
        source,
        fields,
        allowed: TEXT,
        skip_lines_before_header: 0,
        skip_lines_after_header: 0,
        derive: None,
        keep: None,
    }
}

static WEAMS: FormatDescriptor = FormatDescriptor {
    derive: Some(n::derive_weams),
    ..plain(
        SourceType::Weams,
        &[
            FieldSpec::text("facility code", "facility_code").with(n::facility_code),
            FieldSpec::text("institution name", "institution"),
            FieldSpec::text("institution city", "city"),
            FieldSpec::text("institution state", "state").with(n::state),
            FieldSpec::text("institution zip code", "zip"),
            FieldSpec::text("institution country", "country"),
            FieldSpec::typed("accredited", "accredited", B),
            FieldSpec::typed("current academic year bah rate", "bah", F).with(n::money),
            FieldSpec::typed("principles of excellence", "poe", B),
            FieldSpec::typed("current academic year yellow ribbon indicator", "yr", B),
            FieldSpec::text("poo status", "poo_status"),
            FieldSpec::text("applicable law code", "applicable_law_code"),
            FieldSpec::typed(
                "institution of higher learning indicator",
                "institution_of_higher_learning_indicator",
                B,
            ),
            FieldSpec::typed("ojt indicator", "ojt_indicator", B),
            FieldSpec::typed("correspondence indicator", "correspondence", B),
            FieldSpec::typed("flight indicator", "flight", B),
            FieldSpec::text("highest degree offered", "va_highest_degree_offered"),
        ],
    )
};

static VA_CROSSWALK: FormatDescriptor = FormatDescriptor {
    derive: Some(n::derive_ope6),
    ..plain(
        SourceType::VaCrosswalk,
        &[
            FieldSpec::text("facility code", "facility_code").with(n::facility_code),
            FieldSpec::text("institution name", "institution"),
            FieldSpec::text("ipeds", "cross").with(n::ipeds_id),
            FieldSpec::text("ope", "ope").with(n::ope),
        ],
    )
};

static SVA: FormatDescriptor = plain(
    SourceType::Sva,
    &[
        FieldSpec::text("ipeds", "cross").with(n::ipeds_id),
        FieldSpec::text("school", "institution"),
        FieldSpec::text("website", "student_veteran_link"),
    ],
);

static VSOC: FormatDescriptor = plain(
    SourceType::Vsoc,
    &[
        FieldSpec::text("facility code", "facility_code").with(n::facility_code),
        FieldSpec::text("institution", "institution"),
        FieldSpec::text("vetsuccess_name", "vetsuccess_name"),
        FieldSpec::text("vetsuccess_email", "vetsuccess_email"),
    ],
);

fn has_cross(row: &StagingRow) -> bool {
    row.get("cross").as_key().is_some()
}

// The published file opens with a title line
static EIGHT_KEY: FormatDescriptor = FormatDescriptor {
    skip_lines_before_header: 1,
    keep: Some(has_cross),
    ..plain(
        SourceType::EightKey,
        &[
            FieldSpec::text("institution of higher education", "institution"),
            FieldSpec::text("city", "city"),
            FieldSpec::text("state", "state").with(n::state),
            FieldSpec::text("ipeds id", "cross").with(n::ipeds_id),
        ],
    )
};

static ACCREDITATION: FormatDescriptor = FormatDescriptor {
    derive: Some(n::derive_accreditation),
    ..plain(
        SourceType::Accreditation,
        &[
            FieldSpec::text("institution_name", "institution"),
            FieldSpec::text("campus_ipeds_unitid", "cross").with(n::ipeds_id),
            FieldSpec::text("agency_name", "agency_name"),
            FieldSpec::text("accreditation_type", "csv_accreditation_type"),
            FieldSpec::text("accreditation_status", "accreditation_status"),
            FieldSpec::text("periods", "periods"),
        ],
    )
};

static ARF_GIBILL: FormatDescriptor = plain(
    SourceType::ArfGibill,
    &[
        FieldSpec::text("facility code", "facility_code").with(n::facility_code),
        FieldSpec::typed("total count of students", "gibill", I).with(n::number),
    ],
);

static P911_TF: FormatDescriptor = plain(
    SourceType::P911Tf,
    &[
        FieldSpec::text("facility code", "facility_code").with(n::facility_code),
        FieldSpec::typed("total amount of payments", "p911_tuition_fees", F).with(n::money),
        FieldSpec::typed("total count of students", "p911_recipients", I).with(n::number),
    ],
);

static P911_YR: FormatDescriptor = plain(
    SourceType::P911Yr,
    &[
        FieldSpec::text("facility code", "facility_code").with(n::facility_code),
        FieldSpec::typed("amount of yellow ribbon payments", "p911_yellow_ribbon", F).with(n::money),
        FieldSpec::typed("count of yellow ribbon students", "p911_yr_recipients", I).with(n::number),
    ],
);

static MOU: FormatDescriptor = FormatDescriptor {
    derive: Some(n::derive_mou),
    ..plain(
        SourceType::Mou,
        &[
            FieldSpec::text("ope id", "ope").with(n::ope),
            FieldSpec::text("institution name", "institution"),
            FieldSpec::text("status", "status"),
        ],
    )
};

static SCORECARD: FormatDescriptor = plain(
    SourceType::Scorecard,
    &[
        FieldSpec::text("unitid", "cross").with(n::ipeds_id),
        FieldSpec::text("opeid", "ope").with(n::ope),
        FieldSpec::text("instnm", "institution"),
        FieldSpec::text("insturl", "insturl").with(n::scorecard_value),
        FieldSpec::typed("preddeg", "pred_degree_awarded", I).with(n::scorecard_value),
        FieldSpec::typed("locale", "locale", I).with(n::scorecard_value),
        FieldSpec::typed("ugds", "undergrad_enrollment", I).with(n::scorecard_value),
        FieldSpec::typed("ret_ft4", "retention_all_students_ba", F).with(n::scorecard_value),
        FieldSpec::typed("ret_ftl4", "retention_all_students_otb", F).with(n::scorecard_value),
        FieldSpec::typed("c150_4_pooled_supp", "graduation_rate_all_students", F).with(n::scorecard_value),
        FieldSpec::typed("md_earn_wne_p10", "salary_all_students", F).with(n::scorecard_value),
        FieldSpec::typed("rpy_3yr_rt_supp", "repayment_rate_all_students", F).with(n::scorecard_value),
        FieldSpec::typed("grad_debt_mdn_supp", "avg_stu_loan_debt", F).with(n::scorecard_value),
    ],
);

static IPEDS_IC: FormatDescriptor = plain(
    SourceType::IpedsIc,
    &[
        FieldSpec::text("unitid", "cross").with(n::ipeds_id),
        FieldSpec::typed("vet2", "credit_for_mil_training", B).with(n::ipeds_yes_no),
        FieldSpec::typed("vet3", "vet_poc", B).with(n::ipeds_yes_no),
        FieldSpec::typed("vet4", "student_vet_grp_ipeds", B).with(n::ipeds_yes_no),
        FieldSpec::typed("vet5", "soc_member", B).with(n::ipeds_yes_no),
        FieldSpec::text("calsys", "calendar").with(n::calendar),
        FieldSpec::typed("distnced", "online_all", B).with(n::ipeds_yes_no),
    ],
);

static IPEDS_HD: FormatDescriptor = plain(
    SourceType::IpedsHd,
    &[
        FieldSpec::text("unitid", "cross").with(n::ipeds_id),
        FieldSpec::text("veturl", "vet_tuition_policy_url"),
    ],
);

static IPEDS_IC_AY: FormatDescriptor = FormatDescriptor {
    allowed: NUMERIC,
    ..plain(
        SourceType::IpedsIcAy,
        &[
            FieldSpec::text("unitid", "cross").with(n::ipeds_id),
            FieldSpec::typed("chg2ay3", "tuition_in_state", F).with(n::ipeds_number),
            FieldSpec::typed("chg3ay3", "tuition_out_of_state", F).with(n::ipeds_number),
            FieldSpec::typed("chg4ay3", "books", F).with(n::ipeds_number),
        ],
    )
};

static IPEDS_IC_PY: FormatDescriptor = FormatDescriptor {
    allowed: NUMERIC,
    derive: Some(n::derive_ipeds_ic_py),
    ..plain(
        SourceType::IpedsIcPy,
        &[
            FieldSpec::text("unitid", "cross").with(n::ipeds_id),
            FieldSpec::typed("chg1py3", "tuition_in_state", F).with(n::ipeds_number),
            FieldSpec::typed("chg5py3", "books", F).with(n::ipeds_number),
        ],
    )
};

static SEC702_SCHOOL: FormatDescriptor = plain(
    SourceType::Sec702School,
    &[
        FieldSpec::text("facility code", "facility_code").with(n::facility_code),
        FieldSpec::typed("section_702", "sec_702", B),
    ],
);

static SEC702: FormatDescriptor = plain(
    SourceType::Sec702,
    &[
        FieldSpec::text("state", "state").with(n::state),
        FieldSpec::typed("sec_702", "sec_702", B),
    ],
);

static SETTLEMENT: FormatDescriptor = plain(
    SourceType::Settlement,
    &[
        FieldSpec::text("school", "institution"),
        FieldSpec::text("ipeds", "cross").with(n::ipeds_id),
        FieldSpec::text("settlement description", "settlement_description"),
    ],
);

static HCM: FormatDescriptor = FormatDescriptor {
    derive: Some(n::derive_ope6),
    ..plain(
        SourceType::Hcm,
        &[
            FieldSpec::text("ope id", "ope").with(n::ope),
            FieldSpec::text("institution name", "institution"),
            FieldSpec::text("city", "city"),
            FieldSpec::text("state", "state").with(n::state),
            FieldSpec::text("monitor method", "hcm_type"),
            FieldSpec::text("reason", "hcm_reason"),
        ],
    )
};

fn is_valid_complaint(row: &StagingRow) -> bool {
    !row
        .text("closed_reason")
        .is_some_and(|reason| reason.eq_ignore_ascii_case("invalid"))
}

static COMPLAINT: FormatDescriptor = FormatDescriptor {
    derive: Some(n::derive_ope6),
    keep: Some(is_valid_complaint),
    ..plain(
        SourceType::Complaint,
        &[
            FieldSpec::text("ope id", "ope").with(n::ope),
            FieldSpec::text("facility code", "facility_code").with(n::facility_code),
            FieldSpec::text("institution", "institution"),
            FieldSpec::text("status", "status"),
            FieldSpec::text("closed reason", "closed_reason"),
            FieldSpec::text("issues", "issues"),
        ],
    )
};

static OUTCOME: FormatDescriptor = FormatDescriptor {
    allowed: NUMERIC,
    ..plain(
        SourceType::Outcome,
        &[
            FieldSpec::text("facility code", "facility_code").with(n::facility_code),
            FieldSpec::text("institution name", "institution"),
            FieldSpec::typed("retention rate veteran ba", "retention_rate_veteran_ba", F),
            FieldSpec::typed("retention rate veteran otb", "retention_rate_veteran_otb", F),
            FieldSpec::typed("persistence rate veteran ba", "persistance_rate_veteran_ba", F),
            FieldSpec::typed("persistence rate veteran otb", "persistance_rate_veteran_otb", F),
            FieldSpec::typed("graduation rate veteran", "graduation_rate_veteran", F),
            FieldSpec::typed("transfer out rate veteran", "transfer_out_rate_veteran", F),
            FieldSpec::typed("transfer out rate all students", "transfer_out_rate_all_students", F),
        ],
    )
};

/// Look up the descriptor for a source type
pub fn descriptor(source: SourceType) -> &'static FormatDescriptor {
    match source {
        SourceType::Accreditation => &ACCREDITATION,
        SourceType::ArfGibill => &ARF_GIBILL,
        SourceType::Complaint => &COMPLAINT,
        SourceType::EightKey => &EIGHT_KEY,
        SourceType::Hcm => &HCM,
        SourceType::IpedsHd => &IPEDS_HD,
        SourceType::IpedsIc => &IPEDS_IC,
        SourceType::IpedsIcAy => &IPEDS_IC_AY,
        SourceType::IpedsIcPy => &IPEDS_IC_PY,
        SourceType::Mou => &MOU,
        SourceType::Outcome => &OUTCOME,
        SourceType::P911Tf => &P911_TF,
        SourceType::P911Yr => &P911_YR,
        SourceType::Scorecard => &SCORECARD,
        SourceType::Sec702 => &SEC702,
        SourceType::Sec702School => &SEC702_SCHOOL,
        SourceType::Settlement => &SETTLEMENT,
        SourceType::Sva => &SVA,
        SourceType::VaCrosswalk => &VA_CROSSWALK,
        SourceType::Vsoc => &VSOC,
        SourceType::Weams => &WEAMS,
    }
}
