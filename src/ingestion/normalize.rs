//! Value normalizers and row derivations shared by the source formats
//! Pure functions - no side effects

use crate::ingestion::types::{StagingRow, Value};

/// Tokens read as "true" in source extracts
const TRUTHS: [&str; 8] = ["yes", "true", "t", "y", "1", "ye", "tr", "tru"];

pub fn is_truthy(value: &str) -> bool {
    TRUTHS.contains(&value.trim().to_lowercase().as_str())
}

/// Left-pad an OPE id to its 8 digits. Anything non-numeric ("none", "NULL") is blank.
pub fn ope(id: &str) -> String {
    let id = id.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return String::new();
    }
    format!("{:0>8}", id)
}

/// Parent-organisation id: the first six digits of the padded OPE id
pub fn to_ope6(id: &str) -> Option<String> {
    let padded = ope(id);
    if padded.len() < 8 {
        return None;
    }
    Some(padded[..6].to_string())
}

/// IPEDS unit ids; "none" is used for schools without one
pub fn ipeds_id(id: &str) -> String {
    let id = id.trim();
    if id.eq_ignore_ascii_case("none") {
        String::new()
    } else {
        id.to_string()
    }
}

pub fn facility_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Postal codes and the full names extracts sometimes use instead
const STATES: &[(&str, &str)] = &[
    ("AK", "Alaska"),
    ("AL", "Alabama"),
    ("AR", "Arkansas"),
    ("AS", "American Samoa"),
    ("AZ", "Arizona"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DC", "District of Columbia"),
    ("DE", "Delaware"),
    ("FL", "Florida"),
    ("FM", "Federated States of Micronesia"),
    ("GA", "Georgia"),
    ("GU", "Guam"),
    ("HI", "Hawaii"),
    ("IA", "Iowa"),
    ("ID", "Idaho"),
    ("IDN", "Indonesia"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("MA", "Massachusetts"),
    ("MD", "Maryland"),
    ("ME", "Maine"),
    ("MH", "Marshall Islands"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MO", "Missouri"),
    ("MP", "Northern Mariana Islands"),
    ("MS", "Mississippi"),
    ("MT", "Montana"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("NE", "Nebraska"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NV", "Nevada"),
    ("NY", "New York"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("PR", "Puerto Rico"),
    ("PW", "Palau"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VA", "Virginia"),
    ("VI", "Virgin Islands"),
    ("VT", "Vermont"),
    ("WA", "Washington"),
    ("WI", "Wisconsin"),
    ("WV", "West Virginia"),
    ("WY", "Wyoming"),
];

/// Postal code for a code or full state name in any case. Unknown values
/// pass through upper-cased.
pub fn state(name: &str) -> String {
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");

    STATES
        .iter()
        .find(|(code, full)| code.eq_ignore_ascii_case(&name) || full.eq_ignore_ascii_case(&name))
        .map(|(code, _)| code.to_string())
        .unwrap_or_else(|| name.to_uppercase())
}

/// Strip currency formatting ($1,234.00 -> 1234.00)
pub fn money(amount: &str) -> String {
    amount.replace(['$', ','], "").trim().to_string()
}

/// Thousands separators in counts
pub fn number(count: &str) -> String {
    count.replace(',', "").trim().to_string()
}

/// IPEDS sentinels for "not applicable" / "not reported"
pub fn ipeds_number(value: &str) -> String {
    match value.trim() {
        "." | "-1" | "-2" | "-3" => String::new(),
        other => other.to_string(),
    }
}

/// IPEDS yes/no codes (1 = yes, 0 or 2 = no, negatives = not reported)
pub fn ipeds_yes_no(code: &str) -> String {
    match code.trim() {
        "1" => "yes".to_string(),
        "0" | "2" => "no".to_string(),
        _ => String::new(),
    }
}

/// IPEDS calendar system codes
pub fn calendar(code: &str) -> String {
    let name = match code.trim() {
        "1" => "semester",
        "2" => "quarter",
        "3" => "trimester",
        "4" => "Four-one-four plan",
        "5" => "Other academic year",
        "6" => "Differs by program",
        "7" => "Continuous",
        _ => "",
    };
    name.to_string()
}

/// Scorecard suppression markers carry no value
pub fn scorecard_value(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("null") || trimmed.eq_ignore_ascii_case("privacysuppressed") {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Derive approval and institution type for a roster row
pub fn derive_weams(row: &mut StagingRow) {
    let poo_status = row.text("poo_status").unwrap_or("").to_lowercase();
    let law_code = row.text("applicable_law_code").unwrap_or("").to_lowercase();
    let approved = poo_status == "aprvd" && !law_code.contains("not approved");
    row.set("approved", Value::Bool(approved));

    let institution_type = weams_type(row);
    row.set("type", Value::Text(institution_type.to_string()));
}

fn weams_type(row: &StagingRow) -> &'static str {
    let country = row.text("country").unwrap_or("usa").to_lowercase();

    if row.is_true("flight") {
        "flight"
    } else if row.is_true("correspondence") {
        "correspondence"
    } else if country != "usa" {
        "foreign"
    } else if row.is_true("ojt_indicator") {
        "ojt"
    } else {
        // Second digit of the facility code encodes ownership
        match row.text("facility_code").and_then(|fc| fc.chars().nth(1)) {
            Some('1') => "public",
            Some('2') => "for profit",
            _ => "private",
        }
    }
}

/// Fill ope6 from the padded ope column
pub fn derive_ope6(row: &mut StagingRow) {
    let ope6 = row
        .text("ope")
        .and_then(to_ope6)
        .map(Value::Text)
        .unwrap_or(Value::Null);
    row.set("ope6", ope6);
}

/// Accreditation type is encoded in the agency name
pub fn derive_accreditation(row: &mut StagingRow) {
    let agency = row.text("agency_name").unwrap_or("").to_lowercase();

    let accreditation_type = if agency.contains("regional") {
        Value::Text("REGIONAL".to_string())
    } else if agency.contains("national") {
        Value::Text("NATIONAL".to_string())
    } else if agency.contains("hybrid") {
        Value::Text("HYBRID".to_string())
    } else {
        Value::Null
    };
    row.set("accreditation_type", accreditation_type);
}

/// Every MOU row is a signatory; some are on DoD probation
pub fn derive_mou(row: &mut StagingRow) {
    derive_ope6(row);

    let status = row.text("status").unwrap_or("").to_lowercase();
    let on_probation = status.contains("probation - dod") || status.contains("title iv non-compliant");
    row.set("dod_status", Value::Bool(on_probation));
    row.set("dodmou", Value::Bool(true));
}

/// Program-year tuition is charged to in- and out-of-state students alike
pub fn derive_ipeds_ic_py(row: &mut StagingRow) {
    let tuition = row.get("tuition_in_state").clone();
    row.set("tuition_out_of_state", tuition);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_tokens() {
        for token in ["yes", "TRUE", " t ", "Y", "1", "ye", "tr", "tru"] {
            assert!(is_truthy(token), "{} should be truthy", token);
        }
        for token in ["no", "false", "0", "", "2", "on"] {
            assert!(!is_truthy(token), "{} should not be truthy", token);
        }
    }

    #[test]
    fn test_ope_padding() {
        assert_eq!(ope("123400"), "00123400");
        assert_eq!(ope("12345678"), "12345678");
        assert_eq!(ope("None"), "");
        assert_eq!(ope("NULL"), "");
        assert_eq!(to_ope6("123400"), Some("001234".to_string()));
        assert_eq!(to_ope6(""), None);
    }

    #[test]
    fn test_ipeds_codes() {
        assert_eq!(ipeds_yes_no("1"), "yes");
        assert_eq!(ipeds_yes_no("2"), "no");
        assert_eq!(ipeds_yes_no("-2"), "");
        assert_eq!(calendar("2"), "quarter");
        assert_eq!(calendar("4"), "Four-one-four plan");
        assert_eq!(calendar("5"), "Other academic year");
        assert_eq!(calendar("6"), "Differs by program");
        assert_eq!(calendar("7"), "Continuous");
        assert_eq!(calendar("-2"), "");
        assert_eq!(ipeds_number("."), "");
        assert_eq!(ipeds_number("1200"), "1200");
        assert_eq!(money("$1,250.50"), "1250.50");
        assert_eq!(number("1,204"), "1204");
        assert_eq!(scorecard_value("PrivacySuppressed"), "");
    }

    #[test]
    fn test_state_names_map_to_codes() {
        assert_eq!(state("Texas"), "TX");
        assert_eq!(state(" new  york "), "NY");
        assert_eq!(state("DISTRICT OF COLUMBIA"), "DC");
        assert_eq!(state("tx"), "TX");
        assert_eq!(state("Ontario"), "ONTARIO");
        assert_eq!(state(""), "");
    }

    #[test]
    fn test_derive_weams() {
        let mut row = StagingRow::from([
            ("facility_code", Value::Text("11000123".to_string())),
            ("country", Value::Text("USA".to_string())),
            ("poo_status", Value::Text("APRVD".to_string())),
            ("applicable_law_code", Value::Text("Educational Institution Approved For All Chapters".to_string())),
        ]);
        derive_weams(&mut row);
        assert!(row.is_true("approved"));
        assert_eq!(row.text("type"), Some("public"));

        let mut row = StagingRow::from([
            ("facility_code", Value::Text("31000123".to_string())),
            ("country", Value::Text("CAN".to_string())),
            ("poo_status", Value::Text("WTHDN".to_string())),
        ]);
        derive_weams(&mut row);
        assert!(row.is_false("approved"));
        assert_eq!(row.text("type"), Some("foreign"));
    }

    #[test]
    fn test_derive_accreditation_type() {
        for (agency, expected) in [
            ("ACUPUNCTURE HYBRID", Some("HYBRID")),
            ("BIBLICAL NATIONAL", Some("NATIONAL")),
            ("MIDDLE REGIONAL", Some("REGIONAL")),
            ("SPECIALIZED", None),
        ] {
            let mut row = StagingRow::from([("agency_name", Value::Text(agency.to_string()))]);
            derive_accreditation(&mut row);
            assert_eq!(row.text("accreditation_type"), expected);
        }
    }

    #[test]
    fn test_derive_mou_status() {
        let mut row = StagingRow::from([
            ("ope", Value::Text("00123400".to_string())),
            ("status", Value::Text("Probation - DoD".to_string())),
        ]);
        derive_mou(&mut row);
        assert!(row.is_true("dod_status"));
        assert!(row.is_true("dodmou"));
        assert_eq!(row.text("ope6"), Some("001234"));

        let mut row = StagingRow::from([("status", Value::Text("Signed".to_string()))]);
        derive_mou(&mut row);
        assert!(row.is_false("dod_status"));
        assert!(row.get("ope6").is_null());
    }
}
