// Library module for the ingestion, merge and export pipeline

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod merge;

use chrono::{DateTime, Utc};
use ingestion::types::SourceType;

/// Display name of an upload: `{yyMMddHHmmssSSS}_{source_type}.csv`
pub fn upload_name(source_type: SourceType, uploaded_at: DateTime<Utc>) -> String {
    format!("{}_{}.csv", uploaded_at.format("%y%m%d%H%M%S%3f"), source_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_upload_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap()
            + chrono::Duration::milliseconds(42);

        assert_eq!(upload_name(SourceType::Weams, at), "240307140509042_weams.csv");
        assert_eq!(upload_name(SourceType::IpedsIcPy, at), "240307140509042_ipeds_ic_py.csv");
    }
}
