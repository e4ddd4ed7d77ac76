//! Parse functions - turn an uploaded extract into staging rows
//!
//! One generic routine driven by the source's `FormatDescriptor`. Nothing here
//! touches the database; `write.rs` persists what this produces.

use crate::error::IngestError;
use crate::ingestion::registry::{descriptor, FormatDescriptor};
use crate::ingestion::types::{Delimiter, IngestStats, SourceType, StagingRow};
use tracing::{debug, info};

/// Rows that survived parsing, with their 1-based line numbers in the file
#[derive(Debug, Default)]
pub struct ParsedSource {
    pub rows: Vec<(usize, StagingRow)>,
    pub stats: IngestStats,
}

/// Decode bytes and unify line endings
pub fn decode(content: &[u8]) -> String {
    String::from_utf8_lossy(content)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

/// Keep printable 7-bit ASCII and tabs; drops replacement characters and stray control bytes
pub fn clean_line(line: &str) -> String {
    line.chars()
        .filter(|c| *c == '\t' || (' '..='~').contains(c))
        .collect()
}

/// Split one line on the delimiter, honouring CSV quoting
fn split_line(line: &str, delimiter: Delimiter) -> Result<Vec<String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter.as_byte())
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(record) => Ok(record?.iter().map(str::to_string).collect()),
        None => Ok(Vec::new()),
    }
}

/// Validate the header line against the descriptor. Returns the trimmed, lowercased headers.
pub fn parse_header(
    desc: &FormatDescriptor,
    line: &str,
    delimiter: Delimiter,
) -> Result<Vec<String>, IngestError> {
    let headers: Vec<String> = split_line(line, delimiter)
        .unwrap_or_default()
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let missing: Vec<String> = desc
        .required_headers()
        .filter(|required| !headers.iter().any(|h| h == required))
        .map(str::to_string)
        .collect();

    if !missing.is_empty() {
        return Err(IngestError::MissingHeader {
            source_type: desc.source,
            missing,
        });
    }

    Ok(headers)
}

/// Extract the registered columns of one data line.
/// `Ok(None)` means every extracted field was blank.
pub fn parse_row(
    desc: &FormatDescriptor,
    line: &str,
    headers: &[String],
    delimiter: Delimiter,
) -> Result<Option<StagingRow>, String> {
    let values = split_line(line, delimiter).map_err(|e| e.to_string())?;

    let mut cleaned = Vec::with_capacity(desc.fields.len());
    for spec in desc.fields {
        let raw = headers
            .iter()
            .position(|h| h == spec.header)
            .and_then(|i| values.get(i))
            .map(String::as_str)
            .unwrap_or("");

        let filtered = desc.allowed.apply(raw);
        let value = match spec.normalize {
            Some(normalize) => normalize(filtered.trim()),
            None => filtered.trim().to_string(),
        };
        cleaned.push((spec, value));
    }

    if cleaned.iter().all(|(_, value)| value.is_empty()) {
        return Ok(None);
    }

    let mut row = StagingRow::new();
    for (spec, value) in cleaned {
        let typed = spec
            .kind
            .parse(&value)
            .map_err(|cause| format!("{}: {}", spec.header, cause))?;
        row.set(spec.column, typed);
    }

    if let Some(derive) = desc.derive {
        derive(&mut row);
    }

    Ok(Some(row))
}

/// Parse a whole upload. Fails on the first bad header or row; nothing is partially returned.
pub fn parse_source(
    source: SourceType,
    content: &[u8],
    delimiter: Delimiter,
) -> Result<ParsedSource, IngestError> {
    if content.is_empty() {
        return Err(IngestError::EmptyUpload);
    }

    let desc = descriptor(source);
    let text = decode(content);
    let mut lines = text.lines().enumerate().skip(desc.skip_lines_before_header);

    let header_line = lines.next().map(|(_, l)| clean_line(l)).unwrap_or_default();
    let headers = parse_header(desc, &header_line, delimiter)?;
    debug!("{} headers: {:?}", source, headers);

    let mut parsed = ParsedSource::default();

    for (idx, raw) in lines.skip(desc.skip_lines_after_header) {
        let row_number = idx + 1;
        let line = clean_line(raw);
        parsed.stats.lines += 1;

        let row = parse_row(desc, &line, &headers, delimiter).map_err(|cause| {
            IngestError::RowParse {
                source_type: source,
                row_number,
                raw_line: line.clone(),
                cause,
            }
        })?;

        match row {
            None => parsed.stats.skipped_blank += 1,
            Some(row) if desc.keep.is_some_and(|keep| !keep(&row)) => parsed.stats.filtered += 1,
            Some(row) => parsed.rows.push((row_number, row)),
        }
    }

    parsed.stats.inserted = parsed.rows.len();
    info!("Parsed {} rows from {} upload ({})", parsed.rows.len(), source, parsed.stats);

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::types::Value;

    #[test]
    fn test_clean_line() {
        assert_eq!(clean_line("caf\u{e9}\tbar\u{fffd}"), "caf\tbar");
        assert_eq!(decode(b"a\r\nb\rc\n"), "a\nb\nc\n");
        assert_eq!(decode(b"ok\xff,1"), "ok\u{fffd},1");
    }

    #[test]
    fn test_missing_header_lists_exactly_missing() {
        let content = b"IPEDS , School\n123,Test U\n";
        let err = parse_source(SourceType::Sva, content, Delimiter::Comma).unwrap_err();

        match err {
            IngestError::MissingHeader { source_type, missing } => {
                assert_eq!(source_type, SourceType::Sva);
                assert_eq!(missing, vec!["website".to_string()]);
            }
            other => panic!("Expected MissingHeader, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_header_for_every_source() {
        // Dropping any one required header names exactly that header
        for source in SourceType::ALL {
            let desc = descriptor(source);
            let headers: Vec<&str> = desc.required_headers().collect();

            for dropped in &headers {
                let kept: Vec<&str> = headers.iter().copied().filter(|h| h != dropped).collect();
                let mut content = "title\n".repeat(desc.skip_lines_before_header);
                content.push_str(&kept.join(","));
                content.push('\n');

                match parse_source(source, content.as_bytes(), Delimiter::Comma) {
                    Err(IngestError::MissingHeader { missing, .. }) => {
                        assert_eq!(missing, vec![dropped.to_string()], "{}", source)
                    }
                    other => panic!("{}: expected MissingHeader, got {:?}", source, other.map(|p| p.stats)),
                }
            }
        }
    }

    #[test]
    fn test_blank_rows_are_never_inserted() {
        let content = b"ipeds,school,website,extra\n\
            123456,Test University,www.test.edu,x\n\
            ,,,ignored\n\
            \n\
            \"\",  ,\"\",\n\
            654321,Other College,,\n";

        let parsed = parse_source(SourceType::Sva, content, Delimiter::Comma).unwrap();

        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.stats.lines, 5);
        assert_eq!(parsed.stats.skipped_blank, 3);
        assert!(parsed.stats.inserted <= parsed.stats.lines - parsed.stats.skipped_blank);

        let (row_number, row) = &parsed.rows[1];
        assert_eq!(*row_number, 6);
        assert_eq!(row.text("cross"), Some("654321"));
        assert!(row.get("student_veteran_link").is_null());
    }

    #[test]
    fn test_row_error_reports_row_number_and_line() {
        let content = b"Facility Code,Total Count of Students\n11000123,12\n11000456,lots\n";
        let err = parse_source(SourceType::ArfGibill, content, Delimiter::Comma).unwrap_err();

        match err {
            IngestError::RowParse { row_number, raw_line, cause, .. } => {
                assert_eq!(row_number, 3);
                assert_eq!(raw_line, "11000456,lots");
                assert!(cause.contains("total count of students"));
            }
            other => panic!("Expected RowParse, got {:?}", other),
        }
    }

    #[test]
    fn test_skip_lines_and_keep_predicate() {
        // Title line, then header; rows without an IPEDS id are dropped
        let content = b"8 Keys to Veterans' Success\n\
            Institution of Higher Education,City,State,IPEDS ID\n\
            Test University,Austin,tx,123456\n\
            No Id College,Dallas,TX,\n";

        let parsed = parse_source(SourceType::EightKey, content, Delimiter::Comma).unwrap();

        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.stats.filtered, 1);
        let (row_number, row) = &parsed.rows[0];
        assert_eq!(*row_number, 3);
        assert_eq!(row.text("state"), Some("TX"));
    }

    #[test]
    fn test_pipe_delimiter_and_typed_fields() {
        let content = b"facility code|total amount of payments|total count of students\n\
            11000123|$1,250.50|1,204\n";

        let parsed = parse_source(SourceType::P911Tf, content, Delimiter::Pipe).unwrap();
        let (_, row) = &parsed.rows[0];

        assert_eq!(row.get("p911_tuition_fees"), &Value::Float(1250.5));
        assert_eq!(row.get("p911_recipients"), &Value::Int(1204));
    }

    #[test]
    fn test_quoted_fields_and_derivations() {
        let content = b"Facility Code,Institution Name,IPEDS,OPE\n\
            11000123,\"Test University, Main Campus\",123456,123400\n";

        let parsed = parse_source(SourceType::VaCrosswalk, content, Delimiter::Comma).unwrap();
        let (_, row) = &parsed.rows[0];

        assert_eq!(row.text("institution"), Some("Test University, Main Campus"));
        assert_eq!(row.text("ope"), Some("00123400"));
        assert_eq!(row.text("ope6"), Some("001234"));
    }

    #[test]
    fn test_empty_upload() {
        assert!(matches!(
            parse_source(SourceType::Weams, b"", Delimiter::Comma),
            Err(IngestError::EmptyUpload)
        ));
    }
}
