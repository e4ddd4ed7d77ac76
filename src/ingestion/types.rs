//! Core data types for the ingestion pipeline
//! Pure data structures with no database behavior

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// Every extract the merge depends on - one staging relation per variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Accreditation,
    ArfGibill,
    Complaint,
    EightKey,
    Hcm,
    IpedsHd,
    IpedsIc,
    IpedsIcAy,
    IpedsIcPy,
    Mou,
    Outcome,
    P911Tf,
    P911Yr,
    Scorecard,
    Sec702,
    Sec702School,
    Settlement,
    Sva,
    VaCrosswalk,
    Vsoc,
    Weams,
}

impl SourceType {
    pub const ALL: [SourceType; 21] = [
        SourceType::Accreditation,
        SourceType::ArfGibill,
        SourceType::Complaint,
        SourceType::EightKey,
        SourceType::Hcm,
        SourceType::IpedsHd,
        SourceType::IpedsIc,
        SourceType::IpedsIcAy,
        SourceType::IpedsIcPy,
        SourceType::Mou,
        SourceType::Outcome,
        SourceType::P911Tf,
        SourceType::P911Yr,
        SourceType::Scorecard,
        SourceType::Sec702,
        SourceType::Sec702School,
        SourceType::Settlement,
        SourceType::Sva,
        SourceType::VaCrosswalk,
        SourceType::Vsoc,
        SourceType::Weams,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Accreditation => "accreditation",
            SourceType::ArfGibill => "arf_gibill",
            SourceType::Complaint => "complaint",
            SourceType::EightKey => "eight_key",
            SourceType::Hcm => "hcm",
            SourceType::IpedsHd => "ipeds_hd",
            SourceType::IpedsIc => "ipeds_ic",
            SourceType::IpedsIcAy => "ipeds_ic_ay",
            SourceType::IpedsIcPy => "ipeds_ic_py",
            SourceType::Mou => "mou",
            SourceType::Outcome => "outcome",
            SourceType::P911Tf => "p911_tf",
            SourceType::P911Yr => "p911_yr",
            SourceType::Scorecard => "scorecard",
            SourceType::Sec702 => "sec702",
            SourceType::Sec702School => "sec702_school",
            SourceType::Settlement => "settlement",
            SourceType::Sva => "sva",
            SourceType::VaCrosswalk => "va_crosswalk",
            SourceType::Vsoc => "vsoc",
            SourceType::Weams => "weams",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let wanted = s.trim().to_lowercase();
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| anyhow::anyhow!("Unknown source type: {}", s))
    }
}

/// Column separators accepted on upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    #[default]
    Comma,
    Pipe,
    Space,
}

impl Delimiter {
    pub fn as_byte(&self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Pipe => b'|',
            Delimiter::Space => b' ',
        }
    }
}

/// Declared kind of a staging field or canonical column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
}

impl ColumnType {
    /// Convert a cleaned field into a typed value. Blank is always null.
    pub fn parse(&self, raw: &str) -> Result<Value, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Value::Null);
        }

        match self {
            ColumnType::Text => Ok(Value::Text(raw.to_string())),
            ColumnType::Integer => match raw.parse::<i64>() {
                Ok(i) => Ok(Value::Int(i)),
                Err(_) => match raw.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
                    _ => Err(format!("'{}' is not an integer", raw)),
                },
            },
            ColumnType::Float => raw
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("'{}' is not a number", raw)),
            ColumnType::Boolean => Ok(Value::Bool(crate::ingestion::normalize::is_truthy(raw))),
        }
    }

    /// Whether a value may be stored in a column of this kind
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::Text, Value::Text(_))
                | (ColumnType::Integer, Value::Int(_))
                | (ColumnType::Float, Value::Float(_))
                | (ColumnType::Float, Value::Int(_))
                | (ColumnType::Boolean, Value::Bool(_))
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
        }
    }
}

/// A single typed cell
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Join-key form of the value; null and blank never match anything
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Cast an integer into a float column; everything else passes through
    pub fn conform(self, kind: ColumnType) -> Value {
        match (kind, self) {
            (ColumnType::Float, Value::Int(i)) => Value::Float(i as f64),
            (_, v) => v,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One normalized line of a source file, keyed by canonical field name
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagingRow(BTreeMap<String, Value>);

impl StagingRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.0.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_string(), value);
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).as_text()
    }

    pub fn is_true(&self, field: &str) -> bool {
        self.get(field).as_bool() == Some(true)
    }

    pub fn is_false(&self, field: &str) -> bool {
        self.get(field).as_bool() == Some(false)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for StagingRow {
    fn from(pairs: [(&str, Value); N]) -> Self {
        let mut row = StagingRow::new();
        for (field, value) in pairs {
            row.set(field, value);
        }
        row
    }
}

/// Every staging relation, as read at the start of a build
#[derive(Debug, Clone, Default)]
pub struct StagingSnapshot {
    rows: HashMap<SourceType, Vec<StagingRow>>,
}

impl StagingSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: SourceType, rows: Vec<StagingRow>) {
        self.rows.insert(source, rows);
    }

    pub fn push(&mut self, source: SourceType, row: StagingRow) {
        self.rows.entry(source).or_default().push(row);
    }

    /// Rows of one source in file order (empty if never ingested)
    pub fn rows(&self, source: SourceType) -> &[StagingRow] {
        self.rows.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A freshly uploaded extract, not yet persisted
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub source_type: SourceType,
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
    pub content: Vec<u8>,
}

impl RawUpload {
    pub fn new(source_type: SourceType, content: Vec<u8>) -> Self {
        let uploaded_at = Utc::now();
        RawUpload {
            source_type,
            name: crate::upload_name(source_type, uploaded_at),
            uploaded_at,
            content,
        }
    }
}

/// Upload record as stored in csv_uploads
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UploadRecord {
    pub id: i64,
    pub source_type: String,
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
    pub row_count: i64,
}

/// Ingestion statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestStats {
    pub lines: usize,
    pub inserted: usize,
    pub skipped_blank: usize,
    pub filtered: usize,
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lines: {}, inserted: {}, blank: {}, filtered: {}",
            self.lines, self.inserted, self.skipped_blank, self.filtered
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_round_trip_names() {
        for source in SourceType::ALL {
            assert_eq!(source.as_str().parse::<SourceType>().unwrap(), source);
        }
        assert_eq!("  WEAMS ".parse::<SourceType>().unwrap(), SourceType::Weams);
        assert!("weam".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_column_type_parse() {
        assert_eq!(ColumnType::Text.parse("  abc "), Ok(Value::Text("abc".to_string())));
        assert_eq!(ColumnType::Integer.parse("42"), Ok(Value::Int(42)));
        assert_eq!(ColumnType::Integer.parse("42.0"), Ok(Value::Int(42)));
        assert!(ColumnType::Integer.parse("4.5").is_err());
        assert_eq!(ColumnType::Float.parse("-1.5"), Ok(Value::Float(-1.5)));
        assert!(ColumnType::Float.parse("n/a").is_err());
        assert_eq!(ColumnType::Boolean.parse("Yes"), Ok(Value::Bool(true)));
        assert_eq!(ColumnType::Boolean.parse("no"), Ok(Value::Bool(false)));

        // Blank is null for every kind
        assert_eq!(ColumnType::Float.parse("   "), Ok(Value::Null));
        assert_eq!(ColumnType::Boolean.parse(""), Ok(Value::Null));
    }

    #[test]
    fn test_value_json_shape() {
        let row = StagingRow::from([
            ("cross", Value::Text("123456".to_string())),
            ("gibill", Value::Int(12)),
            ("books", Value::Float(900.0)),
            ("sec_702", Value::Bool(false)),
            ("ope", Value::Null),
        ]);

        let json = serde_json::to_string(&row).unwrap();
        let back: StagingRow = serde_json::from_str(&json).unwrap();

        // Numeric text stays text, whole floats stay floats
        assert_eq!(back, row);
    }

    #[test]
    fn test_value_keys() {
        assert_eq!(Value::Text(" 00123 ".to_string()).as_key(), Some("00123".to_string()));
        assert_eq!(Value::Text("  ".to_string()).as_key(), None);
        assert_eq!(Value::Null.as_key(), None);
    }
}
