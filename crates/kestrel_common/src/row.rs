use std::fmt;

/// A single cell value as it travels between the backend connector, the
/// metadata synthesizer, and the wire codec. Temporal values arrive from the
/// connector already rendered in MySQL text form (`%Y-%m-%d [%H:%M:%S]`).
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Render for the text protocol. `None` means SQL NULL.
    pub fn render(&self) -> Option<String> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Int(v) => Some(v.to_string()),
            ScalarValue::UInt(v) => Some(v.to_string()),
            ScalarValue::Double(v) => Some(v.to_string()),
            ScalarValue::Text(v) => Some(v.clone()),
            ScalarValue::Bytes(v) => Some(String::from_utf8_lossy(v).into_owned()),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::UInt(v) => write!(f, "{}", v),
            ScalarValue::Double(v) => write!(f, "{}", v),
            ScalarValue::Text(v) => write!(f, "{}", v),
            ScalarValue::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(v)),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::Text(s.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        ScalarValue::Text(s)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

/// Coarse column type carried alongside each column name. The protocol
/// crate maps these onto wire column types; the connector maps backend
/// column metadata into them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnTypeHint {
    Integer,
    Double,
    Decimal,
    #[default]
    Text,
    Bytes,
    Date,
    Time,
    DateTime,
}

/// A result column as seen by the wire codec: a name and a type hint.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnTypeHint,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnTypeHint) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    /// Text column, the default when nothing better is known.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnTypeHint::Text)
    }
}

/// Infer a column type from a sample value. Used when a reply is synthesized
/// locally and no backend metadata exists.
pub fn infer_type(value: &ScalarValue) -> ColumnTypeHint {
    match value {
        ScalarValue::Null => ColumnTypeHint::Text,
        ScalarValue::Int(_) | ScalarValue::UInt(_) => ColumnTypeHint::Integer,
        ScalarValue::Double(_) => ColumnTypeHint::Double,
        ScalarValue::Text(_) => ColumnTypeHint::Text,
        ScalarValue::Bytes(_) => ColumnTypeHint::Bytes,
    }
}

/// Build column definitions from names plus an optional sample row.
pub fn columns_from_sample(names: &[String], sample: Option<&[ScalarValue]>) -> Vec<ColumnDef> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let ty = sample
                .and_then(|row| row.get(i))
                .map(infer_type)
                .unwrap_or_default();
            ColumnDef::new(name.clone(), ty)
        })
        .collect()
}
