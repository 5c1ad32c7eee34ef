use std::fmt;

/// One column value of a result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// SQL NULL, rendered as `\N`
    Null,
    Text(String),
}

impl Value {
    /// How SQL NULL appears in output.
    pub const NULL_LITERAL: &'static str = "\\N";

    /// Build a value from the raw column bytes the server sent.
    pub fn from_raw(raw: Option<Vec<u8>>) -> Self {
        match raw {
            None => Value::Null,
            Some(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Value::Text(text),
                Err(e) => Value::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
            },
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

/// Quoted form: text uses debug escaping, NULL is the bare `\N` in quotes,
/// so `NULL`, the text `\N` and the empty string all render differently.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "\"{}\"", Self::NULL_LITERAL),
            Value::Text(text) => write!(f, "{:?}", text),
        }
    }
}

/// An ordered row of column values from one target database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRow {
    values: Vec<Value>,
}

impl ResultRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<Value> for ResultRow {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", value)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_and_empty_never_conflate() {
        let null = Value::from_raw(None);
        let empty = Value::from_raw(Some(Vec::new()));
        assert!(null.is_null());
        assert_eq!(empty, Value::Text(String::new()));
        assert_eq!(null.to_string(), r#""\N""#);
        assert_eq!(empty.to_string(), r#""""#);
        assert_ne!(null.to_string(), empty.to_string());
    }

    #[test]
    fn test_literal_backslash_n_text_is_escaped() {
        let text = Value::from("\\N");
        assert_eq!(text.to_string(), r#""\\N""#);
        assert_ne!(text.to_string(), Value::Null.to_string());
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let value = Value::from_raw(Some(vec![b'o', b'k', 0xff]));
        assert_eq!(value, Value::Text("ok\u{fffd}".to_string()));
    }

    #[test]
    fn test_row_rendering() {
        let row: ResultRow = vec![Value::from("1"), Value::Null, Value::from("say \"hi\"")]
            .into_iter()
            .collect();
        assert_eq!(row.len(), 3);
        assert_eq!(row.to_string(), r#"["1", "\N", "say \"hi\""]"#);
        assert_eq!(ResultRow::default().to_string(), "[]");
    }
}
