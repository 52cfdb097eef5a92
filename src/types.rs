//! Core data types shared by the stores, the worker and the API client

use std::fmt;

use serde::{Deserialize, Deserializer};

/// Opaque key naming one remote user.
///
/// The service may hand out identifiers as JSON strings or integers; both are
/// kept in their textual form since that is how they appear in the pending
/// file, the CSV and request paths.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Build an identifier from its textual form, trimming surrounding whitespace.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Identifier(raw.as_ref().trim().to_string())
    }

    /// Textual form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(raw: &str) -> Self {
        Identifier::new(raw)
    }
}

impl From<String> for Identifier {
    fn from(raw: String) -> Self {
        Identifier::new(raw)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Identifier::new(s),
            Raw::Unsigned(n) => Identifier(n.to_string()),
            Raw::Signed(n) => Identifier(n.to_string()),
        })
    }
}

/// One output row: a user and the first value of each tracked metric.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub user_id: Identifier,
    pub country: Option<String>,
    pub r: Option<serde_json::Number>,
    pub f: Option<serde_json::Number>,
    pub m: Option<serde_json::Number>,
}

impl Record {
    /// CSV header, in column order.
    pub const HEADER: [&'static str; 5] = ["user_id", "country", "R", "F", "M"];

    /// Row cells in [`Record::HEADER`] order; absent values become empty cells.
    pub fn to_row(&self) -> [String; 5] {
        fn cell<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }

        [
            self.user_id.to_string(),
            cell(&self.country),
            cell(&self.r),
            cell(&self.f),
            cell(&self.m),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_from_strings_and_numbers_agree() {
        let ids: Vec<Identifier> = serde_json::from_str(r#"["u1", 42, " u3 ", -7]"#).unwrap();
        assert_eq!(
            ids,
            vec![
                Identifier::from("u1"),
                Identifier::from("42"),
                Identifier::from("u3"),
                Identifier::from("-7"),
            ]
        );
    }

    #[test]
    fn record_row_keeps_number_formatting_and_blanks_missing_values() {
        let record = Record {
            user_id: "u1".into(),
            country: Some("ES".into()),
            r: Some(3.into()),
            f: None,
            m: serde_json::Number::from_f64(10.5),
        };
        assert_eq!(record.to_row(), ["u1", "ES", "3", "", "10.5"]);
    }
}
