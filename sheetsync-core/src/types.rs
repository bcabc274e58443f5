//! Domain types shared by the table side and the spreadsheet side.
//!
//! Field names arriving from the sheet are free-form; the table only accepts
//! identifier-safe column names. [`sanitize_field_name`] is the single
//! projection between the two.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved column holding the external row identifier (the natural key).
pub const ROW_ID_COLUMN: &str = "_sheet_row_id";

/// Reserved column holding the last-modified instant, maintained by the datastore.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable external row identifier shared by both systems.
///
/// On the sheet side it doubles as the 1-based row position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub String);

impl RowId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` when the id is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Sheet row this id addresses, if it is a positive integer.
    pub fn sheet_position(&self) -> Option<u32> {
        self.0.trim().parse::<u32>().ok().filter(|n| *n > 0)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// An identifier-safe table column name.
///
/// Build one from a sheet field name with [`sanitize_field_name`]; the tuple
/// constructor is for names read back from the datastore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnName(pub String);

impl ColumnName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for the identifier and timestamp columns the sync engine owns.
    ///
    /// Compared case-insensitively since SQL column names are.
    pub fn is_reserved(&self) -> bool {
        self.0.eq_ignore_ascii_case(ROW_ID_COLUMN) || self.0.eq_ignore_ascii_case(UPDATED_AT_COLUMN)
    }

    /// `true` when the name is non-empty and only contains `[A-Za-z0-9_]`.
    pub fn is_identifier_safe(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(is_identifier_char)
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ColumnName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Project a free-form field name onto `[A-Za-z0-9_]`, replacing every other
/// character with `_`.
pub fn sanitize_field_name(field: &str) -> ColumnName {
    ColumnName(
        field
            .chars()
            .map(|c| if is_identifier_char(c) { c } else { '_' })
            .collect(),
    )
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A scalar cell value as it arrives in an inbound payload.
///
/// Deserializes from any JSON scalar; arrays and objects are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl FieldValue {
    /// Textual form stored in the table. `None` for null.
    pub fn to_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Number(n) => Some(n.to_string()),
            FieldValue::Text(s) => Some(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

/// One logical row: field name → scalar value.
///
/// Keys are the raw sheet field names, not yet sanitized.
pub type Record = BTreeMap<String, FieldValue>;
