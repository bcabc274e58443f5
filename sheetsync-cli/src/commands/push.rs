//! `sheetsync push <row_id> --field K=V... | --json '{..}'`

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use sheetsync_core::{FieldValue, Record, RowId};
use sheetsync_daemon::request_push;

use super::explain;

/// Send one inbound record, as the sheet side would.
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Sheet row number the record belongs to.
    pub row_id: String,

    /// One `Field=value` pair; repeat for more fields. Values are text.
    #[arg(long = "field", short = 'f', value_name = "FIELD=VALUE")]
    pub fields: Vec<String>,

    /// The whole record as a JSON object of scalars.
    #[arg(long, conflicts_with = "fields")]
    pub json: Option<String>,
}

impl PushArgs {
    pub fn run(self) -> Result<()> {
        let record = match &self.json {
            Some(json) => parse_json_record(json)?,
            None => parse_fields(&self.fields)?,
        };
        if record.is_empty() {
            bail!("nothing to push; pass --field FIELD=VALUE or --json");
        }

        let home = dirs::home_dir().context("could not determine home directory")?;
        let report = request_push(&home, RowId::from(self.row_id.clone()), record)
            .map_err(|err| explain(err, "push"))?;

        let listed = |key: &str| -> Vec<String> {
            report[key]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };
        let written = listed("written");
        let created = listed("created_columns");
        let dropped = listed("dropped");

        println!(
            "{} row {} upserted ({} columns written)",
            "✓".green().bold(),
            self.row_id,
            written.len()
        );
        if !created.is_empty() {
            println!("  new columns: {}", created.join(", "));
        }
        if !dropped.is_empty() {
            println!("  {} dropped: {}", "!".yellow().bold(), dropped.join(", "));
        }
        Ok(())
    }
}

/// Parse repeated `Field=value` arguments. The first `=` splits; later ones
/// belong to the value.
pub(crate) fn parse_fields(pairs: &[String]) -> Result<Record> {
    let mut record = Record::new();
    for pair in pairs {
        let (field, value) = pair
            .split_once('=')
            .with_context(|| format!("expected FIELD=VALUE, got '{pair}'"))?;
        if field.trim().is_empty() {
            bail!("empty field name in '{pair}'");
        }
        record.insert(field.to_string(), FieldValue::from(value));
    }
    Ok(record)
}

pub(crate) fn parse_json_record(json: &str) -> Result<Record> {
    serde_json::from_str(json).context("--json must be an object whose values are scalars")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fields_split_on_first_equals() {
        let record = parse_fields(&strings(&["Name=Ava", "Formula==A1+1", "Note="])).unwrap();
        assert_eq!(record["Name"], FieldValue::from("Ava"));
        assert_eq!(record["Formula"], FieldValue::from("=A1+1"));
        assert_eq!(record["Note"], FieldValue::from(""));
    }

    #[test]
    fn field_names_keep_spaces() {
        let record = parse_fields(&strings(&["Job Title=Eng"])).unwrap();
        assert!(record.contains_key("Job Title"));
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        assert!(parse_fields(&strings(&["NoEquals"])).is_err());
        assert!(parse_fields(&strings(&["=value"])).is_err());
    }

    #[test]
    fn json_record_keeps_scalar_types() {
        let record = parse_json_record(r#"{"Age":31,"Active":true,"Note":null}"#).unwrap();
        assert_eq!(record["Age"].to_text().as_deref(), Some("31"));
        assert!(record["Note"].is_null());
    }

    #[test]
    fn json_record_must_be_flat_object() {
        assert!(parse_json_record(r#"["a"]"#).is_err());
        assert!(parse_json_record(r#"{"Tags":["a"]}"#).is_err());
    }
}
