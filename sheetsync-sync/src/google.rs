//! Google Sheets v4 [`SheetClient`] over blocking HTTP.
//!
//! Reads the header with `values.get` on row 1 and writes rows with
//! `values.update` starting at column A. Authentication is a bearer token
//! taken from the environment; token refresh is out of scope.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::SheetError;
use crate::sheet::SheetClient;

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct GoogleSheetClient {
    agent: ureq::Agent,
    base_url: String,
    spreadsheet_id: String,
    sheet_name: String,
    token: String,
}

impl GoogleSheetClient {
    pub fn new(spreadsheet_id: &str, sheet_name: &str, token: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            base_url: DEFAULT_BASE_URL.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            sheet_name: sheet_name.to_string(),
            token: token.to_string(),
        }
    }

    /// Build a client whose token comes from the environment variable `env_var`.
    pub fn from_env(
        spreadsheet_id: &str,
        sheet_name: &str,
        env_var: &str,
    ) -> Result<Self, SheetError> {
        let token = std::env::var(env_var)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SheetError::MissingToken(env_var.to_string()))?;
        Ok(Self::new(spreadsheet_id, sheet_name, &token))
    }

    /// Point the client at another API root (used by tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            self.base_url,
            self.spreadsheet_id,
            encode_range(&format!("{}!{range}", self.sheet_name))
        )
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl SheetClient for GoogleSheetClient {
    fn header_row(&self) -> Result<Vec<String>, SheetError> {
        let response = self
            .agent
            .get(&self.values_url("1:1"))
            .set("Authorization", &self.bearer())
            .call()
            .map_err(http_error)?;
        let range: ValueRange = response
            .into_json()
            .map_err(|e| SheetError::Malformed(e.to_string()))?;

        Ok(range
            .values
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(cell_text)
            .collect())
    }

    fn write_row(&self, position: u32, values: &[String]) -> Result<(), SheetError> {
        self.agent
            .put(&self.values_url(&format!("A{position}")))
            .set("Authorization", &self.bearer())
            .query("valueInputOption", "RAW")
            .send_json(json!({ "values": [values] }))
            .map_err(http_error)?;
        tracing::debug!(position, cells = values.len(), "wrote sheet row");
        Ok(())
    }
}

fn http_error(err: ureq::Error) -> SheetError {
    match err {
        ureq::Error::Status(status, response) => SheetError::Rejected {
            status,
            message: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => SheetError::Unavailable(transport.to_string()),
    }
}

fn cell_text(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A1 range as a single percent-encoded path segment.
fn encode_range(range: &str) -> String {
    urlencoding::encode(range).into_owned()
}
