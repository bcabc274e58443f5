//! The spreadsheet side of the sync.

use crate::error::SheetError;

/// The external spreadsheet rows are pushed into.
pub trait SheetClient: Send + Sync {
    /// Field names from the sheet's first row, in column order.
    fn header_row(&self) -> Result<Vec<String>, SheetError>;

    /// Overwrite the row at 1-based `position`, starting at the first column.
    fn write_row(&self, position: u32, values: &[String]) -> Result<(), SheetError>;
}
