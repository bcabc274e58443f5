//! SQLite-backed [`Datastore`].
//!
//! The synced table keeps the row id as its primary key and an `updated_at`
//! column holding milliseconds since the epoch. Inserts take it from the
//! column default; an `AFTER UPDATE` trigger bumps it on every update that
//! did not set it explicitly, so edits made by other programs are seen by the
//! poller too.
//!
//! Selection compares against the watermark's millisecond floor. The poller
//! resumes just before the millisecond its cycle started in, so edits landing
//! in that millisecond are selected again on the next cycle.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::params_from_iter;

use sheetsync_core::{ColumnName, RowId, ROW_ID_COLUMN, UPDATED_AT_COLUMN};

use crate::error::StoreError;
use crate::store::{Datastore, Row, UpsertPlan};

const NOW_MILLIS: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SqliteDatastore {
    pool: Pool<SqliteConnectionManager>,
    table: String,
}

impl SqliteDatastore {
    /// Open (creating if needed) the database at `path` and make sure `table`
    /// exists with the reserved columns and the timestamp trigger.
    pub fn open(path: &Path, table: &str, pool_size: u32) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, table, pool_size, DEFAULT_ACQUIRE_TIMEOUT)
    }

    /// Like [`SqliteDatastore::open`], failing with
    /// [`StoreError::Unavailable`] when no connection frees up within
    /// `acquire_timeout`.
    pub fn open_with_timeout(
        path: &Path,
        table: &str,
        pool_size: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        if !ColumnName::from(table).is_identifier_safe() {
            return Err(StoreError::Query(format!(
                "table name `{table}` must match [A-Za-z0-9_]+"
            )));
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")
        });
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(acquire_timeout)
            .build(manager)
            .map_err(|e| StoreError::Unavailable(format!("opening {}: {e}", path.display())))?;

        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.bootstrap()?;
        tracing::info!(path = %path.display(), table, "opened sqlite datastore");
        Ok(store)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        self.pool
            .get()
            .map_err(|e| StoreError::Unavailable(format!("acquiring connection: {e}")))
    }

    fn bootstrap(&self) -> Result<(), StoreError> {
        let table = quote(&self.table);
        let trigger = quote(&format!("{}_touch_{UPDATED_AT_COLUMN}", self.table));
        let index = quote(&format!("{}_{UPDATED_AT_COLUMN}_idx", self.table));
        let id = quote(ROW_ID_COLUMN);
        let updated = quote(UPDATED_AT_COLUMN);

        let conn = self.conn()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                 {id} TEXT PRIMARY KEY NOT NULL,
                 {updated} INTEGER NOT NULL DEFAULT ({NOW_MILLIS})
             );
             CREATE INDEX IF NOT EXISTS {index} ON {table} ({updated});
             CREATE TRIGGER IF NOT EXISTS {trigger}
             AFTER UPDATE ON {table}
             FOR EACH ROW WHEN NEW.{updated} IS OLD.{updated}
             BEGIN
                 UPDATE {table} SET {updated} = {NOW_MILLIS} WHERE {id} = NEW.{id};
             END;"
        ))?;
        drop(conn);

        let columns = self.list_columns()?;
        for reserved in [ROW_ID_COLUMN, UPDATED_AT_COLUMN] {
            if !columns.iter().any(|c| c.as_str() == reserved) {
                return Err(StoreError::Query(format!(
                    "existing table `{}` has no `{reserved}` column",
                    self.table
                )));
            }
        }
        Ok(())
    }
}

impl Datastore for SqliteDatastore {
    fn list_columns(&self) -> Result<Vec<ColumnName>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(&self.table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.into_iter().map(ColumnName).collect())
    }

    fn add_column(&self, name: &ColumnName) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} TEXT",
            quote(&self.table),
            quote(name.as_str())
        );
        match conn.execute(&sql, []) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(_, Some(msg)))
                if msg.contains("duplicate column name") =>
            {
                Err(StoreError::ColumnExists(name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn upsert(&self, plan: &UpsertPlan) -> Result<(), StoreError> {
        let sql = upsert_sql(&self.table, plan);
        let params: Vec<Option<&str>> = std::iter::once(Some(plan.row_id.as_str()))
            .chain(plan.fields.iter().map(|(_, value)| value.as_deref()))
            .collect();
        let conn = self.conn()?;
        conn.execute(&sql, params_from_iter(params))?;
        Ok(())
    }

    fn select_modified_since(&self, since: DateTime<Utc>) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {updated} > ?1 ORDER BY {updated}",
            quote(&self.table),
            updated = quote(UPDATED_AT_COLUMN),
        ))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let rows = stmt
            .query_map([since.timestamp_millis()], |sql_row| {
                let mut row_id = RowId(String::new());
                let mut modified_ms = 0i64;
                let mut values = BTreeMap::new();
                for (idx, name) in names.iter().enumerate() {
                    let value = sql_row.get_ref(idx)?;
                    if name == ROW_ID_COLUMN {
                        row_id = RowId(value_text(value).unwrap_or_default());
                    } else if name == UPDATED_AT_COLUMN {
                        modified_ms = value.as_i64().unwrap_or_default();
                    } else {
                        values.insert(name.clone(), value_text(value));
                    }
                }
                Ok(Row {
                    row_id,
                    values,
                    modified_at: DateTime::from_timestamp_millis(modified_ms)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Insert-or-update statement for a plan.
///
/// Parameter 1 is the row id, then one parameter per planned column. A plan
/// without columns only inserts the bare row.
pub(crate) fn upsert_sql(table: &str, plan: &UpsertPlan) -> String {
    let id = quote(ROW_ID_COLUMN);
    let mut columns = vec![id.clone()];
    columns.extend(plan.columns().map(|c| quote(c.as_str())));
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();

    let on_conflict = if plan.fields.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let assignments: Vec<String> = plan
            .columns()
            .map(|c| {
                let c = quote(c.as_str());
                format!("{c} = excluded.{c}")
            })
            .collect();
        format!("DO UPDATE SET {}", assignments.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({id}) {on_conflict}",
        quote(table),
        columns.join(", "),
        placeholders.join(", "),
    )
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}
