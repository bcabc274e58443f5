//! Schema adapter: grows the destination table to fit incoming records.
//!
//! Column names are the sanitized projection of sheet field names and every
//! added column is nullable `TEXT`. Columns are only ever added, never
//! dropped or retyped.
//!
//! Known columns live in a cache that is refreshed from the datastore only
//! when a record needs a name the cache has not seen. The "check, then add"
//! sequence is not atomic across callers, so a concurrent add of the same
//! column is reported as [`ColumnOrigin::Concurrent`] rather than as an error.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use sheetsync_core::{sanitize_field_name, ColumnName, ROW_ID_COLUMN};

use crate::error::{StoreError, SyncError};
use crate::store::Datastore;

/// How a cached column came to be known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOrigin {
    /// Reported by `list_columns`.
    Discovered,
    /// Added by this adapter.
    Created,
    /// Another writer added it between our listing and our add.
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub origin: ColumnOrigin,
    pub known_since: DateTime<Utc>,
}

/// Result of [`SchemaAdapter::ensure_columns`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaOutcome {
    /// Requested columns that now exist and can be written.
    pub available: BTreeSet<ColumnName>,
    /// Columns this call added.
    pub created: Vec<ColumnName>,
    /// Requested columns that could not be added; their fields are dropped.
    pub failed: Vec<ColumnName>,
}

pub struct SchemaAdapter {
    store: Arc<dyn Datastore>,
    cache: RwLock<BTreeMap<ColumnName, ColumnMetadata>>,
}

impl SchemaAdapter {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self {
            store,
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    /// Make sure a column exists for every field name.
    ///
    /// The reserved identifier field, names that sanitize to a reserved column
    /// and names that sanitize to nothing are skipped. A failed add is logged
    /// and reported in [`SchemaOutcome::failed`]; only an unreachable
    /// datastore fails the whole call.
    pub fn ensure_columns<'a, I>(&self, field_names: I) -> Result<SchemaOutcome, SyncError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted = wanted_columns(field_names);
        let mut outcome = SchemaOutcome::default();
        if wanted.is_empty() {
            return Ok(outcome);
        }

        let missing: Vec<ColumnName> = {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            wanted
                .iter()
                .filter(|name| !cache.contains_key(*name))
                .cloned()
                .collect()
        };

        if !missing.is_empty() {
            self.refresh()?;
            for name in missing {
                if self.is_known(&name) {
                    continue;
                }
                match self.store.add_column(&name) {
                    Ok(()) => {
                        tracing::info!(column = %name, "added column");
                        self.remember(&name, ColumnOrigin::Created);
                        outcome.created.push(name);
                    }
                    Err(StoreError::ColumnExists(_)) => {
                        tracing::debug!(column = %name, "column added concurrently");
                        self.remember(&name, ColumnOrigin::Concurrent);
                    }
                    Err(err) if err.is_transient() => return Err(SyncError::Schema(err)),
                    Err(err) => {
                        tracing::warn!(
                            column = %name,
                            error = %err,
                            "failed to add column; field will be dropped",
                        );
                        outcome.failed.push(name);
                    }
                }
            }
        }

        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        outcome.available = wanted
            .into_iter()
            .filter(|name| cache.contains_key(name))
            .collect();
        Ok(outcome)
    }

    /// Reload the column list from the datastore.
    ///
    /// Entries already cached keep their origin; columns that disappeared
    /// externally are forgotten so the next record re-adds them.
    pub fn refresh(&self) -> Result<(), SyncError> {
        let listed = self.store.list_columns().map_err(SyncError::Schema)?;
        let now = Utc::now();
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let mut refreshed = BTreeMap::new();
        for name in listed.into_iter().filter(|name| !name.is_reserved()) {
            let meta = cache.remove(&name).unwrap_or(ColumnMetadata {
                origin: ColumnOrigin::Discovered,
                known_since: now,
            });
            refreshed.insert(name, meta);
        }
        *cache = refreshed;
        Ok(())
    }

    /// Snapshot of the cached column set.
    pub fn cached_columns(&self) -> BTreeMap<ColumnName, ColumnMetadata> {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_known(&self, name: &ColumnName) -> bool {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    fn remember(&self, name: &ColumnName, origin: ColumnOrigin) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.entry(name.clone()).or_insert(ColumnMetadata {
            origin,
            known_since: Utc::now(),
        });
    }
}

/// Sanitized, writable column names for a set of raw field names.
pub(crate) fn wanted_columns<'a, I>(field_names: I) -> BTreeSet<ColumnName>
where
    I: IntoIterator<Item = &'a str>,
{
    field_names
        .into_iter()
        .filter(|field| *field != ROW_ID_COLUMN)
        .map(sanitize_field_name)
        .filter(|name| name.is_identifier_safe() && !name.is_reserved())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::memory::MemoryDatastore;

    fn adapter() -> (Arc<MemoryDatastore>, SchemaAdapter) {
        let store = Arc::new(MemoryDatastore::new());
        let adapter = SchemaAdapter::new(store.clone());
        (store, adapter)
    }

    #[test]
    fn wanted_columns_skip_reserved_and_empty_names() {
        let wanted = wanted_columns(["Name", "_sheet_row_id", "updated at", "", "First Name"]);
        let names: Vec<_> = wanted.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["First_Name", "Name"]);
    }

    #[test]
    fn creates_missing_columns_as_sanitized_names() {
        let (store, adapter) = adapter();
        let outcome = adapter.ensure_columns(["Name", "Job Title"]).expect("ensure");

        assert_eq!(
            outcome.created,
            vec![ColumnName::from("Job_Title"), ColumnName::from("Name")]
        );
        assert!(outcome.failed.is_empty());
        assert!(store.columns().contains(&ColumnName::from("Job_Title")));
    }

    #[test]
    fn second_call_is_served_from_cache() {
        let (store, adapter) = adapter();
        adapter.ensure_columns(["Name"]).expect("first");
        let listings = store.list_calls();

        let outcome = adapter.ensure_columns(["Name"]).expect("second");
        assert!(outcome.created.is_empty());
        assert!(outcome.available.contains(&ColumnName::from("Name")));
        assert_eq!(store.list_calls(), listings, "cache hit must not list columns");
    }

    #[test]
    fn existing_columns_are_discovered_not_recreated() {
        let (store, adapter) = adapter();
        store
            .add_column(&ColumnName::from("Role"))
            .expect("seed column");

        let outcome = adapter.ensure_columns(["Role"]).expect("ensure");
        assert!(outcome.created.is_empty());
        assert_eq!(
            adapter.cached_columns()[&ColumnName::from("Role")].origin,
            ColumnOrigin::Discovered
        );
    }

    #[test]
    fn rejected_column_is_dropped_not_fatal() {
        let (store, adapter) = adapter();
        store.reject_column("select");

        let outcome = adapter.ensure_columns(["select", "Name"]).expect("ensure");
        assert_eq!(outcome.failed, vec![ColumnName::from("select")]);
        assert!(outcome.available.contains(&ColumnName::from("Name")));
        assert!(!outcome.available.contains(&ColumnName::from("select")));
    }

    #[test]
    fn unreachable_datastore_is_schema_error() {
        let (store, adapter) = adapter();
        store.set_unavailable(true);
        let err = adapter.ensure_columns(["Name"]).unwrap_err();
        assert_eq!(err.kind(), "schema_error");
    }

    #[test]
    fn concurrent_overlapping_calls_do_not_error() {
        let store = Arc::new(MemoryDatastore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    // Separate adapters so each has a cold cache and races on add.
                    let adapter = SchemaAdapter::new(store);
                    let fields = ["Name", "Role", if i % 2 == 0 { "Team" } else { "Desk" }];
                    adapter.ensure_columns(fields)
                })
            })
            .collect();

        for handle in handles {
            let outcome = handle.join().expect("join").expect("ensure");
            assert!(outcome.failed.is_empty());
            assert_eq!(outcome.available.len(), 3);
        }
        let columns = store.columns();
        for name in ["Name", "Role", "Team", "Desk"] {
            let count = columns.iter().filter(|c| c.as_str() == name).count();
            assert_eq!(count, 1, "{name} must exist exactly once");
        }
    }

    #[test]
    fn growth_never_removes_existing_columns() {
        let (store, adapter) = adapter();
        adapter.ensure_columns(["A", "B"]).expect("first");
        adapter.ensure_columns(["C"]).expect("second");
        let columns: Vec<_> = store
            .columns()
            .into_iter()
            .filter(|c| !c.is_reserved())
            .map(|c| c.0)
            .collect();
        assert_eq!(columns, vec!["A", "B", "C"]);
    }
}
