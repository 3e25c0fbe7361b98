//! The targeting storage contract and the helpers every backend shares.
//!
//! Entries are keyed by `(visitor_id, scope, name)` and hold opaque JSON.
//! Each `(visitor_id, scope)` bucket also tracks creation and modification
//! timestamps; a reserved [`META_KEY`] row keeps them alive independently of
//! the real entries (it is written by migrations).

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use targeting_core::{StorageBackend, VisitorInfo};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::timestamps::BucketTimestamps;

/// Reserved entry name of the per-bucket timestamp row.
pub const META_KEY: &str = "__targeting_meta__";

/// Visitor-scoped key/value storage.
///
/// Every operation is a silent miss / no-op for visitors without an ID,
/// except [`migrate_from`](TargetingStorage::migrate_from), which fails with
/// [`StorageError::MissingVisitorId`] before touching either side.
pub trait TargetingStorage: Send + Sync {
    fn backend(&self) -> StorageBackend;

    /// Every entry of the scope, without the meta row.
    fn all(&self, visitor: &VisitorInfo, scope: &str) -> StorageResult<HashMap<String, Value>>;

    fn has(&self, visitor: &VisitorInfo, scope: &str, name: &str) -> StorageResult<bool>;

    /// Stored value, or `default` when the visitor is anonymous, the entry
    /// is missing or its stored form no longer parses.
    fn get(&self, visitor: &VisitorInfo, scope: &str, name: &str, default: Value)
        -> StorageResult<Value>;

    /// Insert or update an entry.
    fn set(&self, visitor: &VisitorInfo, scope: &str, name: &str, value: &Value)
        -> StorageResult<()>;

    /// Delete one entry. Bucket timestamps survive.
    fn remove(&self, visitor: &VisitorInfo, scope: &str, name: &str) -> StorageResult<()>;

    /// Delete one scope, or every scope of the visitor when `scope` is `None`.
    fn clear(&self, visitor: &VisitorInfo, scope: Option<&str>) -> StorageResult<()>;

    fn timestamps(&self, visitor: &VisitorInfo, scope: &str)
        -> StorageResult<Option<BucketTimestamps>>;

    fn created_at(&self, visitor: &VisitorInfo, scope: &str) -> StorageResult<Option<DateTime<Utc>>> {
        Ok(self.timestamps(visitor, scope)?.map(|ts| ts.created))
    }

    fn updated_at(&self, visitor: &VisitorInfo, scope: &str) -> StorageResult<Option<DateTime<Utc>>> {
        Ok(self.timestamps(visitor, scope)?.map(|ts| ts.updated))
    }

    /// Copy one scope of `source` into this storage as a single atomic unit.
    /// Entries and the meta row carry the source's bucket timestamps.
    fn migrate_from(
        &self,
        source: &dyn TargetingStorage,
        visitor: &VisitorInfo,
        scope: &str,
    ) -> StorageResult<()>;
}

// ─── Shared helpers ─────────────────────────────────────────────────────

/// The visitor ID, or `None` (with a debug trace) for anonymous visits.
pub(crate) fn resolve_visitor<'a>(visitor: &'a VisitorInfo, operation: &str) -> Option<&'a str> {
    let id = visitor.visitor_id();
    if id.is_none() {
        debug!(operation = operation, "No visitor ID, skipping storage operation");
    }
    id
}

/// Like [`resolve_visitor`] but an anonymous visit is an error.
pub(crate) fn require_visitor<'a>(
    visitor: &'a VisitorInfo,
    operation: &'static str,
) -> StorageResult<&'a str> {
    visitor
        .visitor_id()
        .ok_or(StorageError::MissingVisitorId { operation })
}

pub(crate) fn check_entry_name(name: &str) -> StorageResult<()> {
    if name == META_KEY {
        return Err(StorageError::ReservedName(name.to_string()));
    }
    Ok(())
}

pub(crate) fn encode_value(value: &Value) -> StorageResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Parse a stored value. Unparseable rows read as missing.
pub(crate) fn decode_value(raw: &str, name: &str) -> Option<Value> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(name = name, error = %err, "Discarding malformed stored value");
            None
        }
    }
}

/// Everything a migration copies out of the source, already encoded so
/// nothing can fail once the destination write has started.
pub(crate) struct MigrationSnapshot {
    pub entries: BTreeMap<String, String>,
    pub timestamps: BucketTimestamps,
}

impl MigrationSnapshot {
    /// `None` when the source bucket is empty and carries no timestamps.
    pub fn collect(
        source: &dyn TargetingStorage,
        visitor: &VisitorInfo,
        scope: &str,
    ) -> StorageResult<Option<Self>> {
        let Some(timestamps) = source.timestamps(visitor, scope)? else {
            return Ok(None);
        };
        let entries = source
            .all(visitor, scope)?
            .iter()
            .map(|(name, value)| Ok((name.clone(), encode_value(value)?)))
            .collect::<StorageResult<BTreeMap<_, _>>>()?;
        Ok(Some(Self {
            entries,
            timestamps,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_key_is_reserved() {
        assert!(matches!(
            check_entry_name(META_KEY),
            Err(StorageError::ReservedName(_))
        ));
        assert!(check_entry_name("cart").is_ok());
    }

    #[test]
    fn test_decode_falsy_values() {
        for raw in ["0", "false", "\"\"", "null", "[]"] {
            assert!(decode_value(raw, "n").is_some(), "{raw} should decode");
        }
        assert!(decode_value("{not json", "n").is_none());
    }

    #[test]
    fn test_require_visitor() {
        let anonymous = VisitorInfo::anonymous();
        assert!(matches!(
            require_visitor(&anonymous, "migrate"),
            Err(StorageError::MissingVisitorId { operation: "migrate" })
        ));
        let known = VisitorInfo::anonymous().with_visitor_id("v-1");
        assert_eq!(require_visitor(&known, "migrate").unwrap(), "v-1");
    }
}
