//! In-process session backend backed by DashMap.
//! Buckets live as long as the process; clones share the same map.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use targeting_core::{StorageBackend, VisitorInfo};
use tracing::{debug, info};

use crate::error::StorageResult;
use crate::storage::{
    check_entry_name, decode_value, encode_value, require_visitor, resolve_visitor,
    MigrationSnapshot, TargetingStorage, META_KEY,
};
use crate::timestamps::{self, BucketTimestamps};

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

/// Rows of one `(visitor, scope)` bucket, meta row included.
type Bucket = HashMap<String, StoredEntry>;

/// Same conflict rule as the SQL backend: replace the value, keep the
/// earliest creation and the latest modification.
fn upsert(bucket: &mut Bucket, name: &str, value: String, ts: BucketTimestamps) {
    match bucket.get_mut(name) {
        Some(entry) => {
            entry.value = value;
            entry.created = entry.created.min(ts.created);
            entry.modified = entry.modified.max(ts.updated);
        }
        None => {
            bucket.insert(
                name.to_string(),
                StoredEntry {
                    value,
                    created: ts.created,
                    modified: ts.updated,
                },
            );
        }
    }
}

fn touch_meta(bucket: &mut Bucket, now: DateTime<Utc>) {
    if let Some(meta) = bucket.get_mut(META_KEY) {
        meta.modified = meta.modified.max(now);
    }
}

#[derive(Clone, Default)]
pub struct SessionStorage {
    buckets: Arc<DashMap<(String, String), Bucket>>,
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-empty `(visitor, scope)` buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn key(visitor_id: &str, scope: &str) -> (String, String) {
        (visitor_id.to_string(), scope.to_string())
    }
}

impl TargetingStorage for SessionStorage {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Session
    }

    fn all(&self, visitor: &VisitorInfo, scope: &str) -> StorageResult<HashMap<String, Value>> {
        let Some(visitor_id) = resolve_visitor(visitor, "all") else {
            return Ok(HashMap::new());
        };
        let Some(bucket) = self.buckets.get(&Self::key(visitor_id, scope)) else {
            return Ok(HashMap::new());
        };
        Ok(bucket
            .value()
            .iter()
            .filter(|(name, _)| name.as_str() != META_KEY)
            .filter_map(|(name, entry)| Some((name.clone(), decode_value(&entry.value, name)?)))
            .collect())
    }

    fn has(&self, visitor: &VisitorInfo, scope: &str, name: &str) -> StorageResult<bool> {
        let Some(visitor_id) = resolve_visitor(visitor, "has") else {
            return Ok(false);
        };
        if name == META_KEY {
            return Ok(false);
        }
        Ok(self
            .buckets
            .get(&Self::key(visitor_id, scope))
            .is_some_and(|bucket| bucket.value().contains_key(name)))
    }

    fn get(
        &self,
        visitor: &VisitorInfo,
        scope: &str,
        name: &str,
        default: Value,
    ) -> StorageResult<Value> {
        let Some(visitor_id) = resolve_visitor(visitor, "get") else {
            return Ok(default);
        };
        if name == META_KEY {
            return Ok(default);
        }
        let found = self
            .buckets
            .get(&Self::key(visitor_id, scope))
            .and_then(|bucket| {
                bucket
                    .value()
                    .get(name)
                    .and_then(|e| decode_value(&e.value, name))
            });
        match found {
            Some(value) => {
                metrics::counter!("storage.hit", "backend" => "session").increment(1);
                Ok(value)
            }
            None => {
                metrics::counter!("storage.miss", "backend" => "session").increment(1);
                Ok(default)
            }
        }
    }

    fn set(
        &self,
        visitor: &VisitorInfo,
        scope: &str,
        name: &str,
        value: &Value,
    ) -> StorageResult<()> {
        check_entry_name(name)?;
        let Some(visitor_id) = resolve_visitor(visitor, "set") else {
            return Ok(());
        };
        let encoded = encode_value(value)?;
        let now = timestamps::now();

        let mut bucket = self.buckets.entry(Self::key(visitor_id, scope)).or_default();
        upsert(bucket.value_mut(), name, encoded, BucketTimestamps::new(now, now));
        touch_meta(bucket.value_mut(), now);
        metrics::counter!("storage.write", "backend" => "session").increment(1);
        Ok(())
    }

    fn remove(&self, visitor: &VisitorInfo, scope: &str, name: &str) -> StorageResult<()> {
        check_entry_name(name)?;
        let Some(visitor_id) = resolve_visitor(visitor, "remove") else {
            return Ok(());
        };
        let key = Self::key(visitor_id, scope);
        if let Some(mut bucket) = self.buckets.get_mut(&key) {
            if bucket.value_mut().remove(name).is_some() {
                touch_meta(bucket.value_mut(), timestamps::now());
            }
        }
        self.buckets.remove_if(&key, |_, bucket| bucket.is_empty());
        Ok(())
    }

    fn clear(&self, visitor: &VisitorInfo, scope: Option<&str>) -> StorageResult<()> {
        let Some(visitor_id) = resolve_visitor(visitor, "clear") else {
            return Ok(());
        };
        match scope {
            Some(scope) => {
                self.buckets.remove(&Self::key(visitor_id, scope));
            }
            None => self.buckets.retain(|(owner, _), _| owner != visitor_id),
        }
        debug!(visitor_id = visitor_id, scope = ?scope, "Session storage cleared");
        Ok(())
    }

    fn timestamps(
        &self,
        visitor: &VisitorInfo,
        scope: &str,
    ) -> StorageResult<Option<BucketTimestamps>> {
        let Some(visitor_id) = resolve_visitor(visitor, "timestamps") else {
            return Ok(None);
        };
        let Some(bucket) = self.buckets.get(&Self::key(visitor_id, scope)) else {
            return Ok(None);
        };
        Ok(bucket.value().values().fold(None, |acc, entry| {
            BucketTimestamps::merge_opt(acc, BucketTimestamps::new(entry.created, entry.modified))
        }))
    }

    fn migrate_from(
        &self,
        source: &dyn TargetingStorage,
        visitor: &VisitorInfo,
        scope: &str,
    ) -> StorageResult<()> {
        let visitor_id = require_visitor(visitor, "migration")?;
        // Read the source before locking: it may be this very storage.
        let Some(snapshot) = MigrationSnapshot::collect(source, visitor, scope)? else {
            debug!(visitor_id = visitor_id, scope = scope, "Nothing to migrate");
            return Ok(());
        };

        // The entry guard holds the shard lock until every row is written.
        let mut bucket = self.buckets.entry(Self::key(visitor_id, scope)).or_default();
        let entries = snapshot.entries.len();
        for (name, value) in snapshot.entries {
            upsert(bucket.value_mut(), &name, value, snapshot.timestamps);
        }
        upsert(bucket.value_mut(), META_KEY, Value::Null.to_string(), snapshot.timestamps);
        drop(bucket);

        metrics::counter!("storage.migration", "backend" => "session").increment(1);
        info!(
            visitor_id = visitor_id,
            scope = scope,
            entries = entries,
            source = %source.backend(),
            "Migrated targeting storage"
        );
        Ok(())
    }
}
