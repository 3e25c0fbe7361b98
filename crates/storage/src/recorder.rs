//! Persists rule match results produced by the evaluator.

use serde_json::Value;
use targeting_core::{RuleMatch, VisitorInfo};
use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::storage::TargetingStorage;

/// Prefix of the entry names holding rule match results.
pub const RULE_ENTRY_PREFIX: &str = "rule:";

pub fn rule_entry_name(rule: &str) -> String {
    format!("{RULE_ENTRY_PREFIX}{rule}")
}

/// Write every match result held by the visitor into `scope`.
/// Returns the number of entries written; anonymous visits write nothing.
pub fn record_matches(
    storage: &dyn TargetingStorage,
    visitor: &VisitorInfo,
    scope: &str,
) -> StorageResult<usize> {
    if !visitor.is_identified() {
        debug!(scope = scope, "Anonymous visit, match results not persisted");
        return Ok(0);
    }
    let mut written = 0;
    for (rule, result) in visitor.match_results() {
        let value = serde_json::to_value(result)?;
        storage.set(visitor, scope, &rule_entry_name(rule), &value)?;
        written += 1;
    }
    Ok(written)
}

/// The last persisted result for `rule`, if any and still readable.
pub fn recorded_match(
    storage: &dyn TargetingStorage,
    visitor: &VisitorInfo,
    scope: &str,
    rule: &str,
) -> StorageResult<Option<RuleMatch>> {
    let stored = storage.get(visitor, scope, &rule_entry_name(rule), Value::Null)?;
    if stored.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(stored) {
        Ok(result) => Ok(Some(result)),
        Err(err) => {
            warn!(rule = rule, error = %err, "Stored rule match has an unexpected shape");
            Ok(None)
        }
    }
}
