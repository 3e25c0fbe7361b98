//! Behavior every storage backend must share, plus migration between them.

use serde_json::{json, Value};
use std::thread::sleep;
use std::time::Duration;
use targeting_core::VisitorInfo;
use targeting_storage::{SessionStorage, SqliteStorage, StorageError, TargetingStorage, META_KEY};

fn backends() -> Vec<Box<dyn TargetingStorage>> {
    vec![
        Box::new(SessionStorage::new()),
        Box::new(SqliteStorage::in_memory("targeting_storage").unwrap()),
    ]
}

fn visitor(id: &str) -> VisitorInfo {
    VisitorInfo::anonymous().with_visitor_id(id)
}

#[test]
fn test_round_trip_including_falsy_values() {
    let values = [
        json!(0),
        json!(false),
        json!(""),
        json!(null),
        json!([]),
        json!({"nested": {"list": [1, "two", 3.5]}}),
    ];
    for storage in backends() {
        let v = visitor("v-1");
        for (i, value) in values.iter().enumerate() {
            let name = format!("entry_{i}");
            storage.set(&v, "session", &name, value).unwrap();
            assert_eq!(
                storage.get(&v, "session", &name, json!("default")).unwrap(),
                *value,
                "{} backend lost {value}",
                storage.backend()
            );
            assert!(storage.has(&v, "session", &name).unwrap());
        }
        assert_eq!(storage.all(&v, "session").unwrap().len(), values.len());
    }
}

#[test]
fn test_anonymous_visitor_reads_defaults_and_drops_writes() {
    for storage in backends() {
        let anonymous = VisitorInfo::anonymous();
        storage.set(&anonymous, "session", "cart", &json!(3)).unwrap();

        assert_eq!(
            storage.get(&anonymous, "session", "cart", json!("none")).unwrap(),
            json!("none")
        );
        assert!(!storage.has(&anonymous, "session", "cart").unwrap());
        assert!(storage.all(&anonymous, "session").unwrap().is_empty());
        assert!(storage.created_at(&anonymous, "session").unwrap().is_none());
        storage.clear(&anonymous, None).unwrap();
    }
}

#[test]
fn test_missing_entry_returns_default() {
    for storage in backends() {
        let v = visitor("v-1");
        assert_eq!(
            storage.get(&v, "session", "absent", json!({"d": 1})).unwrap(),
            json!({"d": 1})
        );
        assert!(!storage.has(&v, "session", "absent").unwrap());
    }
}

#[test]
fn test_scopes_and_visitors_are_isolated() {
    for storage in backends() {
        let alice = visitor("alice");
        let bob = visitor("bob");
        storage.set(&alice, "session", "k", &json!("a-session")).unwrap();
        storage.set(&alice, "persistent", "k", &json!("a-persistent")).unwrap();
        storage.set(&bob, "session", "k", &json!("b-session")).unwrap();

        assert_eq!(storage.get(&alice, "session", "k", Value::Null).unwrap(), json!("a-session"));
        assert_eq!(
            storage.get(&alice, "persistent", "k", Value::Null).unwrap(),
            json!("a-persistent")
        );
        assert_eq!(storage.get(&bob, "session", "k", Value::Null).unwrap(), json!("b-session"));
        assert!(storage.all(&bob, "persistent").unwrap().is_empty());
    }
}

#[test]
fn test_clear_one_scope() {
    for storage in backends() {
        let v = visitor("v-1");
        storage.set(&v, "session", "a", &json!(1)).unwrap();
        storage.set(&v, "persistent", "b", &json!(2)).unwrap();

        storage.clear(&v, Some("session")).unwrap();

        assert!(storage.all(&v, "session").unwrap().is_empty());
        assert!(storage.created_at(&v, "session").unwrap().is_none());
        assert_eq!(storage.all(&v, "persistent").unwrap().len(), 1);
    }
}

#[test]
fn test_clear_all_scopes_of_one_visitor() {
    for storage in backends() {
        let v = visitor("v-1");
        let other = visitor("v-2");
        for scope in ["session", "persistent", "experiments"] {
            storage.set(&v, scope, "x", &json!(scope)).unwrap();
        }
        storage.set(&other, "session", "x", &json!("kept")).unwrap();

        storage.clear(&v, None).unwrap();

        for scope in ["session", "persistent", "experiments"] {
            assert!(storage.all(&v, scope).unwrap().is_empty(), "{scope} not cleared");
        }
        assert_eq!(storage.all(&other, "session").unwrap().len(), 1);
    }
}

#[test]
fn test_reserved_name_is_rejected() {
    for storage in backends() {
        let err = storage
            .set(&visitor("v-1"), "session", META_KEY, &json!(1))
            .unwrap_err();
        assert!(matches!(err, StorageError::ReservedName(_)));
    }
}

#[test]
fn test_timestamps_track_min_created_and_max_updated() {
    for storage in backends() {
        let v = visitor("v-1");
        assert!(storage.created_at(&v, "s").unwrap().is_none());

        storage.set(&v, "s", "first", &json!(1)).unwrap();
        let created = storage.created_at(&v, "s").unwrap().unwrap();
        sleep(Duration::from_millis(2));
        storage.set(&v, "s", "second", &json!(2)).unwrap();

        assert_eq!(storage.created_at(&v, "s").unwrap(), Some(created));
        assert!(storage.updated_at(&v, "s").unwrap().unwrap() > created);
    }
}

#[test]
fn test_migration_preserves_source_timestamps() {
    for destination in backends() {
        let v = visitor("v-1");
        let source = SessionStorage::new();
        source.set(&v, "session", "platform", &json!("mobile")).unwrap();
        sleep(Duration::from_millis(2));
        source.set(&v, "session", "visits", &json!(3)).unwrap();
        let source_created = source.created_at(&v, "session").unwrap().unwrap();
        let source_updated = source.updated_at(&v, "session").unwrap().unwrap();

        sleep(Duration::from_millis(2));
        destination.migrate_from(&source, &v, "session").unwrap();

        assert_eq!(destination.all(&v, "session").unwrap(), source.all(&v, "session").unwrap());
        assert_eq!(destination.created_at(&v, "session").unwrap(), Some(source_created));
        assert_eq!(destination.updated_at(&v, "session").unwrap(), Some(source_updated));
        assert!(!destination.has(&v, "session", META_KEY).unwrap());
    }
}

#[test]
fn test_migration_is_idempotent() {
    for destination in backends() {
        let v = visitor("v-1");
        let source = SessionStorage::new();
        source.set(&v, "session", "a", &json!({"x": 1})).unwrap();

        destination.migrate_from(&source, &v, "session").unwrap();
        let first_entries = destination.all(&v, "session").unwrap();
        let first_created = destination.created_at(&v, "session").unwrap();

        sleep(Duration::from_millis(2));
        destination.migrate_from(&source, &v, "session").unwrap();

        assert_eq!(destination.all(&v, "session").unwrap(), first_entries);
        assert_eq!(destination.created_at(&v, "session").unwrap(), first_created);
        assert_eq!(
            destination.updated_at(&v, "session").unwrap(),
            source.updated_at(&v, "session").unwrap()
        );

        // A later write on the source moves updated_at forward, never created_at.
        sleep(Duration::from_millis(2));
        source.set(&v, "session", "b", &json!(false)).unwrap();
        destination.migrate_from(&source, &v, "session").unwrap();

        assert_eq!(destination.created_at(&v, "session").unwrap(), first_created);
        assert_eq!(
            destination.updated_at(&v, "session").unwrap(),
            source.updated_at(&v, "session").unwrap()
        );
        assert_eq!(destination.get(&v, "session", "b", json!("d")).unwrap(), json!(false));
    }
}

#[test]
fn test_older_migration_never_moves_updated_at_back() {
    for destination in backends() {
        let v = visitor("v-1");
        let older = SessionStorage::new();
        older.set(&v, "session", "a", &json!("old")).unwrap();
        sleep(Duration::from_millis(2));
        let newer = SessionStorage::new();
        newer.set(&v, "session", "a", &json!("new")).unwrap();

        destination.migrate_from(&newer, &v, "session").unwrap();
        let after_newer = destination.updated_at(&v, "session").unwrap().unwrap();

        destination.migrate_from(&older, &v, "session").unwrap();
        let after_older = destination.updated_at(&v, "session").unwrap().unwrap();

        assert!(
            after_older >= after_newer,
            "{} backend moved updated_at back",
            destination.backend()
        );
        assert_eq!(after_older, newer.updated_at(&v, "session").unwrap().unwrap());
        assert_eq!(
            destination.created_at(&v, "session").unwrap(),
            older.created_at(&v, "session").unwrap()
        );
    }
}

#[test]
fn test_remove_keeps_migrated_bucket_timestamps() {
    for destination in backends() {
        let v = visitor("v-1");
        let source = SessionStorage::new();
        source.set(&v, "session", "only", &json!(1)).unwrap();
        destination.migrate_from(&source, &v, "session").unwrap();
        let before = destination.timestamps(&v, "session").unwrap().unwrap();

        sleep(Duration::from_millis(2));
        destination.remove(&v, "session", "only").unwrap();

        assert!(!destination.has(&v, "session", "only").unwrap());
        assert!(destination.all(&v, "session").unwrap().is_empty());
        let after = destination.timestamps(&v, "session").unwrap().unwrap();
        assert_eq!(after.created, before.created, "{} backend", destination.backend());
        assert!(after.updated >= before.updated, "{} backend", destination.backend());

        // Removing a missing entry or the reserved name changes nothing.
        destination.remove(&v, "session", "ghost").unwrap();
        assert!(matches!(
            destination.remove(&v, "session", META_KEY),
            Err(StorageError::ReservedName(_))
        ));
        assert_eq!(destination.timestamps(&v, "session").unwrap(), Some(after));
    }
}

#[test]
fn test_migration_only_touches_requested_scope() {
    for destination in backends() {
        let v = visitor("v-1");
        let source = SessionStorage::new();
        source.set(&v, "session", "a", &json!(1)).unwrap();
        source.set(&v, "persistent", "b", &json!(2)).unwrap();

        destination.migrate_from(&source, &v, "session").unwrap();

        assert_eq!(destination.all(&v, "session").unwrap().len(), 1);
        assert!(destination.all(&v, "persistent").unwrap().is_empty());
    }
}

#[test]
fn test_migration_from_empty_source_is_a_no_op() {
    for destination in backends() {
        let v = visitor("v-1");
        destination
            .migrate_from(&SessionStorage::new(), &v, "session")
            .unwrap();
        assert!(destination.created_at(&v, "session").unwrap().is_none());
    }
}

#[test]
fn test_migration_without_visitor_id_fails() {
    for destination in backends() {
        let source = SessionStorage::new();
        source.set(&visitor("v-1"), "session", "a", &json!(1)).unwrap();

        let err = destination
            .migrate_from(&source, &VisitorInfo::anonymous(), "session")
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingVisitorId { .. }));
        assert!(destination.all(&visitor("v-1"), "session").unwrap().is_empty());
    }
}

#[test]
fn test_sqlite_to_session_migration() {
    let v = visitor("v-1");
    let source = SqliteStorage::in_memory("targeting_storage").unwrap();
    source.set(&v, "persistent", "segment", &json!("vip")).unwrap();

    let destination = SessionStorage::new();
    destination.migrate_from(&source, &v, "persistent").unwrap();

    assert_eq!(
        destination.get(&v, "persistent", "segment", Value::Null).unwrap(),
        json!("vip")
    );
    assert_eq!(
        destination.created_at(&v, "persistent").unwrap(),
        source.created_at(&v, "persistent").unwrap()
    );
}
