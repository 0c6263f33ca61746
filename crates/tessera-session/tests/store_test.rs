//! Integration tests for the file and SQLite stores.

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;

use serde_json::json;
use tessera_session::{
    AttributeValue, FileStore, ManagerConfig, Session, SessionData, SessionEvent, SqliteConfig,
    SqliteStore, Store,
};

use common::{Spy, manager};

fn marked(id: &str, mark: char) -> Session {
    let data = SessionData::new(id, 0, 60)
        .with_attribute("marker", json!(mark.to_string()))
        .with_attribute("payload", json!(mark.to_string().repeat(64 * 1024)));
    Session::from_data(data)
}

fn text(session: &Session, name: &str) -> String {
    session
        .attribute(name)
        .unwrap()
        .and_then(|v| v.as_value().and_then(|v| v.as_str().map(str::to_string)))
        .unwrap()
}

#[test]
fn test_round_trip_drops_live_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    let (_clock, events, manager) = manager(ManagerConfig::default());

    let session = manager.create_session(None).unwrap();
    let spy = Arc::new(Spy::default());
    session.set_attribute("user", "ann").unwrap();
    session
        .set_attribute("cart", json!({"items": [1, 2, 3], "total": 9.5}))
        .unwrap();
    session
        .set_attribute("spy", AttributeValue::Object(spy.clone()))
        .unwrap();

    store.save(&session).unwrap();
    assert_eq!(spy.unbound(), 1);
    assert_eq!(
        events.count(&SessionEvent::AttributeRemoved {
            name: "spy".to_string()
        }),
        1
    );

    let loaded = store.load(&session.id()).unwrap().unwrap();
    assert_eq!(loaded.id(), session.id());
    assert_eq!(loaded.creation_time(), session.creation_time());
    assert_eq!(loaded.last_accessed_time(), session.last_accessed_time());
    assert_eq!(loaded.this_accessed_time(), session.this_accessed_time());
    assert_eq!(loaded.max_inactive_interval(), session.max_inactive_interval());

    let mut names = loaded.attribute_names().unwrap();
    names.sort();
    assert_eq!(names, vec!["cart", "user"]);
    assert_eq!(text(&loaded, "user"), "ann");
    assert_eq!(
        loaded.attribute("cart").unwrap().unwrap().as_value(),
        Some(&json!({"items": [1, 2, 3], "total": 9.5}))
    );
}

#[test]
fn test_concurrent_access_to_one_id_never_sees_partial_writes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    store.save(&marked("SAME", 'a')).unwrap();

    let mut handles = Vec::new();
    for mark in ['b', 'c', 'd', 'e'] {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for _ in 0..25 {
                store.save(&marked("SAME", mark)).unwrap();
            }
        }));
    }
    for _ in 0..4 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                if let Some(session) = store.load("SAME").unwrap() {
                    let mark = text(&session, "marker");
                    let payload = text(&session, "payload");
                    assert_eq!(payload.len(), 64 * 1024);
                    assert!(payload.chars().all(|c| c.to_string() == mark));
                }
            }
        }));
    }
    {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for _ in 0..10 {
                store.remove("SAME").unwrap();
                thread::yield_now();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_distinct_ids_progress_in_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let id = format!("ID{i}");
                for _ in 0..20 {
                    store.save(&marked(&id, 'x')).unwrap();
                    assert!(store.load(&id).unwrap().is_some());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.size().unwrap(), 8);
}

#[test]
fn test_path_traversal_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("store");
    let store = Arc::new(FileStore::open(&root).unwrap());
    let victim = dir.path().join("victim.session");
    fs::write(&victim, b"do not touch").unwrap();

    let (_clock, _events, manager) = common::manager_with_store(
        ManagerConfig::default(),
        Some(store.clone() as Arc<dyn Store>),
    );

    assert!(manager.find_session("../victim").unwrap().is_none());
    assert!(store.load("../victim").unwrap().is_none());
    store.remove("../victim").unwrap();
    store.save(&marked("../victim", 'z')).unwrap();

    assert_eq!(fs::read(&victim).unwrap(), b"do not touch");
    assert!(store.keys(false).unwrap().is_empty());
}

#[test]
fn test_sqlite_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store =
        SqliteStore::open(SqliteConfig::new(dir.path().join("sessions.db")).with_app_name("shop"))
            .unwrap();

    store.save(&marked("S1", 'q')).unwrap();
    let loaded = store.load("S1").unwrap().unwrap();
    assert_eq!(text(&loaded, "marker"), "q");
    assert_eq!(store.keys(false).unwrap(), vec!["S1".to_string()]);

    store.clear().unwrap();
    assert_eq!(store.size().unwrap(), 0);
}
