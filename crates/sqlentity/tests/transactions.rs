//! Transaction state machine and commit/rollback against the in-memory
//! database.

mod common;

use common::{Account, database, registry, session};
use sqlentity::prelude::*;

#[test]
fn commit_writes_and_restores_auto_commit() {
    let db = database();
    let registry = registry();
    let mut session = session(&db, &registry);

    session.begin().unwrap();
    assert!(!db.auto_commit());
    let account = session
        .persist(Account {
            id: None,
            balance: 100,
        })
        .unwrap();
    let result = session.commit().unwrap();

    assert_eq!(result.inserted, 1);
    assert_eq!(account.read().unwrap().id, Some(1));
    assert_eq!(db.commits(), 1);
    assert!(db.auto_commit());
    assert_eq!(session.transaction_state(), TransactionState::Committed);

    // Entities stay managed after commit.
    let found = session.find::<Account>(1_i64).unwrap().unwrap();
    assert!(found.ptr_eq(&account));
}

#[test]
fn commit_without_begin_is_illegal() {
    let db = database();
    let registry = registry();
    let mut session = session(&db, &registry);

    session.persist(Account::default()).unwrap();
    let err = session.commit().unwrap_err();
    assert!(err.is_illegal_state());
    assert!(db.log().is_empty());
    assert_eq!(db.commits(), 0);
}

#[test]
fn rollback_without_begin_is_illegal() {
    let db = database();
    let registry = registry();
    let mut session = session(&db, &registry);
    assert!(session.rollback().unwrap_err().is_illegal_state());
    assert_eq!(db.rollbacks(), 0);
}

#[test]
fn begin_twice_is_illegal() {
    let db = database();
    let registry = registry();
    let mut session = session(&db, &registry);
    session.begin().unwrap();
    let err = session.begin().unwrap_err();
    assert_eq!(err.to_string(), "Illegal state: cannot begin in state ACTIVE");
}

#[test]
fn finished_transaction_is_replaced_on_begin() {
    let db = database();
    let registry = registry();
    let mut session = session(&db, &registry);

    session.begin().unwrap();
    session.rollback().unwrap();
    assert!(session.commit().unwrap_err().is_illegal_state());

    session.begin().unwrap();
    assert_eq!(session.transaction_state(), TransactionState::Active);
    session.commit().unwrap();
}

#[test]
fn rollback_discards_writes_and_tracking_but_not_field_values() {
    let db = database();
    let registry = registry();
    let mut session = session(&db, &registry);

    session.begin().unwrap();
    let account = session
        .persist(Account {
            id: None,
            balance: 10,
        })
        .unwrap();
    session.flush().unwrap();
    assert_eq!(db.row_count("accounts"), 1);
    account.write().unwrap().balance = 20;

    session.rollback().unwrap();
    assert_eq!(db.row_count("accounts"), 0);
    assert_eq!(db.rollbacks(), 1);
    assert!(db.auto_commit());
    assert_eq!(session.transaction_state(), TransactionState::RolledBack);

    let info = session.debug_state();
    assert_eq!(info.managed, 0);
    assert_eq!(info.pending_inserts, 0);
    // In-memory state is left as it was.
    let account = account.read().unwrap();
    assert_eq!(account.id, Some(1));
    assert_eq!(account.balance, 20);
}

#[test]
fn failed_commit_leaves_transaction_open_for_rollback() {
    let db = database();
    db.seed("accounts", &[("id", Value::BigInt(1)), ("balance", Value::BigInt(10))]);
    db.fail_on("DELETE");
    let registry = registry();
    let mut session = session(&db, &registry);

    session.begin().unwrap();
    let existing = session.find::<Account>(1_i64).unwrap().unwrap();
    session.remove(&existing).unwrap();
    session.persist(Account::default()).unwrap();

    let err = session.commit().unwrap_err();
    assert!(err.is_sql());
    assert_eq!(err.sqlstate(), Some("23503"));
    assert_eq!(err.sql(), Some(r#"DELETE FROM "accounts" WHERE "id" = $1"#));
    assert_eq!(session.transaction_state(), TransactionState::Active);
    assert_eq!(db.commits(), 0);
    // The INSERT ran before the failing DELETE and is still uncommitted.
    assert_eq!(db.row_count("accounts"), 2);

    session.rollback().unwrap();
    assert_eq!(db.row_count("accounts"), 1);
    assert_eq!(session.transaction_state(), TransactionState::RolledBack);
}

#[test]
fn flush_outside_transaction_writes_immediately() {
    let db = database();
    let registry = registry();
    let mut session = session(&db, &registry);

    session.persist(Account::default()).unwrap();
    session.flush().unwrap();
    assert_eq!(db.row_count("accounts"), 1);
    assert_eq!(session.transaction_state(), TransactionState::Inactive);
}

#[test]
fn session_config_from_json() {
    let config = SessionConfig::from_json(r#"{"lazy_loading": false, "statement_cache_size": 0}"#)
        .unwrap();
    assert!(!config.lazy_loading);
    assert_eq!(config.statement_cache_size, 0);

    let db = database();
    let mut session = Session::with_config(db.connect(), registry(), config);
    session.persist(Account::default()).unwrap();
    session.flush().unwrap();
    session.persist(Account::default()).unwrap();
    session.flush().unwrap();
    assert_eq!(db.count("INSERT"), 2);

    let err = SessionConfig::from_json("{\"lazy_loading\": \"yes\"}").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
