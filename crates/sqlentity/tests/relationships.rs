//! Lazy and eager relationship loading through a session.

mod common;

use common::{Member, Node, Team, database, registry, registry_with, session};
use sqlentity::prelude::*;
use sqlentity::FetchMode;

fn seed_teams(db: &common::FakeDb) {
    db.seed("teams", &[("id", Value::BigInt(1)), ("name", Value::Text("core".into()))]);
    db.seed("teams", &[("id", Value::BigInt(2)), ("name", Value::Text("ops".into()))]);
    db.seed(
        "members",
        &[
            ("id", Value::BigInt(1)),
            ("name", Value::Text("ann".into())),
            ("team_id", Value::BigInt(1)),
        ],
    );
    db.seed(
        "members",
        &[
            ("id", Value::BigInt(2)),
            ("name", Value::Text("bo".into())),
            ("team_id", Value::BigInt(1)),
        ],
    );
    db.seed(
        "members",
        &[
            ("id", Value::BigInt(3)),
            ("name", Value::Text("cy".into())),
            ("team_id", Value::BigInt(2)),
        ],
    );
    db.seed(
        "members",
        &[
            ("id", Value::BigInt(4)),
            ("name", Value::Text("dee".into())),
            ("team_id", Value::Null),
        ],
    );
}

#[test]
fn lazy_to_one_is_realized_once() {
    let db = database();
    seed_teams(&db);
    let registry = registry();
    let mut session = session(&db, &registry);

    let member = session.find::<Member>(1_i64).unwrap().unwrap();
    let team = member.read().unwrap().team.clone();
    assert!(!team.is_loaded());
    assert_eq!(team.fk(), Some(&Value::BigInt(1)));
    assert_eq!(team.owner().map(ToString::to_string).as_deref(), Some("Member#1"));
    assert_eq!(session.lazy_handles_created(), 1);
    assert_eq!(db.count("SELECT"), 1);

    let loaded = team.get(&mut session).unwrap().unwrap();
    assert_eq!(loaded.read().unwrap().name, "core");
    assert_eq!(db.count("SELECT"), 2);

    let again = team.get(&mut session).unwrap().unwrap();
    assert!(again.ptr_eq(&loaded));
    assert_eq!(db.count("SELECT"), 2);

    // The handle inside the entity shares the realized value.
    assert!(member.read().unwrap().team.is_loaded());
    let cached = session.find::<Team>(1_i64).unwrap().unwrap();
    assert!(cached.ptr_eq(&loaded));
    assert_eq!(db.count("SELECT"), 2);
}

#[test]
fn lazy_to_one_uses_identity_map() {
    let db = database();
    seed_teams(&db);
    let registry = registry();
    let mut session = session(&db, &registry);

    let team = session.find::<Team>(1_i64).unwrap().unwrap();
    let member = session.find::<Member>(2_i64).unwrap().unwrap();
    let handle = member.read().unwrap().team.clone();
    let resolved = handle.get(&mut session).unwrap().unwrap();
    assert!(resolved.ptr_eq(&team));
    assert_eq!(db.count("SELECT"), 2);
}

#[test]
fn null_foreign_key_resolves_to_none_without_sql() {
    let db = database();
    seed_teams(&db);
    let registry = registry();
    let mut session = session(&db, &registry);

    let member = session.find::<Member>(4_i64).unwrap().unwrap();
    let handle = member.read().unwrap().team.clone();
    assert!(handle.get(&mut session).unwrap().is_none());
    assert!(handle.is_loaded());
    assert_eq!(db.count("SELECT"), 1);
}

#[test]
fn lazy_to_many_filters_by_inverse_key() {
    let db = database();
    seed_teams(&db);
    let registry = registry();
    let mut session = session(&db, &registry);

    let team = session.find::<Team>(1_i64).unwrap().unwrap();
    let members = team.read().unwrap().members.clone();
    assert!(!members.is_loaded());
    db.clear_log();

    let names: Vec<String> = members
        .get(&mut session)
        .unwrap()
        .iter()
        .map(|m| m.read().unwrap().name.clone())
        .collect();
    assert_eq!(names, vec!["ann", "bo"]);
    assert_eq!(
        db.log(),
        vec![r#"SELECT "id", "name", "team_id" FROM "members" WHERE "team_id" = $1 ORDER BY "id""#.to_string()]
    );

    assert_eq!(members.len(&mut session).unwrap(), 2);
    assert_eq!(db.log().len(), 1);

    let first = session.find::<Member>(1_i64).unwrap().unwrap();
    assert!(members.contains(&mut session, &first).unwrap());
    assert_eq!(db.log().len(), 1);
}

#[test]
fn to_many_reuses_already_loaded_elements() {
    let db = database();
    seed_teams(&db);
    let registry = registry();
    let mut session = session(&db, &registry);

    let bo = session.find::<Member>(2_i64).unwrap().unwrap();
    let team = session.find::<Team>(1_i64).unwrap().unwrap();
    let members = team.read().unwrap().members.clone();
    let list = members.get(&mut session).unwrap();
    assert!(list[1].ptr_eq(&bo));
}

#[test]
fn eager_to_one_is_loaded_with_owner() {
    let db = database();
    seed_teams(&db);
    let registry = registry_with(true, false);
    assert_eq!(
        registry.describe::<Member>().unwrap().meta().field("team").unwrap().fetch,
        FetchMode::Eager
    );
    let mut session = session(&db, &registry);

    let member = session.find::<Member>(3_i64).unwrap().unwrap();
    assert_eq!(db.count("SELECT"), 2);
    let team = member.read().unwrap().team.peek().unwrap().unwrap();
    assert_eq!(team.read().unwrap().name, "ops");

    let cached = session.find::<Team>(2_i64).unwrap().unwrap();
    assert!(cached.ptr_eq(&team));
    assert_eq!(db.count("SELECT"), 2);
}

#[test]
fn eager_to_one_shares_target_between_owners() {
    let db = database();
    seed_teams(&db);
    let registry = registry_with(true, false);
    let mut session = session(&db, &registry);

    let ann = session.find::<Member>(1_i64).unwrap().unwrap();
    let bo = session.find::<Member>(2_i64).unwrap().unwrap();
    let a = ann.read().unwrap().team.peek().unwrap().unwrap();
    let b = bo.read().unwrap().team.peek().unwrap().unwrap();
    assert!(a.ptr_eq(&b));
    // member 1, team 1, member 2
    assert_eq!(db.count("SELECT"), 3);
}

#[test]
fn eager_collection_is_loaded_after_owner() {
    let db = database();
    seed_teams(&db);
    let registry = registry_with(false, true);
    let mut session = session(&db, &registry);

    let team = session.find::<Team>(1_i64).unwrap().unwrap();
    let members = team.read().unwrap().members.clone();
    assert!(members.is_loaded());
    assert_eq!(members.peek().unwrap().len(), 2);
    assert_eq!(db.count("SELECT"), 2);

    // The elements' lazy back-reference finds the owner in the identity map.
    let ann = members.peek().unwrap()[0].clone();
    let back = ann.read().unwrap().team.clone();
    let owner = back.get(&mut session).unwrap().unwrap();
    assert!(owner.ptr_eq(&team));
    assert_eq!(db.count("SELECT"), 2);
}

#[test]
fn eager_chain_loads_every_link() {
    let db = database();
    db.seed(
        "nodes",
        &[
            ("id", Value::BigInt(4)),
            ("label", Value::Text("a".into())),
            ("next_id", Value::BigInt(5)),
        ],
    );
    db.seed(
        "nodes",
        &[
            ("id", Value::BigInt(5)),
            ("label", Value::Text("b".into())),
            ("next_id", Value::Null),
        ],
    );
    let registry = registry();
    let mut session = session(&db, &registry);

    let head = session.find::<Node>(4_i64).unwrap().unwrap();
    let second = head.read().unwrap().next.peek().unwrap().unwrap();
    assert_eq!(second.read().unwrap().label, "b");
    assert!(second.read().unwrap().next.peek().unwrap().is_none());
    assert!(session.contains::<Node>(5_i64));
}

#[test]
fn eager_cycle_resolves_to_the_same_instances() {
    let db = database();
    db.seed(
        "nodes",
        &[
            ("id", Value::BigInt(1)),
            ("label", Value::Text("a".into())),
            ("next_id", Value::BigInt(2)),
        ],
    );
    db.seed(
        "nodes",
        &[
            ("id", Value::BigInt(2)),
            ("label", Value::Text("b".into())),
            ("next_id", Value::BigInt(1)),
        ],
    );
    let registry = registry();
    let mut session = session(&db, &registry);

    let first = session.find::<Node>(1_i64).unwrap().unwrap();
    let second = first.read().unwrap().next.peek().unwrap().unwrap();
    assert_eq!(second.read().unwrap().label, "b");
    let back = second.read().unwrap().next.peek().unwrap().unwrap();
    assert!(back.ptr_eq(&first));
    assert_eq!(db.count("SELECT"), 2);
    assert!(!session.is_modified().unwrap());
}

#[test]
fn self_referencing_eager_to_one() {
    let db = database();
    db.seed(
        "nodes",
        &[
            ("id", Value::BigInt(3)),
            ("label", Value::Text("loop".into())),
            ("next_id", Value::BigInt(3)),
        ],
    );
    let registry = registry();
    let mut session = session(&db, &registry);

    let node = session.find::<Node>(3_i64).unwrap().unwrap();
    let next = node.read().unwrap().next.peek().unwrap().unwrap();
    assert!(next.ptr_eq(&node));
    assert_eq!(db.count("SELECT"), 1);
}

#[test]
fn eager_in_both_directions_from_the_owning_side() {
    let db = database();
    seed_teams(&db);
    let registry = registry_with(true, true);
    let mut session = session(&db, &registry);

    let ann = session.find::<Member>(1_i64).unwrap().unwrap();
    let team = ann.read().unwrap().team.peek().unwrap().unwrap();
    assert_eq!(team.read().unwrap().name, "core");

    let members = team.read().unwrap().members.clone();
    let members = members.peek().unwrap();
    assert_eq!(members.len(), 2);
    assert!(members[0].ptr_eq(&ann));
    let bo_team = members[1].read().unwrap().team.peek().unwrap().unwrap();
    assert!(bo_team.ptr_eq(&team));

    // member 1, team 1, members of team 1
    assert_eq!(db.count("SELECT"), 3);
    assert!(!session.is_modified().unwrap());
}

#[test]
fn eager_in_both_directions_from_the_collection_side() {
    let db = database();
    seed_teams(&db);
    let registry = registry_with(true, true);
    let mut session = session(&db, &registry);

    let team = session.find::<Team>(1_i64).unwrap().unwrap();
    let members = team.read().unwrap().members.clone();
    let members = members.peek().unwrap();
    assert_eq!(members.len(), 2);
    for member in members {
        let owner = member.read().unwrap().team.peek().unwrap().unwrap();
        assert!(owner.ptr_eq(&team));
    }
    assert_eq!(db.count("SELECT"), 2);
}

#[test]
fn to_one_pointing_at_removed_entity_resolves_to_none() {
    let db = database();
    seed_teams(&db);
    let registry = registry();
    let mut session = session(&db, &registry);

    let team = session.find::<Team>(1_i64).unwrap().unwrap();
    session.remove(&team).unwrap();
    let member = session.find::<Member>(1_i64).unwrap().unwrap();
    let handle = member.read().unwrap().team.clone();
    assert!(handle.get(&mut session).unwrap().is_none());
    assert_eq!(db.count("SELECT"), 2);
    // The foreign key is left as loaded.
    assert_eq!(session.flush().unwrap().updated, 0);
    assert_eq!(db.value("members", 1, "team_id"), Some(Value::BigInt(1)));
}

#[test]
fn lazy_loading_disabled_keeps_plain_handles() {
    let db = database();
    seed_teams(&db);
    let mut session = Session::with_config(
        db.connect(),
        registry(),
        SessionConfig::new().lazy_loading(false),
    );

    let member = session.find::<Member>(1_i64).unwrap().unwrap();
    let team = member.read().unwrap().team.clone();
    assert!(!team.is_loaded());
    assert!(team.owner().is_none());
    assert_eq!(session.lazy_handles_created(), 0);
    assert_eq!(team.get(&mut session).unwrap().unwrap().read().unwrap().name, "core");
}

#[test]
fn new_relationship_binds_target_id_at_flush() {
    let db = database();
    let registry = registry();
    let mut session = session(&db, &registry);

    let team = session
        .persist(Team {
            id: None,
            name: "core".into(),
            members: ToMany::default(),
        })
        .unwrap();
    session
        .persist(Member {
            id: None,
            name: "ann".into(),
            team: ToOne::new(team.clone()),
        })
        .unwrap();
    session.flush().unwrap();

    assert_eq!(db.value("members", 1, "team_id"), Some(Value::BigInt(1)));
    assert_eq!(db.value("teams", 1, "name"), Some(Value::Text("core".into())));
}

#[test]
fn reassigning_to_one_marks_owner_dirty() {
    let db = database();
    seed_teams(&db);
    let registry = registry();
    let mut session = session(&db, &registry);

    let member = session.find::<Member>(1_i64).unwrap().unwrap();
    let ops = session.find::<Team>(2_i64).unwrap().unwrap();
    member.write().unwrap().team = ToOne::new(ops);
    assert!(session.is_modified().unwrap());

    db.clear_log();
    session.flush().unwrap();
    assert_eq!(
        db.log(),
        vec![r#"UPDATE "members" SET "name" = $1, "team_id" = $2 WHERE "id" = $3"#.to_string()]
    );
    assert_eq!(db.value("members", 1, "team_id"), Some(Value::BigInt(2)));
}

#[test]
fn realizing_a_handle_does_not_make_owner_dirty() {
    let db = database();
    seed_teams(&db);
    let registry = registry();
    let mut session = session(&db, &registry);

    let member = session.find::<Member>(1_i64).unwrap().unwrap();
    let handle = member.read().unwrap().team.clone();
    handle.get(&mut session).unwrap();
    assert!(!session.is_modified().unwrap());
}

#[test]
fn debug_output_does_not_realize() {
    let db = database();
    seed_teams(&db);
    let registry = registry();
    let mut session = session(&db, &registry);

    let member = session.find::<Member>(1_i64).unwrap().unwrap();
    let text = format!("{:?}", member.read().unwrap());
    assert!(text.contains("ann"));
    assert!(!member.read().unwrap().team.is_loaded());
    assert_eq!(db.count("SELECT"), 1);
}
