//! Shared fixtures for the end-to-end tests: a small in-memory database that
//! understands the statements `AnsiStatements` produces, and a few mapped
//! entity types.

#![allow(dead_code)]

use regex::Regex;
use sqlentity::prelude::*;
use sqlentity::SqlExecutionError;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

static INSERT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^INSERT INTO "(\w+)" \((.*)\) VALUES \((.*)\)$"#).unwrap());
static INSERT_DEFAULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^INSERT INTO "(\w+)" DEFAULT VALUES$"#).unwrap());
static SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^SELECT (.*) FROM "(\w+)" WHERE "(\w+)" = \$1(?: ORDER BY "(\w+)")?$"#).unwrap()
});
static UPDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^UPDATE "(\w+)" SET (.*) WHERE "(\w+)" = \$(\d+)$"#).unwrap());
static DELETE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^DELETE FROM "(\w+)" WHERE "(\w+)" = \$1$"#).unwrap());
static IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""(\w+)""#).unwrap());
static ASSIGN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""(\w+)" = \$(\d+)"#).unwrap());

type Record = HashMap<String, Value>;

#[derive(Debug, Clone)]
struct Table {
    id_column: String,
    rows: Vec<Record>,
    next_id: i64,
}

#[derive(Debug, Default)]
struct DbState {
    tables: HashMap<String, Table>,
    /// Committed state to return to on rollback, while auto-commit is off.
    backup: Option<HashMap<String, Table>>,
    auto_commit: bool,
    log: Vec<String>,
    fail_on: Option<String>,
    commits: usize,
    rollbacks: usize,
}

/// Handle to a shared in-memory database. Clones see the same data.
#[derive(Debug, Clone)]
pub struct FakeDb {
    state: Arc<Mutex<DbState>>,
}

impl Default for FakeDb {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDb {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DbState {
                auto_commit: true,
                ..DbState::default()
            })),
        }
    }

    pub fn create_table(&self, name: &str, id_column: &str) -> &Self {
        self.state.lock().unwrap().tables.insert(
            name.to_string(),
            Table {
                id_column: id_column.to_string(),
                rows: Vec::new(),
                next_id: 1,
            },
        );
        self
    }

    /// Insert a row directly, bypassing the log.
    pub fn seed(&self, table: &str, values: &[(&str, Value)]) {
        let mut state = self.state.lock().unwrap();
        let table = state.tables.get_mut(table).expect("unknown table");
        let record: Record = values
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        if let Some(id) = record.get(&table.id_column).and_then(Value::as_i64) {
            table.next_id = table.next_id.max(id + 1);
        }
        table.rows.push(record);
    }

    pub fn connect(&self) -> FakeConnection {
        FakeConnection { db: self.clone() }
    }

    /// Every statement executed so far, in order.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    /// Number of logged statements starting with `verb`.
    pub fn count(&self, verb: &str) -> usize {
        self.log().iter().filter(|s| s.starts_with(verb)).count()
    }

    /// Make every statement containing `needle` fail.
    pub fn fail_on(&self, needle: &str) {
        self.state.lock().unwrap().fail_on = Some(needle.to_string());
    }

    pub fn clear_failure(&self) {
        self.state.lock().unwrap().fail_on = None;
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state.lock().unwrap().tables[table].rows.len()
    }

    pub fn value(&self, table: &str, id: i64, column: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        let table = &state.tables[table];
        table
            .rows
            .iter()
            .find(|r| r.get(&table.id_column).and_then(Value::as_i64) == Some(id))
            .and_then(|r| r.get(column).cloned())
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }

    pub fn auto_commit(&self) -> bool {
        self.state.lock().unwrap().auto_commit
    }
}

fn same(a: &Value, b: &Value) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) if !a.is_null() && !b.is_null() => x == y,
        _ => a == b,
    }
}

fn idents(list: &str) -> Vec<String> {
    IDENT
        .captures_iter(list)
        .map(|c| c[1].to_string())
        .collect()
}

fn sql_error(message: impl Into<String>) -> Error {
    Error::Sql(SqlExecutionError::new(message))
}

impl DbState {
    fn begin_statement(&mut self, sql: &str) -> Result<()> {
        self.log.push(sql.to_string());
        match &self.fail_on {
            Some(needle) if sql.contains(needle.as_str()) => Err(Error::Sql(
                SqlExecutionError::new("injected failure").with_sqlstate("23503"),
            )),
            _ => Ok(()),
        }
    }

    fn table(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| sql_error(format!("no such table: {}", name)))
    }
}

/// A [`Connection`] to a [`FakeDb`].
pub struct FakeConnection {
    db: FakeDb,
}

impl Connection for FakeConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.db.state.lock().unwrap();
        state.begin_statement(sql)?;
        let caps = SELECT
            .captures(sql)
            .ok_or_else(|| sql_error(format!("unsupported query: {}", sql)))?;
        let columns = idents(&caps[1]);
        let table = state.table(&caps[2])?;
        let filter = caps[3].to_string();
        let needle = params.first().cloned().unwrap_or(Value::Null);

        let mut matches: Vec<&Record> = table
            .rows
            .iter()
            .filter(|r| r.get(&filter).is_some_and(|v| same(v, &needle)))
            .collect();
        if let Some(order) = caps.get(4) {
            let order = order.as_str();
            matches.sort_by_key(|r| r.get(order).and_then(Value::as_i64));
        }
        Ok(matches
            .into_iter()
            .map(|r| {
                let values = columns
                    .iter()
                    .map(|c| r.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                Row::new(columns.clone(), values)
            })
            .collect())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut state = self.db.state.lock().unwrap();
        state.begin_statement(sql)?;
        if let Some(caps) = UPDATE.captures(sql) {
            let assignments: Vec<(String, usize)> = ASSIGN
                .captures_iter(&caps[2])
                .map(|c| (c[1].to_string(), c[2].parse::<usize>().unwrap()))
                .collect();
            let key_column = caps[3].to_string();
            let key = params[caps[4].parse::<usize>().unwrap() - 1].clone();
            let table = state.table(&caps[1])?;
            let mut affected = 0;
            for row in table
                .rows
                .iter_mut()
                .filter(|r| r.get(&key_column).is_some_and(|v| same(v, &key)))
            {
                for (column, index) in &assignments {
                    row.insert(column.clone(), params[index - 1].clone());
                }
                affected += 1;
            }
            return Ok(affected);
        }
        if let Some(caps) = DELETE.captures(sql) {
            let key_column = caps[2].to_string();
            let key = params.first().cloned().unwrap_or(Value::Null);
            let table = state.table(&caps[1])?;
            let before = table.rows.len();
            table
                .rows
                .retain(|r| !r.get(&key_column).is_some_and(|v| same(v, &key)));
            return Ok((before - table.rows.len()) as u64);
        }
        Err(sql_error(format!("unsupported statement: {}", sql)))
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        let mut state = self.db.state.lock().unwrap();
        state.begin_statement(sql)?;
        let (name, columns) = if let Some(caps) = INSERT.captures(sql) {
            (caps[1].to_string(), idents(&caps[2]))
        } else if let Some(caps) = INSERT_DEFAULT.captures(sql) {
            (caps[1].to_string(), Vec::new())
        } else {
            return Err(sql_error(format!("unsupported insert: {}", sql)));
        };

        let table = state.table(&name)?;
        let mut record: Record = columns.into_iter().zip(params.iter().cloned()).collect();
        let id = match record.get(&table.id_column).and_then(Value::as_i64) {
            Some(id) => id,
            None => {
                let id = table.next_id;
                record.insert(table.id_column.clone(), Value::BigInt(id));
                id
            }
        };
        if table
            .rows
            .iter()
            .any(|r| r.get(&table.id_column).and_then(Value::as_i64) == Some(id))
        {
            return Err(Error::Sql(
                SqlExecutionError::new("duplicate primary key").with_sqlstate("23505"),
            ));
        }
        table.next_id = table.next_id.max(id + 1);
        table.rows.push(record);
        Ok(Some(Value::BigInt(id)))
    }

    fn auto_commit(&self) -> bool {
        self.db.state.lock().unwrap().auto_commit
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        let mut state = self.db.state.lock().unwrap();
        state.auto_commit = enabled;
        state.backup = if enabled {
            None
        } else {
            Some(state.tables.clone())
        };
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let mut state = self.db.state.lock().unwrap();
        state.commits += 1;
        if !state.auto_commit {
            state.backup = Some(state.tables.clone());
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let mut state = self.db.state.lock().unwrap();
        state.rollbacks += 1;
        if let Some(backup) = state.backup.clone() {
            state.tables = backup;
        }
        Ok(())
    }
}

// ============================================================================
// Mapped entities
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Account {
    pub id: Option<i64>,
    pub balance: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
    pub members: ToMany<Member>,
}

#[derive(Debug, Clone, Default)]
pub struct Member {
    pub id: Option<i64>,
    pub name: String,
    pub team: ToOne<Team>,
}

/// A linked list node whose successor is loaded eagerly.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub id: Option<i64>,
    pub label: String,
    pub next: ToOne<Node>,
}

pub fn account_descriptor() -> EntityDescriptor<Account> {
    EntityDescriptor::builder("accounts", Account::default)
        .id("id", ValueType::BigInt, |a: &Account| a.id.into(), |a, v| {
            a.id = v.try_into()?;
            Ok(())
        })
        .generated()
        .column("balance", ValueType::BigInt, |a: &Account| a.balance.into(), |a, v| {
            a.balance = v.try_into()?;
            Ok(())
        })
        .build()
        .unwrap()
}

pub fn team_descriptor(eager_members: bool) -> EntityDescriptor<Team> {
    let builder = EntityDescriptor::builder("teams", Team::default)
        .id("id", ValueType::BigInt, |t: &Team| t.id.into(), |t, v| {
            t.id = v.try_into()?;
            Ok(())
        })
        .generated()
        .column("name", ValueType::Text, |t: &Team| t.name.as_str().into(), |t, v| {
            t.name = v.try_into()?;
            Ok(())
        })
        .to_many("members", "team", |t: &Team| &t.members, |t: &mut Team| &mut t.members);
    let builder = if eager_members { builder.eager() } else { builder };
    builder.build().unwrap()
}

pub fn member_descriptor(eager_team: bool) -> EntityDescriptor<Member> {
    let builder = EntityDescriptor::builder("members", Member::default)
        .id("id", ValueType::BigInt, |m: &Member| m.id.into(), |m, v| {
            m.id = v.try_into()?;
            Ok(())
        })
        .generated()
        .column("name", ValueType::Text, |m: &Member| m.name.as_str().into(), |m, v| {
            m.name = v.try_into()?;
            Ok(())
        })
        .to_one("team", |m: &Member| &m.team, |m: &mut Member| &mut m.team);
    let builder = if eager_team { builder.eager() } else { builder };
    builder.build().unwrap()
}

pub fn node_descriptor() -> EntityDescriptor<Node> {
    EntityDescriptor::builder("nodes", Node::default)
        .id("id", ValueType::BigInt, |n: &Node| n.id.into(), |n, v| {
            n.id = v.try_into()?;
            Ok(())
        })
        .column("label", ValueType::Text, |n: &Node| n.label.as_str().into(), |n, v| {
            n.label = v.try_into()?;
            Ok(())
        })
        .to_one("next", |n: &Node| &n.next, |n: &mut Node| &mut n.next)
        .eager()
        .build()
        .unwrap()
}

/// Accounts, teams and members with every relationship LAZY.
pub fn registry() -> Arc<EntityRegistry> {
    registry_with(false, false)
}

pub fn registry_with(eager_team: bool, eager_members: bool) -> Arc<EntityRegistry> {
    let registry = EntityRegistry::new()
        .with(account_descriptor())
        .with(team_descriptor(eager_members))
        .with(member_descriptor(eager_team))
        .with(node_descriptor());
    registry.validate().unwrap();
    Arc::new(registry)
}

/// A database with every fixture table created.
pub fn database() -> FakeDb {
    let db = FakeDb::new();
    db.create_table("accounts", "id")
        .create_table("teams", "id")
        .create_table("members", "id")
        .create_table("nodes", "id");
    db
}

pub fn session(db: &FakeDb, registry: &Arc<EntityRegistry>) -> Session<FakeConnection> {
    Session::new(db.connect(), Arc::clone(registry))
}
