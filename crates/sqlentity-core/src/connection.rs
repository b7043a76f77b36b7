//! Database connection trait.
//!
//! The runtime consumes a blocking request/response execution primitive:
//! parameterized statements, generated-key retrieval and explicit
//! auto-commit control. Pooling and bootstrapping live outside this crate.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// A blocking database connection.
///
/// Statement execution takes `&self` so that several collaborators can
/// share one connection during a flush; drivers use interior mutability
/// where they need it. Transaction control takes `&mut self`.
///
/// A connection is owned by a single unit of work and is not shared
/// across threads while in use, hence `Send` but not `Sync`.
pub trait Connection: Send {
    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT and return the generated key, if the database
    /// produced one.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<Value>>;

    /// Is the connection currently in auto-commit mode?
    fn auto_commit(&self) -> bool;

    /// Enable or disable auto-commit.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    /// Commit the current database transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current database transaction.
    fn rollback(&mut self) -> Result<()>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        (**self).insert(sql, params)
    }

    fn auto_commit(&self) -> bool {
        (**self).auto_commit()
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        (**self).set_auto_commit(enabled)
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }
}
