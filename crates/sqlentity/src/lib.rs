//! SQLEntity - a unit-of-work persistence runtime for relational stores.
//!
//! SQLEntity tracks in-memory entities, detects changes to them and writes
//! those changes back in a fixed order:
//!
//! - Identity map: one shared instance per `(entity type, id)` per session
//! - Snapshot-based dirty checking
//! - Ordered flush: INSERT, then UPDATE, then DELETE
//! - Lazy to-one and to-many relationships, realized at most once
//! - Explicit transactions over a blocking [`Connection`]
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlentity::prelude::*;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Account {
//!     id: Option<i64>,
//!     balance: i64,
//! }
//!
//! let accounts = EntityDescriptor::builder("accounts", Account::default)
//!     .id("id", ValueType::BigInt, |a: &Account| a.id.into(), |a, v| {
//!         a.id = v.try_into()?;
//!         Ok(())
//!     })
//!     .generated()
//!     .column("balance", ValueType::BigInt, |a: &Account| a.balance.into(), |a, v| {
//!         a.balance = v.try_into()?;
//!         Ok(())
//!     })
//!     .build()?;
//! let registry = Arc::new(EntityRegistry::new().with(accounts));
//!
//! let mut session = Session::new(conn, registry);
//! session.begin()?;
//! let account = session.persist(Account { id: None, balance: 100 })?;
//! session.commit()?;
//! assert_eq!(account.read()?.id, Some(1));
//! ```

pub use sqlentity_core::{
    AnsiStatements, CachedStatements, ColumnInfo, ConfigError, Connection, EntityKey, EntityMeta,
    EntityType, Error, FetchMode, FieldMeta, IllegalStateError, KeyValue, MappingError,
    MappingErrorKind, RelationshipKind, Result, Row, SqlExecutionError, StatementCache,
    StatementKind, StatementSource, Value, ValueType, quote_ident,
};
pub use sqlentity_session::{
    AnyDescriptor, AnyRef, ContextResolver, DescriptorBuilder, Entity, EntityDescriptor,
    EntityPersister, EntityReadGuard, EntityRef, EntityRegistry, EntityWriteGuard, FlushResult,
    LazyFactory, LifecycleState, Pending, PersistenceContext, RelationLoader, RelationResolver,
    Session, SessionConfig, SessionDebugInfo, ToMany, ToOne, Transaction, TransactionState,
    same_instance,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sqlentity::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Core types
        Connection,
        Error,
        Result,
        Row,
        Value,
        ValueType,
        // Mapping
        EntityDescriptor,
        EntityRef,
        EntityRegistry,
        ToMany,
        ToOne,
        // Session
        FlushResult,
        RelationLoader,
        Session,
        SessionConfig,
        TransactionState,
    };
    pub use std::sync::Arc;
}
