//! Core types for SQLEntity.
//!
//! This crate holds the shapes every other layer agrees on:
//!
//! - [`Value`] and [`Row`] for parameters and results
//! - the blocking [`Connection`] trait
//! - entity metadata ([`EntityMeta`], [`FieldMeta`], [`EntityKey`])
//! - the SQL-text collaborator ([`StatementSource`])
//! - the [`Error`] taxonomy

pub mod connection;
pub mod error;
pub mod meta;
pub mod row;
pub mod statements;
pub mod value;

pub use connection::Connection;
pub use error::{
    ConfigError, Error, IllegalStateError, MappingError, MappingErrorKind, Result,
    SqlExecutionError,
};
pub use meta::{EntityKey, EntityMeta, EntityType, FetchMode, FieldMeta, KeyValue, RelationshipKind};
pub use row::{ColumnInfo, Row};
pub use statements::{
    AnsiStatements, CachedStatements, StatementCache, StatementKind, StatementSource, quote_ident,
};
pub use value::{Value, ValueType};
