//! SQL text for entity CRUD.
//!
//! The runtime never inspects statement text. It asks a [`StatementSource`]
//! for a parameterized statement and binds positional values in field order:
//!
//! | statement            | bind order                                   |
//! |----------------------|----------------------------------------------|
//! | insert               | [`EntityMeta::insert_fields`]                |
//! | select by id         | id                                           |
//! | update               | [`EntityMeta::update_fields`], then id       |
//! | delete               | id                                           |
//! | select by column     | the filter value                             |
//!
//! Select statements list [`EntityMeta::persistable_fields`] columns.

use crate::meta::{EntityMeta, EntityType};
use std::collections::HashMap;
use std::sync::Mutex;

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them.
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Produces parameterized SQL text for an entity's table.
pub trait StatementSource: Send + Sync {
    fn insert_statement(&self, meta: &EntityMeta) -> String;

    fn select_by_id_statement(&self, meta: &EntityMeta) -> String;

    fn update_statement(&self, meta: &EntityMeta) -> String;

    fn delete_statement(&self, meta: &EntityMeta) -> String;

    /// SELECT every row whose `column` equals the single bound value.
    fn select_by_column_statement(&self, meta: &EntityMeta, column: &str) -> String;
}

impl<S: StatementSource + ?Sized> StatementSource for Box<S> {
    fn insert_statement(&self, meta: &EntityMeta) -> String {
        (**self).insert_statement(meta)
    }

    fn select_by_id_statement(&self, meta: &EntityMeta) -> String {
        (**self).select_by_id_statement(meta)
    }

    fn update_statement(&self, meta: &EntityMeta) -> String {
        (**self).update_statement(meta)
    }

    fn delete_statement(&self, meta: &EntityMeta) -> String {
        (**self).delete_statement(meta)
    }

    fn select_by_column_statement(&self, meta: &EntityMeta, column: &str) -> String {
        (**self).select_by_column_statement(meta, column)
    }
}

/// ANSI SQL with `$n` placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiStatements;

impl AnsiStatements {
    fn select_list(meta: &EntityMeta) -> String {
        meta.persistable_fields()
            .map(|f| quote_ident(f.sql_column()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl StatementSource for AnsiStatements {
    fn insert_statement(&self, meta: &EntityMeta) -> String {
        let columns: Vec<String> = meta
            .insert_fields()
            .map(|f| quote_ident(f.sql_column()))
            .collect();
        if columns.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&meta.table_name));
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&meta.table_name),
            columns.join(", "),
            placeholders.join(", ")
        )
    }

    fn select_by_id_statement(&self, meta: &EntityMeta) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = $1",
            Self::select_list(meta),
            quote_ident(&meta.table_name),
            quote_ident(meta.id_field().sql_column())
        )
    }

    fn update_statement(&self, meta: &EntityMeta) -> String {
        let sets: Vec<String> = meta
            .update_fields()
            .enumerate()
            .map(|(i, f)| format!("{} = ${}", quote_ident(f.sql_column()), i + 1))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {} = ${}",
            quote_ident(&meta.table_name),
            sets.join(", "),
            quote_ident(meta.id_field().sql_column()),
            sets.len() + 1
        )
    }

    fn delete_statement(&self, meta: &EntityMeta) -> String {
        format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_ident(&meta.table_name),
            quote_ident(meta.id_field().sql_column())
        )
    }

    fn select_by_column_statement(&self, meta: &EntityMeta, column: &str) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = $1 ORDER BY {}",
            Self::select_list(meta),
            quote_ident(&meta.table_name),
            quote_ident(column),
            quote_ident(meta.id_field().sql_column())
        )
    }
}

/// Which statement a cache entry holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Insert,
    SelectById,
    Update,
    Delete,
    SelectByColumn(String),
}

#[derive(Debug, Clone)]
struct CachedStatement {
    sql: String,
    last_used: u64,
    hit_count: u64,
}

/// LRU cache of generated SQL text keyed by entity type and statement kind.
///
/// When the cache exceeds `max_size`, the least-recently-used entry is evicted.
#[derive(Debug)]
pub struct StatementCache {
    entries: HashMap<(EntityType, StatementKind), CachedStatement>,
    max_size: usize,
    clock: u64,
}

impl StatementCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_size.min(256)),
            max_size,
            clock: 0,
        }
    }

    /// Get a cached statement or build and insert it.
    ///
    /// The `builder` closure is only called on a miss. A zero-capacity cache
    /// always builds.
    pub fn get_or_insert(
        &mut self,
        entity: EntityType,
        kind: StatementKind,
        builder: impl FnOnce() -> String,
    ) -> String {
        if self.max_size == 0 {
            return builder();
        }
        self.clock += 1;
        let key = (entity, kind);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict_lru();
        }
        let clock = self.clock;
        let entry = self.entries.entry(key).or_insert_with_key(|(entity, kind)| {
            tracing::trace!(entity = %entity, kind = ?kind, "statement cache miss");
            CachedStatement {
                sql: builder(),
                last_used: clock,
                hit_count: 0,
            }
        });
        entry.last_used = clock;
        entry.hit_count += 1;
        entry.sql.clone()
    }

    pub fn contains(&self, entity: EntityType, kind: &StatementKind) -> bool {
        self.entries.contains_key(&(entity, kind.clone()))
    }

    /// Total number of lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.entries
            .values()
            .map(|e| e.hit_count.saturating_sub(1))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_lru(&mut self) {
        if let Some(lru_key) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        {
            self.entries.remove(&lru_key);
        }
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A [`StatementSource`] that memoizes another source's output.
#[derive(Debug)]
pub struct CachedStatements<S> {
    inner: S,
    cache: Mutex<StatementCache>,
}

impl<S: StatementSource> CachedStatements<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(StatementCache::new(capacity)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of cached statements.
    pub fn len(&self) -> usize {
        self.cache.lock().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, meta: &EntityMeta, kind: StatementKind, build: impl FnOnce() -> String) -> String {
        match self.cache.lock() {
            Ok(mut cache) => cache.get_or_insert(meta.entity, kind, build),
            // A poisoned cache only loses memoization.
            Err(_) => build(),
        }
    }
}

impl<S: StatementSource> StatementSource for CachedStatements<S> {
    fn insert_statement(&self, meta: &EntityMeta) -> String {
        self.cached(meta, StatementKind::Insert, || self.inner.insert_statement(meta))
    }

    fn select_by_id_statement(&self, meta: &EntityMeta) -> String {
        self.cached(meta, StatementKind::SelectById, || {
            self.inner.select_by_id_statement(meta)
        })
    }

    fn update_statement(&self, meta: &EntityMeta) -> String {
        self.cached(meta, StatementKind::Update, || self.inner.update_statement(meta))
    }

    fn delete_statement(&self, meta: &EntityMeta) -> String {
        self.cached(meta, StatementKind::Delete, || self.inner.delete_statement(meta))
    }

    fn select_by_column_statement(&self, meta: &EntityMeta, column: &str) -> String {
        self.cached(meta, StatementKind::SelectByColumn(column.to_string()), || {
            self.inner.select_by_column_statement(meta, column)
        })
    }
}
