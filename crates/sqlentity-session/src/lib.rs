//! Session and unit of work for SQLEntity.
//!
//! `sqlentity-session` is the **unit-of-work runtime**. It keeps one
//! in-memory instance per `(entity type, id)`, detects changes by comparing
//! snapshots, writes them back in a fixed order, and realizes lazy
//! relationships at most once.
//!
//! # Role In The Architecture
//!
//! - **Persistence context**: identity map, snapshots and insert/delete queues.
//! - **Entity persister**: single-entity CRUD through a [`StatementSource`].
//! - **Lazy realization**: [`ToOne`] and [`ToMany`] handles.
//! - **Transaction coordinator**: begin/flush/commit/rollback.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(conn, Arc::clone(&registry));
//! session.begin()?;
//!
//! let account = session.persist(Account { id: None, balance: 100 })?;
//! session.flush()?;
//!
//! // Served from the identity map, no SQL issued
//! let same = session.find::<Account>(1)?.unwrap();
//! assert!(same.ptr_eq(&account));
//!
//! account.write()?.balance = 150;
//! session.commit()?;
//! ```

pub mod config;
pub mod context;
pub mod descriptor;
pub mod entity;
pub mod flush;
pub mod lazy;
pub mod persister;
pub mod registry;
pub mod resolver;
pub mod transaction;

pub use config::SessionConfig;
pub use context::{LifecycleState, Pending, PersistenceContext};
pub use descriptor::{AnyDescriptor, DescriptorBuilder, EntityDescriptor};
pub use entity::{AnyRef, Entity, EntityReadGuard, EntityRef, EntityWriteGuard, same_instance};
pub use flush::FlushResult;
pub use lazy::{LazyFactory, ToMany, ToOne};
pub use persister::EntityPersister;
pub use registry::EntityRegistry;
pub use resolver::{ContextResolver, RelationLoader, RelationResolver};
pub use transaction::{Transaction, TransactionState};

use sqlentity_core::{
    AnsiStatements, CachedStatements, Connection, EntityKey, EntityType, Error, Result,
    StatementSource, Value,
};
use std::fmt;
use std::sync::Arc;

/// A unit of work over one connection.
///
/// A session is confined to one thread at a time. Entities it hands out are
/// shared references; mutate them through [`EntityRef::write`] and the next
/// flush picks the change up.
pub struct Session<C: Connection> {
    conn: C,
    registry: Arc<EntityRegistry>,
    statements: CachedStatements<Box<dyn StatementSource>>,
    context: PersistenceContext,
    transaction: Transaction,
    lazy: Option<LazyFactory>,
    config: SessionConfig,
}

impl<C: Connection> Session<C> {
    /// Create a session with default configuration and ANSI statements.
    pub fn new(conn: C, registry: Arc<EntityRegistry>) -> Self {
        Self::with_config(conn, registry, SessionConfig::default())
    }

    pub fn with_config(conn: C, registry: Arc<EntityRegistry>, config: SessionConfig) -> Self {
        Self::with_statements(conn, registry, config, Box::new(AnsiStatements))
    }

    /// Create a session that takes its SQL text from `statements`.
    pub fn with_statements(
        conn: C,
        registry: Arc<EntityRegistry>,
        config: SessionConfig,
        statements: Box<dyn StatementSource>,
    ) -> Self {
        tracing::debug!(
            entities = registry.len(),
            lazy_loading = config.lazy_loading,
            statement_cache_size = config.statement_cache_size,
            "session created"
        );
        Self {
            conn,
            context: PersistenceContext::new(Arc::clone(&registry)),
            registry,
            statements: CachedStatements::new(statements, config.statement_cache_size),
            transaction: Transaction::new(),
            lazy: config.lazy_loading.then(LazyFactory::new),
            config,
        }
    }

    // ========================================================================
    // Entity operations
    // ========================================================================

    /// Make a new entity managed. It is INSERTed on the next flush.
    pub fn persist<E: Entity>(&mut self, entity: E) -> Result<EntityRef<E>> {
        let entity = EntityRef::new(entity);
        self.persist_ref(&entity)?;
        Ok(entity)
    }

    /// [`persist`](Self::persist) for an instance the caller already shares.
    ///
    /// Persisting a REMOVED entity makes it MANAGED again and cancels its
    /// DELETE. Persisting an entity that is already managed or queued does
    /// nothing.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = std::any::type_name::<E>()))]
    pub fn persist_ref<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<()> {
        let entity_type = EntityType::of::<E>();
        let descriptor = self.registry.describe_type(entity_type)?;
        let instance = entity.to_any();

        if let Some(key) = self.context.key_of(entity_type, &instance)? {
            if self.context.state(&key) == Some(LifecycleState::Removed) {
                self.context.mark_managed(&key);
                self.context.cancel_delete(&instance);
                tracing::debug!(key = %key, "removed entity persisted again");
            }
            return Ok(());
        }
        if self.context.is_scheduled_for_insert(&instance) {
            return Ok(());
        }

        // Caller-assigned ids are tracked right away; the rest wait in the
        // insert queue until the flush gives them a key.
        if !descriptor.id_value(&instance)?.is_null() {
            self.context
                .register(entity_type, Arc::clone(&instance), LifecycleState::Managed)?;
        }
        self.context.schedule_insert(entity_type, instance);
        tracing::debug!("entity scheduled for insert");
        Ok(())
    }

    /// Find an entity by primary key.
    ///
    /// The identity map is consulted first; a miss loads from the database
    /// and registers the result. A REMOVED entity is reported as absent.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = std::any::type_name::<E>()))]
    pub fn find<E: Entity>(&mut self, id: impl Into<Value>) -> Result<Option<EntityRef<E>>> {
        let entity_type = EntityType::of::<E>();
        let id_type = self.registry.describe_type(entity_type)?.meta().id_field().value_type;
        let id = id.into().coerce(id_type);
        let key = EntityKey::new(entity_type, &id)?;

        match self.context.state(&key) {
            Some(LifecycleState::Removed) => return Ok(None),
            Some(LifecycleState::Managed) => {
                tracing::trace!(key = %key, "identity map hit");
                return self
                    .context
                    .lookup_key(&key)
                    .map(EntityRef::try_from_any)
                    .transpose();
            }
            None => {}
        }

        self.resolver()
            .load(entity_type, &id)?
            .map(EntityRef::try_from_any)
            .transpose()
    }

    /// Schedule a managed entity for DELETE on the next flush.
    ///
    /// Removing an entity that is still waiting to be inserted just cancels
    /// the insert. Removing an entity this session does not track is an
    /// illegal-state error.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = std::any::type_name::<E>()))]
    pub fn remove<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<()> {
        let entity_type = EntityType::of::<E>();
        let instance = entity.to_any();

        if self.context.cancel_insert(&instance) {
            if let Some(key) = self.context.key_of(entity_type, &instance)? {
                self.context.remove(&key);
            }
            tracing::debug!("pending insert cancelled");
            return Ok(());
        }
        if self.context.mark_removed(entity_type, &instance)? {
            self.context.schedule_delete(entity_type, instance);
            tracing::debug!("entity scheduled for delete");
            return Ok(());
        }
        Err(Error::illegal_state("remove", "DETACHED"))
    }

    /// Copy a detached instance's state onto the managed instance with the
    /// same id and return the managed reference.
    ///
    /// The managed instance is loaded if needed. An instance without an id,
    /// or whose id matches no row, is persisted as a new entity.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = std::any::type_name::<E>()))]
    pub fn merge<E: Entity + Clone>(&mut self, entity: &E) -> Result<EntityRef<E>> {
        let registry = Arc::clone(&self.registry);
        let descriptor = registry.describe::<E>()?;
        let id = descriptor
            .id_of(entity)
            .coerce(descriptor.meta().id_field().value_type);
        if id.is_null() {
            return self.persist(entity.clone());
        }

        let key = EntityKey::new(EntityType::of::<E>(), &id)?;
        if self.context.state(&key) == Some(LifecycleState::Removed) {
            return Err(Error::illegal_state("merge", LifecycleState::Removed));
        }

        match self.find::<E>(id)? {
            Some(managed) => {
                {
                    let mut guard = managed.write()?;
                    descriptor.copy_state(entity, &mut guard)?;
                }
                tracing::debug!(key = %key, "merged onto managed instance");
                Ok(managed)
            }
            None => self.persist(entity.clone()),
        }
    }

    /// Write all pending changes without committing.
    pub fn flush(&mut self) -> Result<FlushResult> {
        let persister = EntityPersister::new(&self.conn, &self.statements, &self.registry);
        flush::flush(&mut self.context, &persister)
    }

    /// Stop tracking everything. In-memory field values are left as they are.
    pub fn clear(&mut self) {
        self.context.clear();
        tracing::debug!("session cleared");
    }

    /// Stop tracking one entity. Returns `false` if it was not tracked.
    pub fn detach<E: Entity>(&mut self, id: impl Into<Value>) -> bool {
        self.context.detach(EntityType::of::<E>(), &self.coerce_id::<E>(id))
    }

    /// Is `(E, id)` in the identity map?
    pub fn contains<E: Entity>(&self, id: impl Into<Value>) -> bool {
        self.context.contains(EntityType::of::<E>(), &self.coerce_id::<E>(id))
    }

    fn coerce_id<E: Entity>(&self, id: impl Into<Value>) -> Value {
        let id = id.into();
        match self.registry.describe_type(EntityType::of::<E>()) {
            Ok(descriptor) => id.coerce(descriptor.meta().id_field().value_type),
            Err(_) => id,
        }
    }

    // ========================================================================
    // Transaction Management
    // ========================================================================

    /// Begin a transaction. A finished transaction is replaced by a new one.
    pub fn begin(&mut self) -> Result<()> {
        if self.transaction.state().is_terminal() {
            self.transaction = Transaction::new();
        }
        self.transaction.begin(&mut self.conn)
    }

    /// Flush, then commit the connection.
    ///
    /// If either step fails the transaction stays ACTIVE; call
    /// [`rollback`](Self::rollback) to discard it.
    pub fn commit(&mut self) -> Result<FlushResult> {
        let registry: &EntityRegistry = &self.registry;
        let statements: &dyn StatementSource = &self.statements;
        let context = &mut self.context;
        self.transaction.commit(&mut self.conn, |conn| {
            let persister = EntityPersister::new(conn, statements, registry);
            flush::flush(context, &persister)
        })
    }

    /// Roll the connection back, then forget every tracked entity.
    ///
    /// Field values of entities already handed out are not restored.
    pub fn rollback(&mut self) -> Result<()> {
        self.transaction.rollback(&mut self.conn)?;
        self.context.clear();
        Ok(())
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction.state()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Are there queued operations or dirty entities?
    pub fn is_modified(&self) -> Result<bool> {
        if !self.context.pending_inserts().is_empty() || !self.context.pending_deletes().is_empty() {
            return Ok(true);
        }
        Ok(!self.context.detect_dirty()?.is_empty())
    }

    /// Dump session state for debugging.
    pub fn debug_state(&self) -> SessionDebugInfo {
        SessionDebugInfo {
            managed: self.context.managed_count(),
            removed: self.context.removed_count(),
            pending_inserts: self.context.pending_inserts().len(),
            pending_deletes: self.context.pending_deletes().len(),
            transaction: self.transaction.state(),
        }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Number of lazy handles issued by this session so far.
    pub fn lazy_handles_created(&self) -> usize {
        self.lazy.as_ref().map_or(0, LazyFactory::created)
    }

    fn resolver(&mut self) -> ContextResolver<'_> {
        let persister = EntityPersister::new(&self.conn, &self.statements, &self.registry);
        ContextResolver::new(&mut self.context, persister, self.lazy.as_ref())
    }
}

/// A session realizes lazy handles through its own identity map:
/// `member.team.get(&mut session)`.
impl<C: Connection> RelationResolver for Session<C> {
    fn resolve(&mut self, target: EntityType, fk: &Value) -> Result<Option<AnyRef>> {
        self.resolver().resolve(target, fk)
    }

    fn resolve_many(
        &mut self,
        target: EntityType,
        inverse: &str,
        owner_id: &Value,
    ) -> Result<Vec<AnyRef>> {
        self.resolver().resolve_many(target, inverse, owner_id)
    }
}

impl<C: Connection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("registry", &self.registry)
            .field("context", &self.context)
            .field("transaction", &self.transaction.state())
            .field("config", &self.config)
            .field("cached_statements", &self.statements.len())
            .finish_non_exhaustive()
    }
}

/// Debug information about session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDebugInfo {
    /// MANAGED entities in the identity map.
    pub managed: usize,
    /// REMOVED entities awaiting their DELETE.
    pub removed: usize,
    /// Entities queued for INSERT.
    pub pending_inserts: usize,
    /// Entities queued for DELETE.
    pub pending_deletes: usize,
    pub transaction: TransactionState,
}

// ============================================================================
// Unit Tests
// ============================================================================
