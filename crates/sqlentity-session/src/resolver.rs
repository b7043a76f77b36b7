//! Relationship resolution.
//!
//! [`RelationResolver`] is the object-safe callback the persister uses for
//! EAGER to-one fields and that lazy handles use when realized.
//! [`RelationLoader`] is its typed face. [`ContextResolver`] is the
//! implementation backed by a persistence context: it consults the identity
//! map before touching the database and registers whatever it loads before
//! resolving that entity's EAGER relationships.

use crate::context::{LifecycleState, PersistenceContext};
use crate::entity::{AnyRef, Entity, EntityRef};
use crate::lazy::LazyFactory;
use crate::persister::EntityPersister;
use sqlentity_core::{
    EntityKey, EntityType, Error, MappingError, MappingErrorKind, Result, Value,
};
use std::collections::HashSet;

/// Resolves relationship targets by type.
pub trait RelationResolver {
    /// The `target` entity whose id is `fk`, or `None` if no row matches.
    fn resolve(&mut self, target: EntityType, fk: &Value) -> Result<Option<AnyRef>>;

    /// Every `target` entity whose `inverse` field (or column) equals
    /// `owner_id`.
    fn resolve_many(
        &mut self,
        target: EntityType,
        inverse: &str,
        owner_id: &Value,
    ) -> Result<Vec<AnyRef>>;

    /// Called with each freshly mapped entity before its EAGER relationships
    /// are resolved.
    fn adopt(&mut self, _target: EntityType, _entity: &AnyRef) -> Result<()> {
        Ok(())
    }
}

/// Typed relationship loading, available on every [`RelationResolver`].
pub trait RelationLoader {
    fn load_one<T: Entity>(&mut self, fk: &Value) -> Result<Option<EntityRef<T>>>;

    fn load_many<T: Entity>(&mut self, inverse: &str, owner_id: &Value) -> Result<Vec<EntityRef<T>>>;
}

impl<R: RelationResolver + ?Sized> RelationLoader for R {
    fn load_one<T: Entity>(&mut self, fk: &Value) -> Result<Option<EntityRef<T>>> {
        self.resolve(EntityType::of::<T>(), fk)?
            .map(EntityRef::try_from_any)
            .transpose()
    }

    fn load_many<T: Entity>(&mut self, inverse: &str, owner_id: &Value) -> Result<Vec<EntityRef<T>>> {
        self.resolve_many(EntityType::of::<T>(), inverse, owner_id)?
            .into_iter()
            .map(EntityRef::try_from_any)
            .collect()
    }
}

/// A resolver bound to one persistence context for the duration of a load.
///
/// Entities loaded through it are registered as MANAGED as soon as their
/// columns are mapped, so EAGER paths that lead back to them (a to-one and
/// its inverse collection, or a cycle of foreign keys) share the instance.
/// REMOVED entities resolve to nothing, as they do for `Session::find`.
///
/// Re-entering a load for a key that never reached the identity map fails
/// with [`MappingErrorKind::EagerCycle`] rather than recursing.
pub struct ContextResolver<'a> {
    context: &'a mut PersistenceContext,
    persister: EntityPersister<'a>,
    lazy: Option<&'a LazyFactory>,
    in_flight: HashSet<EntityKey>,
}

impl<'a> ContextResolver<'a> {
    pub fn new(
        context: &'a mut PersistenceContext,
        persister: EntityPersister<'a>,
        lazy: Option<&'a LazyFactory>,
    ) -> Self {
        Self {
            context,
            persister,
            lazy,
            in_flight: HashSet::new(),
        }
    }

    /// Identity map first, then the database.
    pub fn load(&mut self, target: EntityType, id: &Value) -> Result<Option<AnyRef>> {
        let key = EntityKey::new(target, id)?;
        if let Some(tracked) = self.tracked(&key) {
            return Ok(tracked);
        }

        self.enter(&key)?;
        let persister = self.persister;
        let descriptor = persister.registry().describe_type(target)?;
        let lazy = self.lazy;
        let loaded = persister.load(descriptor, id, self, lazy);
        self.in_flight.remove(&key);
        if loaded.is_err() {
            self.context.remove(&key);
        }
        loaded
    }

    /// `Some` when the identity map decides the answer: the instance, or
    /// `None` for a REMOVED entity.
    fn tracked(&self, key: &EntityKey) -> Option<Option<AnyRef>> {
        let existing = self.context.lookup_key(key)?;
        if self.context.state(key) == Some(LifecycleState::Removed) {
            tracing::trace!(key = %key, "identity map hit on removed entity");
            return Some(None);
        }
        tracing::trace!(key = %key, "identity map hit");
        Some(Some(existing))
    }

    fn enter(&mut self, key: &EntityKey) -> Result<()> {
        if self.in_flight.insert(key.clone()) {
            Ok(())
        } else {
            Err(Error::Mapping(
                MappingError::new(
                    MappingErrorKind::EagerCycle,
                    format!("eager relationship cycle through {}", key),
                )
                .entity(key.entity.name()),
            ))
        }
    }
}

impl RelationResolver for ContextResolver<'_> {
    fn resolve(&mut self, target: EntityType, fk: &Value) -> Result<Option<AnyRef>> {
        if fk.is_null() {
            return Ok(None);
        }
        self.load(target, fk)
    }

    fn resolve_many(
        &mut self,
        target: EntityType,
        inverse: &str,
        owner_id: &Value,
    ) -> Result<Vec<AnyRef>> {
        let persister = self.persister;
        let descriptor = persister.registry().describe_type(target)?;
        let meta = descriptor.meta();
        let column = meta
            .field(inverse)
            .and_then(|f| f.column_name.as_deref())
            .unwrap_or(inverse);
        let id_field = meta.id_field();

        let rows = persister.select_by_column(descriptor, column, owner_id)?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.column_value(id_field.sql_column(), id_field.value_type);
            let key = EntityKey::new(target, &id)?;
            if let Some(tracked) = self.tracked(&key) {
                items.extend(tracked);
                continue;
            }

            self.enter(&key)?;
            let lazy = self.lazy;
            let hydrated = persister.hydrate(descriptor, &row, self, lazy);
            self.in_flight.remove(&key);
            if hydrated.is_err() {
                self.context.remove(&key);
            }
            items.push(hydrated?);
        }
        Ok(items)
    }

    fn adopt(&mut self, target: EntityType, entity: &AnyRef) -> Result<()> {
        self.context
            .register(target, entity.clone(), LifecycleState::Managed)
            .map(|_| ())
    }
}
