//! Typed entity descriptors.
//!
//! An [`EntityDescriptor<E>`] pairs the type-erased [`EntityMeta`] with an
//! accessor table: one getter/setter pair per field, built once and indexed
//! in field order. The runtime reads and writes entities only through this
//! table.
//!
//! ```ignore
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
//!     .to_one("team", |a: &Account| &a.team, |a: &mut Account| &mut a.team)
//!     .build()?;
//! ```

use crate::entity::{AnyRef, Entity, EntityRef, downcast_lock, poisoned};
use crate::lazy::{BindSource, LazyFactory, ToMany, ToOne};
use crate::registry::EntityRegistry;
use crate::resolver::RelationResolver;
use sqlentity_core::{
    EntityKey, EntityMeta, EntityType, Error, FetchMode, FieldMeta, MappingError,
    MappingErrorKind, RelationshipKind, Result, Row, Value, ValueType,
};
use std::any::Any;
use std::fmt;

type Getter<E> = Box<dyn Fn(&E) -> Value + Send + Sync>;
type Setter<E> = Box<dyn Fn(&mut E, Value) -> Result<()> + Send + Sync>;

enum FieldAccessor<E> {
    Column { get: Getter<E>, set: Setter<E> },
    ToOne(Box<dyn ToOneField<E>>),
    ToMany(Box<dyn ToManyField<E>>),
}

/// Foreign-key source for one to-one field, read under the entity lock and
/// resolved after it is released.
enum FkSource {
    Value(Value),
    Target(EntityType, AnyRef),
}

trait ToOneField<E>: Send + Sync {
    fn fk_source(&self, entity: &E) -> FkSource;
    fn assign_deferred(
        &self,
        entity: &mut E,
        fk: Value,
        owner: Option<&EntityKey>,
        lazy: Option<&LazyFactory>,
    );
    fn copy(&self, from: &E, to: &mut E);
    fn handle(&self, entity: &E) -> Box<dyn Realize>;
}

trait ToManyField<E>: Send + Sync {
    fn assign_deferred(
        &self,
        entity: &mut E,
        inverse: &str,
        owner_id: Value,
        owner: Option<&EntityKey>,
        lazy: Option<&LazyFactory>,
    );
    fn handle(&self, entity: &E) -> Box<dyn Realize>;
}

/// A relationship handle detached from its owner's lock.
trait Realize {
    fn realize(&self, resolver: &mut dyn RelationResolver) -> Result<()>;
}

impl<T: Entity> Realize for ToOne<T> {
    fn realize(&self, resolver: &mut dyn RelationResolver) -> Result<()> {
        self.get(resolver).map(|_| ())
    }
}

impl<T: Entity> Realize for ToMany<T> {
    fn realize(&self, resolver: &mut dyn RelationResolver) -> Result<()> {
        self.get(resolver).map(|_| ())
    }
}

struct ToOneSlot<E, T> {
    get: fn(&E) -> &ToOne<T>,
    get_mut: fn(&mut E) -> &mut ToOne<T>,
}

impl<E: Entity, T: Entity> ToOneField<E> for ToOneSlot<E, T> {
    fn fk_source(&self, entity: &E) -> FkSource {
        match (self.get)(entity).bind_source() {
            BindSource::Value(v) => FkSource::Value(v),
            BindSource::Target(target) => FkSource::Target(EntityType::of::<T>(), target.to_any()),
        }
    }

    fn assign_deferred(
        &self,
        entity: &mut E,
        fk: Value,
        owner: Option<&EntityKey>,
        lazy: Option<&LazyFactory>,
    ) {
        *(self.get_mut)(entity) = match lazy {
            Some(factory) => factory.to_one(owner, fk),
            None => ToOne::from_fk(fk),
        };
    }

    fn copy(&self, from: &E, to: &mut E) {
        *(self.get_mut)(to) = (self.get)(from).clone();
    }

    fn handle(&self, entity: &E) -> Box<dyn Realize> {
        Box::new((self.get)(entity).clone())
    }
}

struct ToManySlot<E, T> {
    get: fn(&E) -> &ToMany<T>,
    get_mut: fn(&mut E) -> &mut ToMany<T>,
}

impl<E: Entity, T: Entity> ToManyField<E> for ToManySlot<E, T> {
    fn assign_deferred(
        &self,
        entity: &mut E,
        inverse: &str,
        owner_id: Value,
        owner: Option<&EntityKey>,
        lazy: Option<&LazyFactory>,
    ) {
        *(self.get_mut)(entity) = match lazy {
            Some(factory) => factory.to_many(owner, inverse, owner_id),
            None => ToMany::inverse(inverse, owner_id),
        };
    }

    fn handle(&self, entity: &E) -> Box<dyn Realize> {
        Box::new((self.get)(entity).clone())
    }
}

/// Immutable per-type descriptor: metadata plus accessor table.
pub struct EntityDescriptor<E> {
    meta: EntityMeta,
    accessors: Vec<FieldAccessor<E>>,
    ctor: fn() -> E,
}

impl<E> fmt::Debug for EntityDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> EntityDescriptor<E> {
    /// Start describing `E`, stored in `table`. `ctor` produces the blank
    /// instance rows are mapped onto.
    pub fn builder(table: impl Into<String>, ctor: fn() -> E) -> DescriptorBuilder<E> {
        DescriptorBuilder {
            table: table.into(),
            ctor,
            fields: Vec::new(),
            error: None,
        }
    }

    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    /// Read the id of a plain instance.
    pub fn id_of(&self, entity: &E) -> Value {
        match &self.accessors[self.meta.id_index()] {
            FieldAccessor::Column { get, .. } => get(entity),
            // EntityMeta rejects relationship ids.
            _ => Value::Null,
        }
    }

    fn set_id(&self, entity: &mut E, id: Value) -> Result<()> {
        let field = self.meta.id_field();
        match &self.accessors[self.meta.id_index()] {
            FieldAccessor::Column { set, .. } => set(entity, id.coerce(field.value_type))
                .map_err(|e| self.field_error(field.name, e)),
            _ => Err(self.mapping(MappingErrorKind::InvalidDescriptor, "id is not a column")),
        }
    }

    /// Copy mapped columns and to-one handles from `from` onto `to`.
    ///
    /// Collections are left alone: they are derived from the other side.
    pub fn copy_state(&self, from: &E, to: &mut E) -> Result<()> {
        for (field, accessor) in self.meta.fields.iter().zip(&self.accessors) {
            match accessor {
                FieldAccessor::Column { get, set } => {
                    set(to, get(from)).map_err(|e| self.field_error(field.name, e))?;
                }
                FieldAccessor::ToOne(slot) => slot.copy(from, to),
                FieldAccessor::ToMany(_) => {}
            }
        }
        Ok(())
    }

    /// Values of all persistable fields of a plain instance, in
    /// [`EntityMeta::persistable_fields`] order.
    pub fn values_of(&self, entity: &E, registry: &EntityRegistry) -> Result<Vec<Value>> {
        let (values, pending) = self.collect_values(entity);
        self.resolve_fks(values, pending, registry)
    }

    fn collect_values(&self, entity: &E) -> (Vec<Value>, Vec<(usize, EntityType, AnyRef)>) {
        let mut values = Vec::with_capacity(self.accessors.len());
        let mut pending = Vec::new();
        for (field, accessor) in self.meta.fields.iter().zip(&self.accessors) {
            match accessor {
                FieldAccessor::Column { get, .. } => {
                    values.push(get(entity).coerce(field.value_type));
                }
                FieldAccessor::ToOne(slot) => match slot.fk_source(entity) {
                    FkSource::Value(v) => values.push(v.coerce(field.value_type)),
                    FkSource::Target(target, any) => {
                        pending.push((values.len(), target, any));
                        values.push(Value::Null);
                    }
                },
                FieldAccessor::ToMany(_) => {}
            }
        }
        (values, pending)
    }

    fn resolve_fks(
        &self,
        mut values: Vec<Value>,
        pending: Vec<(usize, EntityType, AnyRef)>,
        registry: &EntityRegistry,
    ) -> Result<Vec<Value>> {
        if pending.is_empty() {
            return Ok(values);
        }
        let persistable: Vec<&FieldMeta> = self.meta.persistable_fields().collect();
        for (slot, target, any) in pending {
            let id = registry.describe_type(target)?.id_value(&any)?;
            values[slot] = id.coerce(persistable[slot].value_type);
        }
        Ok(values)
    }

    fn mapping(&self, kind: MappingErrorKind, message: impl Into<String>) -> Error {
        Error::Mapping(MappingError::new(kind, message).entity(self.meta.entity.name()))
    }

    fn field_error(&self, field: &str, err: Error) -> Error {
        match err {
            Error::Mapping(mut m) => {
                m.entity = Some(self.meta.entity.name());
                if m.field.is_none() {
                    m.field = Some(field.to_string());
                }
                Error::Mapping(m)
            }
            other => Error::Mapping(
                MappingError::new(MappingErrorKind::FieldAccess, other.to_string())
                    .entity(self.meta.entity.name())
                    .field(field),
            ),
        }
    }

    fn read_row(&self, row: &Row, field: &FieldMeta) -> Value {
        row.column_value(field.sql_column(), field.value_type)
    }
}

/// The type-erased view of a descriptor used by the context and persister.
pub trait AnyDescriptor: Send + Sync {
    fn meta(&self) -> &EntityMeta;

    fn as_any(&self) -> &dyn Any;

    /// Values of all persistable fields in [`EntityMeta::persistable_fields`]
    /// order; to-one fields contribute their foreign key.
    fn column_values(&self, entity: &AnyRef, registry: &EntityRegistry) -> Result<Vec<Value>>;

    fn id_value(&self, entity: &AnyRef) -> Result<Value>;

    /// Write an id (converted to the id field's type) into the entity.
    fn assign_id(&self, entity: &AnyRef, id: Value) -> Result<()>;

    /// Map one row onto a fresh instance.
    ///
    /// Every relationship field gets a deferred handle. LAZY ones are tagged
    /// by `lazy` when a factory is supplied; EAGER ones are left for
    /// [`realize_eager`](Self::realize_eager).
    fn hydrate(&self, row: &Row, lazy: Option<&LazyFactory>) -> Result<AnyRef>;

    /// Realize the EAGER relationships of an entity, to-one fields first.
    ///
    /// Runs after the entity is visible to `resolver`, so a path that leads
    /// back to it resolves to the same instance.
    fn realize_eager(&self, entity: &AnyRef, resolver: &mut dyn RelationResolver) -> Result<()>;
}

impl<E: Entity> AnyDescriptor for EntityDescriptor<E> {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn column_values(&self, entity: &AnyRef, registry: &EntityRegistry) -> Result<Vec<Value>> {
        let (values, pending) = {
            let guard = downcast_lock::<E>(entity)?.read().map_err(|_| poisoned::<E>())?;
            self.collect_values(&guard)
        };
        self.resolve_fks(values, pending, registry)
    }

    fn id_value(&self, entity: &AnyRef) -> Result<Value> {
        let guard = downcast_lock::<E>(entity)?.read().map_err(|_| poisoned::<E>())?;
        Ok(self.id_of(&guard).coerce(self.meta.id_field().value_type))
    }

    fn assign_id(&self, entity: &AnyRef, id: Value) -> Result<()> {
        let mut guard = downcast_lock::<E>(entity)?.write().map_err(|_| poisoned::<E>())?;
        self.set_id(&mut guard, id)
    }

    fn hydrate(&self, row: &Row, lazy: Option<&LazyFactory>) -> Result<AnyRef> {
        let mut entity = (self.ctor)();
        let id = self.read_row(row, self.meta.id_field());
        let owner = EntityKey::new(self.meta.entity, &id).ok();

        for (field, accessor) in self.meta.fields.iter().zip(&self.accessors) {
            match accessor {
                FieldAccessor::Column { set, .. } => {
                    let value = self.read_row(row, field);
                    set(&mut entity, value).map_err(|e| self.field_error(field.name, e))?;
                }
                FieldAccessor::ToOne(slot) => {
                    let fk = self.read_row(row, field);
                    let lazy = if field.fetch == FetchMode::Eager { None } else { lazy };
                    slot.assign_deferred(&mut entity, fk, owner.as_ref(), lazy);
                }
                FieldAccessor::ToMany(slot) => {
                    let inverse = field.inverse_field.as_deref().unwrap_or_default();
                    slot.assign_deferred(&mut entity, inverse, id.clone(), owner.as_ref(), lazy);
                }
            }
        }

        Ok(EntityRef::new(entity).to_any())
    }

    fn realize_eager(&self, entity: &AnyRef, resolver: &mut dyn RelationResolver) -> Result<()> {
        let handles: Vec<Box<dyn Realize>> = {
            let guard = downcast_lock::<E>(entity)?.read().map_err(|_| poisoned::<E>())?;
            let eager = || {
                self.meta
                    .fields
                    .iter()
                    .zip(&self.accessors)
                    .filter(|(field, _)| field.fetch == FetchMode::Eager)
            };
            let to_one = eager().filter_map(|(_, accessor)| match accessor {
                FieldAccessor::ToOne(slot) => Some(slot.handle(&guard)),
                _ => None,
            });
            let to_many = eager().filter_map(|(_, accessor)| match accessor {
                FieldAccessor::ToMany(slot) => Some(slot.handle(&guard)),
                _ => None,
            });
            to_one.chain(to_many).collect()
        };
        for handle in handles {
            handle.realize(resolver)?;
        }
        Ok(())
    }
}

/// Builder for [`EntityDescriptor`].
///
/// Modifiers such as [`generated`](Self::generated) or
/// [`column_name`](Self::column_name) apply to the most recently added field.
pub struct DescriptorBuilder<E> {
    table: String,
    ctor: fn() -> E,
    fields: Vec<(FieldMeta, FieldAccessor<E>)>,
    error: Option<String>,
}

impl<E: Entity> DescriptorBuilder<E> {
    /// The primary-key column.
    pub fn id<G, S>(self, name: &'static str, value_type: ValueType, get: G, set: S) -> Self
    where
        G: Fn(&E) -> Value + Send + Sync + 'static,
        S: Fn(&mut E, Value) -> Result<()> + Send + Sync + 'static,
    {
        let mut meta = FieldMeta::column(name, value_type);
        meta.is_id = true;
        meta.nullable = false;
        self.push(meta, FieldAccessor::Column {
            get: Box::new(get),
            set: Box::new(set),
        })
    }

    /// A plain column.
    pub fn column<G, S>(self, name: &'static str, value_type: ValueType, get: G, set: S) -> Self
    where
        G: Fn(&E) -> Value + Send + Sync + 'static,
        S: Fn(&mut E, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.push(FieldMeta::column(name, value_type), FieldAccessor::Column {
            get: Box::new(get),
            set: Box::new(set),
        })
    }

    /// A many-to-one relationship stored as `<name>_id`. LAZY by default.
    pub fn to_one<T: Entity>(
        self,
        name: &'static str,
        get: fn(&E) -> &ToOne<T>,
        get_mut: fn(&mut E) -> &mut ToOne<T>,
    ) -> Self {
        self.push(
            FieldMeta::to_one(name, EntityType::of::<T>()),
            FieldAccessor::ToOne(Box::new(ToOneSlot { get, get_mut })),
        )
    }

    /// A one-to-one relationship stored as `<name>_id`. LAZY by default.
    pub fn one_to_one<T: Entity>(
        self,
        name: &'static str,
        get: fn(&E) -> &ToOne<T>,
        get_mut: fn(&mut E) -> &mut ToOne<T>,
    ) -> Self {
        let mut meta = FieldMeta::to_one(name, EntityType::of::<T>());
        meta.relationship = RelationshipKind::OneToOne;
        meta.unique = true;
        self.push(meta, FieldAccessor::ToOne(Box::new(ToOneSlot { get, get_mut })))
    }

    /// A collection of `T` mapped by `inverse` on the element side. `inverse`
    /// names either a field of `T` or a column of `T`'s table.
    pub fn to_many<T: Entity>(
        self,
        name: &'static str,
        inverse: &str,
        get: fn(&E) -> &ToMany<T>,
        get_mut: fn(&mut E) -> &mut ToMany<T>,
    ) -> Self {
        self.push(
            FieldMeta::to_many(name, EntityType::of::<T>(), inverse.to_string()),
            FieldAccessor::ToMany(Box::new(ToManySlot { get, get_mut })),
        )
    }

    /// The id is assigned by the database on insert.
    pub fn generated(self) -> Self {
        self.modify("generated", |f| {
            if f.is_id {
                f.is_generated = true;
                Ok(())
            } else {
                Err(format!("'{}' is not the id field", f.name))
            }
        })
    }

    /// Override the column name.
    pub fn column_name(self, column: &str) -> Self {
        let column = column.to_string();
        self.modify("column_name", move |f| {
            if f.relationship.is_collection() {
                return Err(format!("collection '{}' has no column", f.name));
            }
            f.column_name = Some(column);
            Ok(())
        })
    }

    /// Declared storage type for a foreign key (BIGINT by default).
    pub fn key_type(self, value_type: ValueType) -> Self {
        self.modify("key_type", move |f| {
            f.value_type = value_type;
            Ok(())
        })
    }

    pub fn not_null(self) -> Self {
        self.modify("not_null", |f| {
            f.nullable = false;
            Ok(())
        })
    }

    pub fn unique(self) -> Self {
        self.modify("unique", |f| {
            f.unique = true;
            Ok(())
        })
    }

    /// Resolve this relationship while the owner is loaded.
    pub fn eager(self) -> Self {
        self.fetch(FetchMode::Eager)
    }

    /// Defer this relationship to first access.
    pub fn lazy(self) -> Self {
        self.fetch(FetchMode::Lazy)
    }

    /// Mark a collection as owned by this side.
    pub fn owned(self) -> Self {
        self.modify("owned", |f| {
            if f.relationship.is_collection() {
                f.relationship = RelationshipKind::ToManyOwned;
                Ok(())
            } else {
                Err(format!("'{}' is not a collection", f.name))
            }
        })
    }

    fn fetch(self, mode: FetchMode) -> Self {
        self.modify("fetch mode", move |f| {
            if f.relationship == RelationshipKind::None {
                Err(format!("'{}' is not a relationship", f.name))
            } else {
                f.fetch = mode;
                Ok(())
            }
        })
    }

    fn push(mut self, meta: FieldMeta, accessor: FieldAccessor<E>) -> Self {
        self.fields.push((meta, accessor));
        self
    }

    fn modify<F>(mut self, what: &str, f: F) -> Self
    where
        F: FnOnce(&mut FieldMeta) -> std::result::Result<(), String>,
    {
        if self.error.is_some() {
            return self;
        }
        match self.fields.last_mut() {
            Some((meta, _)) => {
                if let Err(message) = f(meta) {
                    self.error = Some(message);
                }
            }
            None => self.error = Some(format!("{} applied before any field", what)),
        }
        self
    }

    /// Validate and freeze the descriptor.
    pub fn build(self) -> Result<EntityDescriptor<E>> {
        let entity = EntityType::of::<E>();
        if let Some(message) = self.error {
            return Err(Error::Mapping(
                MappingError::new(MappingErrorKind::InvalidDescriptor, message)
                    .entity(entity.name()),
            ));
        }
        let (fields, accessors): (Vec<_>, Vec<_>) = self.fields.into_iter().unzip();
        let meta = EntityMeta::new(entity, self.table, fields)?;
        Ok(EntityDescriptor {
            meta,
            accessors,
            ctor: self.ctor,
        })
    }
}
