//! Deferred relationship handles.
//!
//! [`ToOne<T>`] and [`ToMany<T>`] stand in for relationship fields. A handle
//! is either already loaded or holds what it needs to load itself later (a
//! foreign key, or an inverse column plus the owner id). Realization is
//! explicit: call `get` with a [`RelationLoader`], usually the session.
//!
//! # Concurrency
//!
//! A handle may be reached from several threads before it is resolved.
//! Realization goes check, lock, check again, load once, publish. Concurrent
//! callers therefore trigger exactly one underlying load and all observe the
//! same cached value. Once published the value is read without locking.
//!
//! A loader error leaves the handle unloaded so a later call can retry.
//!
//! Clones share state: realizing one clone realizes them all.

use crate::entity::{Entity, EntityRef};
use crate::resolver::RelationLoader;
use sqlentity_core::{EntityKey, Error, MappingError, MappingErrorKind, Result, Value};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

struct ToOneState<T> {
    fk: Option<Value>,
    owner: Option<EntityKey>,
    cell: OnceLock<Option<EntityRef<T>>>,
    gate: Mutex<()>,
}

/// A to-one relationship value.
pub struct ToOne<T> {
    state: Arc<ToOneState<T>>,
}

impl<T: Entity> ToOne<T> {
    fn from_state(fk: Option<Value>, owner: Option<EntityKey>, loaded: Option<Option<EntityRef<T>>>) -> Self {
        let cell = OnceLock::new();
        if let Some(value) = loaded {
            let _ = cell.set(value);
        }
        Self {
            state: Arc::new(ToOneState {
                fk,
                owner,
                cell,
                gate: Mutex::new(()),
            }),
        }
    }

    /// A loaded handle pointing at `target`.
    pub fn new(target: EntityRef<T>) -> Self {
        Self::from_state(None, None, Some(Some(target)))
    }

    /// A loaded handle with no related entity.
    pub fn none() -> Self {
        Self::from_state(None, None, Some(None))
    }

    /// An unloaded handle that will resolve `fk` on first access.
    ///
    /// A NULL key resolves to no related entity.
    pub fn from_fk(fk: impl Into<Value>) -> Self {
        Self::from_state(Some(fk.into()), None, None)
    }

    pub(crate) fn deferred(fk: Value, owner: Option<EntityKey>) -> Self {
        Self::from_state(Some(fk), owner, None)
    }

    /// Has the handle been realized?
    pub fn is_loaded(&self) -> bool {
        self.state.cell.get().is_some()
    }

    /// The foreign key this handle was created from, if any.
    pub fn fk(&self) -> Option<&Value> {
        self.state.fk.as_ref()
    }

    /// The entity whose field this handle was created for.
    pub fn owner(&self) -> Option<&EntityKey> {
        self.state.owner.as_ref()
    }

    /// The loaded value without triggering a load.
    ///
    /// `None` while unloaded; `Some(None)` when loaded with no related entity.
    pub fn peek(&self) -> Option<Option<EntityRef<T>>> {
        self.state.cell.get().cloned()
    }

    /// Realize through `loader`, loading at most once.
    pub fn get<L: RelationLoader + ?Sized>(&self, loader: &mut L) -> Result<Option<EntityRef<T>>> {
        self.get_with(|fk| loader.load_one::<T>(fk))
    }

    /// Realize with an explicit load callback, invoked at most once.
    pub fn get_with<F>(&self, load: F) -> Result<Option<EntityRef<T>>>
    where
        F: FnOnce(&Value) -> Result<Option<EntityRef<T>>>,
    {
        if let Some(value) = self.state.cell.get() {
            return Ok(value.clone());
        }
        let _gate = self.state.gate.lock().map_err(|_| gate_poisoned())?;
        if let Some(value) = self.state.cell.get() {
            return Ok(value.clone());
        }

        let value = match &self.state.fk {
            Some(fk) if !fk.is_null() => load(fk)?,
            _ => None,
        };
        tracing::trace!(
            owner = ?self.state.owner,
            found = value.is_some(),
            "to-one handle realized"
        );
        let _ = self.state.cell.set(value.clone());
        Ok(value)
    }

    /// Where the foreign key for this handle comes from at bind time.
    pub(crate) fn bind_source(&self) -> BindSource<T> {
        match self.state.cell.get() {
            Some(Some(target)) => BindSource::Target(target.clone()),
            // A key with no matching row is kept as it was read.
            Some(None) | None => BindSource::Value(self.state.fk.clone().unwrap_or(Value::Null)),
        }
    }

    /// Do both handles share state?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

pub(crate) enum BindSource<T> {
    Value(Value),
    Target(EntityRef<T>),
}

impl<T: Entity> Default for ToOne<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> Clone for ToOne<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for ToOne<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ToOne");
        match self.state.cell.get() {
            Some(Some(target)) => s.field("loaded", target),
            Some(None) => s.field("loaded", &Option::<()>::None),
            None => s.field("fk", &self.state.fk),
        };
        s.finish()
    }
}

struct ToManyState<T> {
    inverse: Option<String>,
    owner_id: Option<Value>,
    owner: Option<EntityKey>,
    cell: OnceLock<Vec<EntityRef<T>>>,
    gate: Mutex<()>,
}

/// A to-many relationship value.
///
/// Element access (`get`, `len`, `contains`) realizes the collection;
/// formatting with `{:?}` does not.
pub struct ToMany<T> {
    state: Arc<ToManyState<T>>,
}

impl<T: Entity> ToMany<T> {
    fn from_state(
        inverse: Option<String>,
        owner_id: Option<Value>,
        owner: Option<EntityKey>,
        loaded: Option<Vec<EntityRef<T>>>,
    ) -> Self {
        let cell = OnceLock::new();
        if let Some(items) = loaded {
            let _ = cell.set(items);
        }
        Self {
            state: Arc::new(ToManyState {
                inverse,
                owner_id,
                owner,
                cell,
                gate: Mutex::new(()),
            }),
        }
    }

    /// A loaded collection.
    pub fn new(items: Vec<EntityRef<T>>) -> Self {
        Self::from_state(None, None, None, Some(items))
    }

    /// An unloaded collection of the elements whose `inverse` field (or
    /// column) equals `owner_id`.
    pub fn inverse(inverse: impl Into<String>, owner_id: impl Into<Value>) -> Self {
        Self::from_state(Some(inverse.into()), Some(owner_id.into()), None, None)
    }

    pub(crate) fn deferred(inverse: &str, owner_id: Value, owner: Option<EntityKey>) -> Self {
        Self::from_state(Some(inverse.to_string()), Some(owner_id), owner, None)
    }

    pub fn is_loaded(&self) -> bool {
        self.state.cell.get().is_some()
    }

    pub fn owner(&self) -> Option<&EntityKey> {
        self.state.owner.as_ref()
    }

    /// The loaded elements without triggering a load.
    pub fn peek(&self) -> Option<&[EntityRef<T>]> {
        self.state.cell.get().map(Vec::as_slice)
    }

    /// Realize through `loader` and return the elements.
    pub fn get<L: RelationLoader + ?Sized>(&self, loader: &mut L) -> Result<&[EntityRef<T>]> {
        self.get_with(|inverse, owner_id| loader.load_many::<T>(inverse, owner_id))
    }

    /// Realize with an explicit load callback, invoked at most once.
    pub fn get_with<F>(&self, load: F) -> Result<&[EntityRef<T>]>
    where
        F: FnOnce(&str, &Value) -> Result<Vec<EntityRef<T>>>,
    {
        if let Some(items) = self.state.cell.get() {
            return Ok(items);
        }
        let _gate = self.state.gate.lock().map_err(|_| gate_poisoned())?;
        if let Some(items) = self.state.cell.get() {
            return Ok(items);
        }

        let items = match (&self.state.inverse, &self.state.owner_id) {
            (Some(inverse), Some(owner_id)) if !owner_id.is_null() => load(inverse, owner_id)?,
            _ => Vec::new(),
        };
        tracing::trace!(
            owner = ?self.state.owner,
            count = items.len(),
            "to-many handle realized"
        );
        let _ = self.state.cell.set(items);
        Ok(self.state.cell.get().map(Vec::as_slice).unwrap_or_default())
    }

    pub fn len<L: RelationLoader + ?Sized>(&self, loader: &mut L) -> Result<usize> {
        Ok(self.get(loader)?.len())
    }

    pub fn is_empty<L: RelationLoader + ?Sized>(&self, loader: &mut L) -> Result<bool> {
        Ok(self.get(loader)?.is_empty())
    }

    /// Membership by instance identity.
    pub fn contains<L: RelationLoader + ?Sized>(
        &self,
        loader: &mut L,
        item: &EntityRef<T>,
    ) -> Result<bool> {
        Ok(self.get(loader)?.iter().any(|e| e.ptr_eq(item)))
    }
}

impl<T: Entity> Default for ToMany<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T> Clone for ToMany<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for ToMany<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ToMany");
        match self.state.cell.get() {
            Some(items) => s.field("loaded", &items.len()),
            None => s
                .field("inverse", &self.state.inverse)
                .field("owner_id", &self.state.owner_id),
        };
        s.finish()
    }
}

fn gate_poisoned() -> Error {
    Error::Mapping(MappingError::new(
        MappingErrorKind::FieldAccess,
        "relationship handle lock poisoned",
    ))
}

/// Issues deferred handles for LAZY relationship fields during loading.
///
/// Handles created here remember which entity they belong to.
#[derive(Debug, Default)]
pub struct LazyFactory {
    created: AtomicUsize,
}

impl LazyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A deferred to-one handle for `owner`'s field holding `fk`.
    pub fn to_one<T: Entity>(&self, owner: Option<&EntityKey>, fk: Value) -> ToOne<T> {
        self.created.fetch_add(1, Ordering::Relaxed);
        ToOne::deferred(fk, owner.cloned())
    }

    /// A deferred collection of `T` rows whose `inverse` matches `owner_id`.
    pub fn to_many<T: Entity>(&self, owner: Option<&EntityKey>, inverse: &str, owner_id: Value) -> ToMany<T> {
        self.created.fetch_add(1, Ordering::Relaxed);
        ToMany::deferred(inverse, owner_id, owner.cloned())
    }

    /// Number of handles issued so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}
