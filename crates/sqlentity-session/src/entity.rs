//! Shared entity references.
//!
//! Every managed entity lives behind an `Arc<RwLock<E>>` so that the
//! identity map, relationship handles and application code all observe the
//! same instance. The context stores them type-erased as [`AnyRef`].

use sqlentity_core::{Error, MappingError, MappingErrorKind, Result};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Marker for types that can be mapped and shared across handles.
pub trait Entity: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Entity for T {}

/// Type-erased entity reference. Always holds an `RwLock<E>`.
pub type AnyRef = Arc<dyn Any + Send + Sync>;

/// A guard for reading an entity.
pub type EntityReadGuard<'a, E> = RwLockReadGuard<'a, E>;

/// A guard for writing to an entity.
pub type EntityWriteGuard<'a, E> = RwLockWriteGuard<'a, E>;

/// A shared reference to an entity instance.
pub struct EntityRef<E>(Arc<RwLock<E>>);

impl<E: Entity> EntityRef<E> {
    /// Wrap a fresh (untracked) instance.
    pub fn new(entity: E) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    /// Lock for reading.
    pub fn read(&self) -> Result<EntityReadGuard<'_, E>> {
        self.0.read().map_err(|_| poisoned::<E>())
    }

    /// Lock for writing.
    pub fn write(&self) -> Result<EntityWriteGuard<'_, E>> {
        self.0.write().map_err(|_| poisoned::<E>())
    }

    /// Do both references point at the same instance?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Erase the entity type.
    pub fn to_any(&self) -> AnyRef {
        Arc::clone(&self.0) as AnyRef
    }

    /// Recover a typed reference; `None` if the instance is not an `E`.
    pub fn from_any(any: AnyRef) -> Option<Self> {
        any.downcast::<RwLock<E>>().ok().map(Self)
    }

    /// Like [`EntityRef::from_any`], reporting a mismatch as a mapping error.
    pub fn try_from_any(any: AnyRef) -> Result<Self> {
        Self::from_any(any).ok_or_else(|| {
            Error::Mapping(
                MappingError::new(MappingErrorKind::FieldAccess, "entity type mismatch")
                    .entity(short_name::<E>()),
            )
        })
    }
}

/// Same instance, irrespective of the static type each side was erased from.
pub fn same_instance(a: &AnyRef, b: &AnyRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Borrow the lock inside an erased reference.
pub(crate) fn downcast_lock<E: Entity>(any: &AnyRef) -> Result<&RwLock<E>> {
    any.downcast_ref::<RwLock<E>>().ok_or_else(|| {
        Error::Mapping(
            MappingError::new(MappingErrorKind::FieldAccess, "entity type mismatch")
                .entity(short_name::<E>()),
        )
    })
}

pub(crate) fn poisoned<E>() -> Error {
    Error::Mapping(
        MappingError::new(MappingErrorKind::FieldAccess, "entity lock poisoned")
            .entity(short_name::<E>()),
    )
}

fn short_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    full.rsplit("::").next().unwrap_or(full)
}

impl<E> Clone for EntityRef<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

// Identity only: formatting never takes the lock.
impl<E> fmt::Debug for EntityRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef<{}>({:p})", short_name::<E>(), Arc::as_ptr(&self.0))
    }
}
