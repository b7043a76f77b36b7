//! Explicitly owned descriptor registry.
//!
//! Built once at startup, then shared read-only (usually behind an `Arc`)
//! by every session. There is no global metadata cache.

use crate::descriptor::{AnyDescriptor, EntityDescriptor};
use crate::entity::Entity;
use sqlentity_core::{EntityType, Error, MappingError, MappingErrorKind, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
pub struct EntityRegistry {
    descriptors: HashMap<EntityType, Arc<dyn AnyDescriptor>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one for `E`.
    pub fn register<E: Entity>(&mut self, descriptor: EntityDescriptor<E>) -> &mut Self {
        let entity = EntityType::of::<E>();
        tracing::debug!(
            entity = %entity,
            table = %descriptor.meta().table_name,
            "registered entity descriptor"
        );
        self.descriptors.insert(entity, Arc::new(descriptor));
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with<E: Entity>(mut self, descriptor: EntityDescriptor<E>) -> Self {
        self.register(descriptor);
        self
    }

    /// The typed descriptor for `E`.
    pub fn describe<E: Entity>(&self) -> Result<&EntityDescriptor<E>> {
        let entity = EntityType::of::<E>();
        self.describe_type(entity)?
            .as_any()
            .downcast_ref::<EntityDescriptor<E>>()
            .ok_or_else(|| unregistered(entity))
    }

    /// The type-erased descriptor for `entity`.
    pub fn describe_type(&self, entity: EntityType) -> Result<&dyn AnyDescriptor> {
        self.descriptors
            .get(&entity)
            .map(|d| d.as_ref())
            .ok_or_else(|| unregistered(entity))
    }

    pub fn contains(&self, entity: EntityType) -> bool {
        self.descriptors.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Check that every relationship points at a registered type and that
    /// every collection's inverse side exists.
    pub fn validate(&self) -> Result<()> {
        for descriptor in self.descriptors.values() {
            let meta = descriptor.meta();
            for field in &meta.fields {
                let Some(target) = field.target else {
                    continue;
                };
                let target_meta = self
                    .describe_type(target)
                    .map_err(|_| {
                        Error::Mapping(
                            MappingError::new(
                                MappingErrorKind::UnregisteredType,
                                format!("relationship target {} is not registered", target),
                            )
                            .entity(meta.entity.name())
                            .field(field.name),
                        )
                    })?
                    .meta();
                if let Some(inverse) = &field.inverse_field {
                    if target_meta.field(inverse).is_none()
                        && target_meta.field_by_column(inverse).is_none()
                    {
                        return Err(Error::Mapping(
                            MappingError::new(
                                MappingErrorKind::UnknownField,
                                format!("{} has no field or column '{}'", target, inverse),
                            )
                            .entity(meta.entity.name())
                            .field(field.name),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn unregistered(entity: EntityType) -> Error {
    Error::Mapping(
        MappingError::new(MappingErrorKind::UnregisteredType, "no descriptor registered")
            .entity(entity.name()),
    )
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tables: Vec<&str> = self
            .descriptors
            .values()
            .map(|d| d.meta().table_name.as_str())
            .collect();
        tables.sort_unstable();
        f.debug_struct("EntityRegistry")
            .field("tables", &tables)
            .finish()
    }
}
