//! Flush: write a unit of work to the database in a fixed order.
//!
//! 1. queued INSERTs, in queue order (generated ids are written back and the
//!    entity is re-keyed and re-snapshotted)
//! 2. dirty check over every MANAGED entity
//! 3. one UPDATE per dirty entity, then a fresh snapshot
//! 4. queued DELETEs, in queue order
//! 5. both queues cleared
//!
//! A queued entity leaves its queue as soon as its statement succeeds, so
//! flushing again after a failure picks up where the failed flush stopped.
//!
//! The first failing statement aborts the rest. Nothing is undone here:
//! statements already executed stay in the open transaction until the caller
//! rolls back.

use crate::context::{LifecycleState, PersistenceContext};
use crate::persister::EntityPersister;
use sqlentity_core::{EntityKey, Result};
use std::time::Instant;

/// Row counts written by one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushResult {
    /// Number of rows inserted.
    pub inserted: usize,
    /// Number of rows updated.
    pub updated: usize,
    /// Number of rows deleted.
    pub deleted: usize,
}

impl FlushResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[tracing::instrument(level = "info", skip_all)]
pub(crate) fn flush(context: &mut PersistenceContext, persister: &EntityPersister<'_>) -> Result<FlushResult> {
    tracing::info!(
        inserts = context.pending_inserts().len(),
        deletes = context.pending_deletes().len(),
        "Executing flush"
    );
    let start = Instant::now();
    let mut result = FlushResult::new();
    let registry = persister.registry();

    // 1. Inserts
    let inserts = context.pending_inserts().to_vec();
    for pending in &inserts {
        let descriptor = registry.describe_type(pending.entity_type)?;
        let generated = persister.insert(descriptor, &pending.instance)?;
        let key = match generated {
            Some(id) => context.rekey(pending.entity_type, &pending.instance, id)?,
            None => context.register(
                pending.entity_type,
                pending.instance.clone(),
                LifecycleState::Managed,
            )?,
        };
        context.cancel_insert(&pending.instance);
        tracing::trace!(key = %key, "inserted");
        result.inserted += 1;
    }

    // 2-3. Dirty check and updates
    for (key, instance) in context.detect_dirty()? {
        let descriptor = registry.describe_type(key.entity)?;
        persister.update(descriptor, &instance)?;
        context.refresh_snapshot(&key)?;
        result.updated += 1;
    }

    // 4. Deletes
    let deletes = context.pending_deletes().to_vec();
    for pending in &deletes {
        let descriptor = registry.describe_type(pending.entity_type)?;
        persister.delete(descriptor, &pending.instance)?;
        context.cancel_delete(&pending.instance);
        let id = descriptor.id_value(&pending.instance)?;
        if let Ok(key) = EntityKey::new(pending.entity_type, &id) {
            context.remove(&key);
        }
        result.deleted += 1;
    }

    // 5.
    context.clear_queues();

    tracing::info!(
        elapsed_ms = start.elapsed().as_millis(),
        inserted = result.inserted,
        updated = result.updated,
        deleted = result.deleted,
        "Flush complete"
    );
    Ok(result)
}
