//! Persistence context: identity map, snapshots and pending-operation queues.
//!
//! Every tracked instance is keyed by `(entity type, id)` and carries a
//! snapshot of its persistable values taken when it was registered or last
//! flushed. Instances without an id are never in the map; they only sit in
//! the insert queue until the flush gives them one.

use crate::entity::{AnyRef, same_instance};
use crate::registry::EntityRegistry;
use sqlentity_core::{EntityKey, EntityType, Result, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Managed,
    Removed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Managed => write!(f, "MANAGED"),
            LifecycleState::Removed => write!(f, "REMOVED"),
        }
    }
}

struct Entry {
    instance: AnyRef,
    snapshot: Vec<Value>,
    state: LifecycleState,
    /// Registration order, used to keep flush output deterministic.
    seq: u64,
}

/// An entity waiting in an insert or delete queue.
#[derive(Clone)]
pub struct Pending {
    pub entity_type: EntityType,
    pub instance: AnyRef,
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("entity_type", &self.entity_type)
            .finish_non_exhaustive()
    }
}

/// Identity map plus unit-of-work queues for one session.
pub struct PersistenceContext {
    registry: Arc<EntityRegistry>,
    entries: HashMap<EntityKey, Entry>,
    pending_inserts: Vec<Pending>,
    pending_deletes: Vec<Pending>,
    next_seq: u64,
}

impl PersistenceContext {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self {
            registry,
            entries: HashMap::new(),
            pending_inserts: Vec::new(),
            pending_deletes: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Track `instance` under its current id and snapshot its state.
    ///
    /// Re-registering a key keeps its original position in the flush order.
    /// Fails with `MissingId` when the instance has no id.
    #[tracing::instrument(level = "trace", skip(self, instance))]
    pub fn register(
        &mut self,
        entity_type: EntityType,
        instance: AnyRef,
        state: LifecycleState,
    ) -> Result<EntityKey> {
        let descriptor = self.registry.describe_type(entity_type)?;
        let id = descriptor.id_value(&instance)?;
        let key = EntityKey::new(entity_type, &id)?;
        let snapshot = descriptor.column_values(&instance, &self.registry)?;
        tracing::trace!(key = %key, snapshot_values = snapshot.len(), "Taking entity snapshot");

        let seq = match self.entries.get(&key) {
            Some(existing) => {
                if !same_instance(&existing.instance, &instance) {
                    tracing::warn!(key = %key, "replacing a different instance in the identity map");
                }
                existing.seq
            }
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.entries.insert(
            key.clone(),
            Entry {
                instance,
                snapshot,
                state,
                seq,
            },
        );
        Ok(key)
    }

    /// The tracked instance for `(entity_type, id)`, whatever its state.
    pub fn lookup(&self, entity_type: EntityType, id: &Value) -> Option<AnyRef> {
        let key = EntityKey::new(entity_type, id).ok()?;
        self.lookup_key(&key)
    }

    pub fn lookup_key(&self, key: &EntityKey) -> Option<AnyRef> {
        self.entries.get(key).map(|e| Arc::clone(&e.instance))
    }

    pub fn state(&self, key: &EntityKey) -> Option<LifecycleState> {
        self.entries.get(key).map(|e| e.state)
    }

    pub fn contains(&self, entity_type: EntityType, id: &Value) -> bool {
        EntityKey::new(entity_type, id).is_ok_and(|key| self.entries.contains_key(&key))
    }

    /// The key `instance` is tracked under, if this exact instance is in the
    /// identity map.
    pub fn key_of(&self, entity_type: EntityType, instance: &AnyRef) -> Result<Option<EntityKey>> {
        let id = self.registry.describe_type(entity_type)?.id_value(instance)?;
        let Ok(key) = EntityKey::new(entity_type, &id) else {
            return Ok(None);
        };
        Ok(self
            .entries
            .get(&key)
            .filter(|e| same_instance(&e.instance, instance))
            .map(|_| key))
    }

    /// Flip a tracked entity to REMOVED. Returns `false` if it is not tracked.
    pub fn mark_removed(&mut self, entity_type: EntityType, instance: &AnyRef) -> Result<bool> {
        let Some(key) = self.key_of(entity_type, instance)? else {
            return Ok(false);
        };
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.state = LifecycleState::Removed;
        }
        Ok(true)
    }

    pub fn mark_managed(&mut self, key: &EntityKey) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.state = LifecycleState::Managed;
                true
            }
            None => false,
        }
    }

    /// Queue an INSERT. Returns `false` if the instance is already queued.
    pub fn schedule_insert(&mut self, entity_type: EntityType, instance: AnyRef) -> bool {
        schedule(&mut self.pending_inserts, entity_type, instance)
    }

    /// Queue a DELETE. Returns `false` if the instance is already queued.
    pub fn schedule_delete(&mut self, entity_type: EntityType, instance: AnyRef) -> bool {
        schedule(&mut self.pending_deletes, entity_type, instance)
    }

    pub fn cancel_insert(&mut self, instance: &AnyRef) -> bool {
        cancel(&mut self.pending_inserts, instance)
    }

    pub fn cancel_delete(&mut self, instance: &AnyRef) -> bool {
        cancel(&mut self.pending_deletes, instance)
    }

    pub fn is_scheduled_for_insert(&self, instance: &AnyRef) -> bool {
        self.pending_inserts
            .iter()
            .any(|p| same_instance(&p.instance, instance))
    }

    pub fn is_scheduled_for_delete(&self, instance: &AnyRef) -> bool {
        self.pending_deletes
            .iter()
            .any(|p| same_instance(&p.instance, instance))
    }

    /// MANAGED entities whose current values differ from their snapshot, in
    /// registration order.
    pub fn detect_dirty(&self) -> Result<Vec<(EntityKey, AnyRef)>> {
        let mut managed: Vec<(&EntityKey, &Entry)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == LifecycleState::Managed)
            .collect();
        managed.sort_by_key(|(_, e)| e.seq);

        let mut dirty = Vec::new();
        for (key, entry) in managed {
            if self.differs(key, entry)? {
                dirty.push((key.clone(), Arc::clone(&entry.instance)));
            }
        }
        tracing::debug!(dirty = dirty.len(), "dirty check complete");
        Ok(dirty)
    }

    /// Has this tracked entity changed since its snapshot?
    pub fn is_dirty(&self, key: &EntityKey) -> Result<bool> {
        match self.entries.get(key) {
            Some(entry) => self.differs(key, entry),
            None => Ok(false),
        }
    }

    fn differs(&self, key: &EntityKey, entry: &Entry) -> Result<bool> {
        let current = self
            .registry
            .describe_type(key.entity)?
            .column_values(&entry.instance, &self.registry)?;
        Ok(current != entry.snapshot)
    }

    /// Write a freshly generated id into `instance` and track it as MANAGED.
    pub fn rekey(&mut self, entity_type: EntityType, instance: &AnyRef, id: Value) -> Result<EntityKey> {
        let descriptor = self.registry.describe_type(entity_type)?;
        let previous = descriptor.id_value(instance)?;
        if let Ok(old) = EntityKey::new(entity_type, &previous) {
            if self
                .entries
                .get(&old)
                .is_some_and(|e| same_instance(&e.instance, instance))
            {
                self.entries.remove(&old);
            }
        }
        descriptor.assign_id(instance, id)?;
        self.register(entity_type, Arc::clone(instance), LifecycleState::Managed)
    }

    /// Re-take the snapshot after the entity's state reached the database.
    pub fn refresh_snapshot(&mut self, key: &EntityKey) -> Result<()> {
        let Some(instance) = self.lookup_key(key) else {
            return Ok(());
        };
        let snapshot = self
            .registry
            .describe_type(key.entity)?
            .column_values(&instance, &self.registry)?;
        if let Some(entry) = self.entries.get_mut(key) {
            entry.snapshot = snapshot;
        }
        Ok(())
    }

    /// Drop an entry from the identity map.
    pub fn remove(&mut self, key: &EntityKey) -> Option<AnyRef> {
        self.entries.remove(key).map(|e| e.instance)
    }

    /// Stop tracking `(entity_type, id)` and drop it from both queues.
    pub fn detach(&mut self, entity_type: EntityType, id: &Value) -> bool {
        let Ok(key) = EntityKey::new(entity_type, id) else {
            return false;
        };
        let Some(entry) = self.entries.remove(&key) else {
            return false;
        };
        cancel(&mut self.pending_inserts, &entry.instance);
        cancel(&mut self.pending_deletes, &entry.instance);
        tracing::debug!(key = %key, "entity detached");
        true
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.clear_queues();
    }

    pub fn clear_queues(&mut self) {
        self.pending_inserts.clear();
        self.pending_deletes.clear();
    }

    pub fn pending_inserts(&self) -> &[Pending] {
        &self.pending_inserts
    }

    pub fn pending_deletes(&self) -> &[Pending] {
        &self.pending_deletes
    }

    pub fn snapshot(&self, key: &EntityKey) -> Option<&[Value]> {
        self.entries.get(key).map(|e| e.snapshot.as_slice())
    }

    pub fn managed_count(&self) -> usize {
        self.count(LifecycleState::Managed)
    }

    pub fn removed_count(&self) -> usize {
        self.count(LifecycleState::Removed)
    }

    fn count(&self, state: LifecycleState) -> usize {
        self.entries.values().filter(|e| e.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn schedule(queue: &mut Vec<Pending>, entity_type: EntityType, instance: AnyRef) -> bool {
    if queue.iter().any(|p| same_instance(&p.instance, &instance)) {
        return false;
    }
    queue.push(Pending {
        entity_type,
        instance,
    });
    true
}

fn cancel(queue: &mut Vec<Pending>, instance: &AnyRef) -> bool {
    let before = queue.len();
    queue.retain(|p| !same_instance(&p.instance, instance));
    queue.len() != before
}

impl fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("managed", &self.managed_count())
            .field("removed", &self.removed_count())
            .field("pending_inserts", &self.pending_inserts.len())
            .field("pending_deletes", &self.pending_deletes.len())
            .finish()
    }
}
