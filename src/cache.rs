//! Optimistic client-side shape cache.
//!
//! Local mutations land here before the store confirms them. Each one
//! returns a [`Pending`] holding the values it overwrote so a failed remote
//! call can put exactly those back. Authoritative snapshots replace the
//! whole map; a rollback that predates the latest snapshot is dropped,
//! since the snapshot already says what the store holds.

use std::collections::HashMap;

use shapesync_core::time::Timestamp;
use shapesync_core::{LockFields, Shape, ShapeId, UserId};

/// Undo record for one optimistic mutation
#[derive(Debug, Clone, PartialEq)]
#[must_use = "roll back or discard the pending mutation"]
pub struct Pending {
    generation: u64,
    /// Pre-mutation value per touched id; `None` means the id was absent
    previous: Vec<(ShapeId, Option<Shape>)>,
}

impl Pending {
    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    pub fn shape_ids(&self) -> impl Iterator<Item = &ShapeId> {
        self.previous.iter().map(|(id, _)| id)
    }
}

/// Indexed shadow copy of the canvas
#[derive(Debug, Default)]
pub struct ShapeCache {
    /// Shapes in snapshot order
    shapes: Vec<Shape>,
    /// Fast lookup by ID
    by_id: HashMap<ShapeId, usize>,
    /// Bumped on every authoritative snapshot
    generation: u64,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with an authoritative snapshot
    pub fn replace_all(&mut self, snapshot: &[Shape]) {
        self.shapes = snapshot.to_vec();
        self.reindex();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn reindex(&mut self) {
        self.by_id.clear();
        for (idx, shape) in self.shapes.iter().enumerate() {
            self.by_id.insert(shape.id.clone(), idx);
        }
    }

    pub fn get(&self, id: &ShapeId) -> Option<&Shape> {
        self.by_id.get(id).map(|&idx| &self.shapes[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.iter()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Shapes the cache believes `user` holds
    pub fn locked_by(&self, user: &UserId) -> Vec<ShapeId> {
        self.shapes
            .iter()
            .filter(|s| s.lock_holder() == Some(user))
            .map(|s| s.id.clone())
            .collect()
    }

    fn begin(&self) -> Pending {
        Pending {
            generation: self.generation,
            previous: Vec::new(),
        }
    }

    /// Write `shape` (insert or overwrite), remembering what was there
    fn put(&mut self, pending: &mut Pending, shape: Shape) {
        let previous = self.get(&shape.id).cloned();
        pending.previous.push((shape.id.clone(), previous));
        self.set(shape);
    }

    fn set(&mut self, shape: Shape) {
        match self.by_id.get(&shape.id) {
            Some(&idx) => self.shapes[idx] = shape,
            None => {
                self.by_id.insert(shape.id.clone(), self.shapes.len());
                self.shapes.push(shape);
            }
        }
    }

    fn remove(&mut self, id: &ShapeId) -> Option<Shape> {
        let idx = self.by_id.remove(id)?;
        let shape = self.shapes.remove(idx);
        self.reindex();
        Some(shape)
    }

    // --- Optimistic mutations ---

    /// Insert new shapes
    pub fn apply_insert(&mut self, shapes: Vec<Shape>) -> Pending {
        let mut pending = self.begin();
        for shape in shapes {
            self.put(&mut pending, shape);
        }
        pending
    }

    /// Replace existing shapes with updated copies; unknown ids are skipped
    pub fn apply_update(&mut self, shapes: Vec<Shape>) -> Pending {
        let mut pending = self.begin();
        for shape in shapes {
            if self.by_id.contains_key(&shape.id) {
                self.put(&mut pending, shape);
            }
        }
        pending
    }

    pub fn apply_delete(&mut self, ids: &[ShapeId]) -> Pending {
        let mut pending = self.begin();
        for id in ids {
            if let Some(shape) = self.remove(id) {
                pending.previous.push((id.clone(), Some(shape)));
            }
        }
        pending
    }

    /// Lock `id` for `user` and unlock anything else `user` holds
    pub fn apply_lock(&mut self, id: &ShapeId, user: &UserId, now: Timestamp) -> Pending {
        let mut pending = self.begin();
        for other in self.locked_by(user) {
            if other != *id {
                self.set_lock(&mut pending, &other, LockFields::unlocked());
            }
        }
        self.set_lock(&mut pending, id, LockFields::held_by(user.clone(), now));
        pending
    }

    pub fn apply_unlock(&mut self, id: &ShapeId) -> Pending {
        let mut pending = self.begin();
        self.set_lock(&mut pending, id, LockFields::unlocked());
        pending
    }

    fn set_lock(&mut self, pending: &mut Pending, id: &ShapeId, lock: LockFields) {
        if let Some(shape) = self.get(id) {
            let mut shape = shape.clone();
            shape.lock = lock;
            self.put(pending, shape);
        }
    }

    /// Undo an optimistic mutation. Returns false when a snapshot arrived in
    /// between and the rollback was skipped.
    pub fn rollback(&mut self, pending: Pending) -> bool {
        if pending.generation != self.generation {
            return false;
        }
        // Reverse order so repeated writes to one id unwind to the first value
        for (id, previous) in pending.previous.into_iter().rev() {
            match previous {
                Some(shape) => self.restore(shape),
                None => {
                    self.remove(&id);
                }
            }
        }
        true
    }

    fn restore(&mut self, shape: Shape) {
        if self.by_id.contains_key(&shape.id) {
            self.set(shape);
            return;
        }
        // Deleted optimistically: put it back near its creation-order slot
        let idx = self
            .shapes
            .iter()
            .position(|s| (s.audit.created_at, &s.id) > (shape.audit.created_at, &shape.id))
            .unwrap_or(self.shapes.len());
        self.shapes.insert(idx, shape);
        self.reindex();
    }
}
