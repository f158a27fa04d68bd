use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gpuwire_protocol::handle::{ObjectHandle, ObjectType, DEVICE_ID};

use crate::error::CoreError;

/// Per-endpoint map from wire identity to a locally owned object.
/// The client stores proxy state here, the server stores backend objects.
///
/// Entries are keyed by the full `(type, id)` handle, so identities are
/// scoped per type and a type-confused reference can never alias another
/// object.
pub struct ObjectTable<T> {
    entries: DashMap<ObjectHandle, T>,
}

impl<T> ObjectTable<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register an object. Fails if the handle is already live.
    pub fn insert(&self, handle: ObjectHandle, object: T) -> Result<(), CoreError> {
        match self.entries.entry(handle) {
            Entry::Occupied(_) => Err(CoreError::DuplicateHandle(handle)),
            Entry::Vacant(slot) => {
                slot.insert(object);
                Ok(())
            }
        }
    }

    /// Run `f` against a live entry of the expected type.
    pub fn with<R>(
        &self,
        handle: ObjectHandle,
        expected: ObjectType,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, CoreError> {
        if handle.ty != expected {
            return Err(CoreError::TypeMismatch { handle, expected });
        }
        let mut entry = self
            .entries
            .get_mut(&handle)
            .ok_or(CoreError::HandleNotFound(handle))?;
        Ok(f(entry.value_mut()))
    }

    /// Remove an entry. Absent handles are a no-op: destruction may race
    /// with session teardown.
    pub fn remove(&self, handle: ObjectHandle) -> Option<T> {
        self.entries.remove(&handle).map(|(_, v)| v)
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Number of live entries of one type.
    pub fn count(&self, ty: ObjectType) -> usize {
        self.entries.iter().filter(|e| e.key().ty == ty).count()
    }

    /// Visit every entry mutably. Order is unspecified.
    pub fn for_each_mut(&self, mut f: impl FnMut(ObjectHandle, &mut T)) {
        for mut entry in self.entries.iter_mut() {
            let handle = *entry.key();
            f(handle, entry.value_mut());
        }
    }

    /// Take every entry out of the table, newest identity first within
    /// each type, so dependents are released before what they were built from.
    pub fn drain(&self) -> Vec<(ObjectHandle, T)> {
        let mut handles: Vec<ObjectHandle> = self.entries.iter().map(|e| *e.key()).collect();
        handles.sort_by(|a, b| b.cmp(a));
        handles
            .into_iter()
            .filter_map(|h| self.entries.remove(&h))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> ObjectTable<T> {
    /// Look up a live entry of the expected type.
    pub fn resolve(&self, handle: ObjectHandle, expected: ObjectType) -> Result<T, CoreError> {
        self.with(handle, expected, |object| object.clone())
    }
}

impl<T> Default for ObjectTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-side identity allocator. One monotonically increasing counter per
/// object type; identities are never handed out twice.
pub struct IdAllocator {
    next: [AtomicU32; ObjectType::COUNT],
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Allocator whose counters all begin at `first`. The device counter
    /// never goes below the identity after the bootstrap device.
    pub fn starting_at(first: u32) -> Self {
        let next: [AtomicU32; ObjectType::COUNT] = std::array::from_fn(|_| AtomicU32::new(first));
        next[ObjectType::Device.index()].store(first.max(DEVICE_ID + 1), Ordering::Relaxed);
        Self { next }
    }

    /// Allocate the next identity for `ty`. Fails once the type's identity
    /// space is used up instead of wrapping around.
    pub fn alloc(&self, ty: ObjectType) -> Result<ObjectHandle, CoreError> {
        self.next[ty.index()]
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .map(|id| ObjectHandle::new(ty, id))
            .map_err(|_| CoreError::IdentitiesExhausted(ty))
    }

    /// The identity `alloc` would return next for `ty`.
    pub fn peek(&self, ty: ObjectType) -> u32 {
        self.next[ty.index()].load(Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
