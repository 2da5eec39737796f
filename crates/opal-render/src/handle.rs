//! Generation-checked handles for renderer-owned resources.
//!
//! Handles are small `Copy` values the widget layer holds instead of
//! references. A destroyed slot bumps its generation, so a handle kept
//! across destruction is detected as stale instead of silently aliasing
//! whatever reuses the slot.

use std::marker::PhantomData;

use crate::error::RenderError;

pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn index(&self) -> u32 {
        self.index
    }
}

// Manual impls so `T` itself need not be Copy/Eq.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}
impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}
impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot map with generation checking and slot reuse.
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        HandleTable {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            Handle {
                index,
                generation: slot.generation,
                _marker: PhantomData,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            Handle {
                index,
                generation: 0,
                _marker: PhantomData,
            }
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Result<&T, RenderError> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
            .ok_or(RenderError::StaleHandle)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T, RenderError> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or(RenderError::StaleHandle)
    }

    /// Remove a value, invalidating every copy of its handle.
    pub fn remove(&mut self, handle: Handle<T>) -> Result<T, RenderError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(RenderError::StaleHandle)?;
        let value = slot.value.take().ok_or(RenderError::StaleHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }

    /// Remove everything, invalidating all outstanding handles.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(index as u32);
        }
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut table = HandleTable::new();
        let a = table.insert("alpha");
        let b = table.insert("beta");
        assert_eq!(*table.get(a).unwrap(), "alpha");
        assert_eq!(table.remove(b).unwrap(), "beta");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn stale_handles_are_rejected_after_reuse() {
        let mut table = HandleTable::new();
        let first = table.insert(1);
        table.remove(first).unwrap();

        // The slot is reused with a new generation.
        let second = table.insert(2);
        assert_eq!(first.index(), second.index());
        assert!(matches!(table.get(first), Err(RenderError::StaleHandle)));
        assert_eq!(*table.get(second).unwrap(), 2);
    }

    #[test]
    fn double_remove_fails() {
        let mut table = HandleTable::new();
        let h = table.insert(());
        table.remove(h).unwrap();
        assert!(table.remove(h).is_err());
    }

    #[test]
    fn clear_invalidates_outstanding_handles() {
        let mut table = HandleTable::new();
        let h = table.insert(5);
        table.clear();
        assert!(table.is_empty());
        assert!(table.get(h).is_err());
    }
}
