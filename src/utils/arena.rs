//! Generational arena
//!
//! Owns devices and client connections behind small copyable handles.
//! A handle stays valid until its entry is removed; a slot reused later
//! gets a new generation, so stale handles never alias a newer entry.

use std::fmt;

/// Stable handle into an [`Arena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Slot index (dense, reused after removal)
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Vec-backed arena with generation-checked handles
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            len: 0,
        }
    }

    /// Insert a value into the lowest free slot
    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.entries.iter().position(|e| e.value.is_none()) {
            let entry = &mut self.entries[index];
            entry.generation = entry.generation.wrapping_add(1);
            entry.value = Some(value);
            return Handle {
                index: index as u32,
                generation: entry.generation,
            };
        }
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        Handle {
            index: (self.entries.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.entries
            .get(handle.index())
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.entries
            .get_mut(handle.index())
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.value.as_mut())
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let entry = self
            .entries
            .get_mut(handle.index())
            .filter(|e| e.generation == handle.generation)?;
        let value = entry.value.take();
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            e.value.as_ref().map(|v| {
                (
                    Handle {
                        index: i as u32,
                        generation: e.generation,
                    },
                    v,
                )
            })
        })
    }

    /// Remove every entry, returning the values in slot order
    pub fn drain(&mut self) -> Vec<T> {
        self.len = 0;
        self.entries
            .iter_mut()
            .filter_map(|e| e.value.take())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_handle_does_not_alias_reused_slot() {
        let mut arena = Arena::new();
        let old = arena.insert(1);
        arena.remove(old);
        let new = arena.insert(2);
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn test_drain_empties() {
        let mut arena = Arena::new();
        arena.insert(1);
        let h = arena.insert(2);
        arena.insert(3);
        arena.remove(h);
        assert_eq!(arena.drain(), vec![1, 3]);
        assert!(arena.is_empty());
        assert_eq!(arena.iter().count(), 0);
    }
}
