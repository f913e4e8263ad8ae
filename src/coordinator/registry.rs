//! Worker slot registry
//!
//! A fixed table of slots, each Free or holding the handle of the worker
//! that registered into it. The slot index is the worker's id.

use std::fmt;

/// Why a worker id did not resolve to an occupied slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// Negative, or not below the slot count
    OutOfRange(i32),
    /// In range, but nobody is registered there
    Vacant(i32),
}

impl SlotError {
    /// The offending id
    pub fn id(&self) -> i32 {
        match self {
            SlotError::OutOfRange(id) | SlotError::Vacant(id) => *id,
        }
    }

    /// Short description for diagnostics
    pub fn reason(&self) -> &'static str {
        match self {
            SlotError::OutOfRange(_) => "out of range",
            SlotError::Vacant(_) => "not registered",
        }
    }
}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker id {} is {}", self.id(), self.reason())
    }
}

/// Registration refused because every slot is occupied
///
/// Gives the handle back to the caller, which still has to answer on it.
#[derive(Debug)]
pub struct Rejected<H>(pub H);

/// Bounded table of worker slots
#[derive(Debug)]
pub struct Registry<H> {
    slots: Vec<Option<H>>,
}

impl<H> Registry<H> {
    /// Create a registry with `capacity` free slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of free slots
    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Number of occupied slots
    pub fn occupied_count(&self) -> usize {
        self.capacity() - self.free_count()
    }

    /// Occupy the lowest free slot with `handle`
    pub fn register(&mut self, handle: H) -> Result<i32, Rejected<H>> {
        self.admit(handle).map(|(id, _)| id)
    }

    /// Like `register`, but keeps the stored handle in reach
    pub fn admit(&mut self, handle: H) -> Result<(i32, &H), Rejected<H>> {
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                let stored = self.slots[index].insert(handle);
                Ok((index as i32, &*stored))
            }
            None => Err(Rejected(handle)),
        }
    }

    /// Handle of the worker asking for a task
    pub fn ready(&self, id: i32) -> Result<&H, SlotError> {
        let index = self.index(id)?;
        self.slots[index].as_ref().ok_or(SlotError::Vacant(id))
    }

    /// Free the slot and hand back its handle
    pub fn disconnect(&mut self, id: i32) -> Result<H, SlotError> {
        let index = self.index(id)?;
        self.slots[index].take().ok_or(SlotError::Vacant(id))
    }

    /// Whether `id` names an occupied slot
    pub fn is_occupied(&self, id: i32) -> bool {
        self.ready(id).is_ok()
    }

    /// Occupied slots in id order
    pub fn occupied(&self) -> impl Iterator<Item = (i32, &H)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|h| (index as i32, h)))
    }

    /// Free every slot, yielding the handles in id order
    pub fn drain(&mut self) -> Vec<(i32, H)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.take().map(|h| (index as i32, h)))
            .collect()
    }

    fn index(&self, id: i32) -> Result<usize, SlotError> {
        usize::try_from(id)
            .ok()
            .filter(|&index| index < self.slots.len())
            .ok_or(SlotError::OutOfRange(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids<H>(registry: &Registry<H>) -> Vec<i32> {
        registry.occupied().map(|(id, _)| id).collect()
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry: Registry<&str> = Registry::new(3);
        assert_eq!(registry.capacity(), 3);
        assert_eq!(registry.free_count(), 3);
        assert_eq!(registry.occupied_count(), 0);
    }

    #[test]
    fn test_register_takes_lowest_free_slot() {
        let mut registry = Registry::new(3);
        assert_eq!(registry.register("a").unwrap(), 0);
        assert_eq!(registry.register("b").unwrap(), 1);
        assert_eq!(registry.register("c").unwrap(), 2);
    }

    #[test]
    fn test_admit_returns_stored_handle() {
        let mut registry = Registry::new(2);
        registry.register("a").unwrap();

        let (id, handle) = registry.admit("b").unwrap();
        assert_eq!((id, *handle), (1, "b"));
        assert!(matches!(registry.admit("c"), Err(Rejected("c"))));
    }

    #[test]
    fn test_full_registry_rejects_and_keeps_state() {
        let mut registry = Registry::new(2);
        registry.register("a").unwrap();
        registry.register("b").unwrap();

        let Rejected(handle) = registry.register("c").unwrap_err();
        assert_eq!(handle, "c");
        assert_eq!(ids(&registry), vec![0, 1]);
        assert_eq!(*registry.ready(0).unwrap(), "a");
        assert_eq!(*registry.ready(1).unwrap(), "b");
    }

    #[test]
    fn test_disconnect_frees_slot_for_reuse() {
        let mut registry = Registry::new(3);
        registry.register("a").unwrap();
        registry.register("b").unwrap();
        registry.register("c").unwrap();

        assert_eq!(registry.disconnect(1).unwrap(), "b");
        assert!(!registry.is_occupied(1));
        assert_eq!(registry.register("d").unwrap(), 1);
        assert_eq!(*registry.ready(1).unwrap(), "d");
    }

    #[test]
    fn test_lowest_free_slot_after_several_disconnects() {
        let mut registry = Registry::new(4);
        for h in ["a", "b", "c", "d"] {
            registry.register(h).unwrap();
        }
        registry.disconnect(3).unwrap();
        registry.disconnect(1).unwrap();
        assert_eq!(registry.register("e").unwrap(), 1);
        assert_eq!(registry.register("f").unwrap(), 3);
    }

    #[test]
    fn test_bad_ids_do_not_touch_state() {
        let mut registry = Registry::new(3);
        registry.register("a").unwrap();

        assert_eq!(registry.ready(-1).unwrap_err(), SlotError::OutOfRange(-1));
        assert_eq!(registry.ready(3).unwrap_err(), SlotError::OutOfRange(3));
        assert_eq!(registry.ready(2).unwrap_err(), SlotError::Vacant(2));
        assert_eq!(registry.disconnect(7).unwrap_err(), SlotError::OutOfRange(7));
        assert_eq!(registry.disconnect(1).unwrap_err(), SlotError::Vacant(1));

        assert_eq!(ids(&registry), vec![0]);
        assert_eq!(registry.free_count(), 2);
    }

    #[test]
    fn test_double_disconnect_is_stale() {
        let mut registry = Registry::new(2);
        registry.register("a").unwrap();
        registry.disconnect(0).unwrap();
        assert_eq!(registry.disconnect(0).unwrap_err(), SlotError::Vacant(0));
    }

    #[test]
    fn test_ids_stay_unique() {
        let mut registry = Registry::new(5);
        let mut taken = Vec::new();
        for round in 0..20 {
            match registry.register(round) {
                Ok(id) => taken.push(id),
                Err(_) => {
                    let victim = taken.remove(round % taken.len());
                    registry.disconnect(victim).unwrap();
                }
            }
            let mut live = ids(&registry);
            live.dedup();
            assert_eq!(live.len(), registry.occupied_count());
        }
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = Registry::new(3);
        registry.register("a").unwrap();
        registry.register("b").unwrap();
        registry.register("c").unwrap();
        registry.disconnect(1).unwrap();

        let drained = registry.drain();
        assert_eq!(drained, vec![(0, "a"), (2, "c")]);
        assert_eq!(registry.free_count(), 3);
    }

    #[test]
    fn test_slot_error_display() {
        assert_eq!(SlotError::OutOfRange(9).to_string(), "worker id 9 is out of range");
        assert_eq!(SlotError::Vacant(1).to_string(), "worker id 1 is not registered");
    }
}
