//! Fixed-capacity slab pool.
//!
//! Slots live in one preallocated `Vec`; vacant slots form an intrusive free
//! list threaded through the vacant variants, so both allocation and release
//! are O(1). The pool never grows past the capacity it was created with.

/// Index of an occupied slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u32);

impl SlotId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied(T),
    Vacant { next_free: Option<u32> },
}

/// Fixed-capacity arena of `T` records.
#[derive(Debug)]
pub struct SlabPool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> SlabPool<T> {
    /// Create a pool with room for exactly `capacity` records.
    ///
    /// Capacities beyond `u32::MAX` are clamped.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        let slots = (0..capacity)
            .map(|i| {
                let next = i + 1;
                Slot::Vacant {
                    next_free: (next < capacity).then_some(next as u32),
                }
            })
            .collect();

        Self {
            slots,
            free_head: (capacity > 0).then_some(0),
            len: 0,
        }
    }

    /// Store `value`, returning its slot, or hand the value back when full.
    pub fn allocate(&mut self, value: T) -> Result<SlotId, T> {
        let Some(index) = self.free_head else {
            return Err(value);
        };
        let slot = &mut self.slots[index as usize];
        let next_free = match slot {
            Slot::Vacant { next_free } => *next_free,
            // The free list only ever threads vacant slots.
            Slot::Occupied(_) => return Err(value),
        };
        *slot = Slot::Occupied(value);
        self.free_head = next_free;
        self.len += 1;
        Ok(SlotId(index))
    }

    /// Release a slot, returning its value. `None` if it was not occupied.
    pub fn free(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.get_mut(id.index())?;
        if matches!(slot, Slot::Vacant { .. }) {
            return None;
        }
        let previous = std::mem::replace(
            slot,
            Slot::Vacant {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(id.0);
        self.len -= 1;
        match previous {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        match self.slots.get(id.index())? {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        match self.slots.get_mut(id.index())? {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.free_head.is_none()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
