//! Generation-checked slot map from [`Entity`] to storage [`Location`].
//!
//! The free list is a FIFO queue (`free_head`/`free_tail`) rather than a
//! stack: recycling always appends at the tail and reservation always pops
//! from the head, so a retired index sits for as long as possible before
//! being handed back out. That spreads generation churn evenly across
//! slots instead of hammering whichever one was freed most recently.

use crate::{chunk_list::Location, error::Error, handle::Entity};

const NONE: u32 = u32::MAX;

/// A slot's generation counter never reaches `0` again once assigned; `0`
/// itself marks a slot that has never been reserved.
struct Slot {
    generation: u32,
    location: Location,
    live: bool,
    saturated: bool,
    free_next: u32,
}

pub(crate) struct HandleTable {
    slots: Vec<Slot>,
    capacity: u32,
    free_head: u32,
    free_tail: u32,
    live_count: u32,
    saturated_count: u32,
    warned_half_saturated: bool,
}

impl HandleTable {
    pub fn new(capacity: u32) -> Self {
        HandleTable {
            slots: Vec::with_capacity(capacity as usize),
            capacity,
            free_head: NONE,
            free_tail: NONE,
            live_count: 0,
            saturated_count: 0,
            warned_half_saturated: false,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn count(&self) -> u32 {
        self.live_count
    }

    pub fn saturated(&self) -> u32 {
        self.saturated_count
    }

    /// Allocates a slot with `location` set to [`Location::RESERVED`].
    /// `EntityOverflow` is returned only when every slot is live or
    /// saturated.
    pub fn reserve(&mut self) -> Result<Entity, Error> {
        let index = if self.free_head != NONE {
            let index = self.free_head;
            self.free_head = self.slots[index as usize].free_next;
            if self.free_head == NONE {
                self.free_tail = NONE;
            }
            index
        } else if (self.slots.len() as u32) < self.capacity {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                location: Location::RESERVED,
                live: false,
                saturated: false,
                free_next: NONE,
            });
            index
        } else {
            return Err(Error::EntityOverflow);
        };

        let slot = &mut self.slots[index as usize];
        // Generation 0 is reserved to mean "never used"; the first time a
        // slot is handed out it must carry a nonzero generation so its
        // handle never collides with `Entity::NONE`.
        if slot.generation == 0 {
            slot.generation = 1;
        }
        slot.live = true;
        slot.location = Location::RESERVED;
        self.live_count += 1;

        if !self.warned_half_saturated && self.saturated_count * 2 >= self.capacity.max(1) {
            self.warned_half_saturated = true;
            log::warn!(
                "handle table is {}% saturated ({}/{} slots retired)",
                self.saturated_count as u64 * 100 / self.capacity.max(1) as u64,
                self.saturated_count,
                self.capacity
            );
        }

        Ok(Entity::new(index, slot.generation))
    }

    /// Recycles `handle`'s slot: bumps its generation and returns it to the
    /// free list, unless its generation has saturated, in which case the
    /// slot is retired forever instead.
    pub fn recycle(&mut self, handle: Entity) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index() as usize) else {
            return false;
        };
        if !slot.live || slot.generation != handle.generation() {
            return false;
        }
        self.recycle_index(handle.index());
        true
    }

    fn recycle_index(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.live = false;
        slot.location = Location::RESERVED;
        if slot.generation == u32::MAX {
            slot.saturated = true;
            self.saturated_count += 1;
        } else {
            slot.generation += 1;
            slot.free_next = NONE;
            if self.free_tail == NONE {
                self.free_head = index;
            } else {
                self.slots[self.free_tail as usize].free_next = index;
            }
            self.free_tail = index;
        }
        self.live_count -= 1;
    }

    /// Destroys every live handle without running component destructors —
    /// callers that need drop glue (`Entities`'s teardown) must run it
    /// themselves before calling this.
    pub fn recycle_all(&mut self) {
        for index in 0..self.slots.len() as u32 {
            if self.slots[index as usize].live {
                self.recycle_index(index);
            }
        }
    }

    pub fn is_live(&self, handle: Entity) -> bool {
        self.slots
            .get(handle.index() as usize)
            .is_some_and(|slot| slot.live && slot.generation == handle.generation())
    }

    pub fn get(&self, handle: Entity) -> Option<Location> {
        let slot = self.slots.get(handle.index() as usize)?;
        (slot.live && slot.generation == handle.generation()).then_some(slot.location)
    }

    pub fn set_location(&mut self, handle: Entity, location: Location) -> bool {
        match self.slots.get_mut(handle.index() as usize) {
            Some(slot) if slot.live && slot.generation == handle.generation() => {
                slot.location = location;
                true
            }
            _ => false,
        }
    }

    /// Fixes up the location of whatever entity `swap_remove` just moved.
    /// `raw_index` comes straight out of a chunk's entity-index array, so
    /// it names a live slot by construction; no generation check is needed
    /// or possible (the caller has no handle, only the bare index).
    pub fn set_location_by_raw_index(&mut self, raw_index: u32, location: Location) {
        debug_assert!(self.slots[raw_index as usize].live);
        self.slots[raw_index as usize].location = location;
    }

    pub fn location_by_raw_index(&self, raw_index: u32) -> Location {
        self.slots[raw_index as usize].location
    }

    pub fn current_generation(&self, index: u32) -> Option<u32> {
        self.slots.get(index as usize).map(|s| s.generation)
    }

    /// Recycles a slot named by its bare index, trusting the caller (a
    /// chunk list walking its own entity-index array) that the slot is
    /// live. Used by `recycle_arch_immediate`, which never has a handle
    /// with a known generation to check against.
    pub fn recycle_raw_index(&mut self, index: u32) {
        self.recycle_index(index);
    }
}
