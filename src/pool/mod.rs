//! Generic recycling pool for scene-graph render objects.
//!
//! Objects live in an arena of slots addressed by generational
//! [`PoolHandle`]s. Releasing bumps the slot generation, so a handle kept
//! past its release resolves to nothing instead of to the slot's next
//! occupant.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::scene::SceneHost;

/// An object that can live in an [`ObjectPool`].
pub trait Pooled {
    /// Returns the object to its inert default state (hidden, untagged,
    /// empty arrays) so it can be handed out again.
    fn reset(&mut self, stage: &mut dyn SceneHost);

    /// Removes the object from the scene for good.
    fn destroy(&mut self, stage: &mut dyn SceneHost);
}

/// Generational reference to a pooled object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    index: u32,
    generation: u32,
}

impl PoolHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    object: Option<T>,
    generation: u32,
    active: bool,
}

/// Snapshot of a pool's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub capacity: usize,
    pub constructed: usize,
    pub active: usize,
    pub growth_events: u64,
}

type Factory<T> = Box<dyn FnMut(u64, &mut dyn SceneHost) -> T + Send>;

/// Recycling arena of `T`.
///
/// With reuse enabled, released objects are reset and parked until the next
/// acquire. With reuse disabled every acquire constructs a fresh object and
/// every release destroys it.
pub struct ObjectPool<T> {
    slots: Vec<Slot<T>>,
    /// Slots holding a constructed but inactive object.
    inactive: VecDeque<u32>,
    /// Slots whose object was destroyed.
    vacant: Vec<u32>,
    capacity: usize,
    growth_events: u64,
    next_object_id: u64,
    reuse: bool,
    factory: Factory<T>,
}

impl<T: Pooled> ObjectPool<T> {
    pub fn new(
        initial_capacity: usize,
        reuse: bool,
        factory: impl FnMut(u64, &mut dyn SceneHost) -> T + Send + 'static,
    ) -> Self {
        Self {
            slots: Vec::new(),
            inactive: VecDeque::new(),
            vacant: Vec::new(),
            capacity: initial_capacity,
            growth_events: 0,
            next_object_id: 0,
            reuse,
            factory: Box::new(factory),
        }
    }

    /// Hands out an inactive object, constructing one when none is parked.
    /// Exceeding the capacity doubles it and logs the growth.
    pub fn acquire(&mut self, stage: &mut dyn SceneHost) -> PoolHandle {
        if let Some(index) = self.inactive.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.active = true;
            return PoolHandle {
                index,
                generation: slot.generation,
            };
        }

        if self.reuse && self.constructed() >= self.capacity {
            let new_capacity = (self.capacity * 2).max(1);
            warn!(
                old_capacity = self.capacity,
                new_capacity, "Object pool exhausted, growing"
            );
            self.capacity = new_capacity;
            self.growth_events += 1;
        }

        let object = (self.factory)(self.next_object_id, stage);
        self.next_object_id += 1;

        match self.vacant.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.object = Some(object);
                slot.active = true;
                PoolHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    object: Some(object),
                    generation: 0,
                    active: true,
                });
                PoolHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Returns an object to the pool. Stale or unknown handles are ignored
    /// and yield `false`.
    pub fn release(&mut self, handle: PoolHandle, stage: &mut dyn SceneHost) -> bool {
        let reuse = self.reuse;
        let Some(slot) = self.live_slot_mut(handle) else {
            debug!(index = handle.index, "Ignoring release of stale pool handle");
            return false;
        };
        slot.active = false;
        slot.generation = slot.generation.wrapping_add(1);

        if reuse {
            if let Some(object) = slot.object.as_mut() {
                object.reset(stage);
            }
            self.inactive.push_back(handle.index);
        } else {
            if let Some(mut object) = slot.object.take() {
                object.destroy(stage);
            }
            self.vacant.push(handle.index);
        }
        true
    }

    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.active && slot.generation == handle.generation {
            slot.object.as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        self.live_slot_mut(handle)?.object.as_mut()
    }

    fn live_slot_mut(&mut self, handle: PoolHandle) -> Option<&mut Slot<T>> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        (slot.active && slot.generation == handle.generation).then_some(slot)
    }

    /// Active objects with their handles.
    pub fn iter_active(&self) -> impl Iterator<Item = (PoolHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            let object = slot.object.as_ref().filter(|_| slot.active)?;
            Some((
                PoolHandle {
                    index: i as u32,
                    generation: slot.generation,
                },
                object,
            ))
        })
    }

    pub fn iter_active_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots
            .iter_mut()
            .filter(|slot| slot.active)
            .filter_map(|slot| slot.object.as_mut())
    }

    /// Raises the capacity. Shrinking is not supported; smaller values are
    /// ignored.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = self.capacity.max(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Objects currently alive, active or parked.
    pub fn constructed(&self) -> usize {
        self.slots.iter().filter(|s| s.object.is_some()).count()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            constructed: self.constructed(),
            active: self.active_count(),
            growth_events: self.growth_events,
        }
    }

    /// Destroys every object. Outstanding handles become stale.
    pub fn clear(&mut self, stage: &mut dyn SceneHost) {
        for slot in &mut self.slots {
            if let Some(mut object) = slot.object.take() {
                object.destroy(stage);
            }
            slot.active = false;
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.inactive.clear();
        self.vacant = (0..self.slots.len() as u32).rev().collect();
    }
}
