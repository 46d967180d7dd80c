//! Process-wide object addressing: `(full_id, uid)` handles over a generational slot table.
//!
//! `full_id` packs a service index into its high bits and an object index into its low bits.
//! The split is a compile-time constant pair rather than the `object_id!`-macro bitmask scheme
//! the teacher used for component/system ids, because handles need a dense, directly indexable
//! `(service, object)` pair rather than a set-membership bitmask.

use std::fmt;

/// Bits of `full_id` dedicated to the service index. The remaining low bits address the
/// object within that service.
pub const SERVICE_BITS: u32 = 8;
pub const INDEX_BITS: u32 = 24;

const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const MAX_SERVICES: u32 = 1 << SERVICE_BITS;
const MAX_INDEX: u32 = 1 << INDEX_BITS;

/// A full object id: service index in the high bits, object index in the low bits.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FullId(u32);

impl FullId {
    #[inline]
    pub fn encode(service_idx: u32, obj_idx: u32) -> FullId {
        if service_idx >= MAX_SERVICES {
            panic!("service index {} exceeds the {}-bit service id space", service_idx, SERVICE_BITS);
        }
        if obj_idx >= MAX_INDEX {
            panic!("object index {} exceeds the {}-bit index space", obj_idx, INDEX_BITS);
        }

        FullId((service_idx << INDEX_BITS) | obj_idx)
    }

    #[inline]
    pub fn service(self) -> u32 {
        self.0 >> INDEX_BITS
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FullId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FullId(service={}, index={})", self.service(), self.index())
    }
}

/// A process-wide, time-safe name for an object: the slot it lives in plus the generation
/// that slot was at when the handle was issued. Any operation taking a `Handle` must verify
/// the live generation matches before touching the slot.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Handle {
    pub full_id: FullId,
    pub uid: u32,
}

impl Handle {
    pub fn new(full_id: FullId, uid: u32) -> Handle {
        Handle { full_id, uid }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Handle({}, uid={})", self.full_id, self.uid)
    }
}

/// Outcome of a handle lookup. `Gone` is the expected, silent outcome of a racy cross-thread
/// reference to an object that has since been removed or recycled - never an error.
pub enum Lookup<T> {
    Found(T),
    Gone,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::Gone => None,
        }
    }
}

struct Slot<T> {
    data: Option<T>,
    gen: u32,
}

/// A generational slot table: the backbone of every object index in the framework
/// (per-service object storage, per-connector sent-buffer tables, command-executer
/// request slots). Allocating a slot bumps nothing; releasing one bumps the generation
/// so stale handles fail closed instead of aliasing a recycled slot.
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> SlotTable<T> {
    pub fn new() -> SlotTable<T> {
        SlotTable {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Insert a value, returning the `(index, gen)` pair that names it.
    pub fn insert(&mut self, value: T) -> (u32, u32) {
        self.insert_with(|_, _| value)
    }

    /// Insert a value built from the `(index, gen)` pair it will be known by - needed when the
    /// value itself must carry its own handle (e.g. an `Object` whose `ObjectCore` is
    /// constructed with the handle baked in, rather than patched in afterwards).
    pub fn insert_with<F>(&mut self, make: F) -> (u32, u32)
    where
        F: FnOnce(u32, u32) -> T,
    {
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            debug_assert!(slot.data.is_none());
            let gen = slot.gen;
            slot.data = Some(make(idx, gen));
            (idx, gen)
        } else {
            let idx = self.slots.len() as u32;
            let value = make(idx, 0);
            self.slots.push(Slot { data: Some(value), gen: 0 });
            (idx, 0)
        }
    }

    /// Remove the value at `index` if `gen` still matches the live generation, bumping the
    /// generation so any outstanding handle to this slot becomes `Gone`.
    pub fn remove(&mut self, index: u32, gen: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;

        if slot.gen != gen {
            return None;
        }

        let value = slot.data.take();
        slot.gen = slot.gen.wrapping_add(1);

        if value.is_some() {
            self.free.push(index);
        }

        value
    }

    pub fn get(&self, index: u32, gen: u32) -> Lookup<&T> {
        match self.slots.get(index as usize) {
            Some(slot) if slot.gen == gen => match &slot.data {
                Some(v) => Lookup::Found(v),
                None => Lookup::Gone,
            },
            _ => Lookup::Gone,
        }
    }

    pub fn get_mut(&mut self, index: u32, gen: u32) -> Lookup<&mut T> {
        match self.slots.get_mut(index as usize) {
            Some(slot) if slot.gen == gen => match &mut slot.data {
                Some(v) => Lookup::Found(v),
                None => Lookup::Gone,
            },
            _ => Lookup::Gone,
        }
    }

    /// Current generation of `index`, regardless of whether it is occupied. Used to stamp
    /// newly issued handles.
    pub fn gen_of(&self, index: u32) -> Option<u32> {
        self.slots.get(index as usize).map(|slot| slot.gen)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.data.as_ref().map(|v| (i as u32, v)))
    }

    pub fn len_occupied(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        SlotTable::new()
    }
}
