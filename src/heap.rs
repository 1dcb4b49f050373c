//! Arena storage for each object kind, and the `Heap` that dispatches a
//! [`GcId`] to the right arena. Modeled on `gc/object_pool.rs`'s
//! `Vec<Option<T>>` + free-list pool: O(1) allocate/free, no `Rc`, no
//! pointer invalidation on growth because objects are addressed by index.

use crate::object::{
    ClosureObj, Header, LongStrObj, ProtoObj, ShortStrObj, TableObj, ThreadObj, UpvalueObj,
    UserdataObj,
};
use crate::object::GcId;

pub struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    pub fn insert(&mut self, value: T) -> u32 {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(value);
            idx
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Some(value));
            idx
        }
    }

    pub fn remove(&mut self, idx: u32) -> Option<T> {
        let slot = self.slots.get_mut(idx as usize)?;
        let value = slot.take();
        if value.is_some() {
            self.free.push(idx);
        }
        value
    }

    pub fn get(&self, idx: u32) -> Option<&T> {
        self.slots.get(idx as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: u32) -> Option<&mut T> {
        self.slots.get_mut(idx as usize).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (i as u32, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|v| (i as u32, v)))
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns every per-kind arena. Short strings live separately under the
/// string interner (which needs hash-bucket indexing, not just an arena);
/// the interner hands this heap ownership of each `ShortStrObj` slot.
#[derive(Default)]
pub struct Heap {
    pub short_strings: Arena<ShortStrObj>,
    pub long_strings: Arena<LongStrObj>,
    pub tables: Arena<TableObj>,
    pub closures: Arena<ClosureObj>,
    pub protos: Arena<ProtoObj>,
    pub threads: Arena<ThreadObj>,
    pub upvalues: Arena<UpvalueObj>,
    pub userdata: Arena<UserdataObj>,
}

impl Heap {
    pub fn header(&self, id: GcId) -> Option<&Header> {
        match id {
            GcId::ShortStr(i) => self.short_strings.get(i).map(|o| &o.header),
            GcId::LongStr(i) => self.long_strings.get(i).map(|o| &o.header),
            GcId::Table(i) => self.tables.get(i).map(|o| &o.header),
            GcId::Closure(i) => self.closures.get(i).map(|o| &o.header),
            GcId::Proto(i) => self.protos.get(i).map(|o| &o.header),
            GcId::Thread(i) => self.threads.get(i).map(|o| &o.header),
            GcId::Upvalue(i) => self.upvalues.get(i).map(|o| &o.header),
            GcId::Userdata(i) => self.userdata.get(i).map(|o| &o.header),
        }
    }

    pub fn header_mut(&mut self, id: GcId) -> Option<&mut Header> {
        match id {
            GcId::ShortStr(i) => self.short_strings.get_mut(i).map(|o| &mut o.header),
            GcId::LongStr(i) => self.long_strings.get_mut(i).map(|o| &mut o.header),
            GcId::Table(i) => self.tables.get_mut(i).map(|o| &mut o.header),
            GcId::Closure(i) => self.closures.get_mut(i).map(|o| &mut o.header),
            GcId::Proto(i) => self.protos.get_mut(i).map(|o| &mut o.header),
            GcId::Thread(i) => self.threads.get_mut(i).map(|o| &mut o.header),
            GcId::Upvalue(i) => self.upvalues.get_mut(i).map(|o| &mut o.header),
            GcId::Userdata(i) => self.userdata.get_mut(i).map(|o| &mut o.header),
        }
    }

    /// Deallocate the object identified by `id`. Callers are responsible
    /// for having already unlinked it from whichever list owned it.
    pub fn free(&mut self, id: GcId) {
        match id {
            GcId::ShortStr(i) => {
                self.short_strings.remove(i);
            }
            GcId::LongStr(i) => {
                self.long_strings.remove(i);
            }
            GcId::Table(i) => {
                self.tables.remove(i);
            }
            GcId::Closure(i) => {
                self.closures.remove(i);
            }
            GcId::Proto(i) => {
                self.protos.remove(i);
            }
            GcId::Thread(i) => {
                self.threads.remove(i);
            }
            GcId::Upvalue(i) => {
                self.upvalues.remove(i);
            }
            GcId::Userdata(i) => {
                self.userdata.remove(i);
            }
        }
    }

    /// Rough accounting size in bytes, used for debt/pause bookkeeping
    /// (spec.md §4.2 "estimate_object_size"). Not exact; the allocator
    /// collaborator is out of scope (§1) and owns the real byte count.
    pub fn estimate_size(&self, id: GcId) -> usize {
        match id {
            GcId::ShortStr(i) => self
                .short_strings
                .get(i)
                .map(|s| 32 + s.bytes.len())
                .unwrap_or(32),
            GcId::LongStr(i) => self
                .long_strings
                .get(i)
                .map(|s| 32 + s.bytes.len())
                .unwrap_or(32),
            GcId::Table(i) => self
                .tables
                .get(i)
                .map(|t| 56 + t.array.len() * 16 + t.hash.len() * 32)
                .unwrap_or(56),
            GcId::Closure(_) => 64,
            GcId::Proto(i) => self
                .protos
                .get(i)
                .map(|p| 64 + p.constants.len() * 16)
                .unwrap_or(64),
            GcId::Thread(i) => self
                .threads
                .get(i)
                .map(|t| 128 + t.stack.len() * 16)
                .unwrap_or(128),
            GcId::Upvalue(_) => 32,
            GcId::Userdata(i) => self
                .userdata
                .get(i)
                .map(|u| 48 + u.user_values.len() * 16)
                .unwrap_or(48),
        }
    }
}
