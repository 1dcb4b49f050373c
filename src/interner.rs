//! Interned short-string table (spec.md §3.3/§4.8), modeled on
//! `gc/string_interner.rs` plus `lstring.c`'s exact resize discipline and
//! API-string cache.

use std::hash::{BuildHasher, Hasher};

use crate::error::{GcError, Result};
use crate::gc::Gc;
use crate::object::{GcId, Header, LongStrObj, ShortStrObj};

/// Strings up to this many bytes are interned; longer strings get their
/// own un-interned object with a lazily-computed hash (spec.md §3.3).
pub const SHORT_STRING_LIMIT: usize = 40;

const STRCACHE_N: usize = 53;
const STRCACHE_M: usize = 2;
const MIN_STRING_TABLE_SIZE: usize = 32;

pub struct StringInterner {
    buckets: Vec<Vec<GcId>>,
    nuse: usize,
    hasher: ahash::RandomState,
    api_cache: [[Option<GcId>; STRCACHE_M]; STRCACHE_N],
}

impl Default for StringInterner {
    fn default() -> Self {
        StringInterner {
            buckets: vec![Vec::new(); MIN_STRING_TABLE_SIZE],
            nuse: 0,
            hasher: ahash::RandomState::default(),
            api_cache: [[None; STRCACHE_M]; STRCACHE_N],
        }
    }
}

impl Gc {
    fn hash_short(&self, bytes: &[u8]) -> u64 {
        let mut h = self.interner.hasher.build_hasher();
        h.write(bytes);
        h.finish()
    }

    fn short_bucket(&self, hash: u64) -> usize {
        (hash as usize) % self.interner.buckets.len().max(1)
    }

    fn short_bytes_eq(&self, id: GcId, bytes: &[u8]) -> bool {
        match id {
            GcId::ShortStr(i) => self
                .heap
                .short_strings
                .get(i)
                .map(|s| s.bytes.as_bytes() == bytes)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// `luaS_newlstr` (short branch): a bucket hit resurrects a dead entry
    /// in place instead of allocating a duplicate, matching
    /// `gc/string_interner.rs`'s dead-string-skip-but-resurrect behavior.
    pub fn intern_short(&mut self, bytes: &[u8]) -> Result<GcId> {
        debug_assert!(bytes.len() <= SHORT_STRING_LIMIT);
        let hash = self.hash_short(bytes);
        let idx = self.short_bucket(hash);

        if let Some(id) = self.interner.buckets[idx]
            .iter()
            .copied()
            .find(|id| self.short_bytes_eq(*id, bytes))
        {
            let other_white = self.other_white();
            let current_white = self.current_white;
            if let Some(h) = self.heap.header_mut(id) {
                if h.is_dead(other_white) {
                    h.make_white(current_white);
                }
            }
            return Ok(id);
        }

        if self.interner.nuse >= u32::MAX as usize {
            return Err(GcError::StringTableExhausted);
        }

        let header = Header::new(self.current_white);
        let text = std::str::from_utf8(bytes).unwrap_or("");
        let obj = ShortStrObj {
            header,
            bytes: smol_str::SmolStr::new(text),
            hash,
        };
        let slot = self.heap.short_strings.insert(obj);
        let id = GcId::ShortStr(slot);
        self.lists.allgc.push_front(&mut self.heap, id);
        self.interner.buckets[idx].push(id);
        self.interner.nuse += 1;

        if self.interner.nuse > self.interner.buckets.len() {
            let new_size = self.interner.buckets.len() * 2;
            self.resize_string_table(new_size);
        }
        Ok(id)
    }

    /// `luaS_resize`: every live entry is rehashed into a fresh bucket
    /// array sized for the target capacity, in both grow and shrink
    /// directions — `lstring.c` additionally defers the shrink's physical
    /// reallocation until after rehashing so a failed allocation leaves
    /// the old table untouched, which a `Vec` replace gives for free here.
    pub(crate) fn resize_string_table(&mut self, new_size: usize) {
        let new_size = new_size.max(1);
        let mut new_buckets: Vec<Vec<GcId>> = vec![Vec::new(); new_size];
        for bucket in &self.interner.buckets {
            for &id in bucket {
                let hash = match id {
                    GcId::ShortStr(i) => self.heap.short_strings.get(i).map(|s| s.hash),
                    _ => None,
                };
                if let Some(hash) = hash {
                    new_buckets[(hash as usize) % new_size].push(id);
                }
            }
        }
        self.interner.buckets = new_buckets;
    }

    /// `checkSizes`, run at `SWEEP_END`: shrink the table to half its size
    /// once usage has fallen under a quarter of capacity.
    pub(crate) fn maybe_shrink_string_table(&mut self) {
        let size = self.interner.buckets.len();
        if size > MIN_STRING_TABLE_SIZE && self.interner.nuse < size / 4 {
            self.resize_string_table(size / 2);
        }
    }

    /// Drop a freed short string's bucket entry. Called from the
    /// sweeper's `on_object_freed` hook.
    pub(crate) fn unintern(&mut self, id: GcId) {
        if !matches!(id, GcId::ShortStr(_)) {
            return;
        }
        for bucket in &mut self.interner.buckets {
            if let Some(pos) = bucket.iter().position(|x| *x == id) {
                bucket.remove(pos);
                self.interner.nuse = self.interner.nuse.saturating_sub(1);
                break;
            }
        }
    }

    /// Long strings are never interned; their hash is computed once, on
    /// first request, and cached (`lstring.c`'s lazy `extra` hash).
    pub fn new_long_string(&mut self, bytes: Box<str>) -> GcId {
        let header = Header::new(self.current_white);
        let obj = LongStrObj {
            header,
            bytes,
            hash: None,
        };
        let slot = self.heap.long_strings.insert(obj);
        let id = GcId::LongStr(slot);
        self.lists.allgc.push_front(&mut self.heap, id);
        id
    }

    pub fn long_string_hash(&mut self, id: GcId) -> u64 {
        let GcId::LongStr(i) = id else { return 0 };
        if let Some(cached) = self.heap.long_strings.get(i).and_then(|s| s.hash) {
            return cached;
        }
        let bytes: Vec<u8> = match self.heap.long_strings.get(i) {
            Some(s) => s.bytes.as_bytes().to_vec(),
            None => return 0,
        };
        let mut hasher = self.interner.hasher.build_hasher();
        hasher.write(&bytes);
        let hash = hasher.finish();
        if let Some(s) = self.heap.long_strings.get_mut(i) {
            s.hash = Some(hash);
        }
        hash
    }

    /// `luaS_new`-style cache for repeated identical literal lookups,
    /// keyed externally (e.g. by a bytecode constant slot), so a hot
    /// literal skips re-hashing and re-walking its bucket entirely.
    pub fn intern_cached(&mut self, cache_key: usize, bytes: &[u8]) -> Result<GcId> {
        let row = cache_key % STRCACHE_N;
        for slot in 0..STRCACHE_M {
            if let Some(id) = self.interner.api_cache[row][slot] {
                if self.short_bytes_eq(id, bytes) {
                    let other_white = self.other_white();
                    let current_white = self.current_white;
                    if let Some(h) = self.heap.header_mut(id) {
                        if h.is_dead(other_white) {
                            h.make_white(current_white);
                        }
                    }
                    return Ok(id);
                }
            }
        }
        let id = self.intern_short(bytes)?;
        for slot in (1..STRCACHE_M).rev() {
            self.interner.api_cache[row][slot] = self.interner.api_cache[row][slot - 1];
        }
        self.interner.api_cache[row][0] = Some(id);
        Ok(id)
    }

    /// Drop every cache entry. Run during the atomic phase and at the end
    /// of a minor cycle so a subsequent sweep can never leave a dangling
    /// id sitting in the cache; `None` serves as the sentinel in place of
    /// `lgc.c`'s shared out-of-memory-message string (spec.md §5.5).
    pub(crate) fn clear_string_cache(&mut self) {
        for row in self.interner.api_cache.iter_mut() {
            for slot in row.iter_mut() {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::Gc;

    #[test]
    fn interning_same_bytes_returns_same_id() {
        let mut gc = Gc::default();
        let a = gc.intern_short(b"hello").unwrap();
        let b = gc.intern_short(b"hello").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn interning_different_bytes_returns_different_ids() {
        let mut gc = Gc::default();
        let a = gc.intern_short(b"hello").unwrap();
        let b = gc.intern_short(b"world").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn dead_string_is_resurrected_on_lookup() {
        let mut gc = Gc::default();
        let id = gc.intern_short(b"resurrect-me").unwrap();
        let other_white = gc.other_white();
        gc.heap.header_mut(id).unwrap().make_white(other_white);
        assert!(gc.heap.header(id).unwrap().is_dead(other_white));

        let again = gc.intern_short(b"resurrect-me").unwrap();
        assert_eq!(id, again);
        assert!(!gc.heap.header(id).unwrap().is_dead(other_white));
    }

    #[test]
    fn growing_past_load_factor_triggers_resize() {
        let mut gc = Gc::default();
        for n in 0..40 {
            gc.intern_short(format!("key-{n}").as_bytes()).unwrap();
        }
        assert!(gc.interner.buckets.len() > MIN_STRING_TABLE_SIZE);
    }

    #[test]
    fn cached_lookup_hits_without_reinterning() {
        let mut gc = Gc::default();
        let a = gc.intern_cached(7, b"cached").unwrap();
        let b = gc.intern_cached(7, b"cached").unwrap();
        assert_eq!(a, b);
    }
}
