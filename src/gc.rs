//! The collector itself: object creation, the public stepping API, and
//! mode switching. Ports `gc/mod.rs`'s `GC` struct — `gc_debt`,
//! `total_bytes`, `gc_marked`, `gc_majorminor`, `gc_state`, `gc_kind`,
//! `current_white`, `gc_emergency`, `gc_stopped` — onto the object model
//! and lists built up in the sibling modules.

use crate::config::GcConfig;
use crate::error::Result;
use crate::finalize::FinalizerHook;
use crate::heap::Heap;
use crate::interner::StringInterner;
use crate::lists::GlobalLists;
use crate::mode::{GcKind, GcState, Mode};
use crate::object::{
    ClosureKind, ClosureObj, GcId, Header, ProtoObj, TableObj, ThreadObj, UpvalueObj,
    UpvalueState, UserdataObj,
};

/// Warns about recoverable collector conditions (finalizer panics,
/// string-table pressure). Defaults to stderr, matching
/// `lua_vm/lua_state.rs`'s `eprintln!`-based diagnostic path — no
/// `log`/`tracing` dependency is introduced for it.
pub type WarnHook = Box<dyn FnMut(&str)>;

fn default_warn_hook() -> WarnHook {
    Box::new(|msg: &str| eprintln!("trigc: warning: {msg}"))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub collections: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
}

pub struct Gc {
    pub(crate) heap: Heap,
    pub(crate) lists: GlobalLists,
    pub(crate) config: GcConfig,
    pub(crate) interner: StringInterner,

    pub(crate) current_white: u8,
    pub(crate) gc_debt: isize,
    pub(crate) gc_marked: isize,
    pub(crate) gc_majorminor: usize,
    pub(crate) total_bytes: usize,

    pub(crate) state: GcState,
    pub(crate) mode: Mode,
    pub(crate) ephemeron_progress: bool,
    pub(crate) sweep_cursor: Option<GcId>,
    pub(crate) sweep_prev: Option<GcId>,

    pub(crate) gc_emergency: bool,
    pub(crate) gc_stopped: bool,

    pub(crate) finalizer_hook: Option<FinalizerHook>,
    pub(crate) warn_hook: WarnHook,

    pub stats: GcStats,
}

impl Default for Gc {
    fn default() -> Self {
        Gc {
            heap: Heap::default(),
            lists: GlobalLists::default(),
            config: GcConfig::default(),
            interner: StringInterner::default(),

            current_white: 0,
            gc_debt: 0,
            gc_marked: 0,
            gc_majorminor: 0,
            total_bytes: 0,

            state: GcState::Pause,
            mode: Mode::Incremental,
            ephemeron_progress: false,
            sweep_cursor: None,
            sweep_prev: None,

            gc_emergency: false,
            gc_stopped: false,

            finalizer_hook: None,
            warn_hook: default_warn_hook(),

            stats: GcStats::default(),
        }
    }
}

impl Gc {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn other_white(&self) -> u8 {
        self.current_white ^ 1
    }

    fn track_new(&mut self, id: GcId) {
        self.lists.allgc.push_front(&mut self.heap, id);
        let size = self.heap.estimate_size(id) as isize;
        self.total_bytes += size as usize;
        self.gc_debt += size;
    }

    pub fn new_table(&mut self) -> GcId {
        let header = Header::new(self.current_white);
        let idx = self.heap.tables.insert(TableObj::new(header));
        let id = GcId::Table(idx);
        self.track_new(id);
        id
    }

    pub fn new_closure(&mut self, kind: ClosureKind) -> GcId {
        let header = Header::new(self.current_white);
        let idx = self.heap.closures.insert(ClosureObj { header, kind });
        let id = GcId::Closure(idx);
        self.track_new(id);
        id
    }

    pub fn new_proto(&mut self) -> GcId {
        let header = Header::new(self.current_white);
        let idx = self.heap.protos.insert(ProtoObj {
            header,
            source_name: None,
            constants: Vec::new(),
            upvalue_debug_names: Vec::new(),
            nested: Vec::new(),
            local_names: Vec::new(),
        });
        let id = GcId::Proto(idx);
        self.track_new(id);
        id
    }

    pub fn new_thread(&mut self) -> GcId {
        let header = Header::new(self.current_white);
        let idx = self.heap.threads.insert(ThreadObj {
            header,
            stack: Vec::new(),
            top: 0,
            open_upvalues: Vec::new(),
            in_twups: false,
        });
        let id = GcId::Thread(idx);
        self.track_new(id);
        id
    }

    pub fn new_open_upvalue(&mut self, owner_thread: GcId, stack_index: usize) -> GcId {
        let header = Header::new(self.current_white);
        let idx = self.heap.upvalues.insert(UpvalueObj {
            header,
            state: UpvalueState::Open { stack_index },
            owner_thread: Some(owner_thread),
        });
        let id = GcId::Upvalue(idx);
        self.track_new(id);
        id
    }

    pub fn new_userdata(&mut self) -> GcId {
        let header = Header::new(self.current_white);
        let idx = self.heap.userdata.insert(UserdataObj {
            header,
            metatable: None,
            user_values: Vec::new(),
        });
        let id = GcId::Userdata(idx);
        self.track_new(id);
        id
    }

    /// Remove `obj` from `allgc` and park it on `fixedgc` instead: `OLD`
    /// from this point on and exempt from sweep forever (spec.md §3.3).
    /// Color is deliberately left alone: `mark_roots` marks every
    /// `fixedgc` member at the start of every cycle the same way it would
    /// any other root, so a fixed object re-enters the ordinary
    /// white -> gray -> black pipeline and its children stay traversed and
    /// protected. `GcHeader::new_fixed()` covers the opposite case — a
    /// leaf object with no children, built pre-colored gray because it
    /// will never need traversing in the first place.
    pub fn fix_object(&mut self, obj: GcId) {
        self.advance_sweep_cursor_past(obj);
        self.lists.allgc.remove(&mut self.heap, obj);
        self.lists.fixedgc.push_front(&mut self.heap, obj);
        if let Some(h) = self.heap.header_mut(obj) {
            h.make_old();
        }
    }

    /// Hook run by the sweeper and the young-generation sweep whenever an
    /// object is actually reclaimed: drops its string-interner bucket
    /// entry (a no-op for non-strings) and corrects the byte estimate.
    pub(crate) fn on_object_freed(&mut self, id: GcId) {
        self.unintern(id);
        let size = self.heap.estimate_size(id);
        self.total_bytes = self.total_bytes.saturating_sub(size);
        self.stats.objects_freed += 1;
        self.stats.bytes_freed += size;
    }

    /// Do one debt-sized unit of collection work, the way an allocator
    /// calls in after every `new_*`/`intern_*` (spec.md §4.7 pacing).
    pub fn gc_step(&mut self) {
        if self.gc_stopped {
            return;
        }
        match self.mode {
            Mode::GenMinor => {
                if self.gc_debt > 0 {
                    self.young_collection();
                    let next = self
                        .config
                        .apply(crate::config::MINORMUL, self.total_bytes as isize);
                    self.gc_debt = -next;
                }
            }
            Mode::Incremental | Mode::GenMajor => {
                let mut guard = 0;
                while self.gc_debt > 0 && guard < 1_000_000 {
                    let work = self.single_step(false);
                    let scaled = self.config.apply(crate::config::STEPMUL, work.max(1));
                    self.gc_debt -= scaled.max(1);
                    guard += 1;
                    if matches!(self.state, GcState::Pause) {
                        break;
                    }
                }
            }
        }
    }

    /// Drain the current cycle to completion regardless of debt. Used for
    /// explicit `collectgarbage("collect")`-style requests and, with
    /// `emergency = true`, when allocation fails and a synchronous
    /// reclaim is the only way to make room (spec.md §4.8 failure mode).
    pub fn full_gc(&mut self, emergency: bool) {
        self.gc_emergency = emergency;
        let was_generational = self.mode.is_generational();
        if was_generational {
            self.enter_inc();
        }
        loop {
            self.single_step(true);
            if matches!(self.state, GcState::Pause) {
                break;
            }
        }
        if was_generational {
            self.enter_gen();
        }
        self.gc_emergency = false;
    }

    /// Advance the state machine by a single unit of work regardless of
    /// debt, useful for embedders that want to pace collection off their
    /// own clock instead of allocation volume. Returns `true` once the
    /// cycle just finished (state is back at `Pause`).
    pub fn step_once(&mut self) -> bool {
        self.single_step(false);
        matches!(self.state, GcState::Pause)
    }

    /// Whether `id` still refers to a live object. `false` once the
    /// object has actually been swept, not merely once it's unreachable.
    pub fn is_alive(&self, id: GcId) -> bool {
        self.heap.header(id).is_some()
    }

    /// Whether `id` is currently black — an embedder mutating a
    /// reference field on an object should check this (and the
    /// referent's color) before deciding a write barrier is needed.
    pub fn is_black(&self, id: GcId) -> bool {
        self.heap.header(id).map(|h| h.is_black()).unwrap_or(false)
    }

    pub fn table(&self, id: GcId) -> Option<&TableObj> {
        match id {
            GcId::Table(i) => self.heap.tables.get(i),
            _ => None,
        }
    }

    pub fn table_mut(&mut self, id: GcId) -> Option<&mut TableObj> {
        match id {
            GcId::Table(i) => self.heap.tables.get_mut(i),
            _ => None,
        }
    }

    /// Inverse of `fix_object`: return a permanent root to ordinary
    /// collection, aged back to `New` since it re-enters the normal
    /// generational stratum at the bottom. Repainted current-white rather
    /// than left gray: gray never satisfies the sweeper's dead test, which
    /// would make the object immortal even once truly unreachable.
    pub fn unfix_object(&mut self, id: GcId) {
        self.lists.fixedgc.remove(&mut self.heap, id);
        self.lists.allgc.push_front(&mut self.heap, id);
        let current_white = self.current_white;
        if let Some(h) = self.heap.header_mut(id) {
            h.make_white(current_white);
            h.set_age(crate::object::Age::New);
        }
    }

    pub fn change_mode(&mut self, kind: GcKind) {
        match (kind, self.mode) {
            (GcKind::Generational, Mode::Incremental) => self.enter_gen(),
            (GcKind::Incremental, Mode::GenMinor) | (GcKind::Incremental, Mode::GenMajor) => {
                self.enter_inc()
            }
            _ => {}
        }
    }

    pub fn mode_kind(&self) -> GcKind {
        if self.mode.is_generational() {
            GcKind::Generational
        } else {
            GcKind::Incremental
        }
    }

    pub fn get_param(&self, idx: usize) -> i32 {
        self.config.get_param(idx)
    }

    pub fn set_param(&mut self, idx: usize, value: i32) -> i32 {
        self.config.set_param(idx, value)
    }

    pub fn set_warn_hook(&mut self, hook: WarnHook) {
        self.warn_hook = hook;
    }

    pub fn set_finalizer_hook(&mut self, hook: FinalizerHook) {
        self.finalizer_hook = Some(hook);
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn is_stopped(&self) -> bool {
        self.gc_stopped
    }

    pub fn stop(&mut self) {
        self.gc_stopped = true;
    }

    pub fn restart(&mut self) {
        self.gc_stopped = false;
    }

    /// Release every object and reset the collector to its initial state —
    /// the teardown path for an embedder shutting down entirely
    /// (`lua_close`'s shutdown sweep). Every object still carrying a
    /// finalizer gets one last chance to run it before the heap vanishes:
    /// switch to incremental mode, move the whole `finobj` list onto
    /// `tobefnz` unconditionally, and drain it, before wiping the lists.
    pub fn free_all(&mut self) {
        if self.mode.is_generational() {
            self.enter_inc();
        }
        self.separate_tobefnz(true);
        while !self.lists.tobefnz.is_empty() {
            self.run_one_finalizer();
        }

        self.heap = Heap::default();
        self.lists = GlobalLists::default();
        self.interner = StringInterner::default();
        self.state = GcState::Pause;
        self.total_bytes = 0;
        self.gc_debt = 0;
    }

    /// Allocate a table and immediately validate the debt/pacing
    /// invariant in test builds (spec.md §8 I1: total_bytes tracks live
    /// allgc/finobj/fixedgc membership).
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn check_invariants(&self) -> std::result::Result<(), &'static str> {
        if self.current_white > 1 {
            return Err("current_white must be 0 or 1");
        }
        Ok(())
    }
}

/// Public entry point re-exported at the crate root; `Gc` is the whole
/// public surface, so this alias just documents the intended name for
/// embedders assembling a full-blown `Value`/interpreter around it.
pub type GarbageCollector = Gc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocating_a_table_tracks_debt_and_total_bytes() {
        let mut gc = Gc::default();
        let before = gc.total_bytes();
        gc.new_table();
        assert!(gc.total_bytes() > before);
        assert!(gc.gc_debt > 0);
    }

    #[test]
    fn unreachable_table_is_freed_by_full_gc() {
        let mut gc = Gc::default();
        let id = gc.new_table();
        // Drop every root: nothing marks `id`, so the next full cycle
        // reclaims it.
        gc.full_gc(false);
        assert!(gc.heap.header(id).is_none());
    }

    #[test]
    fn fixed_object_survives_a_full_collection() {
        let mut gc = Gc::default();
        let id = gc.new_table();
        gc.fix_object(id);
        gc.full_gc(false);
        assert!(gc.heap.header(id).is_some());
    }

    #[test]
    fn switching_to_generational_and_back_preserves_reachability() {
        let mut gc = Gc::default();
        let id = gc.new_table();
        gc.fix_object(id);
        gc.change_mode(GcKind::Generational);
        assert_eq!(gc.mode_kind(), GcKind::Generational);
        gc.full_gc(false);
        gc.change_mode(GcKind::Incremental);
        assert_eq!(gc.mode_kind(), GcKind::Incremental);
        assert!(gc.heap.header(id).is_some());
    }
}
