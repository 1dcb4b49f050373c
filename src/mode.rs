//! The collector's state machine (spec.md §4.7): the incremental step
//! driver, the atomic phase, and the generational minor/major cycle.
//! Ported from `gc/mod.rs`'s `GcState`/`single_step`/`atomic`/
//! `young_collection`.

use crate::gc::Gc;
use crate::marker::WeakList;
use crate::object::{Age, GcId, UpvalueState};
use crate::sweeper::SweepTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    Pause,
    Propagate,
    EnterAtomic,
    SweepAllGc,
    SweepFinObj,
    SweepToBeFnz,
    SweepEnd,
    CallFin,
}

impl GcState {
    #[inline]
    pub fn is_propagate(self) -> bool {
        matches!(self, GcState::Propagate)
    }

    /// True while the no-black-to-white invariant must hold, i.e. up to
    /// and including the atomic phase (spec.md §4.5).
    #[inline]
    pub fn keeps_invariant(self) -> bool {
        matches!(self, GcState::Propagate | GcState::EnterAtomic)
    }

    #[inline]
    pub fn is_sweep_phase(self) -> bool {
        matches!(
            self,
            GcState::SweepAllGc | GcState::SweepFinObj | GcState::SweepToBeFnz
        )
    }
}

impl Default for GcState {
    fn default() -> Self {
        GcState::Pause
    }
}

/// Collection strategy as selected through the public API (spec.md §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcKind {
    Incremental,
    Generational,
}

/// Internal refinement: a `Generational` collector alternates between
/// cheap minor cycles and, once enough old garbage has accumulated, a
/// full major cycle that runs the same state machine incremental mode
/// uses (spec.md §4.7.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Incremental,
    GenMinor,
    GenMajor,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Incremental
    }
}

impl Mode {
    #[inline]
    pub fn is_generational(self) -> bool {
        !matches!(self, Mode::Incremental)
    }

    #[inline]
    pub fn is_gen_minor(self) -> bool {
        matches!(self, Mode::GenMinor)
    }
}

impl Gc {
    /// Advance the state machine by one unit of work (one gray object in
    /// `Propagate`, `SWEEP_MAX` objects in a sweep phase, one finalizer in
    /// `CallFin`) unless `fast`, which drains the current phase
    /// completely before returning — used by `full_gc`.
    pub(crate) fn single_step(&mut self, fast: bool) -> isize {
        match self.state {
            GcState::Pause => {
                self.restart_collection();
                self.state = GcState::Propagate;
                0
            }
            GcState::Propagate => {
                if self.lists.gray.is_empty() {
                    self.enter_atomic();
                    0
                } else if fast {
                    let mut work = 0;
                    while !self.lists.gray.is_empty() {
                        work += self.propagate_mark();
                    }
                    self.enter_atomic();
                    work
                } else {
                    self.propagate_mark()
                }
            }
            GcState::EnterAtomic => {
                self.enter_atomic();
                0
            }
            GcState::SweepAllGc => {
                self.drive_sweep(SweepTarget::AllGc, GcState::SweepFinObj, fast)
            }
            GcState::SweepFinObj => {
                self.drive_sweep(SweepTarget::FinObj, GcState::SweepToBeFnz, fast)
            }
            GcState::SweepToBeFnz => {
                self.drive_sweep(SweepTarget::ToBeFnz, GcState::SweepEnd, fast)
            }
            GcState::SweepEnd => {
                self.maybe_shrink_string_table();
                self.state = GcState::CallFin;
                0
            }
            GcState::CallFin => {
                if self.lists.tobefnz.is_empty() {
                    self.finish_cycle();
                    0
                } else if fast {
                    let mut work = 0;
                    while !self.lists.tobefnz.is_empty() {
                        work += self.run_one_finalizer();
                    }
                    self.finish_cycle();
                    work
                } else {
                    self.run_one_finalizer()
                }
            }
        }
    }

    fn drive_sweep(&mut self, target: SweepTarget, next: GcState, fast: bool) -> isize {
        let done = self.sweep_step(target, fast);
        if done {
            self.state = next;
            match next {
                GcState::SweepFinObj => self.start_sweep(SweepTarget::FinObj),
                GcState::SweepToBeFnz => self.start_sweep(SweepTarget::ToBeFnz),
                _ => {}
            }
        }
        crate::config::SWEEP_MAX as isize
    }

    /// `GCSpause -> GCSpropagate`: clear the transient work-lists and mark
    /// the permanent root set (`fixedgc`) gray to seed propagation.
    fn restart_collection(&mut self) {
        self.lists.gray.clear();
        self.lists.grayagain.clear();
        self.lists.weak.clear();
        self.lists.ephemeron.clear();
        self.lists.allweak.clear();
        self.mark_roots();
    }

    fn mark_roots(&mut self) {
        let ids: Vec<GcId> = self.lists.fixedgc.iter(&self.heap).collect();
        for id in ids {
            self.mark_object(id);
        }
    }

    /// The 13-step atomic procedure (spec.md §4.7.1): runs to completion
    /// without yielding, since the tri-color invariant can't be safely
    /// paused mid-way through reconciling the weak/ephemeron lists.
    fn enter_atomic(&mut self) {
        self.state = GcState::EnterAtomic;

        let saved_grayagain = std::mem::take(&mut self.lists.grayagain);
        self.mark_roots();
        self.drain_gray();

        self.remark_upvals();
        self.drain_gray();

        self.lists.gray.extend(saved_grayagain);
        self.drain_gray();

        self.converge_ephemerons();

        let weak_mark = self.lists.weak.len();
        let allweak_mark = self.lists.allweak.len();
        self.clear_by_values(WeakList::Weak, None);
        self.clear_by_values(WeakList::AllWeak, None);

        self.separate_tobefnz(false);
        self.mark_tobefnz();
        self.drain_gray();
        self.converge_ephemerons();

        self.clear_by_keys(WeakList::Ephemeron);
        self.clear_by_keys(WeakList::AllWeak);

        self.clear_by_values(WeakList::Weak, Some(weak_mark));
        self.clear_by_values(WeakList::AllWeak, Some(allweak_mark));

        self.clear_string_cache();
        self.current_white ^= 1;

        self.state = GcState::SweepAllGc;
        self.start_sweep(SweepTarget::AllGc);
    }

    fn drain_gray(&mut self) {
        while !self.lists.gray.is_empty() {
            self.propagate_mark();
        }
    }

    fn mark_tobefnz(&mut self) {
        let ids: Vec<GcId> = self.lists.tobefnz.iter(&self.heap).collect();
        for id in ids {
            self.mark_object(id);
        }
    }

    /// `remarkupvals` (spec.md §4.7.1 step 4): threads parked on `twups`
    /// need their open upvalues' stack slots re-marked directly, since an
    /// open upvalue itself stays gray rather than tracing its slot.
    fn remark_upvals(&mut self) {
        let threads: Vec<GcId> = std::mem::take(&mut self.lists.twups);
        let mut still_open = Vec::new();

        // Runs before this cycle's white flip, so "has this thread been
        // marked yet" is a plain `is_white` check, not `is_dead` — the
        // latter only makes sense once sweep has the post-flip color.
        for tid in threads {
            let GcId::Thread(ti) = tid else { continue };
            let Some(t) = self.heap.threads.get(ti) else {
                continue;
            };
            if t.open_upvalues.is_empty() {
                if let Some(t) = self.heap.threads.get_mut(ti) {
                    t.in_twups = false;
                }
                continue;
            }
            let marked = self
                .heap
                .header(tid)
                .map(|h| !h.is_white())
                .unwrap_or(false);
            if !marked {
                continue;
            }
            let upvalues = t.open_upvalues.clone();
            for uv in upvalues {
                let GcId::Upvalue(ui) = uv else { continue };
                let stack_index = match self.heap.upvalues.get(ui).map(|u| &u.state) {
                    Some(UpvalueState::Open { stack_index }) => Some(*stack_index),
                    _ => None,
                };
                if let Some(idx) = stack_index {
                    let value = self.heap.threads.get(ti).and_then(|t| t.stack.get(idx)).copied();
                    if let Some(v) = value {
                        self.mark_value(&v);
                    }
                }
            }
            still_open.push(tid);
        }
        self.lists.twups = still_open;
    }

    /// `entergen`: switch the public mode to generational, snapshotting
    /// the current old-object count as the baseline the minor/major
    /// switch heuristics compare against (`gc_majorminor`).
    pub(crate) fn enter_gen(&mut self) {
        self.make_all_white();
        self.state = GcState::Pause;
        self.mode = Mode::GenMinor;
        self.gc_majorminor = self.count_old();
    }

    /// `entersweep`-adjacent: switch the public mode to incremental. The
    /// generational stratum pointers are meaningless once every sweep
    /// pass covers the whole `allgc` list again.
    pub(crate) fn enter_inc(&mut self) {
        self.lists.survival = None;
        self.lists.old1 = None;
        self.lists.reallyold = None;
        self.lists.firstold1 = None;
        self.lists.finobjsur = None;
        self.lists.finobjold1 = None;
        self.lists.finobjrold = None;
        self.state = GcState::Pause;
        self.mode = Mode::Incremental;
    }

    /// A minor cycle found unacceptable survivor growth (spec.md §4.7.2):
    /// repaint everything white and fall back to one full major cycle
    /// through the ordinary incremental state machine.
    pub(crate) fn minor2inc(&mut self) {
        self.make_all_white();
        self.state = GcState::Pause;
        self.mode = Mode::GenMajor;
    }

    fn make_all_white(&mut self) {
        let white = self.current_white;
        let ids: Vec<GcId> = self
            .lists
            .allgc
            .iter(&self.heap)
            .chain(self.lists.finobj.iter(&self.heap))
            .collect();
        for id in ids {
            if let Some(h) = self.heap.header_mut(id) {
                h.make_white(white);
            }
        }
    }

    /// One minor GC cycle: mark roots plus the remembered set (old/touched
    /// objects parked on `grayagain` by the back-barrier), reconcile weak
    /// tables exactly as the atomic phase does, then sweep only the young
    /// stratum (`New`/`Survival`/`Old0`, up to the `old1` boundary).
    pub(crate) fn young_collection(&mut self) {
        debug_assert!(self.mode.is_generational());

        self.mark_roots();
        let remembered = std::mem::take(&mut self.lists.grayagain);
        self.lists.gray.extend(remembered);
        self.drain_gray();

        self.converge_ephemerons();
        self.clear_by_values(WeakList::Weak, None);
        self.clear_by_values(WeakList::AllWeak, None);

        self.separate_tobefnz(false);
        self.mark_tobefnz();
        self.drain_gray();

        self.clear_by_keys(WeakList::Ephemeron);
        self.clear_by_keys(WeakList::AllWeak);
        self.clear_string_cache();

        self.sweep_young_generation();
        self.correct_gray_lists();
        self.check_minor_major();

        self.run_all_pending_finalizers_budgeted();
        self.stats.collections += 1;
    }

    fn run_all_pending_finalizers_budgeted(&mut self) {
        // Minor cycles don't model a separate CALLFIN phase; finalizers
        // queued this cycle run immediately, matching `lgc.c`'s
        // `youngcollection` calling `callallpendingfinalizers` inline.
        while !self.lists.tobefnz.is_empty() {
            self.run_one_finalizer();
        }
    }

    fn sweep_young_generation(&mut self) {
        let stop = self.lists.old1;
        let mut prev: Option<GcId> = None;
        let mut cursor = self.lists.allgc.head;

        // Minor cycles never flip `current_white` (only the atomic phase
        // of a major/incremental cycle does), so an object not marked this
        // cycle still carries the *current* white, not the other one —
        // the dead test here is a plain `is_white`, matching `sweepgen`.
        while cursor != stop {
            let Some(id) = cursor else { break };
            let next = self.heap.header(id).and_then(|h| h.next);
            let dead = self
                .heap
                .header(id)
                .map(|h| h.is_white())
                .unwrap_or(false);

            if dead {
                self.unlink_generational_pointers(id);
                self.on_object_freed(id);
                self.heap.free(id);
                match prev {
                    Some(p) => {
                        if let Some(h) = self.heap.header_mut(p) {
                            h.next = next;
                        }
                    }
                    None => self.lists.allgc.head = next,
                }
            } else {
                if let Some(h) = self.heap.header_mut(id) {
                    match h.age() {
                        Age::New => h.set_age(Age::Survival),
                        Age::Survival => h.set_age(Age::Old1),
                        Age::Old0 => h.set_age(Age::Old1),
                        other => h.set_age(other),
                    }
                }
                prev = Some(id);
            }
            cursor = next;
        }
        self.lists.survival = self.lists.allgc.head;
    }

    /// `correctgraylist`: after a minor sweep, anything left `Touched1`
    /// needs one more look next cycle; `Touched2` objects have survived
    /// two remembered-set passes and are promoted fully `Old`.
    fn correct_gray_lists(&mut self) {
        let ids: Vec<GcId> = self.lists.allgc.iter(&self.heap).collect();
        self.lists.grayagain.clear();
        for id in ids {
            let age = self.heap.header(id).map(|h| h.age());
            match age {
                Some(Age::Touched1) => self.lists.grayagain.push(id),
                Some(Age::Touched2) => {
                    if let Some(h) = self.heap.header_mut(id) {
                        h.set_age(Age::Old);
                    }
                }
                _ => {}
            }
        }
    }

    fn count_old(&self) -> usize {
        self.lists
            .allgc
            .iter(&self.heap)
            .filter(|id| self.heap.header(*id).map(|h| h.is_old()).unwrap_or(false))
            .count()
    }

    /// After a minor cycle, escalate to a major collection once the old
    /// generation has grown past `MINORMAJOR` percent of its size at the
    /// last mode switch.
    fn check_minor_major(&mut self) {
        if !matches!(self.mode, Mode::GenMinor) {
            return;
        }
        let old_count = self.count_old();
        let threshold = self
            .config
            .apply(crate::config::MINORMAJOR, self.gc_majorminor.max(1) as isize)
            .max(0) as usize;
        if old_count > self.gc_majorminor + threshold {
            self.minor2inc();
        }
    }

    /// After a major collection finishes, drop back to minor cycles if
    /// the old generation didn't grow past `MAJORMINOR` percent —
    /// otherwise another major cycle is due soon anyway.
    fn check_major_minor(&mut self) {
        if !matches!(self.mode, Mode::GenMajor) {
            return;
        }
        let old_count = self.count_old();
        let threshold = self
            .config
            .apply(crate::config::MAJORMINOR, self.gc_majorminor.max(1) as isize)
            .max(0) as usize;
        if old_count < self.gc_majorminor + threshold {
            self.mode = Mode::GenMinor;
            self.gc_majorminor = old_count;
        }
    }

    fn finish_cycle(&mut self) {
        self.state = GcState::Pause;
        self.stats.collections += 1;
        match self.mode {
            Mode::Incremental => self.set_pause(),
            Mode::GenMajor => self.check_major_minor(),
            Mode::GenMinor => {
                debug_assert!(false, "minor cycles never reach the sweep state machine")
            }
        }
    }

    /// `setpause`: compute the next debt threshold from how much live data
    /// the last cycle marked, then reset the running mark counter.
    fn set_pause(&mut self) {
        let debt = self.config.apply(crate::config::PAUSE, self.gc_marked.max(0));
        self.gc_debt = -debt;
        self.gc_marked = 0;
    }
}
