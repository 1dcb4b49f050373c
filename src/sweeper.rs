//! White-object reclamation, age advancement, and list splicing
//! (spec.md §4.3). The sweep cursor (`sweep_cursor`/`sweep_prev`) persists
//! across budget-limited `gc_step` calls the same way `g->sweepgc` does in
//! `lgc.c`, so a single list is swept in `SWEEP_MAX`-sized slices rather
//! than restarting from the head every step.

use crate::gc::Gc;
use crate::object::{Age, GcId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTarget {
    AllGc,
    FinObj,
    ToBeFnz,
}

impl Gc {
    /// Position the sweep cursor at the head of `target`'s list, ready
    /// for a fresh series of `sweep_step` calls.
    pub(crate) fn start_sweep(&mut self, target: SweepTarget) {
        self.sweep_prev = None;
        self.sweep_cursor = match target {
            SweepTarget::AllGc => self.lists.allgc.head,
            SweepTarget::FinObj => self.lists.finobj.head,
            SweepTarget::ToBeFnz => self.lists.tobefnz.head,
        };
    }

    /// Walk up to `budget` objects of `target` (unlimited if `fast`),
    /// resuming from the cursor left by the previous call. Returns `true`
    /// once the whole list has been walked.
    pub(crate) fn sweep_step(&mut self, target: SweepTarget, fast: bool) -> bool {
        let budget = if fast {
            usize::MAX
        } else {
            crate::config::SWEEP_MAX
        };

        if target == SweepTarget::ToBeFnz {
            self.sweep_tobefnz(budget)
        } else {
            self.sweep_intrusive(target == SweepTarget::AllGc, budget)
        }
    }

    /// Every member of `tobefnz` is non-white by invariant I5 (it was
    /// marked during `separate_tobefnz` + the atomic `mark_beingfnz`
    /// pass), so sweeping it never frees anything — it only repaints
    /// color/age the same as a live object would get.
    fn sweep_tobefnz(&mut self, budget: usize) -> bool {
        let other_white = self.other_white();
        let current_white = self.current_white;
        let generational = self.mode.is_generational();
        let mut processed = 0usize;
        while let Some(id) = self.sweep_cursor {
            if processed >= budget {
                return false;
            }
            let Some(h) = self.heap.header(id) else { break };
            debug_assert!(!h.is_dead(other_white), "tobefnz member must stay alive");
            self.repaint_swept(id, current_white, generational);
            self.sweep_cursor = self.heap.header(id).and_then(|h| h.next);
            processed += 1;
        }
        true
    }

    fn sweep_intrusive(&mut self, is_allgc: bool, budget: usize) -> bool {
        let other_white = self.other_white();
        let current_white = self.current_white;
        let generational = self.mode.is_generational();
        let mut processed = 0usize;

        loop {
            let Some(id) = self.sweep_cursor else { return true };
            if processed >= budget {
                return false;
            }
            processed += 1;

            let dead = self
                .heap
                .header(id)
                .map(|h| h.is_dead(other_white))
                .unwrap_or(false);
            let next = self.heap.header(id).and_then(|h| h.next);

            if dead {
                self.unlink_generational_pointers(id);
                self.on_object_freed(id);
                self.heap.free(id);
                match self.sweep_prev {
                    Some(p) => {
                        if let Some(h) = self.heap.header_mut(p) {
                            h.next = next;
                        }
                    }
                    None => {
                        if is_allgc {
                            self.lists.allgc.head = next;
                        } else {
                            self.lists.finobj.head = next;
                        }
                    }
                }
            } else {
                self.repaint_swept(id, current_white, generational);
                self.sweep_prev = Some(id);
            }
            self.sweep_cursor = next;
        }
    }

    /// If the cursor is about to visit `obj` next, advance it past `obj`
    /// first. Used by `check_finalizer` before splicing `obj` out of
    /// `allgc` mid-sweep (spec.md §4.4).
    pub(crate) fn advance_sweep_cursor_past(&mut self, obj: GcId) {
        if self.sweep_cursor == Some(obj) {
            self.sweep_cursor = self.heap.header(obj).and_then(|h| h.next);
        }
    }

    fn repaint_swept(&mut self, id: GcId, current_white: u8, generational: bool) {
        let Some(h) = self.heap.header_mut(id) else {
            return;
        };
        if !generational {
            h.make_white(current_white);
            h.set_age(Age::New);
        } else {
            match h.age() {
                Age::New => h.set_age(Age::Survival),
                Age::Survival => h.set_age(Age::Old1),
                Age::Old0 => h.set_age(Age::Old1),
                Age::Old1 => h.set_age(Age::Old),
                // OLD/TOUCHED* are handled by the generational minor-cycle
                // driver (mode.rs), not by the generic sweep pass.
                other => h.set_age(other),
            }
        }
    }

    /// If a generation-stratum pointer (`survival`, `old1`, ...) aimed at
    /// the object being freed, advance it past the freed node so the
    /// stratum boundary stays valid.
    pub(crate) fn unlink_generational_pointers(&mut self, id: GcId) {
        let next = self.heap.header(id).and_then(|h| h.next);
        for ptr in [
            &mut self.lists.survival,
            &mut self.lists.old1,
            &mut self.lists.reallyold,
            &mut self.lists.firstold1,
            &mut self.lists.finobjsur,
            &mut self.lists.finobjold1,
            &mut self.lists.finobjrold,
        ] {
            if *ptr == Some(id) {
                *ptr = next;
            }
        }
    }
}
