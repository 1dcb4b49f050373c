//! Finalizable-object migration and finalizer invocation (spec.md §4.4).
//! `allgc -> finobj` happens once, the first time an object is found to
//! carry a finalizer; `finobj -> tobefnz` happens when that object would
//! otherwise be collected; `tobefnz` dequeues strictly FIFO.

use crate::gc::Gc;
use crate::object::GcId;

/// Invoked once per finalizer run, with the object about to be
/// finalized. Defaults to a no-op; embedders wire this to their
/// metamethod dispatch (out of scope here — §1 excludes call machinery).
pub type FinalizerHook = Box<dyn FnMut(GcId)>;

impl Gc {
    /// Called when an object is first found to have a finalizer attached
    /// (an embedder-side metatable check — the `mt` parameter here is
    /// just "does it have one", since metatable/metamethod lookup itself
    /// is out of scope). Moves it from `allgc` to `finobj` at most once;
    /// the `FINALIZED` bit prevents a second migration after resurrection.
    pub fn check_finalizer(&mut self, obj: GcId, has_finalizer: bool) {
        if !has_finalizer {
            return;
        }
        let already = self
            .heap
            .header(obj)
            .map(|h| h.is_finalized())
            .unwrap_or(true);
        if already {
            return;
        }

        self.advance_sweep_cursor_past(obj);
        self.lists.allgc.remove(&mut self.heap, obj);
        self.lists.finobj.push_front(&mut self.heap, obj);
        if let Some(h) = self.heap.header_mut(obj) {
            h.set_finalized();
        }
    }

    /// `separatetobefnz`: move every dead (or, if `all`, every) member of
    /// `finobj` onto `tobefnz`, preserving the order they're visited in so
    /// `tobefnz` stays FIFO (spec.md §5 ordering rule (b)). Called before
    /// the atomic phase's white flip, so "dead" here means plain
    /// `is_white` (unmarked this cycle) rather than `is_dead(other_white)`
    /// — the latter only becomes meaningful once sweep has the post-flip
    /// color in hand.
    pub(crate) fn separate_tobefnz(&mut self, all: bool) {
        let members: Vec<GcId> = self.lists.finobj.iter(&self.heap).collect();
        for id in members {
            let dead = all
                || self
                    .heap
                    .header(id)
                    .map(|h| h.is_white())
                    .unwrap_or(false);
            if dead {
                self.lists.finobj.remove(&mut self.heap, id);
                self.lists.tobefnz.push_back(&mut self.heap, id);
            }
        }
    }

    /// `GCTM`: dequeue one finalizable object, run its finalizer (caught,
    /// never allowed to panic through the collector), and hand it back to
    /// `allgc` resurrected — resurrection per spec.md §4.4.
    ///
    /// The object is repainted to the *current* white rather than left
    /// gray or forced black: this phase runs after this cycle's sweep has
    /// already passed over `allgc`, so nothing will re-examine its color
    /// again until the next cycle's mark phase does. Painting it current
    /// white makes it behave exactly like a fresh allocation from that
    /// point on — marked if reachable, correctly identified as garbage by
    /// the following cycle's sweep if not. A gray or black repaint here
    /// would make `is_dead` permanently false (no white bit ever set
    /// again), leaking the object even after it becomes truly garbage.
    pub(crate) fn run_one_finalizer(&mut self) -> isize {
        let Some(id) = self.lists.tobefnz.pop_front(&mut self.heap) else {
            return 0;
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            if let Some(hook) = self.finalizer_hook.as_mut() {
                hook(id);
            }
        }));
        if outcome.is_err() {
            (self.warn_hook)("finalizer panicked; object reclaimed without completing __gc");
        }

        let current_white = self.current_white;
        if let Some(h) = self.heap.header_mut(id) {
            h.make_white(current_white);
        }
        self.lists.allgc.push_front(&mut self.heap, id);

        self.heap.estimate_size(id) as isize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::Gc;
    use crate::object::{Header, TableObj};

    fn fresh_table(gc: &mut Gc) -> GcId {
        let idx = gc.heap.tables.insert(TableObj::new(Header::new(gc.current_white)));
        let id = GcId::Table(idx);
        gc.lists.allgc.push_front(&mut gc.heap, id);
        id
    }

    #[test]
    fn check_finalizer_moves_to_finobj_once() {
        let mut gc = Gc::default();
        let id = fresh_table(&mut gc);
        gc.check_finalizer(id, true);
        assert!(gc.lists.finobj.iter(&gc.heap).any(|x| x == id));
        assert!(!gc.lists.allgc.iter(&gc.heap).any(|x| x == id));
        assert!(gc.heap.header(id).unwrap().is_finalized());

        // Re-running with an already-finalized object is a no-op.
        gc.lists.finobj.remove(&mut gc.heap, id);
        gc.lists.allgc.push_front(&mut gc.heap, id);
        gc.check_finalizer(id, true);
        assert!(!gc.lists.finobj.iter(&gc.heap).any(|x| x == id));
    }

    #[test]
    fn dead_finobj_member_moves_to_tobefnz_in_order() {
        let mut gc = Gc::default();
        let a = fresh_table(&mut gc);
        let b = fresh_table(&mut gc);
        gc.check_finalizer(a, true);
        gc.check_finalizer(b, true);
        let other_white = gc.other_white();
        gc.heap.header_mut(a).unwrap().make_white(other_white);
        gc.heap.header_mut(b).unwrap().make_white(other_white);

        gc.separate_tobefnz(false);
        assert_eq!(gc.lists.tobefnz.pop_front(&mut gc.heap), Some(b));
        assert_eq!(gc.lists.tobefnz.pop_front(&mut gc.heap), Some(a));
    }

    #[test]
    fn run_one_finalizer_resurrects_into_allgc() {
        let mut gc = Gc::default();
        let id = fresh_table(&mut gc);
        gc.check_finalizer(id, true);
        gc.separate_tobefnz(true);
        let current_white = gc.current_white;
        gc.run_one_finalizer();
        assert!(gc.lists.allgc.iter(&gc.heap).any(|x| x == id));
        // Resurrected means repainted to the live current white, exactly
        // like a fresh allocation, not left gray or forced black.
        assert!(gc.heap.header(id).unwrap().is_white());
        assert!(!gc.heap.header(id).unwrap().is_dead(current_white ^ 1));
    }
}
