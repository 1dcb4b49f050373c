//! Forward and back write barriers (spec.md §4.5).

use crate::gc::Gc;
use crate::object::{Age, GcId};

impl Gc {
    /// Called when a black/old `owner` is made to reference a white/young
    /// `referent`.
    pub fn barrier_forward(&mut self, owner: GcId, referent: GcId) {
        let owner_black = self
            .heap
            .header(owner)
            .map(|h| h.is_black())
            .unwrap_or(false);
        if !owner_black {
            return;
        }
        let referent_white = self
            .heap
            .header(referent)
            .map(|h| h.is_white())
            .unwrap_or(false);
        if !referent_white {
            return;
        }

        if self.state.keeps_invariant() {
            self.mark_object(referent);
            let owner_old = self
                .heap
                .header(owner)
                .map(|h| h.is_old())
                .unwrap_or(false);
            if owner_old {
                if let Some(h) = self.heap.header_mut(referent) {
                    h.make_old0();
                }
            }
        } else if self.state.is_sweep_phase() && !self.mode.is_gen_minor() {
            // Incremental sweep: demote `owner` to white so repeated
            // writes to it don't keep re-triggering the barrier.
            if let Some(h) = self.heap.header_mut(owner) {
                h.make_white(self.current_white);
            }
        }
    }

    /// Cheaper barrier for tables: instead of marking the referent, park
    /// `owner` back on `grayagain` for re-traversal at the next atomic
    /// phase.
    pub fn barrier_back(&mut self, owner: GcId) {
        let Some(h) = self.heap.header(owner) else {
            return;
        };
        if !h.is_black() {
            return;
        }
        let age = h.age();

        if self.mode.is_gen_minor() {
            if age < Age::Old0 {
                return;
            }
            if age == Age::Touched1 {
                return;
            }
        }

        if age == Age::Touched2 {
            if let Some(h) = self.heap.header_mut(owner) {
                h.make_gray();
            }
        } else {
            if let Some(h) = self.heap.header_mut(owner) {
                h.make_gray();
            }
            if !self.lists.grayagain.contains(&owner) {
                self.lists.grayagain.push(owner);
            }
        }

        if age >= Age::Old0 {
            if let Some(h) = self.heap.header_mut(owner) {
                h.make_touched1();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::Gc;
    use crate::object::{Header, TableObj};

    fn fresh_black_table(gc: &mut Gc) -> GcId {
        let idx = gc.heap.tables.insert(TableObj::new(Header::new(gc.current_white)));
        let id = GcId::Table(idx);
        gc.heap.header_mut(id).unwrap().make_black();
        id
    }

    #[test]
    fn forward_barrier_marks_white_referent_during_marking() {
        let mut gc = Gc::default();
        gc.state = crate::mode::GcState::Propagate;
        let owner = fresh_black_table(&mut gc);
        let referent_idx = gc.heap.tables.insert(TableObj::new(Header::new(gc.current_white)));
        let referent = GcId::Table(referent_idx);
        assert!(gc.heap.header(referent).unwrap().is_white());

        gc.barrier_forward(owner, referent);
        assert!(!gc.heap.header(referent).unwrap().is_white());
    }

    #[test]
    fn back_barrier_parks_owner_on_grayagain() {
        let mut gc = Gc::default();
        gc.state = crate::mode::GcState::Propagate;
        let owner = fresh_black_table(&mut gc);
        gc.barrier_back(owner);
        assert!(gc.heap.header(owner).unwrap().is_gray());
        assert!(gc.lists.grayagain.contains(&owner));
    }
}
