//! Color propagation, per-type traversal, weak-table handling, and
//! ephemeron convergence (spec.md §4.2).

use crate::gc::Gc;
use crate::object::{ClosureKind, GcId, UpvalueState, Value, WeakMode};

impl Gc {
    /// Mark a value reachable. Strings go black immediately (leaves);
    /// everything else collectable goes gray and onto `gray` if not
    /// already non-white.
    pub(crate) fn mark_value(&mut self, v: &Value) {
        if let Some(id) = v.as_gc_id() {
            self.mark_object(id);
        }
    }

    pub(crate) fn mark_object(&mut self, id: GcId) {
        match id {
            GcId::ShortStr(i) => {
                if let Some(s) = self.heap.short_strings.get_mut(i) {
                    if s.header.is_white() {
                        s.header.make_black();
                    }
                }
            }
            GcId::LongStr(i) => {
                if let Some(s) = self.heap.long_strings.get_mut(i) {
                    if s.header.is_white() {
                        s.header.make_black();
                    }
                }
            }
            _ => {
                if let Some(h) = self.heap.header_mut(id) {
                    if h.is_white() {
                        h.make_gray();
                        self.lists.gray.push(id);
                    }
                }
            }
        }
    }

    /// Pop one object off `gray`, traverse it, and account its estimated
    /// size toward `gc_marked` (spec.md §4.2 "propagate_one").
    pub(crate) fn propagate_mark(&mut self) -> isize {
        let Some(id) = self.lists.gray.pop() else {
            return 0;
        };
        self.mark_one(id);
        let size = self.heap.estimate_size(id) as isize;
        self.gc_marked += size;
        size
    }

    fn mark_one(&mut self, id: GcId) {
        match id {
            GcId::Table(i) => self.traverse_table(i),
            GcId::Closure(i) => self.traverse_closure(i),
            GcId::Proto(i) => self.traverse_proto(i),
            GcId::Thread(i) => self.traverse_thread(i),
            GcId::Userdata(i) => self.traverse_userdata(i),
            GcId::Upvalue(i) => self.traverse_upvalue(i),
            GcId::ShortStr(_) | GcId::LongStr(_) => {
                if let Some(h) = self.heap.header_mut(id) {
                    h.make_black();
                }
            }
        }
    }

    fn traverse_upvalue(&mut self, i: u32) {
        let closed = match self.heap.upvalues.get(i) {
            Some(u) => match &u.state {
                UpvalueState::Closed(v) => Some(*v),
                UpvalueState::Open { .. } => None,
            },
            None => return,
        };
        match closed {
            Some(v) => {
                self.mark_value(&v);
                if let Some(u) = self.heap.upvalues.get_mut(i) {
                    u.header.make_black();
                }
            }
            // Open upvalues stay gray: their value lives on the owning
            // thread's stack, which marks the slot itself. `remark_upvals`
            // (atomic phase) catches the case where the thread is gone.
            None => {}
        }
    }

    fn traverse_closure(&mut self, i: u32) {
        let (upvalues, proto) = match self.heap.closures.get_mut(i) {
            Some(c) => {
                c.header.make_black();
                match &c.kind {
                    ClosureKind::Light { upvalues } => (upvalues.clone(), None),
                    ClosureKind::Heavy { proto, upvalues } => (upvalues.clone(), Some(*proto)),
                }
            }
            None => return,
        };
        for uv in upvalues {
            self.mark_object(uv);
        }
        if let Some(p) = proto {
            self.mark_object(p);
        }
    }

    fn traverse_proto(&mut self, i: u32) {
        let Some(p) = self.heap.protos.get_mut(i) else {
            return;
        };
        p.header.make_black();
        let source = p.source_name;
        let constants = p.constants.clone();
        let upvalue_names: Vec<_> = p.upvalue_debug_names.clone();
        let nested = p.nested.clone();
        let local_names: Vec<_> = p.local_names.clone();

        if let Some(s) = source {
            self.mark_object(s);
        }
        for c in &constants {
            self.mark_value(c);
        }
        for name in upvalue_names.into_iter().flatten() {
            self.mark_object(name);
        }
        for child in nested {
            self.mark_object(child);
        }
        for name in local_names.into_iter().flatten() {
            self.mark_object(name);
        }
    }

    fn traverse_thread(&mut self, i: u32) {
        let Some(t) = self.heap.threads.get_mut(i) else {
            return;
        };
        t.header.make_black();
        let stack_values: Vec<Value> = t.stack[..t.top.min(t.stack.len())].to_vec();
        let open_upvalues = t.open_upvalues.clone();

        for v in &stack_values {
            self.mark_value(v);
        }
        for uv in &open_upvalues {
            self.mark_object(*uv);
        }

        // Threads with open upvalues must be re-examined at the atomic
        // phase (and stay in `grayagain` while propagating, or if old) —
        // otherwise a closed-over stack slot mutated after this traversal
        // would be missed.
        let is_old = self
            .heap
            .threads
            .get(i)
            .map(|t| t.header.is_old())
            .unwrap_or(false);
        if self.state.is_propagate() || is_old {
            self.lists.grayagain.push(GcId::Thread(i));
        }
        if let Some(t) = self.heap.threads.get_mut(i) {
            if !t.open_upvalues.is_empty() && !t.in_twups {
                t.in_twups = true;
                self.lists.twups.push(GcId::Thread(i));
            }
        }
    }

    fn traverse_userdata(&mut self, i: u32) {
        let Some(u) = self.heap.userdata.get_mut(i) else {
            return;
        };
        u.header.make_black();
        let mt = u.metatable;
        let values = u.user_values.clone();
        if let Some(mt) = mt {
            self.mark_object(mt);
        }
        for v in &values {
            self.mark_value(v);
        }
        self.gen_link(GcId::Userdata(i));
    }

    fn traverse_table(&mut self, i: u32) {
        let Some(t) = self.heap.tables.get_mut(i) else {
            return;
        };
        t.header.make_black();
        let mode = t.weak_mode;
        let metatable = t.metatable;

        if let Some(mt) = metatable {
            self.mark_object(mt);
        }

        match mode {
            WeakMode::Strong => self.traverse_strong_table(i),
            WeakMode::WeakValue => self.traverse_weak_value(i),
            WeakMode::Ephemeron => self.traverse_ephemeron(i, false),
            WeakMode::AllWeak => {
                self.lists.allweak.push(GcId::Table(i));
            }
        }
    }

    fn traverse_strong_table(&mut self, i: u32) {
        let Some(t) = self.heap.tables.get(i) else {
            return;
        };
        let array = t.array.clone();
        let pairs: Vec<(Value, Value)> = t.hash.iter().map(|(k, v)| (*k, *v)).collect();
        for v in &array {
            self.mark_value(v);
        }
        for (k, v) in &pairs {
            self.mark_value(k);
            self.mark_value(v);
        }
        self.gen_link(GcId::Table(i));
    }

    /// A weak-value table always marks its keys (keys are strong even in
    /// `WeakMode::WeakValue` mode); while still propagating it retires to
    /// `grayagain` for a second look once marking settles, exactly like
    /// `traverse_ephemeron` below. The second look (reached once `state`
    /// is no longer `Propagate`, i.e. from the atomic phase's gray redrain)
    /// is where clearing actually gets decided: if any value is still
    /// white at that point, the table is parked on `weak` for `atomic` to
    /// clear later.
    fn traverse_weak_value(&mut self, i: u32) {
        let Some(t) = self.heap.tables.get(i) else {
            return;
        };
        let array = t.array.clone();
        let pairs: Vec<(Value, Value)> = t.hash.iter().map(|(k, v)| (*k, *v)).collect();
        for k in pairs.iter().map(|(k, _)| k) {
            self.mark_value(k);
        }

        if self.state.is_propagate() {
            self.lists.grayagain.push(GcId::Table(i));
            return;
        }

        let mut has_white_value = false;
        for v in array.iter().chain(pairs.iter().map(|(_, v)| v)) {
            if self.is_cleared(v) {
                has_white_value = true;
            }
        }
        if has_white_value {
            self.lists.weak.push(GcId::Table(i));
        }
    }

    fn traverse_ephemeron(&mut self, i: u32, invert: bool) {
        let Some(t) = self.heap.tables.get(i) else {
            return;
        };
        let array = t.array.clone();
        let mut pairs: Vec<(Value, Value)> = t.hash.iter().map(|(k, v)| (*k, *v)).collect();
        if invert {
            pairs.reverse();
        }

        let mut marked_any = false;
        for v in &array {
            if v.is_collectable() && self.is_white(v) {
                marked_any = true;
                self.mark_value(v);
            }
        }

        let mut has_clears = false;
        let mut has_white_white = false;
        for (k, v) in &pairs {
            if self.is_cleared(k) {
                has_clears = true;
                if v.is_collectable() && self.is_white(v) {
                    has_white_white = true;
                }
            } else if v.is_collectable() && self.is_white(v) {
                marked_any = true;
                self.mark_value(v);
            }
        }

        if self.state.is_propagate() {
            self.lists.grayagain.push(GcId::Table(i));
        } else if has_white_white {
            self.lists.ephemeron.push(GcId::Table(i));
        } else if has_clears {
            self.lists.allweak.push(GcId::Table(i));
        } else {
            self.gen_link(GcId::Table(i));
        }

        if marked_any {
            self.ephemeron_progress = true;
        }
    }

    /// `converge_ephemerons`: repeatedly re-traverse the current
    /// `ephemeron` list (alternating scan direction each pass, per
    /// `lgc.c`'s `inv` flag, to speed convergence on chains) until a full
    /// pass marks nothing new.
    pub(crate) fn converge_ephemerons(&mut self) {
        let mut invert = false;
        loop {
            let list = std::mem::take(&mut self.lists.ephemeron);
            if list.is_empty() {
                break;
            }
            self.ephemeron_progress = false;
            for id in list {
                if let GcId::Table(i) = id {
                    self.traverse_ephemeron(i, invert);
                }
            }
            while !self.lists.gray.is_empty() {
                self.propagate_mark();
            }
            invert = !invert;
            if !self.ephemeron_progress {
                break;
            }
        }
    }

    /// A key/value is cleared iff collectable and white; strings are
    /// never weakly cleared (they're "values", per `lgc.c`'s `iscleared`).
    pub(crate) fn is_cleared(&mut self, v: &Value) -> bool {
        match v {
            Value::Obj(id) if id.is_string() => {
                // Strings act as roots for weak-clearing purposes: being
                // referenced from a weak slot alone keeps them marked.
                self.mark_object(*id);
                false
            }
            Value::Obj(id) => self.is_white(&Value::Obj(*id)),
            _ => false,
        }
    }

    fn is_white(&self, v: &Value) -> bool {
        v.as_gc_id()
            .and_then(|id| self.heap.header(id))
            .map(|h| h.is_white())
            .unwrap_or(false)
    }

    /// `clear_by_values`: empty every array/hash slot whose *value* is
    /// cleared. `already_cleared` is the list length snapshotted before the
    /// previous pass; when given, only the tail beyond it (tables newly
    /// linked onto the list by resurrection during `mark_tobefnz`) is
    /// processed, so a second pass doesn't redo work the first pass already
    /// did (spec.md §4.7.1 step 11).
    pub(crate) fn clear_by_values(&mut self, which: WeakList, already_cleared: Option<usize>) {
        let list = self.weak_list_mut(which);
        let n = already_cleared.unwrap_or(0).min(list.len());
        let ids: Vec<GcId> = list[n..].to_vec();
        for id in ids {
            let GcId::Table(i) = id else { continue };
            let Some(t) = self.heap.tables.get_mut(i) else {
                continue;
            };
            for slot in t.array.iter_mut() {
                if slot.is_collectable() && self.is_cleared_immut(slot) {
                    *slot = Value::Nil;
                }
            }
            let dead_keys: Vec<Value> = t
                .hash
                .iter()
                .filter(|(_, v)| v.is_collectable() && self.is_cleared_immut(v))
                .map(|(k, _)| *k)
                .collect();
            for k in dead_keys {
                t.hash.shift_remove(&k);
            }
        }
    }

    /// `clear_by_keys`: empty every hash entry whose *key* is unmarked.
    pub(crate) fn clear_by_keys(&mut self, which: WeakList) {
        let ids: Vec<GcId> = self.weak_list_mut(which).clone();
        for id in ids {
            let GcId::Table(i) = id else { continue };
            let Some(t) = self.heap.tables.get_mut(i) else {
                continue;
            };
            let dead_keys: Vec<Value> = t
                .hash
                .iter()
                .filter(|(k, _)| k.is_collectable() && self.is_cleared_immut(k))
                .map(|(k, _)| *k)
                .collect();
            for k in dead_keys {
                t.hash.shift_remove(&k);
            }
        }
    }

    fn is_cleared_immut(&self, v: &Value) -> bool {
        match v {
            Value::Obj(id) if id.is_string() => false,
            Value::Obj(_) => self.is_white(v),
            _ => false,
        }
    }

    fn weak_list_mut(&mut self, which: WeakList) -> &mut Vec<GcId> {
        match which {
            WeakList::Weak => &mut self.lists.weak,
            WeakList::Ephemeron => &mut self.lists.ephemeron,
            WeakList::AllWeak => &mut self.lists.allweak,
        }
    }

    /// Generational hook: decide whether an already-black object still
    /// needs to sit in a gray-ish list so it gets re-examined (objects
    /// just promoted old, or touched, need another look). In incremental
    /// mode this is a no-op — once black, an object is simply done.
    pub(crate) fn gen_link(&mut self, id: GcId) {
        if !self.mode.is_generational() {
            return;
        }
        let Some(h) = self.heap.header(id) else {
            return;
        };
        use crate::object::Age;
        if h.age() == Age::Touched1 || h.age() == Age::Touched2 {
            self.lists.grayagain.push(id);
        }
    }
}

/// Which weak work-list an operation targets.
#[derive(Debug, Clone, Copy)]
pub enum WeakList {
    Weak,
    Ephemeron,
    AllWeak,
}
