//! Cross-module end-to-end scenarios (spec.md §8) that don't belong to
//! any single file's inline `#[cfg(test)]` block.

use trigc::{ClosureKind, GcId, GcKind, Value, WeakMode};

#[test]
fn weak_value_table_clears_entries_whose_value_died() {
    let mut gc = trigc::Gc::new();
    let weak = gc.new_table();
    let kept_alive = gc.new_table();
    let collected = gc.new_table();

    gc.fix_object(weak);
    gc.fix_object(kept_alive);
    // `collected` is deliberately left unrooted other than through the
    // weak table below.

    gc.table_mut(weak).unwrap().weak_mode = WeakMode::WeakValue;
    gc.table_mut(weak)
        .unwrap()
        .hash
        .insert(Value::Int(1), Value::Obj(collected));

    gc.full_gc(false);

    assert!(
        !gc.is_alive(collected),
        "value-only reference must not keep an object alive"
    );
    // The entry must be gone, not merely left dangling on a freed id: a
    // freed arena slot can be reused by a later allocation, so a lingering
    // `Value::Obj(collected)` would silently alias whatever gets allocated
    // into that slot next.
    assert!(
        gc.table(weak).unwrap().hash.is_empty(),
        "the weak table must actually clear the dead entry, not just let its value get freed"
    );
}

#[test]
fn ephemeron_table_keeps_value_alive_only_while_key_lives() {
    let mut gc = trigc::Gc::new();
    let eph = gc.new_table();
    let key = gc.new_table();
    let value = gc.new_table();

    gc.fix_object(eph);
    gc.fix_object(key);
    gc.table_mut(eph).unwrap().weak_mode = WeakMode::Ephemeron;
    gc.table_mut(eph)
        .unwrap()
        .hash
        .insert(Value::Obj(key), Value::Obj(value));

    gc.full_gc(false);
    assert!(
        gc.is_alive(value),
        "value must survive while its ephemeron key is a live root"
    );

    gc.unfix_object(key);
    gc.full_gc(false);
    assert!(
        !gc.is_alive(value),
        "value must be collected once its ephemeron key dies"
    );
}

#[test]
fn finalizer_can_resurrect_its_object() {
    let mut gc = trigc::Gc::new();
    let obj = gc.new_table();
    gc.check_finalizer(obj, true);

    let resurrected = std::rc::Rc::new(std::cell::RefCell::new(false));
    let flag = resurrected.clone();
    gc.set_finalizer_hook(Box::new(move |_id| {
        *flag.borrow_mut() = true;
    }));

    gc.full_gc(false);
    assert!(*resurrected.borrow(), "finalizer hook must run exactly once");
    assert!(
        gc.is_alive(obj),
        "an object is alive again once its finalizer has run"
    );

    // A second full collection with nothing else rooting it reclaims it
    // for good: the FINALIZED flag prevents a second finobj migration.
    gc.full_gc(false);
    assert!(!gc.is_alive(obj));
}

#[test]
fn generational_minor_cycle_keeps_fixed_objects_alive() {
    let mut gc = trigc::Gc::new();
    let root = gc.new_table();
    gc.fix_object(root);
    gc.change_mode(GcKind::Generational);
    assert_eq!(gc.mode_kind(), GcKind::Generational);

    for _ in 0..5 {
        gc.new_table();
        gc.gc_step();
    }

    assert!(gc.is_alive(root));
}

#[test]
fn write_barrier_prevents_black_to_white_leak_mid_propagation() {
    let mut gc = trigc::Gc::new();
    let owner = gc.new_table();
    gc.fix_object(owner);

    // Drive the state machine until `owner` is actually marked black by
    // ordinary propagation, so the barrier below is exercised for real.
    while !gc.is_black(owner) {
        if gc.step_once() {
            break;
        }
    }

    let referent = gc.new_table();
    gc.table_mut(owner)
        .unwrap()
        .hash
        .insert(Value::Int(1), Value::Obj(referent));
    gc.barrier_forward(owner, referent);

    gc.full_gc(false);
    assert!(gc.is_alive(referent));
}

#[test]
fn interning_the_same_bytes_twice_yields_byte_identical_object() {
    let mut gc = trigc::Gc::new();
    let a = gc.intern_short(b"light").unwrap();
    let b = gc.intern_short(b"light").unwrap();
    assert_eq!(a, b);
}

#[test]
fn closure_over_proto_keeps_proto_and_upvalues_alive() {
    let mut gc = trigc::Gc::new();
    let proto = gc.new_proto();
    let thread = gc.new_thread();
    let uv = gc.new_open_upvalue(thread, 0);
    let closure = gc.new_closure(ClosureKind::Heavy {
        proto,
        upvalues: vec![uv],
    });
    gc.fix_object(closure);

    gc.full_gc(false);
    assert!(gc.is_alive(proto));
    assert!(gc.is_alive(uv));
}

fn _unused(_: GcId) {}
