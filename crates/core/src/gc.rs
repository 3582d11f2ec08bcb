//! Tri-colour mark-and-sweep garbage collection over a [`Heap`].
//!
//! Executed synchronously, typically every N scheduler ticks (see
//! `raven_vm::scheduler`). Roots are painted gray and enqueued; the gray
//! list is drained by tracing each object's children (gray-marking them in
//! turn); once empty, every heap object still white is swept, and survivors
//! are re-whitened for the next cycle.
//!
//! The gray list here is a plain `Vec<HeapRef>` side list rather than a
//! pointer-tagged intrusive list threaded through the objects themselves --
//! safe Rust ownership doesn't give us a spare field to steal for that, and
//! a side `Vec` is the natural substitute.

use crate::heap::{Heap, HeapExt};
use crate::value::{GcColor, HeapRef, Value};

/// Outcome of one collection cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectReport {
    pub freed: usize,
    pub marked: usize,
}

/// Run one full mark-and-sweep cycle.
///
/// `roots` must yield every value directly reachable from outside the heap:
/// the symbol table's gensym roots, every live fiber's accumulator/stack/
/// per-fiber vars, engine-wide vars, and the scheduler's fiber list --
/// whatever the caller currently holds live.
pub fn collect<Ext: HeapExt>(
    heap: &mut Heap<Ext>,
    roots: impl IntoIterator<Item = Value>,
) -> CollectReport {
    let mut gray: Vec<HeapRef> = Vec::new();
    let mut marked = 0usize;

    for v in roots {
        mark_value(heap, v, &mut gray, &mut marked);
    }

    while let Some(r) = gray.pop() {
        heap.set_color(r, GcColor::Black);
        let mut children = Vec::new();
        heap.trace_ref(r, &mut |v| children.push(v));
        for v in children {
            mark_value(heap, v, &mut gray, &mut marked);
        }
    }

    let dead: Vec<HeapRef> = heap
        .live_refs()
        .filter(|r| heap.color(*r) == GcColor::White)
        .collect();
    let freed = dead.len();
    for r in dead {
        heap.free(r);
    }

    // Re-whiten every surviving object for the next cycle.
    let survivors: Vec<HeapRef> = heap.live_refs().collect();
    for r in survivors {
        heap.set_color(r, GcColor::White);
    }

    heap.record_collection(freed);
    CollectReport { freed, marked }
}

fn mark_value<Ext: HeapExt>(
    heap: &Heap<Ext>,
    v: Value,
    gray: &mut Vec<HeapRef>,
    marked: &mut usize,
) {
    if let Value::Ptr(r) = v {
        if heap.color(r) == GcColor::White {
            heap.set_color(r, GcColor::Gray);
            gray.push(r);
            *marked += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapObjectKind;
    use crate::value::TypeTag;

    enum TestExt {
        Cons(Value, Value),
    }

    impl HeapExt for TestExt {
        fn trace(&self, mark: &mut dyn FnMut(Value)) {
            match self {
                TestExt::Cons(a, b) => {
                    mark(*a);
                    mark(*b);
                }
            }
        }
        fn type_tag(&self) -> TypeTag {
            TypeTag::Mixed
        }
    }

    #[test]
    fn unreachable_objects_are_collected() {
        let mut heap: Heap<TestExt> = Heap::new();
        let s1 = heap.alloc(HeapObjectKind::String("keep".into()));
        let _s2 = heap.alloc(HeapObjectKind::String("drop".into()));

        let report = collect(&mut heap, [Value::Ptr(s1)]);
        assert_eq!(report.freed, 1);
        assert_eq!(heap.stats().live_objects, 1);
    }

    #[test]
    fn reachable_through_children_survives() {
        let mut heap: Heap<TestExt> = Heap::new();
        let leaf = heap.alloc(HeapObjectKind::String("leaf".into()));
        let cons = heap.alloc(HeapObjectKind::Ext(TestExt::Cons(
            Value::Ptr(leaf),
            Value::Nil,
        )));

        let report = collect(&mut heap, [Value::Ptr(cons)]);
        assert_eq!(report.freed, 0);
        // Both survive and both are re-whitened.
        assert_eq!(heap.color(leaf), GcColor::White);
        assert_eq!(heap.color(cons), GcColor::White);
    }

    #[test]
    fn cycle_with_no_external_root_is_collected() {
        let mut heap: Heap<TestExt> = Heap::new();
        // Build a self-referential pair after the fact via two allocations;
        // cons cells can't literally hold their own not-yet-existing
        // HeapRef in one alloc call, so approximate a cycle with two nodes
        // pointing at each other through Nil placeholders is unnecessary --
        // the point under test is that with zero roots, everything dies.
        let a = heap.alloc(HeapObjectKind::String("a".into()));
        let b = heap.alloc(HeapObjectKind::Ext(TestExt::Cons(Value::Ptr(a), Value::Nil)));
        let _ = b;

        let report = collect(&mut heap, []);
        assert_eq!(report.freed, 2);
        assert_eq!(heap.stats().live_objects, 0);
    }
}
