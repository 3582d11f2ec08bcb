//! Assembles the root set `raven_core::gc::collect` needs from engine-wide
//! state: the symbol table's gensyms, every live fiber, and the proxy/
//! funcref/heartbeat bookkeeping on [`crate::engine::EngineVars`].
//!
//! Kept as its own module (rather than inlined into `Engine::tick`) so the
//! root-enumeration logic has one place to audit and test independently of
//! the scheduler's stepping behaviour.

use raven_core::{SymbolTable, Value};

use crate::engine::EngineVars;
use crate::fiber::Fiber;
use crate::scheduler::Scheduler;

/// Every value directly reachable from outside the heap: gensym'd symbols,
/// every fiber's accumulator/stack/frames, and the engine-wide proxy and
/// funcref table. Heartbeat objects are included too -- a disabled
/// heartbeat removes an object from this list, but an enabled one must not
/// be collected out from under the scheduler's next tick.
pub fn collect_roots<'a>(
    symbols: &'a SymbolTable,
    scheduler: &'a Scheduler,
    vars: &'a EngineVars,
) -> Vec<Value> {
    symbols
        .gensym_roots()
        .iter()
        .map(|&r| Value::Ptr(r))
        .chain(other_roots(scheduler, vars))
        .collect()
}

/// Root sources apart from the symbol table's own gensym list: every live
/// fiber's reachable state plus the engine-wide proxy/funcref/heartbeat
/// bookkeeping. [`raven_core::SymbolTable::retain_gensym_roots`] checks a
/// gensym against this set rather than the full root list it's pruning, so
/// a gensym isn't kept alive by the mere fact that it's already on the
/// list being decided.
pub fn other_roots(scheduler: &Scheduler, vars: &EngineVars) -> Vec<Value> {
    fiber_roots(scheduler).chain(vars.roots()).collect()
}

fn fiber_roots(scheduler: &Scheduler) -> impl Iterator<Item = Value> + '_ {
    scheduler.fibers().flat_map(Fiber::roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use raven_core::{Heap, HeapObjectKind, Value as V};

    use crate::vmobject::VmObject;

    #[test]
    fn gensym_is_a_root_even_with_no_fibers() {
        let mut heap: Heap<VmObject> = Heap::new();
        let mut symbols = SymbolTable::new();
        let g = symbols.gensym(&mut heap);
        let scheduler = Scheduler::new();
        let vars = EngineVars::default();

        let roots = collect_roots(&symbols, &scheduler, &vars);
        assert!(roots.contains(&V::Ptr(g)));
    }

    #[test]
    fn a_running_fibers_accumulator_is_a_root() {
        let mut heap: Heap<VmObject> = Heap::new();
        let symbols = SymbolTable::new();
        let mut scheduler = Scheduler::new();
        let id = scheduler.spawn();
        let s = heap.alloc(HeapObjectKind::String("held".into()));
        scheduler.find_mut(id).unwrap().accu = V::Ptr(s);
        let vars = EngineVars::default();

        let roots = collect_roots(&symbols, &scheduler, &vars);
        assert!(roots.contains(&V::Ptr(s)));
    }

    #[test]
    fn an_enabled_heartbeat_object_is_a_root() {
        let mut heap: Heap<VmObject> = Heap::new();
        let symbols = SymbolTable::new();
        let scheduler = Scheduler::new();
        let mut vars = EngineVars::default();
        let bp = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(crate::blueprint::BlueprintObj::new("/x"))));
        let obj = crate::object::blueprint_instantiate(&mut heap, bp);
        vars.enable_heartbeat(obj);

        let roots = collect_roots(&symbols, &scheduler, &vars);
        assert!(roots.contains(&V::Ptr(obj)));
    }
}
