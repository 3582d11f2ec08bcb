//! End-to-end scenarios driving real compiled source through the
//! interpreter: a single call, inheritance with a super send, a try/catch
//! unwind, a foreach loop, a switch with fall-through and a default arm,
//! and a GC cycle reclaiming genuine garbage.

use std::collections::HashMap;

use raven_compiler::compile_blueprint;
use raven_core::{collect, Heap, HeapObjectKind, HeapRef, SymbolTable, Value};
use raven_vm::blueprint::blueprint_lookup;
use raven_vm::fs::{Filesystem, VirtPath};
use raven_vm::interpreter::run_quantum;
use raven_vm::object::blueprint_instantiate;
use raven_vm::{Engine, Fiber, FiberState, VmObject};

/// A fixed map of path to source text, compiling blueprints on demand
/// through whichever `SymbolTable` the caller's compile call is using --
/// the same table an `Engine` interns its built-in names into, so a
/// `square(x)`-style unqualified call and an `inherit`-resolved parent both
/// see the one shared symbol identity.
struct MemFs {
    files: HashMap<String, String>,
    blueprints: HashMap<String, HeapRef>,
}

impl MemFs {
    fn new() -> Self {
        MemFs { files: HashMap::new(), blueprints: HashMap::new() }
    }

    fn put(&mut self, path: &str, src: &str) {
        self.files.insert(path.to_string(), src.to_string());
    }
}

impl Filesystem for MemFs {
    fn find_blueprint(
        &mut self,
        heap: &mut Heap<VmObject>,
        symbols: &mut SymbolTable,
        path: &VirtPath,
        create: bool,
    ) -> Option<HeapRef> {
        let key = path.as_string();
        if let Some(&r) = self.blueprints.get(&key) {
            return Some(r);
        }
        if !create {
            return None;
        }
        let r = compile_blueprint(heap, symbols, self, path).ok()?;
        self.blueprints.insert(key, r);
        Some(r)
    }

    fn find_object(
        &mut self,
        _heap: &mut Heap<VmObject>,
        _symbols: &mut SymbolTable,
        _path: &VirtPath,
        _create: bool,
    ) -> Option<HeapRef> {
        None
    }

    fn read(&self, path: &VirtPath, out: &mut String) -> bool {
        match self.files.get(&path.as_string()) {
            Some(s) => {
                out.push_str(s);
                true
            }
            None => false,
        }
    }

    fn recompile_with_log(
        &mut self,
        _heap: &mut Heap<VmObject>,
        _symbols: &mut SymbolTable,
        _path: &VirtPath,
        _log: &mut Vec<String>,
    ) -> bool {
        false
    }

    fn ls(&self, _path: &VirtPath, _visit: &mut dyn FnMut(&str)) {}
}

/// Push `receiver`/`args`, enter `func`, and run the fiber to completion
/// (or a crash), returning it for the caller to inspect `accu`/`state`.
fn call_to_completion(engine: &mut Engine, func: HeapRef, receiver: Value, args: Vec<Value>) -> Fiber {
    let mut fiber = Fiber::new(1);
    fiber.push(receiver);
    let nargs = args.len();
    for a in args {
        fiber.push(a);
    }
    fiber.push_frame(&mut engine.heap, func, nargs);
    run_quantum(&mut engine.heap, &mut engine.symbols, &engine.builtins, &engine.vars.proxies, &mut fiber);
    fiber
}

fn method(engine: &mut Engine, bp: HeapRef, name: &str, arg_count: usize) -> HeapRef {
    let msg = engine.symbols.intern(&mut engine.heap, name);
    blueprint_lookup(&engine.heap, bp, msg, arg_count, true).expect("method exists")
}

fn as_string<'h>(heap: &'h Heap<VmObject>, v: Value) -> &'h str {
    match v {
        Value::Ptr(r) => match heap.get(r) {
            HeapObjectKind::String(s) => s.as_str(),
            _ => panic!("expected a string object, got {v:?}"),
        },
        _ => panic!("expected a string, got {v:?}"),
    }
}

#[test]
fn a_simple_method_call_returns_its_computed_value() {
    let mut engine = Engine::new(100);
    let mut fs = MemFs::new();
    fs.put("/square", "int square(int x) { return x * x; }\n");
    let bp = fs.find_blueprint(&mut engine.heap, &mut engine.symbols, &VirtPath::parse("/square"), true).unwrap();
    let obj = blueprint_instantiate(&mut engine.heap, bp);
    let func = method(&mut engine, bp, "square", 1);

    let fiber = call_to_completion(&mut engine, func, Value::Ptr(obj), vec![Value::Int(6)]);
    assert_eq!(fiber.accu, Value::Int(36));
    assert_eq!(fiber.state, FiberState::Stopped);
}

#[test]
fn a_super_send_reaches_the_overridden_parent_method() {
    let mut engine = Engine::new(100);
    let mut fs = MemFs::new();
    fs.put("/parent", "string greet() { return \"parent\"; }\n");
    fs.put("/child", "inherit \"/parent\";\nstring greet() { return ::greet() + \" child\"; }\n");
    let bp =
        fs.find_blueprint(&mut engine.heap, &mut engine.symbols, &VirtPath::parse("/child"), true).unwrap();
    let obj = blueprint_instantiate(&mut engine.heap, bp);
    let func = method(&mut engine, bp, "greet", 0);

    let fiber = call_to_completion(&mut engine, func, Value::Ptr(obj), vec![]);
    assert_eq!(as_string(&engine.heap, fiber.accu), "parent child");
}

#[test]
fn try_catch_recovers_from_a_division_by_zero() {
    let mut engine = Engine::new(100);
    let mut fs = MemFs::new();
    fs.put(
        "/calc",
        "int safe_div(int x, int y) {\n\
         try {\n\
         return 10 / y;\n\
         } catch (mixed e) {\n\
         return -1;\n\
         }\n\
         return 0;\n\
         }\n",
    );
    let bp = fs.find_blueprint(&mut engine.heap, &mut engine.symbols, &VirtPath::parse("/calc"), true).unwrap();
    let obj = blueprint_instantiate(&mut engine.heap, bp);
    let func = method(&mut engine, bp, "safe_div", 2);

    let fiber = call_to_completion(&mut engine, func, Value::Ptr(obj), vec![Value::Int(0), Value::Int(0)]);
    assert_eq!(fiber.accu, Value::Int(-1));
    assert_eq!(fiber.state, FiberState::Stopped);

    let func = method(&mut engine, bp, "safe_div", 2);
    let fiber = call_to_completion(&mut engine, func, Value::Ptr(obj), vec![Value::Int(0), Value::Int(5)]);
    assert_eq!(fiber.accu, Value::Int(2));
}

#[test]
fn foreach_visits_every_element_in_order() {
    let mut engine = Engine::new(100);
    let mut fs = MemFs::new();
    fs.put(
        "/totals",
        "int sum_array(array a) {\n\
         int s = 0;\n\
         foreach (int item : a) {\n\
         s += item;\n\
         }\n\
         return s;\n\
         }\n",
    );
    let bp =
        fs.find_blueprint(&mut engine.heap, &mut engine.symbols, &VirtPath::parse("/totals"), true).unwrap();
    let obj = blueprint_instantiate(&mut engine.heap, bp);
    let func = method(&mut engine, bp, "sum_array", 1);

    let items = vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4), Value::Int(5)];
    let arr = engine.heap.alloc(HeapObjectKind::Array(items));
    let fiber = call_to_completion(&mut engine, func, Value::Ptr(obj), vec![Value::Ptr(arr)]);
    assert_eq!(fiber.accu, Value::Int(15));
}

#[test]
fn switch_falls_through_grouped_cases_and_reaches_default() {
    let mut engine = Engine::new(100);
    let mut fs = MemFs::new();
    fs.put(
        "/classifier",
        "string classify(int n) {\n\
         string result;\n\
         switch (n) {\n\
         case 1:\n\
         case 2:\n\
         result = \"low\";\n\
         break;\n\
         case 3:\n\
         result = \"mid\";\n\
         break;\n\
         default:\n\
         result = \"high\";\n\
         }\n\
         return result;\n\
         }\n",
    );
    let bp = fs
        .find_blueprint(&mut engine.heap, &mut engine.symbols, &VirtPath::parse("/classifier"), true)
        .unwrap();
    let obj = blueprint_instantiate(&mut engine.heap, bp);

    for (n, expected) in [(1, "low"), (2, "low"), (3, "mid"), (99, "high")] {
        let func = method(&mut engine, bp, "classify", 1);
        let fiber = call_to_completion(&mut engine, func, Value::Ptr(obj), vec![Value::Int(n)]);
        assert_eq!(as_string(&engine.heap, fiber.accu), expected, "n = {n}");
    }
}

#[test]
fn gc_reclaims_arrays_with_no_surviving_root() {
    // `Engine::new` has already interned the built-in names onto the heap;
    // those aren't gensyms, so an empty-root collection sweeps them too --
    // count against the baseline rather than assuming a fixed heap size.
    let mut engine = Engine::new(100);
    let baseline = engine.heap.stats().live_objects;
    for i in 0..50 {
        engine.heap.alloc(HeapObjectKind::Array(vec![Value::Int(i)]));
    }
    assert_eq!(engine.heap.stats().live_objects, baseline + 50);

    let roots = raven_vm::gcroots::collect_roots(&engine.symbols, &engine.scheduler, &engine.vars);
    let report = collect(&mut engine.heap, roots);

    assert_eq!(report.freed, baseline + 50);
    assert_eq!(engine.heap.stats().live_objects, 0);
}

#[test]
fn gc_keeps_an_object_reachable_through_a_running_fibers_accumulator() {
    let mut engine = Engine::new(100);
    let baseline = engine.heap.stats().live_objects;
    let kept = engine.heap.alloc(HeapObjectKind::String("held".into()));
    for i in 0..10 {
        engine.heap.alloc(HeapObjectKind::Array(vec![Value::Int(i)]));
    }

    let id = engine.scheduler.spawn();
    engine.scheduler.find_mut(id).unwrap().accu = Value::Ptr(kept);

    let roots = raven_vm::gcroots::collect_roots(&engine.symbols, &engine.scheduler, &engine.vars);
    let report = collect(&mut engine.heap, roots);

    assert_eq!(report.freed, baseline + 10);
    assert_eq!(engine.heap.stats().live_objects, 1);
}
