//! The `Engine`: the single owning context that replaces a would-be
//! global singleton with an explicit context value threaded through
//! every API.
//!
//! `Engine` owns the symbol table, the scheduler and its fibers, the heap,
//! the builtin registry, the proxy/funcref/heartbeat/call-out bookkeeping
//! in [`EngineVars`], and a boxed filesystem/network collaborator. Every
//! driver entry point (`raven-cli`, the seed-scenario tests) takes
//! `&mut Engine` rather than reaching for statics.

use std::collections::HashMap;

use raven_core::{collect, Heap, HeapObjectKind, HeapRef, RavenError, SymbolTable, Value};
use tracing::{debug, error, info, info_span};

use crate::builtins::BuiltinRegistry;
use crate::fiber::{Fiber, FiberState};
use crate::fs::{Filesystem, VirtPath};
use crate::interpreter::{self, EngineEffect};
use crate::net::Network;
use crate::object;
use crate::proxies::Proxies;
use crate::vmobject::VmObject;

/// Engine-wide state that isn't scheduler membership or heap storage:
/// type-tag proxy blueprints, the connect/disconnect funcrefs, the set of
/// objects with a heartbeat enabled, and the live call-out table.
#[derive(Debug, Default)]
pub struct EngineVars {
    pub proxies: Proxies,
    pub connect_func: Option<(Value, HeapRef)>,
    pub disconnect_func: Option<(Value, HeapRef)>,
    heartbeat_objects: Vec<HeapRef>,
    /// call-out id -> the fiber id spawned to run it, once the scheduler
    /// has actually created one. Entries for a call-out still sleeping
    /// its initial delay with no fiber yet are absent; `remove_call_out`
    /// racing that window is handled by `pending_cancels`.
    call_outs: HashMap<u64, u64>,
    pending_cancels: Vec<u64>,
}

impl EngineVars {
    pub fn enable_heartbeat(&mut self, object: HeapRef) {
        if !self.heartbeat_objects.contains(&object) {
            self.heartbeat_objects.push(object);
        }
    }

    pub fn disable_heartbeat(&mut self, object: HeapRef) {
        self.heartbeat_objects.retain(|&o| o != object);
    }

    pub fn heartbeat_objects(&self) -> &[HeapRef] {
        &self.heartbeat_objects
    }
}

pub struct Engine {
    pub heap: Heap<VmObject>,
    pub symbols: SymbolTable,
    pub scheduler: crate::scheduler::Scheduler,
    pub builtins: BuiltinRegistry,
    pub vars: EngineVars,
    pub network: Network,
    pub filesystem: Option<Box<dyn Filesystem>>,
    ticks: u64,
    gc_interval_ticks: u64,
    heartbeat_interval_ticks: u64,
}

impl Engine {
    pub fn new(gc_interval_ticks: u64) -> Self {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let builtins = BuiltinRegistry::install_defaults(&mut heap, &mut symbols);
        Engine {
            heap,
            symbols,
            scheduler: crate::scheduler::Scheduler::new(),
            builtins,
            vars: EngineVars::default(),
            network: Network::new(),
            filesystem: None,
            ticks: 0,
            gc_interval_ticks: gc_interval_ticks.max(1),
            heartbeat_interval_ticks: gc_interval_ticks.max(1),
        }
    }

    pub fn set_filesystem(&mut self, fs: Box<dyn Filesystem>) {
        self.filesystem = Some(fs);
    }

    pub fn set_heartbeat_interval_ticks(&mut self, ticks: u64) {
        self.heartbeat_interval_ticks = ticks.max(1);
    }

    /// Spawn a fiber, push a frame for `func`, seed its stack with
    /// `receiver`/`args`, and leave it `Running` for the next tick to pick
    /// up. Returns the new fiber's id.
    pub fn spawn_call(&mut self, func: HeapRef, receiver: Value, args: Vec<Value>) -> u64 {
        let id = self.scheduler.spawn();
        let fiber = self.scheduler.find_mut(id).expect("just spawned");
        fiber.push(receiver);
        let nargs = args.len();
        for a in args {
            fiber.push(a);
        }
        fiber.push_frame(&mut self.heap, func, nargs);
        id
    }

    /// Run every `Running` fiber once, wake sleepers, apply engine effects,
    /// reap terminated fibers, and GC every `gc_interval_ticks` ticks.
    /// Returns the number of fibers stepped this tick.
    pub fn tick(&mut self) -> usize {
        self.ticks += 1;
        let span = info_span!("engine_tick", ticks = self.ticks, active = self.scheduler.fibers().count());
        let _enter = span.enter();

        self.scheduler.wake_sleepers(self.ticks);

        if self.ticks % self.heartbeat_interval_ticks == 0 {
            self.fire_heartbeats();
        }

        let running_ids: Vec<u64> = self
            .scheduler
            .fibers()
            .filter(|f| f.state == FiberState::Running)
            .map(|f| f.id)
            .collect();

        for id in &running_ids {
            let mut fiber = match self.scheduler.find_mut(*id) {
                Some(f) => std::mem::replace(f, Fiber::new(0)),
                None => continue,
            };
            let effects = interpreter::run_quantum(
                &mut self.heap,
                &mut self.symbols,
                &self.builtins,
                &self.vars.proxies,
                &mut fiber,
            );
            self.log_terminal_state(&fiber);
            if let Some(slot) = self.scheduler.find_mut(*id) {
                *slot = fiber;
            }
            for effect in effects {
                self.apply_effect(*id, effect);
            }
        }

        self.scheduler.reap_terminated();
        let other_roots = crate::gcroots::other_roots(&self.scheduler, &self.vars);
        self.symbols.retain_gensym_roots(&other_roots);

        if self.ticks % self.gc_interval_ticks == 0 {
            self.collect_garbage();
        }

        running_ids.len()
    }

    /// Send `heartbeat` to every object with an enabled heartbeat, each on
    /// its own freshly spawned fiber so one object's crash can't take
    /// another's heartbeat call down with it.
    fn fire_heartbeats(&mut self) {
        let message = self.symbols.intern(&mut self.heap, "heartbeat");
        let objects = self.vars.heartbeat_objects().to_vec();
        for obj in objects {
            let bp = match self.heap.get(obj) {
                HeapObjectKind::Ext(VmObject::Object(o)) => o.pages.last().map(|p| p.blueprint),
                _ => None,
            };
            let Some(bp) = bp else { continue };
            let func = crate::blueprint::blueprint_lookup(&self.heap, bp, message, 0, true)
                .or_else(|| crate::blueprint::blueprint_lookup_inherited(&self.heap, bp, message, 0));
            if let Some(func) = func {
                self.spawn_call(func, Value::Ptr(obj), Vec::new());
            }
        }
    }

    fn log_terminal_state(&self, fiber: &Fiber) {
        match fiber.state {
            FiberState::Crashed => {
                let trace = crate::backtrace::format(&self.heap, fiber);
                error!(fiber = fiber.id, backtrace = %trace, "fiber crashed");
            }
            FiberState::Running if fiber.accu != Value::Nil => {
                debug!(fiber = fiber.id, "fiber threw and was caught");
            }
            _ => {}
        }
    }

    fn apply_effect(&mut self, source_fiber: u64, effect: EngineEffect) {
        match effect {
            EngineEffect::SpawnFiber { call_out_id, func, receiver, args, delay_ticks } => {
                if self.vars.pending_cancels.contains(&call_out_id) {
                    self.vars.pending_cancels.retain(|&c| c != call_out_id);
                    return;
                }
                let new_id = self.spawn_call(func, receiver, args);
                if let Some(delay) = delay_ticks {
                    if let Some(f) = self.scheduler.find_mut(new_id) {
                        f.sleep_until(self.ticks + delay);
                    }
                }
                self.vars.call_outs.insert(call_out_id, new_id);
            }
            EngineEffect::CancelCallOut(call_out_id) => {
                match self.vars.call_outs.remove(&call_out_id) {
                    Some(fiber_id) => {
                        if let Some(f) = self.scheduler.find_mut(fiber_id) {
                            f.state = FiberState::Stopped;
                        }
                    }
                    None => self.vars.pending_cancels.push(call_out_id),
                }
            }
            EngineEffect::SetHeartbeat { object: obj, enabled } => {
                object::set_heartbeat(&mut self.heap, obj, enabled);
                if enabled {
                    self.vars.enable_heartbeat(obj);
                } else {
                    self.vars.disable_heartbeat(obj);
                }
                let _ = source_fiber;
            }
        }
    }

    fn collect_garbage(&mut self) {
        let before = self.heap.stats().live_objects;
        let roots = crate::gcroots::collect_roots(&self.symbols, &self.scheduler, &self.vars);

        let span = info_span!("gc_cycle", before, cycle = self.heap.stats().collections + 1);
        let _enter = span.enter();
        let report = collect(&mut self.heap, roots);
        info!(freed = report.freed, marked = report.marked, "collected");
    }

    /// Translate a resolution/runtime `RavenError` into a thrown `Value`
    /// and unwind `fiber` to the nearest catch, per `interpreter`'s
    /// `throw_runtime` placeholder (constants need a live `&mut Heap` to
    /// allocate the message string, which a bare `fn` inside a `match` arm
    /// of `step` does not always have borrowed alongside the fiber).
    pub fn throw_error(&mut self, fiber: &mut Fiber, err: RavenError) {
        if !err.is_catchable() {
            error!(error = %err, "fatal error");
            fiber.state = FiberState::Crashed;
            return;
        }
        let msg = heap_alloc_string(&mut self.heap, err.to_string());
        fiber.throw(Value::Ptr(msg));
    }

    /// Accept queued connections by spawning `connect_func` against each,
    /// and run `disconnect_func` for each torn-down connection. Called once
    /// per tick by the driver before `tick()`.
    pub fn drain_connection_events(&mut self) {
        for conn in self.network.take_accepts() {
            if let Some((receiver, func)) = self.vars.connect_func {
                self.spawn_call(func, receiver, vec![Value::Ptr(conn)]);
            }
        }
        for conn in self.network.take_teardowns() {
            if let Some((receiver, func)) = self.vars.disconnect_func {
                self.spawn_call(func, receiver, vec![Value::Ptr(conn)]);
            }
        }
    }

    pub fn resolve_blueprint(&mut self, path: &str, create: bool) -> Option<HeapRef> {
        let vp = VirtPath::parse(path);
        let fs = self.filesystem.as_mut()?;
        fs.find_blueprint(&mut self.heap, &mut self.symbols, &vp, create)
    }
}

impl EngineVars {
    /// Every engine-wide value the GC must treat as reachable: proxy
    /// blueprints, connect/disconnect receivers, and objects with an
    /// enabled heartbeat. See `crate::gcroots` for how this combines with
    /// the symbol table's gensyms and the live fiber set.
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.proxy_roots()
            .chain(self.funcref_roots())
            .chain(self.heartbeat_objects.iter().map(|&r| Value::Ptr(r)))
    }

    fn proxy_roots(&self) -> impl Iterator<Item = Value> {
        [
            self.proxies.nil_proxy,
            self.proxies.int_proxy,
            self.proxies.char_proxy,
            self.proxies.string_proxy,
            self.proxies.array_proxy,
            self.proxies.mapping_proxy,
            self.proxies.function_proxy,
        ]
        .into_iter()
        .flatten()
        .map(Value::Ptr)
    }

    fn funcref_roots(&self) -> impl Iterator<Item = Value> {
        [self.connect_func.map(|(r, _)| r), self.disconnect_func.map(|(r, _)| r)]
            .into_iter()
            .flatten()
    }
}

fn heap_alloc_string(heap: &mut Heap<VmObject>, s: String) -> HeapRef {
    heap.alloc(HeapObjectKind::String(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use raven_core::{FunctionDef, Instr, TypeRef};

    fn trivial_function(engine: &mut Engine) -> HeapRef {
        let name = engine.symbols.intern(&mut engine.heap, "f");
        let def = FunctionDef {
            name: "f".into(),
            code: vec![Instr::Return],
            constants: Vec::new(),
            param_types: Vec::new(),
            return_type: TypeRef::Void,
            locals: 1,
            varargs: false,
            is_private: false,
            is_protected: false,
        };
        engine
            .heap
            .alloc(HeapObjectKind::Ext(VmObject::Function(crate::function::FunctionObj::new(def, name))))
    }

    #[test]
    fn tick_runs_a_spawned_fiber_to_completion() {
        let mut engine = Engine::new(10);
        let f = trivial_function(&mut engine);
        let id = engine.spawn_call(f, Value::Nil, Vec::new());
        engine.tick();
        assert!(engine.scheduler.find_mut(id).is_none(), "fiber should have been reaped");
    }

    #[test]
    fn call_out_spawn_effect_schedules_a_sleeping_fiber() {
        let mut engine = Engine::new(10);
        let f = trivial_function(&mut engine);
        engine.apply_effect(
            0,
            EngineEffect::SpawnFiber {
                call_out_id: 1,
                func: f,
                receiver: Value::Nil,
                args: Vec::new(),
                delay_ticks: Some(5),
            },
        );
        assert_eq!(engine.vars.call_outs.get(&1), Some(&1));
        let fiber_id = engine.vars.call_outs[&1];
        assert_eq!(engine.scheduler.find_mut(fiber_id).unwrap().state, FiberState::Sleeping(5));
    }

    #[test]
    fn cancel_before_spawn_effect_is_applied_drops_the_later_spawn() {
        let mut engine = Engine::new(10);
        let f = trivial_function(&mut engine);
        engine.apply_effect(0, EngineEffect::CancelCallOut(9));
        engine.apply_effect(
            0,
            EngineEffect::SpawnFiber {
                call_out_id: 9,
                func: f,
                receiver: Value::Nil,
                args: Vec::new(),
                delay_ticks: None,
            },
        );
        assert!(engine.vars.call_outs.get(&9).is_none());
    }

    #[test]
    fn set_heartbeat_effect_updates_both_object_flag_and_engine_list() {
        let mut engine = Engine::new(10);
        let bp = engine.heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(crate::blueprint::BlueprintObj::new("/room"))));
        let obj = object::blueprint_instantiate(&mut engine.heap, bp);
        engine.apply_effect(0, EngineEffect::SetHeartbeat { object: obj, enabled: true });
        assert!(object::has_heartbeat(&engine.heap, obj));
        assert!(engine.vars.heartbeat_objects().contains(&obj));
    }
}
