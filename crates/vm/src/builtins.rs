//! The default built-in library exposed to scripts.
//!
//! Every built-in has the ABI `(registry, heap, symbols, fiber, receiver,
//! args) -> BuiltinOutcome`: it may set `fiber.accu` or transition fiber
//! state (via [`BuiltinEffect`]), and may additionally ask the engine to
//! mutate scheduler-level state it cannot reach directly (via
//! [`EngineEffect`]) -- spawning a call-out fiber needs the scheduler, which
//! is not reachable from inside a quantum already holding `&mut Fiber`.

use raven_core::{BuiltinId, Heap, HeapObjectKind, HeapRef, SymbolRef, SymbolTable, Value};
use std::cell::Cell;

use crate::blueprint::{blueprint_lookup, blueprint_lookup_inherited};
use crate::fiber::Fiber;
use crate::interpreter::EngineEffect;
use crate::vmobject::VmObject;

#[derive(Debug, Clone)]
pub enum BuiltinEffect {
    SetAccu(Value),
    Pause,
    SleepUntil(u64),
    WaitForInput,
    Throw(Value),
}

#[derive(Debug, Clone, Default)]
pub struct BuiltinOutcome {
    pub fiber: Option<BuiltinEffect>,
    pub engine: Option<EngineEffect>,
}

impl BuiltinOutcome {
    fn accu(v: Value) -> Self {
        BuiltinOutcome {
            fiber: Some(BuiltinEffect::SetAccu(v)),
            engine: None,
        }
    }

    fn nothing() -> Self {
        BuiltinOutcome::default()
    }
}

type BuiltinFn = fn(
    &BuiltinRegistry,
    &mut Heap<VmObject>,
    &mut SymbolTable,
    &mut Fiber,
    Value,
    &[Value],
) -> BuiltinOutcome;

/// A table of built-in handlers addressed by the dense [`BuiltinId`] the
/// symbol table hands back from `bind_builtin`. `call_out_seq` is the
/// counter `call_out` draws its returned handles from -- independent of the
/// scheduler's own fiber-id counter, since the handle must exist before the
/// scheduler has actually spawned anything.
pub struct BuiltinRegistry {
    names: Vec<&'static str>,
    handlers: Vec<BuiltinFn>,
    call_out_seq: Cell<u64>,
}

impl BuiltinRegistry {
    fn new() -> Self {
        BuiltinRegistry {
            names: Vec::new(),
            handlers: Vec::new(),
            call_out_seq: Cell::new(1),
        }
    }

    fn bind(
        &mut self,
        heap: &mut Heap<VmObject>,
        symbols: &mut SymbolTable,
        name: &'static str,
        handler: BuiltinFn,
    ) -> SymbolRef {
        let id: BuiltinId = self.handlers.len() as u32;
        self.handlers.push(handler);
        self.names.push(name);
        symbols.bind_builtin(heap, name, id)
    }

    /// Install the default built-in library, interning every bound symbol
    /// name as a side effect.
    pub fn install_defaults(heap: &mut Heap<VmObject>, symbols: &mut SymbolTable) -> Self {
        let mut reg = BuiltinRegistry::new();
        reg.bind(heap, symbols, "write", builtin_write);
        reg.bind(heap, symbols, "this_player", builtin_this_player);
        reg.bind(heap, symbols, "this_object", builtin_this_object);
        reg.bind(heap, symbols, "call_out", builtin_call_out);
        reg.bind(heap, symbols, "remove_call_out", builtin_remove_call_out);
        reg.bind(heap, symbols, "enable_heartbeat", builtin_enable_heartbeat);
        reg.bind(heap, symbols, "disable_heartbeat", builtin_disable_heartbeat);
        reg
    }

    pub fn name_of(&self, id: BuiltinId) -> Option<&'static str> {
        self.names.get(id as usize).copied()
    }

    fn next_call_out_id(&self) -> u64 {
        let id = self.call_out_seq.get();
        self.call_out_seq.set(id + 1);
        id
    }

    pub fn call(
        &self,
        id: BuiltinId,
        heap: &mut Heap<VmObject>,
        symbols: &mut SymbolTable,
        fiber: &mut Fiber,
        receiver: Value,
        args: Vec<Value>,
    ) -> BuiltinOutcome {
        match self.handlers.get(id as usize) {
            Some(handler) => handler(self, heap, symbols, fiber, receiver, &args),
            None => BuiltinOutcome::nothing(),
        }
    }
}

fn as_string(heap: &Heap<VmObject>, v: Value) -> Option<String> {
    match v.as_heap_ref() {
        Some(r) => match heap.get(r) {
            HeapObjectKind::String(s) => Some(s.clone()),
            _ => None,
        },
        None => None,
    }
}

/// `write(msg)`: appends to the calling fiber's own bound connection, not
/// the receiver -- matches the efun convention of always targeting the
/// current player, regardless of what object the call appeared to be sent
/// to.
fn builtin_write(
    _registry: &BuiltinRegistry,
    heap: &mut Heap<VmObject>,
    _symbols: &mut SymbolTable,
    fiber: &mut Fiber,
    _receiver: Value,
    args: &[Value],
) -> BuiltinOutcome {
    let Some(text) = args.first().and_then(|v| as_string(heap, *v)) else {
        return BuiltinOutcome::accu(Value::Int(0));
    };
    let Some(conn) = fiber.connection else {
        return BuiltinOutcome::accu(Value::Int(0));
    };
    if let HeapObjectKind::Ext(VmObject::Connection(c)) = heap.get_mut(conn) {
        c.push_output(text);
        BuiltinOutcome::accu(Value::Int(1))
    } else {
        BuiltinOutcome::accu(Value::Int(0))
    }
}

fn builtin_this_player(
    _registry: &BuiltinRegistry,
    _heap: &mut Heap<VmObject>,
    _symbols: &mut SymbolTable,
    fiber: &mut Fiber,
    _receiver: Value,
    _args: &[Value],
) -> BuiltinOutcome {
    BuiltinOutcome::accu(fiber.this_player)
}

fn builtin_this_object(
    _registry: &BuiltinRegistry,
    _heap: &mut Heap<VmObject>,
    _symbols: &mut SymbolTable,
    _fiber: &mut Fiber,
    receiver: Value,
    _args: &[Value],
) -> BuiltinOutcome {
    BuiltinOutcome::accu(receiver)
}

fn resolve_funcref_target(
    heap: &Heap<VmObject>,
    funcref: Value,
    arg_count: usize,
) -> Option<(Value, HeapRef)> {
    let fr = funcref.as_heap_ref()?;
    let (call_receiver, message) = match heap.get(fr) {
        HeapObjectKind::FunctionRef { receiver, message } => (*receiver, *message),
        _ => return None,
    };
    let bp = match call_receiver.as_heap_ref() {
        Some(r) => match heap.get(r) {
            HeapObjectKind::Ext(VmObject::Object(obj)) => obj.pages.last().map(|p| p.blueprint),
            _ => None,
        },
        None => None,
    }?;
    let func = blueprint_lookup(heap, bp, message, arg_count, true)
        .or_else(|| blueprint_lookup_inherited(heap, bp, message, arg_count))?;
    Some((call_receiver, func))
}

/// `call_out(funcref, delay, ...args)`: resolves the funcref's (receiver,
/// message) pair to a concrete method right away, so a bad call-out throws
/// immediately rather than silently doing nothing once it fires. Hands the
/// scheduler-level spawn off as an [`EngineEffect`] and returns the handle
/// synchronously, so the caller can `remove_call_out` it before the fiber
/// the effect describes ever actually runs.
fn builtin_call_out(
    registry: &BuiltinRegistry,
    heap: &mut Heap<VmObject>,
    _symbols: &mut SymbolTable,
    _fiber: &mut Fiber,
    _receiver: Value,
    args: &[Value],
) -> BuiltinOutcome {
    let (Some(&funcref), Some(&delay)) = (args.first(), args.get(1)) else {
        return BuiltinOutcome::accu(Value::Int(-1));
    };
    let delay_ticks = match delay {
        Value::Int(n) if n >= 0 => n as u64,
        _ => return BuiltinOutcome::accu(Value::Int(-1)),
    };
    let extra_args = args.get(2..).unwrap_or(&[]).to_vec();

    let Some((call_receiver, func)) = resolve_funcref_target(heap, funcref, extra_args.len())
    else {
        return BuiltinOutcome::accu(Value::Int(-1));
    };

    let id = registry.next_call_out_id();
    BuiltinOutcome {
        fiber: Some(BuiltinEffect::SetAccu(Value::Int(id as i64))),
        engine: Some(EngineEffect::SpawnFiber {
            call_out_id: id,
            func,
            receiver: call_receiver,
            args: extra_args,
            delay_ticks: Some(delay_ticks),
        }),
    }
}

fn builtin_remove_call_out(
    _registry: &BuiltinRegistry,
    _heap: &mut Heap<VmObject>,
    _symbols: &mut SymbolTable,
    _fiber: &mut Fiber,
    _receiver: Value,
    args: &[Value],
) -> BuiltinOutcome {
    match args.first() {
        Some(Value::Int(id)) if *id >= 0 => BuiltinOutcome {
            fiber: Some(BuiltinEffect::SetAccu(Value::Int(1))),
            engine: Some(EngineEffect::CancelCallOut(*id as u64)),
        },
        _ => BuiltinOutcome::accu(Value::Int(0)),
    }
}

fn set_heartbeat_outcome(receiver: Value, enabled: bool) -> BuiltinOutcome {
    match receiver.as_heap_ref() {
        Some(object) => BuiltinOutcome {
            fiber: Some(BuiltinEffect::SetAccu(Value::Int(1))),
            engine: Some(EngineEffect::SetHeartbeat { object, enabled }),
        },
        None => BuiltinOutcome::accu(Value::Int(0)),
    }
}

fn builtin_enable_heartbeat(
    _registry: &BuiltinRegistry,
    _heap: &mut Heap<VmObject>,
    _symbols: &mut SymbolTable,
    _fiber: &mut Fiber,
    receiver: Value,
    _args: &[Value],
) -> BuiltinOutcome {
    set_heartbeat_outcome(receiver, true)
}

fn builtin_disable_heartbeat(
    _registry: &BuiltinRegistry,
    _heap: &mut Heap<VmObject>,
    _symbols: &mut SymbolTable,
    _fiber: &mut Fiber,
    receiver: Value,
    _args: &[Value],
) -> BuiltinOutcome {
    set_heartbeat_outcome(receiver, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionObj;
    use raven_core::HeapObjectKind;

    #[test]
    fn write_pushes_to_fibers_connection() {
        let mut heap: Heap<VmObject> = Heap::new();
        let mut symbols = SymbolTable::new();
        let registry = BuiltinRegistry::install_defaults(&mut heap, &mut symbols);
        let conn = heap.alloc(HeapObjectKind::Ext(VmObject::Connection(ConnectionObj::new())));
        let mut fiber = Fiber::new(1);
        fiber.connection = Some(conn);
        let msg = heap.alloc(HeapObjectKind::String("hello".into()));

        let id = symbols.find("write").unwrap();
        let builtin_id = match heap.get(id) {
            HeapObjectKind::Symbol(s) => s.builtin().unwrap(),
            _ => panic!("expected symbol"),
        };
        let outcome = registry.call(builtin_id, &mut heap, &mut symbols, &mut fiber, Value::Nil, vec![Value::Ptr(msg)]);
        assert!(matches!(outcome.fiber, Some(BuiltinEffect::SetAccu(Value::Int(1)))));
        if let HeapObjectKind::Ext(VmObject::Connection(c)) = heap.get_mut(conn) {
            assert_eq!(c.take_output(), Some("hello".to_string()));
        } else {
            panic!("expected connection");
        }
    }

    #[test]
    fn remove_call_out_with_negative_id_fails_without_engine_effect() {
        let mut heap: Heap<VmObject> = Heap::new();
        let mut symbols = SymbolTable::new();
        let registry = BuiltinRegistry::install_defaults(&mut heap, &mut symbols);
        let mut fiber = Fiber::new(1);
        let id = symbols.find("remove_call_out").unwrap();
        let builtin_id = match heap.get(id) {
            HeapObjectKind::Symbol(s) => s.builtin().unwrap(),
            _ => panic!("expected symbol"),
        };
        let outcome = registry.call(builtin_id, &mut heap, &mut symbols, &mut fiber, Value::Nil, vec![Value::Int(-1)]);
        assert!(outcome.engine.is_none());
    }
}
