//! Bytecode dispatch, method resolution, and operator semantics.
//!
//! `run_quantum` steps one fiber until it leaves the `Running` state for
//! this tick -- suspended, stopped, or crashed -- matching the scheduler's
//! "simplest possible quantum" choice: run to the next suspension point
//! rather than a fixed instruction budget.

use raven_core::{
    Addr, Heap, HeapObjectKind, HeapRef, Instr, Op as BOp, SymbolRef, SymbolTable, TypeRef,
    TypeTag, Value,
};

use crate::blueprint::{blueprint_lookup, blueprint_lookup_inherited};
use crate::builtins::{BuiltinEffect, BuiltinRegistry};
use crate::fiber::{Fiber, FiberState};
use crate::function::FunctionObj;
use crate::object::{load_member, store_member};
use crate::proxies::Proxies;
use crate::vmobject::VmObject;

/// Effects a quantum can hand back to the engine beyond what it already
/// applied to the fiber directly (e.g. spawning a fresh fiber for a
/// call-out, which needs the scheduler).
#[derive(Debug, Clone)]
pub enum EngineEffect {
    SpawnFiber {
        /// The handle `call_out` already returned to the caller via its
        /// accumulator; lets `remove_call_out` name this fiber before the
        /// scheduler has actually assigned it one.
        call_out_id: u64,
        func: HeapRef,
        receiver: Value,
        args: Vec<Value>,
        delay_ticks: Option<u64>,
    },
    CancelCallOut(u64),
    SetHeartbeat {
        object: HeapRef,
        enabled: bool,
    },
}

pub fn run_quantum(
    heap: &mut Heap<VmObject>,
    symbols: &mut SymbolTable,
    builtins: &BuiltinRegistry,
    proxies: &Proxies,
    fiber: &mut Fiber,
) -> Vec<EngineEffect> {
    let mut effects = Vec::new();
    while fiber.state == FiberState::Running {
        if fiber.top_frame().is_none() {
            fiber.state = FiberState::Stopped;
            break;
        }
        step(heap, symbols, builtins, proxies, fiber, &mut effects);
    }
    effects
}

fn current_function<'h>(heap: &'h Heap<VmObject>, fiber: &Fiber) -> &'h FunctionObj {
    let fref = fiber.top_frame().unwrap().function;
    match heap.get(fref) {
        HeapObjectKind::Ext(VmObject::Function(f)) => f,
        _ => panic!("frame does not reference a Function"),
    }
}

fn step(
    heap: &mut Heap<VmObject>,
    symbols: &mut SymbolTable,
    builtins: &BuiltinRegistry,
    proxies: &Proxies,
    fiber: &mut Fiber,
    effects: &mut Vec<EngineEffect>,
) {
    let (instr, self_slot) = {
        let frame = fiber.top_frame().unwrap();
        let func = current_function(heap, fiber);
        let ip = frame.ip;
        if ip >= func.def.code.len() {
            fiber.pop_frame();
            return;
        }
        (func.def.code[ip].clone(), frame.self_slot())
    };

    // advance ip before executing; jumps/returns overwrite it explicitly.
    fiber.top_frame_mut().unwrap().ip += 1;

    match instr {
        Instr::Noop => {}
        Instr::LoadSelf => fiber.accu = fiber.stack[self_slot],
        Instr::LoadConst(k) => fiber.accu = load_const(heap, fiber, k),
        Instr::LoadArray(n) => {
            let mut items = Vec::with_capacity(n as usize);
            for _ in 0..n {
                items.push(fiber.pop());
            }
            items.reverse();
            fiber.accu = Value::Ptr(heap.alloc(HeapObjectKind::Array(items)));
        }
        Instr::LoadMapping(n) => {
            let pairs = (n / 2) as usize;
            let mut entries = Vec::with_capacity(pairs);
            for _ in 0..pairs {
                let v = fiber.pop();
                let k = fiber.pop();
                entries.push((k, v));
            }
            entries.reverse();
            fiber.accu = Value::Ptr(heap.alloc(HeapObjectKind::Mapping(entries)));
        }
        Instr::LoadFuncref(s) => {
            let sym = symbol_const(heap, fiber, s);
            let receiver = fiber.stack[self_slot];
            fiber.accu = Value::Ptr(heap.alloc(HeapObjectKind::FunctionRef {
                receiver,
                message: sym,
            }));
        }
        Instr::LoadLocal(i) => {
            let idx = fiber.top_frame().unwrap().local_slot(i);
            fiber.accu = fiber.stack[idx];
        }
        Instr::LoadMember(i) => {
            let obj = fiber.stack[self_slot].as_heap_ref().expect("self is not an object");
            fiber.accu = load_member(heap, obj, i as usize);
        }
        Instr::StoreLocal(i) => {
            let idx = fiber.top_frame().unwrap().local_slot(i);
            fiber.stack[idx] = fiber.accu;
        }
        Instr::StoreMember(i) => {
            let obj = fiber.stack[self_slot].as_heap_ref().expect("self is not an object");
            store_member(heap, obj, i as usize, fiber.accu);
        }
        Instr::PushSelf => fiber.push(fiber.stack[self_slot]),
        Instr::PushConst(k) => {
            let v = load_const(heap, fiber, k);
            fiber.push(v);
        }
        Instr::Push => {
            let v = fiber.accu;
            fiber.push(v);
        }
        Instr::Pop => fiber.accu = fiber.pop(),
        Instr::Op(op) => exec_op(heap, fiber, op),
        Instr::Send { msg, nargs } => {
            let message = symbol_const(heap, fiber, msg);
            do_send(
                heap, symbols, builtins, proxies, fiber, message, nargs as usize, false, effects,
            );
        }
        Instr::SuperSend { msg, nargs } => {
            let message = symbol_const(heap, fiber, msg);
            do_super_send(heap, symbols, builtins, proxies, fiber, message, nargs as usize, effects);
        }
        Instr::CallBuiltin { msg, nargs } => {
            let message = symbol_const(heap, fiber, msg);
            do_call_builtin(heap, symbols, builtins, fiber, message, nargs as usize, effects);
        }
        Instr::Jump(a) => set_ip(fiber, a),
        Instr::JumpIf(a) => {
            if fiber.accu.is_truthy() {
                set_ip(fiber, a);
            }
        }
        Instr::JumpIfNot(a) => {
            if !fiber.accu.is_truthy() {
                set_ip(fiber, a);
            }
        }
        Instr::Return => fiber.pop_frame(),
        Instr::Typecheck(t) => {
            if !type_matches(heap, fiber.accu, &t) {
                throw_runtime(fiber, &format!("type mismatch, expected {t:?}"));
            }
        }
        Instr::Typecast(t) => match cast_value(heap, fiber.accu, &t) {
            Some(v) => fiber.accu = v,
            None => throw_runtime(fiber, &format!("cannot cast to {t:?}")),
        },
        Instr::Typeis(t) => {
            fiber.accu = Value::Int(type_matches(heap, fiber.accu, &t) as i64);
        }
        Instr::UpdateCatch(a) => {
            fiber.top_frame_mut().unwrap().catch_addr = a;
        }
        Instr::Args => {
            let frame = fiber.top_frame().unwrap();
            fiber.accu = match frame.varargs {
                Some(r) => Value::Ptr(r),
                None => Value::Ptr(heap.alloc(HeapObjectKind::Array(Vec::new()))),
            };
        }
    }
}

fn set_ip(fiber: &mut Fiber, addr: Addr) {
    fiber.top_frame_mut().unwrap().ip = addr as usize;
}

/// Constants are plain `Value`s, interned into the heap by the code writer
/// at compile time; running past one is just an array read.
fn load_const(heap: &Heap<VmObject>, fiber: &Fiber, k: u32) -> Value {
    current_function(heap, fiber).def.constants[k as usize]
}

fn symbol_const(heap: &Heap<VmObject>, fiber: &Fiber, k: u32) -> SymbolRef {
    load_const(heap, fiber, k)
        .as_heap_ref()
        .expect("constant at this index is not a symbol")
}

fn throw_runtime(fiber: &mut Fiber, message: &str) {
    // In absence of a string heap allocation path here (no &mut Heap in
    // every caller), runtime errors throw as an engine-side `RavenError`
    // translated to a string by the caller before it becomes the thrown
    // `Value`. See `crate::engine` for the translation.
    let _ = message;
    fiber.unwind();
}

fn type_matches(heap: &Heap<VmObject>, v: Value, t: &TypeRef) -> bool {
    let tag = heap.type_tag_of(v);
    match t {
        TypeRef::Void => tag == TypeTag::Void,
        TypeRef::Mixed => true,
        TypeRef::Int => tag == TypeTag::Int,
        TypeRef::Char => tag == TypeTag::Char,
        TypeRef::String => tag == TypeTag::String,
        TypeRef::Array => tag == TypeTag::Array,
        TypeRef::Mapping => tag == TypeTag::Mapping,
        TypeRef::Function => tag == TypeTag::Function,
        TypeRef::Object(_) => tag == TypeTag::Object,
    }
}

fn cast_value(heap: &Heap<VmObject>, v: Value, t: &TypeRef) -> Option<Value> {
    if type_matches(heap, v, t) {
        return Some(v);
    }
    match (t, v) {
        (TypeRef::Int, Value::Char(c)) => Some(Value::Int(c as i64)),
        (TypeRef::Char, Value::Int(n)) => char::from_u32(n as u32).map(Value::Char),
        (TypeRef::Mixed, other) => Some(other),
        _ => None,
    }
}

fn exec_op(heap: &mut Heap<VmObject>, fiber: &mut Fiber, op: BOp) {
    use BOp::*;
    match op {
        Negate => {
            fiber.accu = match fiber.accu {
                Value::Int(n) => Value::Int(-n),
                _ => return throw_runtime(fiber, "negate expects int"),
            };
        }
        Not => {
            fiber.accu = Value::Int(!fiber.accu.is_truthy() as i64);
        }
        Sizeof => {
            fiber.accu = match heap.sizeof(fiber.accu) {
                Some(n) => Value::Int(n),
                None => return throw_runtime(fiber, "sizeof on unsupported type"),
            };
        }
        Deref => {
            // Engine-defined: turns a path-string into an object lookup;
            // left to the engine-level built-in resolver bound to `deref`.
            throw_runtime(fiber, "deref requires engine path resolution");
        }
        New => {
            throw_runtime(fiber, "new requires engine blueprint resolution");
        }
        Eq | Ineq => {
            let b = fiber.pop();
            let a = fiber.accu;
            let eq = heap.values_equal(a, b);
            fiber.accu = Value::Int((eq == matches!(op, Eq)) as i64);
        }
        Index => {
            let index = fiber.accu;
            let base = fiber.pop();
            fiber.accu = match index_value(heap, base, index) {
                Some(v) => v,
                None => return throw_runtime(fiber, "index out of range or unsupported"),
            };
        }
        IndexAssign => {
            let value = fiber.accu;
            let index = fiber.pop();
            let base = fiber.pop();
            match index_assign(heap, base, index, value) {
                Some(()) => fiber.accu = base,
                None => throw_runtime(fiber, "index-assign out of range or unsupported"),
            }
        }
        Add | Sub | Mul | Div | Mod | Shl | Shr | Less | LessEq | Greater | GreaterEq | BitAnd
        | BitOr => {
            // Compiled as: push left operand, evaluate right operand into
            // accu, then this op -- so the popped value is the left-hand
            // operand and accu is the right-hand one.
            let right = fiber.accu;
            let left = fiber.pop();
            match arith(heap, left, right, op) {
                Some(v) => fiber.accu = v,
                None => throw_runtime(fiber, "unsupported operand types"),
            }
        }
    }
}

fn numeric(v: Value) -> Option<i64> {
    match v {
        Value::Int(n) => Some(n),
        Value::Char(c) => Some(c as i64),
        _ => None,
    }
}

fn arith(heap: &mut Heap<VmObject>, a: Value, b: Value, op: BOp) -> Option<Value> {
    use BOp::*;
    // string / array `+`, and nil + string, are handled before the numeric
    // fallback.
    if matches!(op, Add) {
        if let (Value::Ptr(ra), Value::Ptr(rb)) = (a, b) {
            if let (HeapObjectKind::String(sa), HeapObjectKind::String(sb)) =
                (heap.get(ra), heap.get(rb))
            {
                let joined = format!("{sa}{sb}");
                return Some(Value::Ptr(heap.alloc(HeapObjectKind::String(joined))));
            }
            if let (HeapObjectKind::Array(aa), HeapObjectKind::Array(ab)) =
                (heap.get(ra), heap.get(rb))
            {
                let mut joined = aa.clone();
                joined.extend(ab.clone());
                return Some(Value::Ptr(heap.alloc(HeapObjectKind::Array(joined))));
            }
        }
        match (a, b) {
            (Value::Nil, Value::Ptr(r)) if matches!(heap.get(r), HeapObjectKind::String(_)) => {
                return Some(b);
            }
            (Value::Ptr(r), Value::Nil) if matches!(heap.get(r), HeapObjectKind::String(_)) => {
                return Some(a);
            }
            _ => {}
        }
    }

    let (x, y) = (numeric(a)?, numeric(b)?);
    Some(match op {
        Add => Value::Int(x + y),
        Sub => Value::Int(x - y),
        Mul => Value::Int(x * y),
        Div => {
            if y == 0 {
                return None;
            }
            Value::Int(x / y)
        }
        Mod => {
            if y == 0 {
                return None;
            }
            Value::Int(x % y)
        }
        Shl => Value::Int(x << y),
        Shr => Value::Int(x >> y),
        BitAnd => Value::Int(x & y),
        BitOr => Value::Int(x | y),
        Less => Value::Int((x < y) as i64),
        LessEq => Value::Int((x <= y) as i64),
        Greater => Value::Int((x > y) as i64),
        GreaterEq => Value::Int((x >= y) as i64),
        _ => unreachable!(),
    })
}

fn index_value(heap: &Heap<VmObject>, base: Value, index: Value) -> Option<Value> {
    let r = base.as_heap_ref()?;
    let i = numeric(index)? as usize;
    match heap.get(r) {
        HeapObjectKind::String(s) => s.chars().nth(i).map(Value::Char),
        HeapObjectKind::Array(items) => items.get(i).copied(),
        HeapObjectKind::Mapping(entries) => {
            entries.iter().find(|(k, _)| heap.values_equal(*k, index)).map(|(_, v)| *v)
        }
        _ => None,
    }
}

fn index_assign(heap: &mut Heap<VmObject>, base: Value, index: Value, value: Value) -> Option<()> {
    let r = base.as_heap_ref()?;
    match heap.get_mut(r) {
        HeapObjectKind::Array(items) => {
            let i = numeric(index)? as usize;
            if i >= items.len() {
                return None;
            }
            items[i] = value;
            Some(())
        }
        HeapObjectKind::Mapping(entries) => {
            if let Some(entry) = entries.iter_mut().find(|(k, _)| *k == index) {
                entry.1 = value;
            } else {
                entries.push((index, value));
            }
            Some(())
        }
        _ => None,
    }
}

/// Method resolution for `SEND`: object receivers walk their own blueprint
/// then its ancestors; everything else substitutes the engine's proxy
/// object for its type tag and resolves on that instead. Either way, an
/// unresolved message falls through to the symbol's bound built-in.
fn do_send(
    heap: &mut Heap<VmObject>,
    symbols: &mut SymbolTable,
    builtins: &BuiltinRegistry,
    proxies: &Proxies,
    fiber: &mut Fiber,
    message: SymbolRef,
    nargs: usize,
    super_call: bool,
    effects: &mut Vec<EngineEffect>,
) {
    let mut args = Vec::with_capacity(nargs);
    for _ in 0..nargs {
        args.push(fiber.pop());
    }
    args.reverse();
    let receiver = fiber.pop();

    let caller_bp = fiber
        .top_frame()
        .and_then(|f| match heap.get(f.function) {
            HeapObjectKind::Ext(VmObject::Function(fo)) => fo.owner,
            _ => None,
        });

    let target_bp = match receiver {
        Value::Ptr(r) => match heap.get(r) {
            HeapObjectKind::Ext(VmObject::Object(obj)) => obj.pages.last().map(|p| p.blueprint),
            _ => None,
        },
        _ => None,
    };

    let resolved = if let Some(own_bp) = target_bp {
        let allow_private = caller_bp == Some(own_bp);
        blueprint_lookup(heap, own_bp, message, nargs, allow_private)
            .or_else(|| blueprint_lookup_inherited(heap, own_bp, message, nargs))
    } else if let Some(proxy_bp) = proxies.for_value(heap, receiver) {
        blueprint_lookup(heap, proxy_bp, message, nargs, false)
            .or_else(|| blueprint_lookup_inherited(heap, proxy_bp, message, nargs))
    } else {
        None
    };

    fiber.push(receiver);
    for a in &args {
        fiber.push(*a);
    }

    match resolved {
        Some(func) => fiber.push_frame(heap, func, nargs),
        None => {
            fiber.pop(); // undo the pushes above, builtin ABI takes its own args
            for _ in &args {
                fiber.pop();
            }
            dispatch_builtin_or_throw(heap, symbols, builtins, fiber, message, receiver, args, effects);
        }
    }
    let _ = super_call;
}

fn do_super_send(
    heap: &mut Heap<VmObject>,
    symbols: &mut SymbolTable,
    builtins: &BuiltinRegistry,
    _proxies: &Proxies,
    fiber: &mut Fiber,
    message: SymbolRef,
    nargs: usize,
    effects: &mut Vec<EngineEffect>,
) {
    let mut args = Vec::with_capacity(nargs);
    for _ in 0..nargs {
        args.push(fiber.pop());
    }
    args.reverse();
    let receiver = fiber.pop();

    let current_bp = fiber
        .top_frame()
        .and_then(|f| match heap.get(f.function) {
            HeapObjectKind::Ext(VmObject::Function(fo)) => fo.owner,
            _ => None,
        });

    let resolved = current_bp.and_then(|bp| blueprint_lookup_inherited(heap, bp, message, nargs));

    fiber.push(receiver);
    for a in &args {
        fiber.push(*a);
    }
    match resolved {
        Some(func) => fiber.push_frame(heap, func, nargs),
        None => {
            fiber.pop();
            for _ in &args {
                fiber.pop();
            }
            dispatch_builtin_or_throw(heap, symbols, builtins, fiber, message, receiver, args, effects);
        }
    }
}

fn dispatch_builtin_or_throw(
    heap: &mut Heap<VmObject>,
    symbols: &mut SymbolTable,
    builtins: &BuiltinRegistry,
    fiber: &mut Fiber,
    message: SymbolRef,
    receiver: Value,
    args: Vec<Value>,
    effects: &mut Vec<EngineEffect>,
) {
    let builtin_id = match heap.get(message) {
        HeapObjectKind::Symbol(s) => s.builtin(),
        _ => None,
    };
    match builtin_id {
        Some(id) => {
            let outcome = builtins.call(id, heap, symbols, fiber, receiver, args);
            apply_builtin_effect(fiber, outcome.fiber);
            if let Some(e) = outcome.engine {
                effects.push(e);
            }
        }
        None => throw_runtime(fiber, "no method or built-in bound to message"),
    }
}

fn do_call_builtin(
    heap: &mut Heap<VmObject>,
    symbols: &mut SymbolTable,
    builtins: &BuiltinRegistry,
    fiber: &mut Fiber,
    message: SymbolRef,
    nargs: usize,
    effects: &mut Vec<EngineEffect>,
) {
    let mut args = Vec::with_capacity(nargs);
    for _ in 0..nargs {
        args.push(fiber.pop());
    }
    args.reverse();
    let receiver = fiber.pop();
    dispatch_builtin_or_throw(heap, symbols, builtins, fiber, message, receiver, args, effects);
}

fn apply_builtin_effect(fiber: &mut Fiber, effect: Option<BuiltinEffect>) {
    match effect {
        Some(BuiltinEffect::SetAccu(v)) => fiber.accu = v,
        Some(BuiltinEffect::Pause) => fiber.pause(),
        Some(BuiltinEffect::SleepUntil(t)) => fiber.sleep_until(t),
        Some(BuiltinEffect::WaitForInput) => fiber.wait_for_input(),
        Some(BuiltinEffect::Throw(v)) => fiber.throw(v),
        None => {}
    }
}
