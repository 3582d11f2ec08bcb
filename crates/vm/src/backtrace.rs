//! Crash backtraces.
//!
//! When a fiber crashes (an uncaught throw, or a fatal error via
//! `Engine::throw_error`), the driver wants a readable trace of the call
//! chain it was in, not just "fiber N crashed". Each frame renders as
//! `function@<virt_path>`, innermost call first, mirroring the
//! file-and-function pairing a native backtrace gives you.

use raven_core::{Heap, HeapObjectKind};

use crate::blueprint::BlueprintObj;
use crate::fiber::Fiber;
use crate::function::FunctionObj;
use crate::vmobject::VmObject;

/// One rendered stack frame: the method name and the virtual path of the
/// blueprint it's defined on. `None` path means the function has no owner
/// (shouldn't happen for anything actually running, but a detached
/// `FunctionObj` used in a unit test has no blueprint to report).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktraceFrame {
    pub function_name: String,
    pub virt_path: Option<String>,
}

impl std::fmt::Display for BacktraceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.virt_path {
            Some(path) => write!(f, "{}@{}", self.function_name, path),
            None => write!(f, "{}@<unknown>", self.function_name),
        }
    }
}

/// Render `fiber`'s call chain, innermost frame (where execution actually
/// was) first.
pub fn capture(heap: &Heap<VmObject>, fiber: &Fiber) -> Vec<BacktraceFrame> {
    fiber
        .frames
        .iter()
        .rev()
        .map(|frame| render_frame(heap, frame.function))
        .collect()
}

fn render_frame(heap: &Heap<VmObject>, function: raven_core::HeapRef) -> BacktraceFrame {
    let f = as_function(heap, function);
    let function_name = symbol_name(heap, f.name).to_string();
    let virt_path = f.owner.map(|bp| as_blueprint(heap, bp).virt_path.clone());
    BacktraceFrame { function_name, virt_path }
}

fn symbol_name(heap: &Heap<VmObject>, sym: raven_core::HeapRef) -> &str {
    match heap.get(sym) {
        HeapObjectKind::Symbol(s) => s.name(),
        _ => panic!("HeapRef does not point at a Symbol"),
    }
}

/// `function@path` lines, one per frame, ready to write to stderr or a log
/// record alongside the crash.
pub fn format(heap: &Heap<VmObject>, fiber: &Fiber) -> String {
    capture(heap, fiber)
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn as_function(heap: &Heap<VmObject>, r: raven_core::HeapRef) -> &FunctionObj {
    match heap.get(r) {
        HeapObjectKind::Ext(VmObject::Function(f)) => f,
        _ => panic!("HeapRef does not point at a Function"),
    }
}

fn as_blueprint(heap: &Heap<VmObject>, r: raven_core::HeapRef) -> &BlueprintObj {
    match heap.get(r) {
        HeapObjectKind::Ext(VmObject::Blueprint(bp)) => bp,
        _ => panic!("HeapRef does not point at a Blueprint"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raven_core::{FunctionDef, HeapObjectKind, Instr, SymbolTable, TypeRef, Value};

    fn def(name: &str) -> FunctionDef {
        FunctionDef {
            name: name.into(),
            code: vec![Instr::Return],
            constants: Vec::new(),
            param_types: Vec::new(),
            return_type: TypeRef::Void,
            locals: 1,
            varargs: false,
            is_private: false,
            is_protected: false,
        }
    }

    #[test]
    fn frames_render_innermost_first() {
        let mut heap: Heap<VmObject> = Heap::new();
        let mut symbols = SymbolTable::new();

        let bp = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/room/kitchen"))));
        let outer_name = symbols.intern(&mut heap, "enter");
        let inner_name = symbols.intern(&mut heap, "announce");
        let outer = heap.alloc(HeapObjectKind::Ext(VmObject::Function(FunctionObj::new(def("enter"), outer_name))));
        let inner = heap.alloc(HeapObjectKind::Ext(VmObject::Function(FunctionObj::new(def("announce"), inner_name))));
        crate::blueprint::blueprint_add_func(&mut heap, bp, outer);
        crate::blueprint::blueprint_add_func(&mut heap, bp, inner);

        let mut fiber = Fiber::new(1);
        fiber.push(Value::Nil);
        fiber.push_frame(&mut heap, outer, 0);
        fiber.push(Value::Nil);
        fiber.push_frame(&mut heap, inner, 0);

        let trace = capture(&heap, &fiber);
        assert_eq!(trace[0].function_name, "announce");
        assert_eq!(trace[1].function_name, "enter");
        assert_eq!(trace[0].virt_path.as_deref(), Some("/room/kitchen"));
    }

    #[test]
    fn display_format_is_function_at_path() {
        let frame = BacktraceFrame {
            function_name: "announce".into(),
            virt_path: Some("/room/kitchen".into()),
        };
        assert_eq!(frame.to_string(), "announce@/room/kitchen");
    }

    #[test]
    fn empty_frame_stack_yields_empty_trace() {
        let heap: Heap<VmObject> = Heap::new();
        let fiber = Fiber::new(1);
        assert!(capture(&heap, &fiber).is_empty());
        assert_eq!(format(&heap, &fiber), "");
    }
}
