//! Per-fiber execution state: the suspendable state machine, the value
//! stack, and the frame stack.

use raven_core::{Heap, HeapObjectKind, HeapRef, Value};

use crate::frame::Frame;
use crate::function::FunctionObj;
use crate::vmobject::VmObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    Running,
    Paused,
    /// Wake once the scheduler's clock reaches this tick/timestamp.
    Sleeping(u64),
    WaitingForInput,
    Stopped,
    Crashed,
}

#[derive(Debug, Clone)]
pub struct Fiber {
    pub id: u64,
    pub state: FiberState,
    pub accu: Value,
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
    pub connection: Option<HeapRef>,
    /// this_player, locals mapping (script mode), effective user -- see
    /// `EngineVars`/per-fiber vars.
    pub this_player: Value,
    pub effective_user: Value,
}

impl Fiber {
    pub fn new(id: u64) -> Self {
        Fiber {
            id,
            state: FiberState::Running,
            accu: Value::Nil,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            connection: None,
            this_player: Value::Nil,
            effective_user: Value::Nil,
        }
    }

    pub fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    pub fn stack_peek(&self, n: usize) -> Value {
        crate::frame::stack_peek(&self.stack, n)
    }

    pub fn top_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn pause(&mut self) {
        self.state = FiberState::Paused;
    }

    pub fn wait_for_input(&mut self) {
        self.state = FiberState::WaitingForInput;
    }

    pub fn sleep_until(&mut self, wake_at: u64) {
        self.state = FiberState::Sleeping(wake_at);
    }

    pub fn reactivate(&mut self) {
        self.state = FiberState::Running;
    }

    pub fn reactivate_with_value(&mut self, v: Value) {
        self.accu = v;
        self.state = FiberState::Running;
    }

    /// If waiting on input, reactivate with the given value; otherwise a
    /// no-op (input arriving for a fiber that moved on is simply dropped --
    /// the connection collaborator owns re-queuing where that matters).
    pub fn push_input(&mut self, v: Value) {
        if self.state == FiberState::WaitingForInput {
            self.reactivate_with_value(v);
        }
    }

    pub fn throw(&mut self, v: Value) {
        self.accu = v;
        self.unwind();
    }

    /// Pop frames until one with a non-zero `catch_addr` is found, and
    /// resume execution there; if none, the fiber crashes.
    pub fn unwind(&mut self) {
        while let Some(frame) = self.frames.last() {
            if frame.catch_addr != 0 {
                let addr = frame.catch_addr;
                let top = self.frames.last_mut().unwrap();
                top.ip = addr as usize;
                self.state = FiberState::Running;
                return;
            }
            let locals_base = frame.locals_base;
            self.frames.pop();
            self.stack.truncate(locals_base);
        }
        self.state = FiberState::Crashed;
    }

    /// Push a new frame for `func`, consuming the `nargs + 1` values (self
    /// + args) already on top of the stack into its local slots.
    pub fn push_frame(&mut self, heap: &mut Heap<VmObject>, func: HeapRef, nargs: usize) {
        let locals_base = self.stack.len() - (nargs + 1);
        let declared = function_of(heap, func).def.locals as usize;
        let is_varargs = function_of(heap, func).def.varargs;

        let current_len = self.stack.len() - locals_base;
        let varargs_ref = if is_varargs && current_len > declared {
            let excess: Vec<Value> = self.stack.split_off(locals_base + declared);
            Some(heap.alloc(HeapObjectKind::Array(excess)))
        } else {
            None
        };

        let current_len = self.stack.len() - locals_base;
        if current_len < declared {
            self.stack.resize(locals_base + declared, Value::Nil);
        } else if current_len > declared {
            self.stack.truncate(locals_base + declared);
        }

        self.frames.push(Frame {
            function: func,
            ip: 0,
            catch_addr: 0,
            locals_base,
            locals_len: declared,
            varargs: varargs_ref,
        });
    }

    /// Pop the top frame, dropping its locals back off the stack. Stops the
    /// fiber once there is no enclosing frame to return into.
    pub fn pop_frame(&mut self) {
        let locals_base = self
            .frames
            .pop()
            .expect("pop_frame with no active frame")
            .locals_base;
        self.stack.truncate(locals_base);
        if self.frames.is_empty() {
            self.state = FiberState::Stopped;
        }
    }

    /// All GC-visible roots owned by this fiber: accumulator, value stack,
    /// per-fiber vars, and the varargs array handles held by live frames.
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        std::iter::once(self.accu)
            .chain(self.stack.iter().copied())
            .chain(std::iter::once(self.this_player))
            .chain(std::iter::once(self.effective_user))
            .chain(self.connection.map(Value::Ptr))
            .chain(
                self.frames
                    .iter()
                    .filter_map(|f| f.varargs)
                    .map(Value::Ptr),
            )
            .chain(self.frames.iter().map(|f| Value::Ptr(f.function)))
    }
}

fn function_of(heap: &Heap<VmObject>, r: HeapRef) -> &FunctionObj {
    match heap.get(r) {
        HeapObjectKind::Ext(VmObject::Function(f)) => f,
        _ => panic!("HeapRef does not point at a Function"),
    }
}
