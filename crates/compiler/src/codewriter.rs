//! Per-function code assembly: instruction emission, label back-patching,
//! constant pool, and local-slot bookkeeping.
//!
//! Jump targets are indices into the instruction stream (see
//! `raven_core::bytecode`'s own doc comment), so back-patching needs no
//! byte-level relocation: a label starts as an opaque handle with a list of
//! "these instructions want your address once you have one"; placing the
//! label rewrites each of those instructions' already-pushed placeholder in
//! place.

use raven_core::{Addr, FunctionDef, HeapObjectKind, Instr, SymbolRef, TypeRef, TypeTag, Value};
use raven_vm::vars::VarFlags;
use raven_vm::VmObject;

use crate::scope::ScopeChain;

/// An opaque handle to a not-yet-placed jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

struct PendingLabel {
    placed: Option<Addr>,
    /// Indices into `CodeWriter::code` of jump instructions awaiting this
    /// label's address.
    fixups: Vec<usize>,
}

/// Assembles one function's `FunctionDef`. Holds a scope chain for locals and
/// an interning pool for constants; owns neither the heap nor the symbol
/// table, since both are shared across every function in a compilation unit.
pub struct CodeWriter {
    name: String,
    code: Vec<Instr>,
    constants: Vec<Value>,
    labels: Vec<PendingLabel>,
    scope: ScopeChain,
    param_types: Vec<TypeRef>,
    return_type: TypeRef,
    varargs: bool,
    is_private: bool,
    is_protected: bool,
}

impl CodeWriter {
    pub fn new(name: impl Into<String>) -> Self {
        CodeWriter {
            name: name.into(),
            code: Vec::new(),
            constants: Vec::new(),
            labels: Vec::new(),
            scope: ScopeChain::new(),
            param_types: Vec::new(),
            return_type: TypeRef::Void,
            varargs: false,
            is_private: false,
            is_protected: false,
        }
    }

    pub fn set_return_type(&mut self, ty: TypeRef) {
        self.return_type = ty;
    }

    pub fn set_varargs(&mut self, varargs: bool) {
        self.varargs = varargs;
    }

    pub fn set_visibility(&mut self, is_private: bool, is_protected: bool) {
        self.is_private = is_private;
        self.is_protected = is_protected;
    }

    /// Declare a parameter. Must be called before any local is declared, in
    /// declaration order, so `param_types` lines up with the runtime's
    /// `locals[1..=arity]` layout. Returns the flat scope index -- the
    /// `LOAD_LOCAL`/`STORE_LOCAL` operand value; the runtime adds the `self`
    /// offset itself (see `raven_vm::frame::Frame::local_slot`).
    pub fn declare_param(&mut self, type_tag: TypeTag, type_ref: TypeRef, name: SymbolRef) -> u32 {
        self.param_types.push(type_ref);
        self.scope.declare(type_tag, name, VarFlags::empty()) as u32
    }

    /// Declare a local variable in the innermost open scope. Returns the
    /// flat scope index (the `LOAD_LOCAL`/`STORE_LOCAL` operand value).
    pub fn declare_local(&mut self, type_tag: TypeTag, name: SymbolRef, flags: VarFlags) -> u32 {
        self.scope.declare(type_tag, name, flags) as u32
    }

    pub fn find_local(&self, name: SymbolRef) -> Option<(u32, TypeTag)> {
        self.scope.find(name).map(|(idx, tag)| (idx as u32, tag))
    }

    pub fn push_scope(&mut self) {
        self.scope.push();
    }

    pub fn pop_scope(&mut self) {
        self.scope.pop();
    }

    /// Append an interpreter value to the constant pool, returning its
    /// index. Does not dedup: a repeated literal just gets a repeated slot.
    pub fn add_const(&mut self, v: Value) -> u32 {
        let idx = self.constants.len() as u32;
        self.constants.push(v);
        idx
    }

    /// Intern a string literal into the heap and record it as a constant.
    pub fn intern_string(&mut self, heap: &mut raven_core::Heap<VmObject>, s: &str) -> u32 {
        let r = heap.alloc(HeapObjectKind::String(s.to_string()));
        self.add_const(Value::Ptr(r))
    }

    /// Intern a symbol literal (`#'name'`/`#:name`) into the symbol table
    /// and record it as a constant.
    pub fn intern_symbol(
        &mut self,
        heap: &mut raven_core::Heap<VmObject>,
        symbols: &mut raven_core::SymbolTable,
        name: &str,
    ) -> u32 {
        let r = symbols.intern(heap, name);
        self.add_const(Value::Ptr(r))
    }

    /// Resolve (or intern) the message-send symbol `name`, without adding it
    /// as a separate constant pool entry -- `Send`/`SuperSend`/`CallBuiltin`
    /// address their message symbol by constant index, same pool.
    pub fn intern_message(
        &mut self,
        heap: &mut raven_core::Heap<VmObject>,
        symbols: &mut raven_core::SymbolTable,
        name: &str,
    ) -> u32 {
        self.intern_symbol(heap, symbols, name)
    }

    /// Emit a plain (non-jump) instruction, returning its index.
    pub fn emit(&mut self, instr: Instr) -> usize {
        let idx = self.code.len();
        self.code.push(instr);
        idx
    }

    /// Open a new label with no address yet. Jumps to it via `emit_jump` are
    /// back-patched once `place_label` gives it one.
    pub fn open_label(&mut self) -> Label {
        let idx = self.labels.len();
        self.labels.push(PendingLabel { placed: None, fixups: Vec::new() });
        Label(idx)
    }

    /// Emit a jump instruction whose address isn't known yet. `template`
    /// carries a placeholder address (its actual value is discarded once
    /// `place_label` runs) and picks which jump variant to emit --
    /// `Instr::Jump(0)`, `Instr::JumpIf(0)`, `Instr::JumpIfNot(0)`, or
    /// `Instr::UpdateCatch(0)`.
    pub fn emit_jump(&mut self, template: Instr, label: Label) -> usize {
        let idx = self.emit(template);
        self.labels[label.0].fixups.push(idx);
        idx
    }

    /// Bind `label` to the current end of the instruction stream, patching
    /// every jump emitted against it so far.
    pub fn place_label(&mut self, label: Label) {
        let addr = self.code.len() as Addr;
        let fixups = std::mem::take(&mut self.labels[label.0].fixups);
        for idx in fixups {
            self.code[idx] = patch_addr(&self.code[idx], addr);
        }
        self.labels[label.0].placed = Some(addr);
    }

    pub fn current_addr(&self) -> Addr {
        self.code.len() as Addr
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Consume the writer, producing the immutable compiled function. One
    /// extra local slot is reserved ahead of every declared param/local for
    /// `self`, per `Frame`'s locals[0] convention.
    pub fn finish(self) -> FunctionDef {
        debug_assert!(
            self.labels.iter().all(|l| l.placed.is_some()),
            "function {} has a label with no placement",
            self.name
        );
        FunctionDef {
            name: self.name,
            code: self.code,
            constants: self.constants,
            param_types: self.param_types,
            return_type: self.return_type,
            locals: self.scope.declared_count() as u32 + 1,
            varargs: self.varargs,
            is_private: self.is_private,
            is_protected: self.is_protected,
        }
    }
}

fn patch_addr(instr: &Instr, addr: Addr) -> Instr {
    match instr {
        Instr::Jump(_) => Instr::Jump(addr),
        Instr::JumpIf(_) => Instr::JumpIf(addr),
        Instr::JumpIfNot(_) => Instr::JumpIfNot(addr),
        Instr::UpdateCatch(_) => Instr::UpdateCatch(addr),
        other => panic!("instruction at this index is not a jump: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raven_core::{Heap, SymbolTable};

    #[test]
    fn forward_jump_is_patched_to_the_placement_address() {
        let mut w = CodeWriter::new("f");
        let done = w.open_label();
        w.emit_jump(Instr::Jump(0), done);
        w.emit(Instr::Noop);
        w.emit(Instr::Noop);
        w.place_label(done);
        let def = w.finish();
        assert_eq!(def.code[0], Instr::Jump(3));
    }

    #[test]
    fn backward_jump_targets_an_already_placed_label() {
        let mut w = CodeWriter::new("f");
        let top = w.open_label();
        w.place_label(top);
        w.emit(Instr::Noop);
        w.emit_jump(Instr::Jump(0), top);
        let def = w.finish();
        assert_eq!(def.code[1], Instr::Jump(0));
    }

    #[test]
    fn multiple_fixups_against_one_label_all_patch() {
        let mut w = CodeWriter::new("f");
        let end = w.open_label();
        w.emit_jump(Instr::JumpIfNot(0), end);
        w.emit(Instr::Noop);
        w.emit_jump(Instr::Jump(0), end);
        w.place_label(end);
        let def = w.finish();
        assert_eq!(def.code[0], Instr::JumpIfNot(3));
        assert_eq!(def.code[2], Instr::Jump(3));
    }

    #[test]
    fn locals_count_reserves_a_slot_for_self() {
        let mut heap: Heap<VmObject> = Heap::new();
        let mut symbols = SymbolTable::new();
        let x = symbols.intern(&mut heap, "x");
        let mut w = CodeWriter::new("f");
        w.declare_local(TypeTag::Int, x, VarFlags::empty());
        let def = w.finish();
        assert_eq!(def.locals, 2);
    }

    #[test]
    fn first_param_has_flat_index_zero() {
        let mut heap: Heap<VmObject> = Heap::new();
        let mut symbols = SymbolTable::new();
        let x = symbols.intern(&mut heap, "x");
        let mut w = CodeWriter::new("f");
        let idx = w.declare_param(TypeTag::Int, TypeRef::Int, x);
        assert_eq!(idx, 0);
    }

    #[test]
    #[should_panic(expected = "has a label with no placement")]
    fn finishing_with_an_unplaced_label_panics_in_debug() {
        let mut w = CodeWriter::new("f");
        let l = w.open_label();
        w.emit_jump(Instr::Jump(0), l);
        let _ = w.finish();
    }
}
