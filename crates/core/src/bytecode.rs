//! The bytecode instruction set and the compiled function representation.
//!
//! Instructions are an enumerated sum type dispatched through a `match`
//! rather than raw encoded bytes: there is no JIT or FFI boundary that needs
//! a byte-addressable stream, and an enum lets the interpreter's dispatch
//! loop and the disassembler share one definition with no decode step.
//! Jump targets are therefore indices into the owning function's
//! `Vec<Instr>`, not byte offsets.

use crate::value::Value;
use std::fmt;

/// The binary/unary primitive operators reachable through `Instr::Op`.
/// Logical `&&`/`||` are *not* here: they short-circuit, so the compiler
/// lowers them to the same jump templates as `if`/`while` instead of an
/// operator instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Eq,
    Ineq,
    BitAnd,
    BitOr,
    Index,
    IndexAssign,
    Sizeof,
    New,
    Negate,
    Not,
    Deref,
}

/// A coarse type reference used by `TYPECHECK`/`TYPECAST`/`TYPEIS` and by
/// typed declarations. Mirrors [`crate::value::TypeTag`] plus a named
/// blueprint path for object-typed declarations.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Void,
    Mixed,
    Int,
    Char,
    String,
    Array,
    Mapping,
    Function,
    Object(Option<String>),
}

/// A jump target: an index into the owning function's instruction vector.
/// Produced exclusively by `CodeWriter::place_label`; never constructed by
/// hand in the parser.
pub type Addr = u32;

/// One compiled instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Noop,
    LoadSelf,
    LoadConst(u32),
    LoadArray(u32),
    LoadMapping(u32),
    LoadFuncref(u32),
    LoadLocal(u32),
    LoadMember(u32),
    StoreLocal(u32),
    StoreMember(u32),
    PushSelf,
    PushConst(u32),
    Push,
    Pop,
    Op(Op),
    Send { msg: u32, nargs: u32 },
    SuperSend { msg: u32, nargs: u32 },
    CallBuiltin { msg: u32, nargs: u32 },
    Jump(Addr),
    JumpIf(Addr),
    JumpIfNot(Addr),
    Return,
    Typecheck(TypeRef),
    Typecast(TypeRef),
    Typeis(TypeRef),
    UpdateCatch(Addr),
    Args,
}

/// The product of compiling one method or top-level function: an immutable
/// instruction stream plus everything the interpreter needs to run it
/// without consulting the parser again.
///
/// `constants` holds `Value`s directly, not raw literals: string and symbol
/// constants are interned into the heap once, by the code writer, at
/// compile time, so `LoadConst`/`PushConst` at run time are a plain array
/// read with no further heap interaction.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub code: Vec<Instr>,
    pub constants: Vec<Value>,
    /// Declared argument types, in order (for typecheck/varargs handling).
    pub param_types: Vec<TypeRef>,
    pub return_type: TypeRef,
    /// Total local slots including the reserved `self` at index 0 and every
    /// declared parameter and local variable.
    pub locals: u32,
    pub varargs: bool,
    pub is_private: bool,
    pub is_protected: bool,
}

impl FunctionDef {
    pub fn arity(&self) -> usize {
        self.param_types.len()
    }
}

impl fmt::Display for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {} ({} locals{}):", self.name, self.locals, if self.varargs { ", varargs" } else { "" })?;
        for (i, instr) in self.code.iter().enumerate() {
            writeln!(f, "  {i:>4}: {instr:?}")?;
        }
        Ok(())
    }
}
