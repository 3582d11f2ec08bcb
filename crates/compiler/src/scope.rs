//! Lexical scope chain for local variable declarations.
//!
//! Delegates index bookkeeping to [`raven_vm::vars::Vars`] -- the same
//! structure a blueprint uses for instance-variable layout -- so both the
//! object model and the compiler get "inner shadows outer, index stable
//! once assigned" from one implementation. A block opens a scope, declares
//! into it, and pops it on exit; the flat index handed back already
//! accounts for every enclosing scope's fill count.

use raven_core::{SymbolRef, TypeTag};
use raven_vm::vars::{chain_find, VarFlags, Vars};

pub struct ScopeChain {
    scopes: Vec<Vars>,
    /// Highest flat slot count any `declare` has ever reached, including
    /// scopes already popped. A block scope's slots are reused by later
    /// sibling blocks (see `declare`'s `base` computation), but the
    /// frame's allocated local region must be sized for the deepest point
    /// any nested block reached during compilation, not for whichever
    /// scopes happen to still be open once the function finishes -- a
    /// popped `if`/`while`/`foreach` block's slots are gone from
    /// `self.scopes` by then, and summing only open scopes silently loses
    /// them.
    high_water: usize,
}

impl ScopeChain {
    pub fn new() -> Self {
        ScopeChain { scopes: vec![Vars::new()], high_water: 0 }
    }

    pub fn push(&mut self) {
        self.scopes.push(Vars::new());
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
        debug_assert!(!self.scopes.is_empty(), "popped the function-level scope");
    }

    /// Declare `name` in the innermost open scope. Returns the flat index
    /// (0-based, not counting the reserved `self` slot).
    pub fn declare(&mut self, type_tag: TypeTag, name: SymbolRef, flags: VarFlags) -> usize {
        let base: usize = self.scopes[..self.scopes.len() - 1].iter().map(|v| v.fill()).sum();
        let local = self.scopes.last_mut().expect("at least one scope").add(type_tag, name, flags);
        let flat = base + local;
        self.high_water = self.high_water.max(flat + 1);
        flat
    }

    pub fn find(&self, name: SymbolRef) -> Option<(usize, TypeTag)> {
        let chain: Vec<&Vars> = self.scopes.iter().collect();
        chain_find(&chain, name)
    }

    /// Peak declared-slot count ever reached, for sizing the function's
    /// `locals` -- the high-water mark across the whole compile, not just
    /// the scopes still open right now.
    pub fn declared_count(&self) -> usize {
        self.high_water
    }
}

impl Default for ScopeChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raven_core::{Heap, HeapExt, SymbolTable, Value};

    struct NoExt;
    impl HeapExt for NoExt {
        fn trace(&self, _mark: &mut dyn FnMut(Value)) {}
        fn type_tag(&self) -> TypeTag {
            TypeTag::Void
        }
    }

    #[test]
    fn nested_block_shadows_outer_and_restores_on_pop() {
        let mut heap: Heap<NoExt> = Heap::new();
        let mut table = SymbolTable::new();
        let x = table.intern(&mut heap, "x");

        let mut scope = ScopeChain::new();
        let outer_idx = scope.declare(TypeTag::Int, x, VarFlags::empty());
        scope.push();
        let inner_idx = scope.declare(TypeTag::String, x, VarFlags::empty());
        assert_eq!(scope.find(x), Some((inner_idx, TypeTag::String)));
        scope.pop();
        assert_eq!(scope.find(x), Some((outer_idx, TypeTag::Int)));
    }

    #[test]
    fn sibling_blocks_do_not_collide() {
        let mut heap: Heap<NoExt> = Heap::new();
        let mut table = SymbolTable::new();
        let a = table.intern(&mut heap, "a");
        let b = table.intern(&mut heap, "b");

        let mut scope = ScopeChain::new();
        scope.push();
        let ia = scope.declare(TypeTag::Int, a, VarFlags::empty());
        scope.pop();
        scope.push();
        let ib = scope.declare(TypeTag::Int, b, VarFlags::empty());
        scope.pop();
        assert_eq!(ia, ib);
    }
}
