//! The `Function` heap object: a compiled method bound to (at most) one
//! blueprint's method list.
//!
//! Functions are stored on their owning blueprint in an indexed `Vec`
//! rather than the intrusive doubly-linked list a C-style implementation
//! would use for O(1) unlink; a `(blueprint, index)` back-reference here
//! plus `swap_remove` on the blueprint's side gets the same O(1) removal
//! under safe ownership.

use raven_core::{FunctionDef, HeapRef, SymbolRef};

#[derive(Debug, Clone)]
pub struct FunctionObj {
    pub def: FunctionDef,
    pub name: SymbolRef,
    pub owner: Option<HeapRef>,
    pub index_in_owner: usize,
}

impl FunctionObj {
    pub fn new(def: FunctionDef, name: SymbolRef) -> Self {
        FunctionObj {
            def,
            name,
            owner: None,
            index_in_owner: 0,
        }
    }
}
