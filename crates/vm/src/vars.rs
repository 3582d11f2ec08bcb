//! Ordered, nested identifier scopes shared by instance-variable layout
//! (blueprints) and lexical scoping (the compiler).
//!
//! A single [`Vars`] is flat: it only knows the slots declared directly in
//! it. Nesting is expressed by composing a `&[&Vars]` chain, outermost
//! first, and using the free functions below -- a blueprint's instance
//! layout walks its inheritance chain root-first; the compiler's lexical
//! scope walks its open block scopes outermost-first. Both get the same
//! "inner shadows outer, index is stable once assigned" guarantee from one
//! implementation.

use raven_core::{SymbolRef, TypeTag};

/// Declaration modifiers recognised on a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VarFlags {
    pub private: bool,
    pub protected: bool,
    pub nosave: bool,
}

impl VarFlags {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct VarEntry {
    pub type_tag: TypeTag,
    pub name: SymbolRef,
    pub flags: VarFlags,
}

/// A flat sequence of declarations. `add` never reassigns or removes an
/// existing entry's position, so indices handed out earlier stay valid for
/// the lifetime of the `Vars`.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    entries: Vec<VarEntry>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots declared directly in this `Vars` (not counting any
    /// outer scope in a chain).
    pub fn fill(&self) -> usize {
        self.entries.len()
    }

    pub fn add(&mut self, type_tag: TypeTag, name: SymbolRef, flags: VarFlags) -> usize {
        let index = self.entries.len();
        self.entries.push(VarEntry { type_tag, name, flags });
        index
    }

    /// Find a name declared directly in this `Vars`, without consulting any
    /// outer scope.
    pub fn find_local(&self, name: SymbolRef) -> Option<(usize, TypeTag)> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(|i| (i, self.entries[i].type_tag))
    }

    pub fn entries(&self) -> &[VarEntry] {
        &self.entries
    }
}

/// Total slot count across a chain, outermost first.
pub fn chain_count(chain: &[&Vars]) -> usize {
    chain.iter().map(|v| v.fill()).sum()
}

/// Search a chain inner-to-outer; the returned index is flat across the
/// whole chain (outer slots come first), matching the layout a blueprint's
/// instance pages or a fiber's locals array use.
pub fn chain_find(chain: &[&Vars], name: SymbolRef) -> Option<(usize, TypeTag)> {
    let mut base = chain_count(chain);
    for vars in chain.iter().rev() {
        base -= vars.fill();
        if let Some((local_index, type_tag)) = vars.find_local(name) {
            return Some((base + local_index, type_tag));
        }
    }
    None
}
