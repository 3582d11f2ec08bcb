//! The symbol intern table.
//!
//! A [`Symbol`] is a heap object so that a symbol literal (`#'name'`) is an
//! ordinary `Value::Ptr`. [`SymbolTable`] is the content-interning index
//! over those heap objects: `intern` returns the existing symbol for a name
//! or creates one; `gensym` creates an unnamed unique symbol that is a GC
//! root (via [`SymbolTable::gensym_roots`]) but is never returned by `find`
//! and never collides with a named symbol.

use crate::heap::{Heap, HeapExt, HeapObjectKind};
use crate::value::{HeapRef, Value};
use std::collections::HashMap;

/// A handle to a heap object known to hold a `Symbol`. Type alias rather
/// than a newtype: symbol identity *is* heap-pointer identity, and call
/// sites that need the distinction already know they hold one from a
/// `SymbolTable` method.
pub type SymbolRef = HeapRef;

/// A built-in function handler bound to a symbol. The compiler recognizes a
/// symbol as a built-in when this is `Some`; such calls compile to
/// `CALL_BUILTIN` rather than `SEND`, bypassing object method lookup.
pub type BuiltinId = u32;

/// The symbol payload stored in the heap.
#[derive(Debug, Clone)]
pub struct Symbol {
    name: Option<String>,
    builtin: Option<BuiltinId>,
}

impl Symbol {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<gensym>")
    }

    pub fn is_gensym(&self) -> bool {
        self.name.is_none()
    }

    pub fn builtin(&self) -> Option<BuiltinId> {
        self.builtin
    }
}

/// Content-interned identifier table, backed by a name-to-ref hash map
/// rather than the linear scan an intern table of this size could still
/// get away with.
#[derive(Debug, Default)]
pub struct SymbolTable {
    by_name: HashMap<String, SymbolRef>,
    gensym_roots: Vec<SymbolRef>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing symbol named `name`, or create and intern one.
    pub fn intern<Ext: HeapExt>(&mut self, heap: &mut Heap<Ext>, name: &str) -> SymbolRef {
        if let Some(&r) = self.by_name.get(name) {
            return r;
        }
        let r = heap.alloc(HeapObjectKind::Symbol(Symbol {
            name: Some(name.to_string()),
            builtin: None,
        }));
        self.by_name.insert(name.to_string(), r);
        r
    }

    /// Look up an interned symbol by name without creating one.
    pub fn find(&self, name: &str) -> Option<SymbolRef> {
        self.by_name.get(name).copied()
    }

    /// Create a fresh, unnamed symbol: a GC root, never interned.
    pub fn gensym<Ext: HeapExt>(&mut self, heap: &mut Heap<Ext>) -> SymbolRef {
        let r = heap.alloc(HeapObjectKind::Symbol(Symbol {
            name: None,
            builtin: None,
        }));
        self.gensym_roots.push(r);
        r
    }

    /// Bind a built-in handler to a (possibly newly interned) symbol name.
    pub fn bind_builtin<Ext: HeapExt>(
        &mut self,
        heap: &mut Heap<Ext>,
        name: &str,
        builtin: BuiltinId,
    ) -> SymbolRef {
        let r = self.intern(heap, name);
        if let HeapObjectKind::Symbol(sym) = heap.get_mut(r) {
            sym.builtin = Some(builtin);
        }
        r
    }

    /// Gensym'd symbols, which must be visited as GC roots even though they
    /// are unreachable through `find`.
    pub fn gensym_roots(&self) -> &[SymbolRef] {
        &self.gensym_roots
    }

    /// Drop a gensym root once no *other* root source still points at it
    /// directly. `other_live_roots` is every value reachable from outside
    /// the symbol table -- a live fiber's stack/accumulator, the
    /// engine-wide proxy/funcref/heartbeat bookkeeping -- gathered by the
    /// caller, so this check doesn't beg the question against the very
    /// list being pruned.
    ///
    /// Not required for soundness: a gensym still reachable only through
    /// the heap graph (held in a field of some other live object) survives
    /// the next collection on its own, independent of this list. This just
    /// keeps `gensym_roots` from growing without bound across a
    /// long-running process.
    pub fn retain_gensym_roots(&mut self, other_live_roots: &[Value]) {
        self.gensym_roots.retain(|r| other_live_roots.contains(&Value::Ptr(*r)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TypeTag;

    struct NoExt;
    impl HeapExt for NoExt {
        fn trace(&self, _mark: &mut dyn FnMut(Value)) {}
        fn type_tag(&self) -> TypeTag {
            TypeTag::Void
        }
    }

    #[test]
    fn find_returns_same_ref_as_intern() {
        let mut heap: Heap<NoExt> = Heap::new();
        let mut t = SymbolTable::new();
        let a = t.intern(&mut heap, "foo");
        let b = t.intern(&mut heap, "foo");
        assert_eq!(a, b);
        assert_eq!(t.find("foo"), Some(a));
    }

    #[test]
    fn gensym_is_never_findable() {
        let mut heap: Heap<NoExt> = Heap::new();
        let mut t = SymbolTable::new();
        let g = t.gensym(&mut heap);
        if let HeapObjectKind::Symbol(sym) = heap.get(g) {
            assert!(sym.is_gensym());
        } else {
            panic!("expected symbol");
        }
        assert_eq!(t.find("<gensym>"), None);
        assert!(t.gensym_roots().contains(&g));
    }

    #[test]
    fn retain_keeps_only_gensyms_still_referenced_by_other_roots() {
        let mut heap: Heap<NoExt> = Heap::new();
        let mut t = SymbolTable::new();
        let held = t.gensym(&mut heap);
        let orphaned = t.gensym(&mut heap);

        t.retain_gensym_roots(&[Value::Ptr(held)]);

        assert!(t.gensym_roots().contains(&held));
        assert!(!t.gensym_roots().contains(&orphaned));
    }
}
