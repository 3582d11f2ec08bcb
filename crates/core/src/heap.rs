//! Heap: allocation, object headers, and GC colouring.
//!
//! The heap is generic over an `Ext` type so that the domain-specific object
//! kinds (Function, Blueprint, Object, Connection) can live in `raven-vm`
//! without that crate's types leaking down into this one. The
//! language-universal kinds (Symbol, String, Array, Mapping, FunctionRef)
//! are represented directly here. Together `HeapObjectKind<Ext>` is the
//! full closed set of heap object kinds.
//!
//! Grounded on the arena-of-slots pattern used by the corpus's own GC
//! example (`lua-rs`'s `ObjectPool` + generational ids) rather than a
//! pointer-tagging scheme: slots are addressed by `HeapRef { index,
//! generation }`, sweep frees a slot by bumping its generation and pushing
//! it onto a free list, `alloc` prefers a free slot before growing.

use crate::symbol::Symbol;
use crate::value::{GcColor, HeapRef, TypeTag, Value};
use std::cell::Cell;

/// Anything a heap `Ext` variant can point at must be traceable by the GC
/// and must be able to report its own coarse type tag.
pub trait HeapExt: Sized {
    /// Invoke `mark` once for every `Value` this object directly holds.
    fn trace(&self, mark: &mut dyn FnMut(Value));
    fn type_tag(&self) -> TypeTag;
}

/// The closed set of heap object kinds, parameterized over the
/// domain-specific extension kinds owned by `raven-vm`.
pub enum HeapObjectKind<Ext> {
    Symbol(Symbol),
    String(String),
    Array(Vec<Value>),
    /// Unordered (key, value) entries. A `Vec` with linear scan is
    /// sufficient at MUD scale and sidesteps building a `Hash` impl that
    /// respects the identity-or-value equality rules for arbitrary `Value`
    /// keys; the same tradeoff applies to the symbol table.
    Mapping(Vec<(Value, Value)>),
    FunctionRef { receiver: Value, message: HeapRef },
    Ext(Ext),
}

impl<Ext: HeapExt> HeapObjectKind<Ext> {
    fn trace(&self, mark: &mut dyn FnMut(Value)) {
        match self {
            HeapObjectKind::Symbol(_) => {}
            HeapObjectKind::String(_) => {}
            HeapObjectKind::Array(items) => {
                for v in items {
                    mark(*v);
                }
            }
            HeapObjectKind::Mapping(entries) => {
                for (k, v) in entries {
                    mark(*k);
                    mark(*v);
                }
            }
            HeapObjectKind::FunctionRef { receiver, message } => {
                mark(*receiver);
                mark(Value::Ptr(*message));
            }
            HeapObjectKind::Ext(ext) => ext.trace(mark),
        }
    }

    fn type_tag(&self) -> TypeTag {
        match self {
            HeapObjectKind::Symbol(_) => TypeTag::Symbol,
            HeapObjectKind::String(_) => TypeTag::String,
            HeapObjectKind::Array(_) => TypeTag::Array,
            HeapObjectKind::Mapping(_) => TypeTag::Mapping,
            HeapObjectKind::FunctionRef { .. } => TypeTag::Function,
            HeapObjectKind::Ext(ext) => ext.type_tag(),
        }
    }
}

struct Slot<Ext> {
    color: Cell<GcColor>,
    generation: u32,
    /// `None` means the slot is free.
    kind: Option<HeapObjectKind<Ext>>,
}

/// Allocation statistics, surfaced by `raven_vm::diagnostics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    pub live_objects: usize,
    pub total_slots: usize,
    pub free_slots: usize,
    pub collections: u64,
    pub last_collected: usize,
}

/// The object table's backing store: every heap object ever allocated,
/// addressed by generation-checked handle.
pub struct Heap<Ext> {
    slots: Vec<Slot<Ext>>,
    free: Vec<u32>,
    collections: u64,
    last_collected: usize,
}

impl<Ext: HeapExt> Default for Heap<Ext> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ext: HeapExt> Heap<Ext> {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            collections: 0,
            last_collected: 0,
        }
    }

    /// Allocate a heap object. New objects are always white; `Drop` on
    /// `Ext` must not allocate.
    pub fn alloc(&mut self, kind: HeapObjectKind<Ext>) -> HeapRef {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.kind = Some(kind);
            slot.color.set(GcColor::White);
            return HeapRef {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            color: Cell::new(GcColor::White),
            generation: 0,
            kind: Some(kind),
        });
        HeapRef { index, generation: 0 }
    }

    fn slot(&self, r: HeapRef) -> &Slot<Ext> {
        let slot = &self.slots[r.index as usize];
        assert_eq!(
            slot.generation, r.generation,
            "stale HeapRef: slot has been recycled"
        );
        slot
    }

    fn slot_mut(&mut self, r: HeapRef) -> &mut Slot<Ext> {
        let slot = &mut self.slots[r.index as usize];
        assert_eq!(
            slot.generation, r.generation,
            "stale HeapRef: slot has been recycled"
        );
        slot
    }

    pub fn get(&self, r: HeapRef) -> &HeapObjectKind<Ext> {
        self.slot(r).kind.as_ref().expect("dereferencing freed HeapRef")
    }

    pub fn get_mut(&mut self, r: HeapRef) -> &mut HeapObjectKind<Ext> {
        self.slot_mut(r).kind.as_mut().expect("dereferencing freed HeapRef")
    }

    pub fn color(&self, r: HeapRef) -> GcColor {
        self.slot(r).color.get()
    }

    pub fn set_color(&self, r: HeapRef, color: GcColor) {
        self.slot(r).color.set(color);
    }

    /// All live handles, for GC sweep and diagnostics. Cheap: it is just an
    /// index scan, no hashing.
    pub(crate) fn live_refs(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.kind.as_ref().map(|_| HeapRef {
                index: i as u32,
                generation: s.generation,
            })
        })
    }

    /// Free a slot: drop its payload, bump its generation so any lingering
    /// `HeapRef` into it is detectably stale, and return it to the free
    /// list for reuse.
    pub(crate) fn free(&mut self, r: HeapRef) {
        let slot = &mut self.slots[r.index as usize];
        slot.kind = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(r.index);
    }

    pub(crate) fn record_collection(&mut self, freed: usize) {
        self.collections += 1;
        self.last_collected = freed;
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_objects: self.slots.len() - self.free.len(),
            total_slots: self.slots.len(),
            free_slots: self.free.len(),
            collections: self.collections,
            last_collected: self.last_collected,
        }
    }

    pub(crate) fn trace_ref(&self, r: HeapRef, mark: &mut dyn FnMut(Value)) {
        self.slot(r)
            .kind
            .as_ref()
            .expect("tracing freed HeapRef")
            .trace(mark);
    }

    /// Coarse type tag of any value, dereferencing heap pointers.
    pub fn type_tag_of(&self, v: Value) -> TypeTag {
        match v {
            Value::Ptr(r) => self.get(r).type_tag(),
            other => other.type_tag(),
        }
    }

    /// `sizeof`: rune length for strings, element count for arrays and
    /// mappings. `None` for values with no size, which callers turn into a
    /// runtime error rather than silently returning zero.
    pub fn sizeof(&self, v: Value) -> Option<i64> {
        match v {
            Value::Ptr(r) => match self.get(r) {
                HeapObjectKind::String(s) => Some(s.chars().count() as i64),
                HeapObjectKind::Array(items) => Some(items.len() as i64),
                HeapObjectKind::Mapping(entries) => Some(entries.len() as i64),
                _ => None,
            },
            _ => None,
        }
    }

    /// Language-level equality: nil=nil; int=int; char=char; int/char
    /// cross-equal by numeric code; strings compare by content; all other
    /// pointers compare by identity.
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Char(x), Value::Char(y)) => x == y,
            (Value::Int(x), Value::Char(y)) | (Value::Char(y), Value::Int(x)) => x == y as i64,
            (Value::Ptr(x), Value::Ptr(y)) => {
                if x == y {
                    return true;
                }
                match (self.get(x), self.get(y)) {
                    (HeapObjectKind::String(s1), HeapObjectKind::String(s2)) => s1 == s2,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoExt;
    impl HeapExt for NoExt {
        fn trace(&self, _mark: &mut dyn FnMut(Value)) {}
        fn type_tag(&self) -> TypeTag {
            TypeTag::Void
        }
    }

    #[test]
    fn alloc_reuses_freed_slots() {
        let mut heap: Heap<NoExt> = Heap::new();
        let a = heap.alloc(HeapObjectKind::String("a".into()));
        heap.free(a);
        let b = heap.alloc(HeapObjectKind::String("b".into()));
        assert_eq!(a.index, b.index);
        assert_ne!(a.generation, b.generation);
    }

    #[test]
    #[should_panic(expected = "stale HeapRef")]
    fn stale_ref_after_free_panics() {
        let mut heap: Heap<NoExt> = Heap::new();
        let a = heap.alloc(HeapObjectKind::String("a".into()));
        heap.free(a);
        let _ = heap.get(a);
    }

    #[test]
    fn equality_rules() {
        let mut heap: Heap<NoExt> = Heap::new();
        let s1 = heap.alloc(HeapObjectKind::String("hi".into()));
        let s2 = heap.alloc(HeapObjectKind::String("hi".into()));
        assert!(heap.values_equal(Value::Ptr(s1), Value::Ptr(s2)));
        assert!(heap.values_equal(Value::Int(97), Value::Char('a')));
        assert!(!heap.values_equal(Value::Nil, Value::Int(0)));
    }

    #[test]
    fn sizeof_string_is_rune_length() {
        let mut heap: Heap<NoExt> = Heap::new();
        let s = heap.alloc(HeapObjectKind::String("héllo".into()));
        assert_eq!(heap.sizeof(Value::Ptr(s)), Some(5));
    }
}
