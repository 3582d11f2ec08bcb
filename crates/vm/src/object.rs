//! The `Object` heap object: an instance of a blueprint chain.
//!
//! Storage is a page per blueprint in the chain, each page holding exactly
//! that blueprint's own declared variables -- not a single flattened slot
//! array -- so that [`crate::blueprint::instance_size`] and per-blueprint
//! variable declarations stay the source of truth for layout, and a page
//! can be located by blueprint identity without recomputing offsets.

use raven_core::{Heap, HeapObjectKind, HeapRef, Value};

use crate::blueprint::chain_root_first;
use crate::vmobject::VmObject;

#[derive(Debug, Clone)]
pub struct Page {
    pub blueprint: HeapRef,
    pub slots: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct ObjectObj {
    /// One page per ancestor blueprint, root-first (index 0 is the
    /// `/secure/base` end of the chain, last is the object's own blueprint).
    pub pages: Vec<Page>,
    pub parent: Option<HeapRef>,
    pub first_child: Option<HeapRef>,
    pub next_sibling: Option<HeapRef>,
    pub heartbeat_enabled: bool,
    pub initialised: bool,
    pub stash: Value,
}

impl ObjectObj {
    fn page_for(&self, bp: HeapRef) -> Option<&Page> {
        self.pages.iter().find(|p| p.blueprint == bp)
    }

    fn page_for_mut(&mut self, bp: HeapRef) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| p.blueprint == bp)
    }
}

/// Build a fresh, uninitialised object from `bp`'s chain: one page per
/// ancestor (root-first), each page's slots nil-filled to its blueprint's
/// own `Vars::fill()`.
pub fn blueprint_instantiate(heap: &mut Heap<VmObject>, bp: HeapRef) -> HeapRef {
    let chain = chain_root_first(heap, bp);
    let pages: Vec<Page> = chain
        .into_iter()
        .map(|bp_ref| {
            let fill = match heap.get(bp_ref) {
                HeapObjectKind::Ext(VmObject::Blueprint(b)) => b.vars.fill(),
                _ => panic!("HeapRef does not point at a Blueprint"),
            };
            Page {
                blueprint: bp_ref,
                slots: vec![Value::Nil; fill],
            }
        })
        .collect();

    heap.alloc(HeapObjectKind::Ext(VmObject::Object(ObjectObj {
        pages,
        parent: None,
        first_child: None,
        next_sibling: None,
        heartbeat_enabled: false,
        initialised: false,
        stash: Value::Nil,
    })))
}

fn as_object(heap: &Heap<VmObject>, r: HeapRef) -> &ObjectObj {
    match heap.get(r) {
        HeapObjectKind::Ext(VmObject::Object(o)) => o,
        _ => panic!("HeapRef does not point at an Object"),
    }
}

fn as_object_mut(heap: &mut Heap<VmObject>, r: HeapRef) -> &mut ObjectObj {
    match heap.get_mut(r) {
        HeapObjectKind::Ext(VmObject::Object(o)) => o,
        _ => panic!("HeapRef does not point at an Object"),
    }
}

/// Resolve a flattened instance-variable index (as produced by
/// `blueprint::instance_size`/chain lookups) to the `(page, slot-in-page)`
/// it lives at.
fn locate(heap: &Heap<VmObject>, obj: HeapRef, flat_index: usize) -> (usize, usize) {
    let o = as_object(heap, obj);
    let mut remaining = flat_index;
    for (page_index, page) in o.pages.iter().enumerate() {
        if remaining < page.slots.len() {
            return (page_index, remaining);
        }
        remaining -= page.slots.len();
    }
    panic!("instance-variable index out of range");
}

pub fn load_member(heap: &Heap<VmObject>, obj: HeapRef, flat_index: usize) -> Value {
    let (page, slot) = locate(heap, obj, flat_index);
    as_object(heap, obj).pages[page].slots[slot]
}

pub fn store_member(heap: &mut Heap<VmObject>, obj: HeapRef, flat_index: usize, value: Value) {
    let (page, slot) = locate(heap, obj, flat_index);
    as_object_mut(heap, obj).pages[page].slots[slot] = value;
}

/// The page belonging to `bp` exactly (no inheritance walk): used when a
/// method wants its own blueprint's page rather than a flattened index.
pub fn page_slots(heap: &Heap<VmObject>, obj: HeapRef, bp: HeapRef) -> Option<&[Value]> {
    as_object(heap, obj).page_for(bp).map(|p| p.slots.as_slice())
}

pub fn set_page_slot(heap: &mut Heap<VmObject>, obj: HeapRef, bp: HeapRef, index: usize, value: Value) {
    if let Some(page) = as_object_mut(heap, obj).page_for_mut(bp) {
        page.slots[index] = value;
    }
}

pub fn set_heartbeat(heap: &mut Heap<VmObject>, obj: HeapRef, enabled: bool) {
    as_object_mut(heap, obj).heartbeat_enabled = enabled;
}

pub fn has_heartbeat(heap: &Heap<VmObject>, obj: HeapRef) -> bool {
    as_object(heap, obj).heartbeat_enabled
}

pub fn mark_initialised(heap: &mut Heap<VmObject>, obj: HeapRef) {
    as_object_mut(heap, obj).initialised = true;
}

pub fn is_initialised(heap: &Heap<VmObject>, obj: HeapRef) -> bool {
    as_object(heap, obj).initialised
}
