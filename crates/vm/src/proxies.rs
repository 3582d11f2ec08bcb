//! Engine-wide proxy blueprints substituted for non-object receivers during
//! method resolution (`nil_proxy`, `string_proxy`, ...).

use raven_core::{Heap, HeapRef, TypeTag, Value};

use crate::vmobject::VmObject;

#[derive(Debug, Clone, Default)]
pub struct Proxies {
    pub nil_proxy: Option<HeapRef>,
    pub int_proxy: Option<HeapRef>,
    pub char_proxy: Option<HeapRef>,
    pub string_proxy: Option<HeapRef>,
    pub array_proxy: Option<HeapRef>,
    pub mapping_proxy: Option<HeapRef>,
    pub function_proxy: Option<HeapRef>,
}

impl Proxies {
    pub fn for_value(&self, heap: &Heap<VmObject>, v: Value) -> Option<HeapRef> {
        match heap.type_tag_of(v) {
            TypeTag::Void => self.nil_proxy,
            TypeTag::Int => self.int_proxy,
            TypeTag::Char => self.char_proxy,
            TypeTag::String => self.string_proxy,
            TypeTag::Array => self.array_proxy,
            TypeTag::Mapping => self.mapping_proxy,
            TypeTag::Function => self.function_proxy,
            TypeTag::Object | TypeTag::Symbol | TypeTag::Mixed => None,
        }
    }
}
