//! The domain-specific heap object kinds, plugged into [`raven_core::Heap`]
//! through [`raven_core::HeapExt`].

use raven_core::{HeapExt, TypeTag, Value};

use crate::blueprint::BlueprintObj;
use crate::connection::ConnectionObj;
use crate::function::FunctionObj;
use crate::object::ObjectObj;

#[derive(Debug, Clone)]
pub enum VmObject {
    Function(FunctionObj),
    Blueprint(BlueprintObj),
    Object(ObjectObj),
    Connection(ConnectionObj),
}

impl HeapExt for VmObject {
    fn trace(&self, mark: &mut dyn FnMut(Value)) {
        match self {
            VmObject::Function(f) => {
                mark(Value::Ptr(f.name));
                for c in &f.def.constants {
                    mark(*c);
                }
            }
            VmObject::Blueprint(bp) => {
                if let Some(parent) = bp.parent {
                    mark(Value::Ptr(parent));
                }
                for m in &bp.methods {
                    mark(Value::Ptr(*m));
                }
            }
            VmObject::Object(obj) => {
                for page in &obj.pages {
                    mark(Value::Ptr(page.blueprint));
                    for slot in &page.slots {
                        mark(*slot);
                    }
                }
                if let Some(p) = obj.parent {
                    mark(Value::Ptr(p));
                }
                if let Some(c) = obj.first_child {
                    mark(Value::Ptr(c));
                }
                if let Some(s) = obj.next_sibling {
                    mark(Value::Ptr(s));
                }
                mark(obj.stash);
            }
            VmObject::Connection(conn) => {
                if let Some(o) = conn.bound_object {
                    mark(Value::Ptr(o));
                }
            }
        }
    }

    fn type_tag(&self) -> TypeTag {
        match self {
            VmObject::Function(_) => TypeTag::Function,
            VmObject::Blueprint(_) => TypeTag::Object,
            VmObject::Object(_) => TypeTag::Object,
            VmObject::Connection(_) => TypeTag::Object,
        }
    }
}
