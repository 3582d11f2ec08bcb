//! The `Blueprint` heap object: a class-like record with single
//! inheritance, an ordered method table, and an instance-variable layout.

use raven_core::{Heap, HeapObjectKind, HeapRef, SymbolRef, TypeTag};

use crate::function::FunctionObj;
use crate::vars::{chain_find, VarFlags, Vars};
use crate::vmobject::VmObject;

#[derive(Debug, Clone)]
pub struct BlueprintObj {
    pub virt_path: String,
    pub parent: Option<HeapRef>,
    /// Declaration-ordered method table. Lookup picks the first match, so
    /// order must be preserved; unlinking uses `swap_remove` plus fixing up
    /// the moved function's `index_in_owner`, which breaks ordering -- we
    /// accept that (a blueprint never needs to unlink a live method in this
    /// runtime, since there is no hot-reload of method bodies), and keep the
    /// indexed-vector shape purely for the O(1) back-reference it gives
    /// `FunctionObj`.
    pub methods: Vec<HeapRef>,
    pub vars: Vars,
}

impl BlueprintObj {
    pub fn new(virt_path: impl Into<String>) -> Self {
        BlueprintObj {
            virt_path: virt_path.into(),
            parent: None,
            methods: Vec::new(),
            vars: Vars::new(),
        }
    }

    /// Declare an instance variable on this blueprint. Returns the
    /// blueprint-local slot index (not the flattened instance index; see
    /// [`instance_size`] and [`instance_var_index`] for the chain-wide
    /// view).
    pub fn add_var(&mut self, type_tag: TypeTag, name: SymbolRef, flags: VarFlags) -> usize {
        self.vars.add(type_tag, name, flags)
    }
}

/// Attach `function` to `blueprint`'s method list, setting the function's
/// name and back-reference. Fails if `function` is already owned.
pub fn blueprint_add_func(
    heap: &mut Heap<VmObject>,
    blueprint: HeapRef,
    function: HeapRef,
) -> bool {
    let already_owned = matches!(
        heap.get(function),
        HeapObjectKind::Ext(VmObject::Function(f)) if f.owner.is_some()
    );
    if already_owned {
        return false;
    }
    let index = if let HeapObjectKind::Ext(VmObject::Blueprint(bp)) = heap.get(blueprint) {
        bp.methods.len()
    } else {
        return false;
    };
    if let HeapObjectKind::Ext(VmObject::Function(f)) = heap.get_mut(function) {
        f.owner = Some(blueprint);
        f.index_in_owner = index;
    } else {
        return false;
    }
    if let HeapObjectKind::Ext(VmObject::Blueprint(bp)) = heap.get_mut(blueprint) {
        bp.methods.push(function);
        true
    } else {
        false
    }
}

/// Set `child.parent = parent`. Fails if `child` already has a parent.
pub fn blueprint_inherit(heap: &mut Heap<VmObject>, child: HeapRef, parent: HeapRef) -> bool {
    let has_parent = matches!(
        heap.get(child),
        HeapObjectKind::Ext(VmObject::Blueprint(bp)) if bp.parent.is_some()
    );
    if has_parent {
        return false;
    }
    if let HeapObjectKind::Ext(VmObject::Blueprint(bp)) = heap.get_mut(child) {
        bp.parent = Some(parent);
        true
    } else {
        false
    }
}

fn as_blueprint(heap: &Heap<VmObject>, r: HeapRef) -> &BlueprintObj {
    match heap.get(r) {
        HeapObjectKind::Ext(VmObject::Blueprint(bp)) => bp,
        _ => panic!("HeapRef does not point at a Blueprint"),
    }
}

fn as_function(heap: &Heap<VmObject>, r: HeapRef) -> &FunctionObj {
    match heap.get(r) {
        HeapObjectKind::Ext(VmObject::Function(f)) => f,
        _ => panic!("HeapRef does not point at a Function"),
    }
}

/// The blueprint's ancestor chain, root-first, including `bp` itself last.
pub fn chain_root_first(heap: &Heap<VmObject>, bp: HeapRef) -> Vec<HeapRef> {
    let mut chain = Vec::new();
    let mut cur = Some(bp);
    while let Some(r) = cur {
        chain.push(r);
        cur = as_blueprint(heap, r).parent;
    }
    chain.reverse();
    chain
}

/// Sum of `Vars::fill()` up the parent chain (including `bp`): the total
/// instance-variable slot count an object instantiated from `bp` needs.
pub fn instance_size(heap: &Heap<VmObject>, bp: HeapRef) -> usize {
    chain_root_first(heap, bp)
        .iter()
        .map(|r| as_blueprint(heap, *r).vars.fill())
        .sum()
}

/// Chain-wide flat slot index of instance variable `name`, searching `bp`
/// and every ancestor (outer-to-inner numbering, matching
/// `compiler::ScopeChain`'s convention for locals). `None` if no blueprint
/// in the chain declares it.
pub fn instance_var_index(heap: &Heap<VmObject>, bp: HeapRef, name: SymbolRef) -> Option<(usize, TypeTag)> {
    let chain = chain_root_first(heap, bp);
    let vars_chain: Vec<&Vars> = chain.iter().map(|&r| &as_blueprint(heap, r).vars).collect();
    chain_find(&vars_chain, name)
}

/// First method on `bp` itself (does not walk parents) matching `message`,
/// visibility, and arity. Exact arg-count match, or fewer than declared
/// when the function is varargs.
pub fn blueprint_lookup(
    heap: &Heap<VmObject>,
    bp: HeapRef,
    message: SymbolRef,
    arg_count: usize,
    allow_private: bool,
) -> Option<HeapRef> {
    let blueprint = as_blueprint(heap, bp);
    blueprint
        .methods
        .iter()
        .copied()
        .find(|&fref| {
            let f = as_function(heap, fref);
            if f.name != message {
                return false;
            }
            if (f.def.is_private || f.def.is_protected) && !allow_private {
                return false;
            }
            let arity = f.def.arity();
            arg_count == arity || (f.def.varargs && arg_count < arity)
        })
}

/// Walk the parent chain (excluding `bp` itself) looking up `message`,
/// honouring inheritance -- used for ordinary `SEND` once `bp` itself has
/// no match, and for `SUPER_SEND` which starts one level up unconditionally.
pub fn blueprint_lookup_inherited(
    heap: &Heap<VmObject>,
    bp: HeapRef,
    message: SymbolRef,
    arg_count: usize,
) -> Option<HeapRef> {
    let mut cur = as_blueprint(heap, bp).parent;
    while let Some(r) = cur {
        if let Some(found) = blueprint_lookup(heap, r, message, arg_count, true) {
            return Some(found);
        }
        cur = as_blueprint(heap, r).parent;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use raven_core::{FunctionDef, Heap, Instr, Op, SymbolTable, TypeRef};

    fn new_heap_and_symbols() -> (Heap<VmObject>, SymbolTable) {
        (Heap::new(), SymbolTable::new())
    }

    fn trivial_def(name: &str, arity: usize, varargs: bool) -> FunctionDef {
        FunctionDef {
            name: name.into(),
            code: vec![Instr::Op(Op::Add), Instr::Return],
            constants: Vec::new(),
            param_types: vec![TypeRef::Int; arity],
            return_type: TypeRef::Int,
            locals: arity as u32 + 1,
            varargs,
            is_private: false,
            is_protected: false,
        }
    }

    fn add_method(heap: &mut Heap<VmObject>, symbols: &mut SymbolTable, bp: HeapRef, name: &str, arity: usize, varargs: bool) -> HeapRef {
        let sym = symbols.intern(heap, name);
        let func = heap.alloc(HeapObjectKind::Ext(VmObject::Function(FunctionObj::new(trivial_def(name, arity, varargs), sym))));
        assert!(blueprint_add_func(heap, bp, func));
        func
    }

    #[test]
    fn instance_size_sums_fill_counts_up_the_parent_chain() {
        let (mut heap, mut symbols) = new_heap_and_symbols();
        let base = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/base"))));
        let hp = symbols.intern(&mut heap, "hp");
        if let HeapObjectKind::Ext(VmObject::Blueprint(bp)) = heap.get_mut(base) {
            bp.add_var(TypeTag::Int, hp, VarFlags::empty());
        }
        let child = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/child"))));
        let mp = symbols.intern(&mut heap, "mp");
        let level = symbols.intern(&mut heap, "level");
        if let HeapObjectKind::Ext(VmObject::Blueprint(bp)) = heap.get_mut(child) {
            bp.add_var(TypeTag::Int, mp, VarFlags::empty());
            bp.add_var(TypeTag::Int, level, VarFlags::empty());
        }
        assert!(blueprint_inherit(&mut heap, child, base));

        assert_eq!(instance_size(&heap, base), 1);
        assert_eq!(instance_size(&heap, child), 3);
        assert_eq!(instance_var_index(&heap, child, hp), Some((0, TypeTag::Int)));
        assert_eq!(instance_var_index(&heap, child, level), Some((2, TypeTag::Int)));
    }

    #[test]
    fn blueprint_inherit_refuses_a_second_parent() {
        let (mut heap, _symbols) = new_heap_and_symbols();
        let a = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/a"))));
        let b = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/b"))));
        let c = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/c"))));
        assert!(blueprint_inherit(&mut heap, a, b));
        assert!(!blueprint_inherit(&mut heap, a, c));
    }

    #[test]
    fn lookup_picks_first_declaration_order_match_and_respects_visibility() {
        let (mut heap, mut symbols) = new_heap_and_symbols();
        let bp = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/room"))));
        let look = add_method(&mut heap, &mut symbols, bp, "look", 0, false);
        let msg = symbols.intern(&mut heap, "look");

        assert_eq!(blueprint_lookup(&heap, bp, msg, 0, true), Some(look));
        assert_eq!(blueprint_lookup(&heap, bp, msg, 1, true), None);
    }

    #[test]
    fn varargs_method_matches_any_arg_count_at_or_below_its_declared_arity() {
        let (mut heap, mut symbols) = new_heap_and_symbols();
        let bp = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/logger"))));
        let log = add_method(&mut heap, &mut symbols, bp, "log", 3, true);
        let msg = symbols.intern(&mut heap, "log");

        assert_eq!(blueprint_lookup(&heap, bp, msg, 0, true), Some(log));
        assert_eq!(blueprint_lookup(&heap, bp, msg, 3, true), Some(log));
    }

    #[test]
    fn super_send_skips_the_receivers_own_blueprint_and_starts_at_the_parent() {
        let (mut heap, mut symbols) = new_heap_and_symbols();
        let parent = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/parent"))));
        let parent_greet = add_method(&mut heap, &mut symbols, parent, "greet", 0, false);
        let child = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/child"))));
        let _child_greet = add_method(&mut heap, &mut symbols, child, "greet", 0, false);
        assert!(blueprint_inherit(&mut heap, child, parent));
        let msg = symbols.intern(&mut heap, "greet");

        assert_eq!(blueprint_lookup_inherited(&heap, child, msg, 0), Some(parent_greet));
    }

    #[test]
    fn chain_root_first_lists_ancestors_before_the_blueprint_itself() {
        let (mut heap, _symbols) = new_heap_and_symbols();
        let base = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/base"))));
        let mid = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/mid"))));
        let leaf = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new("/leaf"))));
        assert!(blueprint_inherit(&mut heap, mid, base));
        assert!(blueprint_inherit(&mut heap, leaf, mid));

        assert_eq!(chain_root_first(&heap, leaf), vec![base, mid, leaf]);
    }
}
