//! Single-pass parser-compiler: source text straight to bytecode functions
//! bound onto a blueprint, with no intermediate AST.
//!
//! # Modules
//!
//! - `token` / `lexer`: source text to a flat token stream
//! - `scope`: lexical scope chain for local variables
//! - `codewriter`: per-function instruction/label/constant assembly
//! - `parser`: the recursive-descent compiler itself
//! - `diagnostics`: syntax-error reporting through `tracing`

pub mod codewriter;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod token;

pub use codewriter::{CodeWriter, Label};
pub use parser::compile_blueprint;

#[cfg(test)]
mod tests {
    use super::*;
    use raven_core::{Heap, SymbolTable};
    use raven_vm::fs::{Filesystem, VirtPath};
    use raven_vm::VmObject;
    use std::collections::HashMap;

    /// An in-memory filesystem for compiler tests: no recompilation, no
    /// singleton objects, just a fixed map of path to source text. Each
    /// on-demand compile reuses whatever `SymbolTable` the caller hands
    /// `find_blueprint` -- the same one the top-level `compile_blueprint`
    /// call used -- so a nested `inherit`/`class` compile interns its
    /// symbols into the identical table, exactly as `raven-cli`'s real
    /// filesystem must thread `Engine::symbols` through.
    struct MemFs {
        files: HashMap<String, String>,
        blueprints: HashMap<String, raven_core::HeapRef>,
    }

    impl MemFs {
        fn new() -> Self {
            MemFs { files: HashMap::new(), blueprints: HashMap::new() }
        }

        fn put(&mut self, path: &str, src: &str) {
            self.files.insert(path.to_string(), src.to_string());
        }
    }

    impl Filesystem for MemFs {
        fn find_blueprint(
            &mut self,
            heap: &mut Heap<VmObject>,
            symbols: &mut SymbolTable,
            path: &VirtPath,
            create: bool,
        ) -> Option<raven_core::HeapRef> {
            let key = path.as_string();
            if let Some(&r) = self.blueprints.get(&key) {
                return Some(r);
            }
            if !create {
                return None;
            }
            let r = compile_blueprint(heap, symbols, self, path).ok()?;
            self.blueprints.insert(key, r);
            Some(r)
        }

        fn find_object(
            &mut self,
            _heap: &mut Heap<VmObject>,
            _symbols: &mut SymbolTable,
            _path: &VirtPath,
            _create: bool,
        ) -> Option<raven_core::HeapRef> {
            None
        }

        fn read(&self, path: &VirtPath, out: &mut String) -> bool {
            match self.files.get(&path.as_string()) {
                Some(s) => {
                    out.push_str(s);
                    true
                }
                None => false,
            }
        }

        fn recompile_with_log(
            &mut self,
            _heap: &mut Heap<VmObject>,
            _symbols: &mut SymbolTable,
            _path: &VirtPath,
            _log: &mut Vec<String>,
        ) -> bool {
            false
        }

        fn ls(&self, _path: &VirtPath, _visit: &mut dyn FnMut(&str)) {}
    }

    #[test]
    fn compiles_a_trivial_blueprint_with_one_method() {
        let mut heap: Heap<VmObject> = Heap::new();
        let mut symbols = SymbolTable::new();
        let mut fs = MemFs::new();
        fs.put("/room", "int square(int x) { return x * x; }\n");
        let path = VirtPath::parse("/room");
        let bp = compile_blueprint(&mut heap, &mut symbols, &mut fs, &path).expect("compiles");
        match heap.get(bp) {
            raven_core::HeapObjectKind::Ext(VmObject::Blueprint(b)) => {
                assert_eq!(b.methods.len(), 2); // _init + square
            }
            _ => panic!("expected a blueprint"),
        }
    }

    #[test]
    fn inherit_links_the_parent_blueprint() {
        let mut heap: Heap<VmObject> = Heap::new();
        let mut symbols = SymbolTable::new();
        let mut fs = MemFs::new();
        fs.put("/base", "int hp;\n");
        fs.put("/child", "inherit \"/base\";\nint mp;\n");
        let path = VirtPath::parse("/child");
        let bp = compile_blueprint(&mut heap, &mut symbols, &mut fs, &path).expect("compiles");
        match heap.get(bp) {
            raven_core::HeapObjectKind::Ext(VmObject::Blueprint(b)) => assert!(b.parent.is_some()),
            _ => panic!("expected a blueprint"),
        }
    }

    #[test]
    fn syntax_error_reports_a_caret_excerpt() {
        let mut heap: Heap<VmObject> = Heap::new();
        let mut symbols = SymbolTable::new();
        let mut fs = MemFs::new();
        fs.put("/broken", "int square(int x) { return x * ; }\n");
        let path = VirtPath::parse("/broken");
        let err = compile_blueprint(&mut heap, &mut symbols, &mut fs, &path).unwrap_err();
        assert!(matches!(err, raven_core::RavenError::Syntax { .. }));
    }
}
