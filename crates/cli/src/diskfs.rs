//! A disk-backed [`Filesystem`]: virtual paths map to source files under a
//! mudlib root by simple catenation plus a fixed source extension, and
//! loaded blueprints/singleton objects are cached so a second `inherit` or
//! `clone_object` on the same path is a lookup, not a recompile.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use raven_core::{Heap, HeapRef, SymbolTable};
use raven_compiler::compile_blueprint;
use raven_vm::fs::{Filesystem, VirtPath};
use raven_vm::object::blueprint_instantiate;
use raven_vm::VmObject;

const SOURCE_EXT: &str = "rvn";

pub struct DiskFs {
    root: PathBuf,
    blueprints: HashMap<String, HeapRef>,
    objects: HashMap<String, HeapRef>,
}

impl DiskFs {
    pub fn new(root: PathBuf) -> Self {
        DiskFs {
            root,
            blueprints: HashMap::new(),
            objects: HashMap::new(),
        }
    }

    fn real_path(&self, path: &VirtPath) -> PathBuf {
        let rel = path.as_string();
        let rel = rel.strip_prefix('/').unwrap_or(&rel);
        let mut real = self.root.join(rel);
        real.set_extension(SOURCE_EXT);
        real
    }

    fn real_dir(&self, path: &VirtPath) -> PathBuf {
        let rel = path.as_string();
        let rel = rel.strip_prefix('/').unwrap_or(&rel);
        self.root.join(rel)
    }
}

impl Filesystem for DiskFs {
    fn find_blueprint(
        &mut self,
        heap: &mut Heap<VmObject>,
        symbols: &mut SymbolTable,
        path: &VirtPath,
        create: bool,
    ) -> Option<HeapRef> {
        let key = path.as_string();
        if let Some(&bp) = self.blueprints.get(&key) {
            return Some(bp);
        }
        if !create {
            return None;
        }
        match compile_blueprint(heap, symbols, self, path) {
            Ok(bp) => {
                self.blueprints.insert(key, bp);
                Some(bp)
            }
            Err(e) => {
                tracing::error!(path = %key, error = %e, "blueprint compile failed");
                None
            }
        }
    }

    fn find_object(
        &mut self,
        heap: &mut Heap<VmObject>,
        symbols: &mut SymbolTable,
        path: &VirtPath,
        create: bool,
    ) -> Option<HeapRef> {
        let key = path.as_string();
        if let Some(&obj) = self.objects.get(&key) {
            return Some(obj);
        }
        if !create {
            return None;
        }
        let bp = self.find_blueprint(heap, symbols, path, true)?;
        let obj = blueprint_instantiate(heap, bp);
        self.objects.insert(key, obj);
        Some(obj)
    }

    fn read(&self, path: &VirtPath, out: &mut String) -> bool {
        match std::fs::read_to_string(self.real_path(path)) {
            Ok(s) => {
                out.push_str(&s);
                true
            }
            Err(_) => false,
        }
    }

    fn recompile_with_log(
        &mut self,
        heap: &mut Heap<VmObject>,
        symbols: &mut SymbolTable,
        path: &VirtPath,
        log: &mut Vec<String>,
    ) -> bool {
        let key = path.as_string();
        if !Path::new(&self.real_path(path)).exists() {
            return false;
        }
        match compile_blueprint(heap, symbols, self, path) {
            Ok(bp) => {
                self.blueprints.insert(key, bp);
                true
            }
            Err(e) => {
                log.push(e.to_string());
                false
            }
        }
    }

    fn ls(&self, path: &VirtPath, visit: &mut dyn FnMut(&str)) {
        let Ok(entries) = std::fs::read_dir(self.real_dir(path)) else {
            return;
        };
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                visit(name);
            }
        }
    }
}
