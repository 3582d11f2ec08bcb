//! The filesystem collaborator: virtual-path resolution and blueprint
//! loading are kept out of core/vm proper and reached only through this
//! trait, the way the bytecode interpreter never reads a socket directly
//! (see [`crate::net`]).
//!
//! A virtual path such as `/secure/master` maps to a real file by
//! catenation under an anchor directory supplied at startup; the anchor
//! itself is the implementor's concern; nothing here assumes a particular
//! mapping beyond the `cd`-style normalisation rules `VirtPath` expresses.

use raven_core::HeapRef;

use crate::vmobject::VmObject;
use raven_core::{Heap, SymbolTable};

/// A single normalisation step applied to a virtual path.
#[derive(Debug, Clone)]
pub enum PathStep<'a> {
    /// `cd("..")`: pop the last segment, clamped at the root.
    Up,
    /// `cd(".")` or `cd("")`: no-op.
    Same,
    /// `cd("/abs/path")`: replace the whole path.
    Absolute(&'a str),
    /// `cd("relative/segment")`: append under the current path.
    Relative(&'a str),
}

/// A virtual path, always absolute and `/`-separated, with no `.`/`..`
/// segments once built -- `push` resolves those immediately rather than
/// leaving them for a later pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtPath {
    segments: Vec<String>,
}

impl VirtPath {
    pub fn root() -> Self {
        VirtPath { segments: Vec::new() }
    }

    pub fn parse(path: &str) -> Self {
        let mut p = VirtPath::root();
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            p.push(PathStep::classify(seg));
        }
        p
    }

    pub fn push(&mut self, step: PathStep) {
        match step {
            PathStep::Up => {
                self.segments.pop();
            }
            PathStep::Same => {}
            PathStep::Absolute(p) => *self = VirtPath::parse(p),
            PathStep::Relative(seg) => self.segments.push(seg.to_string()),
        }
    }

    pub fn as_string(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn parent(&self) -> VirtPath {
        let mut p = self.clone();
        p.push(PathStep::Up);
        p
    }
}

impl<'a> PathStep<'a> {
    fn classify(seg: &'a str) -> Self {
        match seg {
            ".." => PathStep::Up,
            "." | "" => PathStep::Same,
            _ if seg.starts_with('/') => PathStep::Absolute(seg),
            _ => PathStep::Relative(seg),
        }
    }
}

/// `fs_resolve(base, direction)`: combine a base path with a relative or
/// absolute direction string, honouring `..`/`.`/absolute semantics.
pub fn fs_resolve(base: &VirtPath, direction: &str) -> VirtPath {
    if let Some(stripped) = direction.strip_prefix('/') {
        return VirtPath::parse(stripped);
    }
    let mut resolved = base.clone();
    for seg in direction.split('/').filter(|s| !s.is_empty()) {
        resolved.push(PathStep::classify(seg));
    }
    resolved
}

/// The engine's view of the virtual filesystem: blueprint/object lookup,
/// source reads, and directory listing. Implementations own the mapping
/// from `VirtPath` to real files under whatever anchor they were
/// constructed with.
pub trait Filesystem {
    /// Resolve `path` to its already-loaded blueprint, compiling it (and
    /// its dependencies) on demand if `create` is set and it isn't loaded
    /// yet. `None` if the path doesn't exist and `create` is false, or
    /// compilation fails.
    ///
    /// Takes the engine's own `symbols` table (not an implementor-owned
    /// one): a compiled function's name and every message-send symbol it
    /// emits must be interned through the exact table the built-in
    /// registry bound its names into, or `CALL_BUILTIN` vs `SEND`
    /// resolution silently picks the wrong one.
    fn find_blueprint(
        &mut self,
        heap: &mut Heap<VmObject>,
        symbols: &mut SymbolTable,
        path: &VirtPath,
        create: bool,
    ) -> Option<HeapRef>;

    /// Resolve `path` to a singleton object instantiated from the
    /// blueprint at that path, creating it on demand if `create` is set.
    fn find_object(
        &mut self,
        heap: &mut Heap<VmObject>,
        symbols: &mut SymbolTable,
        path: &VirtPath,
        create: bool,
    ) -> Option<HeapRef>;

    /// Read the full contents of `path` into `out`. `false` if the file
    /// doesn't exist or can't be read.
    fn read(&self, path: &VirtPath, out: &mut String) -> bool;

    /// Force a recompile of the blueprint at `path`, appending any
    /// diagnostics produced to `log`. `false` if the path has no source
    /// file to recompile.
    fn recompile_with_log(
        &mut self,
        heap: &mut Heap<VmObject>,
        symbols: &mut SymbolTable,
        path: &VirtPath,
        log: &mut Vec<String>,
    ) -> bool;

    /// List the directory at `path`, calling `visit` once per entry name.
    /// `false` if `path` is not a directory.
    fn ls(&self, path: &VirtPath, visit: &mut dyn FnMut(&str));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_collapses_dot_and_dotdot() {
        let p = VirtPath::parse("/rooms/./start/../lobby");
        assert_eq!(p.as_string(), "/rooms/lobby");
    }

    #[test]
    fn up_at_root_is_a_clamp_not_a_panic() {
        let mut p = VirtPath::root();
        p.push(PathStep::Up);
        assert_eq!(p.as_string(), "/");
    }

    #[test]
    fn resolve_relative_direction_extends_base() {
        let base = VirtPath::parse("/rooms/start");
        let r = fs_resolve(&base, "../lobby");
        assert_eq!(r.as_string(), "/rooms/lobby");
    }

    #[test]
    fn resolve_absolute_direction_replaces_base() {
        let base = VirtPath::parse("/rooms/start");
        let r = fs_resolve(&base, "/secure/master");
        assert_eq!(r.as_string(), "/secure/master");
    }

    #[test]
    fn parent_pops_one_segment() {
        let p = VirtPath::parse("/a/b/c");
        assert_eq!(p.parent().as_string(), "/a/b");
    }
}
