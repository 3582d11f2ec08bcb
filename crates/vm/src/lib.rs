//! Raven VM: blueprint/object model, cooperative fiber scheduler, bytecode
//! interpreter, and the `Engine` context that ties them together.
//!
//! Layered over `raven-core`'s heap and GC: this crate supplies the
//! domain-specific heap object kinds (`VmObject`) through `HeapExt`, and
//! owns everything that knows what a blueprint, object, connection, or
//! fiber is. `raven-core` itself knows none of that.
//!
//! # Modules
//!
//! - `vars` / `function` / `blueprint` / `object` / `connection`: the
//!   object model
//! - `vmobject`: the closed set of domain heap kinds (`HeapExt` impl)
//! - `frame` / `fiber` / `scheduler`: execution state and cooperative
//!   scheduling
//! - `interpreter`: the bytecode dispatch loop
//! - `builtins` / `proxies`: built-in functions and type-tag method proxies
//! - `engine`: the owning context (`Engine`) that replaces a global
//!   singleton
//! - `gcroots`: root enumeration for `raven_core::gc::collect`
//! - `fs` / `net`: filesystem and network collaborator traits
//! - `config`: CLI/file/env configuration resolution
//! - `diagnostics`: SIGQUIT stats dump
//! - `backtrace`: crash backtrace rendering

pub mod backtrace;
pub mod blueprint;
pub mod builtins;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod engine;
pub mod fiber;
pub mod frame;
pub mod fs;
pub mod function;
pub mod gcroots;
pub mod interpreter;
pub mod net;
pub mod object;
pub mod proxies;
pub mod scheduler;
pub mod vars;
pub mod vmobject;

pub use blueprint::BlueprintObj;
pub use builtins::BuiltinRegistry;
pub use config::{CliOverrides, ConfigFile, RavenConfig};
pub use connection::ConnectionObj;
pub use engine::{Engine, EngineVars};
pub use fiber::{Fiber, FiberState};
pub use fs::{Filesystem, VirtPath};
pub use function::FunctionObj;
pub use interpreter::EngineEffect;
pub use net::Network;
pub use proxies::Proxies;
pub use scheduler::{Scheduler, SchedulerStats};
pub use vmobject::VmObject;
