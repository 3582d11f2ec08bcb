//! The `Connection` heap object: the engine's view of a network-attached
//! player session. Byte transport itself is a collaborator (see
//! [`crate::net`]); what lives on the heap is just the handle an object or
//! fiber can hold a `Value::Ptr` to and the small amount of state scripts
//! observe (bound object, pending input queue).

use raven_core::HeapRef;
use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct ConnectionObj {
    /// The in-game object this connection drives, once `connect_func` has
    /// run and assigned one.
    pub bound_object: Option<HeapRef>,
    /// Lines of input received but not yet consumed by a
    /// suspension-producing read built-in.
    pub pending_input: VecDeque<String>,
    /// Bytes queued by `connection.write` but not yet drained by the network
    /// collaborator.
    pub pending_output: VecDeque<String>,
    pub closed: bool,
}

impl ConnectionObj {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, line: String) {
        self.pending_input.push_back(line);
    }

    pub fn take_input(&mut self) -> Option<String> {
        self.pending_input.pop_front()
    }

    pub fn push_output(&mut self, text: String) {
        self.pending_output.push_back(text);
    }

    pub fn take_output(&mut self) -> Option<String> {
        self.pending_output.pop_front()
    }
}
