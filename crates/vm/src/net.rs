//! The network collaborator: the TCP/TELNET server and byte-stream
//! handling live entirely outside this crate. What the interpreter sees is
//! a [`crate::connection::ConnectionObj`] heap object and the two hooks
//! below; everything about framing, encoding, and socket lifecycle is the
//! implementor's problem.

use raven_core::{Heap, HeapRef};

use crate::vmobject::VmObject;

/// Queues of connection lifecycle events accepted since the last tick.
/// `connect_func`/`disconnect_func` themselves live on `EngineVars` (see
/// `crate::engine`), alongside the rest of the engine-wide funcref table.
#[derive(Debug, Clone, Default)]
pub struct Network {
    pending_accepts: Vec<HeapRef>,
    pending_teardowns: Vec<HeapRef>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `conn` was just accepted; `Engine::tick` drains this to
    /// spawn a fiber running `connect_func` against it.
    pub fn notify_accept(&mut self, conn: HeapRef) {
        self.pending_accepts.push(conn);
    }

    pub fn notify_teardown(&mut self, conn: HeapRef) {
        self.pending_teardowns.push(conn);
    }

    pub fn take_accepts(&mut self) -> Vec<HeapRef> {
        std::mem::take(&mut self.pending_accepts)
    }

    pub fn take_teardowns(&mut self) -> Vec<HeapRef> {
        std::mem::take(&mut self.pending_teardowns)
    }
}

/// Drain every connection's queued `connection.write` output, handing each
/// `(connection, text)` pair to `send`. The actual byte transport -- framing,
/// TELNET negotiation, socket writes -- is `send`'s problem; this just walks
/// the heap's open connections.
pub fn drain_output(heap: &mut Heap<VmObject>, connections: &[HeapRef], mut send: impl FnMut(HeapRef, String)) {
    for &conn in connections {
        loop {
            let text = match heap.get_mut(conn) {
                raven_core::HeapObjectKind::Ext(VmObject::Connection(c)) => c.take_output(),
                _ => None,
            };
            match text {
                Some(t) => send(conn, t),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionObj;
    use raven_core::HeapObjectKind;

    #[test]
    fn drain_output_sends_in_fifo_order() {
        let mut heap: Heap<VmObject> = Heap::new();
        let conn = heap.alloc(HeapObjectKind::Ext(VmObject::Connection(ConnectionObj::new())));
        if let HeapObjectKind::Ext(VmObject::Connection(c)) = heap.get_mut(conn) {
            c.push_output("a".into());
            c.push_output("b".into());
        }
        let mut seen = Vec::new();
        drain_output(&mut heap, &[conn], |_, text| seen.push(text));
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn accepts_and_teardowns_drain_once() {
        let mut net = Network::new();
        let mut heap: Heap<VmObject> = Heap::new();
        let conn = heap.alloc(HeapObjectKind::Ext(VmObject::Connection(ConnectionObj::new())));
        net.notify_accept(conn);
        assert_eq!(net.take_accepts(), vec![conn]);
        assert!(net.take_accepts().is_empty());
    }
}
