//! Authoritative session state: connected clients, the host pointer, and the
//! pending-request table. Every mutation happens behind one mutex, so each
//! routing decision observes a single consistent snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use tandem_protocol::{ClientId, Frame, RequestId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

pub type SharedRegistry = Arc<Mutex<Registry>>;

/// One accepted connection's broker-side state. The socket itself lives in
/// the connection tasks; the registry only holds identity and the outbox.
pub struct ClientHandle {
    pub id: ClientId,
    /// Empty until a successful handshake, fixed afterwards.
    pub name: String,
    pub is_host: bool,
    outbox: mpsc::Sender<String>,
}

impl ClientHandle {
    pub fn named(&self) -> bool {
        !self.name.is_empty()
    }

    /// Non-blocking enqueue onto the client's bounded outbox. A full or
    /// closed queue drops the frame; delivery is best-effort and dropping
    /// never tears down the connection.
    pub fn enqueue(&self, line: &str) {
        match self.outbox.try_send(line.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(client = self.id, "outbox full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Bookkeeping for one outstanding host-directed request.
pub struct PendingRequest {
    pub requester_id: ClientId,
    timer: AbortHandle,
}

impl PendingRequest {
    pub fn new(requester_id: ClientId, timer: AbortHandle) -> Self {
        Self {
            requester_id,
            timer,
        }
    }

    fn cancel(&self) {
        self.timer.abort();
    }
}

#[derive(Default)]
pub struct Registry {
    clients: HashMap<ClientId, ClientHandle>,
    host_id: Option<ClientId>,
    pending: HashMap<RequestId, PendingRequest>,
    next_client_id: ClientId,
    next_request_id: RequestId,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new connection: assign the next id and make it host iff the
    /// registry was empty.
    pub fn insert(&mut self, outbox: mpsc::Sender<String>) -> ClientId {
        let id = self.next_client_id;
        self.next_client_id += 1;

        let is_host = self.clients.is_empty();
        if is_host {
            self.host_id = Some(id);
        }
        self.clients.insert(
            id,
            ClientHandle {
                id,
                name: String::new(),
                is_host,
                outbox,
            },
        );
        id
    }

    /// Tear down a session: drop its pending requests, migrate the host role
    /// if it held it, and announce the departure. Idempotent; the outbox
    /// closes when the handle is dropped here, which stops the writer.
    pub fn remove(&mut self, id: ClientId) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };

        self.pending.retain(|_, pending| {
            if pending.requester_id == id {
                pending.cancel();
                false
            } else {
                true
            }
        });

        if client.is_host {
            self.host_id = None;
            // Deterministic election: lowest remaining id wins.
            if let Some(new_id) = self.clients.keys().min().copied() {
                let mut name = String::new();
                if let Some(new_host) = self.clients.get_mut(&new_id) {
                    new_host.is_host = true;
                    name = new_host.name.clone();
                }
                self.host_id = Some(new_id);
                if let Ok(line) = Frame::new_host(new_id, &name).to_line() {
                    self.broadcast(None, &line);
                }
            }
        }

        // A client that never handshook was invisible to its peers, so its
        // departure is too.
        if client.named() {
            if let Ok(line) = Frame::user_left(id, &client.name).to_line() {
                self.broadcast(None, &line);
            }
        }
    }

    pub fn client(&self, id: ClientId) -> Option<&ClientHandle> {
        self.clients.get(&id)
    }

    pub fn host(&self) -> Option<&ClientHandle> {
        self.host_id.and_then(|id| self.clients.get(&id))
    }

    pub fn host_id(&self) -> Option<ClientId> {
        self.host_id
    }

    /// Record the name asserted by a first handshake. Later calls are no-ops;
    /// a session's name never changes once set.
    pub fn set_name(&mut self, id: ClientId, name: &str) {
        if let Some(client) = self.clients.get_mut(&id) {
            if client.name.is_empty() {
                client.name = name.to_string();
            }
        }
    }

    pub fn allocate_request_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    pub fn insert_pending(&mut self, request_id: RequestId, pending: PendingRequest) {
        self.pending.insert(request_id, pending);
    }

    /// Close out a pending request, cancelling its timer. Returns the entry
    /// so the caller can reach the requester; `None` if it already expired.
    pub fn remove_pending(&mut self, request_id: RequestId) -> Option<PendingRequest> {
        let pending = self.pending.remove(&request_id)?;
        pending.cancel();
        Some(pending)
    }

    /// Enqueue `line` to every client except `exclude`.
    pub fn broadcast(&self, exclude: Option<ClientId>, line: &str) {
        for client in self.clients.values() {
            if Some(client.id) != exclude {
                client.enqueue(line);
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_timer() -> (tokio::task::JoinHandle<()>, AbortHandle) {
        let handle = tokio::spawn(std::future::pending::<()>());
        let abort = handle.abort_handle();
        (handle, abort)
    }

    fn event_of(line: &str) -> String {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        v["event"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn first_client_becomes_host() {
        let mut registry = Registry::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);

        let a = registry.insert(tx1);
        let b = registry.insert(tx2);

        assert!(registry.client(a).unwrap().is_host);
        assert!(!registry.client(b).unwrap().is_host);
        assert_eq!(registry.host_id(), Some(a));
    }

    #[tokio::test]
    async fn client_ids_are_strictly_increasing() {
        let mut registry = Registry::new();
        let mut last = None;
        for _ in 0..5 {
            let (tx, _rx) = mpsc::channel(8);
            let id = registry.insert(tx);
            if let Some(prev) = last {
                assert!(id > prev);
            }
            last = Some(id);
        }
        // ids are never reused, even after removal
        let removed = last.unwrap();
        registry.remove(removed);
        let (tx, _rx) = mpsc::channel(8);
        assert!(registry.insert(tx) > removed);
    }

    #[tokio::test]
    async fn host_migrates_to_lowest_remaining_id() {
        let mut registry = Registry::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (tx3, mut rx3) = mpsc::channel(8);

        let a = registry.insert(tx1);
        let b = registry.insert(tx2);
        let c = registry.insert(tx3);
        registry.set_name(a, "alice");
        registry.set_name(b, "bob");
        registry.set_name(c, "carol");

        registry.remove(a);

        assert_eq!(registry.host_id(), Some(b));
        assert!(registry.client(b).unwrap().is_host);
        assert!(!registry.client(c).unwrap().is_host);

        // both survivors hear new_host then user_left
        for rx in [&mut rx2, &mut rx3] {
            let first = rx.try_recv().unwrap();
            let second = rx.try_recv().unwrap();
            assert_eq!(event_of(&first), "new_host");
            assert_eq!(event_of(&second), "user_left");
        }
    }

    #[tokio::test]
    async fn last_client_leaving_clears_host() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::channel(8);
        let a = registry.insert(tx);
        registry.remove(a);
        assert_eq!(registry.host_id(), None);
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::channel(8);
        let a = registry.insert(tx);
        registry.remove(a);
        registry.remove(a);
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn unnamed_departure_is_silent() {
        let mut registry = Registry::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let a = registry.insert(tx1);
        let b = registry.insert(tx2);
        registry.set_name(a, "alice");

        // b never handshakes
        registry.remove(b);
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_cancels_requester_pending() {
        let mut registry = Registry::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let _a = registry.insert(tx1);
        let b = registry.insert(tx2);

        let (join, abort) = stub_timer();
        let rid = registry.allocate_request_id();
        registry.insert_pending(rid, PendingRequest::new(b, abort));
        assert_eq!(registry.pending_count(), 1);

        registry.remove(b);
        assert_eq!(registry.pending_count(), 0);
        assert!(join.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn remove_pending_cancels_timer() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::channel(8);
        let a = registry.insert(tx);

        let (join, abort) = stub_timer();
        let rid = registry.allocate_request_id();
        registry.insert_pending(rid, PendingRequest::new(a, abort));

        let pending = registry.remove_pending(rid).unwrap();
        assert_eq!(pending.requester_id, a);
        assert!(registry.remove_pending(rid).is_none());
        assert!(join.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn request_ids_are_strictly_increasing() {
        let mut registry = Registry::new();
        let first = registry.allocate_request_id();
        let second = registry.allocate_request_id();
        assert!(second > first);
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let mut registry = Registry::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let a = registry.insert(tx1);
        let _b = registry.insert(tx2);

        registry.broadcast(Some(a), "{\"event\":\"cursor_move\"}");
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_outbox_drops_newest() {
        let mut registry = Registry::new();
        let (tx, mut rx) = mpsc::channel(1);
        let a = registry.insert(tx);

        let client = registry.client(a).unwrap();
        client.enqueue("first");
        client.enqueue("second");

        assert_eq!(rx.try_recv().unwrap(), "first");
        assert!(rx.try_recv().is_err());
    }
}
