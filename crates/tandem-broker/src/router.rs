//! Frame classification and routing policy.
//!
//! One `route` call is one supervisor step: the registry lock is held from
//! classification through every resulting enqueue, so multi-field updates
//! (pending bookkeeping, host lookups) are atomic with respect to frames
//! from other senders.

use std::time::Duration;

use tandem_protocol::{event, is_broadcast_event, ClientId, Frame, RequestId};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::config::BrokerConfig;
use crate::registry::{PendingRequest, Registry, SharedRegistry};

pub const SET_NAME_FIRST: &str = "Set name first!";
pub const INVALID_NAME: &str = "Invalid name";
pub const HOST_TAKEN: &str = "Host role already taken";
pub const NO_HOST: &str = "No host available";
pub const TIMEOUT: &str = "Timeout waiting for host response";
pub const FRAME_TOO_LARGE: &str = "Frame too large";

/// Route one inbound frame from `sender_id`.
pub async fn route(shared: &SharedRegistry, sender_id: ClientId, mut msg: Frame, config: &BrokerConfig) {
    let mut registry = shared.lock().await;

    // The sender can already be gone if its teardown raced this frame.
    let Some(sender) = registry.client(sender_id) else {
        return;
    };
    let sender_named = sender.named();
    let sender_is_host = sender.is_host;
    let sender_name = sender.name.clone();

    if msg.event == event::HANDSHAKE {
        handshake(&mut registry, sender_id, &msg);
        return;
    }

    if !sender_named {
        send_error(&registry, sender_id, SET_NAME_FIRST);
        return;
    }

    if is_broadcast_event(&msg.event) {
        msg.from_id = Some(sender_id);
        msg.name = Some(sender_name);
        if let Ok(line) = msg.to_line() {
            registry.broadcast(Some(sender_id), &line);
        }
        return;
    }

    if let Some(request_id) = msg.request_id {
        respond(&mut registry, request_id, &msg);
        return;
    }

    if sender_is_host {
        // The host is the authority: its unsolicited frames fan out to the
        // group instead of being queued against itself.
        msg.from_id = Some(sender_id);
        msg.name = Some(sender_name);
        if let Ok(line) = msg.to_line() {
            registry.broadcast(Some(sender_id), &line);
        }
        return;
    }

    forward_to_host(&mut registry, shared, sender_id, msg, config.request_timeout);
}

/// First frame of a session: record the asserted name and announce the join.
/// Repeated handshakes never rename a session.
fn handshake(registry: &mut Registry, sender_id: ClientId, msg: &Frame) {
    let name = msg.name.as_deref().unwrap_or("");
    if name.is_empty() {
        send_error(registry, sender_id, INVALID_NAME);
        return;
    }

    let Some(sender) = registry.client(sender_id) else {
        return;
    };
    if sender.named() {
        return;
    }
    let is_host = sender.is_host;
    registry.set_name(sender_id, name);

    // A host claim is honored only when the claimant already holds the role;
    // a host always exists while any client is connected.
    if msg.host == Some(true) && !is_host {
        send_error(registry, sender_id, HOST_TAKEN);
    }

    if let Ok(line) = Frame::user_joined(sender_id, name, is_host).to_line() {
        registry.broadcast(Some(sender_id), &line);
    }
}

/// A frame carrying `request_id` closes out the matching pending request and
/// goes back to whoever asked. Origin is not validated; a stale or unknown
/// correlation is dropped.
fn respond(registry: &mut Registry, request_id: RequestId, msg: &Frame) {
    let Some(pending) = registry.remove_pending(request_id) else {
        debug!(request_id, "response for unknown or expired request, dropping");
        return;
    };
    if let Some(requester) = registry.client(pending.requester_id) {
        if let Ok(line) = msg.to_line() {
            requester.enqueue(&line);
        }
    }
}

/// Correlate and forward a request to the current host, arming the timeout.
fn forward_to_host(
    registry: &mut Registry,
    shared: &SharedRegistry,
    sender_id: ClientId,
    mut msg: Frame,
    timeout: Duration,
) {
    let request_id = registry.allocate_request_id();
    let timer = spawn_request_timer(shared.clone(), request_id, timeout);
    registry.insert_pending(request_id, PendingRequest::new(sender_id, timer));

    msg.request_id = Some(request_id);
    msg.from_id = Some(sender_id);

    match registry.host() {
        Some(host) => {
            if let Ok(line) = msg.to_line() {
                host.enqueue(&line);
            }
        }
        None => {
            // Unreachable while any client is connected, but the pending
            // entry must not leak if it ever happens.
            registry.remove_pending(request_id);
            send_error(registry, sender_id, NO_HOST);
        }
    }
}

/// Arm the per-request timeout. The callback runs as its own supervisor
/// step; cancelling means aborting the task before it takes the lock.
fn spawn_request_timer(shared: SharedRegistry, request_id: RequestId, timeout: Duration) -> AbortHandle {
    let task = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let mut registry = shared.lock().await;
        if let Some(pending) = registry.remove_pending(request_id) {
            debug!(request_id, requester = pending.requester_id, "host response timed out");
            send_error(&registry, pending.requester_id, TIMEOUT);
        }
    });
    task.abort_handle()
}

fn send_error(registry: &Registry, client_id: ClientId, message: &str) {
    if let Some(client) = registry.client(client_id) {
        if let Ok(line) = Frame::error(message).to_line() {
            client.enqueue(&line);
        }
    }
}
