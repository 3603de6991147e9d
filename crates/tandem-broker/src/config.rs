use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tandem_protocol::{DEFAULT_PORT, MAX_FRAME_BYTES, OUTBOX_CAPACITY, REQUEST_TIMEOUT};

/// Broker tunables. The CLI only exposes the listen port; everything else
/// keeps the protocol defaults (tests shrink them).
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub listen: SocketAddr,
    /// Hard cap on an inbound frame, terminator included. Fatal on breach.
    pub max_frame_bytes: usize,
    /// Depth of each client's outbound queue. Overflow drops frames.
    pub outbox_capacity: usize,
    /// How long the host gets to answer a forwarded request.
    pub request_timeout: Duration,
}

impl BrokerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_frame_bytes: MAX_FRAME_BYTES,
            outbox_capacity: OUTBOX_CAPACITY,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}
