use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::BrokerConfig;
use crate::connection;
use crate::registry::{Registry, SharedRegistry};

/// The broker: one listener, one registry, many connection task pairs.
pub struct Broker {
    listener: TcpListener,
    registry: SharedRegistry,
    config: Arc<BrokerConfig>,
    shutdown: CancellationToken,
}

impl Broker {
    pub async fn bind(config: BrokerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self {
            listener,
            registry: Arc::new(Mutex::new(Registry::new())),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the shared registry, useful for monitoring and tests.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until the shutdown token fires. A slow client
    /// never blocks this loop; it is isolated behind its bounded outbox.
    pub async fn serve(self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let registry = self.registry.clone();
                            let config = self.config.clone();
                            tokio::spawn(async move {
                                connection::handle_client(stream, registry, config).await;
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("broker stopped");
                    break;
                }
            }
        }
        Ok(())
    }
}
