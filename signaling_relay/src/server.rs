//! Signaling server listener
//!
//! Binds the listener and serves the HTTP router until shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::SignalingError;
use crate::handler;
use crate::lifecycle::ConnectionContext;
use crate::peer::CloseReason;
use crate::registry::Registry;

/// WebSocket signaling server
pub struct SignalingServer {
    ctx: ConnectionContext,
}

impl SignalingServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(Registry::with_policy(config.role_policy));
        Self {
            ctx: ConnectionContext::new(Arc::new(config), registry),
        }
    }

    /// Get a reference to the connection registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.ctx.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// Bind and run until the process is stopped
    pub async fn run(&self) -> Result<(), SignalingError> {
        self.run_until(std::future::pending()).await
    }

    /// Bind and run until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), SignalingError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.ctx.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve an already bound listener until `shutdown` completes
    ///
    /// On shutdown every registered connection is closed before the server
    /// stops accepting.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), SignalingError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            addr = %listener.local_addr()?,
            policy = %self.ctx.config.role_policy,
            "Signaling server listening"
        );

        let registry = Arc::clone(&self.ctx.registry);
        let app = handler::router(self.ctx.clone());

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
            registry.close_all(CloseReason::Shutdown).await;
        })
        .await?;

        Ok(())
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.ctx.config.bind_addr
    }
}
