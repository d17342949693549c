//! Vehicle Information Service
//!
//! A websocket broker between client applications and the signal sources of
//! a vehicle.
//!
//! # Architecture
//!
//! - **Application**: the signal registry, the subscription table and the
//!   permission gate
//! - **Infrastructure**: configuration and permission resolvers
//! - **Presentation**: the JSON websocket protocol
//!
//! Signal sources live in `vis-adapters` and plug in through the
//! `AdapterBinding` port from `vis-ports`.
//!
//! # Example
//!
//! ```ignore
//! use vis_server::{VehicleInformationService, VisConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = VisConfig::builtin().unwrap();
//!     let service = VehicleInformationService::from_config(config).await.unwrap();
//!     service.run().await.unwrap();
//! }
//! ```

pub mod application;
pub mod error;
pub mod infrastructure;
pub mod presentation;

pub use application::{
    AuthSession, Authorization, ConnectionId, Notification, PermissionGate, SetValue,
    SignalEntry, SignalRegistry, SubscriptionId, SubscriptionManager,
};
pub use error::{ServiceError, VisError, classify_message};
pub use infrastructure::{
    ConfigError, HttpPermissionResolver, PermissionConfig, ServerConfig,
    StaticPermissionResolver, VisConfig, resolver_from_config,
};
pub use presentation::websocket::{ProtocolSession, VisRequest, VisResponse, WsState, ws_handler};

use axum::{Router, routing::get};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use vis_adapters::AdapterFactory;
use vis_ports::{AdapterBinding, Clock, PermissionResolver, SystemClock};

/// The broker: registry, subscriptions and permissions behind one endpoint
pub struct VehicleInformationService {
    pub config: VisConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<SignalRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    gate: Arc<PermissionGate>,
    shutdown: CancellationToken,
}

impl VehicleInformationService {
    /// Create a service with no adapters yet
    pub fn new(config: VisConfig, resolver: Arc<dyn PermissionResolver>) -> Self {
        Self::with_clock(config, resolver, Arc::new(SystemClock))
    }

    /// Create with a specific clock (frames carry its timestamps)
    pub fn with_clock(
        config: VisConfig,
        resolver: Arc<dyn PermissionResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let subscriptions = Arc::new(SubscriptionManager::new(Arc::clone(&clock)));
        let registry = Arc::new(SignalRegistry::new(
            Arc::clone(&subscriptions),
            shutdown.clone(),
        ));

        VehicleInformationService {
            config,
            clock,
            registry,
            subscriptions,
            gate: Arc::new(PermissionGate::new(resolver)),
            shutdown,
        }
    }

    /// Build everything a configuration describes using the built-in adapters
    pub async fn from_config(config: VisConfig) -> Result<Self, ServiceError> {
        Self::from_config_with_factory(config, &AdapterFactory::with_builtin()).await
    }

    pub async fn from_config_with_factory(
        config: VisConfig,
        factory: &AdapterFactory,
    ) -> Result<Self, ServiceError> {
        config.validate(factory)?;
        let resolver = resolver_from_config(&config.permissions)
            .map_err(|e| ConfigError::InvalidPermissions(e.to_string()))?;

        let specs = config.adapters.clone();
        let service = Self::new(config, resolver);
        for spec in &specs {
            let adapter = factory.build(spec)?;
            service.register_adapter(adapter).await?;
        }

        tracing::info!(
            service = %service.config.name,
            adapters = specs.len(),
            signals = service.registry.len(),
            "service configured"
        );
        Ok(service)
    }

    pub async fn register_adapter(&self, adapter: Arc<dyn AdapterBinding>) -> Result<(), VisError> {
        self.registry.register_adapter(adapter).await
    }

    pub fn registry(&self) -> &Arc<SignalRegistry> {
        &self.registry
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create WebSocket state
    pub fn ws_state(&self) -> Arc<WsState> {
        Arc::new(WsState {
            registry: Arc::clone(&self.registry),
            subscriptions: Arc::clone(&self.subscriptions),
            gate: Arc::clone(&self.gate),
            clock: Arc::clone(&self.clock),
            outbound_capacity: self.config.server.outbound_capacity,
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.server.path, get(ws_handler))
            .with_state(self.ws_state())
    }

    /// Cancelling this stops the server and every adapter task
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve on an already bound listener until the shutdown token fires
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServiceError> {
        let router = self.router();
        let shutdown = self.shutdown.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        self.registry.shutdown().await;
        Ok(())
    }

    /// Run the server until Ctrl-C
    pub async fn run(self) -> Result<(), ServiceError> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Vehicle Information Service listening on {}", addr);

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
        });

        self.serve(listener).await
    }
}
