//! Application Startup
//!
//! Application building and server initialization.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;

use crate::application::services::{RoomPolicy, RoomRegistry};
use crate::config::Settings;
use crate::domain::envelope::close_code;
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::{cors, logging};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub rooms: RoomRegistry,
    pub settings: Arc<Settings>,
    shutting_down: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            rooms: RoomRegistry::new(RoomPolicy::from(&settings.collaboration)),
            settings: Arc::new(settings),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Stop accepting joins and close every room with "going away", so
    /// clients reconnect to the next instance.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let closed = self
            .rooms
            .close_all(close_code::GOING_AWAY, "server shutting down")
            .await;
        tracing::info!(rooms = closed, "Closed collaboration rooms for shutdown");
    }
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        health::init_server_start();

        let cors_layer = cors::create_cors_layer(&settings.cors);
        let addr = settings.server_addr();

        // Create app state
        let state = AppState::new(settings);

        // Build router with middleware
        let router = routes::create_router(state.clone())
            .layer(logging::create_trace_layer())
            .layer(cors_layer);

        // Bind to address
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router,
            state,
        })
    }

    /// Run the server until Ctrl-C
    pub async fn run_until_stopped(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the server until `signal` resolves, then close every room and
    /// drain connections.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = self.state.clone();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                signal.await;
                tracing::info!("Shutdown signal received");
                state.shutdown().await;
            })
            .await?;
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }
}
