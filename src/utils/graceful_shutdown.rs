use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use eyre::Result;
use tokio::{signal, sync::broadcast};

/// Represents different shutdown reasons
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// Graceful shutdown requested (SIGTERM, SIGINT)
    Graceful,
    /// Shutdown channel closed unexpectedly
    Force,
}

/// Manages graceful shutdown of the listener
pub struct GracefulShutdown {
    /// Broadcast sender for shutdown signals
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    /// Flag indicating if shutdown has been initiated
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    /// Create a new GracefulShutdown manager
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a receiver for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Manually trigger shutdown (useful for tests and embedding)
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> Result<()> {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("Shutdown manually triggered: {:?}", reason);
            let _ = self.shutdown_tx.send(reason);
        }
        Ok(())
    }

    /// Start listening for OS signals and broadcast the shutdown
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                self.initiate_shutdown(ShutdownReason::Graceful);
            }
            _ = self.wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                self.initiate_shutdown(ShutdownReason::Graceful);
            }
        }

        tracing::info!("Signal handler shutting down");
        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_sigterm(&self) {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!("Failed to register SIGTERM handler: {e}");
                return std::future::pending().await;
            }
        };
        sigterm.recv().await;
    }

    #[cfg(not(unix))]
    async fn wait_for_sigterm(&self) {
        // On non-Unix systems, we only have Ctrl+C
        std::future::pending::<()>().await;
    }

    fn initiate_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("Processing shutdown signal: {:?}", reason);
            if let Err(e) = self.shutdown_tx.send(reason) {
                tracing::error!("Failed to send shutdown signal: {}", e);
            }
        } else {
            tracing::warn!("Shutdown already initiated, ignoring signal");
        }
    }

    /// Wait indefinitely for a shutdown signal (used in the main serve loop)
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.subscribe();

        match receiver.recv().await {
            Ok(reason) => {
                tracing::info!("Shutdown signal received: {:?}", reason);
                reason
            }
            Err(_) => {
                tracing::warn!("Shutdown channel closed unexpectedly");
                ShutdownReason::Force
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}
