//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: backend → bridge → gRPC listener
//! - Shutdown order: listener first, then the in-process components are dropped

use crate::adapters::etcd::{KvBridge, KvServer};
use crate::backend::MemoryBackend;
use crate::core::config::Config;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
#[cfg(feature = "grpc")]
use tokio::task::JoinHandle;

/// kvbridge runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Backend shared with the bridge.
    backend: Arc<MemoryBackend>,

    /// KV service handed to listeners.
    bridge: Arc<dyn KvServer>,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,

    /// gRPC server task handle.
    #[cfg(feature = "grpc")]
    grpc_handle: Option<JoinHandle<Result<()>>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backend = Arc::new(
            MemoryBackend::new().with_identity(config.cluster.cluster_id, config.cluster.member_id),
        );
        let span = tracing::info_span!("kv_bridge", member_id = config.cluster.member_id);
        let bridge: Arc<dyn KvServer> = Arc::new(KvBridge::with_span(backend.clone(), span));

        tracing::debug!(
            mode = %config.backend.mode,
            cluster_id = config.cluster.cluster_id,
            member_id = config.cluster.member_id,
            "backend initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            backend,
            bridge,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            #[cfg(feature = "grpc")]
            grpc_handle: None,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the backend.
    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    /// Get the KV service.
    pub fn bridge(&self) -> Arc<dyn KvServer> {
        self.bridge.clone()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Start the network listener.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(bind = %self.config.listener.bind, "starting kvbridge runtime");

        self.start_listener()?;

        self.running.store(true, Ordering::Release);
        tracing::info!("kvbridge runtime started");
        Ok(())
    }

    #[cfg(feature = "grpc")]
    fn start_listener(&mut self) -> Result<()> {
        use crate::adapters::etcd::EtcdGrpcServer;

        let bind_addr = self.config.bind_addr()?;
        let server = EtcdGrpcServer::new(bind_addr, self.bridge.clone(), self.shutdown_rx.clone())
            .with_max_message_size(self.config.listener.max_message_size);

        let handle = tokio::spawn(async move { server.run().await });
        self.grpc_handle = Some(handle);
        tracing::info!(bind = %bind_addr, "gRPC listener started");
        Ok(())
    }

    #[cfg(not(feature = "grpc"))]
    fn start_listener(&mut self) -> Result<()> {
        tracing::warn!("built without the grpc feature; no listener started");
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for shutdown signal.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run the runtime until ctrl-c, a shutdown request or listener failure.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        #[cfg(feature = "grpc")]
        let server_failed = match self.grpc_handle.take() {
            Some(mut handle) => {
                let finished = tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::warn!("shutdown signal received (SIGINT)");
                        None
                    }
                    _ = self.wait_for_shutdown() => {
                        tracing::info!("shutdown requested by component");
                        None
                    }
                    result = &mut handle => Some(result),
                };
                match finished {
                    None => {
                        // Still serving; stop() drains it.
                        self.grpc_handle = Some(handle);
                        None
                    }
                    Some(Ok(Ok(()))) => {
                        tracing::info!("gRPC server stopped normally");
                        None
                    }
                    Some(Ok(Err(e))) => {
                        tracing::error!(error = %e, "gRPC server failed");
                        Some(e)
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "gRPC server task panicked");
                        Some(anyhow::anyhow!("gRPC server task panicked: {}", e))
                    }
                }
            }
            None => None,
        };

        #[cfg(not(feature = "grpc"))]
        let server_failed: Option<anyhow::Error> = {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("shutdown signal received (SIGINT)");
                }
                _ = self.wait_for_shutdown() => {
                    tracing::info!("shutdown requested by component");
                }
            }
            None
        };

        self.stop().await?;
        match server_failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop all runtime components.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping kvbridge runtime");
        self.running.store(false, Ordering::Release);

        // Signal shutdown to all components
        let _ = self.shutdown_tx.send(true);

        #[cfg(feature = "grpc")]
        if let Some(handle) = self.grpc_handle.take() {
            match tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
                Ok(Ok(Ok(()))) => {
                    tracing::info!("gRPC server stopped");
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!(error = %e, "gRPC server stopped with error");
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "gRPC server task panicked");
                }
                Err(_) => {
                    tracing::warn!("gRPC server stop timed out");
                }
            }
        }

        tracing::info!(
            revision = self.backend.current_revision(),
            keys = self.backend.len(),
            "kvbridge runtime stopped"
        );
        Ok(())
    }
}
