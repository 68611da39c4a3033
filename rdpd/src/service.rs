//! Service runner.
//!
//! Wires the configured backend, the headless compositor and its damage
//! generator into one event loop, and runs it until stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::info;

use rdpd_core::{Backend, EventLoop, RdpError, TcpProtocol, TokioReactor, damage_channel};

use crate::compositor::{DamageGenerator, HeadlessCompositor, SharedMode};
use crate::config::ServerConfig;

// ── RdpService ───────────────────────────────────────────────────

/// The top-level service: one backend, one output, many clients.
pub struct RdpService {
    config: ServerConfig,
    running: Arc<AtomicBool>,
}

impl RdpService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task or a signal handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until the stop handle is cleared.
    ///
    /// Must be awaited on a current-thread runtime: the backend and
    /// compositor stay on this task. Only startup errors are returned.
    pub async fn run(&self) -> Result<(), RdpError> {
        let backend_config = self.config.to_backend_config()?;
        let mode = SharedMode::new(backend_config.width, backend_config.height);
        let refresh_rate = backend_config.refresh_rate;

        let mut backend = Backend::new(backend_config, TcpProtocol, Box::new(TokioReactor))?;
        backend.start()?;
        if let Some(listener) = backend.dispatcher().listener() {
            match listener.local_addr() {
                Ok(addr) => info!("rdpd listening on {addr}"),
                Err(e) => tracing::warn!("cannot read listener address: {e}"),
            }
        }
        self.running.store(true, Ordering::SeqCst);

        let (damage_tx, damage_rx) = damage_channel();
        let generator = tokio::spawn(DamageGenerator::new(mode.clone(), refresh_rate).run(damage_tx));

        let compositor = HeadlessCompositor::new(mode);
        let result = EventLoop::new(backend, compositor, damage_rx)
            .run(Self::wait_for_stop(Arc::clone(&self.running)))
            .await;

        generator.abort();
        self.running.store(false, Ordering::SeqCst);

        let (_, compositor) = result?;
        info!(frames = compositor.frames(), "rdpd stopped");
        Ok(())
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Internal ─────────────────────────────────────────────────

    /// Resolves when `running` becomes false.
    async fn wait_for_stop(running: Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> ServerConfig {
        let mut cfg = ServerConfig::default();
        cfg.network.address = "127.0.0.1".into();
        cfg.network.port = 0;
        cfg.security.rdp_key = "rdp.key".into();
        cfg
    }

    #[test]
    fn service_creates_with_defaults() {
        let svc = RdpService::new(ServerConfig::default());
        assert!(!svc.is_running());
    }

    #[tokio::test]
    async fn missing_key_material_fails_startup() {
        let svc = RdpService::new(ServerConfig::default());
        assert!(matches!(svc.run().await, Err(RdpError::Config(_))));
        assert!(!svc.is_running());
    }

    #[tokio::test]
    async fn runs_until_stopped() {
        let svc = RdpService::new(loopback_config());
        let handle = svc.stop_handle();
        let stopper = async {
            while !handle.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.store(false, Ordering::SeqCst);
        };

        let (result, ()) = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(svc.run(), stopper)
        })
        .await
        .unwrap();
        result.unwrap();
        assert!(!svc.is_running());
    }
}
