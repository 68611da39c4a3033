//! Backend context: configuration, listener, output and peers.
//!
//! A [`Backend`] is an explicit value, not a process global. Tests can
//! run several side by side; each one logs inside its own
//! `rdp_backend{instance=N}` span.
//!
//! Log targets:
//! - `rdp`: debug-level lifecycle messages;
//! - `rdp::verbose`: per-input-event and per-frame traces.

use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use tracing::Span;

use crate::codec::{CompressionPolicy, DEFAULT_COMPRESSION_LEVEL};
use crate::compositor::Compositor;
use crate::dispatcher::{DEFAULT_MAX_PEERS, Dispatcher, PeerSettings, Reactor};
use crate::error::RdpError;
use crate::input::DEFAULT_AXIS_STEP_DISTANCE;
use crate::output::Output;
use crate::peer::{NegotiationPolicy, PeerId};
use crate::protocol::Protocol;
use crate::timer::{DEFAULT_REFRESH_RATE, MAX_REFRESH_RATE, MIN_REFRESH_RATE};
use crate::types::Rect;

/// Standard RDP port.
pub const DEFAULT_PORT: u16 = 3389;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

// ── Configuration ────────────────────────────────────────────────

/// Where connections come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenSource {
    /// Bind and listen on an address.
    Bind(SocketAddr),
    /// A single already-connected socket handed over at startup.
    External(RawFd),
}

impl Default for ListenSource {
    fn default() -> Self {
        Self::Bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)))
    }
}

/// Key material handed to the protocol layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityConfig {
    pub tls_enabled: bool,
    pub server_cert: Option<PathBuf>,
    pub server_key: Option<PathBuf>,
    /// Fallback key for classic RDP security.
    pub rdp_key: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub listen: ListenSource,
    pub security: SecurityConfig,
    /// Impose the server mode instead of following client sizes.
    pub no_clients_resize: bool,
    pub force_no_compression: bool,
    pub compression_level: i32,
    /// Offer the tile codec; otherwise every peer uses bitmaps.
    pub tile_codec: bool,
    /// Monitor refresh rate in Hz.
    pub refresh_rate: u32,
    pub axis_step_distance: i32,
    pub max_peers: usize,
    pub width: u32,
    pub height: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            listen: ListenSource::default(),
            security: SecurityConfig::default(),
            no_clients_resize: false,
            force_no_compression: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            tile_codec: true,
            refresh_rate: DEFAULT_REFRESH_RATE,
            axis_step_distance: DEFAULT_AXIS_STEP_DISTANCE,
            max_peers: DEFAULT_MAX_PEERS,
            width: 640,
            height: 480,
        }
    }
}

impl BackendConfig {
    /// Reject configurations the backend cannot start with.
    pub fn validate(&self) -> Result<(), RdpError> {
        let sec = &self.security;
        let tls_ready = sec.tls_enabled && sec.server_cert.is_some() && sec.server_key.is_some();
        if !tls_ready && sec.rdp_key.is_none() {
            return Err(RdpError::Config(
                "need either an RDP key or a TLS certificate and key".into(),
            ));
        }
        if !(MIN_REFRESH_RATE..=MAX_REFRESH_RATE).contains(&self.refresh_rate) {
            return Err(RdpError::Config(format!(
                "refresh rate {} outside {MIN_REFRESH_RATE}..={MAX_REFRESH_RATE}",
                self.refresh_rate
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(RdpError::Config("output mode must be non-empty".into()));
        }
        if self.max_peers == 0 {
            return Err(RdpError::Config("max_peers must be at least 1".into()));
        }
        if self.axis_step_distance <= 0 {
            return Err(RdpError::Config("axis step distance must be positive".into()));
        }
        Ok(())
    }

    pub fn peer_settings(&self) -> PeerSettings {
        PeerSettings {
            negotiation: NegotiationPolicy {
                tile_codec: self.tile_codec,
                allow_client_resize: !self.no_clients_resize,
            },
            compression: CompressionPolicy {
                enabled: !self.force_no_compression,
                level: self.compression_level,
            },
            axis_step_distance: self.axis_step_distance,
        }
    }
}

// ── Backend ──────────────────────────────────────────────────────

pub struct Backend<P: Protocol> {
    config: BackendConfig,
    protocol: P,
    dispatcher: Dispatcher<P>,
    span: Span,
    started: bool,
}

impl<P: Protocol> Backend<P> {
    /// Validate `config` and build an idle backend.
    pub fn new(config: BackendConfig, protocol: P, reactor: Box<dyn Reactor>) -> Result<Self, RdpError> {
        config.validate()?;
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let span = tracing::debug_span!(target: "rdp", "rdp_backend", instance);
        let output = Output::new(config.width, config.height, config.refresh_rate);
        let dispatcher = Dispatcher::new(output, reactor, config.max_peers, config.peer_settings());
        Ok(Self {
            config,
            protocol,
            dispatcher,
            span,
            started: false,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher<P> {
        &self.dispatcher
    }

    pub fn output(&self) -> &Output<P::Connection> {
        self.dispatcher.output()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Open the configured listen source.
    pub fn start(&mut self) -> Result<(), RdpError> {
        let _enter = self.span.enter();
        if self.started {
            return Err(RdpError::ListenerFatal("backend already started".into()));
        }
        match self.config.listen {
            ListenSource::Bind(addr) => {
                let listener = self
                    .protocol
                    .listen(addr)
                    .map_err(|e| RdpError::ListenerFatal(format!("cannot listen on {addr}: {e}")))?;
                self.dispatcher.set_listener(listener)?;
                tracing::info!(%addr, "listening");
            }
            ListenSource::External(fd) => {
                if fd < 0 {
                    return Err(RdpError::ListenerFatal(format!("invalid external descriptor {fd}")));
                }
                // SAFETY: the descriptor was handed to this process for
                // exclusive use and is adopted exactly once, here.
                let owned = unsafe { OwnedFd::from_raw_fd(fd) };
                let connection = self
                    .protocol
                    .adopt(owned)
                    .map_err(|e| RdpError::ListenerFatal(format!("cannot adopt descriptor {fd}: {e}")))?;
                let id = self
                    .dispatcher
                    .add_connection(connection)
                    .map_err(|e| RdpError::ListenerFatal(e.to_string()))?;
                tracing::info!(fd, peer = %id, "adopted external connection");
            }
        }
        self.started = true;
        Ok(())
    }

    pub fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Vec<RawFd>> {
        self.dispatcher.poll_ready(cx)
    }

    pub fn dispatch(&mut self, fd: RawFd, compositor: &mut dyn Compositor) {
        let _enter = self.span.enter();
        self.dispatcher.dispatch(fd, compositor);
    }

    /// Queue compositor damage and repaint if the frame timer allows.
    pub fn damage(&mut self, rects: &[Rect], compositor: &mut dyn Compositor) {
        let _enter = self.span.enter();
        self.dispatcher.damage(rects);
        self.dispatcher.repaint(compositor, Instant::now());
    }

    /// Deadline of the armed frame timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.dispatcher.output().timer().deadline()
    }

    pub fn finish_frame(&mut self, compositor: &mut dyn Compositor, now: Instant) {
        let _enter = self.span.enter();
        self.dispatcher.on_timer(compositor, now);
    }

    /// Close a single peer.
    pub fn disconnect(&mut self, id: PeerId, compositor: &mut dyn Compositor) {
        let _enter = self.span.enter();
        self.dispatcher.teardown(id, compositor);
    }

    /// Release every peer, then the listener.
    pub fn shutdown(&mut self, compositor: &mut dyn Compositor) {
        let _enter = self.span.enter();
        self.dispatcher.shutdown(compositor);
        self.started = false;
        tracing::info!("backend stopped");
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> BackendConfig {
        BackendConfig {
            security: SecurityConfig {
                rdp_key: Some("rdp.key".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn default_listen_source() {
        assert_eq!(
            ListenSource::default(),
            ListenSource::Bind("0.0.0.0:3389".parse().unwrap())
        );
    }

    #[test]
    fn validate_requires_key_material() {
        assert!(matches!(
            BackendConfig::default().validate(),
            Err(RdpError::Config(_))
        ));
        keyed().validate().unwrap();

        let tls = BackendConfig {
            security: SecurityConfig {
                tls_enabled: true,
                server_cert: Some("cert.pem".into()),
                server_key: Some("key.pem".into()),
                rdp_key: None,
            },
            ..Default::default()
        };
        tls.validate().unwrap();

        let half_tls = BackendConfig {
            security: SecurityConfig {
                tls_enabled: true,
                server_cert: Some("cert.pem".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(half_tls.validate().is_err());
    }

    #[test]
    fn validate_refresh_rate_range() {
        let mut cfg = keyed();
        cfg.refresh_rate = 0;
        assert!(cfg.validate().is_err());
        cfg.refresh_rate = 241;
        assert!(cfg.validate().is_err());
        cfg.refresh_rate = 240;
        cfg.validate().unwrap();
    }

    #[test]
    fn peer_settings_follow_policy() {
        let mut cfg = keyed();
        cfg.tile_codec = false;
        cfg.no_clients_resize = true;
        cfg.force_no_compression = true;
        let settings = cfg.peer_settings();
        assert!(!settings.negotiation.tile_codec);
        assert!(!settings.negotiation.allow_client_resize);
        assert!(!settings.compression.enabled);
    }
}
