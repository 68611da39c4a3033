//! Configuration for the rdpd service.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use rdpd_core::backend::{DEFAULT_PORT, ListenSource};
use rdpd_core::codec::DEFAULT_COMPRESSION_LEVEL;
use rdpd_core::dispatcher::DEFAULT_MAX_PEERS;
use rdpd_core::input::DEFAULT_AXIS_STEP_DISTANCE;
use rdpd_core::timer::{DEFAULT_REFRESH_RATE, MAX_REFRESH_RATE, MIN_REFRESH_RATE};
use rdpd_core::{BackendConfig, RdpError, SecurityConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub security: SecuritySection,
    pub display: DisplayConfig,
    pub codec: CodecConfig,
    pub input: InputConfig,
    pub logging: LoggingConfig,
}

/// Where clients connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind.
    pub address: String,
    pub port: u16,
    /// Already-connected socket inherited from a launcher. Takes
    /// precedence over `address`/`port`.
    pub listener_fd: Option<i32>,
    /// Maximum concurrent clients.
    pub max_peers: usize,
}

/// Key material. Empty paths mean "not configured".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub tls: bool,
    pub tls_cert: String,
    pub tls_key: String,
    /// Key used for classic RDP security when TLS is unavailable.
    pub rdp_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Monitor refresh rate in Hz.
    pub refresh_rate: u32,
    /// Keep the server mode instead of following client sizes.
    pub no_clients_resize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Offer the tile (RemoteFX-style) codec.
    pub remotefx: bool,
    pub compression: bool,
    /// zstd level.
    pub compression_level: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Scroll units per discrete wheel notch.
    pub axis_step_distance: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. `info,rdp=debug`.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            listener_fd: None,
            max_peers: DEFAULT_MAX_PEERS,
        }
    }
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            tls: true,
            tls_cert: String::new(),
            tls_key: String::new(),
            rdp_key: String::new(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            refresh_rate: DEFAULT_REFRESH_RATE,
            no_clients_resize: false,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            remotefx: true,
            compression: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            axis_step_distance: DEFAULT_AXIS_STEP_DISTANCE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

fn non_empty(path: &str) -> Option<PathBuf> {
    (!path.is_empty()).then(|| PathBuf::from(path))
}

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Where the backend gets its connections from.
    pub fn listen_source(&self) -> Result<ListenSource, RdpError> {
        if let Some(fd) = self.network.listener_fd {
            return Ok(ListenSource::External(fd));
        }
        let ip: IpAddr = self
            .network
            .address
            .parse()
            .map_err(|e| RdpError::Config(format!("bad address {:?}: {e}", self.network.address)))?;
        Ok(ListenSource::Bind(SocketAddr::new(ip, self.network.port)))
    }

    /// Convert into the core backend configuration.
    ///
    /// The refresh rate is clamped into the supported range; the rest
    /// is checked when the backend is built.
    pub fn to_backend_config(&self) -> Result<BackendConfig, RdpError> {
        Ok(BackendConfig {
            listen: self.listen_source()?,
            security: SecurityConfig {
                tls_enabled: self.security.tls,
                server_cert: non_empty(&self.security.tls_cert),
                server_key: non_empty(&self.security.tls_key),
                rdp_key: non_empty(&self.security.rdp_key),
            },
            no_clients_resize: self.display.no_clients_resize,
            force_no_compression: !self.codec.compression,
            compression_level: self.codec.compression_level,
            tile_codec: self.codec.remotefx,
            refresh_rate: self.display.refresh_rate.clamp(MIN_REFRESH_RATE, MAX_REFRESH_RATE),
            axis_step_distance: self.input.axis_step_distance,
            max_peers: self.network.max_peers,
            width: self.display.width,
            height: self.display.height,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
