//! rdpd entry point.
//!
//! ```text
//! rdpd                          Run with rdpd.toml (or defaults)
//! rdpd --config <path>          Load a custom config TOML
//! rdpd --gen-config             Write default config to stdout
//! rdpd --port 3390 --width 1280 --height 720 --rdp4-key rdp.key
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rdpd::config::ServerConfig;
use rdpd::service::RdpService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rdpd", about = "Multi-client remote desktop service")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rdpd.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Address to bind.
    #[arg(long)]
    address: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Use an already-connected socket instead of listening.
    #[arg(long, value_name = "FD")]
    rdp_listener_fd: Option<i32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Monitor refresh rate in Hz.
    #[arg(long)]
    refresh_rate: Option<u32>,

    /// Keep the server mode instead of following client sizes.
    #[arg(long)]
    no_clients_resize: bool,

    #[arg(long)]
    force_no_compression: bool,

    /// Always use the bitmap codec.
    #[arg(long)]
    no_remotefx_codec: bool,

    #[arg(long, value_name = "PATH")]
    rdp_tls_cert: Option<String>,

    #[arg(long, value_name = "PATH")]
    rdp_tls_key: Option<String>,

    /// Key for classic RDP security.
    #[arg(long, value_name = "PATH")]
    rdp4_key: Option<String>,

    #[arg(long)]
    disable_tls: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(&self, cfg: &mut ServerConfig) {
        if let Some(address) = &self.address {
            cfg.network.address = address.clone();
        }
        if let Some(port) = self.port {
            cfg.network.port = port;
        }
        if self.rdp_listener_fd.is_some() {
            cfg.network.listener_fd = self.rdp_listener_fd;
        }
        if let Some(width) = self.width {
            cfg.display.width = width;
        }
        if let Some(height) = self.height {
            cfg.display.height = height;
        }
        if let Some(rate) = self.refresh_rate {
            cfg.display.refresh_rate = rate;
        }
        cfg.display.no_clients_resize |= self.no_clients_resize;
        if self.force_no_compression {
            cfg.codec.compression = false;
        }
        if self.no_remotefx_codec {
            cfg.codec.remotefx = false;
        }
        if let Some(cert) = &self.rdp_tls_cert {
            cfg.security.tls_cert = cert.clone();
        }
        if let Some(key) = &self.rdp_tls_key {
            cfg.security.tls_key = key.clone();
        }
        if let Some(key) = &self.rdp4_key {
            cfg.security.rdp_key = key.clone();
        }
        if self.disable_tls {
            cfg.security.tls = false;
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ServerConfig::load(&cli.config);
    cli.apply(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rdpd v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "output {}x{} @ {} Hz",
        config.display.width, config.display.height, config.display.refresh_rate
    );

    let service = RdpService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
