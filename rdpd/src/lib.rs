//! # rdpd: remote desktop service
//!
//! Serves one composited output to many clients at once. The binary
//! wraps `rdpd-core` with:
//!
//! - **Config**: TOML file with CLI overrides (`config`)
//! - **Compositor**: headless renderer, seat state and damage
//!   generator (`compositor`)
//! - **Service**: runs the backend event loop until stopped (`service`)

pub mod compositor;
pub mod config;
pub mod service;
