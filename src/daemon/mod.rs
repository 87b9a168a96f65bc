//! Daemon wiring
//!
//! Transports, client multiplexing and the builder that assembles a
//! running daemon from a validated configuration.

pub mod api;
pub mod client;
pub mod config;
pub mod core;
pub mod netlink;
pub mod vhost;

pub use client::{Client, ClientId, ClientKind, ClientRegistry};
pub use config::MediumConfig;
pub use core::{DaemonEvent, MediumDaemon, SocketTimeController, TimeController};

use crate::per::PerTable;
use crate::{MediumError, Result};
use std::path::PathBuf;
use tokio::net::UnixListener;

/// Assembles a [`MediumDaemon`] and starts its transports.
#[derive(Default)]
pub struct DaemonBuilder {
    config: Option<MediumConfig>,
    per_table: Option<PerTable>,
    api_socket: Option<PathBuf>,
    vhost_socket: Option<PathBuf>,
    time_socket: Option<PathBuf>,
    force_netlink: bool,
    enable_netlink: bool,
    seed: Option<u64>,
}

impl DaemonBuilder {
    pub fn new() -> Self {
        Self {
            enable_netlink: true,
            ..Self::default()
        }
    }

    pub fn with_config(mut self, config: MediumConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_per_table(mut self, per_table: PerTable) -> Self {
        self.per_table = Some(per_table);
        self
    }

    pub fn with_api_socket(mut self, path: Option<PathBuf>) -> Self {
        self.api_socket = path;
        self
    }

    pub fn with_vhost_socket(mut self, path: Option<PathBuf>) -> Self {
        self.vhost_socket = path;
        self
    }

    pub fn with_time_socket(mut self, path: Option<PathBuf>) -> Self {
        self.time_socket = path;
        self
    }

    /// Keep the kernel transport even when a vhost-user socket exists.
    pub fn force_netlink(mut self, force: bool) -> Self {
        self.force_netlink = force;
        self
    }

    /// Disable the kernel transport entirely (embedding and tests).
    pub fn enable_netlink(mut self, enable: bool) -> Self {
        self.enable_netlink = enable;
        self
    }

    /// Pin the medium's random stream (tests).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the daemon and spawn its transport tasks.
    pub async fn build(self) -> Result<MediumDaemon> {
        let config = self
            .config
            .ok_or_else(|| MediumError::Config("configuration required".to_string()))?;
        let per_table = self.per_table.unwrap_or_default();
        let medium = config.build_medium(per_table, self.seed)?;

        let time_ctrl: Option<Box<dyn TimeController>> = match &self.time_socket {
            Some(path) => Some(Box::new(SocketTimeController::connect(path).await?)),
            None => None,
        };

        let mut daemon = MediumDaemon::new(medium, time_ctrl);

        if let Some(path) = &self.vhost_socket {
            let listener = UnixListener::bind(path)?;
            tracing::info!("vhost-user socket at {}", path.display());
            tokio::spawn(vhost::run_vhost_server(listener, daemon.events_handle()));
        }

        if let Some(path) = &self.api_socket {
            let listener = UnixListener::bind(path)?;
            tracing::info!("api socket at {}", path.display());
            tokio::spawn(api::run_api_server(listener, daemon.events_handle()));
        }

        // The kernel transport is the default; a vhost-user socket
        // replaces it unless netlink is forced.
        let use_netlink =
            self.enable_netlink && (self.force_netlink || self.vhost_socket.is_none());
        if use_netlink {
            let (_client, family_id) = netlink::start(daemon.events_handle())?;
            daemon.set_family_id(family_id);
        }

        Ok(daemon)
    }
}
