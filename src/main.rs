//! Medium simulator daemon binary
//!
//! Parses the command line, loads the configuration and PER table,
//! builds the daemon with the requested transports and runs it until a
//! shutdown signal arrives.

use airsim::daemon::{DaemonBuilder, MediumConfig};
use airsim::per::PerTable;
use airsim::{MediumError, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("airsimd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A wireless medium simulator for simulated Wi-Fi radios")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .required(true)
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("per")
                .short('x')
                .long("per-file")
                .value_name("FILE")
                .help("Packet-error-rate table file"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .default_value("6")
                .help(
                    "RFC 5424 severity, 0-7: >=3 errors, >=5 startup, \
                     >=6 dropped frames (default), 7 every frame",
                ),
        )
        .arg(
            Arg::new("time-socket")
                .short('t')
                .long("time-socket")
                .value_name("SOCK")
                .help("External time-control socket"),
        )
        .arg(
            Arg::new("vhost-socket")
                .short('u')
                .long("vhost-socket")
                .value_name("SOCK")
                .help("Expose a vhost-user socket instead of netlink"),
        )
        .arg(
            Arg::new("api-socket")
                .short('a')
                .long("api-socket")
                .value_name("SOCK")
                .help("Expose the API socket"),
        )
        .arg(
            Arg::new("netlink")
                .short('n')
                .long("force-netlink")
                .help("Force netlink use even with vhost-user")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = matches.get_one::<String>("log-level").unwrap();
    if let Err(e) = init_logging(log_level) {
        eprintln!("airsimd: {}", e);
        process::exit(1);
    }

    info!("starting airsimd v{}", env!("CARGO_PKG_VERSION"));

    let config_path = PathBuf::from(matches.get_one::<String>("config").unwrap());
    info!("input configuration file: {}", config_path.display());
    let config = match MediumConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let per_table = match matches.get_one::<String>("per") {
        Some(path) => {
            info!("input packet error rate file: {}", path);
            match PerTable::from_file(&PathBuf::from(path)) {
                Ok(table) => table,
                Err(e) => {
                    error!("{}", e);
                    process::exit(1);
                }
            }
        }
        None => PerTable::default_table(),
    };

    let mut daemon = match DaemonBuilder::new()
        .with_config(config)
        .with_per_table(per_table)
        .with_api_socket(matches.get_one::<String>("api-socket").map(PathBuf::from))
        .with_vhost_socket(matches.get_one::<String>("vhost-socket").map(PathBuf::from))
        .with_time_socket(matches.get_one::<String>("time-socket").map(PathBuf::from))
        .force_netlink(matches.get_flag("netlink"))
        .build()
        .await
    {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let shutdown = setup_signal_handlers();

    tokio::select! {
        result = daemon.run() => {
            if let Err(e) = result {
                error!("daemon error: {}", e);
                process::exit(1);
            }
        }
        _ = shutdown => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

/// Map the numeric severity onto a tracing filter.
fn severity_filter(level: u8) -> &'static str {
    match level {
        0..=3 => "error",
        4 => "warn",
        5 => "info",
        6 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system.
fn init_logging(level: &str) -> Result<()> {
    let level: u8 = level
        .parse()
        .map_err(|_| MediumError::Config(format!("invalid severity level: {}", level)))?;
    if level > 7 {
        return Err(MediumError::Config(format!(
            "invalid severity level: {} (expected 0-7)",
            level
        )));
    }

    let filter = EnvFilter::new(severity_filter(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Resolve to a future that completes on SIGTERM or SIGINT.
fn setup_signal_handlers() -> tokio::sync::oneshot::Receiver<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        let _ = tx.send(());
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_filter_mapping() {
        assert_eq!(severity_filter(3), "error");
        assert_eq!(severity_filter(5), "info");
        assert_eq!(severity_filter(6), "debug");
        assert_eq!(severity_filter(7), "trace");
    }
}
