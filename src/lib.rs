//! # airsim
//!
//! A wireless medium simulator for kernel-side simulated Wi-Fi radios.
//! The kernel (or a virtual machine) hands every transmitted 802.11 frame
//! to this daemon, which acts as the medium: it models link quality,
//! interference, contention, retries and propagation delay for a
//! user-defined set of virtual stations, then re-injects the frame as a
//! reception at the chosen radios and reports transmit status back.
//!
//! ## Architecture
//!
//! The implementation is organized into several modules:
//! - `ieee80211`: 802.11 header accessors and access-category mapping
//! - `frame`: in-flight frame records and the multi-rate-retry chain
//! - `station`: station records and per-access-category queues
//! - `link`: link model strategies (SNR matrix, error matrix, path loss)
//! - `per`: packet-error-rate table and rate/airtime helpers
//! - `interference`: concurrent-transmission collision accumulator
//! - `scheduler`: deterministic time-driven job scheduler
//! - `medium`: the frame-lifecycle pipeline (queueing and delivery)
//! - `hwsim`: generic-netlink codec for the simulated-radio protocol
//! - `daemon`: transports, client multiplexing and daemon wiring

pub mod frame;
pub mod hwsim;
pub mod ieee80211;
pub mod interference;
pub mod link;
pub mod medium;
pub mod per;
pub mod scheduler;
pub mod station;

// Daemon modules
pub mod daemon;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediumError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Station not found: {0}")]
    StationNotFound(String),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, MediumError>;

// Data-plane constants
/// Thermal noise floor [dBm].
pub const NOISE_LEVEL: i32 = -91;
/// Clear-channel-assessment threshold [dBm]; below this a signal is not heard.
pub const CCA_THRESHOLD: i32 = -90;
/// Link SNR assumed when nothing more specific is configured [dB].
pub const SNR_DEFAULT: i32 = 30;
/// Interference accumulation window [usec].
pub const INTF_WINDOW_USEC: u64 = 10_000;
/// Station movement interval [sec].
pub const MOVE_INTERVAL_SEC: u64 = 3;
/// Number of rate columns in a PER table row.
pub const PER_MATRIX_RATE_LEN: usize = 8;
/// Maximum entries in a multi-rate-retry chain.
pub const IEEE80211_TX_MAX_RATES: usize = 4;

/// Format a MAC address the way log lines expect it.
pub fn mac_fmt(addr: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        addr[0], addr[1], addr[2], addr[3], addr[4], addr[5]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(NOISE_LEVEL, -91);
        assert_eq!(CCA_THRESHOLD, -90);
        assert_eq!(SNR_DEFAULT, 30);
        assert_eq!(INTF_WINDOW_USEC, 10_000);
    }

    #[test]
    fn test_mac_fmt() {
        assert_eq!(
            mac_fmt(&[0x02, 0x00, 0x00, 0xab, 0xcd, 0xef]),
            "02:00:00:ab:cd:ef"
        );
    }
}
