//! Link model strategies
//!
//! Every directional link (src → dst) has a signal-to-noise ratio and a
//! per-frame error probability. Where those numbers come from depends on
//! the configuration: an explicit SNR matrix (possibly seeded from a
//! path-loss model over station positions), or an explicit
//! error-probability matrix that bypasses the PER table entirely.

use crate::per::PerTable;
use crate::{NOISE_LEVEL, SNR_DEFAULT};
use serde::{Deserialize, Serialize};

/// Channel-1 center frequency used by the free-space term [Hz].
const FREQ_1CH: f64 = 2.412e9;
/// Speed of light in a vacuum [meter/sec].
const SPEED_LIGHT: f64 = 2.997_924_58e8;

/// Log-distance path-loss model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogDistanceModel {
    /// Path-loss exponent γ.
    pub path_loss_exponent: f64,
    /// Constant shadowing term Xg [dB].
    pub xg: f64,
}

impl LogDistanceModel {
    /// Path loss in dB between two positions.
    ///
    /// Free-space loss at 1 m plus the log-distance term:
    /// `PL0 + 10·γ·log10(d) + Xg`.
    pub fn path_loss(&self, src: (f64, f64), dst: (f64, f64)) -> i32 {
        let d = ((src.0 - dst.0).powi(2) + (src.1 - dst.1).powi(2)).sqrt();
        let pl0 = 20.0 * (4.0 * std::f64::consts::PI * FREQ_1CH / SPEED_LIGHT).log10();
        let pl = pl0 + 10.0 * self.path_loss_exponent * d.log10() + self.xg;
        pl as i32
    }
}

/// SNR-matrix link model: per-link integer dB, PER-table error decisions.
#[derive(Debug, Clone)]
pub struct SnrLinkModel {
    num_stas: usize,
    snr_matrix: Vec<i32>,
    /// Present when the matrix is derived from positions; movement
    /// recomputes the matrix through it.
    pub path_loss: Option<LogDistanceModel>,
    per: PerTable,
}

impl SnrLinkModel {
    pub fn new(num_stas: usize, per: PerTable) -> Self {
        Self {
            num_stas,
            snr_matrix: vec![SNR_DEFAULT; num_stas * num_stas],
            path_loss: None,
            per,
        }
    }

    pub fn snr(&self, src: usize, dst: usize) -> i32 {
        self.snr_matrix[src * self.num_stas + dst]
    }

    /// Set one directional link; configuration uses [`set_link`] for the
    /// symmetric pair.
    pub fn set_snr(&mut self, src: usize, dst: usize, snr: i32) {
        self.snr_matrix[src * self.num_stas + dst] = snr;
    }

    /// Symmetric link entry, the shape `links` config rows come in.
    pub fn set_link(&mut self, a: usize, b: usize, snr: i32) {
        self.set_snr(a, b, snr);
        self.set_snr(b, a, snr);
    }

    /// Rebuild the whole matrix from station positions and tx powers.
    /// `positions[i]`/`tx_powers[i]` are indexed like the matrix.
    pub fn recompute_from_positions(&mut self, positions: &[(f64, f64)], tx_powers: &[i32]) {
        let model = match self.path_loss {
            Some(model) => model,
            None => return,
        };
        for src in 0..self.num_stas {
            for dst in 0..self.num_stas {
                if src == dst {
                    continue;
                }
                let pl = model.path_loss(positions[src], positions[dst]);
                self.snr_matrix[src * self.num_stas + dst] =
                    tx_powers[src] - pl - NOISE_LEVEL;
            }
        }
    }
}

/// Error-probability-matrix link model: per-link loss probability that is
/// independent of rate and length. SNR reads fall back to the default so
/// reported signal levels stay sensible.
#[derive(Debug, Clone)]
pub struct ErrorProbLinkModel {
    num_stas: usize,
    error_prob_matrix: Vec<f64>,
}

impl ErrorProbLinkModel {
    pub fn new(num_stas: usize) -> Self {
        Self {
            num_stas,
            error_prob_matrix: vec![0.0; num_stas * num_stas],
        }
    }

    /// Symmetric entry, the shape `error_probs` config rows come in.
    pub fn set_link(&mut self, a: usize, b: usize, prob: f64) {
        self.error_prob_matrix[a * self.num_stas + b] = prob;
        self.error_prob_matrix[b * self.num_stas + a] = prob;
    }

    pub fn error_prob(&self, src: usize, dst: usize) -> f64 {
        self.error_prob_matrix[src * self.num_stas + dst]
    }
}

/// The link model a medium runs with, chosen once at load time.
#[derive(Debug, Clone)]
pub enum LinkModel {
    /// SNR per link (default-filled, configured, or path-loss derived).
    Snr(SnrLinkModel),
    /// Explicit error probabilities per link.
    ErrorProb(ErrorProbLinkModel),
}

impl LinkModel {
    /// Link SNR in dB for a directional pair.
    pub fn snr(&self, src: usize, dst: usize) -> i32 {
        match self {
            LinkModel::Snr(model) => model.snr(src, dst),
            // The matrix mode keeps signal reporting at the default.
            LinkModel::ErrorProb(_) => SNR_DEFAULT,
        }
    }

    /// Received signal in dBm for a directional pair.
    pub fn signal(&self, src: usize, dst: usize) -> i32 {
        self.snr(src, dst) + NOISE_LEVEL
    }

    /// Per-attempt error probability.
    ///
    /// `dst` is `None` for group-addressed frames; in matrix mode the
    /// value is unused by the caller and reads as zero.
    pub fn error_prob(
        &self,
        snr: f64,
        rate_idx: usize,
        _freq: u32,
        len: usize,
        src: usize,
        dst: Option<usize>,
    ) -> f64 {
        match self {
            LinkModel::Snr(model) => model.per.error_prob(snr, rate_idx, len),
            LinkModel::ErrorProb(model) => match dst {
                Some(dst) => model.error_prob(src, dst),
                None => 0.0,
            },
        }
    }

    /// Whether the per-frame random draw is made once and reused across
    /// all retry attempts (explicit error-probability mode).
    pub fn fixed_random(&self) -> bool {
        matches!(self, LinkModel::ErrorProb(_))
    }
}
