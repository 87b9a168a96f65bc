//! Packet-error-rate table and rate/airtime helpers
//!
//! The medium decides per-attempt success by looking a (signal, rate)
//! pair up in a PER table: one row per integer dB of signal, one column
//! per legacy rate. A built-in table covers the usual OFDM operating
//! range; deployments with measured hardware curves load their own with
//! [`PerTable::from_file`].

use crate::{MediumError, Result, PER_MATRIX_RATE_LEN};
use std::fs;
use std::path::Path;

/// Legacy OFDM rate set in 100 kbps units (6 through 54 Mbit/s).
pub const RATES: [u32; PER_MATRIX_RATE_LEN] = [60, 90, 120, 180, 240, 360, 480, 540];

/// Reference frame length the PER rows are normalized to [bytes].
const PER_FRAME_LEN: f64 = 1024.0;

/// Rate in 100 kbps for a rate index, clamped to the table.
///
/// The frequency parameter selects the band's rate set; both bands use
/// the OFDM legacy set here, so it only participates in the signature.
pub fn rate_of(rate_idx: usize, _freq: u32) -> u32 {
    RATES[rate_idx.min(RATES.len() - 1)]
}

fn div_round(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Airtime of a frame in microseconds: preamble + signal + symbols.
///
/// `rate` is in 100 kbps units.
pub fn pkt_duration(len: usize, rate: u32) -> u64 {
    16 + 4 + 4 * div_round((16 + 8 * len as u64 + 6) * 10, 4 * rate as u64)
}

/// PER table: rows indexed by integer signal dB starting at `signal_min`,
/// one column per entry of [`RATES`].
#[derive(Debug, Clone)]
pub struct PerTable {
    signal_min: i32,
    rows: Vec<[f64; PER_MATRIX_RATE_LEN]>,
}

/// Rough SNR each OFDM rate needs for a clean 1024-byte frame [dB].
const RATE_SNR_THRESHOLD: [f64; PER_MATRIX_RATE_LEN] =
    [4.0, 6.0, 8.0, 10.0, 14.0, 18.0, 22.0, 24.0];

impl PerTable {
    /// Built-in table: per rate, 1.0 below threshold−3 dB, 0.0 above
    /// threshold+3 dB, linear in between. Rows cover −10..=30 dB.
    pub fn default_table() -> Self {
        let signal_min = -10;
        let rows = (signal_min..=30)
            .map(|signal| {
                let mut row = [0.0; PER_MATRIX_RATE_LEN];
                for (idx, threshold) in RATE_SNR_THRESHOLD.iter().enumerate() {
                    row[idx] = ((threshold + 3.0 - signal as f64) / 6.0).clamp(0.0, 1.0);
                }
                row
            })
            .collect();
        Self { signal_min, rows }
    }

    /// Parse a PER file: `#` comments, then rows of
    /// `signal p0 p1 ... p7` with consecutive ascending signals.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self> {
        let mut signal_min = None;
        let mut rows: Vec<[f64; PER_MATRIX_RATE_LEN]> = Vec::new();

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(first) = fields.next() else { continue };
            let signal: i32 = first
                .parse()
                .map_err(|e| MediumError::Parse(format!("PER line {}: {}", lineno + 1, e)))?;

            let expected = signal_min.map_or(signal, |min: i32| min + rows.len() as i32);
            if signal != expected {
                return Err(MediumError::Parse(format!(
                    "PER line {}: expected signal {}, got {}",
                    lineno + 1,
                    expected,
                    signal
                )));
            }
            signal_min.get_or_insert(signal);

            let mut row = [0.0; PER_MATRIX_RATE_LEN];
            for (idx, slot) in row.iter_mut().enumerate() {
                let field = fields.next().ok_or_else(|| {
                    MediumError::Parse(format!(
                        "PER line {}: expected {} rate columns",
                        lineno + 1,
                        PER_MATRIX_RATE_LEN
                    ))
                })?;
                let value: f64 = field
                    .parse()
                    .map_err(|e| MediumError::Parse(format!("PER line {}: {}", lineno + 1, e)))?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(MediumError::Parse(format!(
                        "PER line {}: probability {} out of range (column {})",
                        lineno + 1,
                        value,
                        idx
                    )));
                }
                *slot = value;
            }
            rows.push(row);
        }

        match signal_min {
            Some(signal_min) if !rows.is_empty() => Ok(Self { signal_min, rows }),
            _ => Err(MediumError::Parse("PER file has no rows".to_string())),
        }
    }

    /// Error probability for a frame of `len` bytes at `snr` dB and the
    /// given rate index. The signal is clamped to the row range and
    /// floored to a row; the row value is scaled for frame length.
    pub fn error_prob(&self, snr: f64, rate_idx: usize, len: usize) -> f64 {
        let max = self.signal_min + self.rows.len() as i32 - 1;
        let row = (snr.floor() as i64).clamp(self.signal_min as i64, max as i64) as i32;
        let base = self.rows[(row - self.signal_min) as usize][rate_idx.min(PER_MATRIX_RATE_LEN - 1)];
        1.0 - (1.0 - base).powf(len as f64 / PER_FRAME_LEN)
    }
}

impl Default for PerTable {
    fn default() -> Self {
        Self::default_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkt_duration() {
        // len 100 at 6 Mbit/s: 20 + 4 * ceil(8220 / 240) = 160
        assert_eq!(pkt_duration(100, 60), 160);
        // ACK-sized frame at 6 Mbit/s
        assert_eq!(pkt_duration(14, 60), 44);
    }

    #[test]
    fn test_rate_of_clamps() {
        assert_eq!(rate_of(0, 2412), 60);
        assert_eq!(rate_of(7, 5180), 540);
        assert_eq!(rate_of(42, 2412), 540);
    }

    #[test]
    fn test_default_table_extremes() {
        let table = PerTable::default_table();
        // Deep fade: clamped to the lowest row, certain loss.
        assert_eq!(table.error_prob(-50.0, 0, 100), 1.0);
        // Strong link: zero loss at any rate.
        for rate_idx in 0..PER_MATRIX_RATE_LEN {
            assert_eq!(table.error_prob(30.0, rate_idx, 1500), 0.0);
        }
    }

    #[test]
    fn test_default_table_monotone_in_snr() {
        let table = PerTable::default_table();
        let mut last = 1.0;
        for snr in -10..=30 {
            let p = table.error_prob(snr as f64, 2, 1024);
            assert!(p <= last, "PER not monotone at {} dB", snr);
            last = p;
        }
    }

    #[test]
    fn test_length_scaling() {
        let table = PerTable::default_table();
        let short = table.error_prob(8.0, 2, 100);
        let long = table.error_prob(8.0, 2, 2000);
        assert!(short < long);
    }

    #[test]
    fn test_parse_per_file() {
        let table = PerTable::parse(
            "# comment\n\
             -2 1.0 1.0 1.0 1.0 1.0 1.0 1.0 1.0\n\
             -1 0.5 1.0 1.0 1.0 1.0 1.0 1.0 1.0\n\
             0 0.0 0.5 1.0 1.0 1.0 1.0 1.0 1.0\n",
        )
        .unwrap();
        assert_eq!(table.error_prob(-1.0, 0, 1024), 0.5);
        // Floored to the -1 row.
        assert_eq!(table.error_prob(-0.5, 0, 1024), 0.5);
        // Clamped above.
        assert_eq!(table.error_prob(10.0, 0, 1024), 0.0);
    }

    #[test]
    fn test_parse_rejects_gap() {
        let err = PerTable::parse(
            "0 0 0 0 0 0 0 0 0\n\
             2 0 0 0 0 0 0 0 0\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_rejects_short_row() {
        assert!(PerTable::parse("0 0.5 0.5\n").is_err());
    }
}
