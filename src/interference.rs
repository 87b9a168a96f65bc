//! Interference accumulator
//!
//! Concurrent transmissions couple through a shared N×N map: every frame
//! too quiet to be decoded adds its airtime to the sender's row, and at
//! each 10 ms window boundary the accumulated airtime becomes a collision
//! probability for the next window. Receive-side SNR then pays a penalty
//! drawn from the colliding senders' power sum.

use crate::{CCA_THRESHOLD, INTF_WINDOW_USEC, NOISE_LEVEL};
use rand::Rng;

/// Clamp range for the dBm → mW conversion [dB].
const INTF_LIMIT: i32 = 31;

fn dbm_to_milliwatt(decibel_intf: i32) -> f64 {
    let intf_diff = NOISE_LEVEL - decibel_intf;
    if intf_diff >= INTF_LIMIT {
        return 0.001;
    }
    if intf_diff <= -INTF_LIMIT {
        return 1000.0;
    }
    10f64.powf(-intf_diff as f64 / 10.0)
}

fn milliwatt_to_dbm(value: f64) -> f64 {
    10.0 * value.log10()
}

/// One directional-link cell of the interference map.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntfCell {
    /// Airtime accumulated in the current window [usec].
    pub duration: i64,
    /// Signal of the latest contribution [dBm]; latest wins.
    pub signal: i32,
    /// Collision probability from the previous window.
    pub prob_col: f64,
}

/// N×N interference map, indexed `src * N + dst`.
#[derive(Debug, Clone)]
pub struct InterferenceMap {
    num_stas: usize,
    cells: Vec<IntfCell>,
}

impl InterferenceMap {
    pub fn new(num_stas: usize) -> Self {
        Self {
            num_stas,
            cells: vec![IntfCell::default(); num_stas * num_stas],
        }
    }

    pub fn cell(&self, src: usize, dst: usize) -> &IntfCell {
        &self.cells[src * self.num_stas + dst]
    }

    /// Record a transmission from `src` across the map.
    ///
    /// A frame at or above the CCA threshold is decodable and leaves no
    /// interference; the return value tells the caller whether the frame
    /// contributed (and should therefore not also be delivered).
    pub fn record(&mut self, src: usize, duration: i64, signal: i32) -> bool {
        if signal >= CCA_THRESHOLD {
            return false;
        }
        for dst in 0..self.num_stas {
            let cell = &mut self.cells[src * self.num_stas + dst];
            cell.duration += duration;
            // use only latest value
            cell.signal = signal;
        }
        true
    }

    /// SNR penalty at `dst` for a transmission from `src` [dB].
    ///
    /// Each other station contributes its recorded power with its
    /// collision probability; totals at or below 1 mW cost nothing.
    pub fn signal_offset<R: Rng>(&self, src: usize, dst: usize, rng: &mut R) -> i32 {
        let mut intf_power = 0.0;
        for i in 0..self.num_stas {
            if i == src || i == dst {
                continue;
            }
            let cell = &self.cells[i * self.num_stas + dst];
            if rng.gen::<f64>() < cell.prob_col {
                intf_power += dbm_to_milliwatt(cell.signal);
            }
        }

        if intf_power <= 1.0 {
            return 0;
        }
        (milliwatt_to_dbm(intf_power) + 0.5) as i32
    }

    /// Window boundary: accumulated airtime becomes the next window's
    /// collision probability and the accumulator restarts.
    pub fn fold_window(&mut self) {
        for i in 0..self.num_stas {
            for j in 0..self.num_stas {
                if i == j {
                    continue;
                }
                let cell = &mut self.cells[i * self.num_stas + j];
                cell.prob_col = cell.duration as f64 / INTF_WINDOW_USEC as f64;
                cell.duration = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_loud_frames_do_not_contribute() {
        let mut map = InterferenceMap::new(2);
        assert!(!map.record(0, 500, CCA_THRESHOLD));
        assert_eq!(map.cell(0, 1).duration, 0);
    }

    #[test]
    fn test_quiet_frames_accumulate() {
        let mut map = InterferenceMap::new(3);
        assert!(map.record(0, 300, -95));
        assert!(map.record(0, 200, -93));
        assert_eq!(map.cell(0, 1).duration, 500);
        assert_eq!(map.cell(0, 2).duration, 500);
        // latest signal wins
        assert_eq!(map.cell(0, 1).signal, -93);
    }

    #[test]
    fn test_window_fold_resets_durations() {
        let mut map = InterferenceMap::new(2);
        map.record(0, 2_500, -95);
        map.fold_window();
        assert_eq!(map.cell(0, 1).duration, 0);
        assert!((map.cell(0, 1).prob_col - 0.25).abs() < 1e-12);
        // Next window starts from zero again.
        map.fold_window();
        assert_eq!(map.cell(0, 1).prob_col, 0.0);
    }

    #[test]
    fn test_offset_zero_without_colliders() {
        let map = InterferenceMap::new(4);
        let mut rng = SmallRng::seed_from_u64(7);
        assert_eq!(map.signal_offset(0, 1, &mut rng), 0);
    }

    #[test]
    fn test_offset_counts_certain_colliders() {
        let mut map = InterferenceMap::new(4);
        // Stations 2 and 3 interfere at dst 1 with probability 1.
        map.record(2, 10_000, -91);
        map.record(3, 10_000, -91);
        map.fold_window();
        let mut rng = SmallRng::seed_from_u64(7);
        // Two 1 mW contributors: round(10*log10(2)) = 3 dB.
        assert_eq!(map.signal_offset(0, 1, &mut rng), 3);
    }

    #[test]
    fn test_offset_single_quiet_collider_is_free() {
        let mut map = InterferenceMap::new(3);
        map.record(2, 10_000, -95);
        map.fold_window();
        let mut rng = SmallRng::seed_from_u64(7);
        // 0.4 mW total is below the 1 mW floor.
        assert_eq!(map.signal_offset(0, 1, &mut rng), 0);
    }

    #[test]
    fn test_dbm_clamps() {
        assert_eq!(dbm_to_milliwatt(NOISE_LEVEL - INTF_LIMIT), 0.001);
        assert_eq!(dbm_to_milliwatt(NOISE_LEVEL + INTF_LIMIT), 1000.0);
        let mid = dbm_to_milliwatt(NOISE_LEVEL + 10);
        assert!((mid - 10.0).abs() < 1e-9);
    }
}
