//! Configuration loading
//!
//! The config file names the stations and picks exactly one way of
//! describing their links: explicit SNR entries, an explicit
//! error-probability matrix, or a path-loss model over positions.
//! TOML, JSON and YAML are accepted, chosen by file extension.

use crate::link::{ErrorProbLinkModel, LinkModel, LogDistanceModel, SnrLinkModel};
use crate::medium::{Medium, NoFading, UniformFading};
use crate::per::PerTable;
use crate::station::{Station, StationTable};
use crate::{MediumError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediumConfig {
    /// Stations and explicit link descriptions.
    pub ifaces: IfaceConfig,
    /// Path-loss model over positions, mutually exclusive with the
    /// explicit descriptions.
    #[serde(default)]
    pub path_loss: Option<PathLossConfig>,
    /// Medium-wide toggles.
    #[serde(default)]
    pub medium: MediumSection,
}

/// Station set and explicit link quality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceConfig {
    /// Station MAC addresses; the position in this list is the station
    /// index everywhere else.
    pub ids: Vec<String>,
    /// Symmetric SNR entries `(a, b, snr_db)`.
    #[serde(default)]
    pub links: Option<Vec<(usize, usize, i32)>>,
    /// N×N error-probability matrix; the upper triangle is read and
    /// mirrored.
    #[serde(default)]
    pub error_probs: Option<Vec<Vec<f64>>>,
}

/// Path-loss link description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathLossConfig {
    /// Model name; `log_distance` is the supported model.
    pub model: String,
    pub path_loss_exponent: f64,
    #[serde(default)]
    pub xg: f64,
    /// One `(x, y)` position in meters per station.
    pub positions: Vec<(f64, f64)>,
    /// Optional movement vectors, meters per move interval.
    #[serde(default)]
    pub directions: Option<Vec<(f64, f64)>>,
    /// Transmit power per station [dBm].
    pub tx_powers: Vec<i32>,
}

/// Medium-wide toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediumSection {
    /// Couple concurrent transmissions through the interference map.
    #[serde(default)]
    pub interference: bool,
    /// Uniform fading depth [dB]; zero disables fading.
    #[serde(default)]
    pub fading_coefficient: i32,
}

/// Parse `aa:bb:cc:dd:ee:ff` into address bytes.
pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let mut addr = [0u8; 6];
    let mut parts = s.split(':');
    for byte in addr.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| MediumError::Config(format!("bad MAC address '{}'", s)))?;
        *byte = u8::from_str_radix(part, 16)
            .map_err(|_| MediumError::Config(format!("bad MAC address '{}'", s)))?;
    }
    if parts.next().is_some() {
        return Err(MediumError::Config(format!("bad MAC address '{}'", s)));
    }
    Ok(addr)
}

impl MediumConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| MediumError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| MediumError::Config(format!("{}: {}", path.display(), e)))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| MediumError::Config(format!("{}: {}", path.display(), e)))?,
            _ => toml::from_str(&content)
                .map_err(|e| MediumError::Config(format!("{}: {}", path.display(), e)))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string (tests and embedded defaults).
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| MediumError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn num_stas(&self) -> usize {
        self.ifaces.ids.len()
    }

    /// Reject configurations the simulation cannot run with.
    pub fn validate(&self) -> Result<()> {
        let n = self.num_stas();
        if n == 0 {
            return Err(MediumError::Config("no stations configured".to_string()));
        }

        let mut addrs = Vec::with_capacity(n);
        for id in &self.ifaces.ids {
            let addr = parse_mac(id)?;
            if addrs.contains(&addr) {
                return Err(MediumError::Config(format!("duplicate station id {}", id)));
            }
            addrs.push(addr);
        }

        let chosen = [
            self.ifaces.links.is_some(),
            self.ifaces.error_probs.is_some(),
            self.path_loss.is_some(),
        ]
        .iter()
        .filter(|&&set| set)
        .count();
        if chosen > 1 {
            return Err(MediumError::Config(
                "specify one of links/error_probs/path_loss".to_string(),
            ));
        }

        if let Some(links) = &self.ifaces.links {
            for &(a, b, snr) in links {
                if a >= n || b >= n {
                    return Err(MediumError::Config(format!(
                        "link ({}, {}, {}): index out of range",
                        a, b, snr
                    )));
                }
            }
        }

        if let Some(probs) = &self.ifaces.error_probs {
            if probs.len() != n {
                return Err(MediumError::Config(format!(
                    "specify {} error probability rows",
                    n
                )));
            }
            for row in probs {
                if row.len() != n {
                    return Err(MediumError::Config(format!(
                        "specify {} error probabilities per row",
                        n
                    )));
                }
                for &p in row {
                    if !(0.0..=1.0).contains(&p) {
                        return Err(MediumError::Config(format!(
                            "error probability {} out of range",
                            p
                        )));
                    }
                }
            }
        }

        if let Some(path_loss) = &self.path_loss {
            if path_loss.model != "log_distance" {
                return Err(MediumError::Config(format!(
                    "unknown path loss model '{}'",
                    path_loss.model
                )));
            }
            if path_loss.positions.len() != n {
                return Err(MediumError::Config(format!("specify {} positions", n)));
            }
            if path_loss.tx_powers.len() != n {
                return Err(MediumError::Config(format!("specify {} tx_powers", n)));
            }
            if let Some(directions) = &path_loss.directions {
                if directions.len() != n {
                    return Err(MediumError::Config(format!("specify {} directions", n)));
                }
            }
        }

        Ok(())
    }

    /// Build the station table described by `ifaces.ids` (and positions,
    /// when a path-loss section is present).
    pub fn build_stations(&self) -> Result<StationTable> {
        let mut table = StationTable::new();
        for (index, id) in self.ifaces.ids.iter().enumerate() {
            let mut station = Station::new(index, parse_mac(id)?);
            if let Some(path_loss) = &self.path_loss {
                let (x, y) = path_loss.positions[index];
                station.x = x;
                station.y = y;
                station.tx_power = path_loss.tx_powers[index];
                if let Some(directions) = &path_loss.directions {
                    let (dx, dy) = directions[index];
                    station.dir_x = dx;
                    station.dir_y = dy;
                }
            }
            table.add(station)?;
            tracing::info!("added station {}: {}", index, id);
        }
        Ok(table)
    }

    /// Build the link model chosen by the configuration.
    pub fn build_link_model(&self, per: PerTable) -> Result<LinkModel> {
        let n = self.num_stas();

        if let Some(probs) = &self.ifaces.error_probs {
            let mut model = ErrorProbLinkModel::new(n);
            for start in 0..n {
                for end in start + 1..n {
                    model.set_link(start, end, probs[start][end]);
                }
            }
            return Ok(LinkModel::ErrorProb(model));
        }

        let mut model = SnrLinkModel::new(n, per);
        if let Some(links) = &self.ifaces.links {
            for &(a, b, snr) in links {
                model.set_link(a, b, snr);
            }
        }
        if let Some(path_loss) = &self.path_loss {
            model.path_loss = Some(LogDistanceModel {
                path_loss_exponent: path_loss.path_loss_exponent,
                xg: path_loss.xg,
            });
            let tx_powers = path_loss.tx_powers.clone();
            model.recompute_from_positions(&path_loss.positions, &tx_powers);
        }
        Ok(LinkModel::Snr(model))
    }

    /// Assemble the full medium.
    pub fn build_medium(&self, per: PerTable, seed: Option<u64>) -> Result<Medium> {
        let stations = self.build_stations()?;
        let link = self.build_link_model(per)?;
        let fading: Box<dyn crate::medium::FadingModel> = if self.medium.fading_coefficient > 0 {
            Box::new(UniformFading {
                coefficient: self.medium.fading_coefficient,
            })
        } else {
            Box::new(NoFading)
        };
        Ok(Medium::new(
            stations,
            link,
            self.medium.interference,
            fading,
            seed,
        ))
    }
}
