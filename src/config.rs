// ==============================================================================
// config.rs - WORLD + SERVER CONFIGURATION
// ------------------------------------------------------------------------------
// WorldConfig: physics world parameters (serde, optionally read from TOML).
// ServerConfig: host loop / websocket settings read from the environment;
// main.rs then applies command-line overrides on top.
// ==============================================================================

use std::env;
use std::path::Path;

use rapier2d::prelude::Real;
use serde::{Deserialize, Serialize};

use crate::error::{RaceError, RaceResult};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9001";
pub const DEFAULT_TICK_HZ: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Top-down view: no gravity.
    pub gravity: [Real; 2],
    /// Fraction of velocity a body keeps after one second of free motion.
    /// 1.0 disables world damping.
    pub damping: Real,
    pub time_step: Real,
    pub solver_iterations: usize,
    /// Pixels per metre, used by the solver for its length tolerances.
    pub length_unit: Real,
    /// Width/height of the walled arena the server spawns.
    pub arena_size: [Real; 2],
    pub wall_thickness: Real,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, 0.0],
            damping: 0.1,
            time_step: 1.0 / 60.0,
            solver_iterations: 10,
            length_unit: 50.0,
            arena_size: [2400.0, 1600.0],
            wall_thickness: 20.0,
        }
    }
}

impl WorldConfig {
    /// No world damping at all; handy for tests that need exact kinematics.
    pub fn undamped() -> Self {
        Self { damping: 1.0, ..Self::default() }
    }

    /// Rapier's per-body damping coefficient equivalent to `damping`.
    /// v' = v / (1 + c·dt) ≈ v·e^(−c·dt), so c = −ln(damping).
    pub fn body_damping(&self) -> Real {
        let kept = self.damping.clamp(1e-6, 1.0);
        -kept.ln()
    }

    pub fn from_toml_str(text: &str) -> RaceResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| RaceError::WorldConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> RaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RaceError::WorldConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> RaceResult<()> {
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(RaceError::WorldConfig(format!("damping must be in (0, 1], got {}", self.damping)));
        }
        if !(self.time_step > 0.0) {
            return Err(RaceError::WorldConfig(format!("time_step must be positive, got {}", self.time_step)));
        }
        if self.solver_iterations == 0 {
            return Err(RaceError::WorldConfig("solver_iterations must be at least 1".to_string()));
        }
        if !(self.length_unit > 0.0) {
            return Err(RaceError::WorldConfig(format!("length_unit must be positive, got {}", self.length_unit)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub tick_hz: u32,
    pub debug_overlay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            tick_hz: DEFAULT_TICK_HZ,
            debug_overlay: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("RACER_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            tick_hz: read_env_u32("RACER_TICK_HZ", DEFAULT_TICK_HZ),
            debug_overlay: read_env_bool("RACER_DEBUG_OVERLAY", false),
        }
    }

    pub fn dt(&self) -> Real {
        1.0 / self.tick_hz.max(1) as Real
    }
}

pub(crate) fn read_env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
