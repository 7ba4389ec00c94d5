//! Simulation configuration.
//!
//! Loaded from RON or built from [`SimConfig::default`]. All values are
//! part of the lockstep contract: every peer must run with identical
//! configuration or the simulations diverge.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::math::Fixed;

/// Tunable parameters for the simulation core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Logic ticks per second.
    pub frame_rate: u32,
    /// Ticks a client may spend waiting on confirmation before the
    /// synchronizer reports a timeout.
    pub max_wait_frames: u32,
    /// Dirty flow fields recomputed per tick.
    pub flow_max_updates_per_frame: u32,
    /// Flow fields kept in the pool before zero-ref eviction runs.
    pub flow_field_cache_size: usize,
    /// ORCA look-ahead horizon in seconds.
    pub rvo_time_horizon: Fixed,
    /// Neighbor cap per agent in the collision solver.
    pub rvo_max_neighbors: usize,
    /// Blend factor toward the previous velocity (0 = off). Non-zero
    /// values trade the strict reciprocal guarantee for smoother paths.
    pub rvo_velocity_smoothing: Fixed,
    /// Distance at which a navigating unit counts as arrived.
    pub arrival_radius: Fixed,
    /// Distance at which a navigating unit starts slowing down.
    pub slow_down_radius: Fixed,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frame_rate: 20,
            max_wait_frames: 300,
            flow_max_updates_per_frame: 2,
            flow_field_cache_size: 20,
            rvo_time_horizon: Fixed::TWO,
            rvo_max_neighbors: 10,
            rvo_velocity_smoothing: Fixed::ZERO,
            arrival_radius: Fixed::HALF,
            slow_down_radius: Fixed::TWO,
        }
    }
}

impl SimConfig {
    /// Duration of one tick.
    #[must_use]
    pub fn delta_time(&self) -> Fixed {
        Fixed::ONE / Fixed::from_int(i64::from(self.frame_rate.max(1)))
    }

    /// Parse a config from RON text. Missing fields take their defaults.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| SimError::ConfigParseError(e.to_string()))
    }
}
