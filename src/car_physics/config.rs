// ==============================================================================
// config.rs - CAR PHYSICS CONFIGURATION + PRESETS
// ------------------------------------------------------------------------------
// CarPhysicsConfig is a plain value: once handed to a CarPhysicsBody it is only
// ever replaced wholesale (switch_config), never edited in place.
//
// Presets:
// - ARCADE    light, grippy, huge force/torque, barely damped
// - REALISTIC heavier, slides more, moderate force, degrades at speed
// - Default   generic baseline used when nothing else is asked for
// ==============================================================================

use std::fmt;
use std::str::FromStr;

use rapier2d::prelude::{Real, Vector};
use serde::{Deserialize, Serialize};

use crate::error::{RaceError, RaceResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarPhysicsConfig {
    pub mass: Real,                 // kg
    pub width: Real,                // px, full box length along heading
    pub height: Real,               // px, full box width across heading

    pub friction: Real,             // tire friction 0..1
    pub max_force: Real,            // driving force at full throttle
    pub max_torque: Real,           // steering torque at full lock

    pub linear_damping: Real,       // quadratic drag coefficient
    pub angular_damping: Real,      // rotational drag

    pub high_speed_threshold: Real, // px/s where handling starts to go
    pub handling_degradation: Real, // 0..1

    pub collision_elasticity: Real, // 0..1
    pub collision_friction: Real,   // 0..1
}

impl Default for CarPhysicsConfig {
    fn default() -> Self {
        Self {
            mass: 1000.0,
            width: 40.0,
            height: 20.0,
            friction: 0.7,
            max_force: 5000.0,
            max_torque: 2000.0,
            linear_damping: 0.1,
            angular_damping: 0.1,
            high_speed_threshold: 200.0,
            handling_degradation: 0.5,
            collision_elasticity: 0.3,
            collision_friction: 0.8,
        }
    }
}

impl CarPhysicsConfig {
    pub const ARCADE: Self = Self {
        mass: 800.0,
        width: 40.0,
        height: 20.0,
        friction: 0.9,
        max_force: 50_000.0,
        max_torque: 400_000.0,
        linear_damping: 0.02,
        angular_damping: 0.005,
        high_speed_threshold: 400.0,
        handling_degradation: 0.3,
        collision_elasticity: 0.4,
        collision_friction: 0.9,
    };

    pub const REALISTIC: Self = Self {
        mass: 1200.0,
        width: 40.0,
        height: 20.0,
        friction: 0.6,
        max_force: 35_000.0,
        max_torque: 250_000.0,
        linear_damping: 0.01,
        angular_damping: 0.01,
        high_speed_threshold: 300.0,
        handling_degradation: 0.7,
        collision_elasticity: 0.2,
        collision_friction: 0.6,
    };

    #[inline]
    pub fn half_extents(&self) -> Vector<Real> {
        Vector::new(self.width * 0.5, self.height * 0.5)
    }

    /// Reject configs a body cannot be built from.
    pub fn validate(&self) -> RaceResult<()> {
        let positive = [
            ("mass", self.mass),
            ("width", self.width),
            ("height", self.height),
            ("max_force", self.max_force),
            ("max_torque", self.max_torque),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(RaceError::InvalidConfig(format!("{name} must be > 0, got {value}")));
            }
        }

        let non_negative = [
            ("linear_damping", self.linear_damping),
            ("angular_damping", self.angular_damping),
            ("high_speed_threshold", self.high_speed_threshold),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RaceError::InvalidConfig(format!("{name} must be >= 0, got {value}")));
            }
        }

        let unit = [
            ("friction", self.friction),
            ("handling_degradation", self.handling_degradation),
            ("collision_elasticity", self.collision_elasticity),
            ("collision_friction", self.collision_friction),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(RaceError::InvalidConfig(format!("{name} must be within [0, 1], got {value}")));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhysicsModel {
    Arcade,
    Realistic,
}

impl PhysicsModel {
    pub fn parse(name: &str) -> RaceResult<Self> {
        match name {
            "arcade" => Ok(PhysicsModel::Arcade),
            "realistic" => Ok(PhysicsModel::Realistic),
            other => Err(RaceError::InvalidPhysicsModel(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhysicsModel::Arcade => "arcade",
            PhysicsModel::Realistic => "realistic",
        }
    }

    pub fn config(&self) -> CarPhysicsConfig {
        match self {
            PhysicsModel::Arcade => CarPhysicsConfig::ARCADE,
            PhysicsModel::Realistic => CarPhysicsConfig::REALISTIC,
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            PhysicsModel::Arcade => PhysicsModel::Realistic,
            PhysicsModel::Realistic => PhysicsModel::Arcade,
        }
    }
}

impl FromStr for PhysicsModel {
    type Err = RaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PhysicsModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
