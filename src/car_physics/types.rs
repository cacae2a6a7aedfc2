//! Plain data shared by the car physics body and the layers above it.
// car_physics/types.rs
use rapier2d::prelude::Real;
use serde::{Deserialize, Serialize};

/// Inputs at or below this magnitude are treated as zero.
pub const INPUT_EPSILON: Real = 0.01;

#[inline]
fn clamp_or_zero(v: Real, lo: Real, hi: Real) -> Real {
    if v.is_nan() { 0.0 } else { v.clamp(lo, hi) }
}

// ============================================
// Driver controls
// ============================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    pub throttle: Real, // -1..1, reverse to forward
    pub steering: Real, // -1..1, left to right
    pub brake: Real,    //  0..1
}

impl ControlInput {
    pub fn new(throttle: Real, steering: Real, brake: Real) -> Self {
        Self { throttle, steering, brake }
    }

    /// Throttle/steering into [-1, 1], brake into [0, 1]; NaN becomes 0.
    pub fn clamped(self) -> Self {
        Self {
            throttle: clamp_or_zero(self.throttle, -1.0, 1.0),
            steering: clamp_or_zero(self.steering, -1.0, 1.0),
            brake: clamp_or_zero(self.brake, 0.0, 1.0),
        }
    }
}

// ============================================
// Diagnostic snapshot
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhysicsInfo {
    pub position: [f32; 2],
    pub angle: f32, // radians
    pub velocity: [f32; 2],
    pub angular_velocity: f32,
    pub speed: f32,
    pub forward_speed: f32,
    pub lateral_speed: f32,
    pub is_sliding: bool,
    pub throttle: f32,
    pub steering: f32,
    pub brake: f32,
    pub mass: f32,
    pub friction: f32,
}
