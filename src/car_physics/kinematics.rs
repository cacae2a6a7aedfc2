// ==============================================================================
// kinematics.rs - HEADING BASIS + SPEED DECOMPOSITION (WORLD SPACE)
// ------------------------------------------------------------------------------
// forward_vector(angle) = (cos a, sin a)
// right_vector(angle)   = forward rotated by +90° = (−sin a, cos a)
//
// speed_components(v, angle):
//     forward = dot(v, forward)   (negative while reversing)
//     lateral = dot(v, right)     (|lateral| > threshold → sliding)
//
// speed_factor / effective_steering model the loss of control authority at
// speed; box_moment is the geometric moment of a solid box about its centre.
// ==============================================================================

use rapier2d::prelude::{Real, Vector};

use super::config::CarPhysicsConfig;

/// Moment scale applied when a body is first built, for snappier rotation.
pub const INERTIA_SCALE: Real = 0.1;

/// Excess speed over the threshold at which degradation reaches its full factor.
pub const DEGRADATION_SPAN: Real = 200.0;

/// Control authority never drops below this.
pub const MIN_SPEED_FACTOR: Real = 0.1;

/// Steering is only degraded above this multiple of the threshold.
pub const STEERING_DEGRADE_RATIO: Real = 1.5;

pub const DEFAULT_SLIDING_THRESHOLD: Real = 50.0;

#[inline]
pub fn forward_vector(angle: Real) -> Vector<Real> {
    Vector::new(angle.cos(), angle.sin())
}

#[inline]
pub fn right_vector(angle: Real) -> Vector<Real> {
    Vector::new(-angle.sin(), angle.cos())
}

/// Returns (forward_speed, lateral_speed).
#[inline]
pub fn speed_components(velocity: Vector<Real>, angle: Real) -> (Real, Real) {
    (velocity.dot(&forward_vector(angle)), velocity.dot(&right_vector(angle)))
}

pub fn speed_factor(speed: Real, config: &CarPhysicsConfig) -> Real {
    if speed <= config.high_speed_threshold {
        return 1.0;
    }
    let excess = speed - config.high_speed_threshold;
    (1.0 - excess / DEGRADATION_SPAN * config.handling_degradation).max(MIN_SPEED_FACTOR)
}

pub fn effective_steering(steering: Real, speed: Real, config: &CarPhysicsConfig) -> Real {
    if speed > config.high_speed_threshold * STEERING_DEGRADE_RATIO {
        steering * speed_factor(speed, config)
    } else {
        steering
    }
}

/// m·(w² + h²) / 12 for a solid w×h box.
#[inline]
pub fn box_moment(mass: Real, width: Real, height: Real) -> Real {
    mass * (width * width + height * height) / 12.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn basis_at_cardinal_angles() {
        let f0 = forward_vector(0.0);
        assert_relative_eq!(f0.x, 1.0, epsilon = 1e-3);
        assert_relative_eq!(f0.y, 0.0, epsilon = 1e-3);

        let f90 = forward_vector(FRAC_PI_2);
        assert_relative_eq!(f90.x, 0.0, epsilon = 1e-3);
        assert_relative_eq!(f90.y, 1.0, epsilon = 1e-3);

        let r0 = right_vector(0.0);
        assert_relative_eq!(r0.x, 0.0, epsilon = 1e-3);
        assert_relative_eq!(r0.y, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn basis_is_orthonormal() {
        for i in 0..16 {
            let a = i as Real * PI / 8.0;
            let (f, r) = (forward_vector(a), right_vector(a));
            assert_relative_eq!(f.norm(), 1.0, epsilon = 1e-5);
            assert_relative_eq!(r.norm(), 1.0, epsilon = 1e-5);
            assert_relative_eq!(f.dot(&r), 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn three_four_five_split() {
        let (fwd, lat) = speed_components(Vector::new(60.0, 80.0), 0.0);
        assert_relative_eq!(fwd, 60.0, epsilon = 1e-4);
        assert_relative_eq!(lat, 80.0, epsilon = 1e-4);
    }

    #[test]
    fn reversing_gives_negative_forward_speed() {
        let (fwd, _) = speed_components(Vector::new(-30.0, 0.0), 0.0);
        assert!(fwd < 0.0);
    }

    #[test]
    fn speed_factor_degrades_past_threshold_and_floors() {
        let cfg = CarPhysicsConfig::default(); // threshold 200, degradation 0.5
        assert_eq!(speed_factor(150.0, &cfg), 1.0);
        assert_eq!(speed_factor(200.0, &cfg), 1.0);
        assert_relative_eq!(speed_factor(300.0, &cfg), 0.75, epsilon = 1e-6);
        assert_relative_eq!(speed_factor(10_000.0, &cfg), MIN_SPEED_FACTOR, epsilon = 1e-6);
    }

    #[test]
    fn steering_only_degrades_well_past_threshold() {
        let cfg = CarPhysicsConfig::default();
        // 250 px/s is over the threshold but under 1.5x, full authority
        assert_eq!(effective_steering(1.0, 250.0, &cfg), 1.0);
        // 400 px/s: factor = 1 - 200/200*0.5 = 0.5
        assert_relative_eq!(effective_steering(-1.0, 400.0, &cfg), -0.5, epsilon = 1e-6);
    }

    #[test]
    fn box_moment_matches_closed_form() {
        assert_relative_eq!(box_moment(800.0, 40.0, 20.0), 800.0 * 2000.0 / 12.0, epsilon = 1e-2);
    }
}
