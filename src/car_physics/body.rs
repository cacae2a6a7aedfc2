// ==============================================================================
// body.rs - CAR PHYSICS BODY
// ------------------------------------------------------------------------------
// One dynamic rigid body + one cuboid collider living in a PhysicsWorld owned
// by someone else. The body only holds handles; every call that reads or
// writes physics state takes the world explicitly.
//
// Per tick:
//   apply_controls(...)      store clamped inputs, nothing else
//   update_physics(world,dt) accumulate forces/torque from inputs
//   world.step(dt)           integrates them once, then clears them
//
// update_physics order:
//   1. speed = |v|
//   2. throttle → force along heading (at COM, no torque)
//   3. steering → torque is SET (not added); zero when centred
//   4. brake    → force against v, 1.5 × max_force × brake
//   5. drag     → −v · linear_damping · speed
//   6. spin     → torque += −ω · angular_damping
// ==============================================================================

use std::fmt;

use rapier2d::prelude::*;

use crate::collision::{CollisionInfo, isolate};
use crate::error::RaceResult;
use crate::physics::{PhysicsWorld, v2};

use super::config::CarPhysicsConfig;
use super::kinematics::{
    DEFAULT_SLIDING_THRESHOLD, INERTIA_SCALE, box_moment, effective_steering, forward_vector,
    right_vector, speed_components,
};
use super::types::{ControlInput, INPUT_EPSILON, PhysicsInfo};

/// Brake force relative to max driving force.
pub const BRAKE_FORCE_RATIO: Real = 1.5;

/// Below this speed the car counts as stationary for brake and drag.
pub const MIN_MOVING_SPEED: Real = 0.1;

pub type BodyCollisionCallback = Box<dyn FnMut(&CollisionInfo) + Send>;

pub struct CarPhysicsBody {
    body: RigidBodyHandle,
    collider: ColliderHandle,
    config: CarPhysicsConfig,
    controls: ControlInput,
    collision_callback: Option<BodyCollisionCallback>,
    cleaned_up: bool,
}

impl fmt::Debug for CarPhysicsBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarPhysicsBody")
            .field("body", &self.body)
            .field("collider", &self.collider)
            .field("config", &self.config)
            .field("controls", &self.controls)
            .field("has_callback", &self.collision_callback.is_some())
            .field("cleaned_up", &self.cleaned_up)
            .finish()
    }
}

impl CarPhysicsBody {
    /// Insert the car into `world`. The moment of inertia is the box moment
    /// scaled by INERTIA_SCALE.
    pub fn new(
        world: &mut PhysicsWorld,
        position: Vector<Real>,
        angle: Real,
        config: CarPhysicsConfig,
    ) -> RaceResult<Self> {
        config.validate()?;

        let moment = box_moment(config.mass, config.width, config.height) * INERTIA_SCALE;
        let (body, collider) = world.insert_car(
            position,
            angle,
            config.mass,
            moment,
            config.half_extents(),
            config.friction,
            config.collision_elasticity,
        );

        tracing::debug!(?body, mass = config.mass, "car body created");

        Ok(Self {
            body,
            collider,
            config,
            controls: ControlInput::default(),
            collision_callback: None,
            cleaned_up: false,
        })
    }

    // ---------------------------------------------
    // Handle access (panics after cleanup)
    // ---------------------------------------------

    fn handle(&self) -> RigidBodyHandle {
        assert!(!self.cleaned_up, "CarPhysicsBody used after cleanup");
        self.body
    }

    fn rb<'w>(&self, world: &'w PhysicsWorld) -> &'w RigidBody {
        let handle = self.handle();
        match world.bodies.get(handle) {
            Some(rb) => rb,
            None => panic!("car body {handle:?} is not in this world"),
        }
    }

    fn rb_mut<'w>(&self, world: &'w mut PhysicsWorld) -> &'w mut RigidBody {
        let handle = self.handle();
        match world.bodies.get_mut(handle) {
            Some(rb) => rb,
            None => panic!("car body {handle:?} is not in this world"),
        }
    }

    fn shape<'w>(&self, world: &'w PhysicsWorld) -> &'w Collider {
        assert!(!self.cleaned_up, "CarPhysicsBody used after cleanup");
        match world.colliders.get(self.collider) {
            Some(c) => c,
            None => panic!("car collider {:?} is not in this world", self.collider),
        }
    }

    pub fn body_handle(&self) -> RigidBodyHandle {
        self.body
    }

    pub fn collider_handle(&self) -> ColliderHandle {
        self.collider
    }

    pub fn config(&self) -> &CarPhysicsConfig {
        &self.config
    }

    pub fn controls(&self) -> ControlInput {
        self.controls
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    // ---------------------------------------------
    // Controls + per-tick forces
    // ---------------------------------------------

    pub fn apply_controls(&mut self, throttle: Real, steering: Real, brake: Real) {
        self.controls = ControlInput::new(throttle, steering, brake).clamped();
    }

    /// Accumulate this tick's forces and torque. The body never integrates
    /// itself; `dt` is accepted for call-site symmetry with the world step.
    pub fn update_physics(&self, world: &mut PhysicsWorld, _dt: Real) {
        let cfg = &self.config;
        let ControlInput { throttle, steering, brake } = self.controls;
        let rb = self.rb_mut(world);

        let velocity = *rb.linvel();
        let speed = velocity.norm();
        let angle = rb.rotation().angle();

        if throttle.abs() > INPUT_EPSILON {
            rb.add_force(forward_vector(angle) * (throttle * cfg.max_force), true);
        }

        rb.reset_torques(true);
        if steering.abs() > INPUT_EPSILON {
            let steer = effective_steering(steering, speed, cfg);
            rb.add_torque(steer * cfg.max_torque, true);
        }

        if brake > INPUT_EPSILON && speed > MIN_MOVING_SPEED {
            let against = -velocity / speed;
            rb.add_force(against * (brake * cfg.max_force * BRAKE_FORCE_RATIO), true);
        }

        if speed > MIN_MOVING_SPEED {
            rb.add_force(-velocity * cfg.linear_damping * speed, true);
        }

        let spin = rb.angvel();
        if spin.abs() > INPUT_EPSILON {
            rb.add_torque(-spin * cfg.angular_damping, true);
        }
    }

    // ---------------------------------------------
    // Kinematic queries
    // ---------------------------------------------

    pub fn position(&self, world: &PhysicsWorld) -> Vector<Real> {
        *self.rb(world).translation()
    }

    /// Radians.
    pub fn angle(&self, world: &PhysicsWorld) -> Real {
        self.rb(world).rotation().angle()
    }

    pub fn velocity(&self, world: &PhysicsWorld) -> Vector<Real> {
        *self.rb(world).linvel()
    }

    pub fn angular_velocity(&self, world: &PhysicsWorld) -> Real {
        self.rb(world).angvel()
    }

    pub fn forward_vector(&self, world: &PhysicsWorld) -> Vector<Real> {
        forward_vector(self.angle(world))
    }

    pub fn right_vector(&self, world: &PhysicsWorld) -> Vector<Real> {
        right_vector(self.angle(world))
    }

    pub fn speed(&self, world: &PhysicsWorld) -> Real {
        self.velocity(world).norm()
    }

    pub fn forward_speed(&self, world: &PhysicsWorld) -> Real {
        let rb = self.rb(world);
        speed_components(*rb.linvel(), rb.rotation().angle()).0
    }

    pub fn lateral_speed(&self, world: &PhysicsWorld) -> Real {
        let rb = self.rb(world);
        speed_components(*rb.linvel(), rb.rotation().angle()).1
    }

    pub fn is_sliding(&self, world: &PhysicsWorld) -> bool {
        self.is_sliding_with(world, DEFAULT_SLIDING_THRESHOLD)
    }

    pub fn is_sliding_with(&self, world: &PhysicsWorld, threshold: Real) -> bool {
        self.lateral_speed(world).abs() > threshold
    }

    pub fn mass(&self, world: &PhysicsWorld) -> Real {
        self.rb(world).mass()
    }

    pub fn moment_of_inertia(&self, world: &PhysicsWorld) -> Real {
        self.rb(world).mass_properties().local_mprops.principal_inertia()
    }

    pub fn friction(&self, world: &PhysicsWorld) -> Real {
        self.shape(world).friction()
    }

    pub fn elasticity(&self, world: &PhysicsWorld) -> Real {
        self.shape(world).restitution()
    }

    // ---------------------------------------------
    // State changes
    // ---------------------------------------------

    /// Teleport and bring the body fully to rest, pending forces included.
    pub fn reset_position(&self, world: &mut PhysicsWorld, position: Vector<Real>, angle: Real) {
        let rb = self.rb_mut(world);
        rb.set_position(Isometry::new(position, angle), true);
        rb.set_linvel(Vector::zeros(), true);
        rb.set_angvel(0.0, true);
        rb.reset_forces(true);
        rb.reset_torques(true);
    }

    /// Zero both velocities, pose untouched.
    pub fn halt(&self, world: &mut PhysicsWorld) {
        let rb = self.rb_mut(world);
        rb.set_linvel(Vector::zeros(), true);
        rb.set_angvel(0.0, true);
    }

    /// Swap configs in place. Pose and velocities carry over untouched; mass,
    /// moment and collider material follow the new config immediately.
    ///
    /// The new moment is the plain box moment: INERTIA_SCALE only applies at
    /// creation.
    pub fn switch_config(&mut self, world: &mut PhysicsWorld, config: CarPhysicsConfig) -> RaceResult<()> {
        config.validate()?;

        let (position, linvel, angvel) = {
            let rb = self.rb(world);
            (*rb.position(), *rb.linvel(), rb.angvel())
        };

        if let Some(collider) = world.colliders.get_mut(self.collider) {
            collider.set_friction(config.friction);
            collider.set_restitution(config.collision_elasticity);
        }

        let moment = box_moment(config.mass, config.width, config.height);
        world.set_mass_properties(self.body, MassProperties::new(Point::origin(), config.mass, moment));

        let rb = self.rb_mut(world);
        rb.set_position(position, true);
        rb.set_linvel(linvel, true);
        rb.set_angvel(angvel, true);

        self.config = config;
        Ok(())
    }

    pub fn physics_info(&self, world: &PhysicsWorld) -> PhysicsInfo {
        let rb = self.rb(world);
        let velocity = *rb.linvel();
        let angle = rb.rotation().angle();
        let (forward_speed, lateral_speed) = speed_components(velocity, angle);

        PhysicsInfo {
            position: v2(*rb.translation()),
            angle,
            velocity: v2(velocity),
            angular_velocity: rb.angvel(),
            speed: velocity.norm(),
            forward_speed,
            lateral_speed,
            is_sliding: lateral_speed.abs() > DEFAULT_SLIDING_THRESHOLD,
            throttle: self.controls.throttle,
            steering: self.controls.steering,
            brake: self.controls.brake,
            mass: rb.mass(),
            friction: self.friction(world),
        }
    }

    // ---------------------------------------------
    // Collision slot
    // ---------------------------------------------

    /// Replaces any previously registered callback.
    pub fn set_collision_callback(&mut self, callback: BodyCollisionCallback) {
        self.collision_callback = Some(callback);
    }

    pub fn clear_collision_callback(&mut self) {
        self.collision_callback = None;
    }

    /// Hand a contact to the registered callback. Never affects how the
    /// solver resolved the contact.
    pub fn notify_collision(&mut self, info: &CollisionInfo) {
        if let Some(callback) = self.collision_callback.as_mut() {
            isolate("car_physics_body", || callback(info));
        }
    }

    // ---------------------------------------------
    // Lifecycle
    // ---------------------------------------------

    /// Remove body + collider from the world. Safe to call more than once;
    /// returns whether anything was removed.
    pub fn cleanup(&mut self, world: &mut PhysicsWorld) -> bool {
        if self.cleaned_up {
            return false;
        }
        self.cleaned_up = true;
        self.collision_callback = None;
        world.remove_body(self.body)
    }
}
