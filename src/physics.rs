// src/physics.rs

use std::num::NonZeroUsize;

use rapier2d::prelude::*;
use rapier2d::parry::shape::Ball;
use serde::Serialize;

use crate::collision::{CollisionClass, ContactCollector, ContactReport};
use crate::config::WorldConfig;

pub const BOUNDARY_FRICTION: Real = 0.7;
pub const BOUNDARY_ELASTICITY: Real = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Point<Real>,
    pub normal: Vector<Real>,
    /// Fraction of the segment travelled before the hit, 0..1.
    pub fraction: Real,
    pub collider: ColliderHandle,
    pub body: Option<RigidBodyHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorldInfo {
    pub bodies: usize,
    pub colliders: usize,
    pub gravity: [f32; 2],
    pub damping: f32,
    pub iterations: usize,
    pub time_step: f32,
}

#[inline] pub(crate) fn v2(v: Vector<Real>) -> [f32; 2] { [v.x, v.y] }
#[inline] pub(crate) fn p2(p: Point<Real>)  -> [f32; 2] { [p.x, p.y] }

pub struct PhysicsWorld {
    pub config: WorldConfig,
    pub gravity: Vector<Real>, // gravity vector (zero for top-down)
    pub pipeline: PhysicsPipeline, // physics pipeline
    pub island_manager: IslandManager, // manages islands of bodies
    pub broad_phase: DefaultBroadPhase, // broad-phase collision detection
    pub narrow_phase: NarrowPhase, // collision detection
    pub bodies: RigidBodySet, // for rigid bodies
    pub colliders: ColliderSet, // for collision shapes
    pub joints: ImpulseJointSet, // for constraints
    pub multibody_joints: MultibodyJointSet,// for articulated bodies
    pub ccd: CCDSolver, // continuous collision detection
    pub query_pipeline: QueryPipeline, // for raycasting
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(WorldConfig::default())
    }
}

impl PhysicsWorld {

    pub fn new(config: WorldConfig) -> Self {
        Self {
            gravity: vector![config.gravity[0], config.gravity[1]],
            config,
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
        }
    }

    /// Insert a dynamic body whose mass properties are given explicitly.
    /// The collider should carry zero density so it does not add mass.
    pub fn insert_dynamic(
        &mut self,
        translation: Vector<Real>,
        angle: Real,
        mass_properties: MassProperties,
        mut collider: Collider,
    ) -> (RigidBodyHandle, ColliderHandle) {
        // cars report their solved contacts during the step
        if CollisionClass::of(&collider) == Some(CollisionClass::Car) {
            collider.set_active_events(collider.active_events() | ActiveEvents::CONTACT_FORCE_EVENTS);
            collider.set_contact_force_event_threshold(0.0);
        }

        let damping = self.config.body_damping();

        let rb = RigidBodyBuilder::dynamic()
            .translation(translation)
            .rotation(angle)
            .additional_mass_properties(mass_properties)
            .linear_damping(damping)
            .angular_damping(damping)
            .can_sleep(false)
            .ccd_enabled(true)
            .build();

        let handle = self.bodies.insert(rb); // insert rigid body
        let collider = self.colliders.insert_with_parent(collider, handle, &mut self.bodies); // attach to body

        if let Some(body) = self.bodies.get_mut(handle) {
            body.recompute_mass_properties_from_colliders(&self.colliders);
        }

        (handle, collider)
    }

    /// Car chassis: cuboid in the car collision class, mass and moment given
    /// explicitly rather than derived from the shape.
    pub fn insert_car(
        &mut self,
        position: Vector<Real>,
        angle: Real,
        mass: Real,
        moment: Real,
        half_extents: Vector<Real>,
        friction: Real,
        restitution: Real,
    ) -> (RigidBodyHandle, ColliderHandle) {
        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y)
            .density(0.0)
            .friction(friction)
            .restitution(restitution)
            .collision_groups(CollisionClass::Car.interaction_groups())
            .build();

        self.insert_dynamic(position, angle, MassProperties::new(Point::origin(), mass, moment), collider)
    }

    /// Replace the explicit mass properties of a body, effective immediately.
    pub fn set_mass_properties(&mut self, handle: RigidBodyHandle, mass_properties: MassProperties) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_additional_mass_properties(mass_properties, true);
            body.recompute_mass_properties_from_colliders(&self.colliders);
        }
    }

    /// Remove a body and every collider attached to it.
    /// Returns false when the body was already gone.
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.bodies
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.colliders,
                &mut self.joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    /// Static wall from `a` to `b`.
    pub fn add_track_boundary(&mut self, a: Point<Real>, b: Point<Real>, thickness: Real) -> ColliderHandle {
        let d = b - a;
        let length = d.norm();
        let mid = a + d * 0.5;
        let angle = d.y.atan2(d.x);

        let collider = ColliderBuilder::cuboid(length * 0.5, thickness * 0.5)
            .position(Isometry::new(mid.coords, angle))
            .collision_groups(CollisionClass::TrackBoundary.interaction_groups())
            .friction(BOUNDARY_FRICTION)
            .restitution(BOUNDARY_ELASTICITY)
            .build();

        self.colliders.insert(collider)
    }

    /// Four walls enclosing [0, w] x [0, h], `wall_thickness` thick.
    pub fn add_arena_walls(&mut self, size: [Real; 2]) -> Vec<ColliderHandle> {
        let [w, h] = size;
        let thickness = self.config.wall_thickness;
        let t = thickness * 0.5;
        vec![
            self.add_track_boundary(point![0.0, -t], point![w, -t], thickness),
            self.add_track_boundary(point![0.0, h + t], point![w, h + t], thickness),
            self.add_track_boundary(point![-t, 0.0], point![-t, h], thickness),
            self.add_track_boundary(point![w + t, 0.0], point![w + t, h], thickness),
        ]
    }

    pub fn remove_static(&mut self, collider: ColliderHandle) -> bool {
        self.colliders
            .remove(collider, &mut self.island_manager, &mut self.bodies, false)
            .is_some()
    }

    /// Advance the world by `dt`.
    ///
    /// User forces and torques are consumed by this step: they are cleared
    /// afterwards, so whatever the cars accumulated for this tick acts exactly
    /// once. Returns one report per (car, other) pair the solver pushed apart
    /// during this step, carrying the impulse it applied.
    pub fn step(&mut self, dt: Real) -> Vec<ContactReport> {
        let collector = ContactCollector::new();
        let params = IntegrationParameters {
            dt,
            length_unit: self.config.length_unit,
            num_solver_iterations: NonZeroUsize::new(self.config.solver_iterations)
                .unwrap_or(NonZeroUsize::MIN),
            ..IntegrationParameters::default()
        };

        self.pipeline.step(
            &self.gravity,
            &params,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &(),
            &collector,
        );

        for (_, body) in self.bodies.iter_mut() {
            body.reset_forces(false);
            body.reset_torques(false);
        }

        self.recover_non_finite();

        collector.into_reports()
    }

    // Safety: a body whose state went NaN/inf would poison every contact it
    // touches; put it back at the origin, at rest.
    fn recover_non_finite(&mut self) {
        for (handle, body) in self.bodies.iter_mut() {
            let pos = *body.translation();
            let vel = *body.linvel();

            let bad = !pos.x.is_finite() || !pos.y.is_finite()
                || !vel.x.is_finite() || !vel.y.is_finite()
                || !body.angvel().is_finite()
                || !body.rotation().angle().is_finite();

            if bad {
                body.set_position(Isometry::identity(), true);
                body.set_linvel(vector![0.0, 0.0], true);
                body.set_angvel(0.0, true);
                tracing::warn!(?handle, "reset non-finite body back to origin");
            }
        }
    }

    /// Bodies whose colliders contain `point` or lie within `max_distance` of it.
    pub fn bodies_at_point(&mut self, point: Point<Real>, max_distance: Real) -> Vec<RigidBodyHandle> {
        self.query_pipeline.update(&self.colliders);

        let colliders = &self.colliders;
        let mut out: Vec<RigidBodyHandle> = Vec::new();
        let mut push_parent = |handle: ColliderHandle| {
            if let Some(parent) = colliders.get(handle).and_then(|c| c.parent()) {
                if !out.contains(&parent) {
                    out.push(parent);
                }
            }
            true
        };

        if max_distance > 0.0 {
            let probe = Ball::new(max_distance);
            self.query_pipeline.intersections_with_shape(
                &self.bodies,
                colliders,
                &Isometry::translation(point.x, point.y),
                &probe,
                QueryFilter::default(),
                &mut push_parent,
            );
        } else {
            self.query_pipeline.intersections_with_point(
                &self.bodies,
                colliders,
                &point,
                QueryFilter::default(),
                &mut push_parent,
            );
        }

        out
    }

    /// First hit along the segment `start -> end`.
    pub fn raycast(&mut self, start: Point<Real>, end: Point<Real>) -> Option<RayHit> {
        let delta = end - start;
        let length = delta.norm();
        if length <= Real::EPSILON {
            return None;
        }

        self.query_pipeline.update(&self.colliders);

        let ray = Ray::new(start, delta / length);
        let (collider, hit) = self.query_pipeline.cast_ray_and_get_normal(
            &self.bodies,
            &self.colliders,
            &ray,
            length,
            true,
            QueryFilter::default(),
        )?;

        Some(RayHit {
            point: ray.point_at(hit.time_of_impact),
            normal: hit.normal,
            fraction: hit.time_of_impact / length,
            collider,
            body: self.colliders.get(collider).and_then(|c| c.parent()),
        })
    }

    pub fn info(&self) -> WorldInfo {
        WorldInfo {
            bodies: self.bodies.len(),
            colliders: self.colliders.len(),
            gravity: v2(self.gravity),
            damping: self.config.damping,
            iterations: self.config.solver_iterations,
            time_step: self.config.time_step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn car_collider(hx: Real, hy: Real) -> Collider {
        ColliderBuilder::cuboid(hx, hy)
            .density(0.0)
            .collision_groups(CollisionClass::Car.interaction_groups())
            .build()
    }

    fn unit_mass(mass: Real) -> MassProperties {
        MassProperties::new(Point::origin(), mass, mass * 100.0)
    }

    #[test]
    fn new_world_is_empty_and_gravity_free() {
        let world = PhysicsWorld::default();
        let info = world.info();
        assert_eq!(info.bodies, 0);
        assert_eq!(info.colliders, 0);
        assert_eq!(info.gravity, [0.0, 0.0]);
        assert_eq!(info.iterations, 10);
    }

    #[test]
    fn explicit_mass_is_applied_immediately() {
        let mut world = PhysicsWorld::new(WorldConfig::undamped());
        let (h, _) = world.insert_dynamic(vector![0.0, 0.0], 0.0, unit_mass(800.0), car_collider(20.0, 10.0));
        assert_relative_eq!(world.bodies[h].mass(), 800.0, epsilon = 1e-3);

        world.set_mass_properties(h, unit_mass(1200.0));
        assert_relative_eq!(world.bodies[h].mass(), 1200.0, epsilon = 1e-3);
    }

    #[test]
    fn forces_act_for_exactly_one_step() {
        let mut world = PhysicsWorld::new(WorldConfig::undamped());
        let (h, _) = world.insert_dynamic(vector![0.0, 0.0], 0.0, unit_mass(10.0), car_collider(1.0, 1.0));

        world.bodies[h].add_force(vector![600.0, 0.0], true);
        world.step(1.0 / 60.0);
        let v1 = world.bodies[h].linvel().x;
        assert!(v1 > 0.0);
        assert_eq!(world.bodies[h].user_force(), vector![0.0, 0.0]);

        world.step(1.0 / 60.0);
        assert_relative_eq!(world.bodies[h].linvel().x, v1, epsilon = 1e-4);
    }

    /// Fire an 800 kg car at a wall and sum every report it gets.
    /// Returns (reports, total reported impulse, m * dv).
    fn wall_hit(speed: Real) -> (Vec<ContactReport>, Vector<Real>, Vector<Real>) {
        let mut world = PhysicsWorld::new(WorldConfig::undamped());
        let (h, _) = world.insert_car(vector![200.0, 0.0], 0.0, 800.0, 2000.0, vector![20.0, 10.0], 0.9, 0.4);
        world.add_track_boundary(point![0.0, -200.0], point![0.0, 200.0], 20.0);
        world.bodies[h].set_linvel(vector![-speed, 0.0], true);

        let before = *world.bodies[h].linvel();
        let mut reports = Vec::new();
        for _ in 0..90 {
            reports.extend(world.step(1.0 / 60.0));
        }
        let after = *world.bodies[h].linvel();

        let total = reports.iter().fold(Vector::zeros(), |acc, r| acc + r.info.impulse);
        (reports, total, (after - before) * 800.0)
    }

    #[test]
    fn wall_reports_carry_the_solver_impulse() {
        for speed in [300.0, 600.0, 1200.0] {
            let (reports, total, momentum) = wall_hit(speed);

            assert!(!reports.is_empty(), "no report at {speed} px/s");
            for r in &reports {
                assert_eq!(r.info.other.class, CollisionClass::TrackBoundary);
                assert!(r.info.normal.x < -0.5, "normal points from car to wall");
                assert!(r.info.impulse.x > 0.0, "impulse pushes the car off the wall");
            }

            // bounced back out
            assert!(momentum.x > 800.0 * speed);
            assert_relative_eq!(total.x, momentum.x, max_relative = 0.05);

            let strongest = reports.iter().map(|r| r.info.impact()).fold(0.0, Real::max);
            assert!(strongest > 300.0, "impact {strongest} at {speed} px/s");
        }
    }

    #[test]
    fn head_on_reports_are_equal_and_opposite() {
        let mut world = PhysicsWorld::new(WorldConfig::undamped());
        let (ha, a) = world.insert_car(vector![100.0, 0.0], 0.0, 800.0, 2000.0, vector![20.0, 10.0], 0.9, 0.4);
        let (hb, b) = world.insert_car(vector![160.0, 0.0], 0.0, 800.0, 2000.0, vector![20.0, 10.0], 0.9, 0.4);
        world.bodies[ha].set_linvel(vector![900.0, 0.0], true);
        world.bodies[hb].set_linvel(vector![-900.0, 0.0], true);

        let mut on_a = Vector::zeros();
        let mut on_b = Vector::zeros();
        for _ in 0..10 {
            for r in world.step(1.0 / 60.0) {
                assert_eq!(r.info.other.class, CollisionClass::Car);
                if r.collider == a {
                    on_a += r.info.impulse;
                } else if r.collider == b {
                    on_b += r.info.impulse;
                }
            }
        }

        assert!(on_a.x < -300.0);
        assert_relative_eq!(on_a.x, -on_b.x, max_relative = 1e-4);
        let dv_a = world.bodies[ha].linvel().x - 900.0;
        assert_relative_eq!(on_a.x, 800.0 * dv_a, max_relative = 0.05);
    }

    #[test]
    fn remove_body_is_idempotent() {
        let mut world = PhysicsWorld::default();
        let (h, c) = world.insert_dynamic(vector![0.0, 0.0], 0.0, unit_mass(1.0), car_collider(1.0, 1.0));
        assert!(world.remove_body(h));
        assert!(world.colliders.get(c).is_none());
        assert!(!world.remove_body(h));
    }

    #[test]
    fn arena_has_four_static_walls() {
        let mut world = PhysicsWorld::default();
        let walls = world.add_arena_walls([800.0, 600.0]);
        assert_eq!(walls.len(), 4);
        assert_eq!(world.info().colliders, 4);
        assert!(world.remove_static(walls[0]));
        assert!(!world.remove_static(walls[0]));
    }

    #[test]
    fn raycast_hits_the_nearest_wall() {
        let mut world = PhysicsWorld::default();
        world.add_track_boundary(point![100.0, -50.0], point![100.0, 50.0], 10.0);

        let hit = world.raycast(point![0.0, 0.0], point![200.0, 0.0]).expect("ray should hit");
        assert_relative_eq!(hit.point.x, 95.0, epsilon = 1e-2);
        assert_relative_eq!(hit.fraction, 0.475, epsilon = 1e-3);
        assert_relative_eq!(hit.normal.x, -1.0, epsilon = 1e-3);
        assert!(hit.body.is_none());

        assert!(world.raycast(point![0.0, 0.0], point![0.0, 200.0]).is_none());
    }

    #[test]
    fn point_query_finds_bodies() {
        let mut world = PhysicsWorld::default();
        let (h, _) = world.insert_dynamic(vector![50.0, 50.0], 0.0, unit_mass(1.0), car_collider(20.0, 10.0));

        assert_eq!(world.bodies_at_point(point![55.0, 52.0], 0.0), vec![h]);
        assert!(world.bodies_at_point(point![0.0, 0.0], 0.0).is_empty());
        assert_eq!(world.bodies_at_point(point![75.0, 50.0], 10.0), vec![h]);
    }
}
