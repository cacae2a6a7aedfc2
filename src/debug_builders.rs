// ==============================================================================
// debug_builders.rs - DEBUG OVERLAY PRIMITIVES (SERVER -> CLIENT)
// ------------------------------------------------------------------------------
// Defines serializable debug primitives:
// - DebugBox: collider outline (4 world-space corners), coloured by body type
//     dynamic = red, static = green, kinematic = blue
// - DebugRay: velocity direction + magnitude for every dynamic body
// - DebugContact: contact points reported by the last world step
//
// build_overlay() walks the whole world; push_contacts() appends the contact
// reports of the tick that just ran.
//
// This file is purely visualization scaffolding and should not contain physics
// side effects.
// ==============================================================================

use rapier2d::prelude::*;
use serde::Serialize;

use crate::collision::ContactReport;
use crate::physics::{PhysicsWorld, p2, v2};

pub const DYNAMIC_COLOR: [f32; 3] = [1.0, 0.2, 0.2];
pub const STATIC_COLOR: [f32; 3] = [0.2, 1.0, 0.2];
pub const KINEMATIC_COLOR: [f32; 3] = [0.2, 0.4, 1.0];
pub const VELOCITY_COLOR: [f32; 3] = [1.0, 1.0, 0.0];

/// Velocity rays are drawn at this fraction of the speed in px/s.
pub const VELOCITY_RAY_SCALE: f32 = 0.25;

#[derive(Clone, Debug, Default, Serialize)]
pub struct DebugOverlay {
    pub boxes: Vec<DebugBox>,
    pub velocity_rays: Vec<DebugRay>,
    pub contacts: Vec<DebugContact>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DebugBox {
    pub corners: [[f32; 2]; 4],
    pub color: [f32; 3],
}

#[derive(Clone, Debug, Serialize)]
pub struct DebugRay {
    pub origin: [f32; 2],
    pub direction: [f32; 2],
    pub length: f32,
    pub color: [f32; 3],
}

#[derive(Clone, Debug, Serialize)]
pub struct DebugContact {
    pub point: [f32; 2],
    pub normal: [f32; 2],
    pub impact: f32,
}

impl DebugOverlay {
    pub fn clear(&mut self) {
        self.boxes.clear();
        self.velocity_rays.clear();
        self.contacts.clear();
    }
}

fn body_color(world: &PhysicsWorld, collider: &Collider) -> [f32; 3] {
    let Some(body) = collider.parent().and_then(|h| world.bodies.get(h)) else {
        return STATIC_COLOR;
    };
    match body.body_type() {
        RigidBodyType::Dynamic => DYNAMIC_COLOR,
        RigidBodyType::Fixed => STATIC_COLOR,
        RigidBodyType::KinematicPositionBased | RigidBodyType::KinematicVelocityBased => KINEMATIC_COLOR,
    }
}

pub fn build_overlay(world: &PhysicsWorld) -> DebugOverlay {
    let mut overlay = DebugOverlay::default();

    for (_, collider) in world.colliders.iter() {
        // every collider on the track is a cuboid
        let Some(cuboid) = collider.shape().as_cuboid() else { continue };
        let h = cuboid.half_extents;
        let pos = collider.position();

        let corners = [
            point![-h.x, -h.y],
            point![h.x, -h.y],
            point![h.x, h.y],
            point![-h.x, h.y],
        ]
        .map(|c| p2(pos * c));

        overlay.boxes.push(DebugBox { corners, color: body_color(world, collider) });
    }

    for (_, body) in world.bodies.iter() {
        if !body.is_dynamic() {
            continue;
        }
        let v = *body.linvel();
        let speed = v.norm();
        if speed <= f32::EPSILON {
            continue;
        }
        overlay.velocity_rays.push(DebugRay {
            origin: v2(*body.translation()),
            direction: v2(v / speed),
            length: speed * VELOCITY_RAY_SCALE,
            color: VELOCITY_COLOR,
        });
    }

    overlay
}

pub fn push_contacts(overlay: &mut DebugOverlay, reports: &[ContactReport]) {
    overlay.contacts.extend(reports.iter().map(|r| DebugContact {
        point: p2(r.info.point),
        normal: v2(r.info.normal),
        impact: r.info.impact(),
    }));
}
