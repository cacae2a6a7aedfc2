// ==============================================================================
// collision.rs - COLLISION CLASSES + CONTACT REPORTS
// ------------------------------------------------------------------------------
// Two collision classes exist on the track:
// - Car: every car chassis collider
// - TrackBoundary: static walls
//
// During each world step ContactCollector receives every solved pair that
// involves a car and turns it into one ContactReport per car collider.
// Reports never alter the solver's resolution; they only describe what the
// solver did.
//
// Observers (single-slot callbacks on bodies and cars) are invoked through
// isolate(), so a panicking observer is logged and the tick carries on.
// ==============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError};

use rapier2d::prelude::*;
use serde::Serialize;

pub const GROUP_CAR: Group = Group::from_bits_truncate(0b0001);
pub const GROUP_BOUNDARY: Group = Group::from_bits_truncate(0b0010);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionClass {
    Car,
    TrackBoundary,
}

impl CollisionClass {
    /// Membership + filter for colliders of this class. Boundaries never
    /// interact with each other.
    pub fn interaction_groups(self) -> InteractionGroups {
        match self {
            CollisionClass::Car => InteractionGroups::new(GROUP_CAR, GROUP_CAR | GROUP_BOUNDARY),
            CollisionClass::TrackBoundary => InteractionGroups::new(GROUP_BOUNDARY, GROUP_CAR),
        }
    }

    pub fn of(collider: &Collider) -> Option<Self> {
        let memberships = collider.collision_groups().memberships;
        if memberships.contains(GROUP_CAR) {
            Some(CollisionClass::Car)
        } else if memberships.contains(GROUP_BOUNDARY) {
            Some(CollisionClass::TrackBoundary)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CollisionClass::Car => "car",
            CollisionClass::TrackBoundary => "track_boundary",
        }
    }
}

/// The shape on the other side of a contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OtherShape {
    pub collider: ColliderHandle,
    pub class: CollisionClass,
}

/// One contact as seen from a car.
///
/// `normal` points from the car towards the other shape; `impulse` is the
/// total impulse the solver applied to the car during the step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionInfo {
    pub point: Point<Real>,
    pub normal: Vector<Real>,
    pub impulse: Vector<Real>,
    pub other: OtherShape,
}

impl CollisionInfo {
    pub fn impact(&self) -> Real {
        self.impulse.norm()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactReport {
    /// The car collider this report belongs to.
    pub collider: ColliderHandle,
    pub info: CollisionInfo,
}

/// Per-car reports for one contact pair, read while the solver impulses of
/// the current step are still stored on its manifolds.
///
/// The impulse on collider1 is `-normal * jn + tangent * jt` summed over
/// every solved point, with `tangent = (n.y, -n.x)`; collider2 receives the
/// opposite.
pub fn pair_reports(pair: &ContactPair, colliders: &ColliderSet) -> Vec<ContactReport> {
    let mut out = Vec::new();

    let (Some(c1), Some(c2)) = (colliders.get(pair.collider1), colliders.get(pair.collider2)) else {
        return out;
    };
    let (Some(k1), Some(k2)) = (CollisionClass::of(c1), CollisionClass::of(c2)) else {
        return out;
    };
    if k1 != CollisionClass::Car && k2 != CollisionClass::Car {
        return out;
    }

    let mut on_first: Vector<Real> = Vector::zeros();
    let mut first: Option<(Point<Real>, Vector<Real>)> = None;

    for manifold in &pair.manifolds {
        let n = manifold.data.normal;
        let tangent = vector![n.y, -n.x];

        for p in &manifold.points {
            on_first += -n * p.data.impulse + tangent * p.data.tangent_impulse.x;
        }

        if first.is_none() {
            let point = match manifold.data.solver_contacts.first() {
                Some(contact) => Some(contact.point),
                None => manifold.points.first().map(|p| c1.position() * p.local_p1),
            };
            first = point.map(|point| (point, n));
        }
    }

    let Some((point, normal)) = first else { return out };

    if k1 == CollisionClass::Car {
        out.push(ContactReport {
            collider: pair.collider1,
            info: CollisionInfo {
                point,
                normal,
                impulse: on_first,
                other: OtherShape { collider: pair.collider2, class: k2 },
            },
        });
    }
    if k2 == CollisionClass::Car {
        out.push(ContactReport {
            collider: pair.collider2,
            info: CollisionInfo {
                point,
                normal: -normal,
                impulse: -on_first,
                other: OtherShape { collider: pair.collider1, class: k1 },
            },
        });
    }

    out
}

/// Step event handler gathering car contact reports.
///
/// Rapier calls `handle_contact_force_event` right after the velocity solve,
/// before the end-of-step collision detection rebuilds the manifolds, so the
/// impulses read here are the ones that changed the bodies' velocities. Car
/// colliders opt in with `ActiveEvents::CONTACT_FORCE_EVENTS`. A pair solved
/// in several CCD substeps is merged into one report per car.
#[derive(Debug, Default)]
pub struct ContactCollector {
    reports: Mutex<Vec<ContactReport>>,
}

impl ContactCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_reports(self) -> Vec<ContactReport> {
        self.reports.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn merge(&self, fresh: Vec<ContactReport>) {
        let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        for report in fresh {
            let same_pair = reports
                .iter_mut()
                .find(|r| r.collider == report.collider && r.info.other.collider == report.info.other.collider);
            match same_pair {
                Some(existing) => existing.info.impulse += report.info.impulse,
                None => reports.push(report),
            }
        }
    }
}

impl EventHandler for ContactCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        colliders: &ColliderSet,
        contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
        let fresh = pair_reports(contact_pair, colliders);
        if !fresh.is_empty() {
            self.merge(fresh);
        }
    }
}

/// Run an observer, logging instead of propagating a panic.
pub(crate) fn isolate<F: FnOnce()>(observer: &str, f: F) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(observer, "collision observer panicked: {msg}");
            false
        }
    }
}
