//! car_physics - one car's rigid body, its tuning and the force model that drives it

pub mod body;
pub mod config;
pub mod kinematics;
pub mod types;

pub use body::{BodyCollisionCallback, CarPhysicsBody};
pub use config::{CarPhysicsConfig, PhysicsModel};
pub use types::{ControlInput, PhysicsInfo};
