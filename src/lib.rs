pub mod car;
pub mod car_physics;
pub mod collision;
pub mod config;
pub mod debug_builders;
pub mod error;
pub mod input;
pub mod net;
pub mod physics;
pub mod spawn;
pub mod state;

pub use car::{Car, CarInfo, CarState, ModelTag};
pub use car_physics::{CarPhysicsBody, CarPhysicsConfig, ControlInput, PhysicsInfo, PhysicsModel};
pub use collision::{CollisionClass, CollisionInfo};
pub use config::{ServerConfig, WorldConfig};
pub use error::{RaceError, RaceResult};
pub use input::{ControlScheme, InputSmoother};
pub use physics::PhysicsWorld;
pub use state::{RaceEvent, RaceState};
