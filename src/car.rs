// ==============================================================================
// car.rs - CAR ENTITY (GAMEPLAY STATE AROUND A CAR PHYSICS BODY)
// ------------------------------------------------------------------------------
// A Car owns exactly one CarPhysicsBody plus race bookkeeping:
// - laps (count, running lap time, best lap)
// - metrics (top speed, distance travelled)
// - crash lifecycle
//
// Crash lifecycle:
//   Normal  --impact > crash_threshold-->  Crashed (timer = RESPAWN_DELAY)
//   Crashed --each update: timer -= dt-->  Crashed, no driving forces
//   Crashed --timer <= 0-->                Normal, velocities zeroed in place
//
// Contacts reach the car through on_collision(), called by whoever steps the
// world (RaceState). The car applies the crash policy first, then forwards the
// raw contact to the body's slot and to its own slot.
// ==============================================================================

use std::fmt;

use rapier2d::prelude::{Real, Vector};
use serde::Serialize;

use crate::car_physics::{CarPhysicsBody, CarPhysicsConfig, ControlInput, PhysicsModel};
use crate::collision::{CollisionInfo, isolate};
use crate::error::RaceResult;
use crate::physics::{PhysicsWorld, v2};

pub type Rgb = [u8; 3];

pub const PLAYER_COLOR: Rgb = [220, 50, 50];
pub const AI_PALETTE: [Rgb; 3] = [[120, 120, 120], [80, 80, 80], [60, 60, 60]];

pub const DEFAULT_CRASH_THRESHOLD: Real = 300.0;
pub const RESPAWN_DELAY: Real = 2.0;

/// How much each channel drops while the car is crashed.
pub const CRASH_DARKEN: u8 = 50;

pub type CarCollisionCallback = Box<dyn FnMut(&Car, &CollisionInfo) + Send>;

// ---------------------------------------------
// STATE
// ---------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarState {
    pub car_id: String,
    pub is_player: bool,

    pub current_lap: u32,
    pub lap_time: Real,
    pub best_lap_time: Option<Real>,
    pub position_in_race: u32,

    pub top_speed: Real,
    pub distance_traveled: Real,

    pub is_finished: bool,
    pub is_crashed: bool,
    pub respawn_timer: Real,
}

impl CarState {
    pub fn new(car_id: impl Into<String>, is_player: bool) -> Self {
        Self {
            car_id: car_id.into(),
            is_player,
            current_lap: 0,
            lap_time: 0.0,
            best_lap_time: None,
            position_in_race: 1,
            top_speed: 0.0,
            distance_traveled: 0.0,
            is_finished: false,
            is_crashed: false,
            respawn_timer: 0.0,
        }
    }
}

/// Which tuning the car is running. Set whenever the config changes, never
/// guessed from the config's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTag {
    Arcade,
    Realistic,
    Custom,
}

impl ModelTag {
    pub fn for_config(config: &CarPhysicsConfig) -> Self {
        if *config == CarPhysicsConfig::ARCADE {
            ModelTag::Arcade
        } else if *config == CarPhysicsConfig::REALISTIC {
            ModelTag::Realistic
        } else {
            ModelTag::Custom
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTag::Arcade => "arcade",
            ModelTag::Realistic => "realistic",
            ModelTag::Custom => "custom",
        }
    }
}

impl From<PhysicsModel> for ModelTag {
    fn from(model: PhysicsModel) -> Self {
        match model {
            PhysicsModel::Arcade => ModelTag::Arcade,
            PhysicsModel::Realistic => ModelTag::Realistic,
        }
    }
}

/// Flat snapshot for HUD / network. Angle in degrees, speeds in px/s.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarInfo {
    pub car_id: String,
    pub is_player: bool,
    pub is_crashed: bool,
    pub is_finished: bool,

    pub current_lap: u32,
    pub lap_time: f32,
    pub best_lap_time: Option<f32>,
    pub position_in_race: u32,

    pub top_speed: f32,
    pub distance_traveled: f32,

    pub position: [f32; 2],
    pub angle_degrees: f32,
    pub speed: f32,
    pub forward_speed: f32,
    pub lateral_speed: f32,
    pub is_sliding: bool,

    pub throttle: f32,
    pub steering: f32,
    pub brake: f32,

    pub physics_model: ModelTag,
    pub mass: f32,
    pub color: Rgb,
}

/// 32-bit FNV-1a; stable across runs and platforms.
fn fnv1a(text: &str) -> u32 {
    text.bytes()
        .fold(0x811c_9dc5_u32, |hash, b| (hash ^ b as u32).wrapping_mul(0x0100_0193))
}

pub fn default_color(car_id: &str, is_player: bool) -> Rgb {
    if is_player {
        PLAYER_COLOR
    } else {
        AI_PALETTE[fnv1a(car_id) as usize % AI_PALETTE.len()]
    }
}

// ---------------------------------------------
// CAR
// ---------------------------------------------

pub struct Car {
    state: CarState,
    body: CarPhysicsBody,
    color: Rgb,
    controls: ControlInput,
    model: ModelTag,
    crash_threshold: Real,
    last_position: Vector<Real>,
    collision_callback: Option<CarCollisionCallback>,
}

impl fmt::Debug for Car {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Car")
            .field("state", &self.state)
            .field("body", &self.body)
            .field("color", &self.color)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Car {
    /// Build the car's body in `world`. No config means the arcade preset.
    pub fn new(
        car_id: impl Into<String>,
        world: &mut PhysicsWorld,
        position: Vector<Real>,
        angle: Real,
        is_player: bool,
        config: Option<CarPhysicsConfig>,
        color: Option<Rgb>,
    ) -> RaceResult<Self> {
        let car_id = car_id.into();
        let config = config.unwrap_or(CarPhysicsConfig::ARCADE);
        let body = CarPhysicsBody::new(world, position, angle, config)?;

        tracing::info!(car_id = %car_id, is_player, "car created");

        Ok(Self {
            color: color.unwrap_or_else(|| default_color(&car_id, is_player)),
            state: CarState::new(car_id, is_player),
            body,
            controls: ControlInput::default(),
            model: ModelTag::for_config(&config),
            crash_threshold: DEFAULT_CRASH_THRESHOLD,
            last_position: position,
            collision_callback: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.state.car_id
    }

    pub fn state(&self) -> &CarState {
        &self.state
    }

    pub fn body(&self) -> &CarPhysicsBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut CarPhysicsBody {
        &mut self.body
    }

    pub fn is_player(&self) -> bool {
        self.state.is_player
    }

    pub fn is_crashed(&self) -> bool {
        self.state.is_crashed
    }

    pub fn controls(&self) -> ControlInput {
        self.controls
    }

    pub fn physics_model(&self) -> ModelTag {
        self.model
    }

    pub fn crash_threshold(&self) -> Real {
        self.crash_threshold
    }

    pub fn set_crash_threshold(&mut self, threshold: Real) {
        self.crash_threshold = threshold;
    }

    pub fn color(&self) -> Rgb {
        self.color
    }

    /// Colour to draw with: darker while crashed.
    pub fn render_color(&self) -> Rgb {
        if self.state.is_crashed {
            self.color.map(|c| c.saturating_sub(CRASH_DARKEN))
        } else {
            self.color
        }
    }

    // ---------------------------------------------
    // Per tick
    // ---------------------------------------------

    pub fn apply_controls(&mut self, throttle: Real, steering: Real, brake: Real) {
        self.controls = ControlInput::new(throttle, steering, brake).clamped();
        let ControlInput { throttle, steering, brake } = self.controls;
        self.body.apply_controls(throttle, steering, brake);
    }

    pub fn update(&mut self, world: &mut PhysicsWorld, dt: Real) {
        if self.state.is_crashed && self.state.respawn_timer > 0.0 {
            self.state.respawn_timer -= dt;
            if self.state.respawn_timer <= 0.0 {
                self.state.is_crashed = false;
                self.state.respawn_timer = 0.0;
                self.body.halt(world);
                tracing::debug!(car_id = %self.state.car_id, "car recovered");
            }
        }

        if !self.state.is_crashed {
            self.body.update_physics(world, dt);
        }

        self.update_metrics(world);

        // runs while crashed too
        self.state.lap_time += dt;
    }

    fn update_metrics(&mut self, world: &PhysicsWorld) {
        let position = self.body.position(world);
        self.state.distance_traveled += (position - self.last_position).norm();
        self.last_position = position;

        let speed = self.body.speed(world);
        if speed > self.state.top_speed {
            self.state.top_speed = speed;
        }
    }

    // ---------------------------------------------
    // Collisions
    // ---------------------------------------------

    /// Replaces any previously registered callback.
    pub fn set_collision_callback(&mut self, callback: CarCollisionCallback) {
        self.collision_callback = Some(callback);
    }

    pub fn clear_collision_callback(&mut self) {
        self.collision_callback = None;
    }

    /// Apply the crash policy to one contact, then forward it. Returns true
    /// when the impact was hard enough to (re)start the crash timer.
    pub fn on_collision(&mut self, info: &CollisionInfo) -> bool {
        let impact = info.impact();
        let crashed = impact > self.crash_threshold;
        if crashed {
            if !self.state.is_crashed {
                tracing::debug!(car_id = %self.state.car_id, impact, "car crashed");
            }
            self.state.is_crashed = true;
            self.state.respawn_timer = RESPAWN_DELAY;
        }

        self.body.notify_collision(info);

        if let Some(mut callback) = self.collision_callback.take() {
            isolate("car", || callback(self, info));
            self.collision_callback = Some(callback);
        }

        crashed
    }

    // ---------------------------------------------
    // Race progress
    // ---------------------------------------------

    pub fn reset_position(&mut self, world: &mut PhysicsWorld, position: Vector<Real>, angle: Real) {
        self.body.reset_position(world, position, angle);
        self.state.is_crashed = false;
        self.state.respawn_timer = 0.0;
        self.last_position = position;
    }

    pub fn complete_lap(&mut self, lap_time: Real) {
        self.state.current_lap += 1;
        if self.state.best_lap_time.is_none_or(|best| lap_time < best) {
            self.state.best_lap_time = Some(lap_time);
        }
        self.state.lap_time = 0.0;
    }

    pub fn finish_race(&mut self, final_position: u32) {
        self.state.is_finished = true;
        self.state.position_in_race = final_position;
    }

    pub fn set_race_position(&mut self, position: u32) {
        self.state.position_in_race = position;
    }

    // ---------------------------------------------
    // Physics model
    // ---------------------------------------------

    /// "arcade" or "realistic"; anything else fails and changes nothing.
    pub fn switch_physics_model(&mut self, world: &mut PhysicsWorld, name: &str) -> RaceResult<()> {
        let model = PhysicsModel::parse(name)?;
        self.set_physics_model(world, model)
    }

    pub fn set_physics_model(&mut self, world: &mut PhysicsWorld, model: PhysicsModel) -> RaceResult<()> {
        self.body.switch_config(world, model.config())?;
        self.model = model.into();
        tracing::debug!(car_id = %self.state.car_id, model = model.as_str(), "physics model switched");
        Ok(())
    }

    /// Arcade <-> realistic; a custom config goes to arcade.
    pub fn toggle_physics_model(&mut self, world: &mut PhysicsWorld) -> RaceResult<PhysicsModel> {
        let next = match self.model {
            ModelTag::Arcade => PhysicsModel::Realistic,
            ModelTag::Realistic | ModelTag::Custom => PhysicsModel::Arcade,
        };
        self.set_physics_model(world, next)?;
        Ok(next)
    }

    pub fn switch_config(&mut self, world: &mut PhysicsWorld, config: CarPhysicsConfig) -> RaceResult<()> {
        self.body.switch_config(world, config)?;
        self.model = ModelTag::for_config(&config);
        Ok(())
    }

    // ---------------------------------------------
    // Queries
    // ---------------------------------------------

    pub fn position(&self, world: &PhysicsWorld) -> Vector<Real> {
        self.body.position(world)
    }

    pub fn angle_radians(&self, world: &PhysicsWorld) -> Real {
        self.body.angle(world)
    }

    pub fn angle_degrees(&self, world: &PhysicsWorld) -> Real {
        self.body.angle(world).to_degrees()
    }

    pub fn velocity(&self, world: &PhysicsWorld) -> Vector<Real> {
        self.body.velocity(world)
    }

    pub fn speed(&self, world: &PhysicsWorld) -> Real {
        self.body.speed(world)
    }

    pub fn forward_speed(&self, world: &PhysicsWorld) -> Real {
        self.body.forward_speed(world)
    }

    pub fn lateral_speed(&self, world: &PhysicsWorld) -> Real {
        self.body.lateral_speed(world)
    }

    pub fn is_sliding(&self, world: &PhysicsWorld) -> bool {
        self.body.is_sliding(world)
    }

    pub fn info(&self, world: &PhysicsWorld) -> CarInfo {
        let physics = self.body.physics_info(world);
        let s = &self.state;

        CarInfo {
            car_id: s.car_id.clone(),
            is_player: s.is_player,
            is_crashed: s.is_crashed,
            is_finished: s.is_finished,
            current_lap: s.current_lap,
            lap_time: s.lap_time,
            best_lap_time: s.best_lap_time,
            position_in_race: s.position_in_race,
            top_speed: s.top_speed,
            distance_traveled: s.distance_traveled,
            position: physics.position,
            angle_degrees: physics.angle.to_degrees(),
            speed: physics.speed,
            forward_speed: physics.forward_speed,
            lateral_speed: physics.lateral_speed,
            is_sliding: physics.is_sliding,
            throttle: self.controls.throttle,
            steering: self.controls.steering,
            brake: self.controls.brake,
            physics_model: self.model,
            mass: physics.mass,
            color: self.render_color(),
        }
    }

    /// Remove the body from the world; later calls are no-ops.
    pub fn cleanup(&mut self, world: &mut PhysicsWorld) -> bool {
        let removed = self.body.cleanup(world);
        if removed {
            tracing::info!(car_id = %self.state.car_id, "car removed");
        }
        removed
    }

    /// Where the car currently sits, for renderers that want plain arrays.
    pub fn render_pose(&self, world: &PhysicsWorld) -> ([f32; 2], f32) {
        (v2(self.position(world)), self.angle_degrees(world))
    }
}
