// ==============================================================================
// state.rs - RACE SESSION (WORLD + CARS + INPUT + CLIENTS)
// ------------------------------------------------------------------------------
// RaceState owns the single PhysicsWorld and everything that lives in it.
//
// tick(dt), in this order:
//   1. per car (by id): resolve controls (analog or smoothed keys)
//      and handle edge-triggered actions (reset / switch physics / pause)
//   2. per car: apply_controls → update
//   3. world.step(dt) exactly once
//   4. contact reports → owning car's on_collision
// Crash / recovery transitions come back as RaceEvents.
//
// While paused only step 1 runs.
// ==============================================================================

use std::collections::{BTreeMap, HashMap};

use rapier2d::prelude::{ColliderHandle, Real, nalgebra, vector};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::car::{Car, CarInfo};
use crate::car_physics::{CarPhysicsConfig, ControlInput, PhysicsModel};
use crate::config::WorldConfig;
use crate::debug_builders::{DebugOverlay, build_overlay, push_contacts};
use crate::error::{RaceError, RaceResult};
use crate::input::{ControlScheme, InputSmoother};
use crate::physics::{PhysicsWorld, WorldInfo};
use crate::spawn::{GridLayout, SpawnInfo, SpawnManager};

/// Where a car's controls come from this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSource {
    Analog(ControlInput),
    Keys(Vec<String>),
}

impl Default for ControlSource {
    fn default() -> Self {
        ControlSource::Analog(ControlInput::default())
    }
}

#[derive(Debug, Default)]
struct Driver {
    source: ControlSource,
    smoother: InputSmoother,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RaceEvent {
    Crashed { car_id: String, impact: f32 },
    Recovered { car_id: String },
    Reset { car_id: String },
    PhysicsSwitched { car_id: String, model: PhysicsModel },
    Paused { paused: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tick: u64,
    pub paused: bool,
    pub cars: Vec<CarInfo>,
    pub world: WorldInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugOverlay>,
}

pub struct RaceState {
    pub tick: u64,
    pub paused: bool,
    pub debug_overlay: bool,
    pub clients: Vec<UnboundedSender<String>>,
    world: PhysicsWorld,
    cars: BTreeMap<String, Car>,
    drivers: BTreeMap<String, Driver>,
    spawns: SpawnManager,
    last_overlay: Option<DebugOverlay>,
}

impl RaceState {
    pub fn new(world_config: WorldConfig) -> Self {
        Self {
            tick: 0,
            paused: false,
            debug_overlay: false,
            clients: Vec::new(),
            world: PhysicsWorld::new(world_config),
            cars: BTreeMap::new(),
            drivers: BTreeMap::new(),
            spawns: SpawnManager::new(GridLayout::default()),
            last_overlay: None,
        }
    }

    /// World with walls around the configured arena.
    pub fn with_arena(world_config: WorldConfig) -> Self {
        let mut state = Self::new(world_config);
        let size = state.world.config.arena_size;
        state.world.add_arena_walls(size);
        state.spawns.set_bounds(size);
        state
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.world
    }

    pub fn car(&self, car_id: &str) -> Option<&Car> {
        self.cars.get(car_id)
    }

    pub fn car_mut(&mut self, car_id: &str) -> Option<&mut Car> {
        self.cars.get_mut(car_id)
    }

    pub fn cars(&self) -> impl Iterator<Item = &Car> {
        self.cars.values()
    }

    pub fn register_client(&mut self, tx: UnboundedSender<String>) {
        self.clients.push(tx);
    }

    // ---------------------------------------------
    // Roster
    // ---------------------------------------------

    pub fn add_car(
        &mut self,
        car_id: impl Into<String>,
        is_player: bool,
        config: Option<CarPhysicsConfig>,
    ) -> RaceResult<SpawnInfo> {
        let car_id = car_id.into();
        if self.cars.contains_key(&car_id) {
            return Err(RaceError::DuplicateCar(car_id));
        }

        let spawn = self.spawns.allocate_spawn(car_id.clone())?;
        let position = vector![spawn.position[0], spawn.position[1]];

        let car = match Car::new(car_id.clone(), &mut self.world, position, spawn.angle, is_player, config, None) {
            Ok(car) => car,
            Err(e) => {
                self.spawns.release(&car_id);
                return Err(e);
            }
        };

        self.cars.insert(car_id.clone(), car);
        self.drivers.insert(car_id, Driver::default());
        Ok(spawn)
    }

    pub fn remove_car(&mut self, car_id: &str) -> RaceResult<()> {
        let mut car = self.cars.remove(car_id).ok_or_else(|| RaceError::UnknownCar(car_id.to_string()))?;
        car.cleanup(&mut self.world);
        self.drivers.remove(car_id);
        self.spawns.release(car_id);
        Ok(())
    }

    fn driver_mut(&mut self, car_id: &str) -> RaceResult<&mut Driver> {
        self.drivers.get_mut(car_id).ok_or_else(|| RaceError::UnknownCar(car_id.to_string()))
    }

    // ---------------------------------------------
    // Inputs + commands
    // ---------------------------------------------

    pub fn set_analog_input(&mut self, car_id: &str, input: ControlInput) -> RaceResult<()> {
        self.driver_mut(car_id)?.source = ControlSource::Analog(input);
        Ok(())
    }

    pub fn set_pressed_keys(&mut self, car_id: &str, keys: Vec<String>) -> RaceResult<()> {
        self.driver_mut(car_id)?.source = ControlSource::Keys(keys);
        Ok(())
    }

    pub fn set_control_scheme(&mut self, car_id: &str, scheme: &str) -> RaceResult<()> {
        let scheme = ControlScheme::by_name(scheme)?;
        self.driver_mut(car_id)?.smoother = InputSmoother::from_scheme(scheme);
        Ok(())
    }

    /// Back to the car's grid slot, at rest.
    pub fn reset_car(&mut self, car_id: &str) -> RaceResult<()> {
        let spawn = self.spawns.spawn_for(car_id).ok_or_else(|| RaceError::UnknownCar(car_id.to_string()))?;
        let car = self.cars.get_mut(car_id).ok_or_else(|| RaceError::UnknownCar(car_id.to_string()))?;
        car.reset_position(&mut self.world, vector![spawn.position[0], spawn.position[1]], spawn.angle);
        tracing::debug!(car_id, "car reset to grid slot {}", spawn.slot);
        Ok(())
    }

    pub fn switch_physics_model(&mut self, car_id: &str, model: &str) -> RaceResult<()> {
        let car = self.cars.get_mut(car_id).ok_or_else(|| RaceError::UnknownCar(car_id.to_string()))?;
        car.switch_physics_model(&mut self.world, model)
    }

    pub fn toggle_physics_model(&mut self, car_id: &str) -> RaceResult<PhysicsModel> {
        let car = self.cars.get_mut(car_id).ok_or_else(|| RaceError::UnknownCar(car_id.to_string()))?;
        car.toggle_physics_model(&mut self.world)
    }

    // ---------------------------------------------
    // Tick
    // ---------------------------------------------

    pub fn tick(&mut self, dt: Real) -> Vec<RaceEvent> {
        self.tick += 1;
        let mut events = Vec::new();

        // 1) inputs, including edge-triggered actions
        let mut controls: BTreeMap<String, ControlInput> = BTreeMap::new();
        let mut resets: Vec<String> = Vec::new();
        let mut toggle_pause = false;

        for (car_id, driver) in self.drivers.iter_mut() {
            let input = match &driver.source {
                ControlSource::Analog(input) => input.clamped(),
                ControlSource::Keys(keys) => {
                    driver.smoother.update(dt, keys);
                    let actions = *driver.smoother.state();

                    if actions.reset {
                        resets.push(car_id.clone());
                    }
                    if actions.switch_physics {
                        if let Some(car) = self.cars.get_mut(car_id) {
                            match car.toggle_physics_model(&mut self.world) {
                                Ok(model) => events.push(RaceEvent::PhysicsSwitched { car_id: car_id.clone(), model }),
                                Err(e) => tracing::warn!(car_id = %car_id, "physics switch failed: {e}"),
                            }
                        }
                    }
                    toggle_pause |= actions.pause;
                    driver.smoother.controls()
                }
            };
            controls.insert(car_id.clone(), input);
        }

        for car_id in resets {
            if self.reset_car(&car_id).is_ok() {
                events.push(RaceEvent::Reset { car_id });
            }
        }

        if toggle_pause {
            self.paused = !self.paused;
            tracing::info!(paused = self.paused, "race pause toggled");
            events.push(RaceEvent::Paused { paused: self.paused });
        }

        if self.paused {
            return events;
        }

        // 2) controls → forces
        for (car_id, car) in self.cars.iter_mut() {
            let input = controls.get(car_id).copied().unwrap_or_default();
            car.apply_controls(input.throttle, input.steering, input.brake);

            let was_crashed = car.is_crashed();
            car.update(&mut self.world, dt);
            if was_crashed && !car.is_crashed() {
                events.push(RaceEvent::Recovered { car_id: car_id.clone() });
            }
        }

        // 3) one world step
        let reports = self.world.step(dt);

        // 4) route contacts
        let owners: HashMap<ColliderHandle, String> = self
            .cars
            .iter()
            .map(|(id, car)| (car.body().collider_handle(), id.clone()))
            .collect();

        for report in &reports {
            let Some(car) = owners.get(&report.collider).and_then(|id| self.cars.get_mut(id)) else {
                continue;
            };
            let was_crashed = car.is_crashed();
            car.on_collision(&report.info);
            if !was_crashed && car.is_crashed() {
                events.push(RaceEvent::Crashed { car_id: car.id().to_string(), impact: report.info.impact() });
            }
        }

        self.last_overlay = self.debug_overlay.then(|| {
            let mut overlay = build_overlay(&self.world);
            push_contacts(&mut overlay, &reports);
            overlay
        });

        events
    }

    // ---------------------------------------------
    // Snapshots
    // ---------------------------------------------

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            kind: "snapshot",
            tick: self.tick,
            paused: self.paused,
            cars: self.cars.values().map(|car| car.info(&self.world)).collect(),
            world: self.world.info(),
            debug: if self.debug_overlay { self.last_overlay.clone() } else { None },
        }
    }

    /// Build and send a snapshot to all clients; drops clients whose
    /// channel has closed.
    pub fn broadcast_snapshot(&mut self) {
        let json = match serde_json::to_string(&self.snapshot()) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("snapshot serialization failed: {e}");
                return;
            }
        };

        self.clients.retain(|tx| tx.send(json.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::ModelTag;
    use tokio::sync::mpsc;

    const DT: Real = 1.0 / 60.0;

    fn race() -> RaceState {
        RaceState::new(WorldConfig::undamped())
    }

    #[test]
    fn cars_take_grid_slots() {
        let mut race = race();
        let a = race.add_car("a", true, None).unwrap();
        let b = race.add_car("b", false, None).unwrap();
        assert_eq!((a.slot, b.slot), (0, 1));

        let pos = race.car("b").unwrap().position(race.world());
        assert_eq!([pos.x, pos.y], b.position);
    }

    #[test]
    fn duplicate_and_unknown_ids_are_errors() {
        let mut race = race();
        race.add_car("a", true, None).unwrap();
        assert_eq!(race.add_car("a", true, None).unwrap_err(), RaceError::DuplicateCar("a".into()));
        assert!(matches!(race.remove_car("zzz"), Err(RaceError::UnknownCar(_))));
        assert!(matches!(race.set_analog_input("zzz", ControlInput::default()), Err(RaceError::UnknownCar(_))));
    }

    #[test]
    fn invalid_config_frees_the_slot() {
        let mut race = race();
        let bad = CarPhysicsConfig { mass: 0.0, ..CarPhysicsConfig::ARCADE };
        assert!(race.add_car("a", true, Some(bad)).is_err());
        assert_eq!(race.add_car("b", true, None).unwrap().slot, 0);
    }

    #[test]
    fn analog_input_drives_the_car() {
        let mut race = race();
        race.add_car("a", true, None).unwrap();
        race.set_analog_input("a", ControlInput::new(1.0, 0.0, 0.0)).unwrap();

        for _ in 0..30 {
            race.tick(DT);
        }
        let car = race.car("a").unwrap();
        assert!(car.forward_speed(race.world()) > 0.0);
        assert!(car.state().distance_traveled > 0.0);
        assert_eq!(race.tick, 30);
    }

    #[test]
    fn keys_are_smoothed() {
        let mut race = race();
        race.add_car("a", true, None).unwrap();
        race.set_pressed_keys("a", vec!["KeyW".into()]).unwrap();
        race.tick(DT);
        let throttle = race.car("a").unwrap().controls().throttle;
        assert!(throttle > 0.0 && throttle < 1.0);
    }

    #[test]
    fn tab_toggles_physics_model_once_per_press() {
        let mut race = race();
        race.add_car("a", true, None).unwrap();
        race.set_pressed_keys("a", vec!["Tab".into()]).unwrap();

        let events = race.tick(DT);
        assert!(events.contains(&RaceEvent::PhysicsSwitched { car_id: "a".into(), model: PhysicsModel::Realistic }));
        race.tick(DT);
        assert_eq!(race.car("a").unwrap().physics_model(), ModelTag::Realistic);
    }

    #[test]
    fn pause_freezes_the_world_but_not_input() {
        let mut race = race();
        race.add_car("a", true, None).unwrap();
        race.set_analog_input("a", ControlInput::new(1.0, 0.0, 0.0)).unwrap();
        race.tick(DT);

        race.set_pressed_keys("a", vec!["KeyP".into()]).unwrap();
        let events = race.tick(DT);
        assert!(events.contains(&RaceEvent::Paused { paused: true }));

        let before = race.car("a").unwrap().position(race.world());
        race.tick(DT);
        race.tick(DT);
        assert_eq!(race.car("a").unwrap().position(race.world()), before);

        race.set_pressed_keys("a", vec![]).unwrap();
        race.tick(DT);
        race.set_pressed_keys("a", vec!["KeyP".into()]).unwrap();
        assert!(race.tick(DT).contains(&RaceEvent::Paused { paused: false }));
    }

    #[test]
    fn reset_key_returns_car_to_its_slot() {
        let mut race = race();
        let spawn = race.add_car("a", true, None).unwrap();
        race.set_analog_input("a", ControlInput::new(1.0, 0.5, 0.0)).unwrap();
        for _ in 0..20 {
            race.tick(DT);
        }

        race.set_pressed_keys("a", vec!["KeyR".into()]).unwrap();
        let events = race.tick(DT);
        assert!(events.contains(&RaceEvent::Reset { car_id: "a".into() }));

        race.reset_car("a").unwrap();
        let car = race.car("a").unwrap();
        let pos = car.position(race.world());
        assert_eq!([pos.x, pos.y], spawn.position);
        assert_eq!(car.speed(race.world()), 0.0);
    }

    #[test]
    fn switch_model_by_name() {
        let mut race = race();
        race.add_car("a", true, None).unwrap();
        race.switch_physics_model("a", "realistic").unwrap();
        assert_eq!(race.car("a").unwrap().physics_model(), ModelTag::Realistic);
        assert!(matches!(race.switch_physics_model("a", "bogus"), Err(RaceError::InvalidPhysicsModel(_))));
        assert!(matches!(race.set_control_scheme("a", "joystick"), Err(RaceError::UnknownControlScheme { .. })));
        race.set_control_scheme("a", "arcade").unwrap();
    }

    #[test]
    fn head_on_collision_crashes_both_and_they_recover() {
        let mut race = race();
        race.add_car("a", false, None).unwrap();
        race.add_car("b", false, None).unwrap();

        // park them nose to nose and fire them at each other
        let ha = race.cars["a"].body().body_handle();
        let hb = race.cars["b"].body().body_handle();
        if let Some(a) = race.cars.get_mut("a") {
            a.reset_position(&mut race.world, vector![100.0, 300.0], 0.0);
        }
        if let Some(b) = race.cars.get_mut("b") {
            b.reset_position(&mut race.world, vector![160.0, 300.0], std::f32::consts::PI);
        }
        race.world.bodies[ha].set_linvel(vector![900.0, 0.0], true);
        race.world.bodies[hb].set_linvel(vector![-900.0, 0.0], true);

        let mut crashed = Vec::new();
        let mut recovered = Vec::new();
        for _ in 0..200 {
            for event in race.tick(DT) {
                match event {
                    RaceEvent::Crashed { car_id, impact } => {
                        assert!(impact > 300.0);
                        crashed.push(car_id);
                    }
                    RaceEvent::Recovered { car_id } => recovered.push(car_id),
                    _ => {}
                }
            }
        }

        crashed.sort();
        crashed.dedup();
        assert_eq!(crashed, vec!["a".to_string(), "b".to_string()]);
        assert!(!recovered.is_empty());
    }

    #[test]
    fn wall_hits_crash_the_car_at_any_speed() {
        for speed in [300.0, 600.0, 1200.0] {
            let mut race = RaceState::with_arena(WorldConfig::undamped());
            race.add_car("a", true, None).unwrap();
            let h = race.cars["a"].body().body_handle();
            race.world.bodies[h].set_linvel(vector![-speed, 0.0], true);

            let mut impact = None;
            for _ in 0..180 {
                for event in race.tick(DT) {
                    if let RaceEvent::Crashed { impact: hit, .. } = event {
                        impact.get_or_insert(hit);
                    }
                }
            }

            let impact = impact.unwrap_or_else(|| panic!("no crash at {speed} px/s"));
            assert!(impact > 300.0);
            assert!(race.car("a").unwrap().position(race.world()).x > 0.0);
        }
    }

    #[test]
    fn a_crowded_grid_keeps_every_car_off_the_walls() {
        let mut race = RaceState::with_arena(WorldConfig::undamped());
        for i in 0..24 {
            race.add_car(format!("car{i}"), false, None).unwrap();
        }
        race.tick(DT);

        let [w, h] = race.world().config.arena_size;
        for car in race.cars() {
            let p = car.position(race.world());
            assert!(p.x > 20.0 && p.x < w - 20.0, "{} at {p:?}", car.id());
            assert!(p.y > 20.0 && p.y < h - 20.0, "{} at {p:?}", car.id());
            assert!(!car.is_crashed(), "{} spawned into something", car.id());
        }
    }

    #[test]
    fn remove_car_cleans_up_the_world() {
        let mut race = race();
        race.add_car("a", true, None).unwrap();
        assert_eq!(race.world().info().bodies, 1);
        race.remove_car("a").unwrap();
        assert_eq!(race.world().info().bodies, 0);
        assert!(race.car("a").is_none());
        assert_eq!(race.add_car("b", true, None).unwrap().slot, 0);
    }

    #[test]
    fn broadcast_reaches_clients_and_drops_closed_ones() {
        let mut race = race();
        race.add_car("a", true, None).unwrap();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        race.register_client(tx1);
        race.register_client(tx2);
        drop(rx2);

        race.tick(DT);
        race.broadcast_snapshot();
        assert_eq!(race.clients.len(), 1);

        let msg = rx1.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["tick"], 1);
        assert_eq!(json["cars"][0]["car_id"], "a");
        assert!(json.get("debug").is_none());
    }

    #[test]
    fn debug_overlay_rides_along_when_enabled() {
        let mut race = RaceState::with_arena(WorldConfig::default());
        race.debug_overlay = true;
        race.add_car("a", true, None).unwrap();
        race.tick(DT);

        let snap = race.snapshot();
        let overlay = snap.debug.expect("overlay enabled");
        assert_eq!(overlay.boxes.len(), 5);
    }
}
