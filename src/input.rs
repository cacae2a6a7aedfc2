// ==============================================================================
// input.rs - KEYBOARD → SMOOTHED CAR CONTROLS
// ------------------------------------------------------------------------------
// Keys are opaque strings (browser KeyboardEvent.code: "KeyW", "ArrowUp", ...).
// Each frame the host hands over the full set of keys currently held.
//
// Analog channels (accelerate, brake, steer_left, steer_right, reverse):
//   held     → value += smoothing           (per frame, NOT scaled by dt)
//   released → value -= decay * dt
//   clamp to [0, 1], then anything under the deadzone snaps to 0
//
// Digital actions (pause, reset, switch_physics) are edge-triggered: true only
// on the frame their key goes down, and that is when their callback fires.
//
// controls(): throttle = -reverse if reversing else accelerate,
//             steering = right - left, brake = brake
// ==============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use rapier2d::prelude::Real;
use serde::{Deserialize, Serialize};

use crate::car_physics::ControlInput;
use crate::collision::isolate;
use crate::error::{RaceError, RaceResult};

/// One second of frames at 60 Hz.
pub const MAX_HISTORY: usize = 60;

pub type ActionCallback = Box<dyn FnMut() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputAction {
    Accelerate,
    Brake,
    SteerLeft,
    SteerRight,
    Reverse,
    Pause,
    Reset,
    SwitchPhysics,
}

impl InputAction {
    pub fn description(&self) -> &'static str {
        match self {
            InputAction::Accelerate => "Accelerate Forward",
            InputAction::Brake => "Brake",
            InputAction::SteerLeft => "Steer Left",
            InputAction::SteerRight => "Steer Right",
            InputAction::Reverse => "Reverse",
            InputAction::Pause => "Pause Game",
            InputAction::Reset => "Reset Car",
            InputAction::SwitchPhysics => "Switch Physics Model",
        }
    }
}

// ---------------------------------------------
// CONFIG + SCHEMES
// ---------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    pub key_mappings: BTreeMap<String, InputAction>,
    pub acceleration_smoothing: Real,
    pub steering_smoothing: Real,
    pub brake_smoothing: Real,
    pub acceleration_decay: Real,
    pub steering_decay: Real,
    pub brake_decay: Real,
    pub input_deadzone: Real,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self::with_mappings(combined_keys())
    }
}

impl InputConfig {
    fn with_mappings(key_mappings: BTreeMap<String, InputAction>) -> Self {
        Self {
            key_mappings,
            acceleration_smoothing: 0.1,
            steering_smoothing: 0.05,
            brake_smoothing: 0.05,
            acceleration_decay: 0.2,
            steering_decay: 0.15,
            brake_decay: 0.3,
            input_deadzone: 0.05,
        }
    }
}

fn keymap(pairs: &[(&str, InputAction)]) -> BTreeMap<String, InputAction> {
    pairs.iter().map(|(k, a)| (k.to_string(), *a)).collect()
}

const SHARED_DIGITAL: [(&str, InputAction); 3] = [
    ("KeyP", InputAction::Pause),
    ("KeyR", InputAction::Reset),
    ("Tab", InputAction::SwitchPhysics),
];

fn wasd_keys() -> BTreeMap<String, InputAction> {
    let mut keys = keymap(&[
        ("KeyW", InputAction::Accelerate),
        ("KeyS", InputAction::Brake),
        ("KeyA", InputAction::SteerLeft),
        ("KeyD", InputAction::SteerRight),
        ("ShiftLeft", InputAction::Reverse),
        ("Space", InputAction::Brake),
    ]);
    keys.extend(keymap(&SHARED_DIGITAL));
    keys
}

fn arrow_keys() -> BTreeMap<String, InputAction> {
    let mut keys = keymap(&[
        ("ArrowUp", InputAction::Accelerate),
        ("ArrowDown", InputAction::Brake),
        ("ArrowLeft", InputAction::SteerLeft),
        ("ArrowRight", InputAction::SteerRight),
        ("ShiftRight", InputAction::Reverse),
        ("ControlRight", InputAction::Brake),
    ]);
    keys.extend(keymap(&SHARED_DIGITAL));
    keys
}

fn combined_keys() -> BTreeMap<String, InputAction> {
    let mut keys = wasd_keys();
    keys.extend(keymap(&[
        ("ArrowUp", InputAction::Accelerate),
        ("ArrowDown", InputAction::Brake),
        ("ArrowLeft", InputAction::SteerLeft),
        ("ArrowRight", InputAction::SteerRight),
        ("ShiftRight", InputAction::Reverse),
    ]));
    keys
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlScheme {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub input_config: InputConfig,
}

impl ControlScheme {
    pub fn combined() -> Self {
        Self {
            id: "combined",
            name: "Combined",
            description: "Both WASD and Arrow keys supported",
            input_config: InputConfig::default(),
        }
    }

    pub fn wasd() -> Self {
        Self {
            id: "wasd",
            name: "WASD",
            description: "WASD keys for movement, Shift for reverse, Space for brake",
            input_config: InputConfig::with_mappings(wasd_keys()),
        }
    }

    pub fn arrows() -> Self {
        Self {
            id: "arrows",
            name: "Arrow Keys",
            description: "Arrow keys for movement, Right Shift for reverse, Right Ctrl for brake",
            input_config: InputConfig::with_mappings(arrow_keys()),
        }
    }

    pub fn arcade() -> Self {
        Self {
            id: "arcade",
            name: "Arcade",
            description: "Fast, responsive controls for arcade-style gameplay",
            input_config: InputConfig {
                acceleration_smoothing: 0.2,
                steering_smoothing: 0.15,
                brake_smoothing: 0.2,
                acceleration_decay: 0.3,
                steering_decay: 0.25,
                brake_decay: 0.4,
                input_deadzone: 0.02,
                ..InputConfig::default()
            },
        }
    }

    pub fn realistic() -> Self {
        Self {
            id: "realistic",
            name: "Realistic",
            description: "Gradual, realistic controls for simulation-style gameplay",
            input_config: InputConfig {
                acceleration_smoothing: 0.05,
                steering_smoothing: 0.03,
                brake_smoothing: 0.03,
                acceleration_decay: 0.1,
                steering_decay: 0.08,
                brake_decay: 0.15,
                input_deadzone: 0.08,
                ..InputConfig::default()
            },
        }
    }

    /// Default first.
    pub fn all() -> Vec<Self> {
        vec![Self::combined(), Self::wasd(), Self::arrows(), Self::arcade(), Self::realistic()]
    }

    /// Matches either the short id ("arrows") or the display name ("Arrow Keys").
    pub fn by_name(name: &str) -> RaceResult<Self> {
        let schemes = Self::all();
        let available = schemes.iter().map(|s| s.name).collect::<Vec<_>>().join(", ");
        schemes
            .into_iter()
            .find(|s| s.id == name || s.name == name)
            .ok_or_else(|| RaceError::UnknownControlScheme { name: name.to_string(), available })
    }
}

// ---------------------------------------------
// STATE
// ---------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct InputState {
    pub accelerate: Real,
    pub brake: Real,
    pub steer_left: Real,
    pub steer_right: Real,
    pub reverse: Real,
    pub pause: bool,
    pub reset: bool,
    pub switch_physics: bool,
}

impl InputState {
    pub fn throttle(&self) -> Real {
        if self.reverse > 0.0 { -self.reverse } else { self.accelerate }
    }

    pub fn steering(&self) -> Real {
        self.steer_right - self.steer_left
    }

    pub fn controls(&self) -> ControlInput {
        ControlInput::new(self.throttle(), self.steering(), self.brake)
    }
}

/// One frame of history, for debugging overlays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InputSnapshot {
    pub throttle: Real,
    pub steering: Real,
    pub brake: Real,
    pub raw: InputState,
}

#[inline]
fn attack(value: Real, held: bool, step: Real, decay: Real, dt: Real) -> Real {
    if held {
        (value + step).min(1.0)
    } else {
        (value - decay * dt).max(0.0)
    }
}

// ---------------------------------------------
// SMOOTHER
// ---------------------------------------------

#[derive(Default)]
pub struct InputSmoother {
    config: InputConfig,
    state: InputState,
    pressed: BTreeSet<String>,
    just_pressed: BTreeSet<String>,
    just_released: BTreeSet<String>,
    callbacks: HashMap<InputAction, ActionCallback>,
    history: VecDeque<InputSnapshot>,
}

impl std::fmt::Debug for InputSmoother {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSmoother")
            .field("state", &self.state)
            .field("pressed", &self.pressed)
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl InputSmoother {
    pub fn new(config: InputConfig) -> Self {
        Self { config, ..Self::default() }
    }

    pub fn from_scheme(scheme: ControlScheme) -> Self {
        Self::new(scheme.input_config)
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    pub fn state(&self) -> &InputState {
        &self.state
    }

    pub fn history(&self) -> &VecDeque<InputSnapshot> {
        &self.history
    }

    pub fn controls(&self) -> ControlInput {
        self.state.controls()
    }

    /// Replaces any callback already bound to `action`.
    pub fn set_action_callback(&mut self, action: InputAction, callback: ActionCallback) {
        self.callbacks.insert(action, callback);
    }

    pub fn set_key_mapping(&mut self, key: impl Into<String>, action: InputAction) {
        self.config.key_mappings.insert(key.into(), action);
    }

    pub fn remove_key_mapping(&mut self, key: &str) -> Option<InputAction> {
        self.config.key_mappings.remove(key)
    }

    /// Advance one frame with the keys currently held.
    pub fn update<I, K>(&mut self, dt: Real, pressed_keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let current: BTreeSet<String> = pressed_keys.into_iter().map(|k| k.as_ref().to_string()).collect();

        self.just_pressed = current.difference(&self.pressed).cloned().collect();
        self.just_released = self.pressed.difference(&current).cloned().collect();
        self.pressed = current;

        self.update_analog(dt);
        self.update_digital();
        self.record_history();
        self.fire_callbacks();
    }

    fn update_analog(&mut self, dt: Real) {
        let c = &self.config;
        let held = |action| self.is_action_pressed(action);

        let (acc, brk, left, right, rev) = (
            held(InputAction::Accelerate),
            held(InputAction::Brake),
            held(InputAction::SteerLeft),
            held(InputAction::SteerRight),
            held(InputAction::Reverse),
        );

        let s = &mut self.state;
        s.accelerate = attack(s.accelerate, acc, c.acceleration_smoothing, c.acceleration_decay, dt);
        s.brake = attack(s.brake, brk, c.brake_smoothing, c.brake_decay, dt);
        s.steer_left = attack(s.steer_left, left, c.steering_smoothing, c.steering_decay, dt);
        s.steer_right = attack(s.steer_right, right, c.steering_smoothing, c.steering_decay, dt);
        s.reverse = attack(s.reverse, rev, c.acceleration_smoothing, c.acceleration_decay, dt);

        let deadzone = c.input_deadzone;
        for v in [&mut s.accelerate, &mut s.brake, &mut s.steer_left, &mut s.steer_right, &mut s.reverse] {
            if *v < deadzone {
                *v = 0.0;
            }
        }
    }

    fn update_digital(&mut self) {
        self.state.pause = false;
        self.state.reset = false;
        self.state.switch_physics = false;

        for key in &self.just_pressed {
            match self.config.key_mappings.get(key) {
                Some(InputAction::Pause) => self.state.pause = true,
                Some(InputAction::Reset) => self.state.reset = true,
                Some(InputAction::SwitchPhysics) => self.state.switch_physics = true,
                _ => {}
            }
        }
    }

    fn record_history(&mut self) {
        self.history.push_back(InputSnapshot {
            throttle: self.state.throttle(),
            steering: self.state.steering(),
            brake: self.state.brake,
            raw: self.state,
        });
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    fn fire_callbacks(&mut self) {
        let actions: Vec<InputAction> = self
            .just_pressed
            .iter()
            .filter_map(|key| self.config.key_mappings.get(key).copied())
            .collect();

        for action in actions {
            if let Some(callback) = self.callbacks.get_mut(&action) {
                isolate("input_action", || callback());
            }
        }
    }

    fn any_key_for(&self, action: InputAction, keys: &BTreeSet<String>) -> bool {
        self.config
            .key_mappings
            .iter()
            .any(|(key, mapped)| *mapped == action && keys.contains(key))
    }

    pub fn is_action_pressed(&self, action: InputAction) -> bool {
        self.any_key_for(action, &self.pressed)
    }

    pub fn is_action_just_pressed(&self, action: InputAction) -> bool {
        self.any_key_for(action, &self.just_pressed)
    }

    pub fn is_action_just_released(&self, action: InputAction) -> bool {
        self.any_key_for(action, &self.just_released)
    }

    /// Back to rest: channels, key sets and history. Callbacks stay bound.
    pub fn reset(&mut self) {
        self.state = InputState::default();
        self.pressed.clear();
        self.just_pressed.clear();
        self.just_released.clear();
        self.history.clear();
    }
}
