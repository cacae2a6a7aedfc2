use std::sync::{Arc, Mutex};

use rapier2d::prelude::{nalgebra, vector};
use tokio::sync::mpsc;

use arcade_racer::net::{ClientMessage, ServerMessage, handle_message};
use arcade_racer::{Car, CollisionInfo, ControlInput, ModelTag, RaceEvent, RaceState, WorldConfig};

const DT: f32 = 1.0 / 60.0;

fn arena() -> RaceState {
    RaceState::with_arena(WorldConfig::undamped())
}

#[test]
fn grid_race_with_a_wall_crash_and_recovery() {
    let mut race = arena();
    let spawn = race.add_car("p1", true, None).unwrap();
    race.add_car("ai_1", false, None).unwrap();

    // fire the player straight back into the left arena wall
    let handle = race.car("p1").unwrap().body().body_handle();
    race.world_mut().bodies[handle].set_linvel(vector![-1200.0, 0.0], true);

    let seen = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&seen);
    race.car_mut("p1").unwrap().set_collision_callback(Box::new(move |_: &Car, _: &CollisionInfo| {
        *counter.lock().unwrap() += 1;
    }));

    let mut crashed_at = None;
    let mut recovered_at = None;
    for tick in 0..300 {
        for event in race.tick(DT) {
            match event {
                RaceEvent::Crashed { car_id, .. } if car_id == "p1" => {
                    crashed_at.get_or_insert(tick);
                }
                RaceEvent::Recovered { car_id } if car_id == "p1" => {
                    recovered_at.get_or_insert(tick);
                }
                _ => {}
            }
        }
    }

    let crashed_at = crashed_at.expect("player never crashed");
    let recovered_at = recovered_at.expect("player never recovered");
    assert!(recovered_at > crashed_at);
    assert!(*seen.lock().unwrap() > 0);

    // still inside the arena, the AI car untouched
    let p1 = race.car("p1").unwrap();
    assert!(p1.position(race.world()).x > 0.0);
    assert!(!p1.is_crashed());
    assert!(race.car("ai_1").unwrap().speed(race.world()) < 1e-3);

    race.reset_car("p1").unwrap();
    let pos = race.car("p1").unwrap().position(race.world());
    assert_eq!([pos.x, pos.y], spawn.position);
}

#[test]
fn realistic_model_is_heavier_and_slower_off_the_line() {
    let mut race = arena();
    race.add_car("a", true, None).unwrap();
    race.add_car("r", true, None).unwrap();
    race.switch_physics_model("r", "realistic").unwrap();

    for id in ["a", "r"] {
        race.set_analog_input(id, ControlInput::new(1.0, 0.0, 0.0)).unwrap();
    }
    for _ in 0..30 {
        race.tick(DT);
    }

    let arcade = race.car("a").unwrap();
    let realistic = race.car("r").unwrap();
    assert_eq!(arcade.physics_model(), ModelTag::Arcade);
    assert_eq!(realistic.physics_model(), ModelTag::Realistic);
    assert!(realistic.body().mass(race.world()) > arcade.body().mass(race.world()));
    assert!(arcade.forward_speed(race.world()) > realistic.forward_speed(race.world()));
}

#[test]
fn client_messages_round_through_a_snapshot() {
    let mut race = arena();
    let (tx, mut rx) = mpsc::unbounded_channel();
    race.register_client(tx);
    race.add_car("p1", true, None).unwrap();

    let msg: ClientMessage = serde_json::from_str(r#"{"type":"keys","pressed":["ArrowUp"]}"#).unwrap();
    assert_eq!(handle_message(&mut race, "p1", msg), None);
    assert_eq!(handle_message(&mut race, "p1", ClientMessage::Ping), Some(ServerMessage::Pong));

    for _ in 0..10 {
        race.tick(DT);
    }
    race.broadcast_snapshot();

    let json: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(json["type"], "snapshot");
    assert_eq!(json["tick"], 10);
    assert!(json.get("debug").is_none());

    let car = &json["cars"][0];
    assert_eq!(car["car_id"], "p1");
    assert_eq!(car["physics_model"], "arcade");
    assert!(car["throttle"].as_f64().unwrap() > 0.0);
    assert_eq!(json["world"]["colliders"], 5);
}
