//! Client/server integration tests for prediction and reconciliation.
//!
//! A server and a client simulation run in lockstep. The client predicts
//! its ship locally while binary tick frames reach it a few ticks late.

mod common;

use std::collections::VecDeque;

use bevy::math::DVec3;
use nbody_sync::physics::{GravityMethod, Simulation};
use nbody_sync::prediction::{ClientPredictor, InputState, PredictionConfig, Reconciliation, input_acceleration};
use nbody_sync::protocol::{ControlMessage, IdHashMap, MessagePayload, TickFrame, decode_tick, encode_tick};

use common::*;

const SHIP: &str = "ship-1";
/// Frames reach the client this many ticks after the server produced them.
const LATENCY: usize = 3;

fn input_for(tick: u64) -> InputState {
    match tick {
        10..40 => InputState::forward(1.0),
        40..60 => InputState {
            strafe_x: -0.5,
            boost: true,
            ..Default::default()
        },
        _ => InputState::default(),
    }
}

struct Session {
    server: Simulation,
    client: Simulation,
    predictor: ClientPredictor,
    server_ids: IdHashMap,
    client_ids: IdHashMap,
    in_flight: VecDeque<Vec<u8>>,
    outcomes: Vec<Reconciliation>,
}

impl Session {
    fn new(prediction: PredictionConfig) -> Self {
        let mut server = Simulation::new(natural_config(GravityMethod::BarnesHut)).unwrap();
        let server_ids = server.load_world(&ship_world()).unwrap();

        // The client bootstraps from the JSON world-state message
        let world = server.export_world("Proving Ground", "");
        let text = ControlMessage::new(MessagePayload::world_state(&server, world), 0.0)
            .to_json()
            .unwrap();
        let mut client = Simulation::new(natural_config(GravityMethod::BarnesHut)).unwrap();
        let mut client_ids = IdHashMap::default();
        ControlMessage::from_json(&text)
            .unwrap()
            .apply(&mut client, &mut client_ids)
            .unwrap();

        Self {
            server,
            client,
            predictor: ClientPredictor::new(SHIP, prediction),
            server_ids,
            client_ids,
            in_flight: VecDeque::new(),
            outcomes: Vec::new(),
        }
    }

    /// One tick on both sides, then deliver whatever frame is due.
    fn tick(&mut self) -> Option<TickFrame> {
        let input = input_for(self.client.tick() + 1);
        self.predictor.predict(&mut self.client, input).unwrap();

        let orientation = self.server.body(SHIP).unwrap().orientation;
        let thrust = input_acceleration(orientation, &input, self.predictor.config());
        self.server.set_thrust(SHIP, thrust).unwrap();
        self.server.step(self.server.config().timestep).unwrap();
        self.send_frame();

        self.deliver()
    }

    fn send_frame(&mut self) {
        let states = self.server.body_states(self.server.time());
        let bytes = encode_tick(&states, self.server.tick() as u32, &self.server_ids).unwrap();
        self.in_flight.push_back(bytes);
    }

    fn deliver(&mut self) -> Option<TickFrame> {
        if self.in_flight.len() <= LATENCY {
            return None;
        }
        let bytes = self.in_flight.pop_front()?;
        let frame = decode_tick(&bytes, &self.client_ids, self.client.time()).unwrap();
        self.client.apply_snapshot(&frame, Some(SHIP));
        let state = frame.states.iter().find(|s| s.id == SHIP).unwrap();
        let outcome = self
            .predictor
            .reconcile(&mut self.client, state, u64::from(frame.tick))
            .unwrap();
        self.outcomes.push(outcome);
        Some(frame)
    }

    /// Velocity change the client never hears about.
    fn kick_server(&mut self, dv: DVec3) {
        let ship = self.server.body(SHIP).unwrap().clone();
        self.server
            .apply_body_state(SHIP, ship.position, ship.velocity + dv, None, None)
            .unwrap();
    }

    fn divergence(&self) -> f64 {
        let client = self.client.body(SHIP).unwrap();
        let server = self.server.body(SHIP).unwrap();
        client.position.distance(server.position)
    }

    fn replays(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, Reconciliation::Replayed { .. }))
            .count()
    }
}

#[test]
fn test_identical_inputs_are_always_accepted() {
    let mut session = Session::new(PredictionConfig::default());
    for _ in 0..90 {
        session.tick();
    }

    assert_eq!(session.outcomes.len(), 90 - LATENCY);
    for outcome in &session.outcomes {
        let Reconciliation::Accepted { error } = outcome else {
            panic!("Lockstep prediction should never miss, got {outcome:?}");
        };
        assert!(*error < 1e-9, "Prediction error {error} in a deterministic run");
    }
    assert!(session.divergence() < 1e-9);
    assert_eq!(session.predictor.pending_correction(), (DVec3::ZERO, DVec3::ZERO));
}

#[test]
fn test_server_kick_is_replayed_and_converges() {
    let mut session = Session::new(PredictionConfig {
        smoothing_factor: 1.0,
        ..Default::default()
    });
    for _ in 0..20 {
        session.tick();
    }

    // 90 m/s puts the next frame 1.5 m off the prediction
    session.kick_server(DVec3::new(0.0, 90.0, 0.0));
    for _ in 0..60 {
        session.tick();
    }

    assert_eq!(session.replays(), 1, "Outcomes: {:?}", session.outcomes);
    let replay = session
        .outcomes
        .iter()
        .find_map(|o| match o {
            Reconciliation::Replayed { error, replayed } => Some((*error, *replayed)),
            _ => None,
        })
        .unwrap();
    assert!(replay.0 > 1.0, "Replay triggered below threshold: {}", replay.0);
    assert_eq!(replay.1, LATENCY, "Every input newer than the frame is replayed");
    assert!(
        session.divergence() < 0.01,
        "Client should land on the server trajectory, off by {} m",
        session.divergence()
    );
}

#[test]
fn test_replay_lands_on_server_trajectory() {
    let mut session = Session::new(PredictionConfig::default());
    for _ in 0..30 {
        session.tick();
    }
    session.kick_server(DVec3::new(0.0, 0.0, -120.0));

    // Find the first replay and compare the rewritten record with the truth
    for _ in 0..10 {
        session.tick();
        if session.replays() > 0 {
            break;
        }
    }
    assert_eq!(session.replays(), 1);

    let now = session.client.tick();
    assert_eq!(now, session.server.tick());
    let corrected = session.predictor.history().get(now).unwrap().position;
    let truth = session.server.body(SHIP).unwrap().position;
    assert!(
        corrected.distance(truth) < 1e-6,
        "Rewritten history should match the server: {corrected} vs {truth}"
    );

    // The body itself only catches up through smoothing
    assert!(session.predictor.pending_correction().0.length() > 1.0);
}

#[test]
fn test_reconciling_same_frame_twice_is_idempotent() {
    let mut session = Session::new(PredictionConfig::default());
    for _ in 0..25 {
        session.tick();
    }
    session.kick_server(DVec3::new(0.0, 120.0, 0.0));

    let frame = loop {
        let frame = session.tick().unwrap();
        if matches!(session.outcomes.last(), Some(Reconciliation::Replayed { .. })) {
            break frame;
        }
    };

    let pending = session.predictor.pending_correction();
    let state = frame.states.iter().find(|s| s.id == SHIP).unwrap();
    let again = session
        .predictor
        .reconcile(&mut session.client, state, u64::from(frame.tick))
        .unwrap();

    let Reconciliation::Accepted { error } = again else {
        panic!("Second reconcile should find the rewritten record, got {again:?}");
    };
    assert!(error < 1e-9);
    assert_eq!(session.predictor.pending_correction(), pending);
}

#[test]
fn test_snapshot_skips_predicted_body() {
    let mut session = Session::new(PredictionConfig::default());
    for _ in 0..10 {
        session.tick();
    }
    session.kick_server(DVec3::new(0.0, 50.0, 0.0));
    session.server.step(session.server.config().timestep).unwrap();

    let states = session.server.body_states(0.0);
    let bytes = encode_tick(&states, session.server.tick() as u32, &session.server_ids).unwrap();
    let frame = decode_tick(&bytes, &session.client_ids, 0.0).unwrap();

    let before = session.client.body(SHIP).unwrap().clone();
    let applied = session.client.apply_snapshot(&frame, Some(SHIP));

    assert_eq!(applied, 1, "Only the sun should be snapped");
    assert_eq!(session.client.body(SHIP).unwrap(), &before);
}

#[test]
fn test_snap_only_client_mirrors_server() {
    let mut session = Session::new(PredictionConfig::snap_only());
    for _ in 0..20 {
        session.tick();
    }
    session.kick_server(DVec3::new(25.0, 0.0, 0.0));

    for _ in 0..LATENCY + 2 {
        let frame = session.tick().unwrap();
        let state = frame.states.iter().find(|s| s.id == SHIP).unwrap();
        let ship = session.client.body(SHIP).unwrap();
        assert_eq!(ship.position, state.position, "Client should sit on the delivered frame");
        assert_eq!(ship.velocity, state.velocity);
    }

    assert!(session.outcomes.iter().all(|o| *o == Reconciliation::Snapped));
    assert!(session.predictor.history().is_empty());
}
