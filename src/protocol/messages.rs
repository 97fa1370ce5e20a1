//! JSON control messages.
//!
//! Every message is a flat JSON object carrying a `type` tag, a sender
//! `timestamp` in milliseconds, and camelCase payload fields:
//!
//! ```json
//! {"type":"time_scale","timestamp":1700000000000,"scale":10.0}
//! ```

use serde::{Deserialize, Serialize};

use super::{BodyDefinition, IdHashMap, ProtocolError, WorldDefinition};
use crate::physics::{Simulation, SimulationConfig};
use crate::prediction::InputState;

/// Severity of a [`MessagePayload::SystemMessage`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MessagePayload {
    Ping {
        client_time: f64,
    },
    Pong {
        client_time: f64,
        server_time: f64,
    },
    Join {
        player_name: String,
    },
    Joined {
        player_id: String,
        player_name: String,
        spawn_body_id: String,
        spawn_position: [f64; 3],
        server_config: SimulationConfig,
    },
    PlayerJoined {
        player_id: String,
        player_name: String,
    },
    PlayerLeft {
        player_id: String,
        #[serde(default)]
        reason: String,
    },
    ChatMessage {
        player_id: String,
        player_name: String,
        message: String,
    },
    SystemMessage {
        message: String,
        #[serde(default)]
        level: MessageLevel,
    },
    /// Full world bootstrap sent to a joining client.
    WorldState {
        world_name: String,
        #[serde(default)]
        world_description: String,
        #[serde(default)]
        seed: u64,
        bodies: Vec<BodyDefinition>,
        simulation_time: f64,
        tick: u64,
    },
    BodyAdd {
        body: BodyDefinition,
    },
    BodyRemove {
        body_id: String,
    },
    PlayerInput {
        player_id: String,
        tick: u64,
        input: InputState,
    },
    ConfigRequest,
    ConfigUpdate {
        config: SimulationConfig,
    },
    TimeScale {
        scale: f64,
    },
    Pause,
    Resume,
    Error {
        code: String,
        message: String,
    },
}

impl MessagePayload {
    /// Bootstrap payload describing `simulation` as it stands now.
    ///
    /// `world` should come from [`Simulation::export_world`] so its bodies
    /// match the current tick.
    pub fn world_state(simulation: &Simulation, world: WorldDefinition) -> Self {
        Self::WorldState {
            world_name: world.name,
            world_description: world.description,
            seed: world.seed,
            bodies: world.bodies,
            simulation_time: simulation.time(),
            tick: simulation.tick(),
        }
    }

    /// Wire name of this message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Join { .. } => "join",
            Self::Joined { .. } => "joined",
            Self::PlayerJoined { .. } => "player_joined",
            Self::PlayerLeft { .. } => "player_left",
            Self::ChatMessage { .. } => "chat_message",
            Self::SystemMessage { .. } => "system_message",
            Self::WorldState { .. } => "world_state",
            Self::BodyAdd { .. } => "body_add",
            Self::BodyRemove { .. } => "body_remove",
            Self::PlayerInput { .. } => "player_input",
            Self::ConfigRequest => "config_request",
            Self::ConfigUpdate { .. } => "config_update",
            Self::TimeScale { .. } => "time_scale",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Error { .. } => "error",
        }
    }
}

/// A control message with its envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Sender wall-clock time in milliseconds.
    pub timestamp: f64,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

impl ControlMessage {
    pub fn new(payload: MessagePayload, timestamp: f64) -> Self {
        Self { timestamp, payload }
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Apply a world-affecting message to a simulation and its id map.
    ///
    /// Returns `Ok(false)` for messages that do not touch the simulation
    /// (chat, pings, joins, inputs). On error neither `simulation` nor `ids`
    /// is changed.
    pub fn apply(&self, simulation: &mut Simulation, ids: &mut IdHashMap) -> Result<bool, ProtocolError> {
        match &self.payload {
            MessagePayload::WorldState {
                world_name,
                world_description,
                seed,
                bodies,
                simulation_time,
                tick,
            } => {
                let world = WorldDefinition {
                    name: world_name.clone(),
                    description: world_description.clone(),
                    seed: *seed,
                    bodies: bodies.clone(),
                };
                *ids = simulation.load_world(&world)?;
                simulation.set_time(*simulation_time);
                simulation.set_tick(*tick);
            }
            MessagePayload::BodyAdd { body } => {
                let body = body.to_body()?;
                let id = body.id.clone();
                let mut next_ids = ids.clone();
                next_ids.insert(&id)?;
                simulation.add_body(body)?;
                *ids = next_ids;
            }
            MessagePayload::BodyRemove { body_id } => {
                simulation.remove_body(body_id)?;
                ids.remove(body_id);
            }
            MessagePayload::ConfigUpdate { config } => simulation.set_config(config.clone())?,
            MessagePayload::TimeScale { scale } => simulation.set_time_scale(*scale)?,
            MessagePayload::Pause => simulation.pause(),
            MessagePayload::Resume => simulation.resume(),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BodyKind;
    use serde_json::Value;

    fn body_def(id: &str) -> BodyDefinition {
        BodyDefinition::new(id, BodyKind::Passive, 1000.0, 5.0)
    }

    #[test]
    fn test_envelope_is_flat_with_type_tag() {
        let msg = ControlMessage::new(MessagePayload::TimeScale { scale: 10.0 }, 1234.0);
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "time_scale");
        assert_eq!(value["timestamp"], 1234.0);
        assert_eq!(value["scale"], 10.0);
    }

    #[test]
    fn test_payload_fields_are_camel_case() {
        let msg = ControlMessage::new(
            MessagePayload::Pong {
                client_time: 1.0,
                server_time: 2.0,
            },
            0.0,
        );
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["clientTime"], 1.0);
        assert_eq!(value["serverTime"], 2.0);
        assert!(value.get("client_time").is_none());
    }

    #[test]
    fn test_parse_unit_and_struct_messages() {
        let pause = ControlMessage::from_json(r#"{"type":"pause","timestamp":5}"#).unwrap();
        assert_eq!(pause.payload, MessagePayload::Pause);
        assert_eq!(pause.timestamp, 5.0);

        let removal =
            ControlMessage::from_json(r#"{"type":"body_remove","timestamp":0,"bodyId":"ship-7"}"#).unwrap();
        assert_eq!(
            removal.payload,
            MessagePayload::BodyRemove {
                body_id: "ship-7".into()
            }
        );

        let sys = ControlMessage::from_json(
            r#"{"type":"system_message","timestamp":0,"message":"hi","level":"warning"}"#,
        )
        .unwrap();
        assert!(matches!(
            sys.payload,
            MessagePayload::SystemMessage {
                level: MessageLevel::Warning,
                ..
            }
        ));
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let msg = ControlMessage::new(
            MessagePayload::ChatMessage {
                player_id: "p1".into(),
                player_name: "Ada".into(),
                message: "hello".into(),
            },
            0.0,
        );
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], msg.payload.kind());
    }

    #[test]
    fn test_malformed_json_is_protocol_error() {
        assert!(matches!(
            ControlMessage::from_json("{not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            ControlMessage::from_json(r#"{"type":"warp_drive","timestamp":0}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_apply_body_add_and_remove_track_id_map() {
        let mut sim = Simulation::default();
        let mut ids = IdHashMap::default();

        let add = ControlMessage::new(MessagePayload::BodyAdd { body: body_def("satellite") }, 0.0);
        assert!(add.apply(&mut sim, &mut ids).unwrap());
        assert!(sim.contains("satellite"));
        assert!(ids.contains_id("satellite"));

        // Duplicate add is rejected and leaves the map alone
        assert!(add.apply(&mut sim, &mut ids).is_err());
        assert_eq!(ids.len(), 1);

        let remove = ControlMessage::new(
            MessagePayload::BodyRemove {
                body_id: "satellite".into(),
            },
            0.0,
        );
        assert!(remove.apply(&mut sim, &mut ids).unwrap());
        assert!(!sim.contains("satellite"));
        assert!(ids.is_empty());
    }

    #[test]
    fn test_apply_colliding_id_leaves_simulation_untouched() {
        let mut sim = Simulation::default();
        let mut ids = IdHashMap::default();
        ControlMessage::new(MessagePayload::BodyAdd { body: body_def("Aa") }, 0.0)
            .apply(&mut sim, &mut ids)
            .unwrap();

        let clash = ControlMessage::new(MessagePayload::BodyAdd { body: body_def("BB") }, 0.0);
        assert!(matches!(
            clash.apply(&mut sim, &mut ids),
            Err(ProtocolError::Codec(_))
        ));
        assert!(!sim.contains("BB"));
    }

    #[test]
    fn test_apply_clock_control() {
        let mut sim = Simulation::default();
        let mut ids = IdHashMap::default();

        ControlMessage::new(MessagePayload::Pause, 0.0)
            .apply(&mut sim, &mut ids)
            .unwrap();
        assert!(sim.is_paused());
        ControlMessage::new(MessagePayload::Resume, 0.0)
            .apply(&mut sim, &mut ids)
            .unwrap();
        assert!(!sim.is_paused());

        ControlMessage::new(MessagePayload::TimeScale { scale: 100.0 }, 0.0)
            .apply(&mut sim, &mut ids)
            .unwrap();
        assert_eq!(sim.config().time_scale, 100.0);

        let bad = ControlMessage::new(MessagePayload::TimeScale { scale: -1.0 }, 0.0);
        assert!(matches!(
            bad.apply(&mut sim, &mut ids),
            Err(ProtocolError::Simulation(_))
        ));
    }

    #[test]
    fn test_world_state_bootstraps_client() {
        let mut server = Simulation::default();
        server.add_body(body_def("a").to_body().unwrap()).unwrap();
        server
            .add_body(body_def("b").with_position([100.0, 0.0, 0.0]).to_body().unwrap())
            .unwrap();
        server.set_tick(900);

        let world = server.export_world("Test", "two satellites");
        let msg = ControlMessage::new(MessagePayload::world_state(&server, world), 0.0);
        let text = msg.to_json().unwrap();

        let mut client = Simulation::default();
        let mut ids = IdHashMap::default();
        assert!(ControlMessage::from_json(&text).unwrap().apply(&mut client, &mut ids).unwrap());
        assert_eq!(client.body_count(), 2);
        assert_eq!(client.tick(), 900);
        assert_eq!(ids.len(), 2);
        assert_eq!(client.body("b").unwrap().position.x, 100.0);
    }

    #[test]
    fn test_chat_does_not_touch_simulation() {
        let mut sim = Simulation::default();
        let mut ids = IdHashMap::default();
        let chat = ControlMessage::new(
            MessagePayload::Join {
                player_name: "Ada".into(),
            },
            0.0,
        );
        assert!(!chat.apply(&mut sim, &mut ids).unwrap());
    }
}
