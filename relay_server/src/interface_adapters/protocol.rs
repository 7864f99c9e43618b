// Wire protocol DTOs and the event codec.
// Frames are JSON text objects: {"type": "<kind>", "data": <payload>}.

use crate::domain::{Action, Direction, Event, Unit, Units};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Why an inbound frame could not be turned into an [`Event`].
#[derive(Debug)]
pub enum DecodeError {
    /// Not a JSON object with a string `type` field.
    Malformed(serde_json::Error),
    /// Discriminant outside the closed set of event kinds.
    UnknownKind(String),
    /// Known discriminant, but `data` does not match its payload shape.
    InvalidPayload {
        kind: &'static str,
        source: serde_json::Error,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(e) => write!(f, "malformed frame: {e}"),
            DecodeError::UnknownKind(kind) => write!(f, "unknown event kind {kind:?}"),
            DecodeError::InvalidPayload { kind, source } => {
                write!(f, "invalid {kind} payload: {source}")
            }
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Malformed(e) => Some(e),
            DecodeError::UnknownKind(_) => None,
            DecodeError::InvalidPayload { source, .. } => Some(source),
        }
    }
}

/// Outbound envelope; serde writes the `type`/`data` pair.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
enum EventDto {
    Connect(UnitDto),
    Init(InitPayload),
    Move(MovePayload),
    Idle(UnitRefPayload),
    Disconnect(UnitRefPayload),
}

/// Inbound envelope; the payload stays untyped until the kind is validated.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Flattened unit state for wire transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitDto {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub sprite_name: String,
    pub action: ActionDto,
    #[serde(default)]
    pub frame: u8,
    #[serde(default)]
    pub horizontal_direction: DirectionDto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionDto {
    Idle,
    Run,
}

/// Directions travel as integers: Up=0, Down=1, Left=2, Right=3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "u8", into = "u8")]
pub struct DirectionDto(Direction);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPayload {
    pub player_id: String,
    pub units: HashMap<String, UnitDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovePayload {
    pub unit_id: String,
    pub direction: DirectionDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRefPayload {
    pub unit_id: String,
}

impl TryFrom<u8> for DirectionDto {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let direction = match value {
            0 => Direction::Up,
            1 => Direction::Down,
            2 => Direction::Left,
            3 => Direction::Right,
            other => return Err(format!("direction out of range: {other}")),
        };
        Ok(Self(direction))
    }
}

impl From<DirectionDto> for u8 {
    fn from(direction: DirectionDto) -> Self {
        match direction.0 {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }
}

impl From<Action> for ActionDto {
    fn from(action: Action) -> Self {
        match action {
            Action::Idle => ActionDto::Idle,
            Action::Running => ActionDto::Run,
        }
    }
}

impl From<ActionDto> for Action {
    fn from(action: ActionDto) -> Self {
        match action {
            ActionDto::Idle => Action::Idle,
            ActionDto::Run => Action::Running,
        }
    }
}

impl From<&Unit> for UnitDto {
    fn from(unit: &Unit) -> Self {
        Self {
            id: unit.id.clone(),
            x: unit.x,
            y: unit.y,
            sprite_name: unit.sprite_name.clone(),
            action: unit.action.into(),
            frame: unit.frame,
            horizontal_direction: DirectionDto(unit.facing),
            speed: unit.speed,
        }
    }
}

impl From<UnitDto> for Unit {
    fn from(unit: UnitDto) -> Self {
        Self {
            id: unit.id,
            x: unit.x,
            y: unit.y,
            sprite_name: unit.sprite_name,
            action: unit.action.into(),
            facing: unit.horizontal_direction.0,
            frame: unit.frame,
            speed: unit.speed,
        }
    }
}

impl From<&Event> for EventDto {
    fn from(event: &Event) -> Self {
        match event {
            Event::Connect(unit) => EventDto::Connect(unit.into()),
            Event::Init { player_id, units } => EventDto::Init(InitPayload {
                player_id: player_id.clone(),
                units: units
                    .iter()
                    .map(|(id, unit)| (id.clone(), UnitDto::from(unit)))
                    .collect(),
            }),
            Event::Move { unit_id, direction } => EventDto::Move(MovePayload {
                unit_id: unit_id.clone(),
                direction: DirectionDto(*direction),
            }),
            Event::Idle { unit_id } => EventDto::Idle(UnitRefPayload {
                unit_id: unit_id.clone(),
            }),
            Event::Disconnect { unit_id } => EventDto::Disconnect(UnitRefPayload {
                unit_id: unit_id.clone(),
            }),
        }
    }
}

/// Serializes an event into a single text frame.
pub fn encode(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(&EventDto::from(event))
}

/// Parses one text frame. Nothing is returned unless both the kind and its payload are valid.
pub fn decode(text: &str) -> Result<Event, DecodeError> {
    let raw: RawEvent = serde_json::from_str(text).map_err(DecodeError::Malformed)?;

    match raw.kind.as_str() {
        "connect" => {
            let unit: UnitDto = payload("connect", raw.data)?;
            Ok(Event::Connect(unit.into()))
        }
        "init" => {
            let init: InitPayload = payload("init", raw.data)?;
            let units: Units = init
                .units
                .into_iter()
                .map(|(id, unit)| (id, Unit::from(unit)))
                .collect();
            Ok(Event::Init {
                player_id: init.player_id,
                units,
            })
        }
        "move" => {
            let mv: MovePayload = payload("move", raw.data)?;
            Ok(Event::Move {
                unit_id: mv.unit_id,
                direction: mv.direction.0,
            })
        }
        "idle" => {
            let idle: UnitRefPayload = payload("idle", raw.data)?;
            Ok(Event::Idle {
                unit_id: idle.unit_id,
            })
        }
        "disconnect" => {
            let gone: UnitRefPayload = payload("disconnect", raw.data)?;
            Ok(Event::Disconnect {
                unit_id: gone.unit_id,
            })
        }
        _ => Err(DecodeError::UnknownKind(raw.kind)),
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    data: serde_json::Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::InvalidPayload { kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn sample_unit() -> Unit {
        let mut unit = Unit::new("a1", 12.5, 40.0, "lizard_f");
        unit.frame = 3;
        unit.facing = Direction::Left;
        unit.action = Action::Running;
        unit
    }

    #[test]
    fn when_move_is_encoded_then_direction_travels_as_integer() {
        let event = Event::Move {
            unit_id: "a1".to_string(),
            direction: Direction::Right,
        };

        let value: Value = serde_json::from_str(&encode(&event).unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"type": "move", "data": {"unit_id": "a1", "direction": 3}})
        );
    }

    #[test]
    fn when_connect_is_encoded_then_data_is_the_unit_itself() {
        let value: Value =
            serde_json::from_str(&encode(&Event::Connect(sample_unit())).unwrap()).unwrap();

        assert_eq!(value["type"], "connect");
        assert_eq!(value["data"]["id"], "a1");
        assert_eq!(value["data"]["sprite_name"], "lizard_f");
        assert_eq!(value["data"]["action"], "run");
        assert_eq!(value["data"]["horizontal_direction"], 2);
        assert!(value["data"].get("speed").is_none());
    }

    #[test]
    fn when_init_is_decoded_then_units_are_keyed_by_id() {
        let text = json!({
            "type": "init",
            "data": {
                "player_id": "b",
                "units": {
                    "a": {"id": "a", "x": 1.0, "y": 2.0, "sprite_name": "elf_f", "action": "idle", "frame": 1, "horizontal_direction": 0},
                    "b": {"id": "b", "x": 3.0, "y": 4.0, "sprite_name": "elf_m", "action": "run", "frame": 2, "horizontal_direction": 3, "speed": 2.0}
                }
            }
        })
        .to_string();

        let Event::Init { player_id, units } = decode(&text).unwrap() else {
            panic!("expected init event");
        };

        assert_eq!(player_id, "b");
        assert_eq!(units.len(), 2);
        assert_eq!(units["b"].action, Action::Running);
        assert_eq!(units["b"].facing, Direction::Right);
        assert_eq!(units["b"].speed, Some(2.0));
        assert_eq!(units["a"].speed, None);
    }

    #[test]
    fn when_encoded_event_is_decoded_then_it_is_unchanged() {
        let event = Event::Connect(sample_unit());

        let decoded = decode(&encode(&event).unwrap()).unwrap();

        assert_eq!(decoded, event);
    }

    #[test]
    fn when_kind_is_unknown_then_decode_reports_it() {
        let result = decode(r#"{"type": "teleport", "data": {"unit_id": "a"}}"#);

        assert!(matches!(result, Err(DecodeError::UnknownKind(kind)) if kind == "teleport"));
    }

    #[test]
    fn when_payload_does_not_fit_kind_then_decode_reports_invalid_payload() {
        let result = decode(r#"{"type": "move", "data": {"unit_id": "a"}}"#);

        assert!(matches!(
            result,
            Err(DecodeError::InvalidPayload { kind: "move", .. })
        ));
    }

    #[test]
    fn when_direction_is_out_of_range_then_decode_fails() {
        let result = decode(r#"{"type": "move", "data": {"unit_id": "a", "direction": 7}}"#);

        assert!(matches!(result, Err(DecodeError::InvalidPayload { .. })));
    }

    #[test]
    fn when_frame_is_not_json_then_decode_reports_malformed() {
        assert!(matches!(decode("hello"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"data": {}}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn when_idle_has_no_data_then_decode_fails_instead_of_defaulting() {
        let result = decode(r#"{"type": "idle"}"#);

        assert!(matches!(
            result,
            Err(DecodeError::InvalidPayload { kind: "idle", .. })
        ));
    }
}
