// Discrete state transitions exchanged between the server and replicas.

use super::unit::{Direction, Unit, Units};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A unit joined; upserted into the world.
    Connect(Unit),
    /// Full snapshot unicast to a freshly connected replica.
    Init { player_id: String, units: Units },
    Move { unit_id: String, direction: Direction },
    Idle { unit_id: String },
    Disconnect { unit_id: String },
}

impl Event {
    /// Short lowercase name, used for logs and the wire discriminant.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Connect(_) => "connect",
            Event::Init { .. } => "init",
            Event::Move { .. } => "move",
            Event::Idle { .. } => "idle",
            Event::Disconnect { .. } => "disconnect",
        }
    }

    /// Unit the event is about. Init targets the whole world and has none.
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            Event::Connect(unit) => Some(&unit.id),
            Event::Init { .. } => None,
            Event::Move { unit_id, .. }
            | Event::Idle { unit_id }
            | Event::Disconnect { unit_id } => Some(unit_id),
        }
    }
}
