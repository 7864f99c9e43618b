// Event-sourced world state shared by the server and every replica.

use super::event::Event;
use super::unit::{ANIMATION_PHASES, Action, SPRITE_PALETTE, Unit, Units};
use rand::Rng;
use rand::seq::SliceRandom;
use std::fmt;

/// Spawn area for new units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arena {
    pub width: f64,
    pub height: f64,
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            width: 320.0,
            height: 320.0,
        }
    }
}

/// Reasons an event was not applied. None of these are fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Move/Idle/Disconnect for a unit this world does not know.
    UnknownUnit { kind: &'static str, unit_id: String },
    /// Init received by the authoritative world.
    InitRejected,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::UnknownUnit { kind, unit_id } => {
                write!(f, "{kind} event for unknown unit {unit_id}")
            }
            StateError::InitRejected => write!(f, "init event rejected by authoritative world"),
        }
    }
}

impl std::error::Error for StateError {}

/// Mapping of units plus the role of this copy.
///
/// The world never emits events and never performs I/O; callers own a single
/// instance and serialize every mutation through one writer.
#[derive(Debug, Clone)]
pub struct World {
    units: Units,
    authoritative: bool,
    // Only set on replicas, once Init arrives.
    local_id: Option<String>,
    arena: Arena,
}

impl World {
    /// Ground-truth copy held by the server.
    pub fn authoritative(arena: Arena) -> Self {
        Self {
            units: Units::new(),
            authoritative: true,
            local_id: None,
            arena,
        }
    }

    /// Client copy, empty until its Init event arrives.
    pub fn replica() -> Self {
        Self {
            units: Units::new(),
            authoritative: false,
            local_id: None,
            arena: Arena::default(),
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn units(&self) -> &Units {
        &self.units
    }

    pub fn unit(&self, unit_id: &str) -> Option<&Unit> {
        self.units.get(unit_id)
    }

    /// The unit controlled by this replica, if Init has been applied.
    pub fn local_unit(&self) -> Option<&Unit> {
        self.local_id.as_deref().and_then(|id| self.units.get(id))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn apply_event(&mut self, event: Event) -> Result<(), StateError> {
        let kind = event.kind();
        match event {
            Event::Connect(unit) => {
                self.units.insert(unit.id.clone(), unit);
                Ok(())
            }
            Event::Init { player_id, units } => {
                if self.authoritative {
                    return Err(StateError::InitRejected);
                }
                self.local_id = Some(player_id);
                self.units = units;
                Ok(())
            }
            Event::Move { unit_id, direction } => match self.units.get_mut(&unit_id) {
                Some(unit) => {
                    unit.step(direction);
                    Ok(())
                }
                None => Err(StateError::UnknownUnit { kind, unit_id }),
            },
            Event::Idle { unit_id } => match self.units.get_mut(&unit_id) {
                Some(unit) => {
                    unit.action = Action::Idle;
                    Ok(())
                }
                None => Err(StateError::UnknownUnit { kind, unit_id }),
            },
            Event::Disconnect { unit_id } => match self.units.remove(&unit_id) {
                Some(_) => Ok(()),
                None => Err(StateError::UnknownUnit { kind, unit_id }),
            },
        }
    }

    /// Spawns a new idle unit at a random spot in the arena.
    pub fn add_unit(&mut self) -> Unit {
        self.add_unit_with(&mut rand::thread_rng())
    }

    pub fn add_unit_with<R: Rng>(&mut self, rng: &mut R) -> Unit {
        let id = uuid::Uuid::new_v4().to_string();
        let sprite = SPRITE_PALETTE
            .choose(rng)
            .copied()
            .unwrap_or(SPRITE_PALETTE[0]);

        let mut unit = Unit::new(
            id,
            rng.gen_range(0.0..self.arena.width),
            rng.gen_range(0.0..self.arena.height),
            sprite,
        );
        unit.frame = rng.gen_range(0..ANIMATION_PHASES);
        unit.speed = Some(f64::from(rng.gen_range(1..=4u8)));

        self.units.insert(unit.id.clone(), unit.clone());
        unit
    }
}
