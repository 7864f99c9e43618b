// Domain layer: units, events and the world state machine.

pub mod event;
pub mod unit;
pub mod world;

pub use event::Event;
pub use unit::{Action, Direction, Unit, Units};
pub use world::{Arena, StateError, World};
