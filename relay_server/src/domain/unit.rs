// Domain-level unit entity and its small enums.

use std::collections::HashMap;

/// Cosmetic sprites a unit can be spawned with.
pub const SPRITE_PALETTE: [&str; 8] = [
    "elf_f",
    "elf_m",
    "knight_f",
    "knight_m",
    "lizard_f",
    "lizard_m",
    "wizzard_f",
    "wizzard_m",
];

/// Number of animation phases a sprite cycles through.
pub const ANIMATION_PHASES: u8 = 4;

/// Distance a unit travels for a single Move event.
pub const MOVE_STEP: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Unit vector for one step in screen coordinates (y grows downwards).
    pub fn delta(self) -> (f64, f64) {
        match self {
            Direction::Up => (0.0, -1.0),
            Direction::Down => (0.0, 1.0),
            Direction::Left => (-1.0, 0.0),
            Direction::Right => (1.0, 0.0),
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }
}

/// One participant's avatar in the shared world.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub sprite_name: String,
    pub action: Action,
    // Facing only tracks the last horizontal move; vertical moves keep it.
    pub facing: Direction,
    // Offset into the sprite animation cycle so units don't animate in lockstep.
    pub frame: u8,
    pub speed: Option<f64>,
}

impl Unit {
    pub fn new(id: impl Into<String>, x: f64, y: f64, sprite_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            sprite_name: sprite_name.into(),
            action: Action::Idle,
            facing: Direction::default(),
            frame: 0,
            speed: None,
        }
    }

    /// Applies a single Move step.
    pub fn step(&mut self, direction: Direction) {
        let (dx, dy) = direction.delta();
        self.x += dx * MOVE_STEP;
        self.y += dy * MOVE_STEP;
        self.action = Action::Running;
        if direction.is_horizontal() {
            self.facing = direction;
        }
    }
}

/// Unit id -> unit. Iteration order carries no meaning.
pub type Units = HashMap<String, Unit>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_unit_moves_vertically_then_facing_is_kept() {
        let mut unit = Unit::new("u1", 5.0, 5.0, "elf_f");
        unit.facing = Direction::Left;

        unit.step(Direction::Up);

        assert_eq!((unit.x, unit.y), (5.0, 4.0));
        assert_eq!(unit.facing, Direction::Left);
        assert_eq!(unit.action, Action::Running);
    }

    #[test]
    fn when_unit_moves_right_then_facing_turns_right() {
        let mut unit = Unit::new("u1", 5.0, 5.0, "elf_f");

        unit.step(Direction::Right);

        assert_eq!((unit.x, unit.y), (6.0, 5.0));
        assert_eq!(unit.facing, Direction::Right);
    }

    #[test]
    fn when_unit_is_created_then_it_starts_idle() {
        let unit = Unit::new("u1", 0.0, 0.0, "knight_m");

        assert_eq!(unit.action, Action::Idle);
        assert_eq!(unit.speed, None);
    }
}
