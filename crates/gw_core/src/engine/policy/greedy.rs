//! Greedy single-agent fallback.

use crate::engine::geometry::{nearest_goal, Direction, Goal, Position};

/// One step towards the nearest goal along the axis with the larger remaining
/// distance; equal distances move along the row axis. `None` when standing on
/// the goal or when there are no goals.
pub fn greedy_step(pos: Position, goals: &[Goal]) -> Option<Direction> {
    let target = nearest_goal(pos, goals)?.pos;
    let dr = target.row - pos.row;
    let dc = target.col - pos.col;

    if dr == 0 && dc == 0 {
        return None;
    }
    if dr.abs() >= dc.abs() {
        Some(if dr > 0 { Direction::Down } else { Direction::Up })
    } else {
        Some(if dc > 0 { Direction::Right } else { Direction::Left })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greedy_prefers_row_on_tie() {
        let goals = [Goal::new(0, Position::new(3, 3))];
        assert_eq!(greedy_step(Position::new(0, 0), &goals), Some(Direction::Down));
        assert_eq!(greedy_step(Position::new(6, 6), &goals), Some(Direction::Up));
    }

    #[test]
    fn test_greedy_follows_larger_axis() {
        let goals = [Goal::new(0, Position::new(7, 12))];
        assert_eq!(greedy_step(Position::new(6, 2), &goals), Some(Direction::Right));
        assert_eq!(greedy_step(Position::new(7, 12), &goals), None);
        assert_eq!(greedy_step(Position::new(7, 12), &[]), None);
    }

    #[test]
    fn test_greedy_picks_nearest_goal() {
        let goals = [Goal::new(0, Position::new(0, 7)), Goal::new(1, Position::new(14, 7))];
        assert_eq!(greedy_step(Position::new(10, 7), &goals), Some(Direction::Down));
    }
}
