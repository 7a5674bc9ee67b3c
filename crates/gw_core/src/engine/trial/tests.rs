//! Trial flow tests: shared-goal injection, solo completion, snapshot round trips.

#[cfg(test)]
mod trial_flow_tests {
    use std::cell::Cell;

    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use crate::engine::config::{GridConfig, PlacementConfig};
    use crate::engine::geometry::{distance, Direction, PlayerId, Position};
    use crate::engine::placement::{
        DistanceCondition, GoalCondition, GoalPlacement, GoalPlacementSolver, GoalPlacer, PlacementRequest,
        SoloCondition,
    };
    use crate::engine::trial::*;

    /// Wraps the real solver and counts calls.
    struct CountingPlacer {
        inner: GoalPlacementSolver,
        calls: Cell<u32>,
    }

    impl CountingPlacer {
        fn new() -> Self {
            Self { inner: GoalPlacementSolver::new(PlacementConfig::default()), calls: Cell::new(0) }
        }
    }

    impl GoalPlacer for CountingPlacer {
        fn place(&self, request: &PlacementRequest<'_>, rng: &mut dyn RngCore) -> Option<GoalPlacement> {
            self.calls.set(self.calls.get() + 1);
            self.inner.place(request, rng)
        }

        fn min_steps_before_new_goal(&self) -> u32 {
            self.inner.min_steps_before_new_goal()
        }
    }

    fn two_player_design() -> TrialDesign {
        TrialDesign {
            experiment: ExperimentType::TwoP3G,
            player1: Position::new(7, 2),
            player2: Some(Position::new(7, 12)),
            goals: vec![Position::new(1, 7), Position::new(13, 7)],
            obstacles: vec![],
        }
    }

    #[test]
    fn test_shared_goal_triggers_single_injection() {
        let cond = GoalCondition::Pair(DistanceCondition::EqualToBoth);
        let mut m = TrialMachine::new(1, &two_player_design(), &GridConfig::default(), cond).unwrap();
        m.start(0);
        let placer = CountingPlacer::new();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        // Only player 1 has an intent so far: no trigger, placer untouched.
        m.apply_move(PlayerId::Player1, Direction::Up, 100).unwrap();
        assert!(m.evaluate_new_goal(&placer, &mut rng).is_none());
        assert_eq!(placer.calls.get(), 0);

        m.apply_move(PlayerId::Player2, Direction::Up, 150).unwrap();
        assert_eq!(m.state().track(PlayerId::Player1).latest_intent(), Some(0));
        assert_eq!(m.state().track(PlayerId::Player2).latest_intent(), Some(0));
        assert_eq!(m.state().first_detected_shared_goal, Some(0));

        // Local goal-check tick.
        let record = m.evaluate_new_goal(&placer, &mut rng).expect("goal injected");
        // Remote state-sync tick racing the local one.
        assert!(m.evaluate_new_goal(&placer, &mut rng).is_none());
        // Later tick after another move.
        m.apply_move(PlayerId::Player1, Direction::Up, 300).unwrap();
        assert!(m.evaluate_new_goal(&placer, &mut rng).is_none());

        assert_eq!(placer.calls.get(), 1);
        let s = m.state();
        assert!(s.new_goal_presented);
        assert_eq!(s.goals.len(), 3);
        assert_eq!(record.goal_index, 2);
        assert!(!record.relaxed);

        // Equal condition: equidistant at the moment of injection.
        let new_pos = s.goals[2].pos;
        assert_eq!(distance(Position::new(6, 2), new_pos), distance(Position::new(6, 12), new_pos));
    }

    #[test]
    fn test_solo_trigger_requires_two_goals() {
        let design = TrialDesign::fallback(ExperimentType::OneP2G);
        let cond = GoalCondition::Solo(SoloCondition::CloserToPlayer1);
        let mut m = TrialMachine::new(4, &design, &GridConfig::default(), cond).unwrap();
        m.start(0);
        let placer = CountingPlacer::new();
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        m.apply_move(PlayerId::Player1, Direction::Up, 50).unwrap();
        assert_eq!(m.shared_goal_trigger(), Some(0));
        let record = m.evaluate_new_goal(&placer, &mut rng).expect("solo goal injected");
        assert_eq!(m.state().goals.len(), 3);
        // Three goals on the board: trigger no longer fires.
        assert_eq!(m.shared_goal_trigger(), None);
        assert!(record.distance_to_player1 < distance(Position::new(6, 7), Position::new(2, 7)));
        assert_eq!(placer.calls.get(), 1);
    }

    #[test]
    fn test_solo_placement_measures_from_first_goal() {
        let design = TrialDesign {
            experiment: ExperimentType::OneP2G,
            player1: Position::new(10, 5),
            player2: None,
            goals: vec![Position::new(2, 5), Position::new(13, 5)],
            obstacles: vec![],
        };
        let cond = GoalCondition::Solo(SoloCondition::CloserToPlayer1);
        let mut m = TrialMachine::new(6, &design, &GridConfig::default(), cond).unwrap();
        m.start(0);
        let placer = CountingPlacer::new();
        let mut rng = ChaCha8Rng::seed_from_u64(21);

        // Heading for the second goal, two cells away.
        m.apply_move(PlayerId::Player1, Direction::Down, 50).unwrap();
        assert_eq!(m.shared_goal_trigger(), Some(1));

        let record = m.evaluate_new_goal(&placer, &mut rng).expect("solo goal injected");
        let first = Position::new(2, 5);
        let player = Position::new(11, 5);
        assert!(!record.relaxed);
        assert!(record.distance_to_player1 + 3 <= distance(player, first));
        assert!(distance(record.position, first) >= 3);
    }

    #[test]
    fn test_two_goal_variant_never_injects() {
        let design = TrialDesign::fallback(ExperimentType::TwoP2G);
        let cond = GoalCondition::Pair(DistanceCondition::CloserToPlayer1);
        let mut m = TrialMachine::new(5, &design, &GridConfig::default(), cond).unwrap();
        m.start(0);
        m.apply_move(PlayerId::Player1, Direction::Up, 1).unwrap();
        m.apply_move(PlayerId::Player2, Direction::Up, 2).unwrap();
        let placer = CountingPlacer::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(m.evaluate_new_goal(&placer, &mut rng).is_none());
        assert_eq!(placer.calls.get(), 0);
    }

    #[test]
    fn test_single_player_reaches_goal_in_three_moves() {
        let design = TrialDesign {
            experiment: ExperimentType::OneP1G,
            player1: Position::new(7, 7),
            player2: None,
            goals: vec![Position::new(7, 10)],
            obstacles: vec![],
        };
        let mut m = TrialMachine::new(0, &design, &GridConfig::default(), GoalCondition::default()).unwrap();
        m.start(0);

        let first = m.apply_move(PlayerId::Player1, Direction::Right, 200).unwrap();
        assert_eq!(first.verdict, CompletionVerdict::InProgress);
        let second = m.apply_move(PlayerId::Player1, Direction::Right, 400).unwrap();
        assert_eq!(second.verdict, CompletionVerdict::InProgress);
        let third = m.apply_move(PlayerId::Player1, Direction::Right, 600).unwrap();
        assert_eq!(third.verdict, CompletionVerdict::Completed(TrialOutcome::Reached));

        let s = m.state();
        assert_eq!(s.phase, TrialPhase::Completed);
        assert_eq!(s.player1, Position::new(7, 10));
        assert_eq!(s.step_count, 3);
        assert_eq!(s.collaboration_succeeded, None);
        assert_eq!(s.track(PlayerId::Player1).goal_reached_step, Some(3));
        assert_eq!(s.track(PlayerId::Player1).reaction_ms, vec![200, 200, 200]);

        assert_eq!(m.apply_move(PlayerId::Player1, Direction::Right, 800), Err(crate::MoveRejection::NotRunning));
    }

    #[test]
    fn test_snapshot_round_trip_keeps_verdict() {
        let design = TrialDesign::fallback(ExperimentType::TwoP2G);
        let mut m = TrialMachine::new(8, &design, &GridConfig::default(), GoalCondition::default()).unwrap();
        m.start(0);
        m.apply_synchronized_moves(Some(Direction::Up), Some(Direction::Up), 10).unwrap();
        m.apply_move(PlayerId::Player1, Direction::Right, 20).unwrap();

        let json = m.snapshot().to_json().unwrap();
        let parsed = TrialSnapshot::from_json(&json).unwrap();
        assert_eq!(parsed.check_completion(), m.check_completion());

        let rebuilt = TrialMachine::from_snapshot(&parsed).unwrap();
        assert_eq!(rebuilt.state().player1, m.state().player1);
        assert_eq!(rebuilt.state().player2, m.state().player2);
        assert_eq!(rebuilt.state().goals, m.state().goals);
        assert_eq!(rebuilt.state().step_count, m.state().step_count);
        assert_eq!(rebuilt.check_completion(), m.check_completion());
        assert_eq!(rebuilt.snapshot(), m.snapshot());
    }

    #[test]
    fn test_snapshot_round_trip_completed_trial() {
        let design = TrialDesign {
            experiment: ExperimentType::TwoP2G,
            player1: Position::new(3, 3),
            player2: Some(Position::new(3, 5)),
            goals: vec![Position::new(3, 4), Position::new(10, 10)],
            obstacles: vec![Position::new(0, 0)],
        };
        let mut m = TrialMachine::new(2, &design, &GridConfig::default(), GoalCondition::default()).unwrap();
        m.start(0);
        m.apply_synchronized_moves(Some(Direction::Right), Some(Direction::Left), 5).unwrap();
        assert_eq!(m.check_completion(), CompletionVerdict::Completed(TrialOutcome::Collaborated));

        let parsed = TrialSnapshot::from_json(&m.snapshot().to_json().unwrap()).unwrap();
        assert_eq!(parsed.check_completion(), m.check_completion());
        assert_eq!(parsed.obstacles, vec![Position::new(0, 0)]);
        let rebuilt = TrialMachine::from_snapshot(&parsed).unwrap();
        assert!(rebuilt.state().grid.is_obstacle(Position::new(0, 0)));
        assert_eq!(rebuilt.state().collaboration_succeeded, Some(true));
    }

    #[test]
    fn test_sync_from_twice_is_idempotent() {
        let design = TrialDesign::fallback(ExperimentType::TwoP2G);
        let mut host = TrialMachine::new(3, &design, &GridConfig::default(), GoalCondition::default()).unwrap();
        let mut guest = host.clone();
        host.start(0);
        host.apply_synchronized_moves(Some(Direction::Down), Some(Direction::Left), 10).unwrap();

        let snap = host.snapshot();
        assert!(guest.sync_from(&snap).unwrap());
        assert!(!guest.sync_from(&snap).unwrap());

        let s = guest.state();
        assert_eq!(s.step_count, 1);
        assert_eq!(s.track(PlayerId::Player1).trajectory.len(), 1);
        assert_eq!(s.track(PlayerId::Player2).actions, vec![Direction::Left]);
        assert_eq!(guest.snapshot(), snap);
    }
}
