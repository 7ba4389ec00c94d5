//! Integration tests for the lockstep protocol path: gating,
//! confirmation handling, catch-up, and command ordering.

use std::collections::BTreeMap;

use lockstep_core::prelude::*;

fn client() -> Game {
    Game::new(
        GameMode::NetworkClient,
        WorldMap::new(32, 32, Fixed::ONE),
        SimConfig::default(),
    )
}

fn deposit(player: PlayerId, amount: i64) -> Command {
    Command::new(
        player,
        CommandKind::Deposit {
            amount: Fixed::from_int(amount),
        },
    )
}

#[test]
fn frame_gating_truth_table() {
    let mut sync = FrameSynchronizer::new(300);

    // confirmed = -1, current = -1: gated
    assert!(!sync.can_advance_frame());

    // ConfirmFrame(0, []) opens the gate
    assert!(sync.confirm_frame(0, vec![]));
    assert!(sync.can_advance_frame());

    // PrepareNextFrame returns 0 and advances current to 0
    let mut queue = CommandQueue::new();
    assert_eq!(sync.prepare_next_frame(&mut queue), 0);
    assert_eq!(sync.current_frame(), 0);
    assert!(!sync.can_advance_frame());
}

#[test]
fn duplicate_and_stale_confirmations_are_ignored() {
    let mut game = client();
    assert!(game.confirm_frame(0, vec![deposit(0, 5)]));
    assert!(game.update());
    assert_eq!(game.world().credits(0), Fixed::from_int(5));

    // The same frame again must not change anything
    assert!(!game.confirm_frame(0, vec![deposit(0, 500)]));
    assert!(!game.update());
    assert_eq!(game.world().credits(0), Fixed::from_int(5));
}

#[test]
fn client_executes_only_confirmed_frames() {
    let mut game = client();

    for _ in 0..5 {
        assert!(!game.update());
    }
    assert_eq!(game.world().tick(), -1);

    game.confirm_frame(0, vec![]);
    game.confirm_frame(1, vec![deposit(1, 3)]);

    assert!(game.update());
    assert!(game.update());
    assert!(!game.update());

    assert_eq!(game.world().tick(), 1);
    assert_eq!(game.world().credits(1), Fixed::from_int(3));
}

#[test]
fn stall_timeout_is_reported_not_fatal() {
    let mut game = Game::new(
        GameMode::NetworkClient,
        WorldMap::new(8, 8, Fixed::ONE),
        SimConfig {
            max_wait_frames: 3,
            ..SimConfig::default()
        },
    );

    for _ in 0..3 {
        assert!(!game.update());
    }
    assert!(matches!(
        game.sync_status(),
        Some(SyncStatus::Waiting { .. })
    ));

    assert!(!game.update());
    assert!(matches!(
        game.sync_status(),
        Some(SyncStatus::TimedOut { ticks: 4 })
    ));

    // Recovery: a confirmation arrives and play resumes
    game.confirm_frame(0, vec![]);
    assert!(game.update());
    assert_eq!(game.sync_status(), Some(SyncStatus::Ready));
}

#[test]
fn catch_up_drains_backlog_then_resumes_pacing() {
    let mut game = client();

    // Play two frames normally
    game.confirm_frame(0, vec![]);
    game.confirm_frame(1, vec![]);
    assert!(game.update());
    assert!(game.update());

    // Reconnect with a burst of missed frames
    let mut missed = BTreeMap::new();
    missed.insert(2, vec![deposit(0, 1)]);
    missed.insert(3, vec![]);
    missed.insert(4, vec![deposit(0, 2)]);
    game.start_catch_up(missed);

    let mut executed = 0;
    while game.is_catching_up() {
        if game.update() {
            executed += 1;
        }
    }
    assert_eq!(executed, 3);
    assert_eq!(game.world().tick(), 4);
    assert_eq!(game.world().credits(0), Fixed::from_int(3));

    // Back to normal gating
    assert!(!game.update());
    game.confirm_frame(5, vec![]);
    assert!(game.update());
}

#[test]
fn command_order_is_independent_of_submission_order() {
    // Two clients receive the same confirmed frame with the entries in
    // different list orders; both must apply player 0 before player 1
    // and end bit-identical.
    let run = |commands: Vec<Command>| {
        let mut game = Game::new(
            GameMode::Standalone,
            WorldMap::new(32, 32, Fixed::ONE),
            SimConfig::default(),
        );
        let unit = game
            .world_mut()
            .spawn_unit(1, 1, FixedVec2::from_ints(4, 4));
        for command in commands {
            game.submit_command(command);
        }
        game.update();
        (unit, game)
    };

    let move_cmd = |unit| {
        Command::new(
            1,
            CommandKind::Move {
                units: vec![unit],
                target: FixedVec2::from_ints(20, 20),
            },
        )
    };
    let stop_cmd = |unit| {
        Command::new(
            0,
            CommandKind::Stop { units: vec![unit] },
        )
    };

    // Forward order: player 1 Move submitted first
    let (unit_a, game_a) = {
        let probe = run(vec![]);
        let unit = probe.0;
        run(vec![move_cmd(unit), stop_cmd(unit)])
    };
    // Reversed submission
    let (unit_b, game_b) = {
        let probe = run(vec![]);
        let unit = probe.0;
        run(vec![stop_cmd(unit), move_cmd(unit)])
    };

    // Player 0's Stop sorts first, player 1's Move second: the move
    // target survives in both cases.
    assert!(game_a
        .world()
        .entities()
        .get(unit_a)
        .unwrap()
        .move_target
        .is_some());
    assert!(game_b
        .world()
        .entities()
        .get(unit_b)
        .unwrap()
        .move_target
        .is_some());
    assert_eq!(game_a.world().state_hash(), game_b.world().state_hash());
}

#[test]
fn confirmed_frame_message_feeds_the_synchronizer() {
    let message = ConfirmedFrame {
        frame: 0,
        commands: vec![deposit(0, 9), deposit(1, 4)],
    };
    let bytes = message.encode().unwrap();

    let mut game = client();
    let decoded = ConfirmedFrame::decode(&bytes).unwrap();
    game.confirm_frame(decoded.frame, decoded.commands);

    assert!(game.update());
    assert_eq!(game.world().credits(0), Fixed::from_int(9));
    assert_eq!(game.world().credits(1), Fixed::from_int(4));
}

#[test]
fn local_commands_round_trip_through_the_authority() {
    let mut game = client();
    game.submit_command(deposit(0, 42));

    // Nothing executes locally until the authority confirms
    assert!(!game.update());
    assert_eq!(game.world().credits(0), Fixed::ZERO);

    // Transport drains the pending command, the authority schedules it
    let outgoing = game.drain_outgoing_commands();
    assert_eq!(outgoing.len(), 1);
    game.confirm_frame(0, outgoing);

    assert!(game.update());
    assert_eq!(game.world().credits(0), Fixed::from_int(42));
}
