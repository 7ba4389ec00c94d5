//! Replay recording and playback.
//!
//! A replay is an initial world snapshot plus the ordered list of
//! `(tick, command)` pairs that were executed. Feeding the commands
//! back through the command queue in recorded order deterministically
//! recreates the game; the final state hash verifies the playback.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::{Result, SimError};
use crate::world::{Tick, World};

/// Replay file format version.
pub const REPLAY_VERSION: u32 = 1;

/// One recorded command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayCommand {
    /// Tick the command executed on.
    pub tick: Tick,
    /// The command.
    pub command: Command,
}

/// Complete replay data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replay {
    /// Format version.
    pub version: u32,
    /// Scenario identifier.
    pub scenario_id: String,
    /// Seed the scenario was generated with.
    pub seed: u64,
    /// Serialized initial world.
    pub initial_state: Vec<u8>,
    /// Commands in tick order.
    pub commands: Vec<ReplayCommand>,
    /// Tick the game ended on.
    pub final_tick: Tick,
    /// State hash at `final_tick`, for verification.
    pub final_hash: u64,
}

impl Replay {
    /// Start a replay from a world's current state.
    pub fn new(scenario_id: impl Into<String>, seed: u64, initial_state: &World) -> Result<Self> {
        Ok(Self {
            version: REPLAY_VERSION,
            scenario_id: scenario_id.into(),
            seed,
            initial_state: initial_state.serialize()?,
            commands: Vec::new(),
            final_tick: 0,
            final_hash: 0,
        })
    }

    /// Record an executed command.
    pub fn record_command(&mut self, tick: Tick, command: Command) {
        self.commands.push(ReplayCommand { tick, command });
    }

    /// Record a command queue's retained history wholesale.
    pub fn record_history(&mut self, history: &[(Tick, Command)]) {
        for (tick, command) in history {
            self.record_command(*tick, command.clone());
        }
    }

    /// Close the replay with the end-of-game tick and hash.
    pub fn finalize(&mut self, final_tick: Tick, final_hash: u64) {
        self.final_tick = final_tick;
        self.final_hash = final_hash;
    }

    /// Write the replay to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| SimError::InvalidState(format!("Failed to serialize replay: {e}")))?;
        std::fs::write(path.as_ref(), bytes)
            .map_err(|e| SimError::InvalidState(format!("Failed to write replay file: {e}")))?;
        Ok(())
    }

    /// Read a replay from a file, rejecting version mismatches.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| SimError::InvalidState(format!("Failed to read replay file: {e}")))?;
        let replay: Self = bincode::deserialize(&bytes)
            .map_err(|e| SimError::InvalidState(format!("Failed to deserialize replay: {e}")))?;

        if replay.version != REPLAY_VERSION {
            return Err(SimError::ReplayVersionMismatch {
                expected: REPLAY_VERSION,
                found: replay.version,
            });
        }
        Ok(replay)
    }

    /// Rebuild the initial world.
    pub fn restore_initial_state(&self) -> Result<World> {
        World::deserialize(&self.initial_state)
    }

    /// Commands recorded for one tick.
    #[must_use]
    pub fn commands_at_tick(&self, tick: Tick) -> Vec<&ReplayCommand> {
        self.commands.iter().filter(|c| c.tick == tick).collect()
    }

    /// Length of the replay in ticks.
    #[must_use]
    pub const fn duration(&self) -> Tick {
        self.final_tick
    }

    /// Total recorded commands.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

/// Replay playback controller.
#[derive(Debug)]
pub struct ReplayPlayer {
    replay: Replay,
    world: World,
    command_index: usize,
    /// Whether playback is paused.
    pub paused: bool,
}

impl ReplayPlayer {
    /// Start playback from the replay's initial state.
    pub fn new(replay: Replay) -> Result<Self> {
        let world = replay.restore_initial_state()?;
        Ok(Self {
            replay,
            world,
            command_index: 0,
            paused: false,
        })
    }

    /// Advance by one tick, feeding that tick's recorded commands
    /// through the command queue first.
    ///
    /// Returns whether more ticks remain.
    pub fn advance(&mut self) -> bool {
        if self.paused || self.world.tick() >= self.replay.final_tick {
            return self.world.tick() < self.replay.final_tick;
        }

        let next_tick = self.world.tick() + 1;
        while self.command_index < self.replay.commands.len() {
            let recorded = &self.replay.commands[self.command_index];
            if recorded.tick > next_tick {
                break;
            }
            let mut command = recorded.command.clone();
            command.execute_frame = Some(recorded.tick.max(next_tick));
            let current = self.world.tick();
            self.world.command_queue_mut().submit(command, current);
            self.command_index += 1;
        }

        self.world.update(None);
        self.world.tick() < self.replay.final_tick
    }

    /// Jump to a tick by replaying from the start.
    ///
    /// Frames only ever execute forward; seeking backward restores the
    /// initial snapshot and replays up to the target.
    pub fn seek(&mut self, target_tick: Tick) -> Result<()> {
        self.world = self.replay.restore_initial_state()?;
        self.command_index = 0;

        let was_paused = self.paused;
        self.paused = false;
        while self.world.tick() < target_tick && self.world.tick() < self.replay.final_tick {
            self.advance();
        }
        self.paused = was_paused;
        Ok(())
    }

    /// Current playback tick.
    #[must_use]
    pub const fn current_tick(&self) -> Tick {
        self.world.tick()
    }

    /// The world being played back.
    #[must_use]
    pub const fn world(&self) -> &World {
        &self.world
    }

    /// The replay being played.
    #[must_use]
    pub const fn replay(&self) -> &Replay {
        &self.replay
    }

    /// Whether playback reached the final tick.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.world.tick() >= self.replay.final_tick
    }

    /// Play to the end and compare the final hash.
    pub fn verify(&mut self) -> Result<bool> {
        self.seek(self.replay.final_tick)?;
        Ok(self.world.state_hash() == self.replay.final_hash)
    }

    /// Toggle pause.
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Playback progress for presentation (0-100).
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.replay.final_tick <= 0 {
            100.0
        } else {
            (self.world.tick().max(0) as f64 / self.replay.final_tick as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use crate::config::SimConfig;
    use crate::map::WorldMap;
    use crate::math::Fixed;

    fn test_world() -> World {
        World::new(WorldMap::new(16, 16, Fixed::ONE), SimConfig::default())
    }

    fn deposit(player: u32, amount: i64) -> Command {
        Command::new(
            player,
            CommandKind::Deposit {
                amount: Fixed::from_int(amount),
            },
        )
    }

    #[test]
    fn test_record_and_query() {
        let world = test_world();
        let mut replay = Replay::new("skirmish", 42, &world).unwrap();

        replay.record_command(0, deposit(0, 5));
        replay.record_command(3, deposit(1, 2));
        replay.record_command(3, deposit(0, 1));

        assert_eq!(replay.command_count(), 3);
        assert_eq!(replay.commands_at_tick(3).len(), 2);
        assert_eq!(replay.commands_at_tick(1).len(), 0);
    }

    #[test]
    fn test_playback_reproduces_final_hash() {
        // Record a run
        let mut world = test_world();
        world.command_queue_mut().record_history = true;
        let replay_start = Replay::new("skirmish", 7, &world).unwrap();

        world.submit_command(deposit(0, 10));
        world.update(None);
        let mut scheduled = deposit(1, 4);
        scheduled.execute_frame = Some(5);
        world.submit_command(scheduled);
        for _ in 0..9 {
            world.update(None);
        }

        let mut replay = replay_start;
        replay.record_history(world.command_queue().history());
        replay.finalize(world.tick(), world.state_hash());

        // Play it back
        let mut player = ReplayPlayer::new(replay).unwrap();
        assert!(player.verify().unwrap());
        assert_eq!(player.world().credits(0), Fixed::from_int(10));
        assert_eq!(player.world().credits(1), Fixed::from_int(4));
    }

    #[test]
    fn test_seek_is_reproducible() {
        let mut world = test_world();
        world.command_queue_mut().record_history = true;
        let mut replay = Replay::new("seek", 1, &world).unwrap();

        world.submit_command(deposit(0, 3));
        for _ in 0..20 {
            world.update(None);
        }
        replay.record_history(world.command_queue().history());
        replay.finalize(world.tick(), world.state_hash());

        let mut player = ReplayPlayer::new(replay).unwrap();
        player.seek(10).unwrap();
        assert_eq!(player.current_tick(), 10);
        let hash_at_10 = player.world().state_hash();

        player.seek(19).unwrap();
        player.seek(10).unwrap();
        assert_eq!(player.world().state_hash(), hash_at_10);
    }

    #[test]
    fn test_pause_blocks_advance() {
        let world = test_world();
        let mut replay = Replay::new("pause", 0, &world).unwrap();
        replay.finalize(10, 0);

        let mut player = ReplayPlayer::new(replay).unwrap();
        player.paused = true;
        let before = player.current_tick();
        player.advance();
        assert_eq!(player.current_tick(), before);

        player.toggle_pause();
        player.advance();
        assert_eq!(player.current_tick(), before + 1);
    }

    #[test]
    fn test_save_load_version_check() {
        let world = test_world();
        let mut replay = Replay::new("file", 9, &world).unwrap();
        replay.record_command(0, deposit(0, 1));
        replay.finalize(5, 0xDEAD_BEEF);

        let path = std::env::temp_dir().join("lockstep_replay_test.bin");
        replay.save(&path).unwrap();

        let loaded = Replay::load(&path).unwrap();
        assert_eq!(loaded.scenario_id, "file");
        assert_eq!(loaded.seed, 9);
        assert_eq!(loaded.command_count(), 1);
        assert_eq!(loaded.final_hash, 0xDEAD_BEEF);

        // Corrupt the version and confirm rejection
        let mut bad = loaded;
        bad.version = REPLAY_VERSION + 1;
        bad.save(&path).unwrap();
        assert!(matches!(
            Replay::load(&path),
            Err(SimError::ReplayVersionMismatch { .. })
        ));

        let _ = std::fs::remove_file(path);
    }
}
