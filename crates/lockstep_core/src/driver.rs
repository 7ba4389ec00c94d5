//! Mode-aware simulation driver.
//!
//! One [`Game::update`] entry point serves four modes. Standalone,
//! server and replay step unconditionally; a network client is gated by
//! the frame synchronizer and adopts the prepared frame number so the
//! world's tick counter cannot drift from the synchronizer's. All modes
//! funnel through the same internal logic-frame path.
//!
//! The driver is driven externally (a render loop, a server loop, a
//! test). During catch-up it executes one confirmed frame per call;
//! a host that wants to burn backlog faster calls `update` in its own
//! loop and caps iterations against its frame budget.

use std::collections::BTreeMap;

use crate::command::Command;
use crate::config::SimConfig;
use crate::map::WorldMap;
use crate::sync::{FrameSynchronizer, SyncStatus};
use crate::world::{Tick, TickEvents, World};

/// How the simulation is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    /// Local play, no synchronization.
    Standalone,
    /// Peer gated by server-confirmed frames.
    NetworkClient,
    /// Authoritative server, steps freely.
    NetworkServer,
    /// Playback of a recorded command stream.
    Replay,
}

/// Top-level driver owning the world and, in client mode, the
/// synchronizer.
#[derive(Debug)]
pub struct Game {
    world: World,
    sync: Option<FrameSynchronizer>,
    mode: GameMode,
    catching_up: bool,
    paused: bool,
    last_events: TickEvents,
    last_gate: Option<SyncStatus>,
}

impl Game {
    /// Create a driver for the given mode.
    #[must_use]
    pub fn new(mode: GameMode, map: WorldMap, config: SimConfig) -> Self {
        let sync = if mode == GameMode::NetworkClient {
            Some(FrameSynchronizer::new(config.max_wait_frames))
        } else {
            None
        };
        let world = World::new(map, config);

        tracing::debug!(?mode, "Game initialized");
        Self {
            world,
            sync,
            mode,
            catching_up: false,
            paused: false,
            last_events: TickEvents::default(),
            last_gate: None,
        }
    }

    /// The game mode.
    #[must_use]
    pub const fn mode(&self) -> GameMode {
        self.mode
    }

    /// The world.
    #[must_use]
    pub const fn world(&self) -> &World {
        &self.world
    }

    /// Mutable world access (scenario setup, tests).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The synchronizer (client mode only).
    #[must_use]
    pub const fn synchronizer(&self) -> Option<&FrameSynchronizer> {
        self.sync.as_ref()
    }

    /// Events from the most recently executed logic frame.
    #[must_use]
    pub const fn last_events(&self) -> &TickEvents {
        &self.last_events
    }

    /// Gate status observed on the most recent client-mode update.
    #[must_use]
    pub const fn sync_status(&self) -> Option<SyncStatus> {
        self.last_gate
    }

    /// Whether the driver is burning confirmed backlog.
    #[must_use]
    pub const fn is_catching_up(&self) -> bool {
        self.catching_up
    }

    /// Whether ticking is suspended.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Suspend ticking. Catch-up is not suspended: backlog represents
    /// frames that must clear before normal play can resume.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume ticking.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Run one driver cycle.
    ///
    /// Returns whether a logic frame executed. A client returns `false`
    /// while waiting for confirmation (cooperative wait: no blocking,
    /// no thread parking; the host simply calls again next cycle).
    pub fn update(&mut self) -> bool {
        if self.paused && !self.catching_up {
            return false;
        }

        if self.catching_up {
            return self.update_catch_up();
        }

        match self.mode {
            GameMode::Standalone | GameMode::NetworkServer | GameMode::Replay => {
                self.execute_logic_frame(None);
                true
            }
            GameMode::NetworkClient => {
                let Some(sync) = self.sync.as_mut() else {
                    tracing::error!("Client mode without a frame synchronizer");
                    return false;
                };

                let gate = sync.poll_gate();
                self.last_gate = Some(gate);
                if gate != SyncStatus::Ready {
                    return false;
                }

                let frame = sync.prepare_next_frame(self.world.command_queue_mut());
                self.execute_logic_frame(Some(frame));
                true
            }
        }
    }

    /// One catch-up step: prepare and execute the next confirmed frame
    /// with no gating, until the backlog is clear.
    fn update_catch_up(&mut self) -> bool {
        let Some(sync) = self.sync.as_mut() else {
            self.catching_up = false;
            return false;
        };

        if !sync.has_pending_frames() {
            self.catching_up = false;
            tracing::debug!(tick = self.world.tick(), "Catch-up complete");
            return false;
        }

        let frame = sync.prepare_next_frame(self.world.command_queue_mut());
        self.execute_logic_frame(Some(frame));
        true
    }

    /// Execute one logic frame. Every mode ends up here.
    fn execute_logic_frame(&mut self, target_tick: Option<Tick>) {
        self.last_events = self.world.update(target_tick);
    }

    /// Submit a command through the mode-appropriate path.
    ///
    /// Standalone, server and replay commands go straight to the queue;
    /// client commands go to the synchronizer, which gets them confirmed
    /// and scheduled by the authority.
    pub fn submit_command(&mut self, command: Command) {
        match self.mode {
            GameMode::Standalone | GameMode::NetworkServer | GameMode::Replay => {
                self.world.submit_command(command);
            }
            GameMode::NetworkClient => {
                if let Some(sync) = self.sync.as_mut() {
                    sync.submit_local(command);
                } else {
                    tracing::error!("Client mode without a frame synchronizer");
                }
            }
        }
    }

    /// Deliver an authority confirmation (client mode).
    pub fn confirm_frame(&mut self, frame: Tick, commands: Vec<Command>) -> bool {
        match self.sync.as_mut() {
            Some(sync) => sync.confirm_frame(frame, commands),
            None => {
                tracing::warn!(frame, "Frame confirmation outside client mode dropped");
                false
            }
        }
    }

    /// Take locally issued commands for sending to the authority.
    #[must_use]
    pub fn drain_outgoing_commands(&mut self) -> Vec<Command> {
        self.sync
            .as_mut()
            .map(FrameSynchronizer::drain_pending_local)
            .unwrap_or_default()
    }

    /// Enter catch-up after a reconnect: bulk-confirm the missed frames
    /// and burn them down on subsequent updates.
    pub fn start_catch_up(&mut self, frames: BTreeMap<Tick, Vec<Command>>) {
        if self.mode != GameMode::NetworkClient {
            tracing::warn!("Catch-up requested outside client mode");
            return;
        }
        let Some(sync) = self.sync.as_mut() else {
            return;
        };
        if sync.confirm_frames(frames).is_none() {
            tracing::warn!("Catch-up requested with no frames");
            return;
        }

        self.catching_up = true;
        tracing::debug!(
            pending = sync.pending_frame_count(),
            tick = self.world.tick(),
            "Catch-up started"
        );
    }

    /// Confirmed frames not yet executed (client mode).
    #[must_use]
    pub fn pending_frames(&self) -> Tick {
        self.sync
            .as_ref()
            .map_or(0, FrameSynchronizer::pending_frame_count)
    }

    /// Catch-up progress for presentation. Boundary conversion only;
    /// nothing deterministic may consume this.
    #[must_use]
    pub fn catch_up_progress(&self) -> f32 {
        if !self.catching_up {
            return 1.0;
        }
        let pending = self.pending_frames() as f32;
        (1.0 - pending / 100.0).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use crate::math::Fixed;

    fn game(mode: GameMode) -> Game {
        Game::new(
            mode,
            WorldMap::new(16, 16, Fixed::ONE),
            SimConfig::default(),
        )
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
    fn test_standalone_steps_every_update() {
        let mut game = game(GameMode::Standalone);
        assert!(game.update());
        assert!(game.update());
        assert_eq!(game.world().tick(), 1);
    }

    #[test]
    fn test_client_waits_for_confirmation() {
        let mut game = game(GameMode::NetworkClient);

        assert!(!game.update());
        assert_eq!(game.world().tick(), -1);
        assert!(matches!(
            game.sync_status(),
            Some(SyncStatus::Waiting { ticks: 1 })
        ));

        game.confirm_frame(0, vec![deposit(0, 5)]);
        assert!(game.update());
        assert_eq!(game.world().tick(), 0);
        assert_eq!(game.world().credits(0), Fixed::from_int(5));

        // Confirmed frame consumed: gated again
        assert!(!game.update());
    }

    #[test]
    fn test_client_world_tick_follows_synchronizer() {
        let mut game = game(GameMode::NetworkClient);
        for frame in 0..5 {
            game.confirm_frame(frame, vec![]);
        }
        while game.update() {}

        assert_eq!(game.world().tick(), 4);
        assert_eq!(game.synchronizer().unwrap().current_frame(), 4);
    }

    #[test]
    fn test_pause_blocks_ticking() {
        let mut game = game(GameMode::Standalone);
        game.pause();
        assert!(!game.update());
        assert_eq!(game.world().tick(), -1);

        game.resume();
        assert!(game.update());
    }

    #[test]
    fn test_catch_up_wins_over_pause() {
        let mut game = game(GameMode::NetworkClient);
        game.pause();

        let mut frames = BTreeMap::new();
        for frame in 0..4 {
            frames.insert(frame, vec![]);
        }
        game.start_catch_up(frames);
        assert!(game.is_catching_up());

        // Paused, but catch-up still burns the backlog one frame per call
        assert!(game.update());
        assert!(game.update());
        assert!(game.update());
        assert!(game.update());
        assert_eq!(game.world().tick(), 3);

        // Backlog clear: catch-up ends, pause applies again
        assert!(!game.update());
        assert!(!game.is_catching_up());
        assert_eq!(game.world().tick(), 3);
    }

    #[test]
    fn test_command_routing_by_mode() {
        let mut standalone = game(GameMode::Standalone);
        standalone.submit_command(deposit(0, 7));
        assert_eq!(standalone.world().command_queue().pending_count(), 1);

        let mut client = game(GameMode::NetworkClient);
        client.submit_command(deposit(0, 7));
        assert_eq!(client.world().command_queue().pending_count(), 0);
        assert_eq!(client.drain_outgoing_commands().len(), 1);
    }

    #[test]
    fn test_catch_up_progress_is_presentation_only() {
        let mut game = game(GameMode::NetworkClient);
        assert!((game.catch_up_progress() - 1.0).abs() < f32::EPSILON);

        let mut frames = BTreeMap::new();
        for frame in 0..10 {
            frames.insert(frame, vec![]);
        }
        game.start_catch_up(frames);
        assert!(game.catch_up_progress() < 1.0);
    }
}
