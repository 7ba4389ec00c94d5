//! Per-tick command buffering and dispatch order.
//!
//! The queue owns the near-term command buffers: an immediate queue for
//! the tick being executed and a future buffer keyed by tick for
//! commands the synchronizer has already pinned. The world drains the
//! queue each tick via [`CommandQueue::take_due`] and executes the
//! result; ordering is decided here so every mode (standalone, client,
//! server, replay) applies the same total order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::world::Tick;

/// Command buffers plus optional replay history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandQueue {
    /// Commands to run on the next executed tick.
    immediate: Vec<Command>,
    /// Commands pinned to future ticks.
    future: BTreeMap<Tick, Vec<Command>>,
    /// Executed `(tick, command)` pairs, kept when `record_history` is on.
    history: Vec<(Tick, Command)>,
    /// Whether executed commands are retained for replay.
    pub record_history: bool,
}

impl CommandQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a command.
    ///
    /// Unscheduled commands and commands targeting `current_tick` (or
    /// an already-passed tick, which is logged) go to the immediate
    /// queue; future ticks are buffered until due.
    pub fn submit(&mut self, command: Command, current_tick: Tick) {
        match command.execute_frame {
            Some(frame) if frame > current_tick => {
                self.future.entry(frame).or_default().push(command);
            }
            Some(frame) if frame < current_tick => {
                tracing::warn!(
                    frame,
                    current_tick,
                    tag = command.type_tag(),
                    "Command scheduled for a past tick, executing immediately"
                );
                self.immediate.push(command);
            }
            _ => self.immediate.push(command),
        }
    }

    /// Submit several commands.
    pub fn submit_all(&mut self, commands: impl IntoIterator<Item = Command>, current_tick: Tick) {
        for command in commands {
            self.submit(command, current_tick);
        }
    }

    /// Drain everything due at `tick` in deterministic execution order.
    ///
    /// Pulls the future buffer for the tick into the immediate queue,
    /// then stable-sorts by `(player, type_tag)`. The stable sort keeps
    /// submission order for commands from the same player with the same
    /// tag.
    #[must_use]
    pub fn take_due(&mut self, tick: Tick) -> Vec<Command> {
        let mut due = std::mem::take(&mut self.immediate);
        if let Some(buffered) = self.future.remove(&tick) {
            due.extend(buffered);
        }
        due.sort_by_key(Command::sort_key);
        due
    }

    /// Record an executed command for replay.
    pub fn record(&mut self, tick: Tick, command: Command) {
        if self.record_history {
            self.history.push((tick, command));
        }
    }

    /// Executed history in tick order.
    #[must_use]
    pub fn history(&self) -> &[(Tick, Command)] {
        &self.history
    }

    /// Clear retained history.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Commands waiting in either buffer.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.immediate.len() + self.future.values().map(Vec::len).sum::<usize>()
    }

    /// Drop all buffered commands (history is kept).
    pub fn clear(&mut self) {
        self.immediate.clear();
        self.future.clear();
    }
}
