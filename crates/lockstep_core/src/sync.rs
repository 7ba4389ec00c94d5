//! Lockstep frame synchronization.
//!
//! Reconciles locally executed ticks against the frame timeline the
//! authority has confirmed. The synchronizer only decides *whether* the
//! next frame may run and *which* commands belong to it; the driver
//! performs the actual world step. This keeps "decide what to run" and
//! "run it" strictly separate.
//!
//! Invariant: `current_frame <= confirmed_frame` before any client tick
//! executes. A violation blocks the tick; frames are never rolled back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::queue::CommandQueue;
use crate::world::Tick;

/// Gate state reported to the driver each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The next frame is confirmed and may execute.
    Ready,
    /// Waiting on the authority; `ticks` cycles skipped so far.
    Waiting {
        /// Consecutive gated cycles.
        ticks: u32,
    },
    /// The wait exceeded the configured limit. Recoverable: the caller
    /// decides (reconnect, resync); the simulation is untouched.
    TimedOut {
        /// Consecutive gated cycles.
        ticks: u32,
    },
}

/// Client-side frame synchronizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSynchronizer {
    /// Highest frame the authority has confirmed.
    confirmed_frame: Tick,
    /// Last frame locally prepared for execution.
    current_frame: Tick,
    /// Command sets for confirmed-but-unexecuted frames.
    frame_commands: BTreeMap<Tick, Vec<Command>>,
    /// Local commands sent to the authority, awaiting confirmation.
    pending_local: Vec<Command>,
    /// Gated cycles before a timeout is reported.
    max_wait_frames: u32,
    /// Consecutive cycles spent waiting.
    stalled_ticks: u32,
}

/// Gated cycles before the first "still waiting" warning.
const WAIT_WARN_THRESHOLD: u32 = 10;

impl FrameSynchronizer {
    /// Create a synchronizer aligned to "before frame 0".
    #[must_use]
    pub fn new(max_wait_frames: u32) -> Self {
        Self {
            confirmed_frame: -1,
            current_frame: -1,
            frame_commands: BTreeMap::new(),
            pending_local: Vec::new(),
            max_wait_frames,
            stalled_ticks: 0,
        }
    }

    /// Highest confirmed frame.
    #[must_use]
    pub const fn confirmed_frame(&self) -> Tick {
        self.confirmed_frame
    }

    /// Last locally prepared frame.
    #[must_use]
    pub const fn current_frame(&self) -> Tick {
        self.current_frame
    }

    /// Whether the next frame may execute: `current + 1 <= confirmed`.
    #[must_use]
    pub const fn can_advance_frame(&self) -> bool {
        self.current_frame + 1 <= self.confirmed_frame
    }

    /// Gate check with stall accounting.
    ///
    /// Call once per driver cycle. While gated, consecutive cycles are
    /// counted: past 10 a warning is logged, past `max_wait_frames` the
    /// status turns to [`SyncStatus::TimedOut`] (and stays there until a
    /// confirmation arrives). Both are signals, never unwinds.
    pub fn poll_gate(&mut self) -> SyncStatus {
        if self.can_advance_frame() {
            self.stalled_ticks = 0;
            return SyncStatus::Ready;
        }

        self.stalled_ticks = self.stalled_ticks.saturating_add(1);

        if self.stalled_ticks > self.max_wait_frames {
            if self.stalled_ticks == self.max_wait_frames + 1 {
                tracing::error!(
                    current_frame = self.current_frame,
                    confirmed_frame = self.confirmed_frame,
                    waited = self.stalled_ticks,
                    "Frame confirmation wait exceeded limit"
                );
            }
            SyncStatus::TimedOut {
                ticks: self.stalled_ticks,
            }
        } else {
            if self.stalled_ticks > WAIT_WARN_THRESHOLD {
                tracing::warn!(
                    current_frame = self.current_frame,
                    confirmed_frame = self.confirmed_frame,
                    waited = self.stalled_ticks,
                    "Waiting for frame confirmation"
                );
            }
            SyncStatus::Waiting {
                ticks: self.stalled_ticks,
            }
        }
    }

    /// Authority confirmation: frame `frame`'s final command set.
    ///
    /// Idempotent against duplicates and out-of-order delivery: a frame
    /// at or below the confirmed watermark is ignored with a warning.
    /// Returns whether the confirmation was accepted.
    pub fn confirm_frame(&mut self, frame: Tick, commands: Vec<Command>) -> bool {
        if frame <= self.confirmed_frame {
            tracing::warn!(
                frame,
                confirmed_frame = self.confirmed_frame,
                "Ignoring duplicate or stale frame confirmation"
            );
            return false;
        }

        self.confirmed_frame = frame;
        if !commands.is_empty() {
            self.frame_commands.insert(frame, commands);
        }
        tracing::debug!(frame, "Frame confirmed");
        true
    }

    /// Bulk confirmation for reconnection / catch-up.
    ///
    /// Returns the `(min, max)` confirmed range, or `None` for empty
    /// input. Stale entries still contribute their commands only if
    /// above the previous watermark.
    pub fn confirm_frames(
        &mut self,
        frames: BTreeMap<Tick, Vec<Command>>,
    ) -> Option<(Tick, Tick)> {
        if frames.is_empty() {
            return None;
        }

        let mut min_frame = Tick::MAX;
        let mut max_frame = Tick::MIN;

        for (frame, commands) in frames {
            min_frame = min_frame.min(frame);
            max_frame = max_frame.max(frame);

            if frame > self.confirmed_frame {
                self.confirmed_frame = frame;
            }
            if !commands.is_empty() {
                self.frame_commands.insert(frame, commands);
            }
        }

        tracing::debug!(
            min_frame,
            max_frame,
            confirmed_frame = self.confirmed_frame,
            "Bulk frame confirmation"
        );
        Some((min_frame, max_frame))
    }

    /// Prepare the next frame: submit its commands and advance.
    ///
    /// Pulls the buffered command set for `current_frame + 1`, sorts it
    /// by `(player, type_tag)`, tags every command with that exact frame
    /// number, submits to the queue, advances `current_frame`, and
    /// returns the frame. Never steps the world itself.
    pub fn prepare_next_frame(&mut self, queue: &mut CommandQueue) -> Tick {
        let next_frame = self.current_frame + 1;

        if let Some(mut commands) = self.frame_commands.remove(&next_frame) {
            commands.sort_by_key(Command::sort_key);
            let count = commands.len();
            for mut command in commands {
                command.execute_frame = Some(next_frame);
                queue.submit(command, self.current_frame);
            }
            tracing::debug!(frame = next_frame, commands = count, "Prepared frame");
        } else {
            tracing::debug!(frame = next_frame, "Prepared empty frame");
        }

        self.current_frame = next_frame;
        next_frame
    }

    /// Whether confirmed frames are waiting to be executed.
    #[must_use]
    pub const fn has_pending_frames(&self) -> bool {
        self.current_frame < self.confirmed_frame
    }

    /// Number of confirmed-but-unexecuted frames.
    #[must_use]
    pub fn pending_frame_count(&self) -> Tick {
        (self.confirmed_frame - self.current_frame).max(0)
    }

    /// Queue a local command for the authority.
    ///
    /// The command joins the pending list until the transport adapter
    /// drains it with [`Self::drain_pending_local`]; it executes only
    /// once it comes back inside a confirmed frame.
    pub fn submit_local(&mut self, command: Command) {
        tracing::debug!(
            player = command.player,
            tag = command.type_tag(),
            "Local command awaiting confirmation"
        );
        self.pending_local.push(command);
    }

    /// Take the pending local commands for sending to the authority.
    #[must_use]
    pub fn drain_pending_local(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.pending_local)
    }

    /// Reset to the initial state (used on reconnect).
    pub fn reset(&mut self) {
        self.confirmed_frame = -1;
        self.current_frame = -1;
        self.frame_commands.clear();
        self.pending_local.clear();
        self.stalled_ticks = 0;
        tracing::debug!("Frame synchronizer reset");
    }
}
