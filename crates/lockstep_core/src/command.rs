//! Typed gameplay commands.
//!
//! Commands are the only way player intent reaches the simulation. Each
//! variant carries a stable numeric type tag for wire serialization,
//! registered in an explicit compile-time table ([`registry`]) rather
//! than discovered by reflection. Effects are pure functions over
//! [`World`] dispatched by a single match.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::math::{Fixed, FixedVec2};
use crate::world::{EntityId, PlayerId, Tick, World};

/// A player intent scheduled for some simulation tick.
///
/// `execute_frame` is `None` until the synchronizer (or a direct submit)
/// pins the command to a concrete tick; after tagging a command is never
/// re-scheduled and executes exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Issuing player.
    pub player: PlayerId,
    /// Target execution tick; `None` = unscheduled (run next tick).
    pub execute_frame: Option<Tick>,
    /// The intent payload.
    pub kind: CommandKind,
}

impl Command {
    /// Create an unscheduled command.
    #[must_use]
    pub const fn new(player: PlayerId, kind: CommandKind) -> Self {
        Self {
            player,
            execute_frame: None,
            kind,
        }
    }

    /// Create a command pinned to a tick.
    #[must_use]
    pub const fn scheduled(player: PlayerId, frame: Tick, kind: CommandKind) -> Self {
        Self {
            player,
            execute_frame: Some(frame),
            kind,
        }
    }

    /// Registry tag of this command's variant.
    #[must_use]
    pub const fn type_tag(&self) -> u16 {
        self.kind.type_tag()
    }

    /// Deterministic total-order key: issuing player first, then type
    /// tag. Two commands that mutate shared state must apply in this
    /// order on every peer.
    #[must_use]
    pub const fn sort_key(&self) -> (PlayerId, u16) {
        (self.player, self.kind.type_tag())
    }

    /// Apply the command's effect to the world.
    pub fn execute(&self, world: &mut World) -> Result<()> {
        match &self.kind {
            CommandKind::SpawnUnit {
                unit_type,
                position,
            } => {
                world.spawn_unit(self.player, *unit_type, *position);
                Ok(())
            }
            CommandKind::Move { units, target } => {
                // Units may have died between issue and execution; skip them.
                for &unit in units {
                    world.set_move_target(unit, *target);
                }
                Ok(())
            }
            CommandKind::Stop { units } => {
                for &unit in units {
                    world.stop_unit(unit);
                }
                Ok(())
            }
            CommandKind::Deposit { amount } => {
                let balance = world.credits(self.player);
                let next = balance + *amount;
                if next < Fixed::ZERO {
                    return Err(SimError::CommandFailed {
                        player: self.player,
                        tag: self.type_tag(),
                        message: format!("insufficient credits: {balance} + {amount}"),
                    });
                }
                world.set_credits(self.player, next);
                Ok(())
            }
        }
    }
}

/// Command variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Spawn a unit of the given type at a world position.
    SpawnUnit {
        /// Unit archetype id.
        unit_type: u32,
        /// Spawn position.
        position: FixedVec2,
    },
    /// Order units to navigate to a world position.
    Move {
        /// Ordered units.
        units: Vec<EntityId>,
        /// Destination.
        target: FixedVec2,
    },
    /// Stop units in place, clearing their targets.
    Stop {
        /// Stopped units.
        units: Vec<EntityId>,
    },
    /// Adjust the issuing player's credit balance (negative = spend).
    Deposit {
        /// Signed amount.
        amount: Fixed,
    },
}

impl CommandKind {
    /// Registry tag for this variant.
    #[must_use]
    pub const fn type_tag(&self) -> u16 {
        match self {
            Self::SpawnUnit { .. } => registry::SPAWN_UNIT,
            Self::Move { .. } => registry::MOVE,
            Self::Stop { .. } => registry::STOP,
            Self::Deposit { .. } => registry::DEPOSIT,
        }
    }
}

/// Static tag table mapping command variants to wire tags.
///
/// Tags are part of the network protocol; never renumber an existing
/// entry.
pub mod registry {
    use super::{CommandKind, Result, SimError};
    use crate::math::{Fixed, FixedVec2};
    use crate::world::EntityId;

    /// [`CommandKind::SpawnUnit`].
    pub const SPAWN_UNIT: u16 = 1;
    /// [`CommandKind::Move`].
    pub const MOVE: u16 = 2;
    /// [`CommandKind::Stop`].
    pub const STOP: u16 = 3;
    /// [`CommandKind::Deposit`].
    pub const DEPOSIT: u16 = 4;

    /// Serialize a command's payload (tag excluded).
    pub fn encode(kind: &CommandKind) -> Result<Vec<u8>> {
        let bytes = match kind {
            CommandKind::SpawnUnit {
                unit_type,
                position,
            } => bincode::serialize(&(*unit_type, *position)),
            CommandKind::Move { units, target } => bincode::serialize(&(units, *target)),
            CommandKind::Stop { units } => bincode::serialize(units),
            CommandKind::Deposit { amount } => bincode::serialize(amount),
        };
        bytes.map_err(|e| SimError::InvalidState(format!("Failed to encode command: {e}")))
    }

    /// Reconstruct a command from its wire tag and payload.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownCommandTag`] for tags this build does not
    /// know; the caller drops the message and logs, never aborts the
    /// tick.
    pub fn decode(tag: u16, payload: &[u8]) -> Result<CommandKind> {
        let invalid = |e: bincode::Error| {
            SimError::InvalidState(format!("Malformed payload for tag {tag}: {e}"))
        };
        match tag {
            SPAWN_UNIT => {
                let (unit_type, position): (u32, FixedVec2) =
                    bincode::deserialize(payload).map_err(invalid)?;
                Ok(CommandKind::SpawnUnit {
                    unit_type,
                    position,
                })
            }
            MOVE => {
                let (units, target): (Vec<EntityId>, FixedVec2) =
                    bincode::deserialize(payload).map_err(invalid)?;
                Ok(CommandKind::Move { units, target })
            }
            STOP => {
                let units: Vec<EntityId> = bincode::deserialize(payload).map_err(invalid)?;
                Ok(CommandKind::Stop { units })
            }
            DEPOSIT => {
                let amount: Fixed = bincode::deserialize(payload).map_err(invalid)?;
                Ok(CommandKind::Deposit { amount })
            }
            unknown => Err(SimError::UnknownCommandTag(unknown)),
        }
    }
}
