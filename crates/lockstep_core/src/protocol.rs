//! Transport-facing message shapes.
//!
//! The wire framing itself (websocket, QUIC, whatever carries the
//! bytes) is an external collaborator; the core only defines the
//! confirmed-frame message and the command wire form
//! `{ type tag, frame, payload }` and how to get commands in and out of
//! them. Unknown tags are protocol errors: the offending entry is
//! dropped and logged, the rest of the message survives, the tick is
//! never aborted.

use serde::{Deserialize, Serialize};

use crate::command::{registry, Command};
use crate::error::{Result, SimError};
use crate::world::{PlayerId, Tick};

/// Authority message: "frame N's final command set is X".
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedFrame {
    /// The confirmed frame.
    pub frame: Tick,
    /// Every player's commands for that frame.
    pub commands: Vec<Command>,
}

/// One command in wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireCommand {
    /// Registry tag.
    tag: u16,
    /// Issuing player.
    player: PlayerId,
    /// Scheduled frame, `-1` when unscheduled.
    frame: Tick,
    /// Variant payload, encoded by the registry.
    payload: Vec<u8>,
}

/// A confirmed frame in wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFrame {
    frame: Tick,
    commands: Vec<WireCommand>,
}

impl ConfirmedFrame {
    /// Serialize for the transport layer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let commands = self
            .commands
            .iter()
            .map(|command| {
                Ok(WireCommand {
                    tag: command.type_tag(),
                    player: command.player,
                    frame: command.execute_frame.unwrap_or(-1),
                    payload: registry::encode(&command.kind)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        bincode::serialize(&WireFrame {
            frame: self.frame,
            commands,
        })
        .map_err(|e| SimError::InvalidState(format!("Failed to encode confirmed frame: {e}")))
    }

    /// Parse a confirmed-frame message.
    ///
    /// Entries with unknown tags or malformed payloads are dropped with
    /// a warning; the remaining commands are kept. A wholly unreadable
    /// message is an error for the transport layer to drop.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: WireFrame = bincode::deserialize(bytes)
            .map_err(|e| SimError::InvalidState(format!("Unreadable confirmed frame: {e}")))?;

        let mut commands = Vec::with_capacity(wire.commands.len());
        for entry in wire.commands {
            match registry::decode(entry.tag, &entry.payload) {
                Ok(kind) => {
                    let mut command = Command::new(entry.player, kind);
                    if entry.frame >= 0 {
                        command.execute_frame = Some(entry.frame);
                    }
                    commands.push(command);
                }
                Err(error) => {
                    tracing::warn!(
                        frame = wire.frame,
                        tag = entry.tag,
                        player = entry.player,
                        %error,
                        "Dropping undecodable command from confirmed frame"
                    );
                }
            }
        }

        Ok(Self {
            frame: wire.frame,
            commands,
        })
    }
}
