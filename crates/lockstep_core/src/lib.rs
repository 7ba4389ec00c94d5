//! # Lockstep Core
//!
//! Deterministic simulation core for a networked real-time-strategy
//! engine.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No transport IO (only message shapes)
//! - No system randomness
//! - No floating-point math in simulation state (fixed-point throughout)
//!
//! Independent clients and a server feed the same frame-tagged command
//! sequence through this crate and arrive at bit-identical world state.
//! That property enables:
//! - Lockstep multiplayer (identical simulation across clients)
//! - Headless server builds
//! - Replay files that are just command streams
//! - Determinism testing by hash comparison
//!
//! ## Crate structure
//!
//! - [`math`] - fixed-point scalar and vector
//! - [`command`] / [`queue`] - typed intents, registry, per-tick dispatch
//! - [`sync`] - lockstep frame synchronizer
//! - [`driver`] - mode-aware tick loop
//! - [`world`] - entities, systems, state hashing
//! - [`flow`] / [`flow_manager`] - flow-field planner and pool
//! - [`rvo`] - ORCA local collision avoidance
//! - `nav` - per-agent navigation loop (internal, driven by [`world`])
//! - [`replay`] - recording and playback
//! - [`protocol`] - confirmed-frame message shape
//!
//! The simulation tick is single-threaded and cooperative: exactly one
//! logical thread executes one tick at a time, with no internal locks.
//! Network IO happens off this path and only hands data into the frame
//! buffer that the next tick reads.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod flow;
pub mod flow_manager;
pub mod map;
pub mod math;
mod nav;
pub mod protocol;
pub mod queue;
pub mod replay;
pub mod rvo;
pub mod sync;
pub mod world;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::command::{registry, Command, CommandKind};
    pub use crate::config::SimConfig;
    pub use crate::driver::{Game, GameMode};
    pub use crate::error::{Result, SimError};
    pub use crate::flow::FieldId;
    pub use crate::flow_manager::FlowFieldManager;
    pub use crate::map::{CellType, GridMap, GridRect, WorldMap};
    pub use crate::math::{Fixed, FixedVec2};
    pub use crate::protocol::ConfirmedFrame;
    pub use crate::queue::CommandQueue;
    pub use crate::replay::{Replay, ReplayPlayer};
    pub use crate::rvo::{AgentId, OrcaSimulator};
    pub use crate::sync::{FrameSynchronizer, SyncStatus};
    pub use crate::world::{EntityId, PlayerId, Tick, World};
}
