//! World state and the per-tick execution path.
//!
//! The world owns everything a tick touches: the entity store, the map,
//! the flow-field pool, the collision solver, the command queue and the
//! per-player economy. One [`World::update`] call executes exactly one
//! tick; ticks are never rolled back.
//!
//! # Determinism
//!
//! - No floating-point math (fixed-point via [`Fixed`])
//! - No system randomness
//! - Entity iteration in sorted-id order
//! - Commands apply in `(player, type_tag)` order
//!
//! In lockstep client mode the tick number is driven externally through
//! `update(Some(frame))` so the synchronizer's notion of the current
//! frame and the world's tick counter cannot drift apart.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::flow::FieldId;
use crate::flow_manager::FlowFieldManager;
use crate::map::{CellType, GridRect, WorldMap};
use crate::math::{Fixed, FixedVec2};
use crate::nav;
use crate::queue::CommandQueue;
use crate::rvo::{AgentId, OrcaSimulator};

/// Simulation tick / lockstep frame number. `-1` means "before frame 0".
pub type Tick = i64;

/// Unique entity identifier.
pub type EntityId = u64;

/// Player identifier.
pub type PlayerId = u32;

/// World position component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Position in world units.
    pub value: FixedVec2,
}

/// Velocity component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Velocity {
    /// Velocity in world units per second.
    pub value: FixedVec2,
}

impl Velocity {
    /// Zero velocity.
    pub const ZERO: Self = Self {
        value: FixedVec2::ZERO,
    };
}

/// Health component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Current hit points.
    pub current: u32,
    /// Maximum hit points.
    pub max: u32,
}

impl Health {
    /// Full health.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self { current: max, max }
    }
}

/// Destination a navigating entity is heading to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveTarget {
    /// Exact world-space destination.
    pub position: FixedVec2,
}

/// Navigation state for an entity steered by flow fields + ORCA.
///
/// The `agent` handle is a weak reference into the collision solver;
/// the solver knows nothing about the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigator {
    /// Collision-solver agent handle.
    pub agent: AgentId,
    /// Flow field currently referenced, if any.
    pub flow_field: Option<FieldId>,
    /// Collision radius.
    pub radius: Fixed,
    /// Maximum speed.
    pub max_speed: Fixed,
    /// Distance at which the entity counts as arrived.
    pub arrival_radius: Fixed,
    /// Distance at which the entity starts slowing down.
    pub slow_down_radius: Fixed,
    /// Consecutive ticks with negligible displacement.
    pub stuck_ticks: u32,
    /// Position at the end of the previous tick.
    pub last_position: FixedVec2,
    /// Whether the current target was reached.
    pub reached_target: bool,
}

/// An entity with optional components.
///
/// Only components that are `Some` are active. This is the narrow
/// has/get/add/remove surface the core needs, without a full ECS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier.
    pub id: EntityId,
    /// Owning player, if any.
    pub owner: Option<PlayerId>,
    /// World position.
    pub position: Option<Position>,
    /// Velocity.
    pub velocity: Option<Velocity>,
    /// Health.
    pub health: Option<Health>,
    /// Navigation state.
    pub navigator: Option<Navigator>,
    /// Current movement destination.
    pub move_target: Option<MoveTarget>,
}

impl Entity {
    /// Create an entity with no components.
    #[must_use]
    pub const fn new(id: EntityId) -> Self {
        Self {
            id,
            owner: None,
            position: None,
            velocity: None,
            health: None,
            navigator: None,
            move_target: None,
        }
    }
}

/// Storage for all entities.
///
/// `HashMap` for O(1) lookup; systems iterate via [`EntityStorage::sorted_ids`]
/// for deterministic order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStorage {
    entities: HashMap<EntityId, Entity>,
    next_id: EntityId,
}

impl EntityStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_id: 1,
        }
    }

    /// Insert an entity, assigning it the next id.
    pub fn insert(&mut self, mut entity: Entity) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        entity.id = id;
        self.entities.insert(id, entity);
        id
    }

    /// Remove an entity.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Get an entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Get a mutable entity.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Whether the entity exists.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity ids sorted ascending, for deterministic iteration.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Events generated during one tick, for the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct TickEvents {
    /// Entities spawned this tick.
    pub spawned: Vec<EntityId>,
    /// Entities that reached their move target this tick.
    pub arrived: Vec<EntityId>,
    /// Commands whose effects failed (caught, logged, tick continued).
    pub command_failures: u32,
}

/// Stats looked up by unit archetype id.
struct UnitStats {
    radius: Fixed,
    max_speed: Fixed,
    max_health: u32,
}

fn unit_stats(unit_type: u32) -> UnitStats {
    match unit_type {
        2 => UnitStats {
            radius: Fixed::ONE,
            max_speed: Fixed::ONE,
            max_health: 200,
        },
        3 => UnitStats {
            radius: Fixed::from_parts(0, 9000),
            max_speed: Fixed::from_parts(1, 2000),
            max_health: 150,
        },
        _ => UnitStats {
            radius: Fixed::HALF,
            max_speed: Fixed::from_parts(1, 5000),
            max_health: 50,
        },
    }
}

/// The deterministic game world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    tick: Tick,
    delta_time: Fixed,
    config: SimConfig,
    map: WorldMap,
    entities: EntityStorage,
    flow: FlowFieldManager,
    orca: OrcaSimulator,
    commands: CommandQueue,
    credits: BTreeMap<PlayerId, Fixed>,
    #[serde(skip)]
    events: TickEvents,
}

impl World {
    /// Create a world over a map, starting before frame 0.
    #[must_use]
    pub fn new(map: WorldMap, config: SimConfig) -> Self {
        let flow = FlowFieldManager::new(
            config.flow_field_cache_size,
            config.flow_max_updates_per_frame,
        );
        let orca = OrcaSimulator::new(
            config.rvo_time_horizon,
            config.rvo_max_neighbors,
            config.rvo_velocity_smoothing,
        );
        Self {
            tick: -1,
            delta_time: config.delta_time(),
            config,
            map,
            entities: EntityStorage::new(),
            flow,
            orca,
            commands: CommandQueue::new(),
            credits: BTreeMap::new(),
            events: TickEvents::default(),
        }
    }

    /// Last executed tick (`-1` before the first).
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Duration of one tick in seconds.
    #[must_use]
    pub const fn delta_time(&self) -> Fixed {
        self.delta_time
    }

    /// The map service.
    #[must_use]
    pub const fn map(&self) -> &WorldMap {
        &self.map
    }

    /// The entity store.
    #[must_use]
    pub const fn entities(&self) -> &EntityStorage {
        &self.entities
    }

    /// Mutable entity store (tests and scenario setup).
    pub fn entities_mut(&mut self) -> &mut EntityStorage {
        &mut self.entities
    }

    /// The flow-field pool.
    #[must_use]
    pub const fn flow_fields(&self) -> &FlowFieldManager {
        &self.flow
    }

    /// The collision solver.
    #[must_use]
    pub const fn collision(&self) -> &OrcaSimulator {
        &self.orca
    }

    /// The command queue.
    #[must_use]
    pub const fn command_queue(&self) -> &CommandQueue {
        &self.commands
    }

    /// Mutable command queue (synchronizer and replay feed it directly).
    pub fn command_queue_mut(&mut self) -> &mut CommandQueue {
        &mut self.commands
    }

    /// A player's credit balance.
    #[must_use]
    pub fn credits(&self, player: PlayerId) -> Fixed {
        self.credits.get(&player).copied().unwrap_or(Fixed::ZERO)
    }

    /// Overwrite a player's credit balance.
    pub fn set_credits(&mut self, player: PlayerId, amount: Fixed) {
        self.credits.insert(player, amount);
    }

    /// Submit a command to the queue against the current tick.
    pub fn submit_command(&mut self, command: crate::command::Command) {
        self.commands.submit(command, self.tick);
    }

    /// Change walkability over a rect and invalidate overlapping flow
    /// fields.
    pub fn set_map_rect(&mut self, rect: GridRect, cell: CellType) {
        if let Some(dirty) = self.map.set_rect(rect, cell) {
            self.flow.mark_region_dirty(dirty);
        }
    }

    /// Execute one tick.
    ///
    /// With `Some(frame)` the world adopts that tick number (lockstep
    /// client mode); with `None` the counter self-increments. Commands
    /// due this tick apply first in deterministic order, each isolated:
    /// a failing effect is logged and the rest of the tick proceeds.
    /// Systems then run in fixed order.
    pub fn update(&mut self, target_tick: Option<Tick>) -> TickEvents {
        self.tick = target_tick.unwrap_or(self.tick + 1);

        let due = self.commands.take_due(self.tick);
        for command in due {
            match command.execute(self) {
                Ok(()) => self.commands.record(self.tick, command),
                Err(error) => {
                    self.events.command_failures += 1;
                    tracing::error!(
                        tick = self.tick,
                        player = command.player,
                        tag = command.type_tag(),
                        %error,
                        "Command failed; remaining commands still execute"
                    );
                }
            }
        }

        nav::update_navigation(
            self.tick,
            self.delta_time,
            &self.map,
            &mut self.entities,
            &mut self.flow,
            &mut self.orca,
            &mut self.events,
        );
        self.integrate_plain_movers();

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(tick = self.tick, state_hash = hash, "World state hash");
        }

        std::mem::take(&mut self.events)
    }

    /// Integrate entities that have velocity but no navigator.
    fn integrate_plain_movers(&mut self) {
        for id in self.entities.sorted_ids() {
            let Some(entity) = self.entities.get_mut(id) else {
                continue;
            };
            if entity.navigator.is_some() {
                continue;
            }
            if let (Some(position), Some(velocity)) =
                (entity.position.as_mut(), entity.velocity.as_ref())
            {
                position.value += velocity.value * self.delta_time;
            }
        }
    }

    /// Spawn a unit with navigation and collision state.
    pub fn spawn_unit(
        &mut self,
        player: PlayerId,
        unit_type: u32,
        position: FixedVec2,
    ) -> EntityId {
        let stats = unit_stats(unit_type);
        let agent = self.orca.add_agent(position, stats.radius, stats.max_speed);

        let mut entity = Entity::new(0);
        entity.owner = Some(player);
        entity.position = Some(Position { value: position });
        entity.velocity = Some(Velocity::ZERO);
        entity.health = Some(Health::new(stats.max_health));
        entity.navigator = Some(Navigator {
            agent,
            flow_field: None,
            radius: stats.radius,
            max_speed: stats.max_speed,
            arrival_radius: self.config.arrival_radius,
            slow_down_radius: self.config.slow_down_radius,
            stuck_ticks: 0,
            last_position: position,
            reached_target: false,
        });

        let id = self.entities.insert(entity);
        self.events.spawned.push(id);
        tracing::debug!(entity = id, player, unit_type, "Unit spawned");
        id
    }

    /// Remove a unit, releasing its flow field and collision agent.
    pub fn despawn_unit(&mut self, id: EntityId) -> Result<()> {
        let entity = self
            .entities
            .remove(id)
            .ok_or(SimError::EntityNotFound(id))?;

        if let Some(navigator) = entity.navigator {
            if let Some(field) = navigator.flow_field {
                self.flow.release_flow_field(field);
            }
            self.orca.remove_agent(navigator.agent);
        }
        Ok(())
    }

    /// Point a unit at a destination.
    ///
    /// Missing entities and entities without navigation are skipped
    /// silently: units can die between command issue and execution.
    pub fn set_move_target(&mut self, id: EntityId, target: FixedVec2) {
        let Some(entity) = self.entities.get_mut(id) else {
            tracing::debug!(entity = id, "Move target for missing entity dropped");
            return;
        };
        let Some(position) = entity.position.map(|p| p.value) else {
            return;
        };
        let Some(navigator) = entity.navigator.as_mut() else {
            return;
        };

        if let Some(old) = navigator.flow_field.take() {
            self.flow.release_flow_field(old);
        }

        let field = self.flow.request_flow_field(&self.map, target, self.tick);
        navigator.flow_field = Some(field);
        navigator.reached_target = false;
        navigator.stuck_ticks = 0;
        navigator.last_position = position;
        entity.move_target = Some(MoveTarget { position: target });
    }

    /// Stop a unit, clearing its target.
    pub fn stop_unit(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(id) else {
            return;
        };
        let Some(navigator) = entity.navigator.as_mut() else {
            return;
        };

        if let Some(field) = navigator.flow_field.take() {
            self.flow.release_flow_field(field);
        }
        navigator.reached_target = false;
        navigator.stuck_ticks = 0;
        entity.move_target = None;

        let agent = navigator.agent;
        self.orca.set_agent_pref_velocity(agent, FixedVec2::ZERO);
        if let Some(velocity) = self
            .entities
            .get_mut(id)
            .and_then(|e| e.velocity.as_mut())
        {
            velocity.value = FixedVec2::ZERO;
        }
    }

    /// Hash of the current state for desync detection.
    ///
    /// Two worlds with identical state produce identical hashes; fixed
    /// scalars hash by raw value.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);

        let ids = self.entities.sorted_ids();
        ids.len().hash(&mut hasher);
        for id in ids {
            if let Some(entity) = self.entities.get(id) {
                id.hash(&mut hasher);
                entity.owner.hash(&mut hasher);

                if let Some(position) = &entity.position {
                    position.value.x.raw().hash(&mut hasher);
                    position.value.y.raw().hash(&mut hasher);
                }
                if let Some(velocity) = &entity.velocity {
                    velocity.value.x.raw().hash(&mut hasher);
                    velocity.value.y.raw().hash(&mut hasher);
                }
                if let Some(health) = &entity.health {
                    health.current.hash(&mut hasher);
                    health.max.hash(&mut hasher);
                }
                if let Some(target) = &entity.move_target {
                    target.position.x.raw().hash(&mut hasher);
                    target.position.y.raw().hash(&mut hasher);
                }
                if let Some(navigator) = &entity.navigator {
                    navigator.stuck_ticks.hash(&mut hasher);
                    navigator.reached_target.hash(&mut hasher);
                }
            }
        }

        for (player, amount) in &self.credits {
            player.hash(&mut hasher);
            amount.raw().hash(&mut hasher);
        }

        hasher.finish()
    }

    /// Serialize the world for snapshots and replay headers.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| SimError::InvalidState(format!("Failed to serialize world: {e}")))
    }

    /// Restore a world from bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| SimError::InvalidState(format!("Failed to deserialize world: {e}")))
    }
}
