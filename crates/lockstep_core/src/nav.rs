//! Per-agent navigation.
//!
//! Each navigating entity samples its flow field for a desired
//! direction, the ORCA solver turns every agent's desired velocity into
//! a collision-free one, and positions integrate from the solver
//! output. The loop also owns the unglamorous parts: arrival, stuck
//! recovery, slow-down near the target, wall-slide prediction and the
//! post-solve validation that keeps agents out of walls.
//!
//! All decisions here are deterministic; the stuck perturbation is
//! seeded from `(entity id, tick)`, never from a clock or platform RNG.

use crate::flow_manager::FlowFieldManager;
use crate::map::GridMap;
use crate::math::{Fixed, FixedVec2};
use crate::rvo::OrcaSimulator;
use crate::world::{EntityStorage, Position, Tick, TickEvents};

/// Displacement per tick below which an agent counts as not moving.
const STUCK_MOVE_THRESHOLD: Fixed = Fixed::from_parts(0, 100);

/// Ticks of no movement before perturbation kicks in.
const STUCK_TICKS_BEFORE_PERTURB: u32 = 20;

/// Ticks of no movement before the perturbation counter resets.
const STUCK_TICKS_DECAY: u32 = 60;

/// Fraction of max speed kept at the inner edge of the slow-down ring.
const SLOW_DOWN_FLOOR: Fixed = Fixed::from_parts(0, 2000);

/// Run one navigation tick over all navigating entities.
///
/// Order per tick: flow-field maintenance, desired-velocity selection
/// per entity (sorted id order), one ORCA step, then position sync and
/// validation.
pub(crate) fn update_navigation(
    tick: Tick,
    dt: Fixed,
    map: &impl GridMap,
    entities: &mut EntityStorage,
    flow: &mut FlowFieldManager,
    orca: &mut OrcaSimulator,
    events: &mut TickEvents,
) {
    flow.tick(map, tick);

    let ids = entities.sorted_ids();

    for &id in &ids {
        let Some(entity) = entities.get_mut(id) else {
            continue;
        };
        let Some(position) = entity.position.map(|p| p.value) else {
            continue;
        };
        let Some(navigator) = entity.navigator.as_mut() else {
            continue;
        };
        let agent = navigator.agent;

        let Some(target) = entity.move_target.map(|t| t.position) else {
            orca.set_agent_pref_velocity(agent, FixedVec2::ZERO);
            continue;
        };
        let Some(field) = navigator.flow_field else {
            continue;
        };

        // Stuck detection over the previous tick's displacement
        let moved = (position - navigator.last_position).magnitude();
        if moved < STUCK_MOVE_THRESHOLD {
            navigator.stuck_ticks += 1;
        } else {
            navigator.stuck_ticks = 0;
        }
        navigator.last_position = position;

        let to_target = target - position;
        let distance = to_target.magnitude();

        if distance <= navigator.arrival_radius {
            navigator.reached_target = true;
            navigator.stuck_ticks = 0;
            if let Some(released) = navigator.flow_field.take() {
                flow.release_flow_field(released);
            }
            entity.move_target = None;
            if let Some(velocity) = entity.velocity.as_mut() {
                velocity.value = FixedVec2::ZERO;
            }
            orca.set_agent_pref_velocity(agent, FixedVec2::ZERO);
            events.arrived.push(id);
            tracing::debug!(entity = id, "Arrived at move target");
            continue;
        }

        let mut direction = flow.sample_direction(map, field, position);
        if direction == FixedVec2::ZERO {
            // Inside the target cell (or the field has nothing to
            // offer): head straight for the exact target point.
            direction = to_target.normalized();
        }

        if navigator.stuck_ticks > STUCK_TICKS_BEFORE_PERTURB
            && distance > navigator.slow_down_radius
        {
            direction = perturb_direction(direction, id, tick);
            if navigator.stuck_ticks > STUCK_TICKS_DECAY {
                navigator.stuck_ticks = 0;
            }
        }

        // Linear slow-down inside the ring, floored at 20% of max speed
        let mut speed = navigator.max_speed;
        if distance < navigator.slow_down_radius {
            let mut denom = navigator.slow_down_radius - navigator.arrival_radius;
            if denom <= Fixed::ZERO {
                denom = navigator.slow_down_radius;
            }
            let t = ((distance - navigator.arrival_radius) / denom)
                .clamp(SLOW_DOWN_FLOOR, Fixed::ONE);
            speed = navigator.max_speed * t;
        }

        let mut desired = direction * speed;

        // Predict the next tick; a wall ahead turns the velocity into a
        // slide along it instead of a head-on push.
        let predicted = position + desired * dt;
        let (pred_x, pred_y) = map.world_to_grid(predicted);
        if !map.is_walkable(pred_x, pred_y) {
            desired = slide_velocity(map, position, desired);
        }

        orca.set_agent_pref_velocity(agent, desired);
    }

    orca.step(dt);

    // Sync solver output back, never letting an agent end inside a wall
    for &id in &ids {
        let Some(entity) = entities.get_mut(id) else {
            continue;
        };
        let Some(position) = entity.position.map(|p| p.value) else {
            continue;
        };
        let Some(navigator) = entity.navigator.as_ref() else {
            continue;
        };
        let agent = navigator.agent;

        if navigator.reached_target {
            // Frozen: keep the solver aligned with the entity
            orca.set_agent_pref_velocity(agent, FixedVec2::ZERO);
            orca.set_agent_position(agent, position);
            if let Some(velocity) = entity.velocity.as_mut() {
                velocity.value = FixedVec2::ZERO;
            }
            continue;
        }

        let new_position = orca.agent_position(agent);
        let (grid_x, grid_y) = map.world_to_grid(new_position);

        if map.is_walkable(grid_x, grid_y) {
            entity.position = Some(Position {
                value: new_position,
            });
            if let Some(velocity) = entity.velocity.as_mut() {
                velocity.value = orca.agent_velocity(agent);
            }
        } else {
            // Roll back and stop; the next tick re-plans from here
            orca.set_agent_position(agent, position);
            orca.set_agent_pref_velocity(agent, FixedVec2::ZERO);
            if let Some(velocity) = entity.velocity.as_mut() {
                velocity.value = FixedVec2::ZERO;
            }
            tracing::debug!(entity = id, "Post-solve position in obstacle, rolled back");
        }
    }
}

/// Mix a deterministic tangential component into a stuck agent's
/// direction. The pseudo-random factor comes from `(entity id, tick)`
/// so every peer computes the same nudge.
fn perturb_direction(direction: FixedVec2, id: u64, tick: Tick) -> FixedVec2 {
    let noise = ((id as i64) * 137 + tick * 17).rem_euclid(1000) - 500;
    // noise/1000 in [-0.5, 0.5)
    let factor = Fixed::from_raw(noise * 10);
    let perpendicular = FixedVec2::new(-direction.y, direction.x);
    (direction + perpendicular * factor * Fixed::HALF).normalized()
}

/// Project a desired velocity onto the local wall tangent, preserving
/// its magnitude.
///
/// A zero tangential component falls back to a half-speed reversal so
/// the agent backs out of dead ends instead of grinding into them.
fn slide_velocity(map: &impl GridMap, position: FixedVec2, desired: FixedVec2) -> FixedVec2 {
    let normal = detect_wall_normal(map, position, desired);
    if normal == FixedVec2::ZERO {
        return desired;
    }

    let tangent = FixedVec2::new(-normal.y, normal.x);
    let along = desired.dot(tangent);
    let slide = tangent * along;

    let original_speed = desired.magnitude();
    if slide.magnitude() > Fixed::EPSILON {
        slide.normalized() * original_speed
    } else {
        -desired * Fixed::HALF
    }
}

/// Find the dominant obstacle direction near an agent.
///
/// Probes one cell ahead along the movement direction first; failing
/// that, averages the directions of all blocked neighbors.
fn detect_wall_normal(map: &impl GridMap, position: FixedVec2, move_dir: FixedVec2) -> FixedVec2 {
    let probe = position + move_dir.normalized() * map.cell_size();
    let (probe_x, probe_y) = map.world_to_grid(probe);

    if !map.is_walkable(probe_x, probe_y) {
        let to_obstacle = map.grid_to_world(probe_x, probe_y) - position;
        return -to_obstacle.normalized();
    }

    const DX: [i64; 8] = [0, 1, 1, 1, 0, -1, -1, -1];
    const DY: [i64; 8] = [1, 1, 0, -1, -1, -1, 0, 1];

    let (cell_x, cell_y) = map.world_to_grid(position);
    let mut normal = FixedVec2::ZERO;
    let mut blocked = 0;

    for i in 0..8 {
        let nx = cell_x + DX[i] as i32;
        let ny = cell_y + DY[i] as i32;
        if !map.is_walkable(nx, ny) {
            normal = normal - FixedVec2::from_ints(DX[i], DY[i]);
            blocked += 1;
        }
    }

    if blocked > 0 {
        normal.normalized()
    } else {
        FixedVec2::ZERO
    }
}
