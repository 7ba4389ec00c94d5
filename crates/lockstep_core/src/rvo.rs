//! ORCA local collision avoidance.
//!
//! Per tick each agent builds one half-plane constraint in velocity
//! space per considered neighbor (an ORCA line), then solves a small 2D
//! feasibility problem by sequential clipping to find the velocity
//! closest to its preferred velocity that satisfies every line. Both
//! agents of a pair give way half each, which is what makes the
//! avoidance reciprocal.
//!
//! Agents live in an arena with slot + generation handles: removal is
//! O(1), handles stay valid for detection of staleness, and iteration
//! order (slot order) is stable, which the lockstep contract requires.

use serde::{Deserialize, Serialize};

use crate::math::{Fixed, FixedVec2};

/// Stable handle to an agent in the arena.
///
/// A handle outlives its agent; lookups on a reused slot fail the
/// generation check instead of aliasing the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId {
    index: u32,
    generation: u32,
}

/// Mutable per-tick agent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// World position.
    pub position: FixedVec2,
    /// Velocity applied last step.
    pub velocity: FixedVec2,
    /// Velocity computed this step, applied in phase two.
    new_velocity: FixedVec2,
    /// Velocity the agent would take with no neighbors.
    pub pref_velocity: FixedVec2,
    /// Collision radius.
    pub radius: Fixed,
    /// Speed cap.
    pub max_speed: Fixed,
    /// Look-ahead horizon in seconds.
    pub time_horizon: Fixed,
    /// Cap on neighbors considered per step.
    pub max_neighbors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    generation: u32,
    agent: Option<Agent>,
}

/// Half-plane constraint in velocity space.
#[derive(Debug, Clone, Copy)]
struct OrcaLine {
    point: FixedVec2,
    direction: FixedVec2,
}

/// Velocities with magnitude below this are treated as degenerate when
/// normalizing.
const DEGENERATE_THRESHOLD: Fixed = Fixed::from_parts(0, 1000);

/// The self-contained ORCA simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrcaSimulator {
    slots: Vec<Slot>,
    free: Vec<u32>,
    time_step: Fixed,
    /// Horizon applied when `add_agent` is not given one.
    pub default_time_horizon: Fixed,
    /// Neighbor cap applied when `add_agent` is not given one.
    pub default_max_neighbors: usize,
    /// Blend toward the previous velocity (0 = off). Non-zero softens
    /// oscillation but weakens the reciprocal guarantee.
    pub velocity_smoothing: Fixed,
}

impl Default for OrcaSimulator {
    fn default() -> Self {
        Self::new(Fixed::TWO, 10, Fixed::ZERO)
    }
}

impl OrcaSimulator {
    /// Create a simulator with the given agent defaults.
    #[must_use]
    pub fn new(
        default_time_horizon: Fixed,
        default_max_neighbors: usize,
        velocity_smoothing: Fixed,
    ) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            time_step: Fixed::ZERO,
            default_time_horizon,
            default_max_neighbors,
            velocity_smoothing,
        }
    }

    /// Add an agent with the simulator's default horizon and neighbor cap.
    pub fn add_agent(&mut self, position: FixedVec2, radius: Fixed, max_speed: Fixed) -> AgentId {
        self.add_agent_with(
            position,
            radius,
            max_speed,
            self.default_max_neighbors,
            self.default_time_horizon,
        )
    }

    /// Add an agent with explicit parameters.
    pub fn add_agent_with(
        &mut self,
        position: FixedVec2,
        radius: Fixed,
        max_speed: Fixed,
        max_neighbors: usize,
        time_horizon: Fixed,
    ) -> AgentId {
        let agent = Agent {
            position,
            velocity: FixedVec2::ZERO,
            new_velocity: FixedVec2::ZERO,
            pref_velocity: FixedVec2::ZERO,
            radius,
            max_speed,
            time_horizon,
            max_neighbors,
        };

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.agent = Some(agent);
            AgentId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                agent: Some(agent),
            });
            AgentId {
                index,
                generation: 0,
            }
        }
    }

    /// Remove an agent. Stale or unknown handles are a no-op.
    pub fn remove_agent(&mut self, id: AgentId) -> bool {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return false;
        };
        if slot.generation != id.generation || slot.agent.is_none() {
            return false;
        }
        slot.agent = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        true
    }

    fn get(&self, id: AgentId) -> Option<&Agent> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.agent.as_ref()
    }

    fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.agent.as_mut()
    }

    /// Whether the handle refers to a live agent.
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.get(id).is_some()
    }

    /// Agent position, zero for stale handles.
    #[must_use]
    pub fn agent_position(&self, id: AgentId) -> FixedVec2 {
        self.get(id).map_or(FixedVec2::ZERO, |a| a.position)
    }

    /// Agent velocity, zero for stale handles.
    #[must_use]
    pub fn agent_velocity(&self, id: AgentId) -> FixedVec2 {
        self.get(id).map_or(FixedVec2::ZERO, |a| a.velocity)
    }

    /// Force an agent's position (teleport / rollback). Stale handles
    /// are ignored.
    pub fn set_agent_position(&mut self, id: AgentId, position: FixedVec2) {
        if let Some(agent) = self.get_mut(id) {
            agent.position = position;
        }
    }

    /// Set the velocity the agent wants to reach. The solver may deviate
    /// arbitrarily far to stay collision-free.
    pub fn set_agent_pref_velocity(&mut self, id: AgentId, pref_velocity: FixedVec2) {
        if let Some(agent) = self.get_mut(id) {
            agent.pref_velocity = pref_velocity;
        }
    }

    /// Number of live agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.agent.is_some()).count()
    }

    /// Whether the arena holds no agents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every agent. Slot generations advance so old handles stay
    /// stale.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.agent.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }

    /// Advance the simulation by `dt`.
    ///
    /// `dt <= 0` is a no-op, not a division fault. Phase one computes
    /// every agent's new velocity from the same pre-step snapshot (the
    /// reciprocity argument needs symmetric inputs); phase two applies
    /// the velocities and integrates positions.
    pub fn step(&mut self, dt: Fixed) {
        if dt <= Fixed::ZERO {
            return;
        }
        self.time_step = dt;

        let occupied: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.agent.as_ref().map(|_| i as u32))
            .collect();

        let new_velocities: Vec<(u32, FixedVec2)> = occupied
            .iter()
            .map(|&index| (index, self.compute_new_velocity(index, &occupied)))
            .collect();

        for (index, velocity) in new_velocities {
            if let Some(agent) = self.slots[index as usize].agent.as_mut() {
                agent.new_velocity = velocity;
            }
        }

        for &index in &occupied {
            if let Some(agent) = self.slots[index as usize].agent.as_mut() {
                agent.velocity = agent.new_velocity;
                agent.position += agent.velocity * dt;
            }
        }
    }

    /// Build the ORCA lines for one agent and solve for its velocity.
    fn compute_new_velocity(&self, index: u32, occupied: &[u32]) -> FixedVec2 {
        let agent = self.slots[index as usize]
            .agent
            .as_ref()
            .expect("occupied slot");

        let neighbors = self.select_neighbors(index, agent, occupied);

        let mut lines = Vec::with_capacity(neighbors.len());
        for other_index in neighbors {
            let other = self.slots[other_index as usize]
                .agent
                .as_ref()
                .expect("occupied slot");

            let relative_position = other.position - agent.position;
            let relative_velocity = agent.velocity - other.velocity;
            let dist_sq = relative_position.sqr_magnitude();
            let combined_radius = agent.radius + other.radius;
            let combined_radius_sq = combined_radius * combined_radius;

            let direction: FixedVec2;
            let u: FixedVec2;

            if dist_sq > combined_radius_sq {
                // No collision yet; constrain against the velocity
                // obstacle truncated at the time horizon.
                let w = relative_velocity - relative_position / agent.time_horizon;
                let w_length_sq = w.sqr_magnitude();
                let dot1 = w.dot(relative_position);

                if dot1 < Fixed::ZERO && dot1 * dot1 > combined_radius_sq * w_length_sq {
                    // Project on the cut-off circle
                    let w_length = w_length_sq.sqrt();
                    let unit_w = w / w_length;

                    direction = FixedVec2::new(unit_w.y, -unit_w.x);
                    u = unit_w * (combined_radius / agent.time_horizon - w_length);
                } else {
                    // Project on the nearer leg of the cone
                    let leg = (dist_sq - combined_radius_sq).sqrt();
                    if relative_position.det(w) > Fixed::ZERO {
                        direction = FixedVec2::new(
                            relative_position.x * leg - relative_position.y * combined_radius,
                            relative_position.x * combined_radius + relative_position.y * leg,
                        ) / dist_sq;
                    } else {
                        direction = -(FixedVec2::new(
                            relative_position.x * leg + relative_position.y * combined_radius,
                            -relative_position.x * combined_radius + relative_position.y * leg,
                        ) / dist_sq);
                    }

                    let dot2 = relative_velocity.dot(direction);
                    u = direction * dot2 - relative_velocity;
                }
            } else {
                // Already overlapping: push apart within one time step.
                let inv_time_step = Fixed::ONE / self.time_step;
                let w = relative_velocity - relative_position * inv_time_step;
                let w_length = w.magnitude();

                if w_length < DEGENERATE_THRESHOLD {
                    tracing::warn!(
                        agent = index,
                        other = other_index,
                        "Overlapping agents with negligible relative motion, skipping pair"
                    );
                    continue;
                }

                let unit_w = w / w_length;
                direction = FixedVec2::new(unit_w.y, -unit_w.x);
                u = unit_w * (combined_radius * inv_time_step - w_length);
            }

            // Each agent takes half the correction; the neighbor's own
            // solve takes the other half.
            lines.push(OrcaLine {
                point: agent.velocity + u * Fixed::HALF,
                direction,
            });
        }

        let mut new_velocity = linear_program2(&lines, agent.max_speed, agent.pref_velocity);

        if self.velocity_smoothing > Fixed::ZERO
            && agent.velocity != FixedVec2::ZERO
            && new_velocity != FixedVec2::ZERO
        {
            new_velocity = new_velocity.lerp(agent.velocity, self.velocity_smoothing);
        }

        new_velocity
    }

    /// Pick the neighbors an agent considers, capped at `max_neighbors`
    /// nearest with a `(distance, slot)` ordering so every peer agrees.
    fn select_neighbors(&self, index: u32, agent: &Agent, occupied: &[u32]) -> Vec<u32> {
        let mut candidates: Vec<(Fixed, u32)> = occupied
            .iter()
            .filter(|&&other| other != index)
            .map(|&other| {
                let other_agent = self.slots[other as usize]
                    .agent
                    .as_ref()
                    .expect("occupied slot");
                (
                    (other_agent.position - agent.position).sqr_magnitude(),
                    other,
                )
            })
            .collect();

        if candidates.len() > agent.max_neighbors {
            candidates.sort_by_key(|&(dist_sq, slot)| (dist_sq, slot));
            candidates.truncate(agent.max_neighbors);
        }

        candidates.into_iter().map(|(_, slot)| slot).collect()
    }
}

/// Orthogonal projection of a velocity onto a constraint line.
fn project(line: &OrcaLine, velocity: FixedVec2) -> FixedVec2 {
    let delta = velocity - line.point;
    line.point + line.direction * delta.dot(line.direction)
}

/// Whether the velocity violates the half-plane of `line`.
fn violates(line: &OrcaLine, velocity: FixedVec2) -> bool {
    line.direction.det(line.point - velocity) > Fixed::ZERO
}

/// Clamp a velocity to a maximum magnitude, zeroing degenerate vectors.
fn clamp_speed(velocity: FixedVec2, max_speed: Fixed) -> FixedVec2 {
    let magnitude = velocity.magnitude();
    if magnitude > max_speed {
        if magnitude > DEGENERATE_THRESHOLD {
            velocity.normalized() * max_speed
        } else {
            FixedVec2::ZERO
        }
    } else {
        velocity
    }
}

/// Sequential-clipping feasibility solve over the ORCA lines.
///
/// If the preferred velocity already satisfies every line it is used
/// unchanged. Otherwise the lines are walked in order: each violated
/// line gets a projection, re-validated against the earlier lines, with
/// the intersection of the current and previous line as the fallback
/// when the projection is infeasible (the line's own point when the two
/// are near-parallel).
fn linear_program2(lines: &[OrcaLine], max_speed: Fixed, opt_velocity: FixedVec2) -> FixedVec2 {
    let opt_velocity = clamp_speed(opt_velocity, max_speed);

    if lines.iter().all(|line| !violates(line, opt_velocity)) {
        return opt_velocity;
    }

    let mut result = opt_velocity;

    for i in 0..lines.len() {
        if !violates(&lines[i], result) {
            continue;
        }

        let projected = project(&lines[i], result);
        let feasible = lines[..i].iter().all(|line| !violates(line, projected));

        if feasible {
            result = projected;
        } else if i > 0 {
            let determinant = lines[i].direction.det(lines[i - 1].direction);
            if determinant.abs() > Fixed::EPSILON {
                let delta = lines[i].point - lines[i - 1].point;
                let t = delta.det(lines[i - 1].direction) / determinant;
                result = lines[i].point + lines[i].direction * t;
            } else {
                // Near-parallel constraints; settle on the line's point
                result = lines[i].point;
            }
        } else {
            result = lines[i].point;
        }
    }

    clamp_speed(result, max_speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_pref(sim: &mut OrcaSimulator, id: AgentId, x: i64, y: i64) {
        sim.set_agent_pref_velocity(id, FixedVec2::from_ints(x, y));
    }

    #[test]
    fn test_lone_agent_moves_at_pref_velocity() {
        let mut sim = OrcaSimulator::default();
        let id = sim.add_agent(FixedVec2::ZERO, Fixed::HALF, Fixed::from_int(2));
        unit_pref(&mut sim, id, 1, 0);

        sim.step(Fixed::ONE);

        assert_eq!(sim.agent_velocity(id), FixedVec2::from_ints(1, 0));
        assert_eq!(sim.agent_position(id), FixedVec2::from_ints(1, 0));
    }

    #[test]
    fn test_max_speed_clamps_pref_velocity() {
        let mut sim = OrcaSimulator::default();
        let id = sim.add_agent(FixedVec2::ZERO, Fixed::HALF, Fixed::ONE);
        unit_pref(&mut sim, id, 10, 0);

        sim.step(Fixed::ONE);

        let speed = sim.agent_velocity(id).magnitude();
        assert!(speed <= Fixed::ONE + Fixed::from_parts(0, 10));
    }

    #[test]
    fn test_zero_delta_time_is_noop() {
        let mut sim = OrcaSimulator::default();
        let id = sim.add_agent(FixedVec2::ZERO, Fixed::HALF, Fixed::ONE);
        unit_pref(&mut sim, id, 1, 0);

        sim.step(Fixed::ZERO);
        sim.step(-Fixed::ONE);

        assert_eq!(sim.agent_position(id), FixedVec2::ZERO);
        assert_eq!(sim.agent_velocity(id), FixedVec2::ZERO);
    }

    #[test]
    fn test_head_on_agents_never_interpenetrate() {
        let mut sim = OrcaSimulator::default();
        let a = sim.add_agent(FixedVec2::from_ints(-3, 0), Fixed::HALF, Fixed::ONE);
        let b = sim.add_agent(FixedVec2::from_ints(3, 0), Fixed::HALF, Fixed::ONE);
        unit_pref(&mut sim, a, 1, 0);
        unit_pref(&mut sim, b, -1, 0);

        let min_distance = Fixed::ONE - Fixed::from_parts(0, 100);
        for _ in 0..80 {
            sim.step(Fixed::from_parts(0, 1000));
            let distance = (sim.agent_position(a) - sim.agent_position(b)).magnitude();
            assert!(
                distance >= min_distance,
                "agents interpenetrated: distance {distance}"
            );
        }

        // Both made progress before the standoff
        assert!(sim.agent_position(a).x > Fixed::from_int(-3));
        assert!(sim.agent_position(b).x < Fixed::from_int(3));
    }

    #[test]
    fn test_arena_handles_survive_removal() {
        let mut sim = OrcaSimulator::default();
        let a = sim.add_agent(FixedVec2::ZERO, Fixed::HALF, Fixed::ONE);
        let b = sim.add_agent(FixedVec2::from_ints(5, 5), Fixed::HALF, Fixed::ONE);

        assert!(sim.remove_agent(a));
        assert!(!sim.remove_agent(a), "double remove must fail");
        assert!(!sim.contains(a));
        assert!(sim.contains(b));
        assert_eq!(sim.agent_position(a), FixedVec2::ZERO);

        // The freed slot is reused with a fresh generation
        let c = sim.add_agent(FixedVec2::from_ints(1, 1), Fixed::HALF, Fixed::ONE);
        assert!(sim.contains(c));
        assert!(!sim.contains(a), "stale handle must stay stale");
        assert_eq!(sim.len(), 2);
    }

    #[test]
    fn test_determinism_across_instances() {
        let run = || {
            let mut sim = OrcaSimulator::default();
            let mut ids = Vec::new();
            for i in 0..6 {
                ids.push(sim.add_agent(
                    FixedVec2::from_ints(i % 3, i / 3),
                    Fixed::HALF,
                    Fixed::ONE,
                ));
            }
            for (i, &id) in ids.iter().enumerate() {
                let sign = if i % 2 == 0 { 1 } else { -1 };
                sim.set_agent_pref_velocity(id, FixedVec2::from_ints(sign, 0));
            }
            for _ in 0..50 {
                sim.step(Fixed::from_parts(0, 500));
            }
            ids.iter()
                .map(|&id| sim.agent_position(id))
                .collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
    }
}
