//! Scenario fixtures shared by integration tests.

use lockstep_core::command::{Command, CommandKind};
use lockstep_core::config::SimConfig;
use lockstep_core::map::{CellType, GridRect, WorldMap};
use lockstep_core::math::{Fixed, FixedVec2};
use lockstep_core::world::{EntityId, PlayerId, Tick, World};

/// An open square map with unit cells.
#[must_use]
pub fn open_map(size: u32) -> WorldMap {
    WorldMap::new(size, size, Fixed::ONE)
}

/// A map split by a vertical wall with a gap.
///
/// The wall sits at `wall_x`; the gap is two cells tall starting at
/// `gap_y`.
#[must_use]
pub fn walled_map(size: u32, wall_x: i32, gap_y: i32) -> WorldMap {
    let mut map = open_map(size);
    map.set_rect(
        GridRect::new(wall_x, 0, wall_x, size as i32 - 1),
        CellType::Blocked,
    );
    map.set_cell(wall_x, gap_y, CellType::Walkable);
    map.set_cell(wall_x, gap_y + 1, CellType::Walkable);
    map
}

/// A world over an open map with default configuration.
#[must_use]
pub fn open_world(size: u32) -> World {
    World::new(open_map(size), SimConfig::default())
}

/// Spawn a line of infantry for one player, one cell apart.
pub fn spawn_squad(
    world: &mut World,
    player: PlayerId,
    count: u32,
    origin: FixedVec2,
) -> Vec<EntityId> {
    (0..count)
        .map(|i| {
            let offset = FixedVec2::new(Fixed::from_int(i64::from(i)), Fixed::ZERO);
            world.spawn_unit(player, 1, origin + offset)
        })
        .collect()
}

/// A deterministic command script: `(tick, command)` pairs ready to
/// submit in order.
#[must_use]
pub fn skirmish_script(units: &[EntityId]) -> Vec<(Tick, Command)> {
    let mut script = vec![
        (
            0,
            Command::new(
                0,
                CommandKind::Deposit {
                    amount: Fixed::from_int(100),
                },
            ),
        ),
        (
            2,
            Command::new(
                1,
                CommandKind::Deposit {
                    amount: Fixed::from_int(60),
                },
            ),
        ),
    ];
    if !units.is_empty() {
        script.push((
            1,
            Command::new(
                0,
                CommandKind::Move {
                    units: units.to_vec(),
                    target: FixedVec2::from_ints(20, 10),
                },
            ),
        ));
        script.push((
            6,
            Command::new(
                0,
                CommandKind::Stop {
                    units: units.to_vec(),
                },
            ),
        ));
    }
    script.sort_by_key(|(tick, _)| *tick);
    script
}
