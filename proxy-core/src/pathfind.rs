//! A*-based shortest-path search over the room graph, plus speedwalk
//! rendering.
//!
//! Grounded on `original_source/mapper/mapperworld.py` (`_pathFind`,
//! `pathFind`, `createSpeedWalk`).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::error::PathfindError;
use crate::map::room::{reverse_direction, Vnum, DIRECTIONS, LEAD_BEFORE_ENTERING_VNUMS};
use crate::map::MapStore;

const DOOR_OR_CLIMB_PENALTY: f64 = 5.0;
const AVOID_PENALTY: f64 = 1000.0;
const AVOID_TERRAIN_PENALTY: f64 = 10.0;

/// One step of a resolved path: the direction taken and the vnum entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub direction: String,
    pub to: Vnum,
    /// `true` if the mount must be dismounted before crossing this exit and
    /// remounted after, per [`LEAD_BEFORE_ENTERING_VNUMS`].
    pub lead: bool,
}

/// A min-heap entry ordered by cost, ties broken by insertion order so
/// that `BinaryHeap`'s arbitrary tie-breaking doesn't make the result
/// path non-deterministic between runs with identical costs.
struct HeapEntry {
    cost: f64,
    seq: u64,
    vnum: Vnum,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse cost so the lowest cost pops
        // first, and reverse seq so that of equal cost, earlier-inserted
        // entries pop first (deterministic path reconstruction).
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-exit penalty added on top of the destination room's own cost.
/// Matches `mapperworld.py::_pathFind`'s edge-weight adjustments.
fn exit_penalty(store: &MapStore, exit: &crate::map::room::Exit) -> f64 {
    let mut penalty = 0.0;
    if exit.has_door() || exit.has_climb() {
        penalty += DOOR_OR_CLIMB_PENALTY;
    }
    if exit.has_avoid() {
        penalty += AVOID_PENALTY;
    }
    if let Some(room) = store.rooms.get(&exit.to) {
        if room.avoid {
            penalty += AVOID_TERRAIN_PENALTY;
        }
    }
    penalty
}

/// Whether an exit should be considered at all. Exits to `undefined` or
/// `death`-terrain rooms, or flagged `random`, are never traversed — the
/// mapper cannot predict where a random exit leads, so it is excluded
/// rather than merely penalized.
fn exit_is_passable(store: &MapStore, exit: &crate::map::room::Exit) -> bool {
    if exit.is_random() {
        return false;
    }
    if exit.to == "undefined" {
        return false;
    }
    match store.rooms.get(&exit.to) {
        Some(room) => room.terrain != "death",
        None => false,
    }
}

/// Dijkstra/A* (zero heuristic — the room graph has no embedded
/// coordinates reliable enough to admissibly estimate remaining cost, so
/// this degenerates to uniform-cost search, exactly as the original
/// implementation does) from `origin` to `destination`.
///
/// Returns the ordered list of steps, or an empty vec if origin ==
/// destination (testable property: empty path when no movement needed).
pub fn find_path(
    store: &MapStore,
    origin: &str,
    destination: &str,
) -> Result<Vec<PathStep>, PathfindError> {
    if !store.rooms.contains_key(origin) {
        return Err(PathfindError::UnknownOrigin(origin.to_string()));
    }
    if !store.rooms.contains_key(destination) {
        return Err(PathfindError::UnknownDestination(destination.to_string()));
    }
    if origin == destination {
        return Ok(Vec::new());
    }

    let mut best_cost: HashMap<Vnum, f64> = HashMap::new();
    let mut came_from: HashMap<Vnum, (Vnum, String)> = HashMap::new();
    let mut heap = BinaryHeap::new();
    let mut seq: u64 = 0;

    best_cost.insert(origin.to_string(), 0.0);
    heap.push(HeapEntry {
        cost: 0.0,
        seq,
        vnum: origin.to_string(),
    });

    while let Some(HeapEntry { cost, vnum, .. }) = heap.pop() {
        if vnum == destination {
            break;
        }
        // Stale entry: a cheaper path to this room was already processed.
        if cost > *best_cost.get(&vnum).unwrap_or(&f64::INFINITY) {
            continue;
        }
        let Some(room) = store.rooms.get(&vnum) else { continue };

        for dir in DIRECTIONS {
            let Some(exit) = room.exits.get(dir) else { continue };
            if !exit_is_passable(store, exit) {
                continue;
            }
            let Some(neighbor) = store.rooms.get(&exit.to) else { continue };
            let edge_cost = neighbor.cost + exit_penalty(store, exit);
            let next_cost = cost + edge_cost;
            let better = next_cost < *best_cost.get(&exit.to).unwrap_or(&f64::INFINITY);
            if better {
                best_cost.insert(exit.to.clone(), next_cost);
                came_from.insert(exit.to.clone(), (vnum.clone(), dir.to_string()));
                seq += 1;
                heap.push(HeapEntry {
                    cost: next_cost,
                    seq,
                    vnum: exit.to.clone(),
                });
            }
        }
    }

    if !came_from.contains_key(destination) {
        return Err(PathfindError::NoPath {
            from: origin.to_string(),
            to: destination.to_string(),
        });
    }

    // Walk the parent map backwards, then reverse.
    let mut steps = Vec::new();
    let mut cur = destination.to_string();
    while let Some((prev, dir)) = came_from.get(&cur).cloned() {
        let lead = LEAD_BEFORE_ENTERING_VNUMS.contains(&cur.as_str());
        steps.push(PathStep {
            direction: dir,
            to: cur.clone(),
            lead,
        });
        cur = prev;
    }
    steps.reverse();
    Ok(steps)
}

/// One rendered command in a speedwalk sequence: either a plain movement
/// run (`3n`) or a `lead`/`ride` bracket around a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeedwalkCommand {
    /// Run of `count` consecutive moves in the one-letter direction code.
    Run { code: char, count: u32 },
    /// Dismount, move one step, remount — for [`LEAD_BEFORE_ENTERING_VNUMS`].
    LeadThenRide { code: char },
}

fn direction_code(dir: &str) -> char {
    match dir {
        "north" => 'n',
        "south" => 's',
        "east" => 'e',
        "west" => 'w',
        "up" => 'u',
        "down" => 'd',
        _ => '?',
    }
}

/// Collapse a path into run-length-grouped speedwalk commands, inserting
/// `lead`/`ride` brackets around steps into a lead-before-entering room.
/// Matches `mapperworld.py::createSpeedWalk`.
pub fn create_speedwalk(steps: &[PathStep]) -> Vec<SpeedwalkCommand> {
    let mut commands = Vec::new();
    let mut run_code: Option<char> = None;
    let mut run_count = 0u32;

    let flush = |commands: &mut Vec<SpeedwalkCommand>, run_code: &mut Option<char>, run_count: &mut u32| {
        if let Some(code) = run_code.take() {
            if *run_count > 0 {
                commands.push(SpeedwalkCommand::Run { code, count: *run_count });
            }
        }
        *run_count = 0;
    };

    for step in steps {
        let code = direction_code(&step.direction);
        if step.lead {
            flush(&mut commands, &mut run_code, &mut run_count);
            commands.push(SpeedwalkCommand::LeadThenRide { code });
            continue;
        }
        match run_code {
            Some(c) if c == code => run_count += 1,
            _ => {
                flush(&mut commands, &mut run_code, &mut run_count);
                run_code = Some(code);
                run_count = 1;
            }
        }
    }
    flush(&mut commands, &mut run_code, &mut run_count);
    commands
}

/// Render speedwalk commands as the text a player would type, e.g.
/// `"3n lead e ride 2w"`.
pub fn render_speedwalk(commands: &[SpeedwalkCommand]) -> String {
    let mut parts = Vec::new();
    for cmd in commands {
        match cmd {
            SpeedwalkCommand::Run { code, count } => {
                if *count == 1 {
                    parts.push(code.to_string());
                } else {
                    parts.push(format!("{count}{code}"));
                }
            }
            SpeedwalkCommand::LeadThenRide { code } => {
                parts.push(format!("lead {code}"));
                parts.push("ride".to_string());
            }
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::room::Room;
    use std::path::PathBuf;

    fn empty_store() -> MapStore {
        MapStore {
            rooms: Default::default(),
            labels: Default::default(),
            rooms_path: PathBuf::from("/tmp/x"),
            rooms_sample_path: PathBuf::from("/tmp/x"),
            labels_path: PathBuf::from("/tmp/x"),
            labels_sample_path: PathBuf::from("/tmp/x"),
        }
    }

    fn room(vnum: &str, terrain: &str) -> Room {
        let mut r = Room::new(vnum);
        r.terrain = terrain.to_string();
        r.recalculate_cost();
        r
    }

    fn link(store: &mut MapStore, from: &str, dir: &str, to: &str) {
        store.rooms.get_mut(from).unwrap().exit_mut(dir).to = to.to_string();
        let rev = reverse_direction(dir);
        store.rooms.get_mut(to).unwrap().exit_mut(rev).to = from.to_string();
    }

    #[test]
    fn same_origin_and_destination_is_empty_path() {
        let mut store = empty_store();
        store.rooms.insert("0".into(), room("0", "field"));
        let path = find_path(&store, "0", "0").unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn finds_cheaper_path_around_expensive_terrain() {
        let mut store = empty_store();
        store.rooms.insert("0".into(), room("0", "field"));
        store.rooms.insert("1".into(), room("1", "water")); // expensive direct route
        store.rooms.insert("2".into(), room("2", "field"));
        store.rooms.insert("3".into(), room("3", "field"));
        // Direct: 0 -east-> 1(water) -east-> ... not applicable; build a
        // diamond: 0->east->1(water)->east->3 vs 0->north->2(field)->east->3
        link(&mut store, "0", "east", "1");
        link(&mut store, "1", "east", "3");
        link(&mut store, "0", "north", "2");
        link(&mut store, "2", "east", "3");

        let path = find_path(&store, "0", "3").unwrap();
        let dirs: Vec<&str> = path.iter().map(|s| s.direction.as_str()).collect();
        assert_eq!(dirs, vec!["north", "east"]);
    }

    #[test]
    fn random_exits_are_never_traversed() {
        let mut store = empty_store();
        store.rooms.insert("0".into(), room("0", "field"));
        store.rooms.insert("1".into(), room("1", "field"));
        store.rooms.get_mut("0").unwrap().exit_mut("east").to = "1".to_string();
        store
            .rooms
            .get_mut("0")
            .unwrap()
            .exit_mut("east")
            .exit_flags
            .insert("random".to_string());
        let result = find_path(&store, "0", "1");
        assert!(matches!(result, Err(PathfindError::NoPath { .. })));
    }

    #[test]
    fn lead_before_entering_vnum_inserts_lead_ride() {
        let mut store = empty_store();
        store.rooms.insert("0".into(), room("0", "field"));
        store.rooms.insert("196".into(), room("196", "field"));
        link(&mut store, "0", "east", "196");
        let path = find_path(&store, "0", "196").unwrap();
        assert_eq!(path.len(), 1);
        assert!(path[0].lead);
        let speedwalk = create_speedwalk(&path);
        assert_eq!(speedwalk, vec![SpeedwalkCommand::LeadThenRide { code: 'e' }]);
        assert_eq!(render_speedwalk(&speedwalk), "lead e ride");
    }

    #[test]
    fn run_length_groups_consecutive_directions() {
        let steps = vec![
            PathStep { direction: "north".into(), to: "1".into(), lead: false },
            PathStep { direction: "north".into(), to: "2".into(), lead: false },
            PathStep { direction: "east".into(), to: "3".into(), lead: false },
        ];
        let commands = create_speedwalk(&steps);
        assert_eq!(
            commands,
            vec![
                SpeedwalkCommand::Run { code: 'n', count: 2 },
                SpeedwalkCommand::Run { code: 'e', count: 1 },
            ]
        );
        assert_eq!(render_speedwalk(&commands), "2n e");
    }
}
