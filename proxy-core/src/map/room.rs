//! Room, Exit and Label types — the map store's data model.
//!
//! Grounded on `original_source/mapperproxy/mapper/roomdata/objects.py`
//! (the canonical, newest revision): field set, flag-name tables, and the
//! `Room.cost` computation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type Vnum = String;

/// The six cardinal+vertical directions, in their canonical display order.
pub const DIRECTIONS: [&str; 6] = ["north", "east", "south", "west", "up", "down"];

pub fn reverse_direction(dir: &str) -> &'static str {
    match dir {
        "north" => "south",
        "south" => "north",
        "east" => "west",
        "west" => "east",
        "up" => "down",
        "down" => "up",
        _ => "none",
    }
}

pub fn direction_vector(dir: &str) -> (i64, i64, i64) {
    match dir {
        "north" => (0, 1, 0),
        "south" => (0, -1, 0),
        "east" => (1, 0, 0),
        "west" => (-1, 0, 0),
        "up" => (0, 0, 1),
        "down" => (0, 0, -1),
        _ => (0, 0, 0),
    }
}

/// Terrain base movement costs, matching `TERRAIN_COSTS` across every
/// `original_source` revision exactly.
pub fn terrain_cost(terrain: &str) -> f64 {
    match terrain {
        "cavern" | "city" | "indoors" | "tunnel" => 0.75,
        "road" => 0.85,
        "field" => 1.5,
        "brush" => 1.8,
        "forest" => 2.15,
        "hills" | "shallowwater" => 2.45,
        "mountains" => 2.8,
        "random" | "undefined" => 30.0,
        "water" => 50.0,
        "rapids" => 60.0,
        "underwater" => 100.0,
        "death" => 1000.0,
        _ => 30.0, // unknown terrain maps to `undefined`'s cost
    }
}

/// Canonical (post-rewrite) exit flags.
pub const VALID_EXIT_FLAGS: &[&str] = &[
    "exit", "door", "road", "climb", "random", "special", "avoid", "no_match", "flow",
    "no_flee", "damage", "fall", "guarded",
];

/// Canonical (post-rewrite) door flags.
pub const VALID_DOOR_FLAGS: &[&str] = &[
    "hidden", "need_key", "no_block", "no_break", "no_pick", "delayed", "callable",
    "knockable", "magic", "action", "no_bash",
];

/// Canonical (post-rewrite) mob flags.
pub const VALID_MOB_FLAGS: &[&str] = &[
    "rent", "shop", "weapon_shop", "armour_shop", "quest_mob", "aggressive_mob",
    "guild", "guild_master", "scoutable", "clock", "mail", "stable",
];

/// Canonical (post-rewrite) load flags.
pub const VALID_LOAD_FLAGS: &[&str] = &[
    "treasure", "armour", "weapon", "water", "food", "herb", "key", "mule",
    "pack_horse", "trained_horse", "rope", "attention", "tied",
];

/// Vnums requiring dismount before entry / remount after exit.
pub const LEAD_BEFORE_ENTERING_VNUMS: &[&str] = &["196", "3473", "3474", "12138", "12637"];

/// One edge leaving a room in a given direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    #[serde(default = "default_to")]
    pub to: Vnum,
    #[serde(default = "default_exit_flags")]
    pub exit_flags: BTreeSet<String>,
    #[serde(default)]
    pub door: String,
    #[serde(default)]
    pub door_flags: BTreeSet<String>,
}

fn default_to() -> Vnum {
    "undefined".to_string()
}

fn default_exit_flags() -> BTreeSet<String> {
    let mut s = BTreeSet::new();
    s.insert("exit".to_string());
    s
}

impl Default for Exit {
    fn default() -> Self {
        Self {
            to: default_to(),
            exit_flags: default_exit_flags(),
            door: String::new(),
            door_flags: BTreeSet::new(),
        }
    }
}

impl Exit {
    pub fn has_door(&self) -> bool {
        self.exit_flags.contains("door")
    }

    pub fn has_climb(&self) -> bool {
        self.exit_flags.contains("climb")
    }

    pub fn has_avoid(&self) -> bool {
        self.exit_flags.contains("avoid")
    }

    pub fn is_random(&self) -> bool {
        self.exit_flags.contains("random")
    }
}

/// A room in the map store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub vnum: Vnum,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dynamic_desc: String,
    #[serde(default)]
    pub note: String,
    #[serde(default = "undefined_string")]
    pub terrain: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default = "undefined_string")]
    pub light: String,
    #[serde(default = "undefined_string")]
    pub align: String,
    #[serde(default = "undefined_string")]
    pub portable: String,
    #[serde(default = "undefined_string")]
    pub ridable: String,
    #[serde(default)]
    pub avoid: bool,
    #[serde(default)]
    pub mob_flags: BTreeSet<String>,
    #[serde(default)]
    pub load_flags: BTreeSet<String>,
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default)]
    pub z: i64,
    #[serde(default)]
    pub exits: BTreeMap<String, Exit>,
}

fn undefined_string() -> String {
    "undefined".to_string()
}

/// Matches the dynamic-description text MUME emits for temporary hazards
/// that should always be avoided by the pathfinder, regardless of the
/// `avoid` flag.
fn avoid_dynamic_desc_matches(dynamic_desc: &str) -> bool {
    dynamic_desc.contains("is engulfed in flames")
        || dynamic_desc.contains("Fire has spread all over")
}

impl Room {
    pub fn new(vnum: impl Into<Vnum>) -> Self {
        Self {
            vnum: vnum.into(),
            name: String::new(),
            description: String::new(),
            dynamic_desc: String::new(),
            note: String::new(),
            terrain: undefined_string(),
            cost: terrain_cost("undefined"),
            light: undefined_string(),
            align: undefined_string(),
            portable: undefined_string(),
            ridable: undefined_string(),
            avoid: false,
            mob_flags: BTreeSet::new(),
            load_flags: BTreeSet::new(),
            x: 0,
            y: 0,
            z: 0,
            exits: BTreeMap::new(),
        }
    }

    /// Recompute `cost` from `terrain`/`avoid`/`dynamic_desc`/`ridable`.
    /// Matches `roomdata/objects.py::Room.calculateCost` exactly:
    /// base cost, +1000 if avoid (explicit or dynamic-desc-implied),
    /// +5 if not ridable.
    pub fn recalculate_cost(&mut self) {
        let mut cost = terrain_cost(&self.terrain);
        if self.avoid || avoid_dynamic_desc_matches(&self.dynamic_desc) {
            cost += 1000.0;
        }
        if self.ridable == "notridable" {
            cost += 5.0;
        }
        self.cost = cost;
    }

    pub fn exit(&self, dir: &str) -> Option<&Exit> {
        self.exits.get(dir)
    }

    pub fn exit_mut(&mut self, dir: &str) -> &mut Exit {
        self.exits.entry(dir.to_string()).or_default()
    }
}

/// A short alphanumeric alias mapping to a vnum.
pub type Label = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_direction_is_involution() {
        for d in DIRECTIONS {
            assert_eq!(reverse_direction(reverse_direction(d)), d);
        }
    }

    #[test]
    fn cost_recompute_matches_invariant() {
        let mut r = Room::new("1");
        r.terrain = "field".to_string();
        r.recalculate_cost();
        assert_eq!(r.cost, 1.5);

        r.avoid = true;
        r.recalculate_cost();
        assert_eq!(r.cost, 1001.5);

        r.avoid = false;
        r.ridable = "notridable".to_string();
        r.recalculate_cost();
        assert_eq!(r.cost, 6.5);
    }

    #[test]
    fn unknown_terrain_costs_as_undefined() {
        assert_eq!(terrain_cost("nonsense"), terrain_cost("undefined"));
    }
}
