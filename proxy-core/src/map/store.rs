//! Map store persistence: load/save of rooms and labels, legacy flag
//! rewriting, vnum allocation, and room mutators.
//!
//! Grounded on `original_source/mapperproxy/mapper/roomdata/database.py`
//! (sample-fallback load/save, JSON formatting) and
//! `original_source/mapper/mapperworld.py` (`getNewVnum`, `rdelete`,
//! `searchRooms`).

use super::room::{Exit, Room, Vnum};
use crate::error::MapStoreError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Maps legacy (pre-rewrite) mob/load/door flag names to their canonical
/// underscore form. Cross-referenced from three `original_source`
/// revisions — see DESIGN.md for the full derivation.
pub const LEGACY_FLAG_REWRITES: &[(&str, &str)] = &[
    ("packhorse", "pack_horse"),
    ("trainedhorse", "trained_horse"),
    ("smob", "aggressive_mob"),
    ("quest", "quest_mob"),
    ("noblock", "no_block"),
    ("needkey", "need_key"),
    ("nobreak", "no_break"),
    ("nopick", "no_pick"),
    ("weaponshop", "weapon_shop"),
    ("armourshop", "armour_shop"),
];

pub fn rewrite_legacy_flag(name: &str) -> String {
    for (legacy, canonical) in LEGACY_FLAG_REWRITES {
        if *legacy == name {
            return canonical.to_string();
        }
    }
    name.to_string()
}

/// Result of loading a JSON document with sample-file fallback: the data
/// plus any non-fatal warnings, matching the tolerant style of
/// `database.py::_load`.
pub struct LoadOutcome<T> {
    pub data: T,
    pub warnings: Vec<String>,
}

/// Load rooms from `path`, falling back to `sample_path` if `path` is
/// missing or corrupt; legacy flag names are rewritten on the way in.
pub fn load_rooms(path: &Path, sample_path: &Path) -> Result<LoadOutcome<BTreeMap<Vnum, Room>>, MapStoreError> {
    let mut warnings = Vec::new();
    let raw = match read_with_fallback(path, sample_path, &mut warnings) {
        Some(raw) => raw,
        None => {
            return Ok(LoadOutcome {
                data: BTreeMap::new(),
                warnings,
            })
        }
    };
    let mut rooms: BTreeMap<Vnum, Room> = serde_json::from_str(&raw)
        .map_err(|e| MapStoreError::CorruptJson(e.to_string()))?;
    for (vnum, room) in rooms.iter_mut() {
        room.vnum = vnum.clone();
        room.mob_flags = room.mob_flags.iter().map(|f| rewrite_legacy_flag(f)).collect();
        room.load_flags = room.load_flags.iter().map(|f| rewrite_legacy_flag(f)).collect();
        for exit in room.exits.values_mut() {
            exit.door_flags = exit.door_flags.iter().map(|f| rewrite_legacy_flag(f)).collect();
        }
        room.recalculate_cost();
    }
    Ok(LoadOutcome { data: rooms, warnings })
}

/// Load labels from `path`, falling back to `sample_path`.
pub fn load_labels(
    path: &Path,
    sample_path: &Path,
) -> Result<LoadOutcome<BTreeMap<String, Vnum>>, MapStoreError> {
    let mut warnings = Vec::new();
    let raw = match read_with_fallback(path, sample_path, &mut warnings) {
        Some(raw) => raw,
        None => {
            return Ok(LoadOutcome {
                data: BTreeMap::new(),
                warnings,
            })
        }
    };
    let labels: BTreeMap<String, Vnum> =
        serde_json::from_str(&raw).map_err(|e| MapStoreError::CorruptJson(e.to_string()))?;
    Ok(LoadOutcome { data: labels, warnings })
}

fn read_with_fallback(path: &Path, sample_path: &Path, warnings: &mut Vec<String>) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Some(s),
        Err(e) => {
            warnings.push(format!(
                "failed to read {}: {e}; falling back to sample",
                path.display()
            ));
            match std::fs::read_to_string(sample_path) {
                Ok(s) => Some(s),
                Err(e2) => {
                    warnings.push(format!("failed to read sample {}: {e2}", sample_path.display()));
                    None
                }
            }
        }
    }
}

/// Serialize rooms sorted by vnum, indented two spaces, matching
/// `json.dumps(..., sort_keys=True, indent=2, separators=(",", ": "))`.
pub fn dump_rooms(rooms: &BTreeMap<Vnum, Room>) -> Result<String, MapStoreError> {
    serde_json::to_string_pretty(rooms).map_err(|e| MapStoreError::SerializeFailed(e.to_string()))
}

pub fn dump_labels(labels: &BTreeMap<String, Vnum>) -> Result<String, MapStoreError> {
    serde_json::to_string_pretty(labels).map_err(|e| MapStoreError::SerializeFailed(e.to_string()))
}

/// Write-then-rename for save-is-atomic-in-intent semantics.
pub fn save_atomic(path: &Path, contents: &str) -> Result<(), MapStoreError> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)
        .map_err(|e| MapStoreError::SaveFailed(e.to_string()))?;
    std::fs::rename(&tmp_path, path).map_err(|e| MapStoreError::SaveFailed(e.to_string()))?;
    Ok(())
}

/// The in-memory map store: rooms, labels, and file paths for
/// persistence. Owns every `Room`/`Exit`; the mapper worker holds only a
/// vnum pointer into it (`currentRoom` is non-owning).
pub struct MapStore {
    pub rooms: BTreeMap<Vnum, Room>,
    pub labels: BTreeMap<String, Vnum>,
    pub rooms_path: PathBuf,
    pub rooms_sample_path: PathBuf,
    pub labels_path: PathBuf,
    pub labels_sample_path: PathBuf,
}

impl MapStore {
    pub fn load(
        rooms_path: PathBuf,
        rooms_sample_path: PathBuf,
        labels_path: PathBuf,
        labels_sample_path: PathBuf,
    ) -> Result<(Self, Vec<String>), MapStoreError> {
        let rooms_outcome = load_rooms(&rooms_path, &rooms_sample_path)?;
        let labels_outcome = load_labels(&labels_path, &labels_sample_path)?;
        let mut warnings = rooms_outcome.warnings;
        warnings.extend(labels_outcome.warnings);

        let mut labels = labels_outcome.data;
        // Purge labels whose vnum has been deleted.
        labels.retain(|_, v| rooms_outcome.data.contains_key(v));

        Ok((
            Self {
                rooms: rooms_outcome.data,
                labels,
                rooms_path,
                rooms_sample_path,
                labels_path,
                labels_sample_path,
            },
            warnings,
        ))
    }

    pub fn save(&self) -> Result<(), MapStoreError> {
        let rooms_json = dump_rooms(&self.rooms)?;
        save_atomic(&self.rooms_path, &rooms_json)?;
        let labels_json = dump_labels(&self.labels)?;
        save_atomic(&self.labels_path, &labels_json)?;
        Ok(())
    }

    /// `1 + max(int(v) for v in rooms)`, string form. Matches
    /// `mapperworld.py::getNewVnum` exactly.
    pub fn new_vnum(&self) -> Vnum {
        let max = self
            .rooms
            .keys()
            .filter_map(|v| v.parse::<i64>().ok())
            .max()
            .unwrap_or(-1);
        (max + 1).to_string()
    }

    pub fn resolve(&self, label_or_vnum: &str) -> Option<Vnum> {
        if let Some(v) = self.labels.get(label_or_vnum) {
            return Some(v.clone());
        }
        if self.rooms.contains_key(label_or_vnum) {
            return Some(label_or_vnum.to_string());
        }
        None
    }

    /// Delete a room, rewriting any incoming exit to `undefined`
    ///.
    pub fn delete_room(&mut self, vnum: &str) -> Result<(), MapStoreError> {
        if !self.rooms.contains_key(vnum) {
            return Err(MapStoreError::NoSuchRoom(vnum.to_string()));
        }
        self.rooms.remove(vnum);
        for room in self.rooms.values_mut() {
            for exit in room.exits.values_mut() {
                if exit.to == vnum {
                    exit.to = "undefined".to_string();
                }
            }
        }
        self.labels.retain(|_, v| v != vnum);
        Ok(())
    }

    /// Create and insert a new room, allocating its vnum automatically.
    pub fn create_room(&mut self) -> Vnum {
        let vnum = self.new_vnum();
        self.rooms.insert(vnum.clone(), Room::new(vnum.clone()));
        vnum
    }

    /// Link `from_vnum`'s exit `dir` to `to_vnum`, creating the exit if
    /// absent, and optionally wire the reverse exit if it is currently
    /// `undefined` (auto-linking).
    pub fn link(&mut self, from_vnum: &str, dir: &str, to_vnum: &str, bidirectional: bool) {
        if let Some(room) = self.rooms.get_mut(from_vnum) {
            room.exit_mut(dir).to = to_vnum.to_string();
        }
        if bidirectional {
            let rev = super::room::reverse_direction(dir);
            if let Some(room) = self.rooms.get_mut(to_vnum) {
                let exit = room.exit_mut(rev);
                if exit.to == "undefined" {
                    exit.to = from_vnum.to_string();
                }
            }
        }
    }

    /// Exact-match search used by auto-merge: rooms whose name and
    /// description both equal the given strings.
    pub fn find_exact(&self, name: &str, description: &str) -> Vec<Vnum> {
        self.rooms
            .values()
            .filter(|r| r.name == name && r.description == description)
            .map(|r| r.vnum.clone())
            .collect()
    }

    /// Fuzzy/exact multi-field search used by `fname`/`fnote`/`fdoor`/
    /// `fdynamic` commands. Every non-empty predicate must match.
    pub fn search<'a>(
        &'a self,
        name_substr: Option<&str>,
        note_substr: Option<&str>,
        dynamic_substr: Option<&str>,
        door_substr: Option<&str>,
    ) -> Vec<&'a Room> {
        self.rooms
            .values()
            .filter(|r| {
                name_substr.map_or(true, |s| r.name.to_lowercase().contains(&s.to_lowercase()))
                    && note_substr.map_or(true, |s| r.note.to_lowercase().contains(&s.to_lowercase()))
                    && dynamic_substr
                        .map_or(true, |s| r.dynamic_desc.to_lowercase().contains(&s.to_lowercase()))
                    && door_substr.map_or(true, |s| {
                        r.exits.values().any(|e| e.door.to_lowercase().contains(&s.to_lowercase()))
                    })
            })
            .collect()
    }

    /// Rooms whose vnum the label resolves to, or vnums that exist,
    /// matching by name for the name-based sync algorithm.
    pub fn vnums_with_name(&self, name: &str) -> Vec<Vnum> {
        self.rooms
            .values()
            .filter(|r| r.name == name)
            .map(|r| r.vnum.clone())
            .collect()
    }

    pub fn vnums_with_name_and_description(&self, name: &str, description: &str) -> Vec<Vnum> {
        self.rooms
            .values()
            .filter(|r| r.name == name && r.description == description)
            .map(|r| r.vnum.clone())
            .collect()
    }
}

/// Sort a set of directions into the canonical display order, unknown
/// directions (there are none — the set is closed) sorting last.
pub fn sort_exits(dirs: &mut Vec<String>) {
    dirs.sort_by_key(|d| {
        super::room::DIRECTIONS
            .iter()
            .position(|c| c == d)
            .unwrap_or(super::room::DIRECTIONS.len())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample_room(vnum: &str) -> Room {
        let mut r = Room::new(vnum);
        r.terrain = "field".to_string();
        r.recalculate_cost();
        r
    }

    #[test]
    fn new_vnum_is_one_plus_max() {
        let mut store = MapStore {
            rooms: BTreeMap::new(),
            labels: BTreeMap::new(),
            rooms_path: PathBuf::from("/tmp/does-not-exist-rooms.json"),
            rooms_sample_path: PathBuf::from("/tmp/does-not-exist-rooms.sample.json"),
            labels_path: PathBuf::from("/tmp/does-not-exist-labels.json"),
            labels_sample_path: PathBuf::from("/tmp/does-not-exist-labels.sample.json"),
        };
        store.rooms.insert("0".into(), sample_room("0"));
        store.rooms.insert("5".into(), sample_room("5"));
        assert_eq!(store.new_vnum(), "6");
    }

    #[test]
    fn legacy_flag_rewrite_table() {
        assert_eq!(rewrite_legacy_flag("packhorse"), "pack_horse");
        assert_eq!(rewrite_legacy_flag("smob"), "aggressive_mob");
        assert_eq!(rewrite_legacy_flag("noblock"), "no_block");
        assert_eq!(rewrite_legacy_flag("hidden"), "hidden");
    }

    #[test]
    fn delete_room_rewrites_incoming_exits() {
        let mut store = MapStore {
            rooms: BTreeMap::new(),
            labels: BTreeMap::new(),
            rooms_path: PathBuf::from("/tmp/x"),
            rooms_sample_path: PathBuf::from("/tmp/x"),
            labels_path: PathBuf::from("/tmp/x"),
            labels_sample_path: PathBuf::from("/tmp/x"),
        };
        let mut r0 = sample_room("0");
        r0.exit_mut("east").to = "1".to_string();
        store.rooms.insert("0".into(), r0);
        store.rooms.insert("1".into(), sample_room("1"));
        store.delete_room("1").unwrap();
        assert!(!store.rooms.contains_key("1"));
        assert_eq!(store.rooms["0"].exits["east"].to, "undefined");
    }

    #[test]
    fn round_trip_persistence_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let rooms_path = dir.path().join("rooms.json");
        let sample_path = dir.path().join("rooms.sample.json");
        let labels_path = dir.path().join("labels.json");
        let labels_sample_path = dir.path().join("labels.sample.json");

        let mut rooms = BTreeMap::new();
        let mut r0 = sample_room("0");
        r0.name = "Start".to_string();
        let mut exit = Exit::default();
        exit.to = "1".to_string();
        exit.exit_flags = BTreeSet::from(["exit".to_string(), "door".to_string()]);
        r0.exits.insert("east".to_string(), exit);
        rooms.insert("0".to_string(), r0);
        rooms.insert("1".to_string(), sample_room("1"));

        std::fs::write(&rooms_path, dump_rooms(&rooms).unwrap()).unwrap();
        std::fs::write(&labels_path, "{}").unwrap();

        let (store, warnings) = MapStore::load(rooms_path.clone(), sample_path, labels_path.clone(), labels_sample_path).unwrap();
        assert!(warnings.is_empty());
        store.save().unwrap();

        let (store2, _) = MapStore::load(rooms_path, PathBuf::from("/nonexistent"), labels_path, PathBuf::from("/nonexistent")).unwrap();
        assert_eq!(store.rooms, store2.rooms);
    }

    #[test]
    fn missing_file_falls_back_to_sample() {
        let dir = tempfile::tempdir().unwrap();
        let rooms_path = dir.path().join("missing-rooms.json");
        let sample_path = dir.path().join("rooms.sample.json");
        let mut rooms = BTreeMap::new();
        rooms.insert("0".to_string(), sample_room("0"));
        std::fs::write(&sample_path, dump_rooms(&rooms).unwrap()).unwrap();

        let outcome = load_rooms(&rooms_path, &sample_path).unwrap();
        assert!(!outcome.warnings.is_empty());
        assert!(outcome.data.contains_key("0"));
    }
}
