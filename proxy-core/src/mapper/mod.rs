//! The mapper worker: single-threaded consumer of the event bus, sole
//! mutator of the map store and of per-turn transient state.
//!
//! Grounded on `original_source/mapperproxy/mapper/mapper.py` (`Mapper`:
//! `parseMudOutput`, `updateCurrentRoom`, `sync`, `move`, `autoMerge`,
//! `walkNextDirection`) and `original_source/mapper/mapperworld.py` for the
//! newer sync refinement and `createSpeedWalk`.

pub mod commands;
pub mod forced;

use log::{debug, info, warn};

use crate::map::room::{direction_vector, reverse_direction, Vnum, DIRECTIONS};
use crate::map::MapStore;
use crate::pathfind::{self, create_speedwalk, SpeedwalkCommand};
use crate::xml::{PromptFields, XmlEvent};

/// Runtime toggles the player controls via the `auto*`/`emu` commands.
#[derive(Debug, Clone, Copy)]
pub struct MapperFlags {
    pub auto_map: bool,
    pub auto_update: bool,
    pub auto_merge: bool,
    pub auto_link: bool,
    pub emulation_mode: bool,
}

impl Default for MapperFlags {
    fn default() -> Self {
        Self {
            auto_map: true,
            auto_update: true,
            auto_merge: true,
            auto_link: true,
            emulation_mode: false,
        }
    }
}

/// Per-turn transient state, cleared at every turn boundary.
#[derive(Debug, Default)]
struct TurnState {
    movement: Option<String>,
    room_name: Option<String>,
    description: Option<String>,
    dynamic: Option<String>,
    exits: Option<String>,
    prompt: Option<PromptFields>,
    scouting: bool,
    moved: bool,
    added_new_room_from: Option<Vnum>,
}

impl TurnState {
    fn clear(&mut self) {
        *self = TurnState::default();
    }
}

/// Terrain letters the prompt's terrain slot can report, mapped to the
/// canonical terrain name. Matches the original `PROMPT_REGEX` terrain
/// character table.
fn terrain_from_prompt_char(c: char) -> Option<&'static str> {
    Some(match c {
        '#' => "city",
        '(' => "field",
        '[' => "forest",
        '+' => "hills",
        '.' => "field",
        '%' => "mountains",
        'f' => "brush",
        'O' => "indoors",
        '~' => "water",
        'U' => "underwater",
        'W' => "rapids",
        ':' => "cavern",
        '=' => "road",
        '<' => "tunnel",
        _ => return None,
    })
}

fn light_from_prompt_char(c: char) -> Option<&'static str> {
    Some(match c {
        '@' => "lit",
        '*' => "lit",
        '!' => "dark",
        ')' => "lit",
        'o' => "dark",
        _ => return None,
    })
}

const PROTECTED_TERRAIN_SENTINELS: &[&str] = &["deathtrap", "random"];

/// The sole mutator of map state and per-turn fields. Owns command and
/// MUD-event dispatch registries and the auto-walk plan.
pub struct MapperWorker {
    pub store: MapStore,
    pub flags: MapperFlags,
    pub current_room: Option<Vnum>,
    pub synced: bool,
    turn: TurnState,
    /// Pending steps, stored so the *next* step to send is the last
    /// element (`pop()` from the tail).
    walk_plan: Vec<SpeedwalkCommand>,
    walk_destination: Option<String>,
    /// Lines queued to send to the client this turn.
    pub pending_client_output: Vec<String>,
    /// Lines queued to send to the MUD server this turn.
    pub pending_server_output: Vec<String>,
    command_registry: commands::CommandRegistry,
    started_at: std::time::Instant,
}

impl MapperWorker {
    pub fn new(store: MapStore) -> Self {
        Self {
            store,
            flags: MapperFlags::default(),
            current_room: None,
            synced: false,
            turn: TurnState::default(),
            walk_plan: Vec::new(),
            walk_destination: None,
            pending_client_output: Vec::new(),
            pending_server_output: Vec::new(),
            command_registry: commands::default_registry(),
            started_at: std::time::Instant::now(),
        }
    }

    pub(super) fn started_at(&self) -> std::time::Instant {
        self.started_at
    }

    fn send_client(&mut self, line: impl Into<String>) {
        self.pending_client_output.push(line.into());
    }

    fn send_server(&mut self, line: impl Into<String>) {
        self.pending_server_output.push(line.into());
    }

    // ── Top-level dispatch ────────────────────────────────────────────

    /// Feed one decoded XML/line event into the mapper. Line events are
    /// also broadcast to the multi-subscriber line hooks (forced/prevented
    /// movement, exits-cleaner) before being otherwise ignored.
    pub fn handle_event(&mut self, event: XmlEvent) {
        match event {
            XmlEvent::Movement(dir) => {
                if !self.turn.scouting {
                    self.turn.movement = Some(dir);
                }
            }
            XmlEvent::RoomStart => {}
            XmlEvent::Name(name) => {
                if !self.turn.scouting {
                    self.turn.room_name = Some(name);
                }
            }
            XmlEvent::Description(desc) => {
                if !self.turn.scouting {
                    self.turn.description = Some(desc);
                }
            }
            XmlEvent::Terrain(_) => {}
            XmlEvent::Dynamic(dyn_text) => {
                if !self.turn.scouting {
                    self.turn.dynamic = Some(dyn_text);
                    self.resolve_movement();
                }
            }
            XmlEvent::Exits(exits) => {
                if !self.turn.scouting {
                    self.turn.exits = Some(exits);
                }
            }
            XmlEvent::Prompt(fields) => {
                self.turn.prompt = Some(fields);
                self.turn.scouting = false; // prompt always ends a scout
                self.end_turn();
            }
            XmlEvent::Line(line) => {
                self.on_line(&line);
            }
            XmlEvent::ScoutingStarted => {
                self.turn.scouting = true;
            }
        }
    }

    /// Multi-subscriber line hooks: exits-cleaner and forced/prevented
    /// movement detection. Mirrors `mudevents.py`'s `Handler` registry,
    /// specialized to the one MUD-event kind (`line`) this crate wires.
    fn on_line(&mut self, line: &str) {
        if forced::is_forced_movement_line(line) {
            self.cancel_walk();
            if self.synced {
                info!("forced movement detected, dropping sync: {line}");
                self.synced = false;
            }
        } else if forced::is_prevented_movement_line(line) {
            self.cancel_walk();
        }

        if self.flags.auto_update {
            if let Some(vnum) = self.current_room.clone() {
                if let Some(room) = self.store.rooms.get_mut(&vnum) {
                    forced::exits_cleaner_on_line(room, line);
                }
            }
        }
    }

    // ── Sync algorithm ─────────────────────────────

    /// `sync(vnum-or-label)`.
    pub fn sync_to(&mut self, label_or_vnum: &str) -> Result<Vnum, String> {
        match self.store.resolve(label_or_vnum) {
            Some(vnum) => {
                self.current_room = Some(vnum.clone());
                self.synced = true;
                Ok(vnum)
            }
            None => Err(format!("No such room or label: {label_or_vnum}")),
        }
    }

    /// `sync(name, description)`.
    fn sync_by_name_and_description(&mut self, name: &str, description: &str) -> Result<Vnum, String> {
        let exact = self.store.vnums_with_name_and_description(name, description);
        if exact.len() == 1 {
            let vnum = exact[0].clone();
            self.current_room = Some(vnum.clone());
            self.synced = true;
            return Ok(vnum);
        }
        let by_name = self.store.vnums_with_name(name);
        if by_name.len() == 1 {
            let vnum = by_name[0].clone();
            self.current_room = Some(vnum.clone());
            self.synced = true;
            return Ok(vnum);
        }
        if by_name.is_empty() {
            Err(format!("No room found matching name {name:?}."))
        } else {
            Err(format!(
                "Ambiguous sync: {} rooms match name {name:?}.",
                by_name.len()
            ))
        }
    }

    // ── Movement resolution ────────────────────────

    fn resolve_movement(&mut self) {
        let movement = self.turn.movement.clone();
        match movement {
            None => {
                // Forced movement in an unknown direction.
                self.synced = false;
            }
            Some(dir) if !DIRECTIONS.contains(&dir.as_str()) => {
                self.synced = false;
            }
            Some(dir) => {
                self.move_direction(&dir);
            }
        }
    }

    fn move_direction(&mut self, dir: &str) {
        if !self.synced {
            return;
        }
        let Some(current) = self.current_room.clone() else {
            self.synced = false;
            return;
        };
        let target = self
            .store
            .rooms
            .get(&current)
            .and_then(|r| r.exits.get(dir))
            .map(|e| e.to.clone());

        match target {
            Some(to) if to != "undefined" && self.store.rooms.contains_key(&to) => {
                self.current_room = Some(to);
                self.turn.moved = true;
            }
            Some(_) | None => {
                if self.flags.auto_map {
                    self.auto_map_step(&current, dir);
                } else {
                    self.synced = false;
                }
            }
        }
    }

    // ── Auto-map ───────────────────────────────────

    fn auto_map_step(&mut self, from: &str, dir: &str) {
        let name = self.turn.room_name.clone().unwrap_or_default();
        let description = self.turn.description.clone().unwrap_or_default();

        if self.flags.auto_merge && !name.is_empty() && !description.is_empty() {
            let matches = self.store.find_exact(&name, &description);
            if matches.len() == 1 {
                let target = matches[0].clone();
                self.store.link(from, dir, &target, true);
                self.current_room = Some(target.clone());
                self.turn.moved = true;
                self.turn.added_new_room_from = None;
                debug!("auto-merged into existing room {target}");
                return;
            }
        }

        let new_vnum = self.store.create_room();
        {
            let (dx, dy, dz) = direction_vector(dir);
            let (fx, fy, fz) = self
                .store
                .rooms
                .get(from)
                .map(|r| (r.x, r.y, r.z))
                .unwrap_or((0, 0, 0));
            let room = self.store.rooms.get_mut(&new_vnum).unwrap();
            room.name = name;
            room.description = description;
            room.dynamic_desc = self.turn.dynamic.clone().unwrap_or_default();
            room.x = fx + dx;
            room.y = fy + dy;
            room.z = fz + dz;
            room.recalculate_cost();
        }
        self.store.rooms.get_mut(from).unwrap().exit_mut(dir).to = new_vnum.clone();
        self.current_room = Some(new_vnum.clone());
        self.turn.moved = true;
        self.turn.added_new_room_from = Some(from.to_string());
        // The reverse exit is wired in `end_turn`, once `<exits>` has
        // actually arrived — it follows `</room>` in the wire order, so
        // `turn.exits` isn't populated yet at this point in the turn.
    }

    /// Wire the reverse exit of a freshly auto-mapped room back to the
    /// room it was entered from, once the turn's `<exits>` text has
    /// arrived.
    fn wire_reverse_exit_for_new_room(&mut self) {
        let Some(from) = self.turn.added_new_room_from.clone() else { return };
        let Some(dir) = self.turn.movement.clone() else { return };
        let Some(new_vnum) = self.current_room.clone() else { return };
        let Some(exits_text) = self.turn.exits.clone() else { return };
        let rev = reverse_direction(&dir);
        if exits_text.contains(rev) {
            if let Some(room) = self.store.rooms.get_mut(&new_vnum) {
                room.exit_mut(rev).to = from;
            }
        }
    }

    // ── Auto-update ────────────────────────────────

    fn apply_auto_update(&mut self) {
        if !(self.flags.auto_map && self.flags.auto_update) {
            return;
        }
        let Some(vnum) = self.current_room.clone() else { return };
        let Some(room) = self.store.rooms.get_mut(&vnum) else { return };
        if let Some(name) = &self.turn.room_name {
            if &room.name != name {
                room.name = name.clone();
            }
        }
        if let Some(desc) = &self.turn.description {
            if &room.description != desc {
                room.description = desc.clone();
            }
        }
        if let Some(dyn_text) = &self.turn.dynamic {
            if &room.dynamic_desc != dyn_text {
                room.dynamic_desc = dyn_text.clone();
                room.recalculate_cost();
            }
        }
    }

    // ── Prompt-driven flag updates ─────────────────

    fn apply_prompt_flags(&mut self) {
        if !self.synced {
            return;
        }
        let Some(fields) = self.turn.prompt.clone() else { return };
        let Some(vnum) = self.current_room.clone() else { return };
        let Some(room) = self.store.rooms.get_mut(&vnum) else { return };

        if let Some(c) = fields.light {
            if let Some(light) = light_from_prompt_char(c) {
                if room.light != light && !PROTECTED_TERRAIN_SENTINELS.contains(&room.light.as_str()) {
                    room.light = light.to_string();
                }
            }
        }
        if let Some(c) = fields.terrain {
            if let Some(terrain) = terrain_from_prompt_char(c) {
                if room.terrain != terrain && !PROTECTED_TERRAIN_SENTINELS.contains(&room.terrain.as_str()) {
                    room.terrain = terrain.to_string();
                    room.recalculate_cost();
                }
            }
        }
        if fields.movement_flags.contains('R') || fields.movement_flags.contains('r') {
            if room.ridable != "notridable" && !PROTECTED_TERRAIN_SENTINELS.contains(&room.ridable.as_str()) {
                room.ridable = "ridable".to_string();
                room.recalculate_cost();
            }
        }
    }

    // ── Exits flag updates ─────────────────────────

    fn apply_exits_flags(&mut self) {
        if !self.flags.auto_map {
            return;
        }
        let Some(exits_text) = self.turn.exits.clone() else { return };
        let Some(vnum) = self.current_room.clone() else { return };

        for dir in DIRECTIONS {
            let Some((prefix, at)) = find_direction_token(&exits_text, dir) else { continue };
            if prefix == Some('{') {
                continue; // portal — not a real room-graph exit
            }
            let room = self.store.rooms.get_mut(&vnum).unwrap();
            let exit = room.exit_mut(dir);
            match prefix {
                Some('(') | Some('[') | Some('#') => {
                    exit.exit_flags.insert("door".to_string());
                }
                Some('=') | Some('-') => {
                    exit.exit_flags.insert("road".to_string());
                }
                Some('/') | Some('\\') => {
                    exit.exit_flags.insert("climb".to_string());
                }
                _ => {}
            }
            let _ = at;

            if self.flags.auto_link {
                self.try_auto_link(&vnum, dir);
            }
        }
    }

    fn try_auto_link(&mut self, vnum: &str, dir: &str) {
        let current_exit_target = self
            .store
            .rooms
            .get(vnum)
            .and_then(|r| r.exits.get(dir))
            .map(|e| e.to.clone())
            .unwrap_or_else(|| "undefined".to_string());
        if current_exit_target != "undefined" {
            return;
        }
        let Some((fx, fy, fz)) = self.store.rooms.get(vnum).map(|r| (r.x, r.y, r.z)) else { return };
        let (dx, dy, dz) = direction_vector(dir);
        let (nx, ny, nz) = (fx + dx, fy + dy, fz + dz);
        let rev = reverse_direction(dir);

        let candidate = self.store.rooms.values().find(|r| {
            r.x == nx
                && r.y == ny
                && r.z == nz
                && r.vnum != vnum
                && r.exits.get(rev).map(|e| e.to == "undefined").unwrap_or(true)
        });
        if let Some(candidate_vnum) = candidate.map(|r| r.vnum.clone()) {
            self.store.link(vnum, dir, &candidate_vnum, true);
        }
    }

    // ── Turn boundary ──────────────────────────────

    fn end_turn(&mut self) {
        self.wire_reverse_exit_for_new_room();
        self.apply_exits_flags();
        self.apply_auto_update();
        self.apply_prompt_flags();

        if !self.synced {
            if let (Some(name), Some(desc)) = (self.turn.room_name.clone(), self.turn.description.clone()) {
                match self.sync_by_name_and_description(&name, &desc) {
                    Ok(vnum) => debug!("synced by name/description to {vnum}"),
                    Err(msg) => warn!("sync failed: {msg}"),
                }
            }
        }

        if self.synced {
            self.emit_room_detail_summary();
        }

        if self.synced && !self.walk_plan.is_empty() {
            self.walk_next_direction();
        }

        self.turn.clear();
    }

    fn emit_room_detail_summary(&mut self) {
        let Some(vnum) = self.current_room.clone() else { return };
        let Some(room) = self.store.rooms.get(&vnum) else { return };
        let mut notes = Vec::new();
        let doors: Vec<String> = room
            .exits
            .iter()
            .filter(|(_, exit)| !exit.door.is_empty() && exit.door != "exit")
            .map(|(dir, exit)| format!("{dir}: {}", exit.door))
            .collect();
        if !doors.is_empty() {
            notes.push(format!("Doors: {}", doors.join(", ")));
        }
        if room.terrain == "deathtrap" {
            notes.push("** DEATH TRAP **".to_string());
        }
        for (dir, exit) in &room.exits {
            if exit.to == "undefined" {
                notes.push(format!("{dir}: undefined"));
            } else if let Some(target) = self.store.rooms.get(&exit.to) {
                let rev = reverse_direction(dir);
                if target.exits.get(rev).map(|e| e.to.as_str()) != Some(vnum.as_str()) {
                    notes.push(format!("{dir}: one-way"));
                }
            }
        }
        if !room.note.is_empty() {
            notes.push(format!("Note: {}", room.note));
        }
        for line in notes {
            self.send_client(line);
        }
    }

    // ── Auto-walk engine ───────────────────────────

    pub fn start_walk(&mut self, destination: &str) -> Result<String, String> {
        let Some(origin) = self.current_room.clone() else {
            return Err("Not synced; cannot pathfind.".to_string());
        };
        let target = self
            .store
            .resolve(destination)
            .ok_or_else(|| format!("No such room or label: {destination}"))?;
        let steps = pathfind::find_path(&self.store, &origin, &target)
            .map_err(|e| e.to_string())?;
        if steps.is_empty() {
            return Ok("You are already there.".to_string());
        }
        let mut commands = create_speedwalk(&steps);
        commands.reverse(); // pop() from the tail gives the first step
        self.walk_plan = commands;
        self.walk_destination = Some(target);
        Ok(format!("Walking to {destination}."))
    }

    pub fn stop_walk(&mut self) -> String {
        self.cancel_walk();
        "Auto-walk stopped.".to_string()
    }

    fn cancel_walk(&mut self) {
        self.walk_plan.clear();
        self.walk_destination = None;
    }

    fn walk_next_direction(&mut self) {
        let Some(next) = self.walk_plan.pop() else {
            self.walk_destination = None;
            return;
        };
        match next {
            SpeedwalkCommand::Run { code, count } => {
                for _ in 0..count {
                    self.send_server(code.to_string());
                }
            }
            SpeedwalkCommand::LeadThenRide { code } => {
                self.send_server("lead".to_string());
                self.send_server(code.to_string());
                self.send_server("ride".to_string());
            }
        }
        if self.walk_plan.is_empty() {
            let dest = self.walk_destination.take().unwrap_or_default();
            self.send_client(format!("Arrived at {dest}."));
        }
    }

    // ── Command dispatch ──────────────────────────

    /// Route one client-originated line. Returns `true` if it was
    /// recognized as a mapper command (and so should not be forwarded to
    /// the server).
    pub fn dispatch_command(&mut self, line: &str) -> bool {
        let mut parts = line.splitn(2, char::is_whitespace);
        let token = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        let Some(handler) = self.command_registry.get(token).copied() else {
            if self.flags.emulation_mode {
                self.send_client(format!("Invalid command: {token}"));
                return true;
            }
            return false;
        };
        let output = handler(self, rest);
        self.send_client(output);
        true
    }
}

/// Find the first occurrence of `dir` as its own token in the exits text
/// and the single-character prefix flag (if any) immediately before it.
/// Matches `mapperworld.py`'s exits-flag scan.
fn find_direction_token(text: &str, dir: &str) -> Option<(Option<char>, usize)> {
    let idx = text.find(dir)?;
    let prefix = text[..idx].chars().last();
    let marker = match prefix {
        Some(c) if "([#=-/\\{".contains(c) => Some(c),
        _ => None,
    };
    Some((marker, idx))
}
