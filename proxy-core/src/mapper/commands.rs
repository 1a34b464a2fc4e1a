//! The forty-odd player-facing mapper commands, dispatched by
//! [`super::MapperWorker::dispatch_command`] through a single-handler
//! registry — one name, one function, rather than a giant match.
//!
//! Grounded on `original_source/mapper/mapperworld.py`'s `user_command_*`
//! handlers for argument shapes and syntax-hint wording.

use std::collections::HashMap;

use super::MapperWorker;
use crate::map::room::{VALID_DOOR_FLAGS, VALID_EXIT_FLAGS, VALID_LOAD_FLAGS, VALID_MOB_FLAGS};
use crate::map::store::sort_exits;

pub type CommandHandler = fn(&mut MapperWorker, &str) -> String;
pub type CommandRegistry = HashMap<&'static str, CommandHandler>;

pub fn default_registry() -> CommandRegistry {
    let mut r: CommandRegistry = HashMap::new();
    r.insert("automap", automap);
    r.insert("autoupdate", autoupdate);
    r.insert("automerge", automerge);
    r.insert("autolink", autolink);
    r.insert("run", run);
    r.insert("step", step);
    r.insert("stop", stop);
    r.insert("path", path);
    r.insert("sync", sync);
    r.insert("vnum", vnum);
    r.insert("tvnum", tvnum);
    r.insert("rinfo", rinfo);
    r.insert("rnote", rnote);
    r.insert("ralign", ralign);
    r.insert("rlight", rlight);
    r.insert("rportable", rportable);
    r.insert("rridable", rridable);
    r.insert("ravoid", ravoid);
    r.insert("rterrain", rterrain);
    r.insert("rx", rx);
    r.insert("ry", ry);
    r.insert("rz", rz);
    r.insert("rmobflags", rmobflags);
    r.insert("rloadflags", rloadflags);
    r.insert("exitflags", exitflags);
    r.insert("doorflags", doorflags);
    r.insert("secret", secret);
    r.insert("rlink", rlink);
    r.insert("rdelete", rdelete);
    r.insert("rlabel", rlabel);
    r.insert("getlabel", getlabel);
    r.insert("savemap", savemap);
    r.insert("fdoor", fdoor);
    r.insert("fdynamic", fdynamic);
    r.insert("flabel", flabel);
    r.insert("fname", fname);
    r.insert("fnote", fnote);
    r.insert("gettimer", gettimer);
    r.insert("gettimerms", gettimerms);
    r.insert("secretaction", secretaction);
    r.insert("clock", clock);
    r.insert("emu", emu);
    r.insert("maphelp", maphelp);
    r
}

fn on_off(arg: &str, current: bool) -> bool {
    match arg.trim().to_lowercase().as_str() {
        "on" => true,
        "off" => false,
        _ => !current,
    }
}

fn automap(w: &mut MapperWorker, arg: &str) -> String {
    w.flags.auto_map = on_off(arg, w.flags.auto_map);
    format!("automap is now {}.", if w.flags.auto_map { "on" } else { "off" })
}

fn autoupdate(w: &mut MapperWorker, arg: &str) -> String {
    w.flags.auto_update = on_off(arg, w.flags.auto_update);
    format!("autoupdate is now {}.", if w.flags.auto_update { "on" } else { "off" })
}

fn automerge(w: &mut MapperWorker, arg: &str) -> String {
    w.flags.auto_merge = on_off(arg, w.flags.auto_merge);
    format!("automerge is now {}.", if w.flags.auto_merge { "on" } else { "off" })
}

fn autolink(w: &mut MapperWorker, arg: &str) -> String {
    w.flags.auto_link = on_off(arg, w.flags.auto_link);
    format!("autolink is now {}.", if w.flags.auto_link { "on" } else { "off" })
}

fn run(w: &mut MapperWorker, arg: &str) -> String {
    if arg.is_empty() {
        return "Syntax: 'run <vnum | label>'.".to_string();
    }
    w.start_walk(arg).unwrap_or_else(|e| e)
}

fn step(w: &mut MapperWorker, arg: &str) -> String {
    let dir = arg.trim();
    if !crate::map::DIRECTIONS.contains(&dir) {
        return "Syntax: 'step <direction>'.".to_string();
    }
    w.pending_server_output.push(dir.to_string());
    format!("Stepping {dir}.")
}

fn stop(w: &mut MapperWorker, _arg: &str) -> String {
    w.stop_walk()
}

fn path(w: &mut MapperWorker, arg: &str) -> String {
    if arg.is_empty() {
        return "Syntax: 'path <vnum | label>'.".to_string();
    }
    let Some(origin) = w.current_room.clone() else {
        return "Not synced; cannot pathfind.".to_string();
    };
    let Some(target) = w.store.resolve(arg) else {
        return format!("No such room or label: {arg}");
    };
    match crate::pathfind::find_path(&w.store, &origin, &target) {
        Ok(steps) if steps.is_empty() => "You are already there.".to_string(),
        Ok(steps) => {
            let commands = crate::pathfind::create_speedwalk(&steps);
            crate::pathfind::render_speedwalk(&commands)
        }
        Err(e) => e.to_string(),
    }
}

fn sync(w: &mut MapperWorker, arg: &str) -> String {
    if arg.is_empty() {
        return "Syntax: 'sync <vnum | label>'.".to_string();
    }
    match w.sync_to(arg) {
        Ok(vnum) => format!("Synced to room {vnum}."),
        Err(e) => e,
    }
}

fn vnum(w: &mut MapperWorker, _arg: &str) -> String {
    match &w.current_room {
        Some(v) => format!("Current room: {v}."),
        None => "Not synced.".to_string(),
    }
}

fn tvnum(w: &mut MapperWorker, arg: &str) -> String {
    let dir = arg.trim();
    let Some(vnum) = w.current_room.clone() else {
        return "Not synced.".to_string();
    };
    match w.store.rooms.get(&vnum).and_then(|r| r.exits.get(dir)) {
        Some(exit) => format!("{dir} leads to {}.", exit.to),
        None => format!("No exit {dir} from the current room."),
    }
}

fn rinfo(w: &mut MapperWorker, _arg: &str) -> String {
    let Some(vnum) = w.current_room.clone() else {
        return "Not synced.".to_string();
    };
    let Some(room) = w.store.rooms.get(&vnum) else {
        return "Not synced.".to_string();
    };
    let mut exits: Vec<String> = room.exits.keys().cloned().collect();
    sort_exits(&mut exits);
    format!(
        "vnum={vnum} name={:?} terrain={} light={} align={} ridable={} cost={:.2} exits=[{}]",
        room.name,
        room.terrain,
        room.light,
        room.align,
        room.ridable,
        room.cost,
        exits.join(", ")
    )
}

fn with_current_room<'a>(w: &'a mut MapperWorker) -> Option<&'a mut crate::map::Room> {
    let vnum = w.current_room.clone()?;
    w.store.rooms.get_mut(&vnum)
}

fn rnote(w: &mut MapperWorker, arg: &str) -> String {
    let arg = arg.to_string();
    let Some(room) = with_current_room(w) else { return "Not synced.".to_string() };
    if arg.is_empty() {
        format!("Note: {}", room.note)
    } else {
        room.note = arg;
        "Note updated.".to_string()
    }
}

fn ralign(w: &mut MapperWorker, arg: &str) -> String {
    field_setter(w, arg, "align", |r| &mut r.align)
}

fn rlight(w: &mut MapperWorker, arg: &str) -> String {
    field_setter(w, arg, "light", |r| &mut r.light)
}

fn rportable(w: &mut MapperWorker, arg: &str) -> String {
    field_setter(w, arg, "portable", |r| &mut r.portable)
}

fn rridable(w: &mut MapperWorker, arg: &str) -> String {
    let result = field_setter(w, arg, "ridable", |r| &mut r.ridable);
    if let Some(room) = with_current_room(w) {
        room.recalculate_cost();
    }
    result
}

fn ravoid(w: &mut MapperWorker, arg: &str) -> String {
    let Some(room) = with_current_room(w) else { return "Not synced.".to_string() };
    room.avoid = on_off(arg, room.avoid);
    let avoid = room.avoid;
    room.recalculate_cost();
    format!("Room avoid is now {}.", if avoid { "on" } else { "off" })
}

fn rterrain(w: &mut MapperWorker, arg: &str) -> String {
    let result = field_setter(w, arg, "terrain", |r| &mut r.terrain);
    if let Some(room) = with_current_room(w) {
        room.recalculate_cost();
    }
    result
}

fn field_setter(
    w: &mut MapperWorker,
    arg: &str,
    label: &str,
    field: impl FnOnce(&mut crate::map::Room) -> &mut String,
) -> String {
    let Some(room) = with_current_room(w) else { return "Not synced.".to_string() };
    if arg.is_empty() {
        format!("{label}: {}", field(room))
    } else {
        *field(room) = arg.to_string();
        format!("{label} updated.")
    }
}

fn rx(w: &mut MapperWorker, arg: &str) -> String {
    int_field_setter(w, arg, "x", |r| &mut r.x)
}

fn ry(w: &mut MapperWorker, arg: &str) -> String {
    int_field_setter(w, arg, "y", |r| &mut r.y)
}

fn rz(w: &mut MapperWorker, arg: &str) -> String {
    int_field_setter(w, arg, "z", |r| &mut r.z)
}

fn int_field_setter(
    w: &mut MapperWorker,
    arg: &str,
    label: &str,
    field: impl FnOnce(&mut crate::map::Room) -> &mut i64,
) -> String {
    let Some(room) = with_current_room(w) else { return "Not synced.".to_string() };
    if arg.is_empty() {
        format!("{label}: {}", field(room))
    } else {
        match arg.trim().parse::<i64>() {
            Ok(v) => {
                *field(room) = v;
                format!("{label} updated.")
            }
            Err(_) => format!("{label} must be an integer."),
        }
    }
}

fn flag_command(
    w: &mut MapperWorker,
    arg: &str,
    command: &str,
    valid: &[&str],
    field: impl FnOnce(&mut crate::map::Room) -> &mut std::collections::BTreeSet<String>,
) -> String {
    let mut parts = arg.split_whitespace();
    let (Some(action), Some(flag)) = (parts.next(), parts.next()) else {
        return format!("Syntax: '{command} [add | remove] <flag>'.");
    };
    if !valid.contains(&flag) {
        return format!("Unknown flag {flag:?} for {command}.");
    }
    let Some(room) = with_current_room(w) else { return "Not synced.".to_string() };
    let set = field(room);
    match action {
        "add" => {
            set.insert(flag.to_string());
            format!("{flag} added.")
        }
        "remove" => {
            set.remove(flag);
            format!("{flag} removed.")
        }
        _ => format!("Syntax: '{command} [add | remove] <flag>'."),
    }
}

fn rmobflags(w: &mut MapperWorker, arg: &str) -> String {
    flag_command(w, arg, "rmobflags", VALID_MOB_FLAGS, |r| &mut r.mob_flags)
}

fn rloadflags(w: &mut MapperWorker, arg: &str) -> String {
    flag_command(w, arg, "rloadflags", VALID_LOAD_FLAGS, |r| &mut r.load_flags)
}

fn exitflags(w: &mut MapperWorker, arg: &str) -> String {
    let mut parts = arg.split_whitespace();
    let (Some(action), Some(dir), Some(flag)) = (parts.next(), parts.next(), parts.next()) else {
        return "Syntax: 'exitflags [add | remove] <direction> <flag>'.".to_string();
    };
    if !VALID_EXIT_FLAGS.contains(&flag) {
        return format!("Unknown exit flag {flag:?}.");
    }
    let Some(room) = with_current_room(w) else { return "Not synced.".to_string() };
    let exit = room.exit_mut(dir);
    match action {
        "add" => {
            exit.exit_flags.insert(flag.to_string());
            format!("{flag} added to {dir}.")
        }
        "remove" => {
            exit.exit_flags.remove(flag);
            format!("{flag} removed from {dir}.")
        }
        _ => "Syntax: 'exitflags [add | remove] <direction> <flag>'.".to_string(),
    }
}

fn doorflags(w: &mut MapperWorker, arg: &str) -> String {
    let mut parts = arg.split_whitespace();
    let (Some(action), Some(dir), Some(flag)) = (parts.next(), parts.next(), parts.next()) else {
        return "Syntax: 'doorflags [add | remove] <direction> <flag>'.".to_string();
    };
    if !VALID_DOOR_FLAGS.contains(&flag) {
        return format!("Unknown door flag {flag:?}.");
    }
    let Some(room) = with_current_room(w) else { return "Not synced.".to_string() };
    let exit = room.exit_mut(dir);
    match action {
        "add" => {
            exit.door_flags.insert(flag.to_string());
            format!("{flag} added to {dir}.")
        }
        "remove" => {
            exit.door_flags.remove(flag);
            format!("{flag} removed from {dir}.")
        }
        _ => "Syntax: 'doorflags [add | remove] <direction> <flag>'.".to_string(),
    }
}

fn secret(w: &mut MapperWorker, arg: &str) -> String {
    let dir = arg.trim();
    if !crate::map::DIRECTIONS.contains(&dir) {
        return "Syntax: 'secret <direction>'.".to_string();
    }
    let Some(room) = with_current_room(w) else { return "Not synced.".to_string() };
    let exit = room.exit_mut(dir);
    exit.exit_flags.insert("door".to_string());
    if exit.door_flags.contains("hidden") {
        exit.door_flags.remove("hidden");
        format!("{dir} is no longer marked secret.")
    } else {
        exit.door_flags.insert("hidden".to_string());
        format!("{dir} marked secret.")
    }
}

fn rlink(w: &mut MapperWorker, arg: &str) -> String {
    let tokens: Vec<&str> = arg.split_whitespace().collect();
    if tokens.first() == Some(&"remove") {
        let Some(dir) = tokens.get(1) else {
            return "Syntax: 'rlink remove <direction>'.".to_string();
        };
        let Some(room) = with_current_room(w) else { return "Not synced.".to_string() };
        room.exit_mut(dir).to = "undefined".to_string();
        return format!("{dir} exit removed.");
    }

    let mut rest = tokens.as_slice();
    if rest.first() == Some(&"add") {
        rest = &rest[1..];
    }
    let oneway = rest.first() == Some(&"oneway");
    if oneway {
        rest = &rest[1..];
    }
    let (Some(target), Some(dir)) = (rest.first(), rest.get(1)) else {
        return "Syntax: 'rlink [add | remove] [oneway] [vnum] [<direction>]'.".to_string();
    };
    let Some(from) = w.current_room.clone() else { return "Not synced.".to_string() };
    if !w.store.rooms.contains_key(*target) {
        return format!("No such room: {target}");
    }
    w.store.link(&from, dir, target, !oneway);
    format!("Linked {dir} to {target}{}.", if oneway { " (one-way)" } else { "" })
}

fn rdelete(w: &mut MapperWorker, arg: &str) -> String {
    let target = if arg.is_empty() {
        w.current_room.clone()
    } else {
        w.store.resolve(arg)
    };
    let Some(vnum) = target else {
        return format!("No such room or label: {arg}");
    };
    match w.store.delete_room(&vnum) {
        Ok(()) => {
            if w.current_room.as_deref() == Some(vnum.as_str()) {
                w.current_room = None;
                w.synced = false;
            }
            format!("Room {vnum} deleted.")
        }
        Err(e) => e.to_string(),
    }
}

fn rlabel(w: &mut MapperWorker, arg: &str) -> String {
    let tokens: Vec<&str> = arg.split_whitespace().collect();
    match tokens.as_slice() {
        ["remove", label] => {
            if w.store.labels.remove(*label).is_some() {
                format!("Label {label} removed.")
            } else {
                format!("No such label: {label}")
            }
        }
        ["add", label, vnum] | [label, vnum] => {
            if !w.store.rooms.contains_key(*vnum) {
                return format!("No such room: {vnum}");
            }
            w.store.labels.insert(label.to_string(), vnum.to_string());
            format!("Label {label} -> {vnum}.")
        }
        [label] => {
            let Some(vnum) = w.current_room.clone() else { return "Not synced.".to_string() };
            w.store.labels.insert(label.to_string(), vnum.clone());
            format!("Label {label} -> {vnum}.")
        }
        _ => "Syntax: 'rlabel [add | remove] <label> [vnum]'.".to_string(),
    }
}

fn getlabel(w: &mut MapperWorker, arg: &str) -> String {
    let label = arg.trim();
    match w.store.labels.get(label) {
        Some(vnum) => format!("{label} -> {vnum}."),
        None => format!("No such label: {label}"),
    }
}

fn savemap(w: &mut MapperWorker, _arg: &str) -> String {
    match w.store.save() {
        Ok(()) => "Map saved.".to_string(),
        Err(e) => e.to_string(),
    }
}

fn search_report(matches: Vec<&crate::map::Room>) -> String {
    if matches.is_empty() {
        return "No matching rooms.".to_string();
    }
    matches
        .iter()
        .map(|r| format!("{}: {}", r.vnum, r.name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fdoor(w: &mut MapperWorker, arg: &str) -> String {
    search_report(w.store.search(None, None, None, Some(arg.trim())))
}

fn fdynamic(w: &mut MapperWorker, arg: &str) -> String {
    search_report(w.store.search(None, None, Some(arg.trim()), None))
}

fn flabel(w: &mut MapperWorker, arg: &str) -> String {
    let needle = arg.trim().to_lowercase();
    let matches: Vec<String> = w
        .store
        .labels
        .keys()
        .filter(|l| l.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    if matches.is_empty() {
        "No matching labels.".to_string()
    } else {
        matches.join(", ")
    }
}

fn fname(w: &mut MapperWorker, arg: &str) -> String {
    search_report(w.store.search(Some(arg.trim()), None, None, None))
}

fn fnote(w: &mut MapperWorker, arg: &str) -> String {
    search_report(w.store.search(None, Some(arg.trim()), None, None))
}

fn gettimer(w: &mut MapperWorker, _arg: &str) -> String {
    format!("{:.1}s since this session's mapper started.", w.started_at().elapsed().as_secs_f64())
}

fn gettimerms(w: &mut MapperWorker, _arg: &str) -> String {
    format!("{}ms since this session's mapper started.", w.started_at().elapsed().as_millis())
}

fn secretaction(w: &mut MapperWorker, arg: &str) -> String {
    let mut parts = arg.split_whitespace();
    let (Some(dir), Some(action)) = (parts.next(), parts.next()) else {
        return "Syntax: 'secretaction <direction> <action>'.".to_string();
    };
    let door_name = w
        .current_room
        .clone()
        .and_then(|v| w.store.rooms.get(&v).cloned())
        .and_then(|r| r.exits.get(dir).cloned())
        .map(|e| e.door)
        .filter(|d| !d.is_empty());
    match door_name {
        Some(door) => {
            w.pending_server_output.push(format!("{action} {door} {dir}"));
            format!("{action} {door} {dir}")
        }
        None => {
            w.pending_server_output.push(format!("{action} {dir}"));
            format!("{action} {dir}")
        }
    }
}

fn clock(w: &mut MapperWorker, _arg: &str) -> String {
    match &w.current_room {
        Some(vnum) => match w.store.rooms.get(vnum) {
            Some(room) if room.mob_flags.contains("clock") => {
                "There is a clock here, but reading it requires looking at the room text.".to_string()
            }
            _ => "There is no clock here.".to_string(),
        },
        None => "Not synced.".to_string(),
    }
}

fn emu(w: &mut MapperWorker, arg: &str) -> String {
    w.flags.emulation_mode = on_off(arg, w.flags.emulation_mode);
    format!(
        "Emulation mode is now {}.",
        if w.flags.emulation_mode { "on" } else { "off" }
    )
}

fn maphelp(_w: &mut MapperWorker, _arg: &str) -> String {
    let mut names: Vec<&str> = default_registry().keys().copied().collect();
    names.sort_unstable();
    format!("Mapper commands: {}", names.join(", "))
}
