//! Forced/prevented movement detection and the exits-cleaner line hook.
//!
//! Grounded on `original_source/mapper/constants.py`'s `MOVEMENT_FORCED_REGEX`
//! and `MOVEMENT_PREVENTED_REGEX` and `original_source/mapperproxy/mapper/cleanmap.py`
//! (`ExitsCleaner`).

use regex::RegexSet;
use std::sync::OnceLock;

/// Lines indicating the player moved without issuing a movement command
/// (drowning, a ferry departure, a confusion spell, an eagle's descent…).
/// Matching cancels auto-walk and, if synced, drops sync.
fn forced_movement_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"You feel confused and move along randomly\.\.\.",
            r"Suddenly an explosion of ancient rhymes makes the space collapse around you!",
            r"The pain stops, your vision clears, and you realize that you are elsewhere\.",
            r"A guard leads you out of the house\.",
            r"You leave the ferry\.",
            r"You reached the riverbank\.",
            r"You stop moving towards the (?:left|right) bank and drift downstream\.",
            r"You are borne along by a strong current\.",
            r"You are swept away by the current\.",
            r"You are swept away by the powerful current of water\.",
            r"You board the ferry\.",
            r"You are dead! Sorry\.\.\.",
            r"With a jerk, the basket starts gliding down the rope towards the platform\.",
            r"#You cannot control your mount on the slanted and unstable surface! You begin to slide to the north, and plunge toward the water below!",
            r"The current pulls you faster\. Suddenly, you are sucked downwards into darkness!",
            r"You are washed blindly over the rocks, and plummet sickeningly downwards\.\.\.",
            r"Oops! You walk off the bridge and fall into the rushing water below!",
            r"Holding your breath and with closed eyes, you are squeezed below the surface of the water\.",
            r"You tighten your grip as (:a Great Eagle|Gwaihir the Windlord) starts to descend fast\.",
            r"The trees confuse you, making you wander around in circles\.",
            r"Sarion helps you outside\.",
            r"Stepping on the lizard corpses, you use some depressions in the wall for support, push the muddy ceiling apart and climb out of the cave\.",
        ])
        .expect("forced movement patterns are valid regexes")
    })
}

/// Lines indicating attempted movement did not happen (locked doors,
/// exhaustion, mounts refusing, explicit denial). Matching cancels auto-walk
/// but does not by itself drop sync — the player never left the current room.
fn prevented_movement_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"^The \w+ seem[s]? to be closed\.$",
            r"^It seems to be locked\.$",
            r"^You cannot ride there\.$",
            r"^Your boat cannot enter this place\.$",
            r"^A guard steps in front of you\.$",
            r"^The clerk bars your way\.$",
            r"^You cannot go that way\.\.\.$",
            r"^Alas, you cannot go that way\.\.\.$",
            r"^You need to swim to go there\.$",
            r"^You failed swimming there\.$",
            r"^You failed to climb there and fall down, hurting yourself\.$",
            r"^Your mount cannot climb the tree!$",
            r"^No way! You are fighting for your life!$",
            r"^In your dreams, or what\?$",
            r"^You are too exhausted\.$",
            r"^You unsuccessfully try to break through the ice\.$",
            r"^Your mount refuses to follow your orders!$",
            r"^You are too exhausted to ride\.$",
            r"^You can't go into deep water!$",
            r"^You don't control your mount!$",
            r"^Your mount is too sensible to attempt such a feat\.$",
            r"^Oops! You cannot go there riding!$",
            r"^A (?:pony|dales-pony|horse|warhorse|pack horse|trained horse|horse of the Rohirrim|brown donkey|mountain mule|hungry warg|brown wolf)(?: \(\w+\))? (?:is too exhausted|doesn't want you riding (?:him|her|it) anymore)\.$",
            r"^You'd better be swimming if you want to dive underwater\.$",
            r"^You need to climb to go there\.$",
            r"^You cannot climb there\.$",
            r"^If you still want to try, you must 'climb' there\.$",
            r"^.+ (?:prevents|keeps) you from going (?:north|south|east|west|up|down|upstairs|downstairs|past (?:him|her|it))\.$",
            r"^Nah\.\.\. You feel too relaxed to do that\.$",
            r"^Maybe you should get on your feet first\?$",
            r"^Not from your present position!$",
        ])
        .expect("prevented movement patterns are valid regexes")
    })
}

pub fn is_forced_movement_line(line: &str) -> bool {
    forced_movement_set().is_match(line)
}

pub fn is_prevented_movement_line(line: &str) -> bool {
    prevented_movement_set().is_match(line)
}

/// Directions appearing in an `exits` line bracketed by `#` or `(` are
/// server-flagged as secret/closed; any other listed direction is open to
/// view. Matches `cleanmap.py`'s "direction not inside a bracket" scan.
fn direction_tokens_unbracketed(line: &str) -> Vec<String> {
    let dirs = [
        "north", "east", "south", "west", "up", "down",
    ];
    let chars: Vec<char> = line.chars().collect();
    let mut found = Vec::new();
    for dir in dirs {
        let mut search_from = 0;
        while let Some(rel) = line[search_from..].find(dir) {
            let start = search_from + rel;
            let end = start + dir.len();
            let before = chars[..line[..start].chars().count()].last().copied();
            let bracketed = matches!(before, Some('#') | Some('('));
            if !bracketed {
                found.push(dir.to_string());
            }
            search_from = end;
        }
    }
    found
}

/// On an `exits` line (full text, e.g. "Exits: north, south(, east#.") that
/// does not start with `"Exits:"` (a secondary/partial listing), clear the
/// `hidden` door flag for any direction the server now shows unbracketed,
/// since the door must have been opened/revealed.
pub fn exits_cleaner_on_line(room: &mut crate::map::Room, line: &str) {
    if line.starts_with("Exits:") {
        return;
    }
    for dir in direction_tokens_unbracketed(line) {
        if let Some(exit) = room.exits.get_mut(&dir) {
            if exit.door_flags.contains("hidden") {
                exit.door_flags.remove("hidden");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Room;

    #[test]
    fn forced_movement_matches() {
        assert!(is_forced_movement_line("You are swept away by the current."));
        assert!(!is_forced_movement_line("You walk north."));
    }

    #[test]
    fn prevented_movement_matches() {
        assert!(is_prevented_movement_line("The door seems to be closed."));
        assert!(is_prevented_movement_line("You are too exhausted."));
    }

    #[test]
    fn exits_cleaner_unhides_revealed_door() {
        let mut room = Room::new("0");
        room.exit_mut("north").door_flags.insert("hidden".to_string());
        exits_cleaner_on_line(&mut room, "You also see north.");
        assert!(!room.exits["north"].door_flags.contains("hidden"));
    }

    #[test]
    fn exits_cleaner_ignores_bracketed_direction() {
        let mut room = Room::new("0");
        room.exit_mut("north").door_flags.insert("hidden".to_string());
        exits_cleaner_on_line(&mut room, "You also see #north.");
        assert!(room.exits["north"].door_flags.contains("hidden"));
    }

    #[test]
    fn exits_cleaner_skips_canonical_exits_line() {
        let mut room = Room::new("0");
        room.exit_mut("north").door_flags.insert("hidden".to_string());
        exits_cleaner_on_line(&mut room, "Exits: north.");
        assert!(room.exits["north"].door_flags.contains("hidden"));
    }
}
