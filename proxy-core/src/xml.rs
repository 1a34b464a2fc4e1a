//! XML room-protocol tokenizer.
//!
//! This is deliberately **not** a generic XML parser: the input has no
//! root element and only a fixed set of named entities, and
//! the tokenizer must coexist with Telnet/MPI framing applied upstream.
//! It is a character-level scanner toggling on `<`/`>`, exactly mirroring
//! `original_source/mapperproxy/mapper/xmlparser.py`'s `MumeXMLParser`.

use regex::Regex;
use std::sync::OnceLock;

/// Tokenizer mode — mutually exclusive, mirrors `XML_NONE`/`XML_ROOM`/etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    None,
    Room,
    Name,
    Description,
    Terrain,
    Exits,
    Prompt,
}

/// One typed event emitted by the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    /// `<movement dir="X"/>` — direction as received, unvalidated.
    Movement(String),
    /// Start of a `<room>` block.
    RoomStart,
    /// `<name>…</name>` buffered text.
    Name(String),
    /// `<description>…</description>` buffered text.
    Description(String),
    /// `<terrain>…</terrain>` buffered text (fog/blindness only).
    Terrain(String),
    /// Text accumulated inside `<room>` outside name/description/terrain —
    /// emitted when `</room>` closes the block.
    Dynamic(String),
    /// `<exits>…</exits>` raw inner text.
    Exits(String),
    /// `<prompt>…</prompt>` inner text, plus fields parsed out of it.
    Prompt(PromptFields),
    /// A complete line of plain text outside any tag (for line-pattern
    /// hooks: exits-cleaner, forced/prevented movement, clock sync).
    Line(String),
    /// Scouting began (`You quietly scout …` seen outside a tag).
    ScoutingStarted,
}

/// Fields parsed out of a prompt string, mirroring `PROMPT_REGEX` from
/// `original_source/mapper/constants.py`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptFields {
    pub raw: String,
    pub light: Option<char>,
    pub terrain: Option<char>,
    pub weather: String,
    pub movement_flags: String,
}

fn prompt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<light>[@*!)o]?)(?P<terrain>[#(\[+.%fO~UW:=<]?)(?P<weather>['\x22~=*-]{0,2})\s*(?P<movement>[RrSsCcW]{0,4})",
        )
        .unwrap()
    })
}

fn parse_prompt_fields(raw: &str) -> PromptFields {
    let caps = prompt_regex().captures(raw);
    let get_char = |name: &str| -> Option<char> {
        caps.as_ref()
            .and_then(|c| c.name(name))
            .and_then(|m| m.as_str().chars().next())
    };
    let get_str = |name: &str| -> String {
        caps.as_ref()
            .and_then(|c| c.name(name))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };
    PromptFields {
        raw: raw.to_string(),
        light: get_char("light"),
        terrain: get_char("terrain"),
        weather: get_str("weather"),
        movement_flags: get_str("movement"),
    }
}

const XML_UNESCAPE_PATTERNS: &[(&str, &str)] = &[
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&amp;", "&"),
];

fn unescape(data: &str) -> String {
    let mut out = data.to_string();
    for (from, to) in XML_UNESCAPE_PATTERNS {
        out = out.replace(from, to);
    }
    out
}

/// Output format chosen at startup (immutable for the session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Raw,
    Normal,
    Tintin,
}

/// Tags rewritten to `TAG:…:TAG` markers under the `tintin` output format.
const TINTIN_PAIRED_TAGS: &[&str] = &["prompt", "name", "tell", "narrate", "pray", "say", "emote"];

/// Character-level XML room-protocol tokenizer.
///
/// Consumes bytes already passed through the Telnet filter and MPI
/// extractor. Produces both a client-visible passthrough stream (shaped by
/// `OutputFormat`) and a list of [`XmlEvent`]s for the mapper worker.
pub struct XmlTokenizer {
    mode: Mode,
    gratuitous: bool,
    reading_tag: bool,
    tag_buf: String,
    text_buf: String,
    line_buf: String,
    dynamic_buf: String,
    movement_pending: Option<String>,
    scouting_candidate: bool,
    format: OutputFormat,
    out: Vec<u8>,
}

impl XmlTokenizer {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            mode: Mode::None,
            gratuitous: false,
            reading_tag: false,
            tag_buf: String::new(),
            text_buf: String::new(),
            line_buf: String::new(),
            dynamic_buf: String::new(),
            movement_pending: None,
            scouting_candidate: false,
            format,
            out: Vec::new(),
        }
    }

    /// Feed a chunk of text (already telnet/MPI filtered). Returns the
    /// client-visible bytes and the decoded events, in emission order.
    pub fn feed(&mut self, chunk: &str) -> (Vec<u8>, Vec<XmlEvent>) {
        let mut events = Vec::new();
        self.out.clear();
        for ch in chunk.chars() {
            self.step(ch, &mut events);
        }
        (std::mem::take(&mut self.out), events)
    }

    fn step(&mut self, ch: char, events: &mut Vec<XmlEvent>) {
        if self.reading_tag {
            if ch == '>' {
                if !self.tag_buf.is_empty() {
                    let tag = std::mem::take(&mut self.tag_buf);
                    self.element(&tag, events);
                }
                self.reading_tag = false;
            } else {
                self.tag_buf.push(ch);
            }
        } else if ch == '<' {
            let text = std::mem::take(&mut self.text_buf);
            self.text(&text, events);
            self.reading_tag = true;
        } else {
            self.text_buf.push(ch);
            if self.mode == Mode::None && !self.gratuitous {
                if ch == '\n' {
                    let line = std::mem::take(&mut self.line_buf);
                    if self.format == OutputFormat::Raw {
                        self.out.extend_from_slice(line.as_bytes());
                        self.out.push(b'\n');
                    }
                    self.check_scouting(&line);
                    events.push(XmlEvent::Line(line));
                } else {
                    self.line_buf.push(ch);
                }
            } else if self.format == OutputFormat::Raw {
                let mut buf = [0u8; 4];
                self.out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    fn check_scouting(&mut self, line: &str) {
        if line.contains("You quietly scout ") || line.contains("You can't seem to escape the roots!") {
            self.scouting_candidate = true;
        } else if line.contains("You were not able to keep your concentration while moving.")
            && line.contains("You stop scouting.")
        {
            self.scouting_candidate = false;
        }
    }

    fn element(&mut self, tag: &str, events: &mut Vec<XmlEvent>) {
        match self.mode {
            Mode::None => {
                if let Some(rest) = tag.strip_prefix("movement") {
                    // `movement dir=east/` → extract up to the next '/'.
                    let dir = rest
                        .replacen(" dir=", "", 1)
                        .trim_end_matches('/')
                        .split('/')
                        .next()
                        .unwrap_or("")
                        .trim()
                        .to_string();
                    self.movement_pending = Some(dir.clone());
                    events.push(XmlEvent::Movement(dir));
                } else if tag.starts_with("prompt") {
                    self.mode = Mode::Prompt;
                } else if tag.starts_with("exits") {
                    self.mode = Mode::Exits;
                } else if tag.starts_with("room") {
                    self.mode = Mode::Room;
                    self.dynamic_buf.clear();
                    events.push(XmlEvent::RoomStart);
                } else if tag.starts_with("gratuitous") {
                    self.gratuitous = true;
                } else if tag.starts_with("/gratuitous") {
                    self.gratuitous = false;
                } else if tag.starts_with("/xml") || tag.starts_with("status") {
                    // no-op transitions
                } else if self.format == OutputFormat::Raw {
                    self.emit_raw_tag(tag);
                } else if self.is_tintin_paired(tag) {
                    self.emit_tintin_marker(tag, "");
                }
            }
            Mode::Room => {
                if tag.starts_with("name") {
                    self.mode = Mode::Name;
                } else if tag.starts_with("description") {
                    self.mode = Mode::Description;
                } else if tag.starts_with("terrain") {
                    self.mode = Mode::Terrain;
                } else if tag.starts_with("/room") {
                    self.mode = Mode::None;
                    let dynamic = unescape(self.dynamic_buf.trim_end_matches('\n'));
                    events.push(XmlEvent::Dynamic(dynamic));
                }
            }
            Mode::Name => {
                if tag.starts_with("/name") {
                    self.mode = Mode::Room;
                }
            }
            Mode::Description => {
                if tag.starts_with("/description") {
                    self.mode = Mode::Room;
                }
            }
            Mode::Terrain => {
                if tag.starts_with("/terrain") {
                    self.mode = Mode::Room;
                }
            }
            Mode::Exits => {
                if tag.starts_with("/exits") {
                    self.mode = Mode::None;
                }
            }
            Mode::Prompt => {
                if tag.starts_with("/prompt") {
                    self.mode = Mode::None;
                }
            }
        }
    }

    fn emit_raw_tag(&mut self, tag: &str) {
        self.out.push(b'<');
        self.out.extend_from_slice(tag.as_bytes());
        self.out.push(b'>');
    }

    fn is_tintin_paired(&self, tag: &str) -> bool {
        let name = tag.trim_start_matches('/');
        TINTIN_PAIRED_TAGS.contains(&name)
    }

    fn emit_tintin_marker(&mut self, tag: &str, text: &str) {
        if self.format != OutputFormat::Tintin {
            return;
        }
        let name = tag.trim_start_matches('/').to_uppercase();
        self.out.extend_from_slice(format!("{name}:{text}:{name}").as_bytes());
    }

    fn text(&mut self, data: &str, events: &mut Vec<XmlEvent>) {
        let data = unescape(data);
        if data.is_empty() {
            return;
        }
        match self.mode {
            Mode::None => {
                // Already handled char-by-char in `step` for line
                // buffering and raw passthrough; nothing further here.
            }
            Mode::Room => {
                self.dynamic_buf.push_str(&data);
                self.dynamic_buf.push('\n');
                if self.format != OutputFormat::Raw && !self.gratuitous {
                    self.out.extend_from_slice(data.as_bytes());
                    self.out.push(b'\n');
                }
            }
            Mode::Name => {
                events.push(XmlEvent::Name(data.clone()));
                if self.format == OutputFormat::Tintin {
                    self.emit_tintin_marker("name", &data);
                } else if self.format == OutputFormat::Normal && !self.gratuitous {
                    self.out.extend_from_slice(data.as_bytes());
                    self.out.push(b'\n');
                }
            }
            Mode::Description => {
                events.push(XmlEvent::Description(data.clone()));
                if self.format != OutputFormat::Raw && !self.gratuitous {
                    self.out.extend_from_slice(data.as_bytes());
                    self.out.push(b'\n');
                }
            }
            Mode::Terrain => {
                events.push(XmlEvent::Terrain(data));
            }
            Mode::Exits => {
                events.push(XmlEvent::Exits(data.clone()));
                if self.format != OutputFormat::Raw {
                    self.out.extend_from_slice(data.as_bytes());
                }
            }
            Mode::Prompt => {
                let fields = parse_prompt_fields(&data);
                events.push(XmlEvent::Prompt(fields));
                if self.format == OutputFormat::Tintin {
                    self.emit_tintin_marker("prompt", &data);
                } else if self.format == OutputFormat::Normal {
                    self.out.extend_from_slice(data.as_bytes());
                }
                if self.scouting_candidate {
                    events.push(XmlEvent::ScoutingStarted);
                    self.scouting_candidate = false;
                }
            }
        }
    }
}
