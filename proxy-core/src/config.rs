//! Proxy configuration file parser.
//!
//! Recognises a small `/set` directive language in a line-oriented
//! `.tfrc`-like style (one directive per line, `;`-comments,
//! non-fatal per-line errors collected and returned alongside the parsed
//! config) but with the proxy's own directive set instead of TF's
//! worlds/variables:
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/set interface=<addr>` | local bind interface (default `127.0.0.1`) |
//! | `/set local_port=<port>` | local listen port (default 4000) |
//! | `/set remote_host=<host>` | remote MUD host (default `mume.org`) |
//! | `/set remote_port=<port>` | remote MUD port (default 4242) |
//! | `/set tls=<on\|off>` | connect to the remote over TLS |
//! | `/set output_format=<raw\|normal\|tintin>` | XML tokenizer output shape |
//! | `/set prompt_terminator=<iac-ga\|hex bytes>` | prompt terminator override |
//! | `/set emulation_mode=<on\|off>` | report unknown commands as invalid |
//! | `/set rooms_file=<path>` | map rooms JSON path |
//! | `/set labels_file=<path>` | map labels JSON path |
//! | Lines starting with `;` | comment, ignored |
//! | Any other `/command` | silently skipped |

use std::path::{Path, PathBuf};

use crate::xml::OutputFormat;

// ── Public API ────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// How the server's `IAC GA` prompt terminator is rewritten before it
/// reaches the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptTerminator {
    /// Preserve the raw `IAC GA` bytes (the default).
    IacGa,
    /// Replace it with an operator-supplied byte string.
    Custom(Vec<u8>),
}

impl Default for PromptTerminator {
    fn default() -> Self {
        PromptTerminator::IacGa
    }
}

/// Process-wide proxy configuration. A single instance is created at
/// startup and shared via `Arc<tokio::sync::Mutex<Config>>` as a
/// lock-guarded singleton.
#[derive(Debug, Clone)]
pub struct Config {
    pub interface: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub tls: bool,
    pub output_format: OutputFormat,
    pub prompt_terminator: PromptTerminator,
    pub emulation_mode: bool,
    pub rooms_path: PathBuf,
    pub rooms_sample_path: PathBuf,
    pub labels_path: PathBuf,
    pub labels_sample_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let dirs = default_dirs();
        Self {
            interface: "127.0.0.1".to_string(),
            local_port: 4000,
            remote_host: "mume.org".to_string(),
            remote_port: 4242,
            tls: false,
            output_format: OutputFormat::Normal,
            prompt_terminator: PromptTerminator::default(),
            emulation_mode: false,
            rooms_path: dirs.join("rooms.json"),
            rooms_sample_path: PathBuf::from("data/rooms.sample.json"),
            labels_path: dirs.join("labels.json"),
            labels_sample_path: PathBuf::from("data/labels.sample.json"),
        }
    }
}

/// The per-user config directory (`directories::ProjectDirs`), or the
/// current directory if the platform has none (e.g. in tests).
fn default_dirs() -> PathBuf {
    directories::ProjectDirs::from("org", "mume", "mumeproxy")
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config file's contents, applying recognised `/set`
    /// directives on top of the default config. Unknown directives are
    /// silently skipped; malformed values on recognised directives are
    /// collected as non-fatal [`ConfigError`]s: corrupted configuration is
    /// surfaced to the user, never fatal.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::default();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            let Some(rest) = line.strip_prefix('/') else { continue };
            let (cmd, args_str) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));
            let args_str = args_str.trim();

            match cmd {
                "set" => {
                    if let Err(message) = apply_set(&mut config, args_str) {
                        errors.push(ConfigError { line: lineno, message });
                    }
                }
                _ => {} // silently skip unknown directives
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }
}

// ── /set directive handling ─────────────────────────────────────────────

fn apply_set(config: &mut Config, args_str: &str) -> Result<(), String> {
    let tokens = split_args(args_str);
    if tokens.is_empty() {
        return Err("/set: requires an argument".into());
    }

    let (name, value) = if let Some(eq) = tokens[0].find('=') {
        (tokens[0][..eq].to_owned(), tokens[0][eq + 1..].to_owned())
    } else if tokens.len() >= 2 {
        (tokens[0].clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("/set: missing value for '{}'", tokens[0]));
    };

    match name.as_str() {
        "interface" => config.interface = value,
        "local_port" => config.local_port = parse_port(&value)?,
        "remote_host" => config.remote_host = value,
        "remote_port" => config.remote_port = parse_port(&value)?,
        "tls" => config.tls = parse_bool(&value)?,
        "emulation_mode" => config.emulation_mode = parse_bool(&value)?,
        "output_format" => config.output_format = parse_output_format(&value)?,
        "prompt_terminator" => {
            config.prompt_terminator = parse_prompt_terminator(&value).map_err(|e| e.to_string())?
        }
        "rooms_file" => config.rooms_path = PathBuf::from(value),
        "labels_file" => config.labels_path = PathBuf::from(value),
        other => return Err(format!("unknown setting '{other}'")),
    }
    Ok(())
}

fn parse_port(value: &str) -> Result<u16, String> {
    value
        .parse()
        .map_err(|_| format!("'{value}' is not a valid port"))
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(format!("'{other}' is not on/off")),
    }
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    match value {
        "raw" => Ok(OutputFormat::Raw),
        "normal" => Ok(OutputFormat::Normal),
        "tintin" => Ok(OutputFormat::Tintin),
        other => Err(format!("'{other}' is not raw/normal/tintin")),
    }
}

/// `iac-ga` keeps the default, anything else is parsed as whitespace or
/// `:`-delimited hex bytes (e.g. `"0d 0a"`).
fn parse_prompt_terminator(value: &str) -> Result<PromptTerminator, crate::error::TelnetError> {
    if value.eq_ignore_ascii_case("iac-ga") {
        return Ok(PromptTerminator::IacGa);
    }
    let mut bytes = Vec::new();
    for tok in value.split(|c: char| c == ':' || c.is_ascii_whitespace()).filter(|t| !t.is_empty()) {
        let b = u8::from_str_radix(tok, 16)
            .map_err(|_| crate::error::TelnetError::InvalidPromptTerminator(value.to_string()))?;
        bytes.push(b);
    }
    if bytes.is_empty() {
        return Err(crate::error::TelnetError::InvalidPromptTerminator(value.to_string()));
    }
    Ok(PromptTerminator::Custom(bytes))
}

/// Split `s` into whitespace-delimited tokens, honouring double-quoted
/// strings and `\"` escapes within them (for paths containing spaces).
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if !in_quotes => in_quotes = true,
            '"' if in_quotes => in_quotes = false,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    args.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        args.push(cur);
    }
    args
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_simple() {
        assert_eq!(split_args("foo bar baz"), ["foo", "bar", "baz"]);
    }

    #[test]
    fn split_quoted_spaces() {
        assert_eq!(split_args(r#""My Dir/rooms.json""#), ["My Dir/rooms.json"]);
    }

    #[test]
    fn set_equals_syntax_port() {
        let (cfg, errs) = Config::load_str("/set remote_port=4243");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.remote_port, 4243);
    }

    #[test]
    fn set_space_syntax_host() {
        let (cfg, errs) = Config::load_str("/set remote_host pax.example.com");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.remote_host, "pax.example.com");
    }

    #[test]
    fn tls_on() {
        let (cfg, errs) = Config::load_str("/set tls=on");
        assert!(errs.is_empty(), "{errs:?}");
        assert!(cfg.tls);
    }

    #[test]
    fn output_format_tintin() {
        let (cfg, errs) = Config::load_str("/set output_format=tintin");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.output_format, OutputFormat::Tintin);
    }

    #[test]
    fn prompt_terminator_default_is_iac_ga() {
        let cfg = Config::default();
        assert_eq!(cfg.prompt_terminator, PromptTerminator::IacGa);
    }

    #[test]
    fn prompt_terminator_hex_override() {
        let (cfg, errs) = Config::load_str("/set prompt_terminator=0d 0a");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.prompt_terminator, PromptTerminator::Custom(vec![0x0d, 0x0a]));
    }

    #[test]
    fn bad_port_is_error() {
        let (_, errs) = Config::load_str("/set remote_port=notaport");
        assert!(!errs.is_empty());
    }

    #[test]
    fn unknown_setting_is_error() {
        let (_, errs) = Config::load_str("/set bogus=1");
        assert!(!errs.is_empty());
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let (cfg, errs) = Config::load_str(";; comment\n\n/set local_port=4001\n");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.local_port, 4001);
    }

    #[test]
    fn unknown_directives_silently_skipped() {
        let (cfg, errs) = Config::load_str("/addworld foo\n/set local_port=4001\n");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.local_port, 4001);
    }
}
