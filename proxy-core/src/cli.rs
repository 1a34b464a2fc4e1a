//! Command-line argument parsing.
//!
//! Usage:
//!   mumeproxy [-f<config>] [-i<addr>] [-p<port>] [-H<host>] [-P<port>] [-x]
//!             [-o<format>] [-t<terminator>] [-e] [--find-format=<format>]
//!
//! Documented for completeness; not part of the core's
//! testable surface.

use std::path::PathBuf;

use crate::config::PromptTerminator;
use crate::xml::OutputFormat;

// ── Public types ──────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Config-file specification.
    pub config: ConfigFile,
    /// Local bind interface (`-i<addr>`), default `127.0.0.1`.
    pub interface: Option<String>,
    /// Local listen port (`-p<port>`).
    pub local_port: Option<u16>,
    /// Remote MUD host (`-H<host>`).
    pub remote_host: Option<String>,
    /// Remote MUD port (`-P<port>`).
    pub remote_port: Option<u16>,
    /// Connect to the remote over TLS (`-x`).
    pub tls: bool,
    /// XML tokenizer output format (`-o<raw|normal|tintin>`).
    pub output_format: Option<OutputFormat>,
    /// Prompt terminator override (`-t<iac-ga|hex bytes>`).
    pub prompt_terminator: Option<PromptTerminator>,
    /// Offline emulation mode (`-e`): unknown commands are reported as
    /// invalid rather than forwarded to the server.
    pub emulation_mode: bool,
    /// Output format used by `find`-style commands (`fname`/`fnote`/…),
    /// independent of the XML tokenizer's `output_format`.
    pub find_format: Option<String>,
    /// Debug logging (`-d`).
    pub debug: bool,
}

/// How to choose the config file.
#[derive(Debug, Default)]
pub enum ConfigFile {
    /// Search the standard locations (default).
    #[default]
    Search,
    /// `-f` with no file argument: skip config entirely.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(&raw[1..])
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if let Some(rest) = arg.strip_prefix("--find-format=") {
            args.find_format = Some(rest.to_owned());
            i += 1;
            continue;
        }

        if !arg.starts_with('-') || arg == "-" {
            return Err(format!("unexpected positional argument: {arg}"));
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'x' => args.tls = true,
                'e' => args.emulation_mode = true,
                'd' => args.debug = true,

                'f' => {
                    if j + 1 < chars.len() {
                        let file: String = chars[j + 1..].iter().collect();
                        args.config = ConfigFile::Explicit(PathBuf::from(file));
                        j = chars.len();
                    } else if i + 1 < argv.len() && !argv[i + 1].starts_with('-') {
                        i += 1;
                        args.config = ConfigFile::Explicit(PathBuf::from(&argv[i]));
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }

                'i' => args.interface = Some(take_value('i', &chars, &mut j, argv, &mut i)?),
                'H' => args.remote_host = Some(take_value('H', &chars, &mut j, argv, &mut i)?),
                'p' => {
                    let v = take_value('p', &chars, &mut j, argv, &mut i)?;
                    args.local_port = Some(v.parse().map_err(|_| format!("invalid port: {v}"))?);
                }
                'P' => {
                    let v = take_value('P', &chars, &mut j, argv, &mut i)?;
                    args.remote_port = Some(v.parse().map_err(|_| format!("invalid port: {v}"))?);
                }
                'o' => {
                    let v = take_value('o', &chars, &mut j, argv, &mut i)?;
                    args.output_format = Some(parse_output_format(&v)?);
                }
                't' => {
                    let v = take_value('t', &chars, &mut j, argv, &mut i)?;
                    args.prompt_terminator = Some(parse_prompt_terminator(&v)?);
                }

                c => return Err(format!("illegal option -- {c}")),
            }
            j += 1;
        }
        i += 1;
    }

    Ok(args)
}

/// Read a flag's value, either attached (`-p4000`) or as the next argv
/// element (`-p 4000`), advancing `j`/`i` as consumed.
fn take_value(
    flag: char,
    chars: &[char],
    j: &mut usize,
    argv: &[String],
    i: &mut usize,
) -> Result<String, String> {
    if *j + 1 < chars.len() {
        let s: String = chars[*j + 1..].iter().collect();
        *j = chars.len();
        Ok(s)
    } else if *i + 1 < argv.len() {
        *i += 1;
        Ok(argv[*i].clone())
    } else {
        Err(format!("-{flag} requires an argument"))
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

fn parse_prompt_terminator(value: &str) -> Result<PromptTerminator, String> {
    if value.eq_ignore_ascii_case("iac-ga") {
        return Ok(PromptTerminator::IacGa);
    }
    let mut bytes = Vec::new();
    for tok in value.split(|c: char| c == ':' || c.is_ascii_whitespace()).filter(|t| !t.is_empty()) {
        let b = u8::from_str_radix(tok, 16).map_err(|_| format!("'{value}' is not valid hex"))?;
        bytes.push(b);
    }
    if bytes.is_empty() {
        return Err(format!("'{value}' is not iac-ga or hex bytes"));
    }
    Ok(PromptTerminator::Custom(bytes))
}

// ── Path helpers ──────────────────────────────────────────────────────────

/// Search for the user config file in the standard locations.
pub fn find_user_config() -> Option<PathBuf> {
    let dir = default_user_config_dir();
    [dir.join("mumeproxy.conf"), PathBuf::from("./mumeproxy.conf")]
        .into_iter()
        .find(|p| p.exists())
}

/// The OS-appropriate user config directory, via `directories::ProjectDirs`.
pub fn default_user_config_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "mume", "mumeproxy")
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

// ── Tests ─────────────────────────────────────────────────────────────────
