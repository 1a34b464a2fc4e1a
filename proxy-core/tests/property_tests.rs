use proptest::prelude::*;

use mumeproxy::config::Config;
use mumeproxy::mpi::MpiScanner;
use mumeproxy::net::Protocol;
use mumeproxy::pathfind::{create_speedwalk, render_speedwalk, PathStep, SpeedwalkCommand};
use mumeproxy::xml::{OutputFormat, XmlTokenizer};

const DIRS: [&str; 6] = ["north", "east", "south", "west", "up", "down"];

proptest! {
    /// The MPI scanner must never panic on arbitrary bytes, however the
    /// `~$#E` marker and length digits are mangled.
    #[test]
    fn mpi_scanner_never_panics_on_arbitrary_bytes(chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..8)) {
        let mut scanner = MpiScanner::new();
        for chunk in &chunks {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| scanner.feed(chunk)));
        }
    }
}

proptest! {
    /// Passthrough bytes plus extracted request payload lengths can never
    /// exceed what was fed in (the scanner never invents bytes).
    #[test]
    fn mpi_scanner_never_grows_total_bytes(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut scanner = MpiScanner::new();
        let (pass, requests) = scanner.feed(&data);
        let request_bytes: usize = requests
            .iter()
            .map(|r| match r {
                mumeproxy::mpi::MpiRequest::View { data } => data.len(),
                mumeproxy::mpi::MpiRequest::Edit { session, description, body } => {
                    session.len() + description.len() + body.len()
                }
            })
            .sum();
        // Framing bytes (marker, command byte, length digits, separators)
        // are consumed and discarded, never duplicated into the output.
        prop_assert!(pass.len() + request_bytes <= data.len());
    }
}

proptest! {
    /// The XML tokenizer must never panic on arbitrary (possibly
    /// malformed) text, regardless of output format.
    #[test]
    fn xml_tokenizer_never_panics_on_arbitrary_text(s in "\\PC{0,200}") {
        for format in [OutputFormat::Raw, OutputFormat::Normal, OutputFormat::Tintin] {
            let mut tok = XmlTokenizer::new(format);
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| tok.feed(&s)));
        }
    }
}

proptest! {
    /// The telnet protocol state machine must never panic on arbitrary
    /// bytes, including truncated IAC sequences and bogus option bytes.
    #[test]
    fn telnet_protocol_never_panics_on_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut proto = Protocol::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| proto.process(&data)));
    }
}

proptest! {
    /// The config parser is line-oriented and must tolerate arbitrary
    /// garbage lines without panicking, always returning some config.
    #[test]
    fn config_load_str_never_panics_on_arbitrary_text(s in "\\PC{0,500}") {
        let _ = std::panic::catch_unwind(|| Config::load_str(&s));
    }
}

proptest! {
    /// Collapsing an arbitrary direction sequence into speedwalk commands
    /// and rendering it never drops or duplicates a step: every `Run`'s
    /// count and every `LeadThenRide` contributes exactly one original
    /// step, and the rendered string is never empty for a non-empty path.
    #[test]
    fn speedwalk_preserves_step_count(dir_indices in proptest::collection::vec(0usize..6, 1..40)) {
        let steps: Vec<PathStep> = dir_indices
            .iter()
            .enumerate()
            .map(|(i, &idx)| PathStep {
                direction: DIRS[idx].to_string(),
                to: i.to_string(),
                lead: false,
            })
            .collect();

        let commands = create_speedwalk(&steps);
        let total: u32 = commands
            .iter()
            .map(|c| match c {
                SpeedwalkCommand::Run { count, .. } => *count,
                SpeedwalkCommand::LeadThenRide { .. } => 1,
            })
            .sum();
        prop_assert_eq!(total as usize, steps.len());

        let rendered = render_speedwalk(&commands);
        prop_assert!(!rendered.is_empty());
    }
}
