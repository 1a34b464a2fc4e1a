//! Telnet byte-stream parsing and RFC 1143 "Q Method" option negotiation.
//!
//! [`TelnetParser`] is a pure byte-stream FSM: call [`TelnetParser::feed`]
//! with raw bytes from the server to get back a list of [`TelnetEvent`]s.
//! It holds no I/O handles and performs no negotiation decisions of its
//! own — those live in [`NegotiationState`], which implements the full
//! six-state Q Method for every option rather than a simple boolean
//! tracker, so that overlapping negotiation requests (we ask to enable an
//! option while the peer is mid-negotiation on the same option) resolve
//! correctly instead of racing.

use std::collections::HashMap;

// ── Telnet byte constants ──────────────────────────────────────────────────

/// Interpret As Command — starts every Telnet command sequence.
pub const IAC: u8 = 255;
/// Subnegotiation Begin.
pub const SB: u8 = 250;
/// Subnegotiation End.
pub const SE: u8 = 240;
/// Go Ahead — signals end-of-turn / prompt boundary.
pub const GA: u8 = 249;
/// End of Record — alternative prompt boundary used by some servers.
pub const EOR: u8 = 239;
/// WILL — sender will enable the option.
pub const WILL: u8 = 251;
/// WONT — sender will not enable the option.
pub const WONT: u8 = 252;
/// DO — sender requests the receiver to enable the option.
pub const DO: u8 = 253;
/// DONT — sender requests the receiver to disable the option.
pub const DONT: u8 = 254;

/// Well-known Telnet option numbers.
pub mod opt {
    pub const BINARY: u8 = 0;
    pub const ECHO: u8 = 1;
    pub const SGA: u8 = 3;
    pub const TTYPE: u8 = 24;
    pub const NAWS: u8 = 31;
    pub const CHARSET: u8 = 42;
    pub const COMPRESS: u8 = 85; // MCCP v1
    pub const COMPRESS2: u8 = 86; // MCCP v2
    pub const ATCP: u8 = 200;
    pub const GMCP: u8 = 201;
}

/// Charset subnegotiation command bytes (RFC 2066).
pub mod charset_sub {
    pub const REQUEST: u8 = 1;
    pub const ACCEPTED: u8 = 2;
    pub const REJECTED: u8 = 3;
}

// ── TelnetEvent ───────────────────────────────────────────────────────────

/// A decoded event produced by [`TelnetParser::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// Raw data bytes (non-IAC content).
    Data(Vec<u8>),
    /// Peer sent `IAC WILL <opt>`.
    Will(u8),
    /// Peer sent `IAC WONT <opt>`.
    Wont(u8),
    /// Peer sent `IAC DO <opt>`.
    Do(u8),
    /// Peer sent `IAC DONT <opt>`.
    Dont(u8),
    /// Peer sent `IAC SB <opt> <data> IAC SE`.
    Subneg(u8, Vec<u8>),
    /// Peer sent `IAC GA` (go-ahead / prompt marker).
    GoAhead,
    /// Peer sent `IAC EOR` (end-of-record / prompt marker).
    Eor,
}

// ── Parser FSM ────────────────────────────────────────────────────────────

#[derive(Debug)]
enum State {
    Normal,
    Iac,
    /// After WILL/WONT/DO/DONT — holds the command byte, awaits option.
    Cmd(u8),
    /// After `IAC SB` — awaits the option byte.
    Sb,
    /// Collecting subnegotiation payload.
    SbData,
    /// Saw `IAC` inside subnegotiation payload.
    SbIac,
}

/// Byte-stream Telnet protocol parser.
///
/// Feed raw bytes into [`Self::feed`]; receive decoded [`TelnetEvent`]s in
/// return. `0x00` and `0x11` bytes outside of any Telnet sequence are
/// dropped (per the proxy's filtering contract), matching historical
/// telnet clients that treat NUL and DC1 as line-noise.
#[derive(Debug)]
pub struct TelnetParser {
    state: State,
    data_buf: Vec<u8>,
    sb_buf: Vec<u8>,
    sb_opt: u8,
}

impl Default for TelnetParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetParser {
    pub fn new() -> Self {
        Self {
            state: State::Normal,
            data_buf: Vec::new(),
            sb_buf: Vec::new(),
            sb_opt: 0,
        }
    }

    /// Feed a slice of raw bytes; returns all events decoded from them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<TelnetEvent> {
        let mut events = Vec::new();
        for &b in bytes {
            self.step(b, &mut events);
        }
        self.flush_data(&mut events);
        events
    }

    fn flush_data(&mut self, events: &mut Vec<TelnetEvent>) {
        if !self.data_buf.is_empty() {
            events.push(TelnetEvent::Data(std::mem::take(&mut self.data_buf)));
        }
    }

    fn step(&mut self, b: u8, events: &mut Vec<TelnetEvent>) {
        match self.state {
            State::Normal => {
                if b == IAC {
                    self.flush_data(events);
                    self.state = State::Iac;
                } else if b == 0x00 || b == 0x11 {
                    // Dropped per the filter's contract.
                } else {
                    self.data_buf.push(b);
                }
            }
            State::Iac => match b {
                IAC => {
                    // IAC IAC — escaped literal 0xFF in the data stream.
                    self.data_buf.push(0xFF);
                    self.state = State::Normal;
                }
                WILL | WONT | DO | DONT => {
                    self.state = State::Cmd(b);
                }
                SB => {
                    self.state = State::Sb;
                }
                GA => {
                    events.push(TelnetEvent::GoAhead);
                    self.state = State::Normal;
                }
                EOR => {
                    events.push(TelnetEvent::Eor);
                    self.state = State::Normal;
                }
                _ => {
                    // NOP (241) or other single-byte commands — ignore.
                    self.state = State::Normal;
                }
            },
            State::Cmd(cmd) => {
                let event = match cmd {
                    WILL => TelnetEvent::Will(b),
                    WONT => TelnetEvent::Wont(b),
                    DO => TelnetEvent::Do(b),
                    DONT => TelnetEvent::Dont(b),
                    _ => unreachable!("only WILL/WONT/DO/DONT reach Cmd state"),
                };
                events.push(event);
                self.state = State::Normal;
            }
            State::Sb => {
                self.sb_opt = b;
                self.sb_buf.clear();
                self.state = State::SbData;
            }
            State::SbData => {
                if b == IAC {
                    self.state = State::SbIac;
                } else {
                    self.sb_buf.push(b);
                }
            }
            State::SbIac => match b {
                SE => {
                    let data = std::mem::take(&mut self.sb_buf);
                    events.push(TelnetEvent::Subneg(self.sb_opt, data));
                    self.state = State::Normal;
                }
                IAC => {
                    // IAC IAC inside SB — literal 0xFF in subneg payload.
                    self.sb_buf.push(0xFF);
                    self.state = State::SbData;
                }
                _ => {
                    // Malformed subnegotiation (no SE) — the filter keeps
                    // buffering until connection close; here that means
                    // staying in SbData and treating this
                    // byte as a literal payload byte, since `IAC <other>`
                    // inside a subneg has no other defined meaning.
                    self.sb_buf.push(b);
                    self.state = State::SbData;
                }
            },
        }
    }
}

// ── RFC 1143 Q Method negotiation ─────────────────────────────────────────

/// One option's negotiation state, RFC 1143 style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Q {
    No,
    Yes,
    ExpectNo,
    ExpectYes,
    ExpectNoOpposite,
    ExpectYesOpposite,
}

impl Default for Q {
    fn default() -> Self {
        Q::No
    }
}

/// Which side of the connection an option applies to.
///
/// `Remote` tracks whether the *peer* has the option enabled (driven by
/// WILL/WONT); `Local` tracks whether *we* do (driven by DO/DONT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Remote,
    Local,
}

#[derive(Debug, Default, Clone, Copy)]
struct OptionState {
    remote: Q,
    local: Q,
}

impl OptionState {
    fn get(&self, side: Side) -> Q {
        match side {
            Side::Remote => self.remote,
            Side::Local => self.local,
        }
    }

    fn set(&mut self, side: Side, q: Q) {
        match side {
            Side::Remote => self.remote = q,
            Side::Local => self.local = q,
        }
    }
}

/// Outcome of a charset subnegotiation response from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharsetOutcome {
    Accepted(Vec<u8>),
    Rejected,
    Unknown(Vec<u8>),
}

/// Tracks Telnet option negotiation state using the full RFC 1143 Q Method
/// for every option, plus RFC 2066 charset sub-negotiation bookkeeping.
///
/// Unlike a simple "are we/are they active" boolean pair, this correctly
/// resolves the case where we proactively request an option change while a
/// change from the peer for the same option is already in flight.
#[derive(Debug)]
pub struct NegotiationState {
    options: HashMap<u8, OptionState>,
    charset_separator: u8,
    charset_name: Vec<u8>,
}

impl Default for NegotiationState {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationState {
    pub fn new() -> Self {
        Self {
            options: HashMap::new(),
            charset_separator: b';',
            charset_name: b"US-ASCII".to_vec(),
        }
    }

    /// Resolve a charset alias (as accepted by the `charset` user command)
    /// to the wire name MUME expects. Matches
    /// `original_source/mapper/protocols/telnet.py`'s alias table.
    pub fn resolve_charset_alias(name: &str) -> Option<&'static [u8]> {
        match name.to_ascii_lowercase().as_str() {
            "us-ascii" | "ascii" => Some(b"US-ASCII"),
            "latin-1" | "iso-8859-1" => Some(b"ISO-8859-1"),
            "utf-8" | "utf8" => Some(b"UTF-8"),
            _ => None,
        }
    }

    /// Set the charset we'll request once CHARSET negotiation completes,
    /// and kick off negotiation by requesting that we (locally) enable it.
    pub fn request_charset(&mut self, name: &str) -> Vec<u8> {
        if let Some(wire) = Self::resolve_charset_alias(name) {
            self.charset_name = wire.to_vec();
        }
        self.enable_option(opt::CHARSET, Side::Local)
    }

    fn option_mut(&mut self, opt: u8) -> &mut OptionState {
        self.options.entry(opt).or_default()
    }

    fn option_state(&self, opt: u8) -> OptionState {
        self.options.get(&opt).copied().unwrap_or_default()
    }

    /// Handle an incoming WILL/WONT/DO/DONT for `opt`.
    ///
    /// `accept` is true for WILL/DO (the peer is asking to turn the option
    /// *on*), false for WONT/DONT. `side` is `Remote` for WILL/WONT,
    /// `Local` for DO/DONT. Returns bytes to write back, if any.
    pub fn handle_option(&mut self, opt: u8, accept: bool, side: Side) -> Vec<u8> {
        let (tx_accept, tx_deny) = match side {
            Side::Remote => (DO, DONT),
            Side::Local => (WILL, WONT),
        };
        let cur = self.option_state(opt).get(side);
        let mut out = Vec::new();
        if accept {
            match cur {
                Q::No => {
                    self.option_mut(opt).set(side, Q::Yes);
                    out = vec![IAC, tx_accept, opt];
                }
                Q::ExpectNo => {
                    self.option_mut(opt).set(side, Q::No);
                }
                Q::ExpectNoOpposite => {
                    self.option_mut(opt).set(side, Q::Yes);
                }
                Q::ExpectYesOpposite => {
                    self.option_mut(opt).set(side, Q::ExpectNo);
                    out = vec![IAC, tx_deny, opt];
                }
                Q::Yes | Q::ExpectYes => {
                    self.option_mut(opt).set(side, Q::Yes);
                    if opt == opt::CHARSET {
                        out = self.build_charset_request();
                    }
                }
            }
        } else {
            match cur {
                Q::Yes => {
                    self.option_mut(opt).set(side, Q::No);
                    out = vec![IAC, tx_deny, opt];
                }
                Q::ExpectNoOpposite => {
                    self.option_mut(opt).set(side, Q::ExpectYes);
                    out = vec![IAC, tx_accept, opt];
                }
                _ => {
                    self.option_mut(opt).set(side, Q::No);
                }
            }
        }
        out
    }

    fn build_charset_request(&self) -> Vec<u8> {
        let mut data = vec![charset_sub::REQUEST, self.charset_separator];
        data.extend_from_slice(&self.charset_name);
        build_subneg(opt::CHARSET, &data)
    }

    /// Proactively request that `side` be enabled for `opt` (e.g. sending
    /// `WILL CHARSET`). Returns bytes to write, if the request should be
    /// sent now.
    pub fn enable_option(&mut self, opt: u8, side: Side) -> Vec<u8> {
        let tx_accept = match side {
            Side::Remote => DO,
            Side::Local => WILL,
        };
        let cur = self.option_state(opt).get(side);
        match cur {
            Q::No => {
                self.option_mut(opt).set(side, Q::ExpectYes);
                vec![IAC, tx_accept, opt]
            }
            Q::ExpectNo => {
                self.option_mut(opt).set(side, Q::ExpectNoOpposite);
                vec![]
            }
            Q::ExpectYesOpposite => {
                self.option_mut(opt).set(side, Q::ExpectYes);
                vec![]
            }
            _ => vec![],
        }
    }

    /// Proactively request that `side` be disabled for `opt`.
    pub fn disable_option(&mut self, opt: u8, side: Side) -> Vec<u8> {
        let tx_deny = match side {
            Side::Remote => DONT,
            Side::Local => WONT,
        };
        let cur = self.option_state(opt).get(side);
        match cur {
            Q::Yes => {
                self.option_mut(opt).set(side, Q::ExpectNo);
                vec![IAC, tx_deny, opt]
            }
            Q::ExpectYes => {
                self.option_mut(opt).set(side, Q::ExpectYesOpposite);
                vec![]
            }
            Q::ExpectNoOpposite => {
                self.option_mut(opt).set(side, Q::ExpectNo);
                vec![]
            }
            _ => vec![],
        }
    }

    pub fn is_enabled(&self, opt: u8, side: Side) -> bool {
        self.option_state(opt).get(side) == Q::Yes
    }

    /// Interpret an `IAC SB CHARSET <status> <response> IAC SE` subneg
    /// payload (the `data` already stripped of the leading CHARSET option
    /// byte). ACCEPTED/REJECTED are logged, not forwarded to the client.
    pub fn handle_charset_subneg(&self, data: &[u8]) -> CharsetOutcome {
        match data.first() {
            Some(&s) if s == charset_sub::ACCEPTED => {
                CharsetOutcome::Accepted(data[1..].to_vec())
            }
            Some(&s) if s == charset_sub::REJECTED => CharsetOutcome::Rejected,
            _ => CharsetOutcome::Unknown(data.to_vec()),
        }
    }
}

// ── Subnegotiation builders ───────────────────────────────────────────────

/// Build an `IAC SB <opt> <data> IAC SE` subnegotiation payload.
///
/// Any `0xFF` bytes in `data` are escaped as `IAC IAC`.
pub fn build_subneg(opt: u8, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + data.len());
    buf.extend_from_slice(&[IAC, SB, opt]);
    for &b in data {
        if b == IAC {
            buf.push(IAC); // escape
        }
        buf.push(b);
    }
    buf.extend_from_slice(&[IAC, SE]);
    buf
}

/// Build a NAWS subnegotiation advertising `width × height`.
pub fn build_naws(width: u16, height: u16) -> Vec<u8> {
    let data = [
        (width >> 8) as u8,
        width as u8,
        (height >> 8) as u8,
        height as u8,
    ];
    build_subneg(opt::NAWS, &data)
}

/// Build a TTYPE `IS <name>` subnegotiation response.
pub fn build_ttype(name: &str) -> Vec<u8> {
    let mut data = vec![0u8]; // IS = 0
    data.extend_from_slice(name.as_bytes());
    build_subneg(opt::TTYPE, &data)
}

/// Double every embedded `IAC` byte in user-visible text before forwarding
/// it to a Telnet stream, so it can't be mistaken for protocol framing.
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if b == IAC {
            out.push(IAC);
        }
        out.push(b);
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Vec<TelnetEvent> {
        TelnetParser::new().feed(bytes)
    }

    fn all_data(events: Vec<TelnetEvent>) -> Vec<u8> {
        events
            .into_iter()
            .flat_map(|e| match e {
                TelnetEvent::Data(d) => d,
                _ => vec![],
            })
            .collect()
    }

    // ── parser ────────────────────────────────────────────────────────────

    #[test]
    fn plain_data_passthrough() {
        let events = parse(b"hello");
        assert_eq!(events, vec![TelnetEvent::Data(b"hello".to_vec())]);
    }

    #[test]
    fn iac_iac_escapes_ff() {
        let events = parse(&[b'x', IAC, IAC, b'y']);
        assert_eq!(all_data(events), vec![b'x', 0xFF, b'y']);
    }

    #[test]
    fn nul_and_dc1_dropped() {
        let events = parse(&[b'a', 0x00, b'b', 0x11, b'c']);
        assert_eq!(all_data(events), b"abc".to_vec());
    }

    #[test]
    fn will_command() {
        let events = parse(&[IAC, WILL, opt::GMCP]);
        assert_eq!(events, vec![TelnetEvent::Will(opt::GMCP)]);
    }

    #[test]
    fn wont_command() {
        let events = parse(&[IAC, WONT, opt::ECHO]);
        assert_eq!(events, vec![TelnetEvent::Wont(opt::ECHO)]);
    }

    #[test]
    fn do_command() {
        let events = parse(&[IAC, DO, opt::NAWS]);
        assert_eq!(events, vec![TelnetEvent::Do(opt::NAWS)]);
    }

    #[test]
    fn dont_command() {
        let events = parse(&[IAC, DONT, opt::TTYPE]);
        assert_eq!(events, vec![TelnetEvent::Dont(opt::TTYPE)]);
    }

    #[test]
    fn go_ahead() {
        let events = parse(&[b'>', IAC, GA]);
        assert_eq!(
            events,
            vec![TelnetEvent::Data(b">".to_vec()), TelnetEvent::GoAhead]
        );
    }

    #[test]
    fn eor_event() {
        let events = parse(&[IAC, EOR]);
        assert_eq!(events, vec![TelnetEvent::Eor]);
    }

    #[test]
    fn subneg_gmcp() {
        let payload = b"Core.Hello {}";
        let mut bytes = vec![IAC, SB, opt::GMCP];
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&[IAC, SE]);
        let events = parse(&bytes);
        assert_eq!(
            events,
            vec![TelnetEvent::Subneg(opt::GMCP, payload.to_vec())]
        );
    }

    #[test]
    fn subneg_iac_iac_escape() {
        let bytes = [IAC, SB, opt::BINARY, 0x42, IAC, IAC, 0x43, IAC, SE];
        let events = parse(&bytes);
        assert_eq!(
            events,
            vec![TelnetEvent::Subneg(opt::BINARY, vec![0x42, 0xFF, 0x43])]
        );
    }

    #[test]
    fn mixed_data_and_commands() {
        let mut bytes = b"prompt> ".to_vec();
        bytes.extend_from_slice(&[IAC, GA]);
        let events = parse(&bytes);
        assert_eq!(
            events,
            vec![
                TelnetEvent::Data(b"prompt> ".to_vec()),
                TelnetEvent::GoAhead,
            ]
        );
    }

    #[test]
    fn empty_input_produces_no_events() {
        assert!(parse(&[]).is_empty());
    }

    #[test]
    fn full_transparency_for_non_iac_streams() {
        // Testable property #1: for bytes with no IAC, passthrough == input.
        let input = b"The orc swings its axe at you!\r\n";
        assert_eq!(all_data(parse(input)), input.to_vec());
    }

    // ── Q Method negotiation ─────────────────────────────────────────────

    #[test]
    fn peer_will_accepted_sends_do() {
        let mut neg = NegotiationState::new();
        let resp = neg.handle_option(opt::GMCP, true, Side::Remote);
        assert_eq!(resp, vec![IAC, DO, opt::GMCP]);
        assert!(neg.is_enabled(opt::GMCP, Side::Remote));
    }

    #[test]
    fn duplicate_will_after_yes_is_idempotent() {
        let mut neg = NegotiationState::new();
        neg.handle_option(opt::GMCP, true, Side::Remote);
        let resp = neg.handle_option(opt::GMCP, true, Side::Remote);
        assert!(resp.is_empty());
        assert!(neg.is_enabled(opt::GMCP, Side::Remote));
    }

    #[test]
    fn we_request_then_peer_confirms_no_further_response() {
        let mut neg = NegotiationState::new();
        let sent = neg.enable_option(opt::NAWS, Side::Local);
        assert_eq!(sent, vec![IAC, WILL, opt::NAWS]);
        // Peer confirms with DO.
        let resp = neg.handle_option(opt::NAWS, true, Side::Local);
        assert!(resp.is_empty());
        assert!(neg.is_enabled(opt::NAWS, Side::Local));
    }

    #[test]
    fn overlapping_disable_then_enable_resolves_to_expect_no_opposite() {
        let mut neg = NegotiationState::new();
        neg.handle_option(opt::ECHO, true, Side::Remote); // Yes
        let sent = neg.disable_option(opt::ECHO, Side::Remote);
        assert_eq!(sent, vec![IAC, DONT, opt::ECHO]);
        // Before peer responds, we ask to enable again.
        let sent2 = neg.enable_option(opt::ECHO, Side::Remote);
        assert!(sent2.is_empty());
        // Peer's WONT arrives, but since we queued an opposite request we
        // immediately turn around and re-request.
        let resp = neg.handle_option(opt::ECHO, false, Side::Remote);
        assert_eq!(resp, vec![IAC, DO, opt::ECHO]);
    }

    #[test]
    fn charset_request_sent_on_confirmation() {
        let mut neg = NegotiationState::new();
        neg.request_charset("utf-8");
        let resp = neg.handle_option(opt::CHARSET, true, Side::Local);
        assert_eq!(
            resp,
            build_subneg(opt::CHARSET, b"\x01;UTF-8")
        );
    }

    #[test]
    fn charset_subneg_accepted() {
        let neg = NegotiationState::new();
        let outcome = neg.handle_charset_subneg(&[charset_sub::ACCEPTED, b'U', b'T', b'F', b'-', b'8']);
        assert_eq!(outcome, CharsetOutcome::Accepted(b"UTF-8".to_vec()));
    }

    #[test]
    fn charset_subneg_rejected() {
        let neg = NegotiationState::new();
        let outcome = neg.handle_charset_subneg(&[charset_sub::REJECTED]);
        assert_eq!(outcome, CharsetOutcome::Rejected);
    }

    #[test]
    fn resolve_charset_alias_table() {
        assert_eq!(
            NegotiationState::resolve_charset_alias("latin-1"),
            Some(&b"ISO-8859-1"[..])
        );
        assert_eq!(NegotiationState::resolve_charset_alias("bogus"), None);
    }

    // ── builders ──────────────────────────────────────────────────────────

    #[test]
    fn build_naws_correct() {
        let bytes = build_naws(80, 24);
        assert_eq!(bytes, vec![IAC, SB, opt::NAWS, 0, 80, 0, 24, IAC, SE]);
    }

    #[test]
    fn build_ttype_correct() {
        let bytes = build_ttype("ANSI");
        assert_eq!(
            bytes,
            vec![IAC, SB, opt::TTYPE, 0, b'A', b'N', b'S', b'I', IAC, SE]
        );
    }

    #[test]
    fn build_subneg_escapes_iac() {
        let bytes = build_subneg(opt::BINARY, &[0x42, 0xFF, 0x43]);
        assert_eq!(
            bytes,
            vec![IAC, SB, opt::BINARY, 0x42, IAC, 0xFF, 0x43, IAC, SE]
        );
    }

    #[test]
    fn escape_iac_doubles_embedded_bytes() {
        assert_eq!(escape_iac(&[1, IAC, 2]), vec![1, IAC, IAC, 2]);
    }
}
