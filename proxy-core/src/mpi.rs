//! MPI (Mume Protocol Interface) — the in-band remote editing/viewing
//! envelope.
//!
//! Grounded on `original_source/mapperproxy/mapper/mpi.py` (the canonical
//! revision): the envelope is `~$#E` + one command byte (`E`/`V`) + an
//! ASCII decimal length + `\n` + exactly that many payload bytes.
//!
//! [`MpiScanner`] detects the envelope inside the already telnet-filtered
//! text stream, anchored on newlines, and extracts complete
//! envelopes; the editing/viewing session lifecycle itself
//! ([`EditSession`]) is a separate, synchronous piece of logic so it can be
//! driven by tests without spawning a real editor.

use crate::telnet::escape_iac;
use std::time::SystemTime;

/// Marks the start of an MPI envelope: `~$#E`.
const MARKER: &[u8] = b"~$#E";

/// A fully decoded MPI request extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MpiRequest {
    /// `V` — view request: raw payload to display in a pager.
    View { data: Vec<u8> },
    /// `E` — edit request: session id, description, and editable body.
    Edit {
        session: String,
        description: String,
        body: String,
    },
}

/// Errors recognized while scanning for an MPI envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MpiError {
    #[error("unknown MPI command byte {0:?}")]
    UnknownCommand(u8),
    #[error("non-numeric MPI length")]
    InvalidLength,
    #[error("malformed edit payload: expected <session>\\n<description>\\n<body>")]
    MalformedEditPayload,
}

/// Incrementally scans a byte stream for `~$#E` envelopes that begin at
/// the start of a line (i.e. immediately follow a `\n`, or are the first
/// bytes of the stream).
///
/// On a malformed envelope (bad command byte or non-numeric length) the
/// scanner reinjects the consumed bytes into the passthrough output and
/// resumes normal scanning.
#[derive(Debug, Default)]
pub struct MpiScanner {
    buf: Vec<u8>,
    at_line_start: bool,
}

impl MpiScanner {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            at_line_start: true,
        }
    }

    /// Feed a chunk of already telnet-filtered text. Returns the bytes
    /// that should continue to the XML tokenizer (i.e. the passthrough
    /// stream with any complete MPI envelopes removed) and any fully
    /// decoded [`MpiRequest`]s.
    pub fn feed(&mut self, chunk: &[u8]) -> (Vec<u8>, Vec<MpiRequest>) {
        self.buf.extend_from_slice(chunk);
        let mut pass = Vec::new();
        let mut requests = Vec::new();

        loop {
            let marker_at = self.find_marker();
            match marker_at {
                None => {
                    // No marker (yet). Everything that can't possibly be
                    // the start of one is safe to flush; keep a small
                    // tail in case a marker spans the chunk boundary.
                    let safe_len = self.buf.len().saturating_sub(MARKER.len() - 1);
                    pass.extend_from_slice(&self.buf[..safe_len]);
                    self.update_line_start(&self.buf[..safe_len].to_vec());
                    self.buf.drain(..safe_len);
                    break;
                }
                Some(start) => {
                    pass.extend_from_slice(&self.buf[..start]);
                    self.update_line_start(&self.buf[..start].to_vec());
                    self.buf.drain(..start);
                    match self.try_parse_envelope() {
                        Some(Ok(req)) => {
                            requests.push(req);
                            self.at_line_start = true;
                        }
                        Some(Err(_)) => {
                            // Malformed — reinject the marker bytes
                            // themselves and keep scanning after them.
                            pass.extend_from_slice(MARKER);
                            self.buf.drain(..MARKER.len());
                            self.at_line_start = false;
                        }
                        None => {
                            // Incomplete — wait for more bytes.
                            break;
                        }
                    }
                }
            }
        }
        (pass, requests)
    }

    fn update_line_start(&mut self, consumed: &[u8]) {
        if let Some(&last) = consumed.last() {
            self.at_line_start = last == b'\n';
        }
        // If nothing was consumed, `at_line_start` keeps its prior value.
    }

    fn find_marker(&self) -> Option<usize> {
        let mut search_from = 0;
        while let Some(rel) = self.buf[search_from..]
            .windows(MARKER.len())
            .position(|w| w == MARKER)
        {
            let idx = search_from + rel;
            let preceded_by_newline = idx == 0 && self.at_line_start
                || (idx > 0 && self.buf[idx - 1] == b'\n');
            if preceded_by_newline {
                return Some(idx);
            }
            search_from = idx + 1;
            if search_from >= self.buf.len() {
                return None;
            }
        }
        None
    }

    /// Attempt to parse a full envelope starting at `self.buf[0..]`
    /// (which begins with `MARKER`). Returns `None` if more bytes are
    /// needed, `Some(Err)` on a malformed header, `Some(Ok)` on success
    /// (consuming the envelope from `self.buf`).
    fn try_parse_envelope(&mut self) -> Option<Result<MpiRequest, MpiError>> {
        if self.buf.len() < MARKER.len() + 1 {
            return None;
        }
        let command = self.buf[MARKER.len()];
        if command != b'E' && command != b'V' {
            return Some(Err(MpiError::UnknownCommand(command)));
        }
        // Find the header-terminating '\n' after the length digits.
        let header_start = MARKER.len() + 1;
        let nl_pos = self.buf[header_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| header_start + p);
        let nl_pos = match nl_pos {
            Some(p) => p,
            None if self.buf.len() - header_start > 20 => {
                // Far too long to be a decimal length; malformed.
                return Some(Err(MpiError::InvalidLength));
            }
            None => return None,
        };
        let len_str = match std::str::from_utf8(&self.buf[header_start..nl_pos]) {
            Ok(s) => s,
            Err(_) => return Some(Err(MpiError::InvalidLength)),
        };
        let len: usize = match len_str.parse() {
            Ok(n) => n,
            Err(_) => return Some(Err(MpiError::InvalidLength)),
        };
        let payload_start = nl_pos + 1;
        let payload_end = payload_start + len;
        if self.buf.len() < payload_end {
            return None; // wait for the rest of the payload
        }
        let payload = self.buf[payload_start..payload_end].to_vec();
        self.buf.drain(..payload_end);

        let result = match command {
            b'V' => Ok(MpiRequest::View { data: payload }),
            b'E' => parse_edit_payload(&payload).map_err(|_| MpiError::MalformedEditPayload),
            _ => unreachable!(),
        };
        Some(result)
    }
}

fn parse_edit_payload(payload: &[u8]) -> Result<MpiRequest, ()> {
    let text = String::from_utf8_lossy(payload);
    let mut parts = text.splitn(3, '\n');
    let session = parts.next().ok_or(())?.to_string();
    let description = parts.next().ok_or(())?.to_string();
    let body = parts.next().ok_or(())?.to_string();
    Ok(MpiRequest::Edit {
        session,
        description,
        body,
    })
}

/// Build the server-bound response envelope `~$#EE<len>\n<response>`.
pub fn build_response_envelope(response: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(response.len() + 16);
    out.extend_from_slice(b"~$#EE");
    out.extend_from_slice(response.len().to_string().as_bytes());
    out.push(b'\n');
    out.extend_from_slice(response);
    out
}

/// Apply the byte transform an edit response body needs before it's
/// wrapped in an envelope: strip `\r`, double
/// any embedded `IAC`, strip trailing whitespace, append exactly one
/// `\n`.
fn finalize_response(mut raw: Vec<u8>) -> Vec<u8> {
    raw.retain(|&b| b != b'\r');
    let mut out = escape_iac(&raw);
    while matches!(out.last(), Some(b) if b.is_ascii_whitespace()) {
        out.pop();
    }
    out.push(b'\n');
    out
}

/// Strip the leading `M` MUME prefixes every session id with — the wire
/// response carries the bare numeric id, not the `M`-prefixed form used
/// internally to identify the session.
fn strip_leading_m(session: &str) -> &str {
    session.strip_prefix('M').unwrap_or(session)
}

/// The outcome of a completed edit session, before envelope wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// The file's mtime was unchanged — the user closed without saving.
    Cancelled { session: String },
    /// The file was modified; carries its final contents.
    Saved { session: String, contents: Vec<u8> },
}

impl EditOutcome {
    /// Render the full server-bound response body (`C<session>` or
    /// `E<session>\n<contents>`), before the transform in
    /// [`finalize_response`].
    fn raw_response(&self) -> Vec<u8> {
        match self {
            EditOutcome::Cancelled { session } => {
                let mut out = vec![b'C'];
                out.extend_from_slice(strip_leading_m(session).as_bytes());
                out
            }
            EditOutcome::Saved { session, contents } => {
                let mut out = vec![b'E'];
                out.extend_from_slice(strip_leading_m(session).as_bytes());
                out.push(b'\n');
                out.extend_from_slice(contents);
                out
            }
        }
    }

    /// Build the complete `~$#EE<len>\n<response>` envelope ready to send
    /// to the server.
    pub fn into_envelope(self) -> Vec<u8> {
        let finalized = finalize_response(self.raw_response());
        build_response_envelope(&finalized)
    }
}

/// Tracks one outstanding edit session's temp file lifecycle: write body,
/// snapshot mtime, and — once the editor process exits — compare mtimes
/// to decide cancel vs. save.
///
/// The actual subprocess spawn/wait is an external collaborator; this
/// type only owns the part that is core-testable: the temp file and the
/// mtime comparison.
pub struct EditSession {
    session: String,
    path: std::path::PathBuf,
    last_modified: SystemTime,
    _file: tempfile::NamedTempFile,
}

impl EditSession {
    /// Create the temp file for `body`, snapshotting its mtime. CRLF
    /// translation matches the original (`body.replace("\n", "\r\n")`).
    pub fn create(session: String, body: &str) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("mume_editing_")
            .suffix(".txt")
            .tempfile()?;
        use std::io::Write;
        file.write_all(body.replace('\n', "\r\n").as_bytes())?;
        file.flush()?;
        let last_modified = file.path().metadata()?.modified()?;
        Ok(Self {
            session,
            path: file.path().to_path_buf(),
            last_modified,
            _file: file,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Call after the editor process has exited to determine the
    /// outcome. Reads the file's current contents if it was modified.
    pub fn finish(self) -> std::io::Result<EditOutcome> {
        let current_mtime = self.path.metadata()?.modified()?;
        if current_mtime == self.last_modified {
            Ok(EditOutcome::Cancelled {
                session: self.session,
            })
        } else {
            let contents = std::fs::read(&self.path)?;
            Ok(EditOutcome::Saved {
                session: self.session,
                contents,
            })
        }
    }
}

/// Create the temp file for a view session. Returns the path; the pager
/// subprocess itself is an external collaborator.
pub fn create_view_file(data: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("mume_viewing_")
        .suffix(".txt")
        .tempfile()?;
    use std::io::Write;
    file.write_all(data.replace('\n', "\r\n").as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Resolve the editor command from `TINTINEDITOR`, matching the
/// original's defaults (`nano -w` on Unix, `notepad` on Windows).
pub fn editor_command() -> String {
    if cfg!(windows) {
        "notepad".to_string()
    } else {
        std::env::var("TINTINEDITOR").unwrap_or_else(|_| "nano -w".to_string())
    }
}

/// Resolve the pager command from `TINTINPAGER`.
pub fn pager_command() -> String {
    if cfg!(windows) {
        "notepad".to_string()
    } else {
        std::env::var("TINTINPAGER").unwrap_or_else(|_| "less".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_view_envelope_after_newline() {
        let mut scanner = MpiScanner::new();
        let (pass, reqs) = scanner.feed(b"\n~$#EV5\nhello");
        assert_eq!(pass, b"\n".to_vec());
        assert_eq!(reqs, vec![MpiRequest::View { data: b"hello".to_vec() }]);
    }

    #[test]
    fn requires_newline_before_marker_mid_stream() {
        // Marker not preceded by a newline (and not at buffer start with
        // at_line_start false) is left in the passthrough stream.
        let mut scanner = MpiScanner::new();
        scanner.at_line_start = false;
        let (pass, reqs) = scanner.feed(b"foo~$#EV5\nhello");
        assert!(reqs.is_empty());
        assert_eq!(pass, b"foo~$#EV5\nhello".to_vec());
    }

    #[test]
    fn marker_at_very_start_of_stream_is_recognized() {
        let mut scanner = MpiScanner::new();
        let (pass, reqs) = scanner.feed(b"~$#EV5\nhello");
        assert!(pass.is_empty());
        assert_eq!(reqs, vec![MpiRequest::View { data: b"hello".to_vec() }]);
    }

    #[test]
    fn edit_envelope_splits_session_description_body() {
        let mut scanner = MpiScanner::new();
        let envelope = b"\n~$#E12\nM1234\ndesc\nbody";
        let (_, reqs) = scanner.feed(envelope);
        assert_eq!(
            reqs,
            vec![MpiRequest::Edit {
                session: "M1234".to_string(),
                description: "desc".to_string(),
                body: "body".to_string(),
            }]
        );
    }

    #[test]
    fn incomplete_payload_waits_for_more_bytes() {
        let mut scanner = MpiScanner::new();
        let (pass, reqs) = scanner.feed(b"\n~$#EV10\nhel");
        assert!(pass.is_empty());
        assert!(reqs.is_empty());
        let (pass2, reqs2) = scanner.feed(b"lo_world!!");
        assert!(pass2.is_empty());
        assert_eq!(
            reqs2,
            vec![MpiRequest::View {
                data: b"hello_world!!".to_vec()
            }]
        );
    }

    #[test]
    fn unknown_command_reinjects_marker() {
        let mut scanner = MpiScanner::new();
        let (pass, reqs) = scanner.feed(b"\n~$#EZ5\nhello");
        assert!(reqs.is_empty());
        assert!(pass.ends_with(MARKER));
    }

    #[test]
    fn non_numeric_length_reinjects_marker() {
        let mut scanner = MpiScanner::new();
        let (pass, reqs) = scanner.feed(b"\n~$#EEabc\nhello");
        assert!(reqs.is_empty());
        assert!(pass.ends_with(MARKER));
    }

    // ── Testable property #9: MPI edit round-trip ──────────────────────

    #[test]
    fn cancelled_edit_produces_c_response() {
        let outcome = EditOutcome::Cancelled {
            session: "M1234".to_string(),
        };
        // The leading `M` is stripped from the session id on the wire.
        assert_eq!(outcome.into_envelope(), b"~$#EE6\nC1234\n".to_vec());
    }

    #[test]
    fn saved_edit_doubles_iac_and_strips_cr() {
        let outcome = EditOutcome::Saved {
            session: "M1234".to_string(),
            contents: vec![b'h', b'i', b'\r', crate::telnet::IAC, b'\n'],
        };
        let envelope = outcome.into_envelope();
        // body: "E1234\nhi" + doubled IAC, CR stripped, trailing ws
        // stripped then a single \n appended.
        let mut expected_body = b"E1234\nhi".to_vec();
        expected_body.push(crate::telnet::IAC);
        expected_body.push(crate::telnet::IAC);
        expected_body.push(b'\n');
        assert_eq!(
            envelope,
            build_response_envelope(&expected_body)
        );
    }

    #[test]
    fn edit_session_roundtrip_unmodified_is_cancel() {
        let session = EditSession::create("M42".to_string(), "hello").unwrap();
        let outcome = session.finish().unwrap();
        assert_eq!(
            outcome,
            EditOutcome::Cancelled {
                session: "M42".to_string()
            }
        );
    }

    #[test]
    fn edit_session_roundtrip_modified_is_save() {
        let session = EditSession::create("M42".to_string(), "hello").unwrap();
        let path = session.path().to_path_buf();
        // Simulate the editor saving new contents after a delay long
        // enough to guarantee the mtime advances even on filesystems with
        // coarse (e.g. 1s) timestamp resolution.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        std::fs::write(&path, "edited\r\n").unwrap();
        let outcome = session.finish().unwrap();
        match outcome {
            EditOutcome::Saved { session, contents } => {
                assert_eq!(session, "M42");
                assert_eq!(contents, b"edited\r\n".to_vec());
            }
            other => panic!("expected Saved, got {other:?}"),
        }
    }
}
