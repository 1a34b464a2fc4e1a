//! Wires the telnet filter, MPI handler, XML tokenizer, and mapper worker
//! into a running proxy.
//!
//! Three bus-connected tasks run per session — client pump, server pump,
//! mapper worker — instead of a single `tokio::select!`, since the mapper
//! must be the sole map-store mutator.
//! Each in-flight MPI edit/view session gets its own worker task in a
//! `JoinSet`, joined before the server pump returns.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::bus::{self, BusItem, BusReceiver, BusSender};
use crate::config::{Config, PromptTerminator};
use crate::error::ProxyError;
use crate::map::MapStore;
use crate::mapper::MapperWorker;
use crate::mpi::{self, EditSession, MpiRequest, MpiScanner};
use crate::net::{Connection, NetEvent};
use crate::telnet::{opt, DO, GA, IAC, WILL};
use crate::xml::{OutputFormat, XmlTokenizer};

/// The exact byte sequence that triggers the XML/MPI handshake.
const HANDSHAKE_PROBE: [u8; 6] = [IAC, DO, opt::TTYPE, IAC, DO, opt::NAWS];

/// Whether `raw` opens with the server's initial handshake probe
/// (`IAC DO TTYPE IAC DO NAWS`), the trigger for sending the MPI
/// identification/version/persistence-grace envelopes and requesting
/// `US-ASCII` CHARSET.
fn is_handshake_probe(raw: &[u8]) -> bool {
    raw.starts_with(&HANDSHAKE_PROBE)
}

// ── Top-level entry point ──────────────────────────────────────────────────

/// Bind the local listener, load the map store, and serve connections one
/// at a time until Ctrl-C or an unrecoverable accept error.
pub async fn run(config: Config) -> Result<(), ProxyError> {
    let (mut store, warnings) = MapStore::load(
        config.rooms_path.clone(),
        config.rooms_sample_path.clone(),
        config.labels_path.clone(),
        config.labels_sample_path.clone(),
    )?;
    for w in &warnings {
        warn!("map store: {w}");
    }

    let bind_addr = format!("{}:{}", config.interface, config.local_port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(ProxyError::Client)?;
    info!("mumeproxy listening on {bind_addr}");

    let status_path = listening_status_path(&config);
    touch_status_file(&status_path).map_err(ProxyError::Client)?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (client_sock, peer) = accepted.map_err(ProxyError::Client)?;
                info!("client connected: {peer}");
                store = handle_session(client_sock, &config, store).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    if let Err(e) = store.save() {
        error!("failed to save map store on shutdown: {e}");
    }
    let _ = std::fs::remove_file(&status_path);
    Ok(())
}

fn listening_status_path(config: &Config) -> PathBuf {
    config.rooms_path.with_file_name("mumeproxy.listening")
}

fn touch_status_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path)?;
    Ok(())
}

fn empty_store(config: &Config) -> MapStore {
    MapStore {
        rooms: Default::default(),
        labels: Default::default(),
        rooms_path: config.rooms_path.clone(),
        rooms_sample_path: config.rooms_sample_path.clone(),
        labels_path: config.labels_path.clone(),
        labels_sample_path: config.labels_sample_path.clone(),
    }
}

// ── Per-session wiring ──────────────────────────────────────────────────────

/// Run one client session to completion, returning the map store for reuse
/// by the next session: the store outlives any one connection.
async fn handle_session(client_sock: TcpStream, config: &Config, store: MapStore) -> MapStore {
    let connect_result = if config.tls {
        Connection::connect_tls(&config.remote_host, config.remote_port).await
    } else {
        Connection::connect_plain(&config.remote_host, config.remote_port).await
    };

    let server_conn = match connect_result {
        Ok(c) => Arc::new(Mutex::new(c)),
        Err(e) => {
            error!(
                "{}:{}: {}",
                config.remote_host,
                config.remote_port,
                ProxyError::Server(e)
            );
            return store;
        }
    };

    let (client_read, client_write) = client_sock.into_split();
    let client_write = Arc::new(Mutex::new(client_write));
    let (bus_tx, bus_rx) = bus::channel();
    let mapper = MapperWorker::new(store);

    let mut client_handle = tokio::spawn(client_pump(BufReader::new(client_read), bus_tx.clone()));
    let mut server_handle = tokio::spawn(server_pump(
        server_conn.clone(),
        client_write.clone(),
        bus_tx.clone(),
        config.output_format,
        config.prompt_terminator.clone(),
    ));
    let mapper_handle = tokio::spawn(mapper_task(
        bus_rx,
        mapper,
        server_conn.clone(),
        client_write.clone(),
    ));

    // Whichever side closes first, stop the other — a dead client makes the
    // server connection pointless, and vice versa.
    tokio::select! {
        _ = &mut client_handle => server_handle.abort(),
        _ = &mut server_handle => client_handle.abort(),
    }
    let _ = client_handle.await;
    let _ = server_handle.await;
    let _ = bus_tx.send(BusItem::Shutdown);

    match mapper_handle.await {
        Ok(store) => store,
        Err(e) => {
            error!("mapper task ended unexpectedly: {e}");
            empty_store(config)
        }
    }
}

// ── Client-to-server pump ───────────────────────────────────────────────────

/// Reads lines from the client and posts them to the bus. The mapper
/// worker decides, per line, whether to intercept it or forward it to the
/// server unmodified.
async fn client_pump(mut reader: BufReader<OwnedReadHalf>, bus_tx: BusSender) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if bus_tx.send(BusItem::ClientLine(trimmed.to_string())).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("{}", ProxyError::Client(e));
                break;
            }
        }
    }
    let _ = bus_tx.send(BusItem::Shutdown);
}

// ── Server-to-client pump ───────────────────────────────────────────────────

/// Drives the telnet/MPI/XML pipeline over the server stream: writes
/// sanitized/passthrough bytes to the client, detects the initial
/// handshake, spawns MPI workers, and posts decoded `MudEvent`s to the
/// bus.
async fn server_pump(
    server_conn: Arc<Mutex<Connection>>,
    client_write: Arc<Mutex<OwnedWriteHalf>>,
    bus_tx: BusSender,
    output_format: OutputFormat,
    prompt_terminator: PromptTerminator,
) {
    let mut mpi_scanner = MpiScanner::new();
    let mut xml = XmlTokenizer::new(output_format);
    let mut mpi_tasks: JoinSet<()> = JoinSet::new();
    let mut first_read = true;

    loop {
        let read_result = {
            let mut conn = server_conn.lock().await;
            conn.recv_with_raw().await
        };

        let (raw, events, client_bytes) = match read_result {
            Ok(v) => v,
            Err(e) => {
                warn!("server read error: {e}");
                break;
            }
        };

        if first_read {
            first_read = false;
            if is_handshake_probe(&raw) {
                let mut conn = server_conn.lock().await;
                let _ = conn.send_raw(b"~$#EI\n").await;
                let _ = conn.send_raw(b"~$#EX2\n3G\n").await;
                let _ = conn.send_raw(b"~$#EP2\nG\n").await;
                let _ = conn.request_charset("US-ASCII").await;
            }
        }

        if !client_bytes.is_empty() {
            let mut w = client_write.lock().await;
            if w.write_all(&client_bytes).await.is_err() {
                break;
            }
        }

        let mut remote_closed = false;
        for ev in events {
            match ev {
                NetEvent::Closed => remote_closed = true,
                NetEvent::Line(bytes) => {
                    process_server_text(
                        bytes,
                        false,
                        &mut mpi_scanner,
                        &mut xml,
                        &client_write,
                        &bus_tx,
                        &server_conn,
                        &mut mpi_tasks,
                        &prompt_terminator,
                    )
                    .await;
                }
                NetEvent::Prompt(bytes) => {
                    process_server_text(
                        bytes,
                        true,
                        &mut mpi_scanner,
                        &mut xml,
                        &client_write,
                        &bus_tx,
                        &server_conn,
                        &mut mpi_tasks,
                        &prompt_terminator,
                    )
                    .await;
                }
                NetEvent::Gmcp(module, payload) => debug!("ignoring GMCP {module}: {payload}"),
                NetEvent::Atcp(func, value) => debug!("ignoring ATCP {func}: {value}"),
            }
        }

        if remote_closed {
            break;
        }
    }

    let _ = bus_tx.send(BusItem::Shutdown);
    while mpi_tasks.join_next().await.is_some() {}
}

/// Feed one telnet-filtered chunk (a `Line` with its stripped `\n`
/// reappended, or a `Prompt` as-is) through the MPI scanner and XML
/// tokenizer, writing client-visible output and posting `MudEvent`s.
async fn process_server_text(
    mut chunk: Vec<u8>,
    is_prompt: bool,
    mpi_scanner: &mut MpiScanner,
    xml: &mut XmlTokenizer,
    client_write: &Arc<Mutex<OwnedWriteHalf>>,
    bus_tx: &BusSender,
    server_conn: &Arc<Mutex<Connection>>,
    mpi_tasks: &mut JoinSet<()>,
    prompt_terminator: &PromptTerminator,
) {
    if !is_prompt {
        chunk.push(b'\n');
    }

    let (pass, requests) = mpi_scanner.feed(&chunk);
    for req in requests {
        spawn_mpi_worker(req, server_conn.clone(), mpi_tasks);
    }

    if !pass.is_empty() || is_prompt {
        let text = String::from_utf8_lossy(&pass).into_owned();
        let (client_bytes, events) = xml.feed(&text);

        if !client_bytes.is_empty() {
            let mut w = client_write.lock().await;
            if let Err(e) = w.write_all(&client_bytes).await {
                warn!("client write error: {e}");
            }
        }

        for event in events {
            let _ = bus_tx.send(BusItem::MudEvent(event));
        }
    }

    if is_prompt {
        let terminator: &[u8] = match prompt_terminator {
            PromptTerminator::IacGa => &[IAC, GA],
            PromptTerminator::Custom(bytes) => bytes,
        };
        let mut w = client_write.lock().await;
        if let Err(e) = w.write_all(terminator).await {
            warn!("client write error: {e}");
        }
    }
}

// ── MPI workers ──────────────────────────────────────────────────────────

/// Spawn the worker for one decoded MPI request: runs the
/// external editor/pager as an opaque subprocess, then — for edits — sends
/// the response envelope back to the server.
fn spawn_mpi_worker(request: MpiRequest, server_conn: Arc<Mutex<Connection>>, tasks: &mut JoinSet<()>) {
    match request {
        MpiRequest::View { data } => {
            tasks.spawn(async move {
                let text = String::from_utf8_lossy(&data).into_owned();
                match mpi::create_view_file(&text) {
                    Ok(file) => {
                        let path = file.path().to_path_buf();
                        if let Err(e) = run_external_command(&mpi::pager_command(), &path).await {
                            warn!("pager subprocess failed: {e}");
                        }
                        // `file` drops here, removing the temp file.
                    }
                    Err(e) => warn!("failed to create view temp file: {e}"),
                }
            });
        }
        MpiRequest::Edit {
            session,
            description,
            body,
        } => {
            tasks.spawn(async move {
                let edit = match EditSession::create(session.clone(), &body) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("failed to create edit temp file for session {session}: {e}");
                        return;
                    }
                };
                let path = edit.path().to_path_buf();
                debug!("editing '{description}' (session {session}) at {}", path.display());
                if let Err(e) = run_external_command(&mpi::editor_command(), &path).await {
                    warn!("editor subprocess failed: {e}");
                    return;
                }
                match edit.finish() {
                    Ok(outcome) => {
                        let envelope = outcome.into_envelope();
                        let mut conn = server_conn.lock().await;
                        if let Err(e) = conn.send_raw(&envelope).await {
                            warn!("failed to send edit response: {e}");
                        }
                    }
                    Err(e) => warn!("failed to finalize edit session {session}: {e}"),
                }
            });
        }
    }
}

/// Run a `TINTINEDITOR`/`TINTINPAGER`-style command line against `path`,
/// waiting for it to exit. The first whitespace-separated token is the
/// program; `path` is appended as the final argument.
async fn run_external_command(cmd_line: &str, path: &Path) -> io::Result<std::process::ExitStatus> {
    let mut parts = cmd_line.split_whitespace();
    let program = parts.next().unwrap_or("sh");
    tokio::process::Command::new(program)
        .args(parts)
        .arg(path)
        .status()
        .await
}

// ── Mapper worker task ──────────────────────────────────────────────────────

/// Drains the bus: dispatches client lines (forwarding unintercepted ones
/// to the server), feeds `MudEvent`s to the mapper, and flushes any
/// client-/server-bound output the mapper queued this turn. Returns the
/// map store once `Shutdown` is seen and the bus is drained.
async fn mapper_task(
    mut rx: BusReceiver,
    mut mapper: MapperWorker,
    server_conn: Arc<Mutex<Connection>>,
    client_write: Arc<Mutex<OwnedWriteHalf>>,
) -> MapStore {
    while let Some(item) = rx.recv().await {
        match item {
            BusItem::Shutdown => break,
            BusItem::ClientLine(line) => {
                if !mapper.dispatch_command(&line) {
                    let mut conn = server_conn.lock().await;
                    if let Err(e) = conn.send_line(&line).await {
                        warn!("server write error: {e}");
                    }
                }
            }
            BusItem::MudEvent(event) => mapper.handle_event(event),
        }
        flush_pending(&mut mapper, &server_conn, &client_write).await;
    }

    // Drain whatever is left in the queue before exiting.
    while let Ok(item) = rx.try_recv() {
        match item {
            BusItem::MudEvent(event) => mapper.handle_event(event),
            BusItem::ClientLine(_) | BusItem::Shutdown => {}
        }
    }
    flush_pending(&mut mapper, &server_conn, &client_write).await;

    if let Err(e) = mapper.store.save() {
        warn!("failed to save map store after session: {e}");
    }
    mapper.store
}

async fn flush_pending(
    mapper: &mut MapperWorker,
    server_conn: &Arc<Mutex<Connection>>,
    client_write: &Arc<Mutex<OwnedWriteHalf>>,
) {
    for line in mapper.pending_client_output.drain(..) {
        let mut w = client_write.lock().await;
        let _ = w.write_all(line.as_bytes()).await;
        let _ = w.write_all(b"\r\n").await;
    }
    for line in mapper.pending_server_output.drain(..) {
        let mut conn = server_conn.lock().await;
        let _ = conn.send_line(&line).await;
    }
}
