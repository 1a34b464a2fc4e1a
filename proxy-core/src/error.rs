//! Per-subsystem error enums.
//!
//! Grounded on the `thiserror` usage in `libsignal-wasm`/`vodozemac-wasm`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapStoreError {
    #[error("room data is corrupt: {0}")]
    CorruptJson(String),
    #[error("failed to serialize map data: {0}")]
    SerializeFailed(String),
    #[error("failed to save map data: {0}")]
    SaveFailed(String),
    #[error("no such room: {0}")]
    NoSuchRoom(String),
}

#[derive(Debug, Error)]
pub enum TelnetError {
    #[error("invalid prompt terminator override {0:?}: expected hex bytes or \"iac-ga\"")]
    InvalidPromptTerminator(String),
}

#[derive(Debug, Error)]
pub enum PathfindError {
    #[error("unknown origin room: {0}")]
    UnknownOrigin(String),
    #[error("unknown destination room: {0}")]
    UnknownDestination(String),
    #[error("no path exists between {from} and {to}")]
    NoPath { from: String, to: String },
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("client connection error: {0}")]
    Client(#[source] std::io::Error),
    #[error("server connection error: {0}")]
    Server(#[source] std::io::Error),
    #[error(transparent)]
    MapStore(#[from] MapStoreError),
}
