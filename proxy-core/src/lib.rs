//! Library surface for the intercepting MUD proxy: telnet filter, MPI
//! remote-editing, XML room-protocol tokenizer, mapper worker, pathfinder
//! and map store, wired together by [`bus`]/[`proxy`].

pub mod bus;
pub mod cli;
pub mod config;
pub mod error;
pub mod map;
pub mod mapper;
pub mod mpi;
pub mod net;
pub mod pathfind;
pub mod proxy;
pub mod telnet;
pub mod xml;
