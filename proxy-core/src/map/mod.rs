//! Map data model, persistence and pathfinding.

pub mod room;
pub mod store;

pub use room::{Exit, Room, Vnum, DIRECTIONS};
pub use store::MapStore;
