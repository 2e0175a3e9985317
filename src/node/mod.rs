//! Node liveness and per-node work dispatch (§4.2).

pub mod entry;
pub mod watcher;

pub use entry::{NodeEntry, NodeMode, NodeState};
pub use watcher::{NodeWatcher, StateTotals};
