//! A single managed node and its liveness state (§4.2).

use uuid::Uuid;

use crate::rpc::NodeRpcClient;

/// A node's liveness state.
///
/// `UNKNOWN` is the initial state on add; every other state is reached
/// only through [`super::watcher::NodeWatcher::tick`] or an explicit
/// `SetState` call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    Unknown,
    Offline,
    Online,
    Failure,
    Standby,
    Disabled,
}

impl NodeState {
    /// Whether fan-out work may be dispatched to a node in this state.
    pub fn is_callable(self) -> bool {
        matches!(self, NodeState::Online | NodeState::Standby)
    }
}

/// A node's configured role within its cluster (§3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeMode {
    Primary,
    Secondary,
}

/// One entry in the Node Watcher's node table.
pub struct NodeEntry {
    pub uuid: Uuid,
    pub uri: String,
    pub mode: NodeMode,
    pub state: NodeState,
    pub client: NodeRpcClient,
    pub pending_remove: bool,
}

impl NodeEntry {
    pub fn new(uuid: Uuid, uri: String, mode: NodeMode, client: NodeRpcClient) -> Self {
        Self {
            uuid,
            uri,
            mode,
            state: NodeState::Unknown,
            client,
            pending_remove: false,
        }
    }

    /// Whether this node is due a liveness `Ping` this tick (§4.2 step 2).
    pub fn ping_due(&self, probe_interval: std::time::Duration) -> bool {
        match self.state {
            NodeState::Unknown | NodeState::Offline => true,
            NodeState::Online | NodeState::Standby => self
                .client
                .last_call()
                .is_none_or(|last| last.elapsed() > probe_interval),
            NodeState::Failure | NodeState::Disabled => false,
        }
    }

    /// Apply the outcome of a liveness `Ping` to this node's state.
    pub fn apply_ping_result(&mut self, result: Result<(), crate::error::OrrError>) {
        match result {
            Ok(()) => {
                if matches!(self.state, NodeState::Unknown | NodeState::Offline) {
                    self.state = NodeState::Standby;
                }
            }
            Err(_) => {
                if matches!(
                    self.state,
                    NodeState::Online | NodeState::Standby | NodeState::Unknown
                ) {
                    self.state = NodeState::Offline;
                }
            }
        }
    }
}
