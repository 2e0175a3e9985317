//! Row and descriptor types shared between the Config Store and the
//! Cluster Managers it bootstraps (§3, §4.5).

use serde_json::Value;
use uuid::Uuid;

use crate::cluster::state::ClusterMode;
use crate::node::NodeMode;

#[derive(Clone, Debug)]
pub struct NodeDescriptor {
    pub uuid: Uuid,
    pub uri: String,
    pub mode: NodeMode,
}

#[derive(Clone, Debug)]
pub struct ZoneDescriptor {
    pub uuid: Uuid,
    pub name: String,
    pub input_type: String,
    pub input_data: Value,
}

#[derive(Clone, Debug)]
pub struct HsmDescriptor {
    pub uuid: Uuid,
    pub data: Value,
}

#[derive(Clone, Debug)]
pub struct PolicyDescriptor {
    pub uuid: Uuid,
    pub data: Value,
}

/// One fully-joined cluster, ready to seed a `ClusterManager` (§4.5
/// `ClusterConfig`).
#[derive(Clone, Debug)]
pub struct ClusterDescriptor {
    pub uuid: Uuid,
    pub mode: ClusterMode,
    pub policy: PolicyDescriptor,
    pub hsms: Vec<HsmDescriptor>,
    pub nodes: Vec<NodeDescriptor>,
    pub zones: Vec<ZoneDescriptor>,
}
