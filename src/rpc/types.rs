//! JSON request/response shapes for every RPC the agent exposes (§6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `{host, port}` routing object merged into every outgoing call's
/// params, addressing the node the agent should act on.
#[derive(Clone, Debug, Serialize)]
pub struct Routing {
    pub host: String,
    pub port: u16,
}

/// The envelope every RPC is wrapped in: `{"method": ..., "params": ...}`.
#[derive(Serialize)]
pub struct RpcRequest<P> {
    pub method: &'static str,
    pub params: P,
}

#[derive(Deserialize)]
pub struct AgentReadVersionResponse {
    pub version: String,
}

#[derive(Deserialize)]
pub struct PluginEntry {
    pub name: String,
    pub version: String,
    pub loaded: bool,
}

#[derive(Deserialize)]
pub struct AgentReadPluginsResponse {
    pub plugin: Vec<PluginEntry>,
}

#[derive(Deserialize)]
pub struct ProgramEntry {
    pub name: String,
    pub version: String,
}

#[derive(Deserialize)]
pub struct ProgramVersionResponse {
    pub program: Vec<ProgramEntry>,
}

/// The assembled result of [`crate::rpc::client::NodeRpcClient::versions`]:
/// one version string per plugin/program name, for every *loaded* plugin.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeVersions {
    pub plugin: HashMap<String, String>,
    pub program: HashMap<String, String>,
}

#[derive(Deserialize)]
pub struct ReadRepositoryResponse {
    pub repository: Option<Value>,
}

#[derive(Deserialize)]
pub struct ReadPolicyResponse {
    pub policy: Option<Value>,
}

#[derive(Deserialize)]
pub struct EnforcerZoneEntry {
    pub name: String,
    pub policy: String,
}

#[derive(Deserialize)]
pub struct ReadEnforcerZoneListResponse {
    pub zone: Vec<EnforcerZoneEntry>,
}

#[derive(Deserialize)]
pub struct DnsZoneEntry {
    pub path: String,
}

#[derive(Deserialize)]
pub struct DnsReadZonesResponse {
    pub zone: Vec<DnsZoneEntry>,
}

#[derive(Deserialize)]
pub struct DnsReadZoneResponse {
    pub zone: DnsZoneContent,
}

#[derive(Deserialize)]
pub struct DnsZoneContent {
    pub content: Option<String>,
}

/// The result of an idempotent upsert (`SetupHSM`/`SetupPolicy`): whether
/// it applied cleanly, and whether it actually changed anything on the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub applied_ok: bool,
    pub mutated: bool,
}

/// Signalled by [`crate::rpc::client::NodeRpcClient::zone_add`] when the
/// enforcer already has the zone under a different policy.
pub const WRONG_POLICY: &str = "WRONG_POLICY";
