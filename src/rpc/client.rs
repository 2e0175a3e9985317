//! The Node RPC Client: a faithful, serialised RPC client for one remote
//! agent (§4.1).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::error::OrrError;
use crate::rpc::canonical::canonical_eq;
use crate::rpc::types::{
    AgentReadPluginsResponse, DnsReadZonesResponse, NodeVersions, ProgramVersionResponse,
    ReadEnforcerZoneListResponse, ReadPolicyResponse, ReadRepositoryResponse, Routing,
    RpcRequest, UpsertOutcome,
};

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(120);
static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// The outcome of `ZoneAdd` (§4.1): either it applied, or the enforcer
/// already has the zone under a conflicting policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoneAddOutcome {
    Applied,
    WrongPolicy,
}

type QueuedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type QueuedOp = Box<dyn FnOnce(Arc<Inner>) -> QueuedFuture + Send>;

struct Inner {
    http: reqwest::Client,
    base: Url,
    routing: Routing,
    last_call: Mutex<Option<Instant>>,
}

impl Inner {
    async fn call<R: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<R, OrrError> {
        let params = merge_routing(params, &self.routing);
        let body = RpcRequest { method, params };
        let resp = self.http.post(self.base.clone()).json(&body).send().await?;
        let resp = resp.error_for_status()?;
        Ok(resp.json::<R>().await?)
    }

    async fn call_unit(&self, method: &'static str, params: Value) -> Result<(), OrrError> {
        let params = merge_routing(params, &self.routing);
        let body = RpcRequest { method, params };
        let resp = self.http.post(self.base.clone()).json(&body).send().await?;
        resp.error_for_status()?;
        Ok(())
    }

    async fn ping_impl(&self) -> Result<(), OrrError> {
        let _: crate::rpc::types::AgentReadVersionResponse =
            self.call("Agent.ReadVersion", json!({})).await?;
        *self.last_call.lock().unwrap() = Some(Instant::now());
        Ok(())
    }

    async fn versions_impl(&self) -> Result<NodeVersions, OrrError> {
        let plugins: AgentReadPluginsResponse = self.call("Agent.ReadPlugins", json!({})).await?;

        let mut out = NodeVersions::default();
        for plugin in plugins.plugin.iter().filter(|p| p.loaded) {
            out.plugin.insert(plugin.name.clone(), plugin.version.clone());
        }

        let ods: ProgramVersionResponse = self.call("OpenDNSSEC.ReadVersion", json!({})).await?;
        for program in ods.program {
            out.program.insert(program.name, program.version);
        }

        if plugins.plugin.iter().any(|p| p.name == "SoftHSM" && p.loaded) {
            let softhsm: ProgramVersionResponse =
                self.call("SoftHSM.ReadVersion", json!({})).await?;
            for program in softhsm.program {
                out.program.insert(program.name, program.version);
            }
        }

        Ok(out)
    }

    async fn setup_hsm_impl(&self, data: &Value) -> Result<UpsertOutcome, OrrError> {
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| OrrError::Config("HSM descriptor missing 'name'".into()))?;

        let existing: ReadRepositoryResponse = self
            .call("OpenDNSSEC.ReadRepository", json!({ "name": name }))
            .await?;

        match existing.repository {
            None => {
                self.call_unit("OpenDNSSEC.CreateRepository", data.clone()).await?;
                Ok(UpsertOutcome { applied_ok: true, mutated: true })
            }
            Some(current) if canonical_eq(&current, data) => {
                Ok(UpsertOutcome { applied_ok: true, mutated: false })
            }
            Some(_) => {
                self.call_unit("OpenDNSSEC.UpdateRepository", data.clone()).await?;
                Ok(UpsertOutcome { applied_ok: true, mutated: true })
            }
        }
    }

    async fn setup_policy_impl(&self, data: &Value) -> Result<UpsertOutcome, OrrError> {
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| OrrError::Config("policy descriptor missing 'name'".into()))?;

        let existing: ReadPolicyResponse = self
            .call("OpenDNSSEC.ReadPolicy", json!({ "name": name }))
            .await?;

        match existing.policy {
            None => {
                self.call_unit("OpenDNSSEC.CreatePolicy", data.clone()).await?;
                Ok(UpsertOutcome { applied_ok: true, mutated: true })
            }
            Some(current) if canonical_eq(&current, data) => {
                Ok(UpsertOutcome { applied_ok: true, mutated: false })
            }
            Some(_) => {
                self.call_unit("OpenDNSSEC.UpdatePolicy", data.clone()).await?;
                Ok(UpsertOutcome { applied_ok: true, mutated: true })
            }
        }
    }

    async fn zone_add_impl(
        &self,
        name: &str,
        content: &str,
        policy_data: &Value,
    ) -> Result<ZoneAddOutcome, OrrError> {
        let zones: DnsReadZonesResponse = self.call("DNS.ReadZones", json!({})).await?;
        let unsigned_path = format!("unsigned/{name}");
        let exists = zones.zone.iter().any(|z| z.path == unsigned_path);

        if exists {
            self.call_unit("DNS.UpdateZone", json!({ "file": name, "content": content }))
                .await?;
        } else {
            self.call_unit("DNS.CreateZone", json!({ "file": name, "content": content }))
                .await?;
        }

        let policy_name = policy_data.get("name").and_then(Value::as_str).unwrap_or_default();
        let list: ReadEnforcerZoneListResponse =
            self.call("OpenDNSSEC.ReadEnforcerZoneList", json!({})).await?;

        if let Some(existing) = list.zone.iter().find(|z| z.name == name) {
            return Ok(if existing.policy != policy_name {
                ZoneAddOutcome::WrongPolicy
            } else {
                ZoneAddOutcome::Applied
            });
        }

        self.call_unit(
            "OpenDNSSEC.CreateEnforcerZone",
            json!({
                "zone": name,
                "policy": policy_name,
                "signerconf": format!("/var/lib/opendnssec/signconf/{name}.xml"),
                "input": format!("/var/lib/opendnssec/unsigned/{name}"),
                "output": format!("/var/lib/opendnssec/signed/{name}"),
            }),
        )
        .await?;

        Ok(ZoneAddOutcome::Applied)
    }

    async fn zone_remove_impl(&self, name: &str) -> Result<(), OrrError> {
        // See DESIGN.md Open Question 1: node-level teardown is limited to
        // the two RPCs the agent itself exposes for this; no local file
        // cleanup is attempted.
        self.call_unit("DNS.DeleteZone", json!({ "file": name })).await?;
        self.call_unit("OpenDNSSEC.DeleteEnforcerZone", json!({ "zone": name })).await?;
        Ok(())
    }
}

fn merge_routing(params: Value, routing: &Routing) -> Value {
    let mut params = if params.is_object() { params } else { json!({}) };
    let obj = params.as_object_mut().expect("forced to an object above");
    obj.insert("host".into(), Value::String(routing.host.clone()));
    obj.insert("port".into(), Value::from(routing.port));
    params
}

/// A serialised RPC client for a single remote agent.
///
/// Every public method enqueues its work onto a background task that runs
/// one item at a time to completion, giving the "at most one in-flight RPC
/// per node, FIFO queue" guarantee from §4.1 without a literal mutex.
#[derive(Clone)]
pub struct NodeRpcClient {
    inner: Arc<Inner>,
    queue: mpsc::UnboundedSender<QueuedOp>,
    cancelled: Arc<AtomicBool>,
}

impl NodeRpcClient {
    /// Construct a client for `uri`, rejecting malformed URIs immediately.
    pub fn new(uri: &str) -> Result<Self, OrrError> {
        let base = Url::parse(uri).map_err(|err| OrrError::Config(format!("malformed node URI '{uri}': {err}")))?;
        let host = base
            .host_str()
            .ok_or_else(|| OrrError::Config(format!("node URI '{uri}' has no host")))?
            .to_string();
        let port = base
            .port_or_known_default()
            .ok_or_else(|| OrrError::Config(format!("node URI '{uri}' has no port")))?;

        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(HTTP_CLIENT_TIMEOUT)
            .build()
            .map_err(OrrError::from)?;

        let inner = Arc::new(Inner {
            http,
            base,
            routing: Routing { host, port },
            last_call: Mutex::new(None),
        });

        let (tx, rx) = mpsc::unbounded_channel::<QueuedOp>();
        tokio::spawn(run_queue(inner.clone(), rx));

        Ok(Self {
            inner,
            queue: tx,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Stop accepting new work and drop anything still queued.
    ///
    /// Mirrors `Stop()` from §5: an in-flight call still runs to
    /// completion, but its result is discarded (the `oneshot` receiver is
    /// simply never awaited by a caller that already moved on).
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// The wall-clock time of the last successful `Ping`, if any.
    pub fn last_call(&self) -> Option<Instant> {
        *self.inner.last_call.lock().unwrap()
    }

    fn enqueue<F>(&self, f: F) -> Result<(), OrrError>
    where
        F: FnOnce(Arc<Inner>) -> QueuedFuture + Send + 'static,
    {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(OrrError::Transport("node client stopped".into()));
        }
        self.queue
            .send(Box::new(f))
            .map_err(|_| OrrError::Transport("node client queue closed".into()))
    }

    async fn run_queued<T: Send + 'static>(
        &self,
        f: impl FnOnce(Arc<Inner>) -> Pin<Box<dyn Future<Output = Result<T, OrrError>> + Send>>
            + Send
            + 'static,
    ) -> Result<T, OrrError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(move |inner| {
            Box::pin(async move {
                let result = f(inner).await;
                let _ = tx.send(result);
            })
        })?;
        rx.await.map_err(|_| OrrError::Transport("node client stopped before completion".into()))?
    }

    pub async fn ping(&self) -> Result<(), OrrError> {
        self.run_queued(|inner| Box::pin(async move { inner.ping_impl().await })).await
    }

    pub async fn versions(&self) -> Result<NodeVersions, OrrError> {
        self.run_queued(|inner| Box::pin(async move { inner.versions_impl().await })).await
    }

    pub async fn setup_hsm(&self, data: Value) -> Result<UpsertOutcome, OrrError> {
        self.run_queued(move |inner| Box::pin(async move { inner.setup_hsm_impl(&data).await }))
            .await
    }

    pub async fn setup_policy(&self, data: Value) -> Result<UpsertOutcome, OrrError> {
        self.run_queued(move |inner| Box::pin(async move { inner.setup_policy_impl(&data).await }))
            .await
    }

    pub async fn start_opendnssec(&self) -> Result<(), OrrError> {
        self.run_queued(|inner| {
            Box::pin(async move { inner.call_unit("OpenDNSSEC.UpdateControlStart", json!({})).await })
        })
        .await
    }

    pub async fn reload_opendnssec(&self) -> Result<(), OrrError> {
        self.run_queued(|inner| {
            Box::pin(async move { inner.call_unit("OpenDNSSEC.UpdateEnforcerUpdate", json!({})).await })
        })
        .await
    }

    pub async fn zone_add(
        &self,
        name: String,
        content: String,
        policy_data: Value,
    ) -> Result<ZoneAddOutcome, OrrError> {
        self.run_queued(move |inner| {
            Box::pin(async move { inner.zone_add_impl(&name, &content, &policy_data).await })
        })
        .await
    }

    pub async fn zone_remove(&self, name: String) -> Result<(), OrrError> {
        self.run_queued(move |inner| Box::pin(async move { inner.zone_remove_impl(&name).await }))
            .await
    }
}

async fn run_queue(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<QueuedOp>) {
    while let Some(item) = rx.recv().await {
        item(inner.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn rejects_malformed_uri() {
        assert!(NodeRpcClient::new("not a uri").is_err());
    }

    #[tokio::test]
    async fn ping_records_last_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "0.19"})))
            .mount(&server)
            .await;

        let client = NodeRpcClient::new(&server.uri()).unwrap();
        assert!(client.last_call().is_none());
        client.ping().await.unwrap();
        assert!(client.last_call().is_some());
    }

    #[tokio::test]
    async fn setup_hsm_is_idempotent_on_equal_payload() {
        let server = MockServer::start().await;
        let data = json!({"name": "softhsm", "module": "/usr/lib/softhsm.so"});

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "repository": data.clone()
            })))
            .mount(&server)
            .await;

        let client = NodeRpcClient::new(&server.uri()).unwrap();
        let outcome = client.setup_hsm(data).await.unwrap();
        assert_eq!(outcome, UpsertOutcome { applied_ok: true, mutated: false });
    }

    #[tokio::test]
    async fn stop_rejects_subsequent_calls() {
        let server = MockServer::start().await;
        let client = NodeRpcClient::new(&server.uri()).unwrap();
        client.stop();
        assert!(client.ping().await.is_err());
    }
}
