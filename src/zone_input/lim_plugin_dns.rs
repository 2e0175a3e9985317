//! Pull zone content from a DNS-plugin node (§4.3, the only implemented
//! `ZoneInput` variant).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::OrrError;
use crate::rpc::types::{DnsReadZoneResponse, RpcRequest};
use crate::zone_input::ZoneInput;

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(120);
static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub struct LimPluginDns {
    zone_name: String,
    host: String,
    port: u16,
    software: Option<String>,
    http: reqwest::Client,
}

impl LimPluginDns {
    pub fn new(zone_name: String, data: &Value) -> Result<Self, OrrError> {
        Self::validate(data)?;
        let host = data.get("host").and_then(Value::as_str).unwrap().to_string();
        let port = data.get("port").and_then(Value::as_u64).unwrap() as u16;
        let software = data
            .get("software")
            .and_then(Value::as_str)
            .map(str::to_string);

        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(HTTP_CLIENT_TIMEOUT)
            .build()
            .map_err(OrrError::from)?;

        Ok(Self { zone_name, host, port, software, http })
    }
}

impl ZoneInput for LimPluginDns {
    /// `input_data` requires `host` and `port`; `software` is optional.
    fn validate(data: &Value) -> Result<(), OrrError> {
        if data.get("host").and_then(Value::as_str).is_none() {
            return Err(OrrError::Config("lim_plugin_dns input_data missing 'host'".into()));
        }
        if data.get("port").and_then(Value::as_u64).is_none() {
            return Err(OrrError::Config("lim_plugin_dns input_data missing 'port'".into()));
        }
        Ok(())
    }

    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<String, OrrError>> + Send + '_>> {
        Box::pin(async move {
            let mut params = json!({
                "file": self.zone_name,
                "as_content": true,
                "host": self.host,
                "port": self.port,
            });
            if let Some(software) = &self.software {
                params["software"] = Value::String(software.clone());
            }

            let body = RpcRequest { method: "DNS.ReadZone", params };
            let url = format!("http://{}:{}/", self.host, self.port);
            let resp = self.http.post(url).json(&body).send().await?;
            let resp = resp.error_for_status()?;
            let resp: DnsReadZoneResponse = resp.json().await?;

            resp.zone
                .content
                .ok_or_else(|| OrrError::Fetch(format!("zone '{}' has no content", self.zone_name)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_host_and_port() {
        assert!(LimPluginDns::validate(&json!({"port": 53})).is_err());
        assert!(LimPluginDns::validate(&json!({"host": "10.0.0.1"})).is_err());
        assert!(LimPluginDns::validate(&json!({"host": "10.0.0.1", "port": 53})).is_ok());
    }
}
