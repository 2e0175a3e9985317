//! Zone Input: a polymorphic fetcher for zone content (§4.3).

pub mod lim_plugin_dns;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::OrrError;
use lim_plugin_dns::LimPluginDns;

/// A pluggable source of zone content.
///
/// New variants (file, HTTP GET) are added by implementing this trait and
/// extending [`build`]'s registry match, without touching any caller.
pub trait ZoneInput: Send + Sync {
    /// Validate `data` against this variant's schema, before
    /// construction. `Self: Sized` keeps this out of the vtable so
    /// `Box<dyn ZoneInput>` stays object-safe; it's only ever called
    /// through a concrete type, from [`build`]'s registry match.
    fn validate(data: &Value) -> Result<(), OrrError>
    where
        Self: Sized;

    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<String, OrrError>> + Send + '_>>;
}

/// Construct the [`ZoneInput`] implementation named by `input_type`,
/// validating `input_data` against that variant's schema first.
pub fn build(input_type: &str, zone_name: &str, input_data: &Value) -> Result<Box<dyn ZoneInput>, OrrError> {
    match input_type {
        "lim_plugin_dns" => {
            LimPluginDns::validate(input_data)?;
            Ok(Box::new(LimPluginDns::new(zone_name.to_string(), input_data)?))
        }
        other => Err(OrrError::Config(format!("unknown zone input type '{other}'"))),
    }
}
