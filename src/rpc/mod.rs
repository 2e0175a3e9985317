//! The Node RPC Client (§4.1): a serialised JSON-over-HTTP client for one
//! remote agent, plus the request/response shapes it speaks.

pub mod canonical;
pub mod client;
pub mod types;

pub use client::{NodeRpcClient, ZoneAddOutcome};
pub use types::{NodeVersions, UpsertOutcome};
