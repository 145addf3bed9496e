//! Name discovery.
//!
//! Services find each other through a registry that maps names to `ws://`
//! URLs.  [`NameServer`] is the registry itself (serve it with an
//! [`RpcServer`]); [`register`], [`lookup`] and [`list`] are the client
//! side.
//!
//! [`RpcServer`]: crate::server::RpcServer

use std::collections::BTreeMap;

use async_trait::async_trait;
use locoslam_types::SlamError;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::info;

use crate::client::RpcClient;
use crate::rpc::RpcHandler;

pub mod methods {
    pub const REGISTER: &str = "register";
    pub const LOOKUP: &str = "lookup";
    pub const LIST: &str = "list";
}

#[derive(Debug, Deserialize)]
struct RegisterParams {
    name: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct LookupParams {
    name: String,
}

fn parse<T: serde::de::DeserializeOwned>(method: &str, params: Value) -> Result<T, SlamError> {
    serde_json::from_value(params).map_err(|e| SlamError::InvalidParams {
        method: method.to_string(),
        details: e.to_string(),
    })
}

/// In-memory name → URL registry.  Re-registering a name replaces its URL.
#[derive(Debug, Default)]
pub struct NameServer {
    entries: RwLock<BTreeMap<String, String>>,
}

#[async_trait]
impl RpcHandler for NameServer {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, SlamError> {
        match method {
            methods::REGISTER => {
                let p: RegisterParams = parse(method, params)?;
                info!(name = %p.name, uri = %p.uri, "registered");
                self.entries.write().await.insert(p.name, p.uri);
                Ok(Value::Null)
            }
            methods::LOOKUP => {
                let p: LookupParams = parse(method, params)?;
                self.entries
                    .read()
                    .await
                    .get(&p.name)
                    .map(|uri| Value::String(uri.clone()))
                    .ok_or_else(|| SlamError::Registry(format!("unknown name '{}'", p.name)))
            }
            methods::LIST => serde_json::to_value(&*self.entries.read().await)
                .map_err(|e| SlamError::Registry(e.to_string())),
            other => Err(SlamError::UnknownMethod(other.to_string())),
        }
    }
}

/// Register `name` → `uri` with the registry at `registry_url`.
pub async fn register(registry_url: &str, name: &str, uri: &str) -> Result<(), SlamError> {
    let client = RpcClient::connect(registry_url).await?;
    client
        .call(methods::REGISTER, json!({ "name": name, "uri": uri }))
        .await?;
    Ok(())
}

/// Resolve `name` through the registry at `registry_url`.
///
/// # Errors
///
/// Returns [`SlamError::Registry`] if the name is not registered.
pub async fn lookup(registry_url: &str, name: &str) -> Result<String, SlamError> {
    let client = RpcClient::connect(registry_url).await?;
    client.call_as(methods::LOOKUP, json!({ "name": name })).await
}

/// Every registered name and its URL.
pub async fn list(registry_url: &str) -> Result<BTreeMap<String, String>, SlamError> {
    let client = RpcClient::connect(registry_url).await?;
    client.call_as(methods::LIST, Value::Null).await
}
