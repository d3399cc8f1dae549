//! Node access: the `NodeClient` seam and its algod-backed implementation.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use reqwest::Client;

use crate::config::Environment;
use crate::error::{Result, WatcherError};

use super::models::{
    AccountApplicationResponse, Application, Block, BlockResponse, BoxValue, BoxesResponse,
    TealKeyValue,
};

/// The four node operations the core consumes. Implemented by
/// [`AlgodClient`] in production and by in-memory mocks in tests.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Global key/value state of an application.
    async fn get_application_state(&self, app_id: u64) -> Result<Vec<TealKeyValue>>;

    /// Names of every box owned by an application.
    async fn get_application_boxes(&self, app_id: u64) -> Result<Vec<Vec<u8>>>;

    /// Contents of a single application box.
    async fn get_application_box(&self, app_id: u64, name: &[u8]) -> Result<Vec<u8>>;

    /// An account's local state for one application.
    async fn get_account_app_local_state(
        &self,
        address: &str,
        app_id: u64,
    ) -> Result<Vec<TealKeyValue>>;
}

/// JSON client against an algod endpoint.
#[derive(Debug, Clone)]
pub struct AlgodClient {
    base_url: String,
    http: Client,
}

impl AlgodClient {
    pub fn new(env: Environment) -> Self {
        Self::with_base_url(env.algod_url())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        op: &'static str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http
            .get(url)
            .query(query)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| WatcherError::with_source(crate::error::Kind::Upstream, op, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatcherError::upstream(
                op,
                format!("{url} returned {status}"),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| WatcherError::with_source(crate::error::Kind::Upstream, op, e))
    }

    /// The node's current last round.
    pub async fn last_round(&self) -> Result<u64> {
        let url = format!("{}/v2/status", self.base_url);
        let status: serde_json::Value = self.get_json("algod:status", &url, &[]).await?;
        status["last-round"]
            .as_u64()
            .ok_or_else(|| WatcherError::upstream("algod:status", "missing 'last-round'"))
    }

    /// Long-poll until a block after `round` exists.
    pub async fn wait_for_block_after(&self, round: u64) -> Result<()> {
        let url = format!("{}/v2/status/wait-for-block-after/{}", self.base_url, round);
        let _: serde_json::Value = self.get_json("algod:wait_for_block", &url, &[]).await?;
        Ok(())
    }

    /// Fetch a block in the JSON rendering of the payset encoding.
    pub async fn get_block(&self, round: u64) -> Result<Block> {
        let url = format!("{}/v2/blocks/{}", self.base_url, round);
        let resp: BlockResponse = self
            .get_json("algod:get_block", &url, &[("format", "json".to_string())])
            .await?;
        Ok(resp.block)
    }
}

#[async_trait]
impl NodeClient for AlgodClient {
    async fn get_application_state(&self, app_id: u64) -> Result<Vec<TealKeyValue>> {
        let url = format!("{}/v2/applications/{}", self.base_url, app_id);
        let app: Application = self.get_json("algod:get_application", &url, &[]).await?;
        Ok(app.params.global_state)
    }

    async fn get_application_boxes(&self, app_id: u64) -> Result<Vec<Vec<u8>>> {
        let url = format!("{}/v2/applications/{}/boxes", self.base_url, app_id);
        let resp: BoxesResponse = self.get_json("algod:get_boxes", &url, &[]).await?;
        resp.boxes
            .into_iter()
            .map(|b| {
                B64.decode(&b.name).map_err(|e| {
                    WatcherError::upstream("algod:get_boxes", format!("bad box name: {e}"))
                })
            })
            .collect()
    }

    async fn get_application_box(&self, app_id: u64, name: &[u8]) -> Result<Vec<u8>> {
        let url = format!("{}/v2/applications/{}/box", self.base_url, app_id);
        let encoded = format!("b64:{}", B64.encode(name));
        let resp: BoxValue = self
            .get_json("algod:get_box", &url, &[("name", encoded)])
            .await?;
        B64.decode(&resp.value)
            .map_err(|e| WatcherError::upstream("algod:get_box", format!("bad box value: {e}")))
    }

    async fn get_account_app_local_state(
        &self,
        address: &str,
        app_id: u64,
    ) -> Result<Vec<TealKeyValue>> {
        let url = format!(
            "{}/v2/accounts/{}/applications/{}",
            self.base_url, address, app_id
        );
        let resp: AccountApplicationResponse = self
            .get_json("algod:get_account_application", &url, &[])
            .await?;
        Ok(resp
            .app_local_state
            .map(|s| s.key_value)
            .unwrap_or_default())
    }
}
