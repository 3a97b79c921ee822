//! JSON-RPC transport to the upstream chain node.
//!
//! Connects over either a websocket or a plain HTTP endpoint and implements
//! [`NodeClient`] against the `Filecoin.*` namespace. Connection setup
//! mirrors the "build a client, smoke-test it with one cheap call, hand back
//! a ready-to-use handle" pattern used elsewhere in this codebase for
//! external provider connections.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cid::Cid;
use jsonrpsee::core::client::{ClientT, Subscription, SubscriptionClientT};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HeaderMap, HeaderValue, HttpClient, HttpClientBuilder};
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::node::{
    Actor, GasEstimate, GasEstimateOverrides, HeadChange, MessageReceipt, MsgLookup, NodeClient,
    NodeRpcError, SignedMessage, TipSet, TipSetKey, UnsignedMessage,
};

const HEAD_CHANGE_CHANNEL_CAPACITY: usize = 5;

enum Transport {
    Ws(WsClient),
    Http(HttpClient),
}

impl Transport {
    async fn request<T: serde::de::DeserializeOwned>(&self, method: &str, params: ArrayParams) -> Result<T> {
        let result = match self {
            Transport::Ws(c) => c.request(method, params).await,
            Transport::Http(c) => c.request(method, params).await,
        };
        result.map_err(|e| NodeRpcError::new(e.to_string()).into())
    }
}

/// Connection-level configuration for a single node endpoint: a URL, an
/// optional bearer token, and whether to prefer the websocket transport
/// (needed for `ChainNotify`; HTTP-only nodes fall back to polling
/// `ChainHead` on an interval from the caller).
#[derive(Debug, Clone)]
pub struct NodeEndpoint {
    pub url: String,
    pub token: Option<String>,
    pub use_websocket: bool,
}

pub struct JsonRpcNodeClient {
    transport: Transport,
    endpoint: NodeEndpoint,
}

impl JsonRpcNodeClient {
    #[instrument(skip(endpoint), fields(url = %endpoint.url))]
    pub async fn connect(endpoint: NodeEndpoint) -> Result<Self> {
        let transport = if endpoint.use_websocket {
            let mut builder = WsClientBuilder::default().connection_timeout(Duration::from_secs(10));
            if let Some(token) = &endpoint.token {
                let mut headers = HeaderMap::new();
                headers.insert(
                    "Authorization",
                    HeaderValue::from_str(&format!("Bearer {token}")).context("invalid bearer token")?,
                );
                builder = builder.set_headers(headers);
            }
            let client = builder.build(&endpoint.url).await.context("connecting to node over websocket")?;
            Transport::Ws(client)
        } else {
            let mut builder = HttpClientBuilder::default();
            if let Some(token) = &endpoint.token {
                let mut headers = HeaderMap::new();
                headers.insert(
                    "Authorization",
                    HeaderValue::from_str(&format!("Bearer {token}")).context("invalid bearer token")?,
                );
                builder = builder.set_headers(headers);
            }
            let client = builder.build(&endpoint.url).context("building node http client")?;
            Transport::Http(client)
        };

        let this = Self { transport, endpoint };
        // Smoke-test the connection before handing it back so configuration
        // mistakes (wrong URL, bad token) fail at startup, not mid-cycle.
        this.chain_head().await.context("initial ChainHead probe failed")?;
        info!(url = %this.endpoint.url, "connected to chain node");
        Ok(this)
    }
}

#[async_trait]
impl NodeClient for JsonRpcNodeClient {
    #[instrument(skip(self))]
    async fn chain_head(&self) -> Result<TipSet> {
        self.transport.request("Filecoin.ChainHead", ArrayParams::new()).await
    }

    async fn chain_get_tipset(&self, key: &TipSetKey) -> Result<TipSet> {
        let mut params = ArrayParams::new();
        params.insert(key)?;
        self.transport.request("Filecoin.ChainGetTipSet", params).await
    }

    async fn chain_get_tipset_by_height(&self, height: i64) -> Result<Option<TipSet>> {
        let mut params = ArrayParams::new();
        params.insert(height)?;
        match self.transport.request::<TipSet>("Filecoin.ChainGetTipSetByHeight", params).await {
            Ok(ts) => Ok(Some(ts)),
            Err(e) => {
                debug!(error = %e, height, "tipset not found at height");
                Ok(None)
            }
        }
    }

    async fn chain_get_parent_messages(&self, block: &Cid) -> Result<Vec<UnsignedMessage>> {
        let mut params = ArrayParams::new();
        params.insert(block.to_string())?;
        self.transport.request("Filecoin.ChainGetParentMessages", params).await
    }

    async fn chain_get_parent_receipts(&self, block: &Cid) -> Result<Vec<MessageReceipt>> {
        let mut params = ArrayParams::new();
        params.insert(block.to_string())?;
        self.transport.request("Filecoin.ChainGetParentReceipts", params).await
    }

    async fn state_get_actor(&self, addr: &str, tsk: &TipSetKey) -> Result<Actor> {
        let mut params = ArrayParams::new();
        params.insert(addr)?;
        params.insert(tsk)?;
        self.transport.request("Filecoin.StateGetActor", params).await
    }

    async fn state_search_msg(&self, cid: &Cid) -> Result<Option<MsgLookup>> {
        let mut params = ArrayParams::new();
        params.insert(cid.to_string())?;
        self.transport.request("Filecoin.StateSearchMsg", params).await
    }

    #[instrument(skip(self, msg, overrides), fields(from = %msg.from, nonce = msg.nonce))]
    async fn gas_estimate_message_gas(
        &self,
        msg: &UnsignedMessage,
        overrides: &GasEstimateOverrides,
        tsk: &TipSetKey,
    ) -> Result<GasEstimate> {
        let mut params = ArrayParams::new();
        params.insert(msg)?;
        params.insert(overrides.max_fee.to_string())?;
        params.insert(tsk)?;
        self.transport.request("Filecoin.GasEstimateMessageGas", params).await
    }

    #[instrument(skip(self, msg), fields(from = %msg.message.from, nonce = msg.message.nonce))]
    async fn mpool_push(&self, msg: &SignedMessage) -> Result<Cid> {
        let mut params = ArrayParams::new();
        params.insert(msg)?;
        self.transport.request("Filecoin.MpoolPush", params).await
    }

    async fn mpool_batch_push(&self, msgs: &[SignedMessage]) -> Result<Vec<Cid>> {
        let mut params = ArrayParams::new();
        params.insert(msgs)?;
        self.transport.request("Filecoin.MpoolBatchPush", params).await
    }

    async fn chain_notify(&self) -> Result<mpsc::Receiver<HeadChange>> {
        let (tx, rx) = mpsc::channel(HEAD_CHANGE_CHANNEL_CAPACITY);
        match &self.transport {
            Transport::Ws(client) => {
                let mut sub: Subscription<HeadChange> = client
                    .subscribe("Filecoin.ChainNotify", ArrayParams::new(), "Filecoin.ChainNotifyUnsubscribe")
                    .await
                    .map_err(|e| NodeRpcError::new(e.to_string()))?;
                tokio::spawn(async move {
                    while let Some(next) = sub.next().await {
                        match next {
                            Ok(change) => {
                                if tx.try_send(change).is_err() {
                                    warn!("head-change channel full or closed; dropping notification");
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "chain notify subscription error");
                                break;
                            }
                        }
                    }
                });
            }
            Transport::Http(_) => {
                anyhow::bail!("ChainNotify requires a websocket endpoint");
            }
        }
        Ok(rx)
    }
}

pub type SharedJsonRpcClient = Arc<JsonRpcNodeClient>;
