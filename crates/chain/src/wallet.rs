//! Remote wallet signing and per-address routing policy.
//!
//! The service never holds a key. Every signature is obtained from a
//! wallet process over HTTP by CID and raw bytes; what lives here is the
//! routing table from `(wallet_name, address)` to a reachable wallet
//! endpoint, plus the small amount of state each managed address carries
//! (`AddressState`, `select_msg_num` override) that the selector consults
//! before it will assign that address a nonce.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

/// Lifecycle state of a managed address, as tracked by the wallet router.
/// `Forbiden` is distinct from `Removing`/`Removed`: a forbidden address is
/// still permitted to sign, it is simply flagged (matches the inherited
/// behavior from the system this pipeline is modeled on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressState {
    Alive,
    Removing,
    Removed,
    Forbiden,
}

impl AddressState {
    pub fn signing_eligible(self) -> bool {
        matches!(self, AddressState::Alive | AddressState::Forbiden)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressInfo {
    pub addr: String,
    pub wallet_name: String,
    pub state: AddressState,
    /// Per-address override of the default pending window; 0 means "defer
    /// to shared params".
    pub select_msg_num: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SigType {
    Secp256k1,
    Bls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub addr: String,
    pub payload: Vec<u8>,
    pub sig_type: SigType,
    /// Raw unsigned-message bytes, included for wallets that re-verify the
    /// CID against the payload before signing it.
    pub extra: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub sig_type: SigType,
    pub data: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("no wallet client registered for {wallet_name}/{addr}")]
    NoClient { wallet_name: String, addr: String },
    #[error("wallet endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("address {0} is not eligible to sign (removing or removed)")]
    NotEligible(String),
}

/// A single wallet process's signing endpoint.
#[async_trait]
pub trait WalletClient: Send + Sync {
    async fn sign(&self, req: SignRequest) -> anyhow::Result<Signature>;
    async fn has_address(&self, addr: &str) -> anyhow::Result<bool>;
}

/// HTTP-backed wallet client, one per configured wallet endpoint.
pub struct HttpWalletClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpWalletClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), token }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.post(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(t) => builder.bearer_auth(t),
            None => builder,
        }
    }
}

#[async_trait]
impl WalletClient for HttpWalletClient {
    #[instrument(skip(self, req), fields(addr = %req.addr))]
    async fn sign(&self, req: SignRequest) -> anyhow::Result<Signature> {
        let resp = self
            .request("/wallet/sign")
            .json(&req)
            .send()
            .await
            .map_err(|e| WalletError::Unreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(WalletError::Unreachable(format!("status {}", resp.status())).into());
        }
        Ok(resp.json::<Signature>().await?)
    }

    async fn has_address(&self, addr: &str) -> anyhow::Result<bool> {
        let resp = self
            .request("/wallet/has")
            .json(&serde_json::json!({ "addr": addr }))
            .send()
            .await
            .map_err(|e| WalletError::Unreachable(e.to_string()))?;
        Ok(resp.json::<bool>().await.unwrap_or(false))
    }
}

/// Routes `(wallet_name, address)` pairs to a reachable [`WalletClient`] and
/// tracks each managed address's [`AddressInfo`]. Single source of truth
/// for "is this address allowed to sign right now" queries used by the
/// selector.
pub struct WalletRouter {
    clients: RwLock<HashMap<String, Arc<dyn WalletClient>>>,
    addresses: DashMap<String, AddressInfo>,
}

impl Default for WalletRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletRouter {
    pub fn new() -> Self {
        Self { clients: RwLock::new(HashMap::new()), addresses: DashMap::new() }
    }

    pub fn register_wallet(&self, name: impl Into<String>, client: Arc<dyn WalletClient>) {
        self.clients.write().insert(name.into(), client);
    }

    pub fn upsert_address(&self, info: AddressInfo) {
        self.addresses.insert(info.addr.clone(), info);
    }

    pub fn remove_address(&self, addr: &str) {
        self.addresses.remove(addr);
    }

    pub fn address_info(&self, addr: &str) -> Option<AddressInfo> {
        self.addresses.get(addr).map(|e| e.clone())
    }

    fn client_for(&self, wallet_name: &str) -> Option<Arc<dyn WalletClient>> {
        self.clients.read().get(wallet_name).cloned()
    }

    /// Looks up the wallet client for `addr`, checks eligibility, and signs.
    /// Returns [`WalletError::NoClient`] if the address has no wallet
    /// routing entry, [`WalletError::NotEligible`] if its state forbids
    /// signing, otherwise delegates to the resolved client.
    #[instrument(skip(self, payload, extra), fields(addr))]
    pub async fn sign(&self, addr: &str, payload: Vec<u8>, extra: Vec<u8>) -> anyhow::Result<Signature> {
        let info = self
            .addresses
            .get(addr)
            .map(|e| e.clone())
            .ok_or_else(|| WalletError::NoClient { wallet_name: String::new(), addr: addr.to_string() })?;

        if !info.state.signing_eligible() {
            return Err(WalletError::NotEligible(addr.to_string()).into());
        }

        let client = self
            .client_for(&info.wallet_name)
            .ok_or_else(|| WalletError::NoClient { wallet_name: info.wallet_name.clone(), addr: addr.to_string() })?;

        client
            .sign(SignRequest { addr: addr.to_string(), payload, sig_type: SigType::Secp256k1, extra })
            .await
            .inspect_err(|e| warn!(addr, error = %e, "wallet sign failed"))
    }

    pub fn has_wallet_for(&self, addr: &str) -> bool {
        self.addresses.get(addr).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeWallet {
        should_fail: bool,
    }

    #[async_trait]
    impl WalletClient for FakeWallet {
        async fn sign(&self, req: SignRequest) -> anyhow::Result<Signature> {
            if self.should_fail {
                anyhow::bail!("wallet offline");
            }
            Ok(Signature { sig_type: req.sig_type, data: vec![1, 2, 3] })
        }

        async fn has_address(&self, _addr: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn forbiden_address_still_signs() {
        let router = WalletRouter::new();
        router.register_wallet("w1", Arc::new(FakeWallet { should_fail: false }));
        router.upsert_address(AddressInfo {
            addr: "f1abc".into(),
            wallet_name: "w1".into(),
            state: AddressState::Forbiden,
            select_msg_num: 0,
        });
        let sig = router.sign("f1abc", vec![0], vec![0]).await.unwrap();
        assert_eq!(sig.data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn removing_address_is_rejected() {
        let router = WalletRouter::new();
        router.register_wallet("w1", Arc::new(FakeWallet { should_fail: false }));
        router.upsert_address(AddressInfo {
            addr: "f1abc".into(),
            wallet_name: "w1".into(),
            state: AddressState::Removing,
            select_msg_num: 0,
        });
        let err = router.sign("f1abc", vec![0], vec![0]).await.unwrap_err();
        assert!(err.to_string().contains("not eligible"));
    }

    #[tokio::test]
    async fn unknown_address_has_no_client() {
        let router = WalletRouter::new();
        let err = router.sign("f1missing", vec![0], vec![0]).await.unwrap_err();
        assert!(err.to_string().contains("no wallet client"));
    }
}
