//! Typed proxy to the upstream chain node's `Filecoin` JSON-RPC namespace.
//!
//! The node is the system of record for chain state: tipsets, actors, gas
//! estimates and the mempool. Everything here is a thin typed wrapper over
//! RPC calls plus the small amount of classification logic
//! (`classify_push_error`, `is_fatal_sender_error`) that the selector and
//! push orchestrator need to turn raw RPC error text into a decision.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use serde::{Deserialize, Serialize};

/// Ordered list of block CIDs identifying a tipset. Small and append-only
/// within a tipset's lifetime, so a `SmallVec` avoids a heap allocation for
/// the common single-block case.
pub type TipSetKey = smallvec::SmallVec<[Cid; 4]>;

pub fn tipset_key_to_string(key: &TipSetKey) -> String {
    key.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipSet {
    pub key: TipSetKey,
    pub height: i64,
    pub parents: TipSetKey,
    /// CIDs of the blocks in this tipset, in the order the node reported them.
    pub blocks: Vec<Cid>,
}

impl TipSet {
    pub fn key_string(&self) -> String {
        tipset_key_to_string(&self.key)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeadChange {
    pub apply: Vec<TipSet>,
    pub revert: Vec<TipSet>,
}

impl HeadChange {
    pub fn is_empty(&self) -> bool {
        self.apply.is_empty() && self.revert.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedMessage {
    pub from: String,
    pub to: String,
    pub nonce: u64,
    pub value: u128,
    pub method: u64,
    pub params: Vec<u8>,
    pub gas_limit: i64,
    pub gas_fee_cap: u128,
    pub gas_premium: u128,
}

impl UnsignedMessage {
    /// Deterministic content address of the unsigned payload. Real Filecoin
    /// messages are CBOR-encoded and hashed with blake2b-256; this
    /// approximates the shape (a real multihash over the canonical bytes)
    /// without pulling in a CBOR codec, since core never decodes it, only
    /// compares it.
    pub fn cid(&self) -> anyhow::Result<Cid> {
        let bytes = serde_json::to_vec(self)?;
        Ok(digest_to_cid(&bytes))
    }

    pub fn to_raw_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

pub fn digest_to_cid(bytes: &[u8]) -> Cid {
    use cid::multihash::Multihash;
    let mut digest = [0u8; 32];
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    digest[..8].copy_from_slice(&h.to_be_bytes());
    // `Cid` is `CidGeneric<64>`; the multihash digest just needs to fit
    // within that bound, not match it exactly.
    let mh: Multihash<64> = Multihash::wrap(0xb220, &digest).expect("32-byte digest fits within the 64-byte bound");
    Cid::new_v1(0x71, mh)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedMessage {
    pub message: UnsignedMessage,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub exit_code: i64,
    pub return_value: Vec<u8>,
    pub gas_used: i64,
}

impl MessageReceipt {
    pub fn reverted() -> Self {
        Self { exit_code: -1, return_value: Vec::new(), gas_used: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgLookup {
    pub receipt: MessageReceipt,
    pub height: i64,
    pub tipset: TipSetKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub code: String,
    pub nonce: u64,
    pub balance: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GasEstimate {
    pub gas_limit: i64,
    pub gas_fee_cap: u128,
    pub gas_premium: u128,
}

#[derive(Debug, Clone)]
pub struct GasEstimateOverrides {
    pub max_fee: u128,
}

/// A chain-level error surfaced through an RPC call. The node returns plain
/// text; everything downstream that needs to branch on error *kind* goes
/// through [`classify_push_error`] / [`is_fatal_sender_error`] rather than
/// matching on this string directly.
#[derive(Debug, Clone, thiserror::Error)]
#[error("node rpc error: {0}")]
pub struct NodeRpcError(pub String);

impl NodeRpcError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Gas estimation failed in a way that indicates the sender's on-chain
/// account state is broken (e.g. a nonce collision at the state-machine
/// level), as opposed to a merely transient estimation failure.
pub fn is_fatal_sender_error(err: &str) -> bool {
    err.contains("SysErrSenderStateInvalid(2)")
}

/// The node's own de-duplication of an in-flight mempool entry. Not a real
/// failure: the message is already exactly where we wanted it.
pub fn is_already_in_mpool(err: &str) -> bool {
    err.contains("already in mpool")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    AlreadyInMpool,
}

pub fn classify_push_error(err: &str) -> Result<PushOutcome, ()> {
    if is_already_in_mpool(err) {
        Ok(PushOutcome::AlreadyInMpool)
    } else {
        Err(())
    }
}

/// Capability set for the upstream chain node. One implementation
/// ([`crate::rpc::JsonRpcNodeClient`]) speaks real JSON-RPC; tests use an
/// in-memory fake that implements the same trait.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn chain_head(&self) -> anyhow::Result<TipSet>;
    async fn chain_get_tipset(&self, key: &TipSetKey) -> anyhow::Result<TipSet>;
    async fn chain_get_tipset_by_height(&self, height: i64) -> anyhow::Result<Option<TipSet>>;
    async fn chain_get_parent_messages(&self, block: &Cid) -> anyhow::Result<Vec<UnsignedMessage>>;
    async fn chain_get_parent_receipts(&self, block: &Cid) -> anyhow::Result<Vec<MessageReceipt>>;

    async fn state_get_actor(&self, addr: &str, tsk: &TipSetKey) -> anyhow::Result<Actor>;
    async fn state_search_msg(&self, cid: &Cid) -> anyhow::Result<Option<MsgLookup>>;

    async fn gas_estimate_message_gas(
        &self,
        msg: &UnsignedMessage,
        overrides: &GasEstimateOverrides,
        tsk: &TipSetKey,
    ) -> anyhow::Result<GasEstimate>;

    async fn mpool_push(&self, msg: &SignedMessage) -> anyhow::Result<Cid>;
    async fn mpool_batch_push(&self, msgs: &[SignedMessage]) -> anyhow::Result<Vec<Cid>>;

    /// Subscribes to head-change notifications; yields one [`HeadChange`] at
    /// a time (the transport's own framing, e.g. `ChainNotify` on a
    /// websocket, is hidden behind this).
    async fn chain_notify(&self) -> anyhow::Result<tokio::sync::mpsc::Receiver<HeadChange>>;
}

pub type SharedNodeClient = Arc<dyn NodeClient>;

impl fmt::Debug for dyn NodeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NodeClient")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_sender_error_is_recognised() {
        assert!(is_fatal_sender_error("exit SysErrSenderStateInvalid(2)"));
        assert!(!is_fatal_sender_error("exit SysErrOutOfGas(7)"));
    }

    #[test]
    fn already_in_mpool_is_suppressed_not_propagated() {
        assert_eq!(classify_push_error("message already in mpool"), Ok(PushOutcome::AlreadyInMpool));
        assert!(classify_push_error("connection refused").is_err());
    }

    #[test]
    fn unsigned_message_cid_is_deterministic() {
        let m = UnsignedMessage {
            from: "f1abc".into(),
            to: "f1def".into(),
            nonce: 3,
            value: 0,
            method: 0,
            params: vec![],
            gas_limit: 0,
            gas_fee_cap: 0,
            gas_premium: 0,
        };
        assert_eq!(m.cid().unwrap(), m.cid().unwrap());
        let mut m2 = m.clone();
        m2.nonce = 4;
        assert_ne!(m.cid().unwrap(), m2.cid().unwrap());
    }
}
