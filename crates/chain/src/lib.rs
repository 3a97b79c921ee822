//! Chain interaction layer: the node RPC client and the remote wallet
//! signing router.
//!
//! This crate provides:
//! - Typed domain model for tipsets, messages, receipts and gas estimates
//! - A JSON-RPC client speaking the `Filecoin.*` namespace over WS or HTTP
//! - Remote wallet signing with per-address routing and lifecycle state

mod node;
mod rpc;
mod wallet;

pub use node::{
    classify_push_error, digest_to_cid, is_already_in_mpool, is_fatal_sender_error, Actor,
    GasEstimate, GasEstimateOverrides, HeadChange, MessageReceipt, MsgLookup, NodeClient,
    NodeRpcError, PushOutcome, SharedNodeClient, SignedMessage, TipSet, TipSetKey,
    tipset_key_to_string, UnsignedMessage,
};
pub use rpc::{JsonRpcNodeClient, NodeEndpoint, SharedJsonRpcClient};
pub use wallet::{
    AddressInfo, AddressState, HttpWalletClient, SigType, SignRequest, Signature, WalletClient,
    WalletError, WalletRouter,
};
