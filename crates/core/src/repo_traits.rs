//! Repository capability set (C1).
//!
//! Modeled as independent capability traits composed into a root [`Repo`],
//! rather than one monolithic interface, so a storage backend can implement
//! only what it needs and so the selector/reconciler/orchestrator can each
//! depend on just the capability they use. [`Repo::transaction`] takes a
//! [`TxWrites`] batch (expired messages, newly selected messages, modified
//! addresses) that commits or rolls back as one unit.

use async_trait::async_trait;

use crate::address::Address;
use crate::message::{Message, MessageState};
use crate::shared_params::SharedParams;
use messager_chain::NodeEndpoint;

#[async_trait]
pub trait MessageRepo: Send + Sync {
    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<Message>>;
    async fn get_by_unsigned_cid(&self, cid: &cid::Cid) -> anyhow::Result<Option<Message>>;
    async fn get_by_signed_cid(&self, cid: &cid::Cid) -> anyhow::Result<Option<Message>>;
    async fn get_by_from_nonce(&self, from: &str, nonce: u64) -> anyhow::Result<Option<Message>>;
    async fn list_by_address_state(&self, addr: &str, state: MessageState) -> anyhow::Result<Vec<Message>>;
    async fn list_by_state(&self, state: MessageState) -> anyhow::Result<Vec<Message>>;
    async fn list_by_address(&self, addr: &str) -> anyhow::Result<Vec<Message>>;
    async fn put_message(&self, msg: Message) -> anyhow::Result<()>;
    async fn put_messages(&self, msgs: Vec<Message>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait AddressRepo: Send + Sync {
    async fn get_address(&self, addr: &str) -> anyhow::Result<Option<Address>>;
    async fn list_managed(&self) -> anyhow::Result<Vec<Address>>;
    async fn put_address(&self, addr: Address) -> anyhow::Result<()>;
    async fn put_addresses(&self, addrs: Vec<Address>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait NodeRepo: Send + Sync {
    async fn list_secondaries(&self) -> anyhow::Result<Vec<NodeEndpoint>>;
    async fn put_secondary(&self, endpoint: NodeEndpoint) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SharedParamsRepo: Send + Sync {
    async fn get_shared_params(&self) -> anyhow::Result<SharedParams>;
    async fn set_shared_params(&self, params: SharedParams) -> anyhow::Result<()>;
}

/// Aggregate capability set plus the transactional escape hatch. A backend
/// implements this directly (e.g. the in-memory reference implementation);
/// `transaction` applies a [`TxWrites`] batch all-or-nothing. Every caller
/// gathers the reads it needs before opening the transaction, so the batch
/// never needs to issue further repository reads mid-flight.
#[async_trait]
pub trait Repo: MessageRepo + AddressRepo + NodeRepo + SharedParamsRepo + Send + Sync {
    async fn transaction(&self, writes: TxWrites) -> anyhow::Result<()>;
}

/// The accumulated writes one transaction applies atomically.
#[derive(Debug, Clone, Default)]
pub struct TxWrites {
    pub messages: Vec<Message>,
    pub addresses: Vec<Address>,
}

impl TxWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, m: Message) -> Self {
        self.messages.push(m);
        self
    }

    pub fn with_address(mut self, a: Address) -> Self {
        self.addresses.push(a);
        self
    }
}
