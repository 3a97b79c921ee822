//! In-memory reference implementation of [`messager_core::Repo`], backed by
//! `DashMap`s. Suitable for tests and single-process deployments; a real
//! deployment would swap this for a SQL-backed implementation of the same
//! trait without touching the pipeline code above it.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use messager_core::{
    Address, Message, MessageRepo, MessageState, NodeRepo, Repo, SharedParams, SharedParamsRepo,
    TxWrites,
};
use messager_chain::NodeEndpoint;
use parking_lot::RwLock;

#[derive(Default)]
pub struct InMemoryRepo {
    messages_by_id: DashMap<String, Message>,
    addresses: DashMap<String, Address>,
    secondaries: RwLock<Vec<NodeEndpoint>>,
    shared_params: RwLock<Option<SharedParams>>,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(shared_params: SharedParams) -> Self {
        let repo = Self::new();
        *repo.shared_params.write() = Some(shared_params);
        repo
    }
}

#[async_trait]
impl MessageRepo for InMemoryRepo {
    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<Message>> {
        Ok(self.messages_by_id.get(id).map(|e| e.clone()))
    }

    async fn get_by_unsigned_cid(&self, cid: &cid::Cid) -> anyhow::Result<Option<Message>> {
        Ok(self.messages_by_id.iter().find(|e| e.unsigned_cid.as_ref() == Some(cid)).map(|e| e.clone()))
    }

    async fn get_by_signed_cid(&self, cid: &cid::Cid) -> anyhow::Result<Option<Message>> {
        Ok(self.messages_by_id.iter().find(|e| e.signed_cid.as_ref() == Some(cid)).map(|e| e.clone()))
    }

    async fn get_by_from_nonce(&self, from: &str, nonce: u64) -> anyhow::Result<Option<Message>> {
        Ok(self.messages_by_id.iter().find(|e| e.from == from && e.nonce == nonce).map(|e| e.clone()))
    }

    async fn list_by_address_state(&self, addr: &str, state: MessageState) -> anyhow::Result<Vec<Message>> {
        Ok(self.messages_by_id.iter().filter(|e| e.from == addr && e.state == state).map(|e| e.clone()).collect())
    }

    async fn list_by_state(&self, state: MessageState) -> anyhow::Result<Vec<Message>> {
        Ok(self.messages_by_id.iter().filter(|e| e.state == state).map(|e| e.clone()).collect())
    }

    async fn list_by_address(&self, addr: &str) -> anyhow::Result<Vec<Message>> {
        Ok(self.messages_by_id.iter().filter(|e| e.from == addr).map(|e| e.clone()).collect())
    }

    async fn put_message(&self, msg: Message) -> anyhow::Result<()> {
        self.messages_by_id.insert(msg.id.clone(), msg);
        Ok(())
    }

    async fn put_messages(&self, msgs: Vec<Message>) -> anyhow::Result<()> {
        for msg in msgs {
            self.messages_by_id.insert(msg.id.clone(), msg);
        }
        Ok(())
    }
}

#[async_trait]
impl messager_core::AddressRepo for InMemoryRepo {
    async fn get_address(&self, addr: &str) -> anyhow::Result<Option<Address>> {
        Ok(self.addresses.get(addr).map(|e| e.clone()))
    }

    async fn list_managed(&self) -> anyhow::Result<Vec<Address>> {
        Ok(self.addresses.iter().map(|e| e.clone()).collect())
    }

    async fn put_address(&self, addr: Address) -> anyhow::Result<()> {
        self.addresses.insert(addr.addr.clone(), addr);
        Ok(())
    }

    async fn put_addresses(&self, addrs: Vec<Address>) -> anyhow::Result<()> {
        for addr in addrs {
            self.addresses.insert(addr.addr.clone(), addr);
        }
        Ok(())
    }
}

#[async_trait]
impl NodeRepo for InMemoryRepo {
    async fn list_secondaries(&self) -> anyhow::Result<Vec<NodeEndpoint>> {
        Ok(self.secondaries.read().clone())
    }

    async fn put_secondary(&self, endpoint: NodeEndpoint) -> anyhow::Result<()> {
        self.secondaries.write().push(endpoint);
        Ok(())
    }
}

#[async_trait]
impl SharedParamsRepo for InMemoryRepo {
    async fn get_shared_params(&self) -> anyhow::Result<SharedParams> {
        self.shared_params
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("shared params not initialized"))
    }

    async fn set_shared_params(&self, params: SharedParams) -> anyhow::Result<()> {
        *self.shared_params.write() = Some(params);
        Ok(())
    }
}

#[async_trait]
impl Repo for InMemoryRepo {
    /// There is no underlying storage engine transaction to open here; the
    /// all-or-nothing contract instead comes from applying every write to
    /// the `DashMap`s without ever `.await`ing in between, so nothing else
    /// can observe a partially-applied batch.
    async fn transaction(&self, writes: TxWrites) -> anyhow::Result<()> {
        for msg in writes.messages {
            self.messages_by_id.insert(msg.id.clone(), msg);
        }
        for addr in writes.addresses {
            self.addresses.insert(addr.addr.clone(), addr);
        }
        Ok(())
    }
}

pub type SharedInMemoryRepo = Arc<InMemoryRepo>;

#[cfg(test)]
mod tests {
    use super::*;
    use messager_core::{AddressRepo, MessageState};

    fn params() -> SharedParams {
        SharedParams {
            expire_epoch: 0,
            gas_over_estimation: 0.25,
            max_fee: 1,
            max_fee_cap: 0,
            sel_msg_num: 20,
            max_est_fail_num_of_msg: 10,
            scan_interval_secs: 120,
        }
    }

    #[tokio::test]
    async fn put_then_get_by_id_round_trips() {
        let repo = InMemoryRepo::new();
        let msg = Message::new_unfilled("m1", "f1a", "f1b", 0);
        repo.put_message(msg.clone()).await.unwrap();
        let found = repo.get_by_id("m1").await.unwrap().unwrap();
        assert_eq!(found.id, "m1");
    }

    #[tokio::test]
    async fn list_by_address_state_filters_correctly() {
        let repo = InMemoryRepo::new();
        let mut m1 = Message::new_unfilled("m1", "f1a", "f1b", 0);
        m1.state = MessageState::FillMsg;
        let mut m2 = Message::new_unfilled("m2", "f1a", "f1b", 0);
        m2.state = MessageState::UnFillMsg;
        repo.put_messages(vec![m1, m2]).await.unwrap();
        let filled = repo.list_by_address_state("f1a", MessageState::FillMsg).await.unwrap();
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].id, "m1");
    }

    #[tokio::test]
    async fn transaction_applies_all_writes() {
        let repo = InMemoryRepo::new();
        let writes = TxWrites::new()
            .with_message(Message::new_unfilled("m1", "f1a", "f1b", 0))
            .with_address(Address::new("f1a"));
        repo.transaction(writes).await.unwrap();
        assert!(repo.get_by_id("m1").await.unwrap().is_some());
        assert!(repo.get_address("f1a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn shared_params_missing_until_set() {
        let repo = InMemoryRepo::new();
        assert!(repo.get_shared_params().await.is_err());
        repo.set_shared_params(params()).await.unwrap();
        assert_eq!(repo.get_shared_params().await.unwrap().sel_msg_num, 20);
    }
}
