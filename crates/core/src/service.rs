//! Outward API surface (§6): the operations a CLI or external integration
//! calls through the RPC façade. The façade itself (HTTP/JSON-RPC
//! transport, request parsing) is out of scope here; this module is the
//! typed surface the façade would dispatch to, plus the static
//! authorization classification each method carries — read/write/admin —
//! matching the confirmed map from the system this pipeline is modeled on.

use std::sync::Arc;

use cid::Cid;
use tracing::instrument;

use crate::address::Address;
use crate::cache::MessageCache;
use crate::message::{Message, MessageState};
use crate::orchestrator::Orchestrator;
use crate::repo_traits::Repo;
use crate::shared_params::SharedParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthClass {
    Read,
    Write,
    Admin,
}

/// Static authorization class for every method in [`MessagerService`]. Kept
/// as plain data (not a derive or attribute macro) so the façade can
/// consult it without depending on this crate's method bodies — mirrors
/// how the system this pipeline is modeled on keeps its auth map as a
/// standalone table rather than inline per-handler annotations.
pub fn auth_class(method: &str) -> Option<AuthClass> {
    use AuthClass::*;
    Some(match method {
        "push_message" | "push_message_with_id" => Write,

        "get_message_by_uid" | "get_message_by_cid" | "get_message_by_signed_cid" | "get_message_by_unsigned_cid"
        | "get_message_by_from_and_nonce" | "has_message_by_uid" | "wait_message" | "has_wallet_address" => Read,

        "list_message" | "list_message_by_address" | "list_failed_message" | "list_blocked_message"
        | "replace_message" | "republish_message" | "mark_bad_message" | "update_message_state_by_id"
        | "update_message_state_by_cid" | "update_filled_message_by_id" | "update_all_filled_message"
        | "upsert_wallet" | "upsert_address" | "remove_address" | "upsert_node" | "get_shared_params"
        | "set_shared_params" | "refresh_shared_params" => Admin,

        _ => return None,
    })
}

pub struct MessagerService {
    repo: Arc<dyn Repo>,
    cache: Arc<MessageCache>,
    orchestrator: Arc<Orchestrator>,
}

impl MessagerService {
    pub fn new(repo: Arc<dyn Repo>, cache: Arc<MessageCache>, orchestrator: Arc<Orchestrator>) -> Self {
        Self { repo, cache, orchestrator }
    }

    // --- write ---

    /// Accepts a new unsigned message, validating presence of `from`/`to`
    /// synchronously (§7 Validation errors are returned, never persisted).
    #[instrument(skip(self, msg))]
    pub async fn push_message(&self, msg: Message) -> anyhow::Result<String> {
        self.push_message_with_id(msg).await
    }

    #[instrument(skip(self, msg))]
    pub async fn push_message_with_id(&self, msg: Message) -> anyhow::Result<String> {
        if msg.id.is_empty() {
            anyhow::bail!("validation failed: empty id");
        }
        if msg.from.is_empty() || msg.to.is_empty() {
            anyhow::bail!("validation failed: from/to must not be empty");
        }
        let id = msg.id.clone();
        self.repo.put_message(msg.clone()).await?;
        self.cache.upsert(msg);
        Ok(id)
    }

    // --- read ---

    pub async fn get_message_by_uid(&self, id: &str) -> anyhow::Result<Option<Message>> {
        if let Some(m) = self.cache.get(id) {
            return Ok(Some(m));
        }
        self.repo.get_by_id(id).await
    }

    pub async fn get_message_by_cid(&self, cid: &Cid) -> anyhow::Result<Option<Message>> {
        if let Some(m) = self.cache.get_by_unsigned_cid(cid) {
            return Ok(Some(m));
        }
        self.repo.get_by_unsigned_cid(cid).await
    }

    pub async fn get_message_by_signed_cid(&self, cid: &Cid) -> anyhow::Result<Option<Message>> {
        if let Some(m) = self.cache.get_by_signed_cid(cid) {
            return Ok(Some(m));
        }
        self.repo.get_by_signed_cid(cid).await
    }

    pub async fn get_message_by_unsigned_cid(&self, cid: &Cid) -> anyhow::Result<Option<Message>> {
        self.get_message_by_cid(cid).await
    }

    pub async fn get_message_by_from_and_nonce(&self, from: &str, nonce: u64) -> anyhow::Result<Option<Message>> {
        self.repo.get_by_from_nonce(from, nonce).await
    }

    pub async fn has_message_by_uid(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.get_message_by_uid(id).await?.is_some())
    }

    /// Polls the repository until `id` reaches a terminal state
    /// (`OnChainMsg`, `FailedMsg`, `ReplacedMsg`) or `timeout` elapses.
    #[instrument(skip(self))]
    pub async fn wait_message(&self, id: &str, timeout: std::time::Duration) -> anyhow::Result<Option<Message>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(m) = self.get_message_by_uid(id).await? {
                if matches!(m.state, MessageState::OnChainMsg | MessageState::FailedMsg | MessageState::ReplacedMsg) {
                    return Ok(Some(m));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    }

    // --- admin: queries ---

    pub async fn list_message(&self) -> anyhow::Result<Vec<Message>> {
        let mut all = Vec::new();
        for state in [
            MessageState::UnFillMsg,
            MessageState::FillMsg,
            MessageState::OnChainMsg,
            MessageState::FailedMsg,
            MessageState::ReplacedMsg,
            MessageState::NoWalletMsg,
        ] {
            all.extend(self.repo.list_by_state(state).await?);
        }
        Ok(all)
    }

    pub async fn list_message_by_address(&self, addr: &str) -> anyhow::Result<Vec<Message>> {
        self.repo.list_by_address(addr).await
    }

    pub async fn list_failed_message(&self) -> anyhow::Result<Vec<Message>> {
        self.repo.list_by_state(MessageState::FailedMsg).await
    }

    pub async fn list_blocked_message(&self) -> anyhow::Result<Vec<Message>> {
        self.repo.list_by_state(MessageState::NoWalletMsg).await
    }

    // --- admin: mutations ---

    #[instrument(skip(self))]
    pub async fn replace_message(
        &self,
        id: &str,
        auto: bool,
        max_fee: u128,
        gas_limit: i64,
        gas_premium: u128,
        gas_fee_cap: u128,
    ) -> anyhow::Result<Cid> {
        self.orchestrator.replace_message(id, auto, max_fee, gas_limit, gas_premium, gas_fee_cap).await
    }

    #[instrument(skip(self))]
    pub async fn republish_message(&self, id: &str, signed: &messager_chain::SignedMessage) -> anyhow::Result<Cid> {
        self.orchestrator.republish_message(id, signed).await
    }

    #[instrument(skip(self))]
    pub async fn mark_bad_message(&self, id: &str, reason: String) -> anyhow::Result<()> {
        let msg = self.repo.get_by_id(id).await?.ok_or_else(|| anyhow::anyhow!("message {id} not found"))?;
        self.orchestrator.mark_bad_message(msg, reason).await
    }

    pub async fn update_message_state_by_id(&self, id: &str, state: MessageState) -> anyhow::Result<()> {
        let mut msg = self.repo.get_by_id(id).await?.ok_or_else(|| anyhow::anyhow!("message {id} not found"))?;
        msg.state = state;
        self.repo.put_message(msg.clone()).await?;
        self.cache.upsert(msg);
        Ok(())
    }

    pub async fn update_message_state_by_cid(&self, cid: &Cid, state: MessageState) -> anyhow::Result<()> {
        let mut msg = self.repo.get_by_unsigned_cid(cid).await?.ok_or_else(|| anyhow::anyhow!("message with cid {cid} not found"))?;
        msg.state = state;
        self.repo.put_message(msg.clone()).await?;
        self.cache.upsert(msg);
        Ok(())
    }

    pub async fn update_filled_message_by_id(&self, id: &str) -> anyhow::Result<()> {
        self.update_message_state_by_id(id, MessageState::FillMsg).await
    }

    #[instrument(skip(self))]
    pub async fn update_all_filled_message(&self, addr: &str) -> anyhow::Result<usize> {
        self.orchestrator.update_all_filled_message(addr).await
    }

    pub async fn upsert_address(&self, addr: Address) -> anyhow::Result<()> {
        self.repo.put_address(addr).await
    }

    pub async fn remove_address(&self, addr: &str) -> anyhow::Result<()> {
        if let Some(mut a) = self.repo.get_address(addr).await? {
            a.is_deleted = true;
            self.repo.put_address(a).await?;
        }
        Ok(())
    }

    pub async fn get_shared_params(&self) -> anyhow::Result<SharedParams> {
        self.repo.get_shared_params().await
    }

    pub async fn set_shared_params(&self, params: SharedParams) -> anyhow::Result<()> {
        self.repo.set_shared_params(params).await
    }

    pub async fn refresh_shared_params(&self) -> anyhow::Result<SharedParams> {
        self.get_shared_params().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_map_matches_documented_classes() {
        assert_eq!(auth_class("push_message"), Some(AuthClass::Write));
        assert_eq!(auth_class("get_message_by_uid"), Some(AuthClass::Read));
        assert_eq!(auth_class("replace_message"), Some(AuthClass::Admin));
        assert_eq!(auth_class("update_all_filled_message"), Some(AuthClass::Admin));
        assert_eq!(auth_class("not_a_real_method"), None);
    }
}
