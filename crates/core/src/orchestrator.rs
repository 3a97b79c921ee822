//! Push orchestration (C8): gets signed messages from the selector onto the
//! chain's mempool, across one or more nodes, and handles the operator-
//! triggered message lifecycle actions (replace, republish, mark-bad).
//!
//! Instrumentation and retry-classification style are grounded on the
//! teacher's staged-execution/backoff pattern: classify the failure once,
//! retry only what is retryable, and never swallow a fatal error into a
//! generic retry loop.

use std::sync::Arc;
use std::time::Duration;

use cid::Cid;
use messager_chain::{classify_push_error, GasEstimateOverrides, NodeClient, PushOutcome, SignedMessage, TipSet, WalletRouter};
use rand::seq::SliceRandom;
use tracing::{instrument, warn};

use crate::cache::MessageCache;
use crate::message::{Message, MessageState};
use crate::repo_traits::{Repo, TxWrites};
use crate::selector::{signed_cid_from, SelectResult, Selector};

const MAX_PUSH_ATTEMPTS: u32 = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct Orchestrator {
    repo: Arc<dyn Repo>,
    nodes: Vec<Arc<dyn NodeClient>>,
    selector: Arc<Selector>,
    wallet: Arc<WalletRouter>,
    cache: Arc<MessageCache>,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn Repo>,
        nodes: Vec<Arc<dyn NodeClient>>,
        selector: Arc<Selector>,
        wallet: Arc<WalletRouter>,
        cache: Arc<MessageCache>,
    ) -> Self {
        Self { repo, nodes, selector, wallet, cache }
    }

    /// §4.3(a) `pushMessageToPool`: runs one selector cycle for `ts`,
    /// persists everything it produced (expired messages, newly selected
    /// messages, addresses whose nonce advanced, and per-message error
    /// text) in a single repository transaction, mirrors the persisted
    /// messages into the cache, then pushes every selected and
    /// still-outstanding message to the primary node and fans it out to
    /// the configured secondaries.
    #[instrument(skip(self, ts), fields(height = ts.height))]
    pub async fn push_message_to_pool(&self, ts: &TipSet) -> anyhow::Result<SelectResult> {
        let result = self.selector.run(ts).await?;

        let mut writes = TxWrites::new();
        writes.messages.extend(result.select.iter().cloned());
        writes.messages.extend(result.expire.iter().cloned());
        writes.addresses.extend(result.modify_addr.iter().cloned());

        for err in &result.errs {
            if let Some(mut m) = self.repo.get_by_id(&err.message_id).await? {
                m.return_value = Some(format!("{:?}: {}", err.phase, err.description));
                writes.messages.push(m);
            }
        }

        self.repo.transaction(writes.clone()).await?;
        for m in &writes.messages {
            self.cache.upsert(m.clone());
        }

        for msg in result.select.iter().chain(result.to_push.iter()) {
            let signed = SignedMessage { message: msg.unsigned_message(), signature: msg.signature.clone().unwrap_or_default() };
            if let Err(e) = self.multi_node_push(&msg.id, &signed).await {
                warn!(message_id = %msg.id, error = %e, "push failed");
            }
        }

        Ok(result)
    }

    /// Pushes one signed message to a single node's mempool, retrying
    /// transient failures with exponential backoff. "Already in mpool" is
    /// treated as success, not an error: the node already holds exactly
    /// what we wanted it to hold.
    #[instrument(skip(self, signed, node), fields(message_id = %msg_id))]
    async fn push_to_node_with_retry(&self, msg_id: &str, signed: &SignedMessage, node: &dyn NodeClient) -> anyhow::Result<Cid> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match node.mpool_push(signed).await {
                Ok(cid) => return Ok(cid),
                Err(e) => {
                    let detail = e.to_string();
                    if let Ok(PushOutcome::AlreadyInMpool) = classify_push_error(&detail) {
                        return signed.message.cid();
                    }
                    if attempt >= MAX_PUSH_ATTEMPTS {
                        return Err(e);
                    }
                    warn!(message_id = msg_id, attempt, error = %detail, "push failed, retrying");
                    tokio::time::sleep(BASE_RETRY_DELAY * (1 << (attempt - 1).min(3))).await;
                }
            }
        }
    }

    /// Shuffles the configured node set and pushes to each in turn, stopping
    /// at the first success (or the first non-recoverable failure). Spreads
    /// load and avoids every selector cycle hammering the same node first.
    #[instrument(skip(self, signed), fields(message_id = %msg_id))]
    pub async fn multi_node_push(&self, msg_id: &str, signed: &SignedMessage) -> anyhow::Result<Cid> {
        if self.nodes.is_empty() {
            anyhow::bail!("no node clients configured");
        }
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.shuffle(&mut rand::thread_rng());

        let mut last_err = None;
        for idx in order {
            match self.push_to_node_with_retry(msg_id, signed, self.nodes[idx].as_ref()).await {
                Ok(cid) => return Ok(cid),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("all nodes failed")))
    }

    /// §4.3(d) `UpdateAllFilledMessage`: for every `FillMsg` row belonging to
    /// `addr`, asks the primary node whether its signed cid has actually
    /// landed on chain, and transitions the ones that have to `OnChainMsg`.
    /// Returns the number of messages transitioned — zero, and idempotent,
    /// when nothing new confirmed since the last call.
    #[instrument(skip(self))]
    pub async fn update_all_filled_message(&self, addr: &str) -> anyhow::Result<usize> {
        let node = self.nodes.first().ok_or_else(|| anyhow::anyhow!("no node clients configured"))?;
        let msgs = self.repo.list_by_address_state(addr, MessageState::FillMsg).await?;

        let mut transitioned = 0usize;
        for mut msg in msgs {
            let Some(signed_cid) = msg.signed_cid else { continue };
            if let Some(lookup) = node.state_search_msg(&signed_cid).await? {
                msg.mark_on_chain(lookup.receipt, lookup.height, lookup.tipset);
                self.repo.put_message(msg.clone()).await?;
                self.cache.upsert(msg);
                transitioned += 1;
            }
        }
        Ok(transitioned)
    }

    /// Flags a message as permanently failed (operator action or exhausted
    /// retries); it will not be re-selected or re-pushed.
    #[instrument(skip(self, msg, reason))]
    pub async fn mark_bad_message(&self, mut msg: Message, reason: impl Into<String>) -> anyhow::Result<()> {
        msg.state = MessageState::FailedMsg;
        msg.return_value = Some(reason.into());
        self.repo.put_message(msg).await
    }

    /// Republishes an already-signed, already-pushed message without
    /// changing its nonce or fee — used when an operator suspects the
    /// mempool entry was dropped by the node without a corresponding
    /// revert.
    #[instrument(skip(self, signed), fields(message_id = %msg_id))]
    pub async fn republish_message(&self, msg_id: &str, signed: &SignedMessage) -> anyhow::Result<Cid> {
        self.multi_node_push(msg_id, signed).await
    }

    /// §4.3(c) `ReplaceMessage`: requires `id` exists and is not already
    /// `OnChainMsg`. With `auto`, re-estimates gas against the current
    /// chain head and bumps `gas_premium`/`gas_fee_cap` by at least
    /// [`min_rbf`], capped by the effective max-fee; without `auto`, applies
    /// the caller's explicit overrides (a zero value leaves the field
    /// unchanged). Either way, re-signs via the wallet router, persists the
    /// result at `FillMsg`, and `mpool_batch_push`es it.
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
        let old = self.repo.get_by_id(id).await?.ok_or_else(|| anyhow::anyhow!("message {id} not found"))?;
        if old.state == MessageState::OnChainMsg {
            anyhow::bail!("message {id} is already on chain, cannot replace");
        }

        let mut replaced = old.clone();
        replaced.signature = None;
        replaced.unsigned_cid = None;
        replaced.signed_cid = None;

        let effective_max_fee = if max_fee != 0 { max_fee } else { old.meta.max_fee };

        if auto {
            let node = self.nodes.first().ok_or_else(|| anyhow::anyhow!("no node clients configured"))?;
            let head = node.chain_head().await?;
            let overrides = GasEstimateOverrides { max_fee: effective_max_fee };
            let estimate = node.gas_estimate_message_gas(&replaced.unsigned_message(), &overrides, &head.key).await?;

            let (premium, fee_cap) =
                auto_replace_fees(old.gas_premium, estimate.gas_premium, estimate.gas_fee_cap, effective_max_fee);
            replaced.gas_limit = estimate.gas_limit;
            replaced.gas_premium = premium;
            replaced.gas_fee_cap = fee_cap;
        } else {
            if gas_limit != 0 {
                replaced.gas_limit = gas_limit;
            }
            if gas_premium != 0 {
                replaced.gas_premium = gas_premium;
            }
            if gas_fee_cap != 0 {
                replaced.gas_fee_cap = gas_fee_cap;
            }
        }

        let unsigned_cid = replaced.unsigned_message().cid()?;
        let raw = replaced.unsigned_message().to_raw_bytes()?;
        let sig = self.wallet.sign(&replaced.from, unsigned_cid.to_bytes(), raw).await?;

        replaced.signature = Some(sig.data);
        replaced.unsigned_cid = Some(unsigned_cid);
        replaced.signed_cid = Some(signed_cid_from(&unsigned_cid));
        replaced.state = MessageState::FillMsg;

        self.repo.put_message(replaced.clone()).await?;
        self.cache.upsert(replaced.clone());

        let signed =
            SignedMessage { message: replaced.unsigned_message(), signature: replaced.signature.clone().unwrap_or_default() };
        if let Some(node) = self.nodes.first() {
            node.mpool_batch_push(std::slice::from_ref(&signed)).await?;
        }

        Ok(replaced.signed_cid.expect("just set above"))
    }
}

/// `ceil(x/10) + 1` replacement-bump formula: the minimum a fee must
/// increase by for the node to accept a replace-by-fee on an existing
/// nonce.
pub fn min_rbf(x: u128) -> u128 {
    x + (x + 9) / 10 + 1
}

/// Pure core of the `auto` path of [`Orchestrator::replace_message`]:
/// `gas_premium = max(estimated premium, min_rbf(old premium))`,
/// `gas_fee_cap = max(estimated fee cap, bumped premium)`, both capped by
/// the effective max-fee when one is set. Factored out so the bump/cap
/// arithmetic is testable without a node or wallet.
fn auto_replace_fees(old_premium: u128, est_premium: u128, est_fee_cap: u128, max_fee: u128) -> (u128, u128) {
    let premium = est_premium.max(min_rbf(old_premium));
    let mut fee_cap = est_fee_cap.max(premium);
    let mut premium = premium;
    if max_fee != 0 {
        fee_cap = fee_cap.min(max_fee);
        premium = premium.min(fee_cap);
    }
    (premium, fee_cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_rbf_matches_formula() {
        assert_eq!(min_rbf(100), 111);
        assert_eq!(min_rbf(0), 1);
        assert_eq!(min_rbf(9), 11);
        assert_eq!(min_rbf(10), 12);
    }

    #[test]
    fn auto_replace_bumps_at_least_min_rbf() {
        // Estimate came back lower than the mandatory bump: min_rbf wins.
        let (premium, fee_cap) = auto_replace_fees(100, 50, 50, 0);
        assert_eq!(premium, min_rbf(100));
        assert_eq!(fee_cap, min_rbf(100));
    }

    #[test]
    fn auto_replace_prefers_higher_estimate() {
        let (premium, fee_cap) = auto_replace_fees(100, 200, 250, 0);
        assert_eq!(premium, 200);
        assert_eq!(fee_cap, 250);
    }

    #[test]
    fn auto_replace_caps_by_max_fee() {
        let (premium, fee_cap) = auto_replace_fees(100, 200, 500, 300);
        assert_eq!(fee_cap, 300);
        assert_eq!(premium, 300);
    }
}
