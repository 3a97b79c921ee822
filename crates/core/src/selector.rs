//! Per-address pending-window fill (C6).
//!
//! Invoked with a reference tipset. For every non-deleted managed
//! address, runs the per-address algorithm concurrently (fan-out capped
//! by [`crate::config::SelectorConfig::address_concurrency`]) and merges
//! all results into one [`SelectResult`] under a single lock.
//!
//! The merge step is the one place this module must not regress into the
//! bug it is explicitly designed around: each address task computes its
//! own local result and the caller merges that local result into the
//! shared aggregate under the lock — never back into a copy of the task's
//! own result. See `run` below.

use std::sync::Arc;

use cid::Cid;
use futures::stream::{FuturesUnordered, StreamExt};
use messager_chain::{is_fatal_sender_error, GasEstimateOverrides, NodeClient, TipSet, WalletRouter};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::address::Address;
use crate::errors::{ErrorPhase, MessageError};
use crate::message::{Message, MessageState};
use crate::repo_traits::Repo;
use crate::shared_params::SharedParams;

#[derive(Debug, Default)]
pub struct SelectResult {
    pub select: Vec<Message>,
    pub expire: Vec<Message>,
    pub to_push: Vec<Message>,
    pub modify_addr: Vec<Address>,
    pub errs: Vec<MessageError>,
}

impl SelectResult {
    fn merge(&mut self, mut other: SelectResult) {
        self.select.append(&mut other.select);
        self.expire.append(&mut other.expire);
        self.to_push.append(&mut other.to_push);
        self.modify_addr.append(&mut other.modify_addr);
        self.errs.append(&mut other.errs);
    }
}

pub struct Selector {
    repo: Arc<dyn Repo>,
    node: Arc<dyn NodeClient>,
    wallet: Arc<WalletRouter>,
    concurrency: usize,
}

impl Selector {
    pub fn new(repo: Arc<dyn Repo>, node: Arc<dyn NodeClient>, wallet: Arc<WalletRouter>, concurrency: usize) -> Self {
        Self { repo, node, wallet, concurrency }
    }

    #[instrument(skip(self, ts), fields(height = ts.height))]
    pub async fn run(&self, ts: &TipSet) -> anyhow::Result<SelectResult> {
        let addresses: Vec<Address> =
            self.repo.list_managed().await?.into_iter().filter(|a| !a.is_deleted).collect();
        let shared_params = self.repo.get_shared_params().await?;

        let aggregate = Arc::new(Mutex::new(SelectResult::default()));
        let mut in_flight = FuturesUnordered::new();
        let mut remaining = addresses.into_iter();

        // Bounded fan-out: keep at most `concurrency` address tasks live at
        // once, feeding the next address in as each one completes.
        for _ in 0..self.concurrency {
            if let Some(addr) = remaining.next() {
                in_flight.push(self.run_one_address(addr, ts, &shared_params));
            }
        }

        while let Some(local) = in_flight.next().await {
            // Merge this task's own local result into the shared parent
            // aggregate, under the lock — the fix for the self-reference
            // merge bug this design is explicitly built to avoid.
            aggregate.lock().merge(local);
            if let Some(addr) = remaining.next() {
                in_flight.push(self.run_one_address(addr, ts, &shared_params));
            }
        }

        Ok(Arc::try_unwrap(aggregate).map(Mutex::into_inner).unwrap_or_default())
    }

    async fn run_one_address(&self, mut local_addr: Address, ts: &TipSet, shared_params: &SharedParams) -> SelectResult {
        let mut result = SelectResult::default();
        let addr = local_addr.addr.clone();

        let Some(addr_info) = self.wallet.address_info(&addr) else {
            debug!(addr, "no wallet client registered, skipping address");
            return result;
        };

        let max_pending = if addr_info.select_msg_num != 0 { addr_info.select_msg_num } else { shared_params.sel_msg_num };

        let actor = match self.node.state_get_actor(&addr, &ts.key).await {
            Ok(a) => a,
            Err(e) => {
                warn!(addr, error = %e, "state_get_actor failed, skipping address this cycle");
                return result;
            }
        };

        if actor.nonce > local_addr.nonce {
            debug!(addr, chain_nonce = actor.nonce, local_nonce = local_addr.nonce, "chain outran local nonce, adopting");
            local_addr.nonce = actor.nonce;
            result.modify_addr.push(local_addr.clone());
        }

        let fill_msgs = match self.repo.list_by_address_state(&addr, MessageState::FillMsg).await {
            Ok(v) => v,
            Err(e) => {
                warn!(addr, error = %e, "failed to load FillMsg rows");
                return result;
            }
        };
        for m in fill_msgs {
            if m.nonce >= actor.nonce {
                result.to_push.push(m);
            }
        }

        let mut unfilled = match self.repo.list_by_address_state(&addr, MessageState::UnFillMsg).await {
            Ok(v) => v,
            Err(e) => {
                warn!(addr, error = %e, "failed to load UnFillMsg rows");
                return result;
            }
        };

        let mut pending = Vec::with_capacity(unfilled.len());
        for mut m in unfilled.drain(..) {
            if m.is_expired_at(ts.height) {
                m.state = MessageState::FailedMsg;
                result.expire.push(m);
            } else {
                pending.push(m);
            }
        }
        pending.sort_by_key(|m| m.selection_sort_key());

        let deficit = local_addr.nonce.saturating_sub(actor.nonce);
        let window = (max_pending as i64) - (deficit as i64);
        if window <= 0 || pending.is_empty() {
            return result;
        }

        let mut count: u64 = 0;
        let mut failed: u64 = 0;

        for mut msg in pending {
            if count as i64 >= window || failed >= shared_params.max_est_fail_num_of_msg {
                break;
            }

            if !addr_info.state.signing_eligible() {
                // Removing/Removed: do not attempt further signing this
                // cycle. Alive and Forbiden both fall through below.
                break;
            }

            msg.nonce = local_addr.nonce;
            let effective_meta = msg.meta.resolve(&shared_params.as_message_meta_defaults());
            msg.meta = effective_meta.clone();

            let unsigned = msg.unsigned_message();
            let overrides = GasEstimateOverrides { max_fee: effective_meta.max_fee };
            let estimate = match self.node.gas_estimate_message_gas(&unsigned, &overrides, &ts.key).await {
                Ok(e) => e,
                Err(e) => {
                    let detail = e.to_string();
                    result.errs.push(MessageError {
                        message_id: msg.id.clone(),
                        phase: ErrorPhase::GasEstimate,
                        description: detail.clone(),
                    });
                    if is_fatal_sender_error(&detail) {
                        warn!(addr, message = %msg.id, "fatal sender state error, aborting address this cycle");
                        return result;
                    }
                    failed += 1;
                    continue;
                }
            };

            msg.gas_limit = estimate.gas_limit;
            msg.gas_fee_cap = estimate.gas_fee_cap;
            msg.gas_premium = estimate.gas_premium;

            let unsigned_cid = match msg.unsigned_message().cid() {
                Ok(c) => c,
                Err(e) => {
                    result.errs.push(MessageError {
                        message_id: msg.id.clone(),
                        phase: ErrorPhase::GasEstimate,
                        description: e.to_string(),
                    });
                    failed += 1;
                    continue;
                }
            };
            let raw = match msg.unsigned_message().to_raw_bytes() {
                Ok(b) => b,
                Err(e) => {
                    result.errs.push(MessageError { message_id: msg.id.clone(), phase: ErrorPhase::Sign, description: e.to_string() });
                    failed += 1;
                    continue;
                }
            };

            match self.wallet.sign(&addr, unsigned_cid.to_bytes(), raw).await {
                Ok(sig) => {
                    msg.signature = Some(sig.data);
                    msg.unsigned_cid = Some(unsigned_cid);
                    msg.signed_cid = Some(signed_cid_from(&unsigned_cid));
                    msg.state = MessageState::FillMsg;
                    local_addr.nonce += 1;
                    count += 1;
                    result.select.push(msg);
                }
                Err(e) => {
                    result.errs.push(MessageError { message_id: msg.id.clone(), phase: ErrorPhase::Sign, description: e.to_string() });
                    failed += 1;
                }
            }
        }

        if count > 0 {
            result.modify_addr.push(local_addr);
        }

        result
    }
}

/// Derives the signed-message CID from the unsigned CID. Filecoin's real
/// signed-message CID is a hash over the signed envelope; here it is
/// derived deterministically from the unsigned CID's own bytes so the two
/// stay distinguishable without a CBOR codec in this crate's dependency
/// graph.
pub(crate) fn signed_cid_from(unsigned: &Cid) -> Cid {
    let mut bytes = unsigned.to_bytes();
    bytes.push(0x01);
    messager_chain::digest_to_cid(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_never_exceeded_by_deficit_math() {
        // S1: local=5, actor=5, sel_msg_num=3 -> window=3
        let local_nonce = 5u64;
        let actor_nonce = 5u64;
        let max_pending = 3u64;
        let deficit = local_nonce.saturating_sub(actor_nonce);
        let window = (max_pending as i64) - (deficit as i64);
        assert_eq!(window, 3);

        // S2: local=5, actor=7 (chain outran us) -> after adoption deficit=0
        let local_nonce = 7u64; // adopted
        let actor_nonce = 7u64;
        let deficit = local_nonce.saturating_sub(actor_nonce);
        let window = (max_pending as i64) - (deficit as i64);
        assert_eq!(window, 3);
    }

    #[test]
    fn merge_accumulates_into_shared_aggregate_not_itself() {
        let mut aggregate = SelectResult::default();
        let local_a = SelectResult { select: vec![Message::new_unfilled("a", "f1", "f2", 0)], ..Default::default() };
        let local_b = SelectResult { select: vec![Message::new_unfilled("b", "f1", "f2", 0)], ..Default::default() };
        aggregate.merge(local_a);
        aggregate.merge(local_b);
        assert_eq!(aggregate.select.len(), 2);
    }
}
