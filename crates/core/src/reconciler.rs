//! Head-change reconciliation (C7).
//!
//! Consumes [`messager_chain::HeadChange`] events from the node's
//! subscription, applies the revert phase then the apply phase, persists
//! the resulting message-state transitions in a single [`Repo::transaction`],
//! and updates the in-memory [`crate::cache::MessageCache`] and
//! [`crate::tipset_cache::TipsetCache`] to match. Also runs the ancestor
//! walk used on reconnect to reconstruct the revert/apply pair the node's
//! own notification stream didn't describe, and the ≥900-height-gap
//! fallback that skips straight to a full resync.

use std::sync::Arc;

use messager_chain::{NodeClient, TipSet};
use tracing::{debug, info, instrument, warn};

use crate::cache::MessageCache;
use crate::message::MessageState;
use crate::repo_traits::{Repo, TxWrites};
use crate::tipset_cache::TipsetCache;

pub struct Reconciler {
    repo: Arc<dyn Repo>,
    node: Arc<dyn NodeClient>,
    cache: Arc<MessageCache>,
    tipsets: Arc<TipsetCache>,
    look_back_limit: i64,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn Repo>,
        node: Arc<dyn NodeClient>,
        cache: Arc<MessageCache>,
        tipsets: Arc<TipsetCache>,
        look_back_limit: i64,
    ) -> Self {
        Self { repo, node, cache, tipsets, look_back_limit }
    }

    /// Processes one head-change event: revert phase first (oldest-applied
    /// messages affected by the reverted tipsets go back to `FillMsg` so the
    /// selector will re-push them), then the apply phase (messages found in
    /// the newly applied tipsets' parent-message list move to `OnChainMsg`,
    /// or to `ReplacedMsg` if a different message landed at the same nonce).
    #[instrument(skip(self, change))]
    pub async fn process_head_change(&self, change: &messager_chain::HeadChange) -> anyhow::Result<()> {
        if change.is_empty() {
            return Ok(());
        }

        let mut writes = TxWrites::new();

        for reverted in &change.revert {
            self.revert_tipset(reverted, &mut writes).await?;
        }
        for applied in &change.apply {
            self.apply_tipset(applied, &mut writes).await?;
        }

        self.repo.transaction(writes.clone()).await?;
        for m in &writes.messages {
            self.cache.upsert(m.clone());
        }

        if !change.apply.is_empty() {
            self.tipsets.apply(&change.apply)?;
        }

        info!(
            applied = change.apply.len(),
            reverted = change.revert.len(),
            messages_touched = writes.messages.len(),
            "reconciled head change"
        );
        Ok(())
    }

    async fn revert_tipset(&self, ts: &TipSet, writes: &mut TxWrites) -> anyhow::Result<()> {
        for block in &ts.blocks {
            let msgs = self.node.chain_get_parent_messages(block).await?;
            for unsigned in msgs {
                let cid = unsigned.cid()?;
                if let Some(mut m) = self.repo.get_by_unsigned_cid(&cid).await? {
                    if m.state == MessageState::OnChainMsg {
                        m.mark_reverted();
                        writes.messages.push(m);
                    }
                }
            }
        }
        Ok(())
    }

    /// Keys the lookup on `(from, nonce)` rather than the applied cid, so a
    /// message that landed on-chain with a *different* unsigned-cid at the
    /// nonce we were tracking is recognised as a replacement rather than
    /// silently skipped.
    async fn apply_tipset(&self, ts: &TipSet, writes: &mut TxWrites) -> anyhow::Result<()> {
        for block in &ts.blocks {
            let unsigned_msgs = self.node.chain_get_parent_messages(block).await?;
            let receipts = self.node.chain_get_parent_receipts(block).await?;

            // The node's own invariant: one receipt per parent message, in
            // the same order. A mismatch means the node response is
            // internally inconsistent and nothing downstream can be trusted.
            if unsigned_msgs.len() != receipts.len() {
                warn!(
                    block = %block,
                    messages = unsigned_msgs.len(),
                    receipts = receipts.len(),
                    "parent message/receipt count mismatch, skipping block"
                );
                continue;
            }

            for (unsigned, receipt) in unsigned_msgs.into_iter().zip(receipts.into_iter()) {
                let cid = unsigned.cid()?;
                let Some(mut m) = self.repo.get_by_from_nonce(&unsigned.from, unsigned.nonce).await? else {
                    debug!(from = %unsigned.from, nonce = unsigned.nonce, "on-chain message sent outside the messager, skipping");
                    continue;
                };

                if m.unsigned_cid != Some(cid) {
                    m.mark_replaced(cid, receipt, ts.height, ts.key.clone());
                } else {
                    m.mark_on_chain(receipt, ts.height, ts.key.clone());
                }
                writes.messages.push(m);
            }
        }
        Ok(())
    }

    /// Reconnect / gap handling (§4.2 ancestor walk).
    ///
    /// `incoming` is the raw apply list as freshly reported by the node
    /// (e.g. the lone current tipset a `ChainNotify` subscription delivers
    /// right after connecting). This crate's own `HeadChange::apply`
    /// convention elsewhere is ascending by height (oldest first, current
    /// head last — see `main`'s use of `apply.last()` as "the new head"),
    /// so the walk's base point is `incoming.first()`: the oldest tipset in
    /// the freshly reported range, the one whose parent chain needs tracing
    /// back to a point our local tipset cache already knows about.
    ///
    /// Returns `Ok(Some(change))` with a synthetic `HeadChange` ready for
    /// [`Self::process_head_change`] once a common ancestor is found or the
    /// local tipset list is empty/already matches. Returns `Ok(None)` if the
    /// gap to the local head exceeds `look_back_limit`: the caller should
    /// give up on reconstructing history and run a full resync instead
    /// (`Orchestrator::update_all_filled_message`).
    pub async fn process_new_head(&self, incoming: Vec<TipSet>) -> anyhow::Result<Option<messager_chain::HeadChange>> {
        let Some(base) = incoming.first().cloned() else {
            return Ok(Some(messager_chain::HeadChange { apply: incoming, revert: Vec::new() }));
        };

        let local = self.tipsets.sorted_descending();
        let Some(local_newest) = local.first() else {
            return Ok(Some(messager_chain::HeadChange { apply: incoming, revert: Vec::new() }));
        };

        if base.parents == local_newest.key {
            return Ok(Some(messager_chain::HeadChange { apply: incoming, revert: Vec::new() }));
        }

        if exceeds_look_back_gap(local_newest.height, base.height, self.look_back_limit) {
            return Ok(None);
        }

        let mut idx = 0usize;
        let mut ts = base;
        let mut gap_apply = Vec::new();
        let mut hops = 0i64;

        loop {
            if idx >= local.len() || hops > self.look_back_limit {
                break;
            }
            match local[idx].height.cmp(&ts.height) {
                std::cmp::Ordering::Greater => idx += 1,
                std::cmp::Ordering::Equal => {
                    if local[idx].key == ts.key {
                        break;
                    }
                    idx += 1;
                }
                std::cmp::Ordering::Less => {
                    gap_apply.push(ts.clone());
                    ts = self.node.chain_get_tipset(&ts.parents).await?;
                    hops += 1;
                }
            }
        }

        let revert = local[0..idx].to_vec();
        let mut apply = gap_apply;
        apply.reverse();
        apply.extend(incoming);

        Ok(Some(messager_chain::HeadChange { apply, revert }))
    }

    /// True once the gap between the chain head and a message's last known
    /// height exceeds the reorg look-back window; the caller should stop
    /// walking ancestors and run a full state resync instead.
    pub fn exceeds_look_back(&self, head_height: i64, message_height: i64) -> bool {
        exceeds_look_back_gap(head_height, message_height, self.look_back_limit)
    }
}

/// Pure form of [`Reconciler::exceeds_look_back`], factored out so the
/// boundary condition can be tested without constructing a `Reconciler`.
fn exceeds_look_back_gap(head_height: i64, message_height: i64, limit: i64) -> bool {
    head_height.saturating_sub(message_height) >= limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_back_threshold_is_inclusive_at_bound() {
        assert!(exceeds_look_back_gap(1000, 100, 900));
        assert!(!exceeds_look_back_gap(999, 100, 900));
    }

    #[test]
    fn look_back_threshold_handles_zero_gap() {
        assert!(!exceeds_look_back_gap(500, 500, 900));
    }
}
