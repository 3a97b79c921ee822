//! The central `Message` entity and its state machine.

use cid::Cid;
use messager_chain::{MessageReceipt, TipSetKey, UnsignedMessage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
    UnFillMsg,
    FillMsg,
    OnChainMsg,
    FailedMsg,
    ReplacedMsg,
    NoWalletMsg,
}

/// Per-message overrides of the shared-params defaults. A zero value means
/// "fall back to shared params"; `0` for `expire_epoch` additionally means
/// "never expires" and must sort before any positive epoch (see
/// [`effective_expire_epoch`] and the selector's ordering).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMeta {
    pub expire_epoch: i64,
    pub gas_over_estimation: f64,
    pub max_fee: u128,
    pub max_fee_cap: u128,
}

impl MessageMeta {
    /// Fills zero-valued fields from the shared-params defaults, producing
    /// the effective meta used for gas estimation and expiry checks.
    pub fn resolve(&self, defaults: &crate::config::SharedParamsConfig) -> MessageMeta {
        MessageMeta {
            expire_epoch: if self.expire_epoch != 0 { self.expire_epoch } else { defaults.expire_epoch },
            gas_over_estimation: if self.gas_over_estimation != 0.0 {
                self.gas_over_estimation
            } else {
                defaults.gas_over_estimation
            },
            max_fee: if self.max_fee != 0 { self.max_fee } else { defaults.max_fee },
            max_fee_cap: if self.max_fee_cap != 0 { self.max_fee_cap } else { defaults.max_fee_cap },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub value: u128,
    pub method: u64,
    pub params: Vec<u8>,

    pub nonce: u64,
    pub gas_limit: i64,
    pub gas_fee_cap: u128,
    pub gas_premium: u128,

    pub signature: Option<Vec<u8>>,
    pub unsigned_cid: Option<Cid>,
    pub signed_cid: Option<Cid>,

    pub state: MessageState,
    pub meta: MessageMeta,
    pub wallet_name: String,

    pub receipt: Option<MessageReceipt>,
    pub height: i64,
    pub tipset_key: Option<TipSetKey>,
    pub confidence: i64,

    pub return_value: Option<String>,
}

impl Message {
    pub fn new_unfilled(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>, value: u128) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            value,
            method: 0,
            params: Vec::new(),
            nonce: 0,
            gas_limit: 0,
            gas_fee_cap: 0,
            gas_premium: 0,
            signature: None,
            unsigned_cid: None,
            signed_cid: None,
            state: MessageState::UnFillMsg,
            meta: MessageMeta::default(),
            wallet_name: String::new(),
            receipt: None,
            height: 0,
            tipset_key: None,
            confidence: 0,
            return_value: None,
        }
    }

    pub fn unsigned_message(&self) -> UnsignedMessage {
        UnsignedMessage {
            from: self.from.clone(),
            to: self.to.clone(),
            nonce: self.nonce,
            value: self.value,
            method: self.method,
            params: self.params.clone(),
            gas_limit: self.gas_limit,
            gas_fee_cap: self.gas_fee_cap,
            gas_premium: self.gas_premium,
        }
    }

    /// `expire_epoch = 0` means "never expires"; it must compare as less
    /// than any positive epoch under selection ordering, not as "already
    /// expired". This is a deliberately preserved quirk, not an oversight.
    pub fn is_expired_at(&self, height: i64) -> bool {
        self.meta.expire_epoch != 0 && self.meta.expire_epoch <= height
    }

    /// Sort key for pending-message selection priority: earliest-expiring
    /// first, with `0` (never expires) sorting as the minimum.
    pub fn selection_sort_key(&self) -> i64 {
        self.meta.expire_epoch
    }

    pub fn mark_replaced(&mut self, new_unsigned_cid: Cid, receipt: MessageReceipt, height: i64, tipset_key: TipSetKey) {
        self.unsigned_cid = Some(new_unsigned_cid);
        self.signed_cid = Some(new_unsigned_cid);
        self.receipt = Some(receipt);
        self.height = height;
        self.tipset_key = Some(tipset_key);
        self.state = MessageState::ReplacedMsg;
    }

    pub fn mark_on_chain(&mut self, receipt: MessageReceipt, height: i64, tipset_key: TipSetKey) {
        self.receipt = Some(receipt);
        self.height = height;
        self.tipset_key = Some(tipset_key);
        self.state = MessageState::OnChainMsg;
    }

    pub fn mark_reverted(&mut self) {
        self.state = MessageState::FillMsg;
        self.receipt = Some(MessageReceipt::reverted());
        self.height = 0;
        self.tipset_key = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_expire_epoch_never_expires() {
        let mut m = Message::new_unfilled("m1", "f1a", "f1b", 0);
        m.meta.expire_epoch = 0;
        assert!(!m.is_expired_at(i64::MAX));
    }

    #[test]
    fn positive_expire_epoch_expires_at_or_after() {
        let mut m = Message::new_unfilled("m1", "f1a", "f1b", 0);
        m.meta.expire_epoch = 100;
        assert!(!m.is_expired_at(99));
        assert!(m.is_expired_at(100));
        assert!(m.is_expired_at(101));
    }

    #[test]
    fn never_expiring_sorts_before_any_positive_epoch() {
        let mut never = Message::new_unfilled("a", "f1a", "f1b", 0);
        never.meta.expire_epoch = 0;
        let mut soon = Message::new_unfilled("b", "f1a", "f1b", 0);
        soon.meta.expire_epoch = 1;
        let mut msgs = vec![soon.clone(), never.clone()];
        msgs.sort_by_key(|m| m.selection_sort_key());
        assert_eq!(msgs[0].id, never.id);
        assert_eq!(msgs[1].id, soon.id);
    }
}
