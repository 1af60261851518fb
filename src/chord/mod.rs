//! The Chord ring protocol.
//!
//! [ChordCore] holds the state every ring member keeps: its identity, the
//! keyspace it owns, a finger table, a successor list, and a predecessor
//! pointer. [Protocol] layers the ring operations on top, generic over the
//! stored value type so the plain string peer and the dispersal peer share
//! one implementation of lookups, joins, leaves, and stabilization.

mod peer;

pub use peer::ChordPeer;

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::common::finger_table::FingerTable;
use crate::common::messages::{
    raw_kvs, typed_kvs, Ack, JoinResponse, KvMap, NotifyResponse, Request,
};
use crate::common::successor_list::SuccessorList;
use crate::common::{Id, PeerInfo};
use crate::{rpc, Error, Result};

/// Ring state common to every kind of peer.
#[derive(Debug)]
pub(crate) struct ChordCore {
    pub(crate) id: Id,
    pub(crate) ip: Ipv4Addr,
    pub(crate) port: u16,
    pub(crate) num_succs: usize,
    min_key: RwLock<Id>,
    predecessor: RwLock<Option<PeerInfo>>,
    pub(crate) fingers: FingerTable,
    pub(crate) successors: SuccessorList,
}

impl ChordCore {
    pub fn new(ip: Ipv4Addr, port: u16, num_succs: usize) -> ChordCore {
        let id = Id::hash(&format!("{ip}:{port}"));
        let own = PeerInfo {
            id,
            min_key: id,
            ip,
            port,
        };

        ChordCore {
            id,
            ip,
            port,
            num_succs,
            min_key: RwLock::new(id),
            predecessor: RwLock::new(None),
            fingers: FingerTable::new(id, own),
            successors: SuccessorList::new(num_succs, id),
        }
    }

    pub fn min_key(&self) -> Id {
        *self.min_key.read().expect("min key lock poisoned")
    }

    pub fn set_min_key(&self, key: Id) {
        *self.min_key.write().expect("min key lock poisoned") = key;
    }

    pub fn predecessor(&self) -> Option<PeerInfo> {
        self.predecessor
            .read()
            .expect("predecessor lock poisoned")
            .clone()
    }

    pub fn set_predecessor(&self, peer: PeerInfo) {
        *self.predecessor.write().expect("predecessor lock poisoned") = Some(peer);
    }

    /// This peer owns the keys on the clockwise arc `[min_key, id]`.
    pub fn stored_locally(&self, key: Id) -> bool {
        key.in_between(self.min_key(), self.id, true)
    }

    /// This peer as other peers see it.
    pub fn to_peer_info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            min_key: self.min_key(),
            ip: self.ip,
            port: self.port,
        }
    }
}

/// Ring operations, provided for every peer that exposes a [ChordCore] and
/// the few hooks that depend on what it stores.
pub(crate) trait Protocol: Send + Sync + Sized + 'static {
    /// What this peer keeps in its database.
    type Value: Clone + Send + Sync + Serialize + DeserializeOwned + 'static;

    fn core(&self) -> &ChordCore;

    /// Ingest keys handed over by another peer during a notify or leave.
    fn absorb_keys(&self, keys: KvMap<Self::Value>) -> Result<()>;

    /// The keys this peer hands to its successor when it leaves.
    fn keys_to_transfer(&self) -> KvMap<Self::Value>;

    /// Handle the storage commands whose semantics differ per peer kind.
    fn dispatch_storage(&self, request: Request) -> Result<Value>;

    /// A new predecessor announced itself: cede the keyspace below its id
    /// and return whatever stored keys now belong to it.
    fn handle_notify_from_pred(&self, new_pred: &PeerInfo) -> Result<KvMap<Self::Value>> {
        let core = self.core();

        core.fingers.adjust(new_pred);
        core.set_predecessor(new_pred.clone());
        core.set_min_key(new_pred.id.add(1));

        if core.successors.is_empty() {
            let succs = self.get_n_successors(core.id.add(1), core.num_succs)?;
            core.successors.populate(succs);
        }

        Ok(KvMap::new())
    }

    // === Lookups ===

    /// Resolve the peer owning a key. Local ownership wins outright, even
    /// over finger entries claiming broader ranges; everything else is
    /// forwarded around the ring.
    fn get_successor(&self, key: Id) -> Result<PeerInfo> {
        let core = self.core();

        if core.stored_locally(key) {
            return Ok(core.to_peer_info());
        }

        self.forward(key, &Request::GetSucc { key })
    }

    fn get_predecessor(&self, key: Id) -> Result<PeerInfo> {
        let core = self.core();

        // A peer with no predecessor is alone on the ring.
        let Some(pred) = core.predecessor() else {
            return Ok(core.to_peer_info());
        };

        if core.stored_locally(key) {
            return Ok(pred);
        }

        // The successor list often resolves this in a single hop: if a
        // listed successor covers the key, its predecessor is the answer,
        // provided the two actually bracket the key.
        if let Some(succ) = core.successors.lookup(key, true) {
            if let Ok(pred_of_succ) = succ.get_pred() {
                if key.in_between(pred_of_succ.id, succ.id, true) {
                    return Ok(pred_of_succ);
                }
            }
        }

        self.forward(key, &Request::GetPred { key })
    }

    /// The `n` peers clockwise from a key, distinct by id. Shorter than `n`
    /// when the ring itself is.
    fn get_n_successors(&self, key: Id, n: usize) -> Result<Vec<PeerInfo>> {
        let mut successors = Vec::new();
        let mut seen = BTreeSet::new();
        let mut previous = key.sub(1);

        for _ in 0..n {
            let succ = self.get_successor(previous.add(1))?;
            if !seen.insert(succ.id) {
                break;
            }
            previous = succ.id;
            successors.push(succ);
        }

        Ok(successors)
    }

    fn get_n_predecessors(&self, key: Id, n: usize) -> Result<Vec<PeerInfo>> {
        let mut predecessors = Vec::new();
        let mut seen = BTreeSet::new();
        let mut previous = key;

        for _ in 0..n {
            let pred = self.get_predecessor(previous.sub(1))?;
            if !seen.insert(pred.id) {
                break;
            }
            previous = pred.id;
            predecessors.push(pred);
        }

        Ok(predecessors)
    }

    /// Pick the next hop for a key and send it the request.
    ///
    /// The finger table chooses first. A finger pointing back at this peer
    /// means a predecessor absorbed part of our keyspace when it joined, so
    /// the request goes there. A dead finger falls back to the successor
    /// list, then to the first successor, then fails outright to stop the
    /// request bouncing between stale peers forever.
    fn forward<Resp: DeserializeOwned>(&self, key: Id, request: &Request) -> Result<Resp> {
        let core = self.core();
        let mut target = core.fingers.lookup(key).ok_or(Error::LookupFailed)?;

        if target.id == core.id {
            match core.predecessor() {
                Some(pred) if pred.is_alive() => target = pred,
                _ => return Err(Error::LookupFailed),
            }
        } else if !target.is_alive() {
            if let Some(living) = core.successors.lookup_living(key) {
                target = living;
            } else if let Some(first) = core.successors.first().filter(|p| p.is_alive()) {
                target = first;
            } else {
                return Err(Error::LookupFailed);
            }
        }

        target.call(request)
    }

    // === Membership ===

    /// Enter the ring through a gateway peer: adopt the predecessor the
    /// gateway resolves for our id, build the finger table, and announce
    /// ourselves so keys and table entries move our way.
    fn join(&self, gateway_ip: Ipv4Addr, gateway_port: u16) -> Result<()> {
        let core = self.core();
        debug!(id = %core.id, %gateway_ip, gateway_port, "joining chord");

        let response: JoinResponse = rpc::client::call(
            SocketAddrV4::new(gateway_ip, gateway_port),
            &Request::Join {
                new_peer: core.to_peer_info(),
            },
        )?;

        core.set_predecessor(response.predecessor.clone());
        core.set_min_key(response.predecessor.id.add(1));

        self.populate_finger_table(true)?;

        let succ = core.fingers.nth_entry(0);
        if succ.id != core.id {
            self.notify(&succ)?;
        }

        // Worth the extra round trips only once lookups span enough peers.
        if core.num_succs > 10 {
            for pred in self.get_n_predecessors(core.id, core.num_succs)? {
                if pred.id != core.id {
                    let _ = self.notify(&pred);
                }
            }
            let succs = self.get_n_successors(core.id.add(1), core.num_succs)?;
            core.successors.populate(succs);
        }

        self.fix_other_fingers(core.id)?;
        Ok(())
    }

    fn join_handler(&self, new_peer: PeerInfo) -> Result<JoinResponse> {
        let core = self.core();
        let predecessor = self.get_predecessor(new_peer.id)?;

        // Adjusting our own tables here saves the stabilize cycles a round.
        core.fingers.adjust(&new_peer);
        core.successors.insert(new_peer);

        Ok(JoinResponse { predecessor })
    }

    fn notify(&self, peer: &PeerInfo) -> Result<()> {
        let response: NotifyResponse = peer.call(&Request::Notify {
            new_peer: self.core().to_peer_info(),
        })?;

        self.absorb_keys(typed_kvs(response.keys_to_absorb)?)
    }

    /// Classify the announcing peer: a rightful predecessor receives its
    /// share of our keys, a successor only lands in our tables, anything
    /// else at most refreshes fingers.
    fn notify_handler(&self, new_peer: PeerInfo) -> Result<NotifyResponse> {
        let core = self.core();
        debug!(id = %core.id, from = %new_peer.id, "received notify");

        if let Some(old_pred) = core.predecessor() {
            if !old_pred.is_alive() {
                // The announcer replaces a dead predecessor.
                let keys = self.handle_notify_from_pred(&new_peer)?;
                self.handle_pred_failure(&old_pred);
                return Ok(NotifyResponse {
                    keys_to_absorb: raw_kvs(&keys)?,
                });
            }
        }

        core.fingers.adjust(&new_peer);
        core.successors.insert(new_peer.clone());

        let is_pred = match core.predecessor() {
            None => true,
            Some(pred) => new_peer.id.in_between(pred.id, core.id, false),
        };

        if is_pred {
            let keys = self.handle_notify_from_pred(&new_peer)?;
            return Ok(NotifyResponse {
                keys_to_absorb: raw_kvs(&keys)?,
            });
        }

        Ok(NotifyResponse {
            keys_to_absorb: KvMap::new(),
        })
    }

    /// Graceful exit: hand every stored key to the successor and tell the
    /// nearby predecessors so their tables skip us. The successor must
    /// acknowledge before the caller may stop serving.
    fn leave(&self) -> Result<()> {
        let core = self.core();
        debug!(id = %core.id, "leaving chord");

        let new_pred = core.predecessor().ok_or(Error::NoPredecessor)?;
        // Resolved live rather than read from finger zero, which may still
        // name a peer that itself left moments ago.
        let new_succ = self.get_successor(core.id.add(1))?;
        let request = Request::Leave {
            leaving_id: core.id,
            new_pred,
            new_min: core.min_key(),
            keys_to_absorb: raw_kvs(&self.keys_to_transfer())?,
            new_succ: Some(new_succ.clone()),
        };

        for pred in self.get_n_predecessors(core.id, core.num_succs)? {
            if pred.id != core.id {
                let _: Result<Ack> = pred.call(&request);
            }
        }

        if new_succ.id != core.id && new_succ.is_alive() {
            let _: Ack = new_succ.call(&request)?;
        }

        Ok(())
    }

    fn leave_handler(
        &self,
        leaving_id: Id,
        new_pred: PeerInfo,
        new_min: Id,
        keys_to_absorb: KvMap<Value>,
        new_succ: Option<PeerInfo>,
    ) -> Result<()> {
        let core = self.core();

        if let Some(pred) = core.predecessor() {
            if pred.id == leaving_id {
                core.set_predecessor(new_pred);
                core.set_min_key(new_min);
                self.fix_other_fingers(leaving_id)?;
                self.absorb_keys(typed_kvs(keys_to_absorb)?)?;
            }
        }

        core.successors.remove(leaving_id);
        if core.successors.is_empty() {
            if let Ok(succs) = self.get_n_successors(core.id.add(1), core.num_succs) {
                core.successors.populate(succs);
            }
        }

        // Absent when the leaver did not know its successor; stabilization
        // repairs the fingers then.
        if let Some(succ) = new_succ {
            core.fingers.adjust(&succ);
        }

        Ok(())
    }

    // === Maintenance ===

    /// One reconciliation round: check the predecessor, repair the head of
    /// the successor list, re-announce ourselves if our successor does not
    /// know us, then refresh the successor list and fingers.
    ///
    /// A peer with no predecessor yet is either alone or mid-join; there is
    /// nothing to reconcile.
    fn stabilize(&self) -> Result<()> {
        let core = self.core();

        let Some(pred) = core.predecessor() else {
            return Ok(());
        };
        if !pred.is_alive() {
            self.handle_pred_failure(&pred);
        }

        if core.successors.is_empty() {
            let succs = self.get_n_successors(core.id.add(1), core.num_succs)?;
            core.successors.populate(succs);
            self.populate_finger_table(false)?;
            return Ok(());
        }

        let head = loop {
            match core.successors.first() {
                Some(peer) if peer.is_alive() => break peer,
                Some(dead) => core.successors.remove(dead.id),
                None => {
                    let succs = self.get_n_successors(core.id.add(1), core.num_succs)?;
                    core.successors.populate(succs);
                    self.populate_finger_table(false)?;
                    return Ok(());
                }
            }
        };

        // A self-successor means this peer is alone again; nothing to
        // reconcile against.
        if head.id == core.id {
            return Ok(());
        }

        let pred_of_succ = head.get_pred()?;
        if core.id.in_between(pred_of_succ.id, head.id, true) || !pred_of_succ.is_alive() {
            debug!(id = %core.id, succ = %head.id, "notifying successor during stabilize");
            let _ = self.notify(&head);
        }

        self.update_succ_list()?;
        self.populate_finger_table(false)?;
        Ok(())
    }

    /// Walk backward from each listed successor via `GetPred` to discover
    /// peers that joined between entries, then extend forward if the list
    /// is still under capacity.
    fn update_succ_list(&self) -> Result<()> {
        let core = self.core();
        let old_entries = core.successors.entries();

        let mut previous_id = core.id;
        for nth_entry in &old_entries {
            let mut last = nth_entry.clone();

            loop {
                let pred = match last.get_pred() {
                    Ok(pred) => pred,
                    Err(_) => break,
                };

                if pred.id == previous_id || pred.id == core.id {
                    break;
                }

                if pred.is_alive() {
                    core.successors.insert(pred.clone());
                }
                last = pred;
            }

            previous_id = nth_entry.id;
        }

        let len = core.successors.len();
        if len < core.num_succs {
            let Some(tail) = core.successors.nth_entry(len.saturating_sub(1)) else {
                return Ok(());
            };

            for peer in self.get_n_successors(tail.id.add(1), core.num_succs - len)? {
                if peer.id != core.id {
                    core.successors.insert(peer);
                }
            }
        }

        Ok(())
    }

    /// Re-resolve the successor of every finger range. On the initializing
    /// pass each query is seeded at the previous finger (the closest
    /// preceding peer we know), with the predecessor seeding finger zero.
    fn populate_finger_table(&self, initialize: bool) -> Result<()> {
        let core = self.core();

        for i in 0..core.fingers.len() {
            let (lower, _) = core.fingers.nth_range(i);

            if initialize && core.stored_locally(lower) {
                core.fingers.edit_nth(i, core.to_peer_info());
                continue;
            }

            let target = if i == 0 {
                if initialize {
                    core.predecessor().ok_or(Error::NoPredecessor)?
                } else {
                    core.to_peer_info()
                }
            } else {
                core.fingers.nth_entry(i - 1)
            };

            let successor = if target.id == core.id {
                self.get_successor(lower)?
            } else {
                target.call(&Request::GetSucc { key: lower })?
            };

            core.fingers.edit_nth(i, successor);
        }

        Ok(())
    }

    /// The predecessors of `key - 2^i` hold finger entries that should now
    /// point at this peer; notify each so they refresh. Consecutive
    /// duplicates are skipped and the walk stops on reaching our own arc.
    fn fix_other_fingers(&self, starting_key: Id) -> Result<()> {
        let core = self.core();
        let mut former: Option<PeerInfo> = None;

        for i in 0..crate::common::ID_BITS {
            let peer = self.get_predecessor(starting_key.sub(1u128 << i))?;

            if former.as_ref().is_some_and(|f| f.id == peer.id) {
                continue;
            }
            former = Some(peer.clone());

            if peer.id == core.id {
                break;
            }

            if peer.is_alive() {
                let _ = self.notify(&peer);
            }
        }

        Ok(())
    }

    /// Spread the news of a failed peer to the predecessors whose fingers
    /// may still point at it. Aborts if the peer is in fact alive.
    fn rectify(&self, failed: &PeerInfo) -> Result<()> {
        if failed.is_alive() {
            return Ok(());
        }

        let core = self.core();
        debug!(id = %core.id, failed = %failed.id, "rectifying failure");

        let request = Request::Rectify {
            failed: failed.clone(),
            originator: core.to_peer_info(),
        };

        let mut former: Option<PeerInfo> = None;
        for i in 0..crate::common::ID_BITS {
            let peer = self.get_predecessor(failed.id.sub(1u128 << i))?;

            if former.as_ref().is_some_and(|f| f.id == peer.id) {
                continue;
            }
            former = Some(peer.clone());

            if peer.id == core.id {
                break;
            }

            if peer.is_alive() {
                let _: Result<Ack> = peer.call(&request);
            }
        }

        Ok(())
    }

    fn rectify_handler(&self, failed: PeerInfo, originator: PeerInfo) -> Result<()> {
        let core = self.core();
        if originator.id == core.id {
            return Ok(());
        }

        core.successors.remove(failed.id);
        core.fingers.replace_dead_peer(&failed, &originator);

        self.notify(&originator)
    }

    /// The predecessor stopped answering: reclaim the fingers that covered
    /// the gap and run rectification on its behalf.
    fn handle_pred_failure(&self, old_pred: &PeerInfo) {
        let core = self.core();
        core.fingers.adjust(&core.to_peer_info());
        let _ = self.rectify(old_pred);
    }

    // === Request dispatch ===

    fn handle_request(&self, raw: Value) -> Result<Value> {
        if raw.get("COMMAND").is_none() {
            return Err(Error::InvalidCommand);
        }

        let request: Request = serde_json::from_value(raw).map_err(|e| {
            if e.to_string().contains("unknown variant") {
                Error::InvalidCommand
            } else {
                Error::Json(e)
            }
        })?;

        self.dispatch(request)
    }

    fn dispatch(&self, request: Request) -> Result<Value> {
        match request {
            Request::Join { new_peer } => Ok(serde_json::to_value(self.join_handler(new_peer)?)?),
            Request::Notify { new_peer } => {
                Ok(serde_json::to_value(self.notify_handler(new_peer)?)?)
            }
            Request::Leave {
                leaving_id,
                new_pred,
                new_min,
                keys_to_absorb,
                new_succ,
            } => {
                self.leave_handler(leaving_id, new_pred, new_min, keys_to_absorb, new_succ)?;
                Ok(serde_json::json!({}))
            }
            Request::GetSucc { key } => Ok(serde_json::to_value(self.get_successor(key)?)?),
            Request::GetPred { key } => Ok(serde_json::to_value(self.get_predecessor(key)?)?),
            Request::Rectify { failed, originator } => {
                self.rectify_handler(failed, originator)?;
                Ok(serde_json::json!({}))
            }
            storage => self.dispatch_storage(storage),
        }
    }
}
