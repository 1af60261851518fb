//! The DHash replication layer.
//!
//! Every value is dispersed into `n` fragments placed on the `n` immediate
//! successors of its key, the `j`-th successor holding fragment `j`. Any
//! `m` fragments reconstruct the value, so a block survives the loss of
//! `n - m` of its holders. Two background passes repair the placement:
//! local maintenance Merkle-synchronizes this peer's fragment set with each
//! of its successors, and global maintenance pushes away fragments this
//! peer holds but no longer should.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Instant;

use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::debug;

use crate::chord::{ChordCore, Protocol};
use crate::common::database::Database;
use crate::common::messages::{
    Ack, KvMap, KvPairEntry, KvPairsResponse, Request, ValueResponse, WireNode,
};
use crate::common::{Id, PeerInfo};
use crate::config::Config;
use crate::ida::{DataBlock, DataFragment, IdaParams};
use crate::rpc::server::Server;
use crate::{Error, Result};

/// A ring member storing erasure-coded fragments.
pub struct DhashPeer {
    state: Arc<DhashState>,
    server: Server,
}

pub(crate) struct DhashState {
    pub(crate) core: ChordCore,
    pub(crate) db: Database<DataFragment>,
    ida: RwLock<IdaParams>,
    config: Config,
    cancel: AtomicBool,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl Protocol for DhashState {
    type Value = DataFragment;

    fn core(&self) -> &ChordCore {
        &self.core
    }

    fn absorb_keys(&self, keys: KvMap<DataFragment>) -> Result<()> {
        // Fragments move through create/read and the maintenance passes,
        // not through join and leave transfers, so this is usually empty.
        for (key, fragment) in keys {
            match self.db.insert(key, fragment) {
                Ok(()) | Err(Error::KeyExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn keys_to_transfer(&self) -> KvMap<DataFragment> {
        KvMap::new()
    }

    fn dispatch_storage(&self, request: Request) -> Result<Value> {
        match request {
            Request::CreateKey { key, value } => {
                let fragment: DataFragment = serde_json::from_value(value)?;
                self.create_key_handler(key, fragment)?;
                Ok(serde_json::json!({}))
            }
            Request::ReadKey { key } => Ok(serde_json::to_value(ValueResponse {
                value: serde_json::to_value(self.db.lookup(key)?)?,
            })?),
            Request::ReadRange { lower, upper } => {
                let pairs = self
                    .db
                    .read_range(lower, upper)
                    .into_iter()
                    .map(|(key, fragment)| {
                        Ok(KvPairEntry {
                            key,
                            val: serde_json::to_value(fragment)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(serde_json::to_value(KvPairsResponse { pairs })?)
            }
            Request::ExchangeNode {
                node,
                requester,
                lower,
                upper,
            } => Ok(serde_json::to_value(self.exchange_node_handler(
                node,
                requester,
                (lower, upper),
            )?)?),
            _ => Err(Error::InvalidCommand),
        }
    }
}

impl DhashState {
    fn params(&self) -> IdaParams {
        *self.ida.read().expect("ida params lock poisoned")
    }

    fn create_key_handler(&self, key: Id, fragment: DataFragment) -> Result<()> {
        if self.db.contains(key) {
            return Err(Error::KeyExists);
        }
        self.db.insert(key, fragment)
    }

    // === Create / Read ===

    /// Disperse a value and store one fragment on each of the key's `n`
    /// successors. Succeeds once `m` holders acknowledge; fewer means the
    /// value could never be reconstructed, so the create fails.
    fn create_block(&self, key: Id, bytes: &[u8]) -> Result<()> {
        let params = self.params();
        let block = DataBlock::encode(bytes, params);

        let succs = self.get_n_successors(key, params.n())?;
        if succs.len() < params.m() {
            return Err(Error::InsufficientReplicas(succs.len()));
        }

        let mut stored = 0;
        for (i, succ) in succs.iter().enumerate() {
            let fragment = block.fragments()[i].clone();

            if succ.id == self.core.id {
                self.db.insert(key, fragment)?;
                stored += 1;
            } else if succ.is_alive() && self.create_key(key, &fragment, succ).is_ok() {
                stored += 1;
            }
        }

        if stored < params.m() {
            return Err(Error::TooFewAcks {
                got: stored,
                need: params.m(),
            });
        }

        Ok(())
    }

    /// Collect fragments from the key's successors until `m` distinct
    /// indices are in hand, then reconstruct. Per-peer misses are expected
    /// and skipped.
    fn read_block(&self, key: Id) -> Result<DataBlock> {
        let params = self.params();
        let succs = self.get_n_successors(key, self.core.num_succs)?;

        let mut fragments: std::collections::BTreeMap<usize, DataFragment> = Default::default();
        for succ in &succs {
            if fragments.len() == params.m() {
                break;
            }

            if succ.id == self.core.id {
                if let Ok(fragment) = self.db.lookup(key) {
                    fragments.insert(fragment.index(), fragment);
                }
            } else if let Ok(fragment) = self.read_key(key, succ) {
                fragments.insert(fragment.index(), fragment);
            }
        }

        if fragments.len() < params.m() {
            return Err(Error::TooFewFragments {
                got: fragments.len(),
                need: params.m(),
            });
        }

        let fragments: Vec<DataFragment> = fragments.into_values().collect();
        DataBlock::from_fragments(&fragments, params)
    }

    fn create_key(&self, key: Id, fragment: &DataFragment, peer: &PeerInfo) -> Result<()> {
        let _: Ack = peer.call(&Request::CreateKey {
            key,
            value: serde_json::to_value(fragment)?,
        })?;
        Ok(())
    }

    fn read_key(&self, key: Id, peer: &PeerInfo) -> Result<DataFragment> {
        let response: ValueResponse = peer.call(&Request::ReadKey { key })?;
        Ok(serde_json::from_value(response.value)?)
    }

    fn read_range_remote(&self, peer: &PeerInfo, lower: Id, upper: Id) -> Result<KvMap<DataFragment>> {
        let response: KvPairsResponse = peer.call(&Request::ReadRange { lower, upper })?;

        response
            .pairs
            .into_iter()
            .map(|entry| Ok((entry.key, serde_json::from_value(entry.val)?)))
            .collect()
    }

    // === Merkle synchronization (local maintenance) ===

    /// Reconcile this peer's fragments in `range` with one successor by
    /// exchanging Merkle nodes top-down, descending only into subtrees
    /// whose hashes disagree. Both sides fetch whatever the comparison
    /// shows them to be missing.
    pub(crate) fn synchronize(&self, succ: &PeerInfo, range: (Id, Id)) -> Result<()> {
        self.sync_at(succ, range, &[])
    }

    fn sync_at(&self, succ: &PeerInfo, range: (Id, Id), position: &[usize]) -> Result<()> {
        let Some(local) = self.db.wire_node_at(position)? else {
            return Ok(());
        };

        let remote = match self.exchange_node(succ, &local, range) {
            Ok(remote) => remote,
            Err(_) => {
                // The peer has no node at this address, so the trees differ
                // in shape here. Fall back to a bulk read of this slice.
                let kvs = self.read_range_remote(succ, local.min_key, local.max_key)?;
                for key in kvs.keys() {
                    if self.is_missing(*key, range) {
                        let _ = self.retrieve_missing(*key);
                    }
                }
                return Ok(());
            }
        };

        self.compare_nodes(&remote, &local, succ, range)?;

        if let (Some(remote_children), Some(local_children)) = (&remote.children, &local.children)
        {
            for (i, (theirs, ours)) in remote_children.iter().zip(local_children).enumerate() {
                if theirs.hash != ours.hash {
                    let mut child_position = position.to_vec();
                    child_position.push(i);
                    self.sync_at(succ, range, &child_position)?;
                }
            }
        }

        Ok(())
    }

    fn exchange_node(&self, succ: &PeerInfo, node: &WireNode, range: (Id, Id)) -> Result<WireNode> {
        succ.call(&Request::ExchangeNode {
            node: node.clone(),
            requester: self.core.to_peer_info(),
            lower: range.0,
            upper: range.1,
        })
    }

    fn exchange_node_handler(
        &self,
        node: WireNode,
        requester: PeerInfo,
        range: (Id, Id),
    ) -> Result<WireNode> {
        let local = self
            .db
            .wire_node_at(&node.position)?
            .ok_or(Error::NoSuchPosition)?;

        self.compare_nodes(&node, &local, &requester, range)?;
        Ok(local)
    }

    /// Act on one exchanged node pair: a remote leaf names exactly the keys
    /// to check, while a remote internal node against a local leaf means
    /// the peer's tree is deeper here, so its whole slice is read instead.
    fn compare_nodes(
        &self,
        remote: &WireNode,
        local: &WireNode,
        peer: &PeerInfo,
        range: (Id, Id),
    ) -> Result<()> {
        if remote.is_leaf() {
            if let Some(kv_pairs) = &remote.kv_pairs {
                for key in kv_pairs.keys() {
                    if self.is_missing(*key, range) {
                        let _ = self.retrieve_missing(*key);
                    }
                }
            }
        } else if local.is_leaf() {
            let kvs = self.read_range_remote(peer, local.min_key, local.max_key)?;
            for key in kvs.keys() {
                if self.is_missing(*key, range) {
                    let _ = self.retrieve_missing(*key);
                }
            }
        }

        Ok(())
    }

    fn is_missing(&self, key: Id, range: (Id, Id)) -> bool {
        key.in_between(range.0, range.1, true) && !self.db.contains(key)
    }

    /// Fetch a block this peer should hold a fragment of, and store one.
    ///
    /// Any fragment serves: reconstruction needs `m` distinct indices from
    /// the whole replica set, not a particular one here, so a uniformly
    /// sampled fragment is stored and global maintenance may re-home it
    /// later.
    fn retrieve_missing(&self, key: Id) -> Result<()> {
        if self.db.contains(key) {
            return Ok(());
        }
        debug!(id = %self.core.id, %key, "retrieving missing fragment");

        let block = self.read_block(key)?;
        let fragment = block
            .fragments()
            .choose(&mut rand::thread_rng())
            .expect("an encoded block always carries fragments")
            .clone();

        self.db.insert(key, fragment)
    }

    // === Global maintenance ===

    /// Walk the stored keys clockwise from this peer's id. A key whose `n`
    /// successors do not include us is misplaced: push our fragments in its
    /// replica range to the holders that lack them and drop them locally.
    fn run_global_maintenance(&self) -> Result<()> {
        let params = self.params();

        let Some((starting_key, _)) = self.db.next(self.core.id) else {
            return Ok(());
        };

        let mut current = self.core.id;
        let mut first_iteration = true;
        let mut remaining = self.db.len() + 1;

        while remaining > 0 {
            remaining -= 1;

            let Some((key, _)) = self.db.next(current) else {
                break;
            };
            if key.in_between(self.core.id, starting_key, true) && !first_iteration {
                break;
            }
            first_iteration = false;

            let succs = self.get_n_successors(key, params.n())?;
            let Some(head) = succs.first().cloned() else {
                break;
            };

            if !succs.iter().any(|s| s.id == self.core.id) {
                debug!(id = %self.core.id, %key, "relocating misplaced fragments");
                for succ in &succs {
                    let remote = self.read_range_remote(succ, key, head.id)?;
                    let local = self.db.read_range(key, head.id);

                    for (misplaced, fragment) in local {
                        if !remote.contains_key(&misplaced)
                            && self.create_key(misplaced, &fragment, succ).is_ok()
                        {
                            self.db.delete(misplaced)?;
                        }
                    }
                }
            }

            current = head.id;
        }

        Ok(())
    }

    // === Local maintenance ===

    /// Synchronize this peer's own keyspace with every live successor.
    fn run_local_maintenance(&self) -> Result<()> {
        if self.db.is_empty() {
            return Ok(());
        }

        let range = (self.core.min_key(), self.core.id);
        for succ in self.core.successors.entries() {
            if succ.id != self.core.id && succ.is_alive() {
                let _ = self.synchronize(&succ, range);
            }
        }

        Ok(())
    }

    fn maintenance_loop(self: Arc<Self>) {
        let mut stamp = Instant::now();

        while !self.cancel.load(Ordering::Relaxed) {
            if stamp.elapsed() < self.config.stabilize_interval {
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }

            if let Err(e) = self.stabilize() {
                debug!(id = %self.core.id, ?e, "stabilize failed, continuing");
            }
            if !self.cancel.load(Ordering::Relaxed) {
                if let Err(e) = self.run_global_maintenance() {
                    debug!(id = %self.core.id, ?e, "global maintenance failed, continuing");
                }
            }
            if !self.cancel.load(Ordering::Relaxed) {
                if let Err(e) = self.run_local_maintenance() {
                    debug!(id = %self.core.id, ?e, "local maintenance failed, continuing");
                }
            }

            stamp = Instant::now();
        }
    }
}

impl DhashPeer {
    /// Bind the peer's server and derive its ring identity from `ip:port`.
    /// `num_replicas` sizes the successor list; fragment counts come from
    /// the dispersal parameters.
    pub fn new(ip: Ipv4Addr, port: u16, num_replicas: usize) -> Result<DhashPeer> {
        Self::with_config(ip, port, Config::default().with_num_succs(num_replicas))
    }

    pub fn with_config(ip: Ipv4Addr, port: u16, config: Config) -> Result<DhashPeer> {
        let state = Arc::new(DhashState {
            core: ChordCore::new(ip, port, config.num_succs),
            db: Database::new(),
            ida: RwLock::new(config.ida),
            config: config.clone(),
            cancel: AtomicBool::new(false),
            maintenance: Mutex::new(None),
        });

        let handler_state = state.clone();
        let server = Server::spawn(
            port,
            config.worker_threads,
            Arc::new(move |raw| handler_state.handle_request(raw)),
        )?;
        debug!(id = %state.core.id, address = %server.local_addr(), "dhash peer listening");

        Ok(DhashPeer { state, server })
    }

    // === Membership ===

    /// Become the sole member of a new ring, owner of every key.
    pub fn start_chord(&self) {
        self.state.core.set_min_key(self.state.core.id.add(1));
        self.start_maintenance();
    }

    /// Join an existing ring through any live member.
    pub fn join(&self, gateway_ip: Ipv4Addr, gateway_port: u16) -> Result<()> {
        self.state.join(gateway_ip, gateway_port)?;
        self.start_maintenance();
        Ok(())
    }

    /// Graceful exit. Fragments are not handed over; the survivors'
    /// maintenance passes restore the replication factor.
    pub fn leave(&self) -> Result<()> {
        self.state.leave()?;
        self.fail();
        Ok(())
    }

    /// Abrupt exit with no notifications, as a crash would be.
    pub fn fail(&self) {
        debug!(id = %self.state.core.id, "stopping server and maintenance");
        self.server.shutdown();
        self.state.cancel.store(true, Ordering::Relaxed);

        let handle = self
            .state
            .maintenance
            .lock()
            .expect("maintenance handle poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn start_maintenance(&self) {
        let mut slot = self
            .state
            .maintenance
            .lock()
            .expect("maintenance handle poisoned");
        if slot.is_none() {
            let state = self.state.clone();
            *slot = Some(std::thread::spawn(move || state.maintenance_loop()));
        }
    }

    // === Storage ===

    /// Disperse a value under the hash of a plaintext key.
    pub fn create(&self, key: &str, value: &str) -> Result<()> {
        self.state.create_block(Id::hash(key), value.as_bytes())
    }

    /// Reconstruct the value stored under a plaintext key.
    pub fn read(&self, key: &str) -> Result<String> {
        let block = self.state.read_block(Id::hash(key))?;
        String::from_utf8(block.decode_bytes()).map_err(|_| Error::NotUtf8)
    }

    /// Disperse a file's contents under its path name.
    pub fn upload_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = std::fs::read(path)?;
        self.state
            .create_block(Id::hash(&path.to_string_lossy()), &contents)
    }

    /// Reconstruct a file stored with [Self::upload_file] and write it out.
    pub fn download_file(&self, name: &str, output: impl AsRef<Path>) -> Result<()> {
        let block = self.state.read_block(Id::hash(name))?;
        std::fs::write(output, block.decode_bytes())?;
        Ok(())
    }

    // === Dispersal parameters ===

    /// Change the dispersal parameters. Affects subsequent creates only;
    /// already-stored fragments carry their own parameters.
    pub fn set_ida_params(&self, n: usize, m: usize, p: i64) -> Result<()> {
        let params = IdaParams::new(n, m, p)?;
        *self.state.ida.write().expect("ida params lock poisoned") = params;
        Ok(())
    }

    pub fn get_ida_params(&self) -> (usize, usize, i64) {
        let params = self.state.params();
        (params.n(), params.m(), params.p())
    }

    // === Getters ===

    pub fn id(&self) -> Id {
        self.state.core.id
    }

    pub fn min_key(&self) -> Id {
        self.state.core.min_key()
    }

    pub fn peer_info(&self) -> PeerInfo {
        self.state.core.to_peer_info()
    }

    pub fn predecessor(&self) -> Option<PeerInfo> {
        self.state.core.predecessor()
    }

    pub fn successors(&self) -> Vec<PeerInfo> {
        self.state.core.successors.entries()
    }

    /// Root hash of the fragment store, the value Merkle synchronization
    /// drives toward agreement between a peer and its successors.
    pub fn database_hash(&self) -> Id {
        self.state.db.hash()
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &Arc<DhashState> {
        &self.state
    }
}

impl Drop for DhashPeer {
    fn drop(&mut self) {
        self.fail();
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;

    fn small_ida() -> IdaParams {
        IdaParams::new(3, 2, 257).unwrap()
    }

    fn peer(port: u16, num_succs: usize) -> DhashPeer {
        DhashPeer::with_config(
            Ipv4Addr::LOCALHOST,
            port,
            Config::default()
                .with_num_succs(num_succs)
                .with_ida(small_ida()),
        )
        .unwrap()
    }

    /// A free port whose peer id falls on the clockwise arc
    /// `[lower, upper]`, so tests can position peers on the ring.
    fn port_with_id_between(lower: Id, upper: Id, taken: &[u16]) -> u16 {
        (42000..u16::MAX)
            .find(|port| {
                !taken.contains(port)
                    && Id::hash(&format!("127.0.0.1:{port}")).in_between(lower, upper, true)
            })
            .expect("some port hashes into the arc")
    }

    /// A key name whose id falls on the clockwise arc `[lower, upper]`.
    fn key_with_id_between(lower: Id, upper: Id) -> String {
        (0u32..)
            .map(|i| format!("key-{i}"))
            .find(|key| Id::hash(key).in_between(lower, upper, true))
            .expect("some key hashes into the arc")
    }

    /// The `k` nearest ids clockwise from (and excluding) `from`.
    fn clockwise_from(from: Id, ids: &[Id], k: usize) -> Vec<Id> {
        let mut others: Vec<Id> = ids.iter().copied().filter(|id| *id != from).collect();
        others.sort_by_key(|id| id.value().wrapping_sub(from.value().wrapping_add(1)));
        others.truncate(k);
        others
    }

    #[test]
    fn ida_params_are_runtime_configurable() {
        let alone = peer(42200, 4);

        assert_eq!(alone.get_ida_params(), (3, 2, 257));
        alone.set_ida_params(14, 10, 257).unwrap();
        assert_eq!(alone.get_ida_params(), (14, 10, 257));
        assert!(alone.set_ida_params(10, 10, 257).is_err());
    }

    #[test]
    fn create_requires_enough_holders_for_reconstruction() {
        // Alone on the ring, a (3, 2) create can never reach two holders.
        let alone = peer(42202, 4);
        alone.start_chord();

        assert!(matches!(
            alone.create("doomed", "value"),
            Err(Error::InsufficientReplicas(1))
        ));
    }

    #[test]
    fn two_peer_ring_creates_and_reads_everywhere() {
        let first = peer(42204, 4);
        first.start_chord();
        let second = peer(42206, 4);
        second.join(Ipv4Addr::LOCALHOST, 42204).unwrap();

        first.create("hello", "world").unwrap();

        assert_eq!(first.read("hello").unwrap(), "world");
        assert_eq!(second.read("hello").unwrap(), "world");

        // With n = 3 and two members, both hold a fragment of the key.
        let key = Id::hash("hello");
        assert!(first.state().db.contains(key));
        assert!(second.state().db.contains(key));

        // Conflicting create surfaces at the responsible successor.
        assert!(first.create("hello", "other").is_err());
    }

    #[test]
    fn synchronize_converges_a_new_peers_fragment_set() {
        let first = peer(42208, 4);
        first.start_chord();
        let second = peer(42210, 4);
        second.join(Ipv4Addr::LOCALHOST, 42208).unwrap();

        // A key owned by the first peer, so its replica set starts there.
        let key = key_with_id_between(first.min_key(), first.id());
        first.create(&key, "v1").unwrap();

        // A third peer positioned after the first but before the second:
        // it leaves the first peer's keyspace untouched.
        let port = port_with_id_between(
            first.id().add(1),
            second.id().sub(1),
            &[42208, 42210],
        );
        let third = peer(port, 4);
        third.join(Ipv4Addr::LOCALHOST, 42208).unwrap();
        assert!(third.state().db.is_empty());

        first
            .state()
            .synchronize(&third.peer_info(), (first.min_key(), first.id()))
            .unwrap();

        assert!(third.state().db.contains(Id::hash(&key)));
        assert_eq!(third.database_hash(), first.database_hash());
    }

    #[test]
    fn update_succ_list_discovers_peers_joined_elsewhere() {
        // A four-peer ring built through one gateway, then two more peers
        // joining through a different member, so the gateway's successor
        // list goes stale until it walks predecessors again.
        let first = peer(42220, 4);
        first.start_chord();

        let mut others = Vec::new();
        for port in [42222, 42224, 42226] {
            let joiner = peer(port, 4);
            joiner.join(Ipv4Addr::LOCALHOST, 42220).unwrap();
            others.push(joiner);
        }
        for port in [42228, 42230] {
            let late = peer(port, 4);
            late.join(Ipv4Addr::LOCALHOST, 42222).unwrap();
            others.push(late);
        }
        std::thread::sleep(Duration::from_millis(200));

        first.state().update_succ_list().unwrap();

        let mut ids: Vec<Id> = others.iter().map(|p| p.id()).collect();
        ids.push(first.id());
        let expected = clockwise_from(first.id(), &ids, 4);

        let listed: Vec<Id> = first.successors().iter().map(|p| p.id).collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn update_succ_list_extends_clockwise_when_short() {
        // Three members, then two more: the first peer's list has room for
        // all four others and must end up holding exactly them, in order.
        let first = peer(42240, 4);
        first.start_chord();

        let mut others = Vec::new();
        for port in [42242, 42244] {
            let joiner = peer(port, 4);
            joiner.join(Ipv4Addr::LOCALHOST, 42240).unwrap();
            others.push(joiner);
        }
        for port in [42246, 42248] {
            let late = peer(port, 4);
            late.join(Ipv4Addr::LOCALHOST, 42242).unwrap();
            others.push(late);
        }
        std::thread::sleep(Duration::from_millis(200));

        first.state().update_succ_list().unwrap();

        let mut ids: Vec<Id> = others.iter().map(|p| p.id()).collect();
        ids.push(first.id());
        let expected = clockwise_from(first.id(), &ids, 4);

        let listed: Vec<Id> = first.successors().iter().map(|p| p.id).collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn global_maintenance_leaves_well_placed_fragments_alone() {
        let first = peer(42250, 4);
        first.start_chord();
        let second = peer(42252, 4);
        second.join(Ipv4Addr::LOCALHOST, 42250).unwrap();

        first.create("anchored", "value").unwrap();
        let before = first.database_hash();

        // Every stored key's replica set includes both members of a
        // two-peer ring, so nothing moves.
        first.state().run_global_maintenance().unwrap();
        assert_eq!(first.database_hash(), before);
        assert_eq!(first.read("anchored").unwrap(), "value");
    }
}
