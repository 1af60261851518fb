//! A plain Chord peer storing string values with a single holder per key.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use crate::chord::{ChordCore, Protocol};
use crate::common::database::Database;
use crate::common::messages::{KvMap, Request, ValueResponse};
use crate::common::{Id, PeerInfo};
use crate::config::Config;
use crate::rpc::server::Server;
use crate::{Error, Result};

/// A ring member storing plain strings. Every key lives on exactly one
/// peer, the successor of its id; replication is the business of the DHash
/// layer, not this one.
pub struct ChordPeer {
    state: Arc<ChordState>,
    server: Server,
}

pub(crate) struct ChordState {
    pub(crate) core: ChordCore,
    pub(crate) db: Database<String>,
    config: Config,
    cancel: AtomicBool,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl Protocol for ChordState {
    type Value = String;

    fn core(&self) -> &ChordCore {
        &self.core
    }

    fn absorb_keys(&self, keys: KvMap<String>) -> Result<()> {
        // Leave messages reach the successor both directly and through the
        // predecessor fan-out, so absorption must be idempotent.
        for (key, value) in keys {
            match self.db.insert(key, value.clone()) {
                Err(Error::KeyExists) => self.db.update(key, value)?,
                other => other?,
            }
        }
        Ok(())
    }

    fn keys_to_transfer(&self) -> KvMap<String> {
        self.db.entries()
    }

    /// Cede every stored key at or below the new predecessor's id.
    fn handle_notify_from_pred(&self, new_pred: &PeerInfo) -> Result<KvMap<String>> {
        let keys = self.db.read_range(self.core.min_key(), new_pred.id);
        for key in keys.keys() {
            self.db.delete(*key)?;
        }

        self.core.fingers.adjust(new_pred);
        self.core.set_predecessor(new_pred.clone());
        self.core.set_min_key(new_pred.id.add(1));

        Ok(keys)
    }

    fn dispatch_storage(&self, request: Request) -> Result<Value> {
        match request {
            Request::CreateKey { key, value } => {
                let value: String = serde_json::from_value(value)?;
                self.create_key_handler(key, value)?;
                Ok(serde_json::json!({}))
            }
            Request::ReadKey { key } => Ok(serde_json::to_value(ValueResponse {
                value: Value::String(self.read_key_handler(key)?),
            })?),
            _ => Err(Error::InvalidCommand),
        }
    }
}

impl ChordState {
    fn create_key_handler(&self, key: Id, value: String) -> Result<()> {
        if !self.core.stored_locally(key) {
            return Err(Error::KeyNotLocal);
        }
        self.db.insert(key, value)
    }

    fn read_key_handler(&self, key: Id) -> Result<String> {
        if !self.core.stored_locally(key) {
            return Err(Error::KeyNotLocal);
        }
        self.db.lookup(key)
    }

    fn create(&self, key: Id, value: String) -> Result<()> {
        if self.core.stored_locally(key) {
            return self.db.insert(key, value);
        }

        let succ = self.get_successor(key)?;
        let _: crate::common::messages::Ack = succ.call(&Request::CreateKey {
            key,
            value: Value::String(value),
        })?;
        Ok(())
    }

    fn read(&self, key: Id) -> Result<String> {
        if self.core.stored_locally(key) {
            return self.db.lookup(key);
        }

        let succ = self.get_successor(key)?;
        let response: ValueResponse = succ.call(&Request::ReadKey { key })?;
        Ok(serde_json::from_value(response.value)?)
    }

    fn stabilize_loop(self: Arc<Self>) {
        let mut stamp = Instant::now();

        while !self.cancel.load(Ordering::Relaxed) {
            if stamp.elapsed() < self.config.stabilize_interval {
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }

            if let Err(e) = self.stabilize() {
                // Transient isolation; the next cycle tries again.
                debug!(id = %self.core.id, ?e, "stabilize failed, continuing");
            }
            stamp = Instant::now();
        }
    }
}

impl ChordPeer {
    /// Bind the peer's server and derive its ring identity from `ip:port`.
    /// It owns no keyspace until [Self::start_chord] or [Self::join].
    pub fn new(ip: Ipv4Addr, port: u16, num_succs: usize) -> Result<ChordPeer> {
        Self::with_config(ip, port, Config::default().with_num_succs(num_succs))
    }

    pub fn with_config(ip: Ipv4Addr, port: u16, config: Config) -> Result<ChordPeer> {
        let state = Arc::new(ChordState {
            core: ChordCore::new(ip, port, config.num_succs),
            db: Database::new(),
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
        debug!(id = %state.core.id, address = %server.local_addr(), "chord peer listening");

        Ok(ChordPeer { state, server })
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

    /// Graceful exit: transfer keys, notify neighbors, stop serving.
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
            *slot = Some(std::thread::spawn(move || state.stabilize_loop()));
        }
    }

    // === Storage ===

    /// Store a value under the hash of a plaintext key. Fails if the key
    /// already exists anywhere on the ring.
    pub fn create(&self, key: &str, value: &str) -> Result<()> {
        self.state.create(Id::hash(key), value.to_string())
    }

    /// Fetch the value stored under a plaintext key.
    pub fn read(&self, key: &str) -> Result<String> {
        self.state.read(Id::hash(key))
    }

    /// Store a file's contents under its path name.
    pub fn upload_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        self.state
            .create(Id::hash(&path.to_string_lossy()), contents)
    }

    /// Fetch a file stored with [Self::upload_file] and write it out.
    pub fn download_file(&self, name: &str, output: impl AsRef<Path>) -> Result<()> {
        let contents = self.state.read(Id::hash(name))?;
        std::fs::write(output, contents)?;
        Ok(())
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

    #[cfg(test)]
    pub(crate) fn state(&self) -> &Arc<ChordState> {
        &self.state
    }
}

impl Drop for ChordPeer {
    fn drop(&mut self) {
        self.fail();
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn peer(port: u16, num_succs: usize) -> ChordPeer {
        ChordPeer::new(Ipv4Addr::LOCALHOST, port, num_succs).unwrap()
    }

    fn fake_peer(port: u16, min_key: Id, id: Id) -> PeerInfo {
        PeerInfo {
            id,
            min_key,
            ip: Ipv4Addr::LOCALHOST,
            port,
        }
    }

    #[test]
    fn single_node_owns_every_key() {
        let alone = peer(40100, 3);
        alone.start_chord();

        assert_eq!(alone.min_key(), alone.id().add(1));
        for key in [Id::ZERO, Id::new(1 << 99), Id::MAX, alone.id()] {
            let succ = alone.state().get_successor(key).unwrap();
            assert_eq!(succ.id, alone.id());
        }
    }

    #[test]
    fn single_node_create_then_read() {
        let alone = peer(40102, 3);
        alone.start_chord();

        alone.create("greeting", "hello").unwrap();
        assert_eq!(alone.read("greeting").unwrap(), "hello");
        assert!(matches!(
            alone.create("greeting", "again"),
            Err(Error::KeyExists)
        ));
        assert!(alone.read("absent").is_err());
    }

    #[test]
    fn local_ownership_beats_stale_finger_claims() {
        // A successor entry claiming the whole keyspace must not shadow
        // keys this peer owns itself.
        let tested = peer(40104, 3);
        tested.state().core.set_min_key(tested.id().add(1));
        let liar = fake_peer(40105, tested.id().add(2), tested.id().add(1));
        tested.state().core.successors.insert(liar);

        let succ = tested.state().get_successor(tested.id().sub(10)).unwrap();
        assert_eq!(succ.id, tested.id());
    }

    #[test]
    fn lookup_fails_rather_than_livelocks() {
        // Dead predecessor, the relevant finger pointing at a dead peer,
        // empty successor list: the lookup must error, not bounce forever.
        let tested = peer(40106, 3);
        let dead = fake_peer(40107, tested.id().add(1), tested.id().add(100));
        tested.state().core.set_predecessor(dead.clone());
        tested.state().core.fingers.adjust(&dead);

        assert!(tested.state().get_successor(tested.id().add(5)).is_err());
    }

    #[test]
    fn two_node_ring_stores_and_reads_anywhere() {
        let first = peer(40108, 4);
        first.start_chord();
        let second = peer(40110, 4);
        second.join(Ipv4Addr::LOCALHOST, 40108).unwrap();

        first.create("hello", "world").unwrap();
        assert_eq!(first.read("hello").unwrap(), "world");
        assert_eq!(second.read("hello").unwrap(), "world");

        // The pair bracket each other.
        assert_eq!(first.predecessor().unwrap().id, second.id());
        let succ_of_second = second.state().get_successor(second.id().add(1)).unwrap();
        assert_eq!(succ_of_second.id, first.id());
    }

    #[test]
    fn join_transfers_the_new_predecessors_share() {
        let first = peer(40112, 4);
        first.start_chord();

        // Seed keys before the second peer joins; afterwards each key must
        // live on exactly the peer owning its hash.
        let keys: Vec<String> = (0..12).map(|i| format!("key-{i}")).collect();
        for key in &keys {
            first.create(key, "v").unwrap();
        }

        let second = peer(40114, 4);
        second.join(Ipv4Addr::LOCALHOST, 40112).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        for key in &keys {
            let id = Id::hash(key);
            let on_first = first.state().db.contains(id);
            let on_second = second.state().db.contains(id);
            assert!(on_first ^ on_second, "{key} must live on exactly one peer");

            let owner_is_second = id.in_between(second.min_key(), second.id(), true);
            assert_eq!(on_second, owner_is_second, "{key} on the wrong peer");

            // And both peers can still read everything.
            assert_eq!(first.read(key).unwrap(), "v");
            assert_eq!(second.read(key).unwrap(), "v");
        }
    }

    #[test]
    fn leave_hands_keys_to_the_successor() {
        let first = peer(40116, 4);
        first.start_chord();
        let second = peer(40118, 4);
        second.join(Ipv4Addr::LOCALHOST, 40116).unwrap();

        for i in 0..8 {
            first.create(&format!("k{i}"), &format!("v{i}")).unwrap();
        }

        second.leave().unwrap();

        for i in 0..8 {
            assert_eq!(first.read(&format!("k{i}")).unwrap(), format!("v{i}"));
        }
        assert_eq!(first.min_key(), first.id().add(1));
    }
}
