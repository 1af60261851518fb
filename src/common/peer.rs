//! Descriptor of a remote peer and the client side of talking to it.

use std::fmt::{self, Debug, Formatter};
use std::net::{Ipv4Addr, SocketAddrV4};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::messages::Request;
use crate::common::Id;
use crate::{rpc, Result};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
/// What one peer knows about another: its id, the lowest key it owns, and
/// where to reach it. `min_key` is the peer's predecessor id plus one.
pub struct PeerInfo {
    #[serde(rename = "ID")]
    pub id: Id,
    #[serde(rename = "MIN_KEY")]
    pub min_key: Id,
    #[serde(rename = "IP_ADDR")]
    pub ip: Ipv4Addr,
    #[serde(rename = "PORT")]
    pub port: u16,
}

impl Debug for PeerInfo {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("PeerInfo")
            .field("id", &self.id)
            .field("min_key", &self.min_key)
            .field("address", &format_args!("{}:{}", self.ip, self.port))
            .finish()
    }
}

impl PartialOrd for PeerInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl PeerInfo {
    /// Creates a new descriptor. The peer's id is derived from `"ip:port"`.
    pub fn new(ip: Ipv4Addr, port: u16) -> PeerInfo {
        let id = Id::hash(&format!("{ip}:{port}"));
        PeerInfo {
            id,
            min_key: id,
            ip,
            port,
        }
    }

    pub fn address(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }

    /// Returns true if the peer's server accepts a TCP connection.
    pub fn is_alive(&self) -> bool {
        rpc::client::is_alive(self.address())
    }

    /// Send a request and parse the response payload. Fails when the peer is
    /// down, the call times out, or the peer reports `SUCCESS: false`.
    pub(crate) fn call<Resp: DeserializeOwned>(&self, request: &impl Serialize) -> Result<Resp> {
        if !self.is_alive() {
            return Err(crate::Error::PeerDown);
        }

        rpc::client::call(self.address(), request)
    }

    /// Ask the peer for the predecessor of its own id.
    pub(crate) fn get_pred(&self) -> Result<PeerInfo> {
        self.call(&Request::GetPred { key: self.id })
    }
}
