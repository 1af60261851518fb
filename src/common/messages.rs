//! JSON messages exchanged between peers.
//!
//! Every request is a single JSON object tagged by `COMMAND`; every response
//! carries a `SUCCESS` flag, an `ERRORS` string when unsuccessful, and the
//! payload fields at the top level. Stored values travel as raw
//! [serde_json::Value]s so the same command set serves both the plain Chord
//! peer (string values) and the DHash peer (dispersal fragments).

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Id, PeerInfo};
use crate::{Error, Result};

/// An ordered set of keyed values, the shape keys travel in during joins,
/// leaves, and ranged reads.
pub(crate) type KvMap<V> = BTreeMap<Id, V>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "COMMAND")]
pub(crate) enum Request {
    #[serde(rename = "JOIN")]
    Join {
        #[serde(rename = "NEW_PEER")]
        new_peer: PeerInfo,
    },
    #[serde(rename = "NOTIFY")]
    Notify {
        #[serde(rename = "NEW_PEER")]
        new_peer: PeerInfo,
    },
    #[serde(rename = "LEAVE")]
    Leave {
        #[serde(rename = "LEAVING_ID")]
        leaving_id: Id,
        #[serde(rename = "NEW_PRED")]
        new_pred: PeerInfo,
        #[serde(rename = "NEW_MIN")]
        new_min: Id,
        #[serde(rename = "KEYS_TO_ABSORB")]
        keys_to_absorb: KvMap<Value>,
        /// Not every leaver knows its successor; absent means the receiver
        /// relies on stabilization instead.
        #[serde(rename = "NEW_SUCC", default, skip_serializing_if = "Option::is_none")]
        new_succ: Option<PeerInfo>,
    },
    #[serde(rename = "GET_SUCC")]
    GetSucc {
        #[serde(rename = "KEY")]
        key: Id,
    },
    #[serde(rename = "GET_PRED")]
    GetPred {
        #[serde(rename = "KEY")]
        key: Id,
    },
    #[serde(rename = "CREATE_KEY")]
    CreateKey {
        #[serde(rename = "KEY")]
        key: Id,
        #[serde(rename = "VALUE")]
        value: Value,
    },
    #[serde(rename = "READ_KEY")]
    ReadKey {
        #[serde(rename = "KEY")]
        key: Id,
    },
    #[serde(rename = "READ_RANGE")]
    ReadRange {
        #[serde(rename = "LOWER_BOUND")]
        lower: Id,
        #[serde(rename = "UPPER_BOUND")]
        upper: Id,
    },
    #[serde(rename = "XCHNG_NODE")]
    ExchangeNode {
        #[serde(rename = "NODE")]
        node: WireNode,
        #[serde(rename = "REQUESTER")]
        requester: PeerInfo,
        #[serde(rename = "LOWER_BOUND")]
        lower: Id,
        #[serde(rename = "UPPER_BOUND")]
        upper: Id,
    },
    #[serde(rename = "RECTIFY")]
    Rectify {
        #[serde(rename = "FAILED_NODE")]
        failed: PeerInfo,
        #[serde(rename = "ORIGINATOR")]
        originator: PeerInfo,
    },
}

/// One Merkle node as it travels in an `XCHNG_NODE` exchange: the node
/// itself plus, when requested, its direct children without theirs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WireNode {
    #[serde(rename = "HASH")]
    pub hash: Id,
    #[serde(rename = "MIN_KEY")]
    pub min_key: Id,
    #[serde(rename = "KEY")]
    pub max_key: Id,
    #[serde(rename = "POSITION")]
    pub position: Vec<usize>,
    #[serde(rename = "KV_PAIRS", default, skip_serializing_if = "Option::is_none")]
    pub kv_pairs: Option<KvMap<Value>>,
    #[serde(rename = "CHILDREN", default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<WireNode>>,
}

impl WireNode {
    pub fn is_leaf(&self) -> bool {
        self.kv_pairs.is_some()
    }
}

// === Response payloads ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JoinResponse {
    #[serde(rename = "PREDECESSOR")]
    pub predecessor: PeerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NotifyResponse {
    #[serde(rename = "KEYS_TO_ABSORB", default)]
    pub keys_to_absorb: KvMap<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ValueResponse {
    #[serde(rename = "VALUE")]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KvPairsResponse {
    #[serde(rename = "KV_PAIRS")]
    pub pairs: Vec<KvPairEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KvPairEntry {
    #[serde(rename = "KEY")]
    pub key: Id,
    #[serde(rename = "VAL")]
    pub val: Value,
}

/// A response with no payload beyond the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Ack {}

// === Envelope ===

/// Wrap a handler outcome into the response envelope.
pub(crate) fn seal(outcome: Result<Value>) -> Value {
    match outcome {
        Ok(Value::Object(mut payload)) => {
            payload.insert("SUCCESS".into(), Value::Bool(true));
            Value::Object(payload)
        }
        Ok(other) => serde_json::json!({ "SUCCESS": true, "VALUE": other }),
        Err(err) => serde_json::json!({ "SUCCESS": false, "ERRORS": err.to_string() }),
    }
}

/// Check a response envelope, surfacing the peer's `ERRORS` string on failure.
pub(crate) fn open(response: Value) -> Result<Value> {
    match response.get("SUCCESS").and_then(Value::as_bool) {
        Some(true) => Ok(response),
        Some(false) => {
            let errors = response
                .get("ERRORS")
                .and_then(Value::as_str)
                .unwrap_or("unspecified")
                .to_string();
            Err(Error::Rpc(errors))
        }
        None => Err(Error::Rpc("response missing SUCCESS flag".into())),
    }
}

/// Convert the dynamic value slots of a message into the peer's value type.
pub(crate) fn typed_kvs<V: DeserializeOwned>(raw: KvMap<Value>) -> Result<KvMap<V>> {
    raw.into_iter()
        .map(|(k, v)| Ok((k, serde_json::from_value(v)?)))
        .collect()
}

/// Convert a typed key/value map into the dynamic wire shape.
pub(crate) fn raw_kvs<V: Serialize>(typed: &KvMap<V>) -> Result<KvMap<Value>> {
    typed
        .iter()
        .map(|(k, v)| Ok((*k, serde_json::to_value(v)?)))
        .collect()
}
