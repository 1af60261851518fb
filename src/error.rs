//! Main crate error

#[derive(thiserror::Error, Debug)]
/// Ringwall crate error enum.
pub enum Error {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to parse message: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer answered with `SUCCESS: false`; the message is its `ERRORS` field.
    #[error("Request failed: {0}")]
    Rpc(String),

    /// TCP connect to the peer was refused or timed out.
    #[error("Peer is down")]
    PeerDown,

    #[error("Invalid command.")]
    InvalidCommand,

    #[error("Key already exists")]
    KeyExists,

    #[error("Key does not exist")]
    KeyMissing,

    /// A CREATE_KEY landed on a peer that does not own the key.
    #[error("Key not in range")]
    KeyNotLocal,

    /// Routing exhausted the finger table, successor list, and predecessor.
    #[error("Lookup failed")]
    LookupFailed,

    #[error("No predecessor set")]
    NoPredecessor,

    /// A Merkle exchange named a positional address this tree does not have.
    #[error("No node at position")]
    NoSuchPosition,

    /// The ring has fewer than `m` members, so no write can be reconstructed.
    #[error("Insufficient successors in list to complete request: {0}")]
    InsufficientReplicas(usize),

    #[error("Too few successors responded to requests: {got} < {need}")]
    TooFewAcks { got: usize, need: usize },

    #[error("Less than {need} distinct fragments: {got}")]
    TooFewFragments { got: usize, need: usize },

    /// Dispersal requires `n > m` and a prime `p > n`.
    #[error("Incorrect dispersal parameters")]
    InvalidIdaParams,

    #[error("Cannot encode {0}, it exceeds the base-64 digit budget")]
    Base64Overflow(i64),

    #[error("Invalid base-64 character: {0}")]
    Base64Char(char),

    #[error("Stored value is not valid UTF-8")]
    NotUtf8,
}
