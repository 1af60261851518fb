#![doc = include_str!("../README.md")]

mod common;
mod config;
mod error;
mod ida;
mod rpc;

pub mod chord;
pub mod dhash;

pub use crate::common::{Id, PeerInfo};
pub use crate::config::Config;
pub use crate::error::Error;
pub use crate::ida::{DataFragment, IdaParams};
pub use chord::ChordPeer;
pub use dhash::DhashPeer;

// Alias Result to be the crate Result.
pub type Result<T, E = error::Error> = core::result::Result<T, E>;
