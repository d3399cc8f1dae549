//! Algorand node access: wire models, address codecs, the node client and
//! the block follower.

pub mod address;
pub mod client;
pub mod models;
pub mod streamer;

pub use client::{AlgodClient, NodeClient};
