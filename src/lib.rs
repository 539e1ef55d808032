//! Peer-to-peer content-addressed block storage.
//!
//! A client streams a named payload; the service chunks it, persists each
//! chunk as an immutable content-addressed block, assembles a flat DAG
//! naming the payload, and announces the root id on the content-routing
//! network. Peers missing a block discover a provider over the DHT and
//! fetch it (plus its children) over the block read protocol, caching the
//! result in a temporary store.

pub mod api;
pub mod modules;
pub mod runner;
pub mod utils;
