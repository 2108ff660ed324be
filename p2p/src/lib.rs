//! Kernel Peer-to-Peer Layer
//!
//! This crate moves consensus traffic between kernel nodes.  It handles:
//!
//! - **Framed transport**: versioned, length-prefixed frames over TCP with
//!   read and write deadlines and a hard message-size ceiling.
//! - **Wire codec**: the tagged binary encoding of every peer message,
//!   including the CoSi announcement, commitment, challenge and response
//!   phases, graph advertisements and relay envelopes.
//! - **Connection lifecycle**: authentication of inbound sessions, dialing
//!   configured relayers with backoff, and per-connection receive, dispatch
//!   and send tasks that are torn down together.
//! - **Relay mesh**: consumers reach each other through relayers, which
//!   advertise the consumers they serve so that messages take one hop.
//! - **Graph sync**: peers exchange frontiers and the node that is ahead
//!   replays finalized snapshots to the node that is behind.
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────────────────────────────────────────┐
//!  │  Kernel (CoSi engine, graph store)              │
//!  │  ← SyncHandle callbacks                         │
//!  │  → Node::send_* operations                      │
//!  └──────────────┬──────────────────────────────────┘
//!                 │
//!  ┌──────────────▼──────────────────────────────────┐
//!  │  Node (node.rs, cosi.rs, relay.rs, sync.rs)     │
//!  │  • dispatches inbound messages by kind          │
//!  │  • dedups outbound messages via ConfirmCache    │
//!  │  • routes to neighbors or through relayers      │
//!  └──────┬───────────────────┬──────────────────────┘
//!         │                   │
//!  ┌──────▼──────┐     ┌──────▼──────┐
//!  │ Peer queues │     │ Graph sync  │
//!  │ (high/norm) │     │ (catch-up)  │
//!  └──────┬──────┘     └──────┬──────┘
//!         │                   │
//!  ┌──────▼───────────────────▼──────────────────────┐
//!  │  Transport (TCP, versioned length-prefixed)     │
//!  │  • Listener: accepts inbound                    │
//!  │  • Client: send / receive frames                │
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]    | `P2pConfig` defaults, relayer endpoints, dev overrides |
//! | [`transport`] | Frame header, TCP listener and client |
//! | [`protocol`]  | Message kinds, wire encoding and decoding |
//! | [`cache`]     | Confirm cache for dedup and finalization suppression |
//! | [`peer`]      | Per-peer queues, metrics and shutdown signalling |
//! | [`neighbors`] | Neighbor map and remote relayer table |
//! | [`node`]      | Node lifecycle, connection tasks, dispatch |
//! | [`relay`]     | Relay routing and consumer advertisements |
//! | [`sync`]      | Graph frontiers and snapshot catch-up |
//! | [`cosi`]      | Outbound CoSi and transaction messages |
//! | [`metric`]    | Per-kind message and byte counters |
//! | [`handle`]    | The `SyncHandle` boundary to the kernel |
//! | [`error`]     | Crate-wide error enum |

pub mod cache;
pub mod config;
pub mod cosi;
pub mod error;
pub mod handle;
pub mod metric;
pub mod neighbors;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod sync;
#[cfg(any(test, feature = "dev-context-only-utils"))]
pub mod test_handle;
pub mod transport;
pub mod types;

pub use {
    cache::{CacheStore, ConfirmCache, LruCacheStore},
    config::{P2pConfig, RelayerEndpoint},
    error::{P2pError, Result},
    handle::SyncHandle,
    node::Node,
    peer::{PeerSnapshot, Priority},
    protocol::{MessageKind, PeerMessage},
    types::{AuthToken, CosiSignature, Hash, Key, PeerId, Signature, SnapshotWithOrder, SyncPoint},
};
