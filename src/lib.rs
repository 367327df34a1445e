//! Peer-to-peer session sync for DAW collaborators.
//!
//! Every peer runs the same service: it accepts track mix state and recorded
//! stems from other peers, merges them into one JSON document per song, and
//! can push its own work to, or pull a merged view from, another peer.

pub mod api;
pub mod client;
pub mod config;
pub mod document;
pub mod duration;
pub mod error;
pub mod gateway;
pub mod logger;
pub mod merge;
pub mod paths;
pub mod snapshot;
pub mod stems;
pub mod store;

pub use api::{create_router, AppState};
pub use error::{PeerError, Result};
