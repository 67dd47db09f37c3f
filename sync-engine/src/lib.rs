//! # sync-engine
//!
//! Connection engine for the clipsync device synchronization protocol.
//!
//! Decides, per known peer, whether it is reachable, protocol-compatible and
//! cryptographically trusted, and keeps that decision persisted as the peer's
//! [`ConnectState`](clipsync_types::ConnectState).
//!
//! ## Components
//!
//! - [`SyncResolver`]: the connection state machine, fed by [`ResolveEvent`]s
//! - [`PeerSyncHandler`]: live view of one peer, turns record changes into events
//! - [`SyncManager`]: one handler per stored peer, plus the polling loop
//! - [`SyncPollingManager`]: periodic re-resolution with retry-sooner backoff
//! - [`TokenCache`]: single-use pairing tokens
//!
//! Collaborators are traits ([`PeerStore`], [`PeerTransport`], [`Discovery`],
//! [`SecureStore`], [`SyncInfoFactory`]) with in-memory or mock
//! implementations for tests.
//!
//! ## Example
//!
//! ```ignore
//! use clipsync_engine::{EngineConfig, SyncManager, SyncResolver};
//!
//! let resolver = Arc::new(SyncResolver::new(store.clone(), transport, discovery,
//!     secure_store, token_cache, sync_info_factory)).spawn();
//! let manager = SyncManager::new(store, resolver.emitter(), EngineConfig::default());
//! manager.start();
//!
//! // Pair with a peer showing a token
//! let trusted = manager.trust_by_token(&peer_id, 123456).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod handler;
pub mod identity;
pub mod manager;
pub mod polling;
pub mod resolver;
pub mod secure;
pub mod store;
pub mod token;
pub mod transport;

pub use config::{ConfigError, EngineConfig, PollingConfig, ResolverConfig, TokenConfig};
pub use discovery::{Discovery, MockDiscovery};
pub use error::{EngineError, Result, StoreError};
pub use event::{Emitter, ResolveEvent, Responder};
pub use handler::PeerSyncHandler;
pub use identity::{StaticSyncInfoFactory, SyncInfoFactory};
pub use manager::SyncManager;
pub use polling::SyncPollingManager;
pub use resolver::{ResolverHandle, SyncResolver};
pub use secure::{MemorySecureStore, SecureStore};
pub use store::{MemoryPeerStore, PeerStore};
pub use token::TokenCache;
pub use transport::{MockTransport, PeerEndpoint, PeerTransport, TransportCall, TransportError};
