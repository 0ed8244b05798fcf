//! Relay runtime: one shared chat connection for many sandboxed contexts.
//!
//! Contexts (tabs) post [`ContextCommand`](tabrelay_protocol::ContextCommand)s
//! to a [`RelayHost`]; the host validates them against the [`RoomRegistry`],
//! drives the single connection through [`ConnectionManager`], and broadcasts
//! service events back to every registered context. Inside a tab,
//! [`TabSession`] owns the tab's context: its [`FrameBridge`] carries contract
//! calls from nested frames to the top frame, where [`ContractDispatcher`]
//! serves them, and repeats relay events down to every frame.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tabrelay_protocol::{ContextCommand, ContextId, RoomId};
//! use tabrelay_runtime::{Identity, RelayConfig, RelayHost, WebSocketConnector};
//!
//! let config = RelayConfig::load(None);
//! let identity = Identity::load_or_create(config.identity_path().as_deref());
//! let (relay, _task) = RelayHost::new(identity, config.reconnect, Arc::new(WebSocketConnector)).spawn();
//!
//! let tab = ContextId::tab(1);
//! let mut events = relay.attach(tab)?;
//! relay.command(tab, ContextCommand::Init { endpoint: config.endpoint.clone() })?;
//! relay.command(tab, ContextCommand::JoinRoom { room_id: RoomId::new("lobby") })?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod backoff;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod contract;
pub mod error;
pub mod fake_transport;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod media;
pub mod registry;
pub mod router;
pub mod tab;
pub mod transport;
pub mod websocket;

pub use backoff::{Backoff, ReconnectPolicy};
pub use bridge::{BRIDGE_SENTINEL, ChannelPort, FrameBridge, FrameMutation, FramePort, Realm};
pub use config::RelayConfig;
pub use connection::{CloseReason, ConnectionManager, ConnectionState, Effect, Generation, Lifecycle};
pub use contract::{ContractDispatcher, EndpointSlot, INVALIDATED_MESSAGE};
pub use error::{BridgeError, RelayError, Result};
pub use fake_transport::{FakeConnector, FakeController, FakeLink};
pub use host::{RelayHandle, RelayHost, RelaySnapshot};
pub use identity::Identity;
pub use lifecycle::{ContextLifecycleTracker, HostNotification};
pub use media::{CachedMedia, HttpMediaCatalog, MediaCache, MediaCatalog, MemoryMediaCache};
pub use registry::RoomRegistry;
pub use router::{ChannelSink, ContextSink, DeliveryError, RelayRouter};
pub use tab::{TabHandle, TabSession};
pub use transport::{Connector, Transport, TransportParts, TransportReceiver};
pub use websocket::{WebSocketConnector, WebSocketTransport};
