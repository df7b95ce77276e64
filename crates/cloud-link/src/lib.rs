//! Client connection layer for the cloud controller.
//!
//! A managed server talks to the controller over one authenticated gRPC
//! connection. Unary calls resolve through a [`CallFuture`], server streams
//! are owned by a cancellable [`CallHandle`], and slowly changing listings
//! are served from a short-lived cache.
//!
//! # Example
//!
//! ```no_run
//! use cloud_link::{ClientConfig, Cloud};
//!
//! # async fn run() -> cloud_link::Result<()> {
//! let cloud = Cloud::setup(ClientConfig::from_env()).await?;
//! let heart = cloud.start_heart();
//!
//! cloud.local().set_ready(true).await?;
//! for server in cloud.resources().servers().await? {
//!     println!("{} on {}", server.name, server.node);
//! }
//!
//! heart.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Layers
//!
//! ```text
//! Cloud ──> facade::{Resources, Transfers, Channels, LocalServer, Notifications}
//!               │
//!               v
//!          Connection ──> Credential (authorization metadata)
//!            │   │
//!            │   └──> Bridge ──> CallFuture      (unary)
//!            │          └──> TtlCell             (cached listings)
//!            └──> CallHandle ──> Observer/Stream (server streams)
//! ```

/// Messages and service stubs generated from `proto/client.proto`.
pub mod proto {
    #![allow(missing_docs)]
    #![allow(clippy::doc_markdown)]
    tonic::include_proto!("cloud.client.v1");
}

mod bridge;
mod cache;
mod call;
mod cloud;
mod config;
mod connection;
mod credential;
mod error;
mod heart;
mod types;

pub mod facade;

pub use bridge::{Bridge, CallFuture, Completer};
pub use cache::{DEFAULT_TTL, TtlCell};
pub use call::{
    CallHandle, CallState, EventStream, FnObserver, MapObserver, Observer, StreamObserver,
    event_stream, map_observer, observer_fn,
};
pub use cloud::Cloud;
pub use config::{
    ADDRESS_VAR, CERTIFICATE_VAR, ClientConfig, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_IN_FLIGHT, Endpoint, TOKEN_VAR, TransportSecurity,
};
pub use connection::Connection;
pub use credential::{AUTHORIZATION, Credential};
pub use error::{Error, Result};
pub use facade::{Channels, LocalServer, Notifications, Resources, Transfers};
pub use heart::{Heart, HeartHandle, Pulse};
pub use types::{
    ChannelMessage, GroupInfo, PROTOCOL_VERSION, PowerEvent, PowerState, ReadyEvent,
    ResolvedTransfer, ScreenLines, ServerInfo, TextMessage, TransferTarget, UserInfo, Versions,
};
