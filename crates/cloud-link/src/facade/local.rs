//! Lifecycle and player hooks of the local server.

use std::sync::Arc;

use uuid::Uuid;

use crate::bridge::CallFuture;
use crate::connection::Connection;
use crate::proto;

/// Operations on the server this process runs.
///
/// Host join/leave hooks call [`LocalServer::user_connected`] and
/// [`LocalServer::user_disconnected`].
#[derive(Debug, Clone)]
pub struct LocalServer {
    connection: Arc<Connection>,
}

impl LocalServer {
    /// Façade over `connection`.
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// Mark this server as (not) accepting users. Repeating a value is harmless.
    pub fn set_ready(&self, ready: bool) -> CallFuture<()> {
        tracing::debug!(ready, "updating readiness");
        self.connection.set_ready(ready)
    }

    /// Report that the server finished starting.
    pub fn set_running(&self) -> CallFuture<()> {
        self.connection.set_running()
    }

    /// Ask the controller to stop this server.
    pub fn shutdown(&self) -> CallFuture<()> {
        tracing::info!("requesting stop from controller");
        self.connection.request_stop()
    }

    /// A user joined this server.
    pub fn user_connected(&self, name: impl Into<String>, id: Uuid) -> CallFuture<()> {
        self.connection.user_connected(proto::user::ConnectedReq {
            name: name.into(),
            id: id.to_string(),
        })
    }

    /// A user left this server.
    pub fn user_disconnected(&self, id: Uuid) -> CallFuture<()> {
        self.connection
            .user_disconnected(proto::user::DisconnectedReq { id: id.to_string() })
    }
}
