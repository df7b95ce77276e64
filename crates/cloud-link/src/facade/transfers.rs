//! User transfers between servers.

use std::sync::Arc;

use uuid::Uuid;

use crate::bridge::CallFuture;
use crate::call::{CallHandle, Observer, map_observer};
use crate::connection::Connection;
use crate::proto;
use crate::types::{ResolvedTransfer, TransferTarget};

/// Moving users between servers.
///
/// Requests resolve with the number of users the controller accepted. Ids it
/// does not know are dropped silently, so a short count is not an error.
#[derive(Debug, Clone)]
pub struct Transfers {
    connection: Arc<Connection>,
}

impl Transfers {
    /// Façade over `connection`.
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// Move `users` to `target`.
    pub fn transfer_users<I>(&self, users: I, target: TransferTarget) -> CallFuture<u32>
    where
        I: IntoIterator<Item = Uuid>,
    {
        let ids: Vec<String> = users.into_iter().map(|id| id.to_string()).collect();
        tracing::debug!(users = ids.len(), ?target, "requesting transfer");
        self.connection.transfer_users(proto::transfer::TransferReq {
            ids,
            target: Some(target.into()),
        })
    }

    /// Move `users` to the server with id `server`.
    pub fn transfer_users_to_server<I>(&self, users: I, server: Uuid) -> CallFuture<u32>
    where
        I: IntoIterator<Item = Uuid>,
    {
        self.transfer_users(users, TransferTarget::Server(server))
    }

    /// Move `users` to any server of `group`.
    pub fn transfer_users_to_group<I>(&self, users: I, group: impl Into<String>) -> CallFuture<u32>
    where
        I: IntoIterator<Item = Uuid>,
    {
        self.transfer_users(users, TransferTarget::Group(group.into()))
    }

    /// Move `users` to the fallback server.
    pub fn transfer_users_to_fallback<I>(&self, users: I) -> CallFuture<u32>
    where
        I: IntoIterator<Item = Uuid>,
    {
        self.transfer_users(users, TransferTarget::Fallback)
    }

    /// Transfers resolved for users on this server.
    ///
    /// Events with an undecodable user id are logged and skipped.
    pub fn subscribe_to_transfers<O>(&self, observer: O) -> CallHandle
    where
        O: Observer<ResolvedTransfer>,
    {
        self.connection
            .subscribe_to_transfers(map_observer(observer, |raw: proto::transfer::TransferRes| {
                ResolvedTransfer::try_from(raw)
                    .inspect_err(|error| tracing::warn!(%error, "skipping transfer"))
                    .ok()
            }))
    }
}
