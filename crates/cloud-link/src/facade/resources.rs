//! Servers, groups, users and controller versions.

use std::sync::Arc;

use uuid::Uuid;

use crate::bridge::CallFuture;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::types::{GroupInfo, ServerInfo, UserInfo, Versions};

/// Read access to servers, groups and users.
///
/// Listings go through the connection's cache unless [`Resources::uncached`]
/// is used; point lookups are always live and resolve with `None` when the
/// controller reports the resource missing.
#[derive(Debug, Clone)]
pub struct Resources {
    connection: Arc<Connection>,
    cached: bool,
}

fn missing_as_none<T>(error: Error) -> Result<Option<T>> {
    if error.is_not_found() {
        Ok(None)
    } else {
        Err(error)
    }
}

fn decode_all<R, T>(raw: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = Error>,
{
    raw.into_iter().map(T::try_from).collect()
}

fn snapshot<R, T>(raw: Option<Vec<R>>) -> Option<Vec<T>>
where
    T: TryFrom<R, Error = Error>,
{
    decode_all(raw?)
        .inspect_err(|error| tracing::warn!(%error, "discarding cached snapshot"))
        .ok()
}

impl Resources {
    /// Façade over `connection`.
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            cached: true,
        }
    }

    /// Read listings, counts and versions straight from the controller.
    ///
    /// The cache is neither consulted nor filled; `*_now` snapshots are
    /// unaffected.
    pub fn uncached(mut self) -> Self {
        self.cached = false;
        self
    }

    /// All servers.
    pub fn servers(&self) -> CallFuture<Vec<ServerInfo>> {
        let raw = if self.cached {
            self.connection.servers()
        } else {
            self.connection.get_servers().map(|list| list.servers)
        };
        raw.try_map(decode_all)
    }

    /// Cached servers, if any; never waits.
    pub fn servers_now(&self) -> Option<Vec<ServerInfo>> {
        snapshot(self.connection.servers_now())
    }

    /// All groups.
    pub fn groups(&self) -> CallFuture<Vec<GroupInfo>> {
        let names = if self.cached {
            self.connection.groups()
        } else {
            self.connection.get_groups().map(|list| list.groups)
        };
        names.map(|names| names.into_iter().map(|name| GroupInfo { name }).collect())
    }

    /// Cached groups, if any; never waits.
    pub fn groups_now(&self) -> Option<Vec<GroupInfo>> {
        let names = self.connection.groups_now()?;
        Some(names.into_iter().map(|name| GroupInfo { name }).collect())
    }

    /// All users.
    pub fn users(&self) -> CallFuture<Vec<UserInfo>> {
        let raw = if self.cached {
            self.connection.users()
        } else {
            self.connection.get_users().map(|list| list.users)
        };
        raw.try_map(decode_all)
    }

    /// Cached users, if any; never waits.
    pub fn users_now(&self) -> Option<Vec<UserInfo>> {
        snapshot(self.connection.users_now())
    }

    /// Number of users in the cloud.
    pub fn user_count(&self) -> CallFuture<u32> {
        if self.cached {
            self.connection.user_count()
        } else {
            self.connection.get_user_count()
        }
    }

    /// Cached user count, if any; never waits.
    pub fn user_count_now(&self) -> Option<u32> {
        self.connection.user_count_now()
    }

    /// The server with id `id`.
    pub fn server(&self, id: Uuid) -> CallFuture<Option<ServerInfo>> {
        self.connection
            .get_server(id.to_string())
            .try_map(|raw| ServerInfo::try_from(raw).map(Some))
            .recover(missing_as_none)
    }

    /// The group named `name`.
    pub fn group(&self, name: impl Into<String>) -> CallFuture<Option<GroupInfo>> {
        self.connection
            .get_group(name.into())
            .map(|raw| Some(GroupInfo::from(raw)))
            .recover(missing_as_none)
    }

    /// The user with id `id`.
    pub fn user(&self, id: Uuid) -> CallFuture<Option<UserInfo>> {
        self.connection
            .get_user(id.to_string())
            .try_map(|raw| UserInfo::try_from(raw).map(Some))
            .recover(missing_as_none)
    }

    /// The server user `id` is on, if the user and its server both exist.
    pub fn server_of_user(&self, id: Uuid) -> CallFuture<Option<ServerInfo>> {
        let resources = self.clone();
        self.user(id).and_then(move |user| {
            match user.and_then(|user| user.server) {
                Some(server) => resources.server(server),
                None => CallFuture::ready(None),
            }
        })
    }

    /// Controller versions, with compatibility against this client.
    pub fn versions(&self) -> CallFuture<Versions> {
        let (protocol, controller) = if self.cached {
            (self.connection.proto_ver(), self.connection.ctrl_ver())
        } else {
            (self.connection.get_proto_ver(), self.connection.get_ctrl_ver())
        };
        protocol
            .zip(controller)
            .map(|(protocol, controller)| Versions {
                protocol,
                controller,
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tonic::Status;

    use super::*;
    use crate::proto;

    #[test]
    fn test_not_found_becomes_none() {
        let result: Result<Option<u32>> = missing_as_none(Error::from(Status::not_found("gone")));
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn test_other_errors_propagate() {
        let result: Result<Option<u32>> =
            missing_as_none(Error::from(Status::permission_denied("no")));
        assert_eq!(result.unwrap_err().code(), Some(tonic::Code::PermissionDenied));
    }

    #[test]
    fn test_snapshot_discards_undecodable() {
        let raw = vec![proto::server::Short {
            id: "bogus".into(),
            ..Default::default()
        }];
        assert_eq!(snapshot::<_, ServerInfo>(Some(raw)), None);
        assert_eq!(snapshot::<proto::server::Short, ServerInfo>(None), None);
    }
}
