//! Domain values returned by the façades.

use std::borrow::Cow;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::proto;

/// Protocol revision this client speaks
pub const PROTOCOL_VERSION: u32 = 1;

fn parse_uuid(what: &str, raw: &str) -> Result<Uuid> {
    Uuid::from_str(raw).map_err(|e| Error::Decode(format!("{what} id {raw:?}: {e}")))
}

/// A server managed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    /// Unique id
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Group the server was started for, if any
    pub group: Option<String>,
    /// Node hosting the server
    pub node: String,
}

impl TryFrom<proto::server::Short> for ServerInfo {
    type Error = Error;

    fn try_from(server: proto::server::Short) -> Result<Self> {
        Ok(Self {
            id: parse_uuid("server", &server.id)?,
            name: server.name,
            group: server.group,
            node: server.node,
        })
    }
}

/// A group of servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    /// Unique name
    pub name: String,
}

impl From<proto::group::Short> for GroupInfo {
    fn from(group: proto::group::Short) -> Self {
        Self { name: group.name }
    }
}

/// A user connected somewhere in the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    /// Unique id
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Server the user is on, if known
    pub server: Option<Uuid>,
}

impl TryFrom<proto::user::Item> for UserInfo {
    type Error = Error;

    fn try_from(user: proto::user::Item) -> Result<Self> {
        Ok(Self {
            id: parse_uuid("user", &user.id)?,
            name: user.name,
            server: user
                .server
                .as_deref()
                .map(|id| parse_uuid("server", id))
                .transpose()?,
        })
    }
}

/// Where users should be moved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum TransferTarget {
    /// A specific server
    Server(Uuid),
    /// Any server of a group, picked by the controller
    Group(String),
    /// Whatever the controller considers the fallback
    Fallback,
}

impl From<TransferTarget> for proto::transfer::Target {
    fn from(target: TransferTarget) -> Self {
        use proto::transfer::target::Type;

        let (kind, target) = match target {
            TransferTarget::Server(id) => (Type::Server, Some(id.to_string())),
            TransferTarget::Group(name) => (Type::Group, Some(name)),
            TransferTarget::Fallback => (Type::Fallback, None),
        };
        Self {
            r#type: kind.into(),
            target,
        }
    }
}

/// A transfer the controller resolved for one of this server's users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTransfer {
    /// The user to move
    pub user: Uuid,
    /// Host of the target server
    pub host: String,
    /// Port of the target server
    pub port: u16,
}

impl TryFrom<proto::transfer::TransferRes> for ResolvedTransfer {
    type Error = Error;

    fn try_from(transfer: proto::transfer::TransferRes) -> Result<Self> {
        Ok(Self {
            user: parse_uuid("user", &transfer.id)?,
            port: u16::try_from(transfer.port)
                .map_err(|_| Error::Decode(format!("port {} out of range", transfer.port)))?,
            host: transfer.host,
        })
    }
}

/// A message received on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMessage {
    /// Publish time in milliseconds since the unix epoch
    pub timestamp_ms: u64,
    /// Raw payload
    pub data: Vec<u8>,
}

impl ChannelMessage {
    /// Payload decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

impl From<proto::channel::Msg> for ChannelMessage {
    fn from(msg: proto::channel::Msg) -> Self {
        Self {
            timestamp_ms: msg.timestamp,
            data: msg.data,
        }
    }
}

/// A channel message decoded as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextMessage {
    /// Publish time in milliseconds since the unix epoch
    pub timestamp_ms: u64,
    /// Decoded payload
    pub text: String,
}

impl From<ChannelMessage> for TextMessage {
    fn from(msg: ChannelMessage) -> Self {
        let text = match String::from_utf8(msg.data) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        Self {
            timestamp_ms: msg.timestamp_ms,
            text,
        }
    }
}

/// Power transition of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// The server is starting
    Start,
    /// The server is stopping
    Stop,
}

/// A server started or stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerEvent {
    /// Direction of the transition
    pub state: PowerState,
    /// Server name
    pub name: String,
    /// Node hosting the server
    pub node: String,
}

impl From<proto::notify::PowerEvent> for PowerEvent {
    fn from(event: proto::notify::PowerEvent) -> Self {
        let state = match event.state() {
            proto::notify::power_event::State::Start => PowerState::Start,
            proto::notify::power_event::State::Stop => PowerState::Stop,
        };
        Self {
            state,
            name: event.name,
            node: event.node,
        }
    }
}

/// A server changed its readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyEvent {
    /// Whether the server now accepts users
    pub ready: bool,
    /// Server name
    pub name: String,
}

impl From<proto::notify::ReadyEvent> for ReadyEvent {
    fn from(event: proto::notify::ReadyEvent) -> Self {
        Self {
            ready: event.ready,
            name: event.name,
        }
    }
}

/// Console output of a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenLines {
    /// Lines in output order
    pub lines: Vec<String>,
}

impl From<proto::screen::Lines> for ScreenLines {
    fn from(lines: proto::screen::Lines) -> Self {
        Self { lines: lines.lines }
    }
}

/// Versions reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Versions {
    /// Protocol revision of the controller
    pub protocol: u32,
    /// Human readable controller version
    pub controller: String,
}

impl Versions {
    /// Returns true if the controller speaks [`PROTOCOL_VERSION`].
    pub fn is_compatible(&self) -> bool {
        self.protocol == PROTOCOL_VERSION
    }
}
