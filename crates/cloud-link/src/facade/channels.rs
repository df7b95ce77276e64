//! Named publish/subscribe channels.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bridge::CallFuture;
use crate::call::{CallHandle, EventStream, Observer, event_stream, map_observer};
use crate::connection::Connection;
use crate::proto;
use crate::types::{ChannelMessage, TextMessage};

/// Publish/subscribe messaging between servers.
#[derive(Debug, Clone)]
pub struct Channels {
    connection: Arc<Connection>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

impl Channels {
    /// Façade over `connection`.
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// Publish raw bytes. Resolves with the number of subscribers reached.
    pub fn publish_bytes(
        &self,
        channel: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> CallFuture<u32> {
        self.connection.publish_message(proto::channel::Msg {
            channel: channel.into(),
            timestamp: now_ms(),
            data: data.into(),
        })
    }

    /// Publish UTF-8 text. Resolves with the number of subscribers reached.
    pub fn publish_text(&self, channel: impl Into<String>, text: &str) -> CallFuture<u32> {
        self.publish_bytes(channel, text.as_bytes())
    }

    /// Receive messages published on `channel` from now on.
    pub fn subscribe_bytes<O>(&self, channel: impl Into<String>, observer: O) -> CallHandle
    where
        O: Observer<ChannelMessage>,
    {
        self.connection.subscribe_to_channel(
            channel.into(),
            map_observer(observer, |raw: proto::channel::Msg| Some(ChannelMessage::from(raw))),
        )
    }

    /// Like [`Channels::subscribe_bytes`], with payloads decoded as text.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn subscribe_text<O>(&self, channel: impl Into<String>, observer: O) -> CallHandle
    where
        O: Observer<TextMessage>,
    {
        self.subscribe_bytes(
            channel,
            map_observer(observer, |message: ChannelMessage| Some(TextMessage::from(message))),
        )
    }

    /// Receive messages on `channel` as an async stream.
    pub fn stream_bytes(
        &self,
        channel: impl Into<String>,
    ) -> (CallHandle, EventStream<ChannelMessage>) {
        let (observer, events) = event_stream();
        (self.subscribe_bytes(channel, observer), events)
    }
}
