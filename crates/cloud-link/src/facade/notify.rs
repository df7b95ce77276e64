//! Power, readiness and screen notifications.

use std::sync::Arc;

use uuid::Uuid;

use crate::call::{CallHandle, Observer, map_observer};
use crate::connection::Connection;
use crate::proto;
use crate::types::{PowerEvent, ReadyEvent, ScreenLines};

/// Cloud-wide notifications.
#[derive(Debug, Clone)]
pub struct Notifications {
    connection: Arc<Connection>,
}

impl Notifications {
    /// Façade over `connection`.
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// Servers starting and stopping.
    pub fn power_events<O>(&self, observer: O) -> CallHandle
    where
        O: Observer<PowerEvent>,
    {
        self.connection
            .subscribe_to_power_events(map_observer(observer, |raw: proto::notify::PowerEvent| {
                Some(PowerEvent::from(raw))
            }))
    }

    /// Servers changing readiness.
    pub fn ready_events<O>(&self, observer: O) -> CallHandle
    where
        O: Observer<ReadyEvent>,
    {
        self.connection
            .subscribe_to_ready_events(map_observer(observer, |raw: proto::notify::ReadyEvent| {
                Some(ReadyEvent::from(raw))
            }))
    }

    /// Console output of `server`.
    pub fn screen<O>(&self, server: Uuid, observer: O) -> CallHandle
    where
        O: Observer<ScreenLines>,
    {
        self.connection.subscribe_to_screen(
            server.to_string(),
            map_observer(observer, |raw: proto::screen::Lines| {
                Some(ScreenLines::from(raw))
            }),
        )
    }
}
