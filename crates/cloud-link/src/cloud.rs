//! Process entrypoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::facade::{Channels, LocalServer, Notifications, Resources, Transfers};
use crate::heart::{Heart, HeartHandle};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// The cloud client of this process.
///
/// There is no global accessor: the value returned by [`Cloud::setup`] is
/// passed to whatever needs it.
#[derive(Debug, Clone)]
pub struct Cloud {
    connection: Arc<Connection>,
    heartbeat_interval: Duration,
}

impl Cloud {
    /// Connect using `config`. Succeeds at most once per process.
    ///
    /// A failed attempt does not count; a later call may retry.
    pub async fn setup(config: ClientConfig) -> Result<Self> {
        if INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }

        match Connection::connect(&config).await {
            Ok(connection) => Ok(Self {
                connection: Arc::new(connection),
                heartbeat_interval: config.heartbeat_interval,
            }),
            Err(e) => {
                INITIALIZED.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Servers, groups, users and versions.
    pub fn resources(&self) -> Resources {
        Resources::new(Arc::clone(&self.connection))
    }

    /// User transfers.
    pub fn transfers(&self) -> Transfers {
        Transfers::new(Arc::clone(&self.connection))
    }

    /// Channel messaging.
    pub fn channels(&self) -> Channels {
        Channels::new(Arc::clone(&self.connection))
    }

    /// This server's own state.
    pub fn local(&self) -> LocalServer {
        LocalServer::new(Arc::clone(&self.connection))
    }

    /// Power, readiness and screen notifications.
    pub fn notifications(&self) -> Notifications {
        Notifications::new(Arc::clone(&self.connection))
    }

    /// Start the heartbeat at the configured interval.
    pub fn start_heart(&self) -> HeartHandle {
        Heart::new(Arc::clone(&self.connection), self.heartbeat_interval).start()
    }
}
