//! Periodic liveness signal to the controller.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::bridge::CallFuture;
use crate::config::DEFAULT_HEARTBEAT_INTERVAL;
use crate::connection::Connection;

/// Something that can tell the controller this server is alive.
pub trait Pulse: Send + Sync + 'static {
    /// Send one heartbeat.
    fn beat(&self) -> CallFuture<()>;
}

impl Pulse for Connection {
    fn beat(&self) -> CallFuture<()> {
        Connection::beat(self)
    }
}

/// Heartbeat schedule, not yet running.
#[derive(Debug)]
pub struct Heart<P> {
    pulse: Arc<P>,
    interval: Duration,
}

impl<P: Pulse> Heart<P> {
    /// Beat through `pulse` every `interval`.
    ///
    /// A zero interval falls back to [`DEFAULT_HEARTBEAT_INTERVAL`].
    pub fn new(pulse: Arc<P>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            tracing::warn!(fallback = ?DEFAULT_HEARTBEAT_INTERVAL, "zero heartbeat interval");
            DEFAULT_HEARTBEAT_INTERVAL
        } else {
            interval
        };
        Self { pulse, interval }
    }

    /// Start beating on the current runtime. The first beat goes out
    /// immediately; a beat still pending after one interval counts as failed.
    pub fn start(self) -> HeartHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(run(self.pulse, self.interval, token.clone()));
        tracing::info!(interval = ?self.interval, "heartbeat started");
        HeartHandle { token, task }
    }
}

/// A running heartbeat.
#[derive(Debug)]
pub struct HeartHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl HeartHandle {
    /// Stop beating and wait for the timer task to end.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("heartbeat task panicked: {}", e);
        }
        tracing::info!("heartbeat stopped");
    }

    /// Returns true until the heartbeat is stopped.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

async fn run<P: Pulse>(pulse: Arc<P>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    // A stalled runtime should not result in a burst of beats.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = tokio::time::timeout(period, pulse.beat()) => result,
        };
        match result {
            Ok(Ok(())) => tracing::trace!("heartbeat sent"),
            Ok(Err(error)) => tracing::warn!(%error, "heartbeat failed"),
            Err(_) => tracing::warn!(timeout = ?period, "heartbeat timed out"),
        }
    }
}
