//! Connection supervision.
//!
//! One task owns the connection lifecycle: connect, hand the write half to
//! the binding, pump inbound frames, and on any failure tear down and retry
//! after a fixed delay, forever, until cancelled. Everything else observes
//! the connection through a watch channel.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::transport::wire::Wire;
use crate::transport::Transport;

pub const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Read side of the connection state, handed out by the facade.
#[derive(Clone)]
pub struct ConnectionMonitor(watch::Receiver<ConnectionState>);

impl ConnectionMonitor {
    pub fn state(&self) -> ConnectionState {
        *self.0.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Resolve once the bus is connected, immediately if it already is.
    pub async fn wait_connected(&mut self) {
        // watch::Receiver::wait_for also checks the current value first.
        let _ = self
            .0
            .wait_for(|state| *state == ConnectionState::Connected)
            .await;
    }
}

/// Runs after each successful (re)connection, once subscriptions are back
/// on the wire.
pub(crate) type ReconnectHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) fn state_channel() -> (watch::Sender<ConnectionState>, ConnectionMonitor) {
    let (tx, rx) = watch::channel(ConnectionState::Disconnected);
    (tx, ConnectionMonitor(rx))
}

pub(crate) async fn run(
    wire: Arc<dyn Wire>,
    transport: Arc<Transport>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    on_connected: ReconnectHook,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        state.send_replace(ConnectionState::Connecting);

        let connected = tokio::select! {
            result = wire.connect() => result,
            _ = cancel.cancelled() => break,
        };
        let (sink, mut stream) = match connected {
            Ok(halves) => halves,
            Err(e) => {
                warn!(error = %e, "connection failed");
                state.send_replace(ConnectionState::Disconnected);
                if !sleep_before_retry(&cancel).await {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = transport.install(sink).await {
            warn!(error = %e, "could not restore subscriptions");
            transport.teardown().await;
            state.send_replace(ConnectionState::Disconnected);
            if !sleep_before_retry(&cancel).await {
                break;
            }
            continue;
        }

        info!("connected to the bus");
        state.send_replace(ConnectionState::Connected);

        // Replay must not block the read loop: group acks resolve through
        // frames this loop reads.
        tokio::spawn(on_connected());

        loop {
            tokio::select! {
                frame = stream.next_text() => match frame {
                    Some(Ok(text)) => transport.handle_frame(&text).await,
                    Some(Err(e)) => {
                        warn!(error = %e, "connection error");
                        break;
                    }
                    None => {
                        info!("connection closed");
                        break;
                    }
                },
                _ = cancel.cancelled() => break,
            }
        }

        // On shutdown the close handshake must reach the server before the
        // sink is dropped.
        if cancel.is_cancelled() {
            transport.close().await;
        }
        transport.teardown().await;
        state.send_replace(ConnectionState::Disconnected);

        if cancel.is_cancelled() {
            break;
        }
        info!(delay_secs = RECONNECT_DELAY.as_secs(), "reconnecting");
        if !sleep_before_retry(&cancel).await {
            break;
        }
    }

    state.send_replace(ConnectionState::Disconnected);
}

/// Fixed-delay retry; returns `false` when cancelled during the wait.
async fn sleep_before_retry(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RECONNECT_DELAY) => true,
        _ = cancel.cancelled() => false,
    }
}
