//! Loopback relay between the MySQL driver and a transport.
//!
//! The driver can only open plain TCP sockets. The relay listens on an
//! ephemeral loopback port; each socket the driver opens there is paired with
//! one fresh `dial` on the transport, and bytes are copied both ways until
//! either side closes. A failed dial only shows up to the driver as a closed
//! socket, so the relay keeps the failure for the connector to pick up.

use super::Transport;
use crate::error::TransportError;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Pause after a failed `accept` so persistent errors (e.g. EMFILE) do not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

type DialFailure = Arc<Mutex<Option<TransportError>>>;

pub struct TransportRelay {
    local_addr: SocketAddr,
    dial_failure: DialFailure,
    accept_task: JoinHandle<()>,
}

impl TransportRelay {
    /// Start relaying connections to `target` (host:port) through `transport`.
    pub async fn start(
        transport: Arc<dyn Transport>,
        target: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let target = target.into();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(TransportError::Relay)?;
        let local_addr = listener.local_addr().map_err(TransportError::Relay)?;

        tracing::debug!("Relay {} -> {} started", local_addr, target);
        let dial_failure = DialFailure::default();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            transport,
            target,
            dial_failure.clone(),
        ));

        Ok(Self {
            local_addr,
            dial_failure,
            accept_task,
        })
    }

    /// Address the driver should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The most recent dial failure, if one happened since the last call.
    pub fn take_dial_failure(&self) -> Option<TransportError> {
        self.dial_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for TransportRelay {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    transport: Arc<dyn Transport>,
    target: String,
    dial_failure: DialFailure,
) {
    let listener = &listener;
    loop {
        let (inbound, peer) = accept_retrying(|| listener.accept()).await;
        tracing::debug!("Relay accepted {} for {}", peer, target);
        tokio::spawn(relay_connection(
            inbound,
            transport.clone(),
            target.clone(),
            dial_failure.clone(),
        ));
    }
}

/// Call `accept` until it succeeds, backing off after each error.
async fn accept_retrying<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                tracing::warn!("Relay accept failed: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

async fn relay_connection(
    mut inbound: TcpStream,
    transport: Arc<dyn Transport>,
    target: String,
    dial_failure: DialFailure,
) {
    let mut outbound = match transport.dial(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Relay could not reach {}: {}", target, e);
            // Stored before `inbound` is dropped, so it is in place by the
            // time the driver sees the socket close.
            *dial_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
            return;
        }
    };

    match tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
        Ok((sent, received)) => {
            tracing::debug!("Relay to {} closed ({} bytes out, {} in)", target, sent, received)
        }
        Err(e) => tracing::debug!("Relay to {} ended: {}", target, e),
    }
}
