// SPDX-License-Identifier: MIT OR Apache-2.0
//! The fake socket surface.
//!
//! Downstream HTTP libraries poke at the socket their request rides on:
//! addresses, TLS indicators, `setNoDelay`/`setKeepAlive`, timeouts, and
//! destruction. The fake socket satisfies all of it without a file
//! descriptor in sight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Events emitted by the fake socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The (synthetic) TCP connection completed.
    Connect,
    /// The (synthetic) TLS handshake completed; https only.
    SecureConnect,
    /// The socket was torn down.
    Close,
    /// The socket failed.
    Error,
    /// A configured timeout elapsed.
    Timeout,
}

#[derive(Debug)]
pub(crate) struct SocketShared {
    pub destroyed: AtomicBool,
    pub events: mpsc::UnboundedSender<SocketEvent>,
}

/// Handle to the fake socket a mock request rides on.
#[derive(Debug)]
pub struct MockSocket {
    encrypted: bool,
    remote_address: String,
    remote_port: u16,
    shared: Arc<SocketShared>,
    events: mpsc::UnboundedReceiver<SocketEvent>,
}

impl MockSocket {
    pub(crate) fn new(encrypted: bool, remote_address: String, remote_port: u16) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            encrypted,
            remote_address,
            remote_port,
            shared: Arc::new(SocketShared {
                destroyed: AtomicBool::new(false),
                events: tx,
            }),
            events: rx,
        }
    }

    pub(crate) fn shared(&self) -> Arc<SocketShared> {
        Arc::clone(&self.shared)
    }

    /// Local address of the synthetic connection.
    #[must_use]
    pub fn local_address(&self) -> &'static str {
        "127.0.0.1"
    }

    /// Local port of the synthetic connection.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        0
    }

    /// Remote address (the requested hostname).
    #[must_use]
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// Remote address family.
    #[must_use]
    pub fn remote_family(&self) -> &'static str {
        "IPv4"
    }

    /// Remote port.
    #[must_use]
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Whether the connection is TLS.
    #[must_use]
    pub fn encrypted(&self) -> bool {
        self.encrypted
    }

    /// Accepted and ignored; there is no Nagle to disable.
    pub fn set_no_delay(&self, _no_delay: bool) {}

    /// Accepted and ignored.
    pub fn set_keep_alive(&self, _keep_alive: bool, _initial_delay: Duration) {}

    /// Accepted and ignored; request-level timeouts drive the events.
    pub fn set_timeout(&self, _timeout: Duration) {}

    /// Tear the socket down; emits [`SocketEvent::Close`] once.
    pub fn destroy(&self) {
        if !self.shared.destroyed.swap(true, Ordering::SeqCst) {
            let _ = self.shared.events.send(SocketEvent::Close);
        }
    }

    /// Whether the socket has been destroyed.
    #[must_use]
    pub fn destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    /// Receive the next socket event; `None` once the sender side is gone.
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        self.events.recv().await
    }

    /// Drain whatever events are immediately available.
    pub fn drain_events(&mut self) -> Vec<SocketEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
