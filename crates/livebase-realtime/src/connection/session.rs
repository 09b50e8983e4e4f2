//! Per-connection event loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::bridge::BridgedClient;
use crate::message::Message;

/// Why a connection's event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Nothing was delivered for the idle timeout.
    IdleTimeout,
    /// The client was discarded (eviction or shutdown).
    Discarded,
    /// The transport went away.
    TransportClosed,
    /// Every mailbox sender was dropped.
    MailboxClosed,
    /// Writing to the transport failed.
    WriteFailed,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdleTimeout => write!(f, "idle_timeout"),
            Self::Discarded => write!(f, "discarded"),
            Self::TransportClosed => write!(f, "transport_closed"),
            Self::MailboxClosed => write!(f, "mailbox_closed"),
            Self::WriteFailed => write!(f, "write_failed"),
        }
    }
}

/// The long-lived half of a local connection: drains the client's mailbox
/// into the transport until one of the exit conditions fires.
#[derive(Debug)]
pub struct ClientSession {
    client: Arc<BridgedClient>,
    mailbox: mpsc::Receiver<Message>,
    idle_timeout: Duration,
}

impl ClientSession {
    /// Create a session for a freshly registered local client.
    pub fn new(
        client: Arc<BridgedClient>,
        mailbox: mpsc::Receiver<Message>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            client,
            mailbox,
            idle_timeout,
        }
    }

    /// The client this session serves.
    pub fn client(&self) -> &Arc<BridgedClient> {
        &self.client
    }

    /// Forward messages to `outbound` until the loop ends. The idle timer
    /// restarts after every forwarded message.
    pub async fn run(mut self, outbound: mpsc::Sender<Message>) -> SessionEnd {
        let idle = time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        let end = loop {
            tokio::select! {
                _ = &mut idle => break SessionEnd::IdleTimeout,
                _ = self.client.client().cancelled() => break SessionEnd::Discarded,
                _ = outbound.closed() => break SessionEnd::TransportClosed,
                message = self.mailbox.recv() => {
                    let Some(message) = message else {
                        break SessionEnd::MailboxClosed;
                    };
                    if outbound.send(message).await.is_err() {
                        break SessionEnd::WriteFailed;
                    }
                    idle.as_mut().reset(Instant::now() + self.idle_timeout);
                }
            }
        };

        self.mailbox.close();
        debug!(client_id = %self.client.id(), reason = %end, "Client session ended");
        end
    }
}
