// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-connection delivery pump.
//!
//! A pump is the only writer of its transport. It drains the client's
//! mailbox in order, sends keepalive pings, and watches the read side for
//! the peer going away. Whatever ends the loop, the client is unregistered
//! exactly once: the [`Registration`] guard does it on drop, which also
//! covers a panicking pump task.

use super::registry::{ClientId, Command};
use super::transport::{Inbound, Transport};
use crate::error::TransportError;
use crate::message::Message;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Why a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The coordinator dropped the mailbox (unregistered or hub shutdown)
    MailboxClosed,
    /// A message write failed or missed its deadline
    WriteFailed,
    /// A keepalive ping failed or missed its deadline
    KeepaliveFailed,
    /// The peer sent a close frame or went away
    PeerClosed,
    /// Reading from the peer failed
    ReadFailed,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PumpSettings {
    pub write_wait: Duration,
    pub ping_interval: Duration,
}

/// Sends `Unregister` for its client when dropped.
pub(crate) struct Registration {
    pub commands: mpsc::UnboundedSender<Command>,
    pub user: String,
    pub id: ClientId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let command = Command::Unregister {
            user: std::mem::take(&mut self.user),
            id: self.id,
        };
        // A stopped coordinator has already dropped every client
        let _ = self.commands.send(command);
    }
}

async fn with_deadline<F>(deadline: Duration, write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    time::timeout(deadline, write)
        .await
        .unwrap_or(Err(TransportError::TimedOut))
}

pub(crate) async fn run<T: Transport>(
    mut transport: T,
    mut mailbox: mpsc::Receiver<Arc<Message>>,
    registration: Registration,
    settings: PumpSettings,
) -> CloseReason {
    let id = registration.id;
    let user = registration.user.clone();

    let mut keepalive = time::interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            message = mailbox.recv() => {
                let Some(message) = message else {
                    break CloseReason::MailboxClosed;
                };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(%user, client = %id, error = %err, "Dropping unencodable message");
                        continue;
                    }
                };
                if let Err(err) = with_deadline(settings.write_wait, transport.write_message(text)).await {
                    debug!(%user, client = %id, error = %err, "Message write failed");
                    break CloseReason::WriteFailed;
                }
            }
            _ = keepalive.tick() => {
                if let Err(err) = with_deadline(settings.write_wait, transport.write_ping()).await {
                    debug!(%user, client = %id, error = %err, "Keepalive ping failed");
                    break CloseReason::KeepaliveFailed;
                }
            }
            inbound = transport.read_message() => match inbound {
                None | Some(Ok(Inbound::Close)) => break CloseReason::PeerClosed,
                Some(Err(err)) => {
                    debug!(%user, client = %id, error = %err, "Read failed");
                    break CloseReason::ReadFailed;
                }
                Some(Ok(_)) => {}
            },
        }
    };

    // Leave the registry before touching the connection again
    drop(registration);
    let _ = with_deadline(settings.write_wait, transport.close()).await;
    info!(%user, client = %id, ?reason, "Websocket connection closed");
    reason
}
