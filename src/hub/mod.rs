// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-user notification hub.
//!
//! [`Hub`] is a cheap, cloneable handle. Connections are attached with
//! [`Hub::connect`], which registers the client and spawns its delivery
//! pump; business code sends with [`Hub::notify`] and
//! [`Hub::batch_notify`]. Registry state lives in a single coordinator task
//! (see [`registry`]), so no lock guards the client map.
//!
//! Delivery is best-effort. A dead connection is torn down by its pump and
//! never reported to the caller of `notify`.

pub mod pump;
pub mod registry;
pub mod transport;

use crate::config::HubConfig;
use crate::error::NotifyError;
use crate::message::Message;
use crate::metrics::Metrics;
use pump::{CloseReason, PumpSettings, Registration};
use registry::{ClientEntry, Command, Mailbox, Registry};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use transport::Transport;
use uuid::Uuid;

pub use registry::{ClientId, HubStats};

/// Per-user outcome of a [`Hub::batch_notify`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Users that had at least one mailbox accept the message
    pub delivered: Vec<String>,
    /// Users with no registered connection
    pub offline: Vec<String>,
    /// Users whose delivery failed for another reason
    pub failed: Vec<String>,
}

#[derive(Debug)]
struct Settings {
    pump: PumpSettings,
    mailbox_capacity: usize,
    send_timeout: Option<Duration>,
}

enum Enqueued {
    Accepted,
    Gone,
    TimedOut,
}

/// Handle to the notification hub.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<Command>,
    settings: Arc<Settings>,
    metrics: Metrics,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("settings", &self.settings)
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl Hub {
    /// Start the coordinator task. Must be called inside a tokio runtime.
    pub fn spawn(config: &HubConfig, metrics: Metrics) -> Self {
        let mut ping_interval = config.ping_interval();
        if ping_interval.is_zero() {
            ping_interval = HubConfig::default().ping_interval();
            warn!(
                ping_interval_ms = ping_interval.as_millis() as u64,
                "Keepalive interval of 0 is invalid, using the default"
            );
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Registry::new(metrics.clone()).run(receiver));

        Self {
            commands,
            settings: Arc::new(Settings {
                pump: PumpSettings {
                    write_wait: config.write_wait(),
                    ping_interval,
                },
                mailbox_capacity: config.mailbox_capacity.max(1),
                send_timeout: config.send_timeout(),
            }),
            metrics,
        }
    }

    /// Register a connection for `user` and spawn its delivery pump.
    ///
    /// Registration is queued, not awaited: any `notify` issued after this
    /// returns is ordered behind it. The returned handle resolves when the
    /// connection has been torn down.
    pub fn connect<T: Transport>(
        &self,
        user: impl Into<String>,
        transport: T,
    ) -> JoinHandle<CloseReason> {
        let user = user.into();
        let id = Uuid::new_v4();
        let (mailbox, receiver) = mpsc::channel(self.settings.mailbox_capacity);

        let entry = ClientEntry {
            id,
            user: user.clone(),
            mailbox,
        };
        if self.commands.send(Command::Register(entry)).is_err() {
            // The rejected entry took the mailbox sender with it, so the
            // pump below closes the connection straight away.
            warn!(%user, client = %id, "Hub is shut down, rejecting connection");
        } else {
            info!(%user, client = %id, "Websocket connection established");
        }

        let registration = Registration {
            commands: self.commands.clone(),
            user,
            id,
        };
        tokio::spawn(pump::run(
            transport,
            receiver,
            registration,
            self.settings.pump,
        ))
    }

    async fn lookup(&self, user: &str) -> Result<Vec<(ClientId, Mailbox)>, NotifyError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Lookup {
                user: user.to_string(),
                reply,
            })
            .map_err(|_| NotifyError::HubClosed)?;
        answer.await.map_err(|_| NotifyError::HubClosed)
    }

    async fn enqueue(&self, mailbox: &Mailbox, message: Arc<Message>) -> Enqueued {
        let sent = match self.settings.send_timeout {
            None => mailbox.send(message).await,
            Some(limit) => match tokio::time::timeout(limit, mailbox.send(message)).await {
                Ok(sent) => sent,
                Err(_) => return Enqueued::TimedOut,
            },
        };
        match sent {
            Ok(()) => Enqueued::Accepted,
            Err(_) => Enqueued::Gone,
        }
    }

    /// Push `message` onto every mailbox registered for `user`.
    ///
    /// Returns how many mailboxes accepted it. Fails with
    /// [`NotifyError::Offline`] when the user has no live connection. With
    /// no send timeout configured, a full mailbox makes this wait.
    pub async fn notify(&self, user: &str, message: Message) -> Result<usize, NotifyError> {
        let mailboxes = self.lookup(user).await?;
        if mailboxes.is_empty() {
            self.metrics.notifications.with_label_values(&["offline"]).inc();
            return Err(NotifyError::Offline {
                user: user.to_string(),
            });
        }

        let message = Arc::new(message);
        let mut delivered = 0;
        let mut timed_out = None;
        for (id, mailbox) in &mailboxes {
            match self.enqueue(mailbox, message.clone()).await {
                Enqueued::Accepted => delivered += 1,
                Enqueued::Gone => {
                    // The pump is already tearing down; its unregister is queued
                    debug!(user, client = %id, "Mailbox closed, skipping client");
                    self.metrics.notifications.with_label_values(&["dropped"]).inc();
                }
                Enqueued::TimedOut => {
                    warn!(user, client = %id, "Mailbox send timed out");
                    self.metrics.notifications.with_label_values(&["dropped"]).inc();
                    timed_out = Some(*id);
                }
            }
        }

        if delivered > 0 {
            self.metrics
                .notifications
                .with_label_values(&["delivered"])
                .inc_by(delivered as u64);
            return Ok(delivered);
        }
        match timed_out {
            Some(client) => Err(NotifyError::MailboxTimeout { client }),
            None => Err(NotifyError::Offline {
                user: user.to_string(),
            }),
        }
    }

    /// Notify each user independently. One user's failure never stops
    /// delivery to the others.
    pub async fn batch_notify<I, U>(&self, users: I, message: Message) -> BatchReport
    where
        I: IntoIterator<Item = U>,
        U: AsRef<str>,
    {
        let mut report = BatchReport::default();
        for user in users {
            let user = user.as_ref();
            match self.notify(user, message.clone()).await {
                Ok(_) => report.delivered.push(user.to_string()),
                Err(NotifyError::Offline { .. }) => report.offline.push(user.to_string()),
                Err(err) => {
                    debug!(user, error = %err, "Batch notification failed for user");
                    report.failed.push(user.to_string());
                }
            }
        }

        if !report.failed.is_empty() {
            warn!(
                kind = %message.kind,
                failed = report.failed.len(),
                offline = report.offline.len(),
                delivered = report.delivered.len(),
                "Batch notification partially failed"
            );
        }
        report
    }

    /// Number of live connections registered for `user`.
    pub async fn client_count(&self, user: &str) -> Result<usize, NotifyError> {
        Ok(self.lookup(user).await?.len())
    }

    pub async fn stats(&self) -> Result<HubStats, NotifyError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| NotifyError::HubClosed)?;
        answer.await.map_err(|_| NotifyError::HubClosed)
    }

    /// Stop the coordinator. Every mailbox is closed, so pumps flush what
    /// they already hold and close their connections.
    pub fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).is_ok() {
            info!("Notification hub shutting down");
        }
    }
}
