// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! The registry coordinator.
//!
//! One task owns the `user -> clients` map and is the only code that ever
//! mutates it. Everything else talks to it through [`Command`]s, which are
//! handled strictly in arrival order. Dropping a [`ClientEntry`] drops the
//! client's mailbox sender, so a mailbox closes only after its client has
//! left the map and no later lookup can hand it out.

use crate::message::Message;
use crate::metrics::Metrics;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier of one live connection.
pub type ClientId = Uuid;

/// Sending half of a client's mailbox.
pub(crate) type Mailbox = mpsc::Sender<Arc<Message>>;

#[derive(Debug)]
pub(crate) struct ClientEntry {
    pub id: ClientId,
    pub user: String,
    pub mailbox: Mailbox,
}

#[derive(Debug)]
pub(crate) enum Command {
    Register(ClientEntry),
    Unregister {
        user: String,
        id: ClientId,
    },
    Lookup {
        user: String,
        reply: oneshot::Sender<Vec<(ClientId, Mailbox)>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown,
}

/// Point-in-time registry size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub users: usize,
    pub clients: usize,
}

pub(crate) struct Registry {
    clients: HashMap<String, Vec<ClientEntry>>,
    metrics: Metrics,
}

impl Registry {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            clients: HashMap::new(),
            metrics,
        }
    }

    /// Serve commands until every sender is gone or a shutdown arrives.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!("Notification hub running");
        while let Some(command) = commands.recv().await {
            match command {
                Command::Register(entry) => self.register(entry),
                Command::Unregister { user, id } => self.unregister(&user, id),
                Command::Lookup { user, reply } => {
                    let _ = reply.send(self.mailboxes(&user));
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown => {
                    self.close_all();
                    break;
                }
            }
        }
        info!("Notification hub stopped");
    }

    fn register(&mut self, entry: ClientEntry) {
        debug!(user = %entry.user, client = %entry.id, "Registering client");
        self.clients.entry(entry.user.clone()).or_default().push(entry);
        self.metrics.connected_clients.inc();
    }

    fn unregister(&mut self, user: &str, id: ClientId) {
        let Some(entries) = self.clients.get_mut(user) else {
            debug!(user, client = %id, "Unregister for unknown user");
            return;
        };
        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            warn!(user, client = %id, "Client not found during unregister");
            return;
        };

        // Dropping the entry closes its mailbox
        entries.remove(index);
        if entries.is_empty() {
            self.clients.remove(user);
        }
        self.metrics.connected_clients.dec();
        debug!(user, client = %id, "Unregistered client");
    }

    fn mailboxes(&self, user: &str) -> Vec<(ClientId, Mailbox)> {
        self.clients
            .get(user)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| (entry.id, entry.mailbox.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn stats(&self) -> HubStats {
        HubStats {
            users: self.clients.len(),
            clients: self.clients.values().map(Vec::len).sum(),
        }
    }

    fn close_all(&mut self) {
        let stats = self.stats();
        info!(users = stats.users, clients = stats.clients, "Closing all client mailboxes");
        self.clients.clear();
        self.metrics.connected_clients.set(0);
    }
}
