// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Message-framed bidirectional connections driven by a delivery pump.
//!
//! Deadlines are applied by the pump, not by implementations.
//! `read_message` must be cancel-safe: the pump polls it inside `select!`.

use crate::error::TransportError;
use axum::extract::ws::{self, WebSocket};
use std::future::Future;

#[cfg(any(test, feature = "test-util"))]
mod memory;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{pair, Frame, MemoryPeer, MemoryTransport};

/// What the peer sent us. The hub is send-only, so payloads are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Data,
    Ping,
    Pong,
    Close,
}

pub trait Transport: Send + 'static {
    fn write_message(
        &mut self,
        text: String,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn write_ping(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next inbound frame; `None` once the peer is gone.
    fn read_message(
        &mut self,
    ) -> impl Future<Output = Option<Result<Inbound, TransportError>>> + Send;

    /// Send a close frame.
    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

fn lost(err: axum::Error) -> TransportError {
    TransportError::ConnectionLost(err.to_string())
}

impl Transport for WebSocket {
    async fn write_message(&mut self, text: String) -> Result<(), TransportError> {
        self.send(ws::Message::Text(text)).await.map_err(lost)
    }

    async fn write_ping(&mut self) -> Result<(), TransportError> {
        self.send(ws::Message::Ping(Vec::new())).await.map_err(lost)
    }

    async fn read_message(&mut self) -> Option<Result<Inbound, TransportError>> {
        let frame = match self.recv().await? {
            Ok(ws::Message::Close(_)) => Ok(Inbound::Close),
            Ok(ws::Message::Ping(_)) => Ok(Inbound::Ping),
            Ok(ws::Message::Pong(_)) => Ok(Inbound::Pong),
            Ok(_) => Ok(Inbound::Data),
            Err(err) => Err(lost(err)),
        };
        Some(frame)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.send(ws::Message::Close(None)).await.map_err(lost)
    }
}
