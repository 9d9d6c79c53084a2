// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! In-process transport for exercising the hub without sockets. Built for
//! tests and behind the `test-util` feature.

use super::{Inbound, Transport};
use crate::error::TransportError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A frame written by the pump to a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping,
    Close,
}

/// In-process transport, paired with a [`MemoryPeer`] standing in for the
/// remote client.
#[derive(Debug)]
pub struct MemoryTransport {
    outgoing: mpsc::UnboundedSender<Frame>,
    incoming: mpsc::UnboundedReceiver<Inbound>,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
}

/// Remote end of a [`MemoryTransport`]. Dropping it disconnects the client.
#[derive(Debug)]
pub struct MemoryPeer {
    frames: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<Inbound>,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
}

/// Create a connected transport and peer.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let fail_writes = Arc::new(AtomicBool::new(false));
    let stall_writes = Arc::new(AtomicBool::new(false));

    (
        MemoryTransport {
            outgoing: out_tx,
            incoming: in_rx,
            fail_writes: fail_writes.clone(),
            stall_writes: stall_writes.clone(),
        },
        MemoryPeer {
            frames: out_rx,
            inbound: in_tx,
            fail_writes,
            stall_writes,
        },
    )
}

impl MemoryTransport {
    async fn write(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost("write refused".into()));
        }
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::ConnectionLost("peer dropped".into()))
    }
}

impl Transport for MemoryTransport {
    async fn write_message(&mut self, text: String) -> Result<(), TransportError> {
        self.write(Frame::Text(text)).await
    }

    async fn write_ping(&mut self) -> Result<(), TransportError> {
        self.write(Frame::Ping).await
    }

    async fn read_message(&mut self) -> Option<Result<Inbound, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.write(Frame::Close).await
    }
}

impl MemoryPeer {
    /// Next frame of any kind; `None` once the transport is dropped.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Next text frame, skipping keepalive pings.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.frames.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Ping => continue,
                Frame::Close => return None,
            }
        }
    }

    /// A frame already written, without waiting.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }

    /// Deliver an inbound frame to the transport.
    pub fn send(&self, frame: Inbound) -> bool {
        self.inbound.send(frame).is_ok()
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make every subsequent write hang until its deadline.
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }
}
