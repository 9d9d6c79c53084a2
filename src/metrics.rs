// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for admission control and notification delivery.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metric handles, registered on a private [`Registry`] so several
/// instances can coexist in one process.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Admission decisions by outcome (allowed, denied, error)
    pub admission: IntCounterVec,
    /// Notification outcomes per client or user (delivered, offline, dropped)
    pub notifications: IntCounterVec,
    /// Currently registered websocket clients
    pub connected_clients: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("ptracker".to_string()), None)?;

        let admission = IntCounterVec::new(
            Opts::new("admission_decisions_total", "Rate limiter admission decisions"),
            &["decision"],
        )?;
        let notifications = IntCounterVec::new(
            Opts::new("notifications_total", "Notification delivery outcomes"),
            &["outcome"],
        )?;
        let connected_clients =
            IntGauge::new("hub_connected_clients", "Registered websocket clients")?;

        registry.register(Box::new(admission.clone()))?;
        registry.register(Box::new(notifications.clone()))?;
        registry.register(Box::new(connected_clients.clone()))?;

        Ok(Self {
            registry,
            admission,
            notifications,
            connected_clients,
        })
    }

    /// Render every metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("connected_clients", &self.connected_clients.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_namespace() {
        let metrics = Metrics::new().unwrap();
        metrics.admission.with_label_values(&["denied"]).inc();
        metrics.connected_clients.set(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("ptracker_admission_decisions_total{decision=\"denied\"} 1"));
        assert!(text.contains("ptracker_hub_connected_clients 3"));
    }
}
