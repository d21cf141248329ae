//! # Telemetry Module
//!
//! Republishes the latest fused reading to the fire-control side.
//!
//! This module handles:
//! - Holding the latest distance/elevation/azimuth (last value wins)
//! - CAN egress as three little-endian `f32` frames
//! - TCP egress as newline-delimited JSON
//! - Publishing on a fixed cadence with per-channel failure isolation

pub mod publisher;
pub mod record;
pub mod sinks;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::can::bus::SocketCanBus;
use crate::config::{CanConfig, TelemetryConfig};
use crate::events::{ConsoleEvent, EventBus};
use publisher::TelemetryPublisher;
use record::TelemetrySlot;
use sinks::{CanTelemetrySink, StreamTelemetrySink, TelemetryIds, TelemetrySink};

impl From<&TelemetryConfig> for TelemetryIds {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            distance: config.distance_id,
            elevation: config.elevation_id,
            azimuth: config.azimuth_id,
        }
    }
}

/// Open every configured output channel
///
/// A channel that cannot be opened is reported and left out; the others
/// still run.
pub async fn open_sinks(
    telemetry: &TelemetryConfig,
    can: &CanConfig,
    events: &EventBus,
) -> Vec<Box<dyn TelemetrySink>> {
    let mut sinks: Vec<Box<dyn TelemetrySink>> = Vec::new();

    if telemetry.can_enabled {
        match SocketCanBus::open(can.output_interface()) {
            Ok(bus) => sinks.push(Box::new(CanTelemetrySink::new(bus, TelemetryIds::from(telemetry)))),
            Err(e) => {
                warn!("CAN telemetry disabled: {}", e);
                events.publish(ConsoleEvent::fault(&e));
            }
        }
    }

    match StreamTelemetrySink::connect(
        &telemetry.tcp_address,
        telemetry.tcp_port,
        telemetry.connect_timeout(),
    )
    .await {
        Ok(sink) => sinks.push(Box::new(sink)),
        Err(e) => {
            warn!("TCP telemetry disabled: {}", e);
            events.publish(ConsoleEvent::fault(&e));
        }
    }

    sinks
}

/// Build a publisher over the configured channels
pub async fn publisher(
    telemetry: &TelemetryConfig,
    can: &CanConfig,
    slot: TelemetrySlot,
    events: &EventBus,
) -> TelemetryPublisher {
    let sinks = open_sinks(telemetry, can, events).await;
    TelemetryPublisher::new(
        slot,
        sinks,
        Duration::from_millis(telemetry.publish_interval_ms),
    )
    .with_send_timeout(telemetry.send_timeout())
}

/// Open the channels and publish until cancelled
///
/// Opening happens inside the task so a slow peer never delays the rest of
/// the console; cancellation also abandons a connect still in progress.
pub async fn run(
    telemetry: TelemetryConfig,
    can: CanConfig,
    slot: TelemetrySlot,
    events: EventBus,
    cancel: CancellationToken,
) {
    let publisher = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Telemetry stopped before its channels opened");
            return;
        }
        built = publisher(&telemetry, &can, slot, &events) => built,
    };
    publisher.run(events, cancel).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_from_config() {
        let ids = TelemetryIds::from(&TelemetryConfig::default());
        assert_eq!(ids.distance, 0x100);
        assert_eq!(ids.elevation, 0x101);
        assert_eq!(ids.azimuth, 0x102);
    }

    #[tokio::test]
    async fn test_unreachable_channels_are_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let telemetry = TelemetryConfig {
            can_enabled: false,
            tcp_address: "127.0.0.1".into(),
            tcp_port: port,
            ..TelemetryConfig::default()
        };
        let events = EventBus::default();
        let mut rx = events.subscribe();

        let sinks = open_sinks(&telemetry, &CanConfig::default(), &events).await;
        assert!(sinks.is_empty());
        assert!(matches!(rx.recv().await.unwrap(), ConsoleEvent::Fault { .. }));
    }

    #[tokio::test]
    async fn test_run_publishes_over_tcp() {
        use tokio::io::AsyncBufReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let telemetry = TelemetryConfig {
            can_enabled: false,
            tcp_address: "127.0.0.1".into(),
            tcp_port: listener.local_addr().unwrap().port(),
            publish_interval_ms: 50,
            send_timeout_ms: 25,
            ..TelemetryConfig::default()
        };
        let slot = TelemetrySlot::new(45.0, 39.0);
        slot.update_distance(321.0);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            telemetry,
            CanConfig::default(),
            slot,
            EventBus::default(),
            cancel.clone(),
        ));

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = tokio::io::BufReader::new(stream).lines();
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["distance"], 321.0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_while_channels_open() {
        let telemetry = TelemetryConfig {
            can_enabled: false,
            tcp_address: "10.255.255.1".into(),
            connect_timeout_ms: 60_000,
            ..TelemetryConfig::default()
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            telemetry,
            CanConfig::default(),
            TelemetrySlot::new(45.0, 39.0),
            EventBus::default(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
