/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Best-effort MQTT publishing.
//!
//! The rumqttc event loop runs as a Tokio task owned by the sink.  The
//! dispatch stage never blocks on the broker: while the connection is down
//! readings are counted and dropped, and reconnects are held back by a
//! fixed [`Cooldown`] window after each failure.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Cooldown, Sink, SinkError};
use crate::config::MqttSinkConfig;
use crate::telegram::Value;

/// Capacity of the client → event loop request queue.
const REQUEST_CAPACITY: usize = 64;

/// Shortest keep-alive rumqttc accepts without complaint.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

pub struct MqttSink {
    name: String,
    topics: BTreeMap<String, String>,
    client: AsyncClient,
    qos: QoS,
    retain: bool,
    connected: Arc<AtomicBool>,
    dropped: AtomicU64,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSink {
    /// Create the client and start its connection driver.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background.
    ///
    /// # Errors
    /// [`SinkError::Build`] when called outside a Tokio runtime.
    pub fn connect(name: &str, config: &MqttSinkConfig) -> Result<Self, SinkError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| SinkError::Build {
            sink: name.to_string(),
            reason: e.to_string(),
        })?;

        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs).max(MIN_KEEP_ALIVE));
        options.set_clean_session(true);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        let cooldown = Cooldown::new(Duration::from_secs(config.reconnect_cooldown_secs));

        let driver = runtime.spawn(drive_connection(
            name.to_string(),
            eventloop,
            Arc::clone(&connected),
            cooldown,
            shutdown.clone(),
        ));

        info!(
            sink = %name,
            broker = %config.broker,
            port = config.port,
            client_id = %config.client_id,
            "MQTT sink started"
        );

        Ok(Self {
            name: name.to_string(),
            topics: config.topics.clone(),
            client,
            qos: qos_from_level(config.qos),
            retain: config.retain,
            connected,
            dropped: AtomicU64::new(0),
            shutdown,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Readings dropped while the broker was unreachable.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Sink for MqttSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn topics(&self) -> &BTreeMap<String, String> {
        &self.topics
    }

    fn process_information(
        &self,
        label: &str,
        value: &Value,
        _unit: Option<&str>,
    ) -> Result<(), SinkError> {
        if !self.is_connected() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(sink = %self.name, topic = label, dropped, "not connected, reading dropped");
            return Ok(());
        }
        self.client
            .try_publish(label, self.qos, self.retain, value.to_string())
            .map_err(|e| SinkError::Publish {
                sink: self.name.clone(),
                label: label.to_string(),
                reason: e.to_string(),
            })
    }

    fn close(&self) {
        if self.is_connected() {
            if let Err(e) = self.client.try_disconnect() {
                debug!(sink = %self.name, error = %e, "disconnect request not queued");
            }
        }
        self.shutdown.cancel();
        info!(sink = %self.name, dropped = self.dropped(), "MQTT sink closing");
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Ok(mut driver) = self.driver.lock() {
            if let Some(handle) = driver.take() {
                if !handle.is_finished() {
                    handle.abort();
                }
            }
        }
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Poll the event loop until shutdown.
///
/// While connected, shutdown keeps polling so a queued DISCONNECT is flushed;
/// the loop ends once it has gone out or the connection drops.
async fn drive_connection(
    name: String,
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    mut cooldown: Cooldown,
    shutdown: CancellationToken,
) {
    loop {
        if let Some(wait) = cooldown.remaining(Instant::now()) {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let is_connected = connected.load(Ordering::Acquire);
        let event = tokio::select! {
            _ = shutdown.cancelled(), if !is_connected => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Release);
                cooldown.reset();
                info!(sink = %name, "connected to MQTT broker");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::Release);
                debug!(sink = %name, "disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::Release);
                if shutdown.is_cancelled() {
                    break;
                }
                cooldown.trip(Instant::now());
                warn!(
                    sink = %name,
                    error = %e,
                    retry_in_secs = cooldown.window().as_secs(),
                    "MQTT connection error"
                );
            }
        }
    }
    debug!(sink = %name, "MQTT driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> MqttSinkConfig {
        MqttSinkConfig {
            broker: "127.0.0.1".into(),
            // Reserved port; nothing listens there.
            port: 1,
            client_id: "p1-gateway-test".into(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            qos: 0,
            retain: false,
            reconnect_cooldown_secs: 30,
            topics: BTreeMap::from([("1-0:1.8.1".to_string(), "energy/t1".to_string())]),
        }
    }

    #[test]
    fn qos_levels_map_to_rumqttc() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
    }

    #[test]
    fn connect_outside_runtime_fails() {
        let err = MqttSink::connect("broker", &unreachable_config()).err().unwrap();
        assert!(matches!(err, SinkError::Build { .. }));
    }

    #[tokio::test]
    async fn readings_dropped_while_disconnected() {
        let sink = MqttSink::connect("broker", &unreachable_config()).unwrap();
        assert!(!sink.is_connected());

        let value = Value::Number(rust_decimal::Decimal::ONE);
        sink.process_information("energy/t1", &value, Some("kWh")).unwrap();
        sink.process_information("energy/t1", &value, Some("kWh")).unwrap();

        assert_eq!(sink.dropped(), 2);
        sink.close();
    }
}
