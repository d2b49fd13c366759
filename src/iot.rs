use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use rumqttc::{Client, MqttOptions, QoS};
use serde_json::json;

use crate::config::MqttConfig;
use crate::error::AppError;

/// Best-effort MQTT telemetry channel. Each sample row goes out as a JSON
/// envelope `{"type", "deviceId", "ts", "payload"}`; the CSV file remains
/// the system of record, so publish failures are logged and dropped.
pub struct IotSender {
    client: Client,
    topic: String,
    device_id: String,
}

impl IotSender {
    pub fn connect(cfg: &MqttConfig, device_id: &str) -> Result<Self, AppError> {
        let mut options =
            MqttOptions::new(format!("edgesense-{device_id}"), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(password)) = (&cfg.username, &cfg.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client, mut connection) = Client::new(options, 16);
        // the connection must be polled for the client to make progress
        std::thread::Builder::new()
            .name("mqtt-drain".to_string())
            .spawn(move || {
                for event in connection.iter() {
                    if let Err(e) = event {
                        debug!("mqtt event loop: {e}");
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
            })
            .map_err(|e| AppError::Telemetry(format!("spawn mqtt thread: {e}")))?;

        info!("MQTT telemetry connected to {}:{}", cfg.host, cfg.port);
        Ok(Self {
            client,
            topic: cfg.topic.clone(),
            device_id: device_id.to_string(),
        })
    }

    pub fn send(&mut self, msg_type: &str, payload: serde_json::Value) {
        let envelope = json!({
            "type": msg_type,
            "deviceId": self.device_id,
            "ts": Utc::now().to_rfc3339(),
            "payload": payload,
        });
        if let Err(e) = self
            .client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, envelope.to_string())
        {
            warn!("mqtt publish failed ({msg_type}): {e}");
        }
    }
}
