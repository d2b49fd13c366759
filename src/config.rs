use std::collections::HashSet;
use std::path::PathBuf;
use std::{env, fs, path::Path};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Pull {
    Up,
    Down,
    None,
}

/// Direction of the transition that increments a pulse counter.
#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LineConfig {
    pub name: String,
    pub gpio: u32,
    #[serde(default = "default_pull")]
    pub pull: Pull,
    #[serde(default = "default_edge")]
    pub edge: Edge,
    #[serde(default = "default_debounce_us")]
    pub debounce_us: u32,
}

/// Backend and chip selection policy, built once by the config loader and
/// handed into the core. The core never reads the process environment.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GpioPolicy {
    /// Backend families in attempt order; empty means the built-in default.
    #[serde(default)]
    pub backends: Vec<String>,
    /// Families never attempted regardless of priority.
    #[serde(default)]
    pub skip: HashSet<String>,
    /// Chip numbers to try first, in this order.
    #[serde(default)]
    pub chip_priority: Vec<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AdcChannelConfig {
    pub channel: u8,
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AdcConfig {
    pub name: String,
    pub address: u16,
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default)]
    pub channels: Vec<AdcChannelConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Calibration {
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClimateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_climate_gpio")]
    pub gpio: u8,
    #[serde(default = "default_climate_retries")]
    pub retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedConfig {
    #[serde(default = "default_led_name")]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadConfig {
    pub account_url: String,
    pub sas_token: String,
    pub container: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_upload_interval")]
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default = "default_sampling_seconds")]
    pub sampling_seconds: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_true")]
    pub pulses_enabled: bool,
    #[serde(default)]
    pub pulses: Vec<LineConfig>,
    #[serde(default)]
    pub gpio: GpioPolicy,
    #[serde(default)]
    pub adcs: Vec<AdcConfig>,
    #[serde(default)]
    pub calibration: FxHashMap<String, Calibration>,
    pub climate: Option<ClimateConfig>,
    pub led: Option<LedConfig>,
    pub upload: Option<UploadConfig>,
    pub mqtt: Option<MqttConfig>,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        let mut value: Value = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))?;
        expand_env(&mut value);
        serde_json::from_value(value)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))
    }
}

/// Replaces `${VAR}` in every string value with the variable's content.
/// Unset variables leave the placeholder untouched.
fn expand_env(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = expand_str(s);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(expand_env),
        Value::Object(map) => map.values_mut().for_each(expand_env),
        _ => {}
    }
}

fn expand_str(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                match env::var(name) {
                    Ok(v) => out.push_str(&v),
                    Err(_) => out.push_str(&rest[start..start + 3 + end]),
                }
                rest = &rest[start + 3 + end..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn default_pull() -> Pull {
    Pull::Up
}

fn default_edge() -> Edge {
    Edge::Falling
}

fn default_debounce_us() -> u32 {
    2000
}

fn default_gain() -> f32 {
    1.0
}

fn default_scale() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_climate_gpio() -> u8 {
    4
}

fn default_climate_retries() -> u32 {
    3
}

fn default_led_name() -> String {
    "ACT".to_string()
}

fn default_device_id() -> String {
    "pi-node-01".to_string()
}

fn default_sampling_seconds() -> u64 {
    60
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/mnt/usb-data")
}

fn default_upload_interval() -> u64 {
    300
}

fn default_mqtt_port() -> u16 {
    1883
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").expect("empty config is valid");
        assert_eq!(cfg.device.id, "pi-node-01");
        assert_eq!(cfg.sampling_seconds, 60);
        assert!(cfg.pulses_enabled);
        assert!(cfg.pulses.is_empty());
        assert!(cfg.gpio.backends.is_empty());
    }

    #[test]
    fn pulse_line_parses_kebab_case_enums() {
        let cfg: AppConfig = serde_json::from_str(
            r#"
            {
                "pulses": [
                    { "name": "flow", "gpio": 17, "pull": "down", "edge": "rising", "debounce_us": 500 }
                ],
                "gpio": {
                    "backends": ["pigpio", "gpiod"],
                    "skip": ["rppal"],
                    "chip_priority": [1, 0]
                }
            }
            "#,
        )
        .expect("valid config");
        let line = &cfg.pulses[0];
        assert_eq!(line.gpio, 17);
        assert_eq!(line.pull, Pull::Down);
        assert_eq!(line.edge, Edge::Rising);
        assert_eq!(line.debounce_us, 500);
        assert!(cfg.gpio.skip.contains("rppal"));
        assert_eq!(cfg.gpio.chip_priority, vec![1, 0]);
    }

    #[test]
    fn expands_env_placeholders_in_strings() {
        unsafe { env::set_var("EDGESENSE_TEST_TOKEN", "sv=abc") };
        let mut value: Value = serde_json::from_str(
            r#"{ "sas_token": "${EDGESENSE_TEST_TOKEN}", "other": "${EDGESENSE_TEST_UNSET}" }"#,
        )
        .unwrap();
        expand_env(&mut value);
        assert_eq!(value["sas_token"], "sv=abc");
        assert_eq!(value["other"], "${EDGESENSE_TEST_UNSET}");
    }
}
