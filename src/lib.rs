mod adc;
pub mod backend;
mod climate;
mod collector;
mod config;
mod error;
mod iot;
mod led;
mod pulse;
mod storage;

pub use adc::{AdcManager, apply_calibration};
pub use climate::{Climate, Dht22};
pub use collector::run;
pub use config::{
    AppConfig, Calibration, ClimateConfig, DeviceConfig, Edge, GpioPolicy, LedConfig, LineConfig,
    MqttConfig, Pull, UploadConfig,
};
pub use error::AppError;
pub use iot::IotSender;
pub use led::StatusLed;
pub use pulse::{BackendSelector, CounterState, DEFAULT_BACKEND_ORDER, EdgeRouter, PulseCounter};
pub use storage::CsvSink;
