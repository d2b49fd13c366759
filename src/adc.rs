use std::time::{Duration, Instant};

use log::{debug, warn};
use rppal::i2c::I2c;
use rustc_hash::FxHashMap;

use crate::config::{AdcConfig, Calibration};
use crate::error::AppError;

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

const CONFIG_OS_SINGLE: u16 = 0x8000;
const CONFIG_MODE_SINGLE: u16 = 0x0100;
const CONFIG_DR_128SPS: u16 = 0x0080;
const CONFIG_COMP_DISABLE: u16 = 0x0003;

const CONVERSION_TIMEOUT: Duration = Duration::from_millis(50);

/// PGA bits and full-scale voltage for a configured gain; the nearest
/// supported setting is used.
fn pga(gain: f32) -> (u16, f64) {
    if gain <= 0.7 {
        (0x0000, 6.144)
    } else if gain <= 1.0 {
        (0x0200, 4.096)
    } else if gain <= 2.0 {
        (0x0400, 2.048)
    } else if gain <= 4.0 {
        (0x0600, 1.024)
    } else if gain <= 8.0 {
        (0x0800, 0.512)
    } else {
        (0x0A00, 0.256)
    }
}

fn mux(channel: u8) -> u16 {
    // single-ended AINx against GND
    0x4000 | (u16::from(channel & 0x03) << 12)
}

struct AdcBank {
    name: String,
    bus: I2c,
    pga_bits: u16,
    full_scale: f64,
    channels: Vec<(u8, String)>,
}

impl AdcBank {
    fn open(cfg: &AdcConfig) -> Result<Self, AppError> {
        let mut bus = I2c::new().map_err(|e| AppError::Sensor(format!("i2c bus: {e}")))?;
        bus.set_slave_address(cfg.address)
            .map_err(|e| AppError::Sensor(format!("i2c address {:#x}: {e}", cfg.address)))?;
        let (pga_bits, full_scale) = pga(cfg.gain);
        Ok(Self {
            name: cfg.name.clone(),
            bus,
            pga_bits,
            full_scale,
            channels: cfg
                .channels
                .iter()
                .map(|c| (c.channel, c.name.clone()))
                .collect(),
        })
    }

    fn read_single(&mut self, channel: u8) -> Result<f64, AppError> {
        let config = CONFIG_OS_SINGLE
            | mux(channel)
            | self.pga_bits
            | CONFIG_MODE_SINGLE
            | CONFIG_DR_128SPS
            | CONFIG_COMP_DISABLE;
        self.bus
            .write(&[REG_CONFIG, (config >> 8) as u8, config as u8])
            .map_err(|e| AppError::Sensor(format!("adc {} config write: {e}", self.name)))?;

        // poll the OS bit until the single-shot conversion completes
        let deadline = Instant::now() + CONVERSION_TIMEOUT;
        loop {
            let mut status = [0u8; 2];
            self.bus
                .write_read(&[REG_CONFIG], &mut status)
                .map_err(|e| AppError::Sensor(format!("adc {} status read: {e}", self.name)))?;
            if u16::from_be_bytes(status) & CONFIG_OS_SINGLE != 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(AppError::Sensor(format!(
                    "adc {} conversion timed out",
                    self.name
                )));
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut raw = [0u8; 2];
        self.bus
            .write_read(&[REG_CONVERSION], &mut raw)
            .map_err(|e| AppError::Sensor(format!("adc {} conversion read: {e}", self.name)))?;
        let counts = i16::from_be_bytes(raw);
        Ok(f64::from(counts) * self.full_scale / 32768.0)
    }
}

/// All configured ADS1115 banks. A bank whose bus or device is absent is
/// disabled at startup; the collector continues with the rest.
pub struct AdcManager {
    banks: Vec<AdcBank>,
}

impl AdcManager {
    pub fn new(configs: &[AdcConfig]) -> Self {
        let mut banks = Vec::new();
        for cfg in configs {
            match AdcBank::open(cfg) {
                Ok(bank) => banks.push(bank),
                Err(e) => warn!("adc {} disabled: {e}", cfg.name),
            }
        }
        Self { banks }
    }

    /// Reads every channel of every bank. Channels that fail to read are
    /// omitted from the result and logged.
    pub fn read_all(&mut self) -> FxHashMap<String, f64> {
        let mut values = FxHashMap::default();
        for bank in &mut self.banks {
            for i in 0..bank.channels.len() {
                let (channel, name) = bank.channels[i].clone();
                match bank.read_single(channel) {
                    Ok(volts) => {
                        values.insert(name, volts);
                    }
                    Err(e) => debug!("adc read {name} failed: {e}"),
                }
            }
        }
        values
    }
}

/// Applies per-channel scale and offset; channels without a calibration
/// entry pass through unchanged.
pub fn apply_calibration(
    values: FxHashMap<String, f64>,
    calibration: &FxHashMap<String, Calibration>,
) -> FxHashMap<String, f64> {
    values
        .into_iter()
        .map(|(name, v)| {
            let v = match calibration.get(&name) {
                Some(c) => v * c.scale + c.offset,
                None => v,
            };
            (name, v)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pga_picks_the_nearest_full_scale() {
        assert_eq!(pga(2.0 / 3.0), (0x0000, 6.144));
        assert_eq!(pga(1.0), (0x0200, 4.096));
        assert_eq!(pga(16.0), (0x0A00, 0.256));
    }

    #[test]
    fn mux_selects_single_ended_inputs() {
        assert_eq!(mux(0), 0x4000);
        assert_eq!(mux(3), 0x7000);
    }

    #[test]
    fn calibration_applies_scale_then_offset() {
        let mut values = FxHashMap::default();
        values.insert("volt_1".to_string(), 2.0);
        values.insert("volt_2".to_string(), 1.0);
        let mut calibration = FxHashMap::default();
        calibration.insert(
            "volt_1".to_string(),
            Calibration {
                scale: 3.0,
                offset: 0.5,
            },
        );
        let out = apply_calibration(values, &calibration);
        assert_eq!(out["volt_1"], 6.5);
        assert_eq!(out["volt_2"], 1.0);
    }
}
