use std::time::{Duration, Instant};

use log::{debug, warn};
use rppal::gpio::{Gpio, IoPin, Level as PinLevel, Mode};

use crate::config::ClimateConfig;
use crate::error::AppError;

const START_PULSE: Duration = Duration::from_millis(2);
const LEVEL_TIMEOUT_US: u64 = 150;
// a data bit's high phase is ~27µs for 0 and ~70µs for 1
const ONE_THRESHOLD_US: u64 = 48;
const RETRY_PAUSE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Climate {
    pub temperature_c: f64,
    pub humidity_pct: f64,
}

/// Bit-banged DHT22 on a single GPIO line.
pub struct Dht22 {
    pin: IoPin,
    retries: u32,
}

impl Dht22 {
    pub fn new(cfg: &ClimateConfig) -> Result<Self, AppError> {
        let gpio = Gpio::new().map_err(|e| AppError::Sensor(format!("gpio init: {e}")))?;
        let pin = gpio
            .get(cfg.gpio)
            .map_err(|e| AppError::Sensor(format!("dht22 line {}: {e}", cfg.gpio)))?
            .into_io(Mode::Input);
        Ok(Self {
            pin,
            retries: cfg.retries.max(1),
        })
    }

    /// One reading with bounded retries; short pauses between attempts
    /// because the sensor needs recovery time after a failed handshake.
    pub fn sample(&mut self) -> Result<Climate, AppError> {
        let mut last = AppError::Sensor("dht22: no attempt made".into());
        for attempt in 0..self.retries {
            match self.read_frame() {
                Ok(frame) => {
                    let climate = decode_frame(&frame)?;
                    if attempt > 0 {
                        debug!("dht22 read succeeded after {} attempts", attempt + 1);
                    }
                    return Ok(climate);
                }
                Err(e) => {
                    debug!("dht22 read attempt {} failed: {e}", attempt + 1);
                    last = e;
                    std::thread::sleep(RETRY_PAUSE);
                }
            }
        }
        Err(last)
    }

    fn read_frame(&mut self) -> Result<[u8; 5], AppError> {
        // host start: hold low, then release and let the pull-up raise the line
        self.pin.set_mode(Mode::Output);
        self.pin.set_low();
        std::thread::sleep(START_PULSE);
        self.pin.set_mode(Mode::Input);

        // sensor response: 80µs low, 80µs high, then 40 bits
        wait_for(&self.pin, PinLevel::Low, LEVEL_TIMEOUT_US)?;
        wait_for(&self.pin, PinLevel::High, LEVEL_TIMEOUT_US)?;
        wait_for(&self.pin, PinLevel::Low, LEVEL_TIMEOUT_US)?;

        let mut frame = [0u8; 5];
        for bit in 0..40 {
            wait_for(&self.pin, PinLevel::High, LEVEL_TIMEOUT_US)?;
            let high_started = Instant::now();
            wait_for(&self.pin, PinLevel::Low, LEVEL_TIMEOUT_US)?;
            if high_started.elapsed() > Duration::from_micros(ONE_THRESHOLD_US) {
                frame[bit / 8] |= 0x80 >> (bit % 8);
            }
        }
        Ok(frame)
    }
}

fn wait_for(pin: &IoPin, level: PinLevel, timeout_us: u64) -> Result<(), AppError> {
    let deadline = Instant::now() + Duration::from_micros(timeout_us);
    while pin.read() != level {
        if Instant::now() >= deadline {
            return Err(AppError::Sensor(format!(
                "dht22: timeout waiting for {level:?}"
            )));
        }
    }
    Ok(())
}

/// Decodes a 40-bit DHT22 frame: humidity ×10, temperature ×10 with a
/// sign bit, byte-sum checksum over the first four bytes.
fn decode_frame(frame: &[u8; 5]) -> Result<Climate, AppError> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return Err(AppError::Sensor("dht22: checksum mismatch".into()));
    }
    let humidity = f64::from(u16::from_be_bytes([frame[0], frame[1]])) / 10.0;
    let raw_temp = u16::from_be_bytes([frame[2] & 0x7F, frame[3]]);
    let mut temperature = f64::from(raw_temp) / 10.0;
    if frame[2] & 0x80 != 0 {
        temperature = -temperature;
    }
    Ok(Climate {
        temperature_c: temperature,
        humidity_pct: humidity,
    })
}

/// Initializes the sensor with a few attempts, mirroring how flaky the
/// first handshake after power-up can be. `None` disables climate columns.
pub fn init(cfg: &ClimateConfig) -> Option<Dht22> {
    if !cfg.enabled {
        return None;
    }
    for attempt in 0..3 {
        match Dht22::new(cfg) {
            Ok(sensor) => {
                log::info!("DHT22 sensor initialized on BCM {}", cfg.gpio);
                return Some(sensor);
            }
            Err(e) => {
                debug!("DHT22 init attempt {} failed: {e}", attempt + 1);
                std::thread::sleep(Duration::from_millis(500));
            }
        }
    }
    warn!("failed to initialize DHT22 after retries; disabling sensor");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_positive_reading() {
        // 65.2 %RH, 24.6 °C
        let frame = [0x02, 0x8C, 0x00, 0xF6, 0x84];
        let climate = decode_frame(&frame).unwrap();
        assert_eq!(climate.humidity_pct, 65.2);
        assert_eq!(climate.temperature_c, 24.6);
    }

    #[test]
    fn sign_bit_makes_the_temperature_negative() {
        // 50.0 %RH, -5.3 °C
        let frame = [0x01, 0xF4, 0x80, 0x35, 0xAA];
        let climate = decode_frame(&frame).unwrap();
        assert_eq!(climate.humidity_pct, 50.0);
        assert_eq!(climate.temperature_c, -5.3);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let frame = [0x02, 0x8C, 0x00, 0xF6, 0x00];
        assert!(decode_frame(&frame).is_err());
    }
}
