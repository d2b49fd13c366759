use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use log::{error, info, warn};
use serde_json::json;

use crate::adc::{AdcManager, apply_calibration};
use crate::backend::chips;
use crate::climate;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::iot::IotSender;
use crate::led::StatusLed;
use crate::pulse::{BackendSelector, PulseCounter};
use crate::storage::CsvSink;

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Runs the sampling loop until `shutdown` is raised, then stops every
/// counter and restores the LED.
pub fn run(cfg: AppConfig, shutdown: Arc<AtomicBool>) -> Result<(), AppError> {
    let led = StatusLed::new(cfg.led.as_ref());
    led.startup();

    let mut pulses_enabled = cfg.pulses_enabled && !cfg.pulses.is_empty();
    if pulses_enabled {
        let discovered = chips::discover();
        if discovered.is_empty() {
            warn!("no gpiochip devices found; disabling pulse counters");
            pulses_enabled = false;
        } else {
            info!(
                "detected gpiochips: {}",
                discovered
                    .iter()
                    .map(|c| c.number.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    let selector = BackendSelector::with_default_backends();
    let mut counters: Vec<PulseCounter> = Vec::new();
    if pulses_enabled {
        for line in &cfg.pulses {
            let mut counter = PulseCounter::new(line.clone());
            counter.start(&selector, &cfg.gpio);
            counters.push(counter);
        }
    }

    let mut adc = AdcManager::new(&cfg.adcs);
    // initial reading learns which channels are actually present
    let mut adc_channels: Vec<String> = adc.read_all().into_keys().collect();
    adc_channels.sort();

    let mut climate_sensor = cfg.climate.as_ref().and_then(climate::init);

    let header = build_header(&counters, &adc_channels);
    let mut sink = CsvSink::open(&cfg.data_dir, &cfg.device.id, header)?;

    let mut iot = cfg.mqtt.as_ref().and_then(|mqtt| {
        IotSender::connect(mqtt, &cfg.device.id)
            .inspect_err(|e| warn!("MQTT telemetry disabled: {e}"))
            .ok()
    });

    let period = cfg.sampling_seconds.max(1) as f64;
    while !shutdown.load(Ordering::Relaxed) {
        let loop_started = Instant::now();
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let pulse_values: Vec<u64> = counters.iter().map(|c| c.snapshot_and_reset()).collect();

        let calibrated = apply_calibration(adc.read_all(), &cfg.calibration);
        let adc_values: Vec<f64> = adc_channels
            .iter()
            .map(|name| calibrated.get(name).copied().unwrap_or(f64::NAN))
            .collect();

        let (temperature, humidity) = match climate_sensor.as_mut() {
            Some(sensor) => match sensor.sample() {
                Ok(reading) => (reading.temperature_c, reading.humidity_pct),
                Err(e) => {
                    warn!("climate read failed: {e}");
                    (f64::NAN, f64::NAN)
                }
            },
            None => (f64::NAN, f64::NAN),
        };

        let mut row = vec![timestamp.clone()];
        row.extend(pulse_values.iter().map(u64::to_string));
        row.extend(adc_values.iter().map(|v| v.to_string()));
        row.push(temperature.to_string());
        row.push(humidity.to_string());

        match sink.append(&row) {
            Ok(()) => led.heartbeat(),
            Err(e) => {
                error!("CSV write failed: {e}");
                led.error();
            }
        }

        if let Some(sender) = iot.as_mut() {
            let payload = json!({
                "timestamp_utc": timestamp,
                "pulses": counters
                    .iter()
                    .zip(&pulse_values)
                    .map(|(c, v)| json!({ "name": c.name(), "count": v }))
                    .collect::<Vec<_>>(),
                "adc": adc_channels
                    .iter()
                    .zip(&adc_values)
                    .map(|(name, v)| json!({ "name": name, "voltage_v": v }))
                    .collect::<Vec<_>>(),
                "temperature_c": temperature,
                "humidity_pct": humidity,
            });
            sender.send("sample", payload);
        }

        // sleep the remainder of the interval, keeping windows aligned
        let elapsed = loop_started.elapsed().as_secs_f64();
        let mut remaining = period - elapsed % period;
        while remaining > 0.0 && !shutdown.load(Ordering::Relaxed) {
            let slice = SHUTDOWN_POLL.as_secs_f64().min(remaining);
            std::thread::sleep(Duration::from_secs_f64(slice));
            remaining -= slice;
        }
    }

    info!("shutting down");
    for counter in &mut counters {
        counter.stop();
    }
    led.stop();
    Ok(())
}

fn build_header(counters: &[PulseCounter], adc_channels: &[String]) -> Vec<String> {
    let mut header = vec!["timestamp_utc".to_string()];
    header.extend(counters.iter().map(|c| format!("pulse_{}_count", c.name())));
    header.extend(adc_channels.iter().map(|ch| format!("adc_{ch}_voltage_v")));
    header.push("dht22_temp_c".to_string());
    header.push("dht22_humidity_pct".to_string());
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LineConfig;

    #[test]
    fn header_orders_pulse_adc_then_climate_columns() {
        let counters = vec![PulseCounter::new(LineConfig {
            name: "flow".to_string(),
            gpio: 17,
            pull: crate::config::Pull::Up,
            edge: crate::config::Edge::Falling,
            debounce_us: 2000,
        })];
        let channels = vec!["volt_1".to_string(), "volt_2".to_string()];
        assert_eq!(
            build_header(&counters, &channels),
            vec![
                "timestamp_utc",
                "pulse_flow_count",
                "adc_volt_1_voltage_v",
                "adc_volt_2_voltage_v",
                "dht22_temp_c",
                "dht22_humidity_pct",
            ]
        );
    }
}
