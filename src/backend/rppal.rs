use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rppal::gpio::{Gpio, InputPin, Trigger};
use rppal::system::DeviceInfo;

use crate::backend::chips::GpioChip;
use crate::backend::{BindError, ClaimedLine, Level, PulseBackend};
use crate::config::{Edge, LineConfig, Pull};
use crate::pulse::EdgeRouter;

/// Legacy register-access family. The native interrupt machinery takes the
/// debounce as a `Duration`, converted from the configured µs.
pub struct RppalBackend;

impl PulseBackend for RppalBackend {
    fn family(&self) -> &'static str {
        "rppal"
    }

    fn probe(&self) -> Result<(), BindError> {
        // model lookup fails off-Pi without touching any GPIO resource
        DeviceInfo::new().map_err(|e| BindError::Probe(format!("not a recognized Pi: {e}")))?;
        Ok(())
    }

    fn claim(
        &self,
        line: &LineConfig,
        router: Arc<EdgeRouter>,
        _chip: Option<&GpioChip>,
    ) -> Result<Box<dyn ClaimedLine>, BindError> {
        let gpio = Gpio::new().map_err(|e| BindError::Claim(format!("gpio init: {e}")))?;
        let pin = gpio
            .get(line.gpio as u8)
            .map_err(|e| BindError::Claim(format!("line {}: {e}", line.gpio)))?;
        let mut pin = match line.pull {
            Pull::Up => pin.into_input_pullup(),
            Pull::Down => pin.into_input_pulldown(),
            Pull::None => pin.into_input(),
        };

        let trigger = match line.edge {
            Edge::Rising => Trigger::RisingEdge,
            Edge::Falling => Trigger::FallingEdge,
        };
        let debounce = (line.debounce_us > 0)
            .then(|| Duration::from_micros(u64::from(line.debounce_us)));
        pin.set_async_interrupt(trigger, debounce, move |event| match event.trigger {
            Trigger::RisingEdge => router.deliver(Level::High),
            Trigger::FallingEdge => router.deliver(Level::Low),
            _ => router.deliver(Level::Timeout),
        })
        .map_err(|e| BindError::Claim(format!("interrupt on line {}: {e}", line.gpio)))?;

        Ok(Box::new(RppalClaim { pin }))
    }
}

struct RppalClaim {
    pin: InputPin,
}

impl ClaimedLine for RppalClaim {
    fn describe(&self) -> String {
        "rppal".to_string()
    }
}

impl Drop for RppalClaim {
    fn drop(&mut self) {
        // interrupt delivery stops before the pin itself is released
        if let Err(e) = self.pin.clear_async_interrupt() {
            debug!("rppal: clear interrupt failed: {e}");
        }
    }
}
