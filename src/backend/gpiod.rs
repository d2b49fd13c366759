use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, yield_now};
use std::time::Duration;

use libgpiod::{chip::Chip, line, line::EventClock, request};
use log::warn;

use crate::backend::chips::{self, GpioChip};
use crate::backend::{BindError, ClaimedLine, Level, PulseBackend};
use crate::config::{Edge, LineConfig, Pull};
use crate::pulse::EdgeRouter;

const EVENT_BUFFER_CAPACITY: usize = 64;
const EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(10);

/// Character-device family. Chip-scoped: the selector hands in one chip per
/// claim attempt; the kernel debounce period carries the µs contract.
#[derive(Default)]
pub struct GpiodBackend;

fn request_line(chip: &GpioChip, cfg: &LineConfig) -> Result<request::Request, BindError> {
    let mut settings = line::Settings::new()
        .map_err(|e| BindError::Claim(format!("line settings: {e}")))?;
    settings
        .set_direction(line::Direction::Input)
        .map_err(|e| BindError::Claim(format!("set direction: {e}")))?;
    settings
        .set_bias(match cfg.pull {
            Pull::Up => Some(line::Bias::PullUp),
            Pull::Down => Some(line::Bias::PullDown),
            Pull::None => None,
        })
        .map_err(|e| BindError::Claim(format!("set bias: {e}")))?;
    settings
        .set_edge_detection(Some(match cfg.edge {
            Edge::Rising => line::Edge::Rising,
            Edge::Falling => line::Edge::Falling,
        }))
        .map_err(|e| BindError::Claim(format!("set edge detection: {e}")))?;
    settings
        .set_event_clock(EventClock::Realtime)
        .map_err(|e| BindError::Claim(format!("set event clock: {e}")))?;
    settings.set_debounce_period(Duration::from_micros(u64::from(cfg.debounce_us)));

    let mut line_cfg =
        line::Config::new().map_err(|e| BindError::Claim(format!("line config: {e}")))?;
    line_cfg
        .add_line_settings(&[cfg.gpio], settings)
        .map_err(|e| BindError::Claim(format!("line config add settings: {e}")))?;

    let chip_dev = Chip::open(&chip.path)
        .map_err(|e| BindError::Claim(format!("open chip {}: {e}", chip.path.display())))?;
    let mut req_cfg =
        request::Config::new().map_err(|e| BindError::Claim(format!("request config: {e}")))?;
    req_cfg
        .set_consumer(env!("CARGO_PKG_NAME"))
        .map_err(|e| BindError::Claim(format!("request consumer: {e}")))?;
    chip_dev
        .request_lines(Some(&req_cfg), &line_cfg)
        .map_err(|e| BindError::Claim(format!("request lines: {e}")))
}

impl PulseBackend for GpiodBackend {
    fn family(&self) -> &'static str {
        "gpiod"
    }

    fn probe(&self) -> Result<(), BindError> {
        if chips::discover().is_empty() {
            return Err(BindError::Probe("no gpiochip devices present".into()));
        }
        Ok(())
    }

    fn chips(&self) -> Option<Vec<GpioChip>> {
        Some(chips::discover())
    }

    fn claim(
        &self,
        line: &LineConfig,
        router: Arc<EdgeRouter>,
        chip: Option<&GpioChip>,
    ) -> Result<Box<dyn ClaimedLine>, BindError> {
        let chip = chip.ok_or_else(|| BindError::Claim("gpiod claims are chip-scoped".into()))?;
        // a failed request drops the chip handle here, before the next attempt
        let request = request_line(chip, line)?;
        let listener = EdgeListener::spawn(request, line.gpio, router)?;
        Ok(Box::new(GpiodClaim {
            listener,
            chip_number: chip.number,
        }))
    }
}

/// Waits for edge events with a short timeout so the cancel flag is
/// observed promptly; the line request lives on this thread and is
/// released when the loop exits, after the last delivery.
struct EdgeListener {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn spawn(
        request: request::Request,
        gpio: u32,
        router: Arc<EdgeRouter>,
    ) -> Result<Self, BindError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(EVENT_BUFFER_CAPACITY)
            .map_err(|e| BindError::Claim(format!("event buffer: {e}")))?;

        let thread = std::thread::spawn(move || {
            while !cancel_flag.load(Ordering::Relaxed) {
                let has_event = match request.wait_edge_events(Some(EVENT_WAIT_TIMEOUT)) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("wait edge events error for line {gpio}: {e}");
                        yield_now();
                        continue;
                    }
                };
                if !has_event {
                    continue;
                }

                let events = match request.read_edge_events(&mut buffer) {
                    Ok(evts) => evts,
                    Err(e) => {
                        warn!("read edge events error for line {gpio}: {e}");
                        yield_now();
                        continue;
                    }
                };
                for evt in events {
                    let Ok(evt) = evt else { continue };
                    match evt.event_type() {
                        Ok(line::EdgeKind::Rising) => router.deliver(Level::High),
                        Ok(line::EdgeKind::Falling) => router.deliver(Level::Low),
                        Err(_) => continue,
                    }
                }
            }
        });

        Ok(Self {
            cancel,
            thread: Some(thread),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct GpiodClaim {
    listener: EdgeListener,
    chip_number: u32,
}

impl ClaimedLine for GpiodClaim {
    fn describe(&self) -> String {
        format!("gpiod chip {}", self.chip_number)
    }
}
