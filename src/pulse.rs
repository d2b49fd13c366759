use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::backend::{BindError, ClaimedLine, Level, PulseBackend, chips};
use crate::config::{Edge, GpioPolicy, LineConfig};

/// Families attempted when the config supplies no priority list.
pub const DEFAULT_BACKEND_ORDER: &[&str] = &["pigpio", "gpiod", "rppal"];

/// Normalizes backend-native edge notifications into counted pulses. Runs
/// on whatever thread the owning backend delivers from; the only shared
/// state is the accumulator behind its own lock, held just for the add.
pub struct EdgeRouter {
    counted: Edge,
    count: Mutex<u64>,
}

impl EdgeRouter {
    pub(crate) fn new(counted: Edge) -> Self {
        Self {
            counted,
            count: Mutex::new(0),
        }
    }

    /// Counts the observation when its level matches the configured
    /// direction; the timeout sentinel is discarded. Never blocks beyond
    /// the counter lock.
    pub fn deliver(&self, level: Level) {
        let counts = match level {
            Level::Low => self.counted == Edge::Falling,
            Level::High => self.counted == Edge::Rising,
            Level::Timeout => false,
        };
        if counts {
            *self.count.lock() += 1;
        }
    }

    fn take(&self) -> u64 {
        let mut count = self.count.lock();
        std::mem::take(&mut *count)
    }
}

/// Tries backend families in priority order until one claims the line.
pub struct BackendSelector {
    backends: Vec<Box<dyn PulseBackend>>,
}

impl BackendSelector {
    pub fn new(backends: Vec<Box<dyn PulseBackend>>) -> Self {
        Self { backends }
    }

    /// All families compiled into this build, in default attempt order.
    pub fn with_default_backends() -> Self {
        let backends: Vec<Box<dyn PulseBackend>> = vec![
            Box::new(crate::backend::pigpiod::PigpiodBackend::default()),
            #[cfg(feature = "hardware-gpio")]
            Box::new(crate::backend::gpiod::GpiodBackend),
            Box::new(crate::backend::rppal::RppalBackend),
        ];
        Self::new(backends)
    }

    /// Probes every registered family, for diagnostics.
    pub fn probe_report(&self) -> Vec<(&'static str, Result<(), BindError>)> {
        self.backends
            .iter()
            .map(|b| (b.family(), b.probe()))
            .collect()
    }

    /// Binds `line` to the first family/chip combination that accepts it.
    /// Exactly one OS-level claim persists on success and none on failure;
    /// failed attempts release whatever they acquired before the next one.
    pub fn bind(
        &self,
        line: &LineConfig,
        policy: &GpioPolicy,
        router: Arc<EdgeRouter>,
    ) -> Result<Box<dyn ClaimedLine>, BindError> {
        let priority: Vec<&str> = if policy.backends.is_empty() {
            DEFAULT_BACKEND_ORDER.to_vec()
        } else {
            policy.backends.iter().map(String::as_str).collect()
        };

        for family in priority {
            if policy.skip.contains(family) {
                debug!("backend {family} skipped for line {}", line.gpio);
                continue;
            }
            let Some(backend) = self.backends.iter().find(|b| b.family() == family) else {
                debug!("backend {family} not present in this build");
                continue;
            };
            if let Err(e) = backend.probe() {
                debug!("backend {family} unavailable for line {}: {e}", line.gpio);
                continue;
            }

            match backend.chips() {
                Some(discovered) => {
                    if discovered.is_empty() {
                        debug!("backend {family}: no chips present");
                        continue;
                    }
                    for chip in chips::order(discovered, &policy.chip_priority) {
                        match backend.claim(line, router.clone(), Some(&chip)) {
                            Ok(claim) => return Ok(claim),
                            Err(e) => debug!(
                                "backend {family}: chip {} claim failed for line {}: {e}",
                                chip.number, line.gpio
                            ),
                        }
                    }
                }
                None => match backend.claim(line, router.clone(), None) {
                    Ok(claim) => return Ok(claim),
                    Err(e) => debug!("backend {family} claim failed for line {}: {e}", line.gpio),
                },
            }
        }

        Err(BindError::Exhausted(line.gpio))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterState {
    Unbound,
    Bound,
    Failed,
    Stopped,
}

/// Counts edges on one GPIO line. Created once per configured line; the
/// accumulator is reset to zero atomically with each read, and a counter
/// whose bind failed keeps reporting zero for the process lifetime.
pub struct PulseCounter {
    line: LineConfig,
    router: Arc<EdgeRouter>,
    claim: Option<Box<dyn ClaimedLine>>,
    bound_via: Option<String>,
    state: CounterState,
}

impl PulseCounter {
    pub fn new(line: LineConfig) -> Self {
        let router = Arc::new(EdgeRouter::new(line.edge));
        Self {
            line,
            router,
            claim: None,
            bound_via: None,
            state: CounterState::Unbound,
        }
    }

    pub fn name(&self) -> &str {
        &self.line.name
    }

    pub fn state(&self) -> CounterState {
        self.state
    }

    /// Backend description after a successful bind.
    pub fn bound_via(&self) -> Option<&str> {
        self.bound_via.as_deref()
    }

    /// Call once. Binds a backend and begins counting; on exhaustion the
    /// counter is permanently disabled and reports zero thereafter.
    pub fn start(&mut self, selector: &BackendSelector, policy: &GpioPolicy) {
        if self.state != CounterState::Unbound {
            warn!("pulse counter {} started twice; ignoring", self.line.name);
            return;
        }
        match selector.bind(&self.line, policy, self.router.clone()) {
            Ok(claim) => {
                let via = claim.describe();
                info!(
                    "pulse counter {} bound on line {} via {via}",
                    self.line.name, self.line.gpio
                );
                self.claim = Some(claim);
                self.bound_via = Some(via);
                self.state = CounterState::Bound;
            }
            Err(e) => {
                error!("pulse counter {}: {e}; counting disabled", self.line.name);
                self.state = CounterState::Failed;
            }
        }
    }

    /// Atomically reads and zeroes the accumulator. Every pulse observed
    /// before this returns is included; none observed after is.
    pub fn snapshot_and_reset(&self) -> u64 {
        self.router.take()
    }

    /// Cancels edge delivery, then releases the claim. Any delivery
    /// already in flight completes before the line is released.
    pub fn stop(&mut self) {
        if let Some(claim) = self.claim.take() {
            drop(claim);
            info!("pulse counter {} stopped", self.line.name);
        }
        if self.state == CounterState::Bound {
            self.state = CounterState::Stopped;
        }
    }
}

impl Drop for PulseCounter {
    fn drop(&mut self) {
        if self.state == CounterState::Bound {
            self.stop();
        }
    }
}
