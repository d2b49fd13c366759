use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::chips::GpioChip;
use crate::backend::{BindError, ClaimedLine, Level, PulseBackend};
use crate::config::LineConfig;
use crate::pulse::EdgeRouter;

/// Scripted backend for tests. Probe and claim outcomes are fixed up
/// front; every probe, claim, rejection and teardown step is recorded in a
/// shared ledger so tests can assert attempt order, release ordering and
/// the absence of leaked claims.
pub struct MockBackend {
    family: &'static str,
    reachable: bool,
    chips: Option<Vec<u32>>,
    accepting: Accepting,
    ledger: Arc<ClaimLedger>,
    injector: Arc<Mutex<Option<EdgeInjector>>>,
}

enum Accepting {
    All,
    Chips(Vec<u32>),
    Nothing,
}

impl MockBackend {
    pub fn new(family: &'static str) -> Self {
        Self {
            family,
            reachable: true,
            chips: None,
            accepting: Accepting::All,
            ledger: Arc::new(ClaimLedger::default()),
            injector: Arc::new(Mutex::new(None)),
        }
    }

    /// Probe fails; claims are never attempted.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Every claim attempt is rejected.
    pub fn rejecting(mut self) -> Self {
        self.accepting = Accepting::Nothing;
        self
    }

    /// Marks the family chip-scoped with the given discovered chips; only
    /// the `accepting` chips grant claims.
    pub fn with_chips(mut self, discovered: &[u32], accepting: &[u32]) -> Self {
        self.chips = Some(discovered.to_vec());
        self.accepting = Accepting::Chips(accepting.to_vec());
        self
    }

    pub fn ledger(&self) -> Arc<ClaimLedger> {
        self.ledger.clone()
    }

    /// Slot filled with an injection handle when a claim succeeds.
    pub fn injector(&self) -> Arc<Mutex<Option<EdgeInjector>>> {
        self.injector.clone()
    }
}

impl PulseBackend for MockBackend {
    fn family(&self) -> &'static str {
        self.family
    }

    fn probe(&self) -> Result<(), BindError> {
        self.ledger.record(ClaimEvent::Probed {
            family: self.family,
        });
        if self.reachable {
            Ok(())
        } else {
            Err(BindError::Probe(format!("{} not reachable", self.family)))
        }
    }

    fn chips(&self) -> Option<Vec<GpioChip>> {
        self.chips
            .as_ref()
            .map(|numbers| numbers.iter().map(|n| GpioChip::new(*n)).collect())
    }

    fn claim(
        &self,
        line: &LineConfig,
        router: Arc<EdgeRouter>,
        chip: Option<&GpioChip>,
    ) -> Result<Box<dyn ClaimedLine>, BindError> {
        let chip_number = chip.map(|c| c.number);
        let accepted = match &self.accepting {
            Accepting::All => true,
            Accepting::Nothing => false,
            Accepting::Chips(accepting) => {
                chip_number.is_some_and(|n| accepting.contains(&n))
            }
        };
        if !accepted {
            self.ledger.record(ClaimEvent::Rejected {
                family: self.family,
                chip: chip_number,
                line: line.gpio,
            });
            return Err(BindError::Claim(format!(
                "{} refused line {}",
                self.family, line.gpio
            )));
        }

        self.ledger.record(ClaimEvent::Claimed {
            family: self.family,
            chip: chip_number,
            line: line.gpio,
        });
        *self.injector.lock() = Some(EdgeInjector { router });
        Ok(Box::new(MockClaim {
            family: self.family,
            chip: chip_number,
            line: line.gpio,
            ledger: self.ledger.clone(),
        }))
    }
}

/// Hands synthetic edges to the claim's router, standing in for a
/// backend-owned delivery thread.
#[derive(Clone)]
pub struct EdgeInjector {
    router: Arc<EdgeRouter>,
}

impl EdgeInjector {
    pub fn edge(&self, level: Level) {
        self.router.deliver(level);
    }
}

struct MockClaim {
    family: &'static str,
    chip: Option<u32>,
    line: u32,
    ledger: Arc<ClaimLedger>,
}

impl ClaimedLine for MockClaim {
    fn describe(&self) -> String {
        match self.chip {
            Some(chip) => format!("{} chip {chip}", self.family),
            None => self.family.to_string(),
        }
    }
}

impl Drop for MockClaim {
    fn drop(&mut self) {
        // mirrors the real teardown: delivery cancelled, then released
        self.ledger.record(ClaimEvent::Cancelled {
            family: self.family,
            line: self.line,
        });
        self.ledger.record(ClaimEvent::Released {
            family: self.family,
            line: self.line,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimEvent {
    Probed {
        family: &'static str,
    },
    Claimed {
        family: &'static str,
        chip: Option<u32>,
        line: u32,
    },
    Rejected {
        family: &'static str,
        chip: Option<u32>,
        line: u32,
    },
    Cancelled {
        family: &'static str,
        line: u32,
    },
    Released {
        family: &'static str,
        line: u32,
    },
}

#[derive(Default)]
pub struct ClaimLedger {
    events: Mutex<Vec<ClaimEvent>>,
}

impl ClaimLedger {
    fn record(&self, event: ClaimEvent) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<ClaimEvent> {
        self.events.lock().clone()
    }

    /// Claims granted and not yet released.
    pub fn live_claims(&self) -> usize {
        let events = self.events.lock();
        let granted = events
            .iter()
            .filter(|e| matches!(e, ClaimEvent::Claimed { .. }))
            .count();
        let released = events
            .iter()
            .filter(|e| matches!(e, ClaimEvent::Released { .. }))
            .count();
        granted - released
    }
}
