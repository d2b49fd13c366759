pub mod chips;
#[cfg(feature = "hardware-gpio")]
pub mod gpiod;
pub mod mock;
pub mod pigpiod;
pub mod rppal;

use std::sync::Arc;

use thiserror::Error;

use crate::config::LineConfig;
use crate::pulse::EdgeRouter;
use self::chips::GpioChip;

/// Logical line level observed with a native edge notification. Backends
/// report a third no-signal state (watchdog ticks, malformed reports); the
/// router discards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
    Timeout,
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("claim failed: {0}")]
    Claim(String),
    #[error("no usable GPIO backend for line {0}")]
    Exhausted(u32),
}

/// A live claim on one GPIO line via one backend. Dropping the handle
/// cancels edge delivery first, then releases the underlying resource;
/// release failures are logged, never propagated.
pub trait ClaimedLine: Send {
    fn describe(&self) -> String;
}

/// One backend family. Implementations must not hold any OS resource after
/// a failed `probe` or `claim`; only a returned handle keeps a claim alive.
pub trait PulseBackend: Send + Sync {
    fn family(&self) -> &'static str;

    /// Cheap, bounded availability check with no side effects.
    fn probe(&self) -> Result<(), BindError>;

    /// Chip-scoped families return their discovered chips; the selector
    /// orders them and attempts a claim per chip. `None` means the family
    /// claims lines without a chip handle.
    fn chips(&self) -> Option<Vec<GpioChip>> {
        None
    }

    fn claim(
        &self,
        line: &LineConfig,
        router: Arc<EdgeRouter>,
        chip: Option<&GpioChip>,
    ) -> Result<Box<dyn ClaimedLine>, BindError>;
}
