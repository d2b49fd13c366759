use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;

use crate::config::LedConfig;

/// Built-in status LED driven through sysfs. The original trigger is saved
/// at startup and restored by `stop`; blinking happens off-thread so the
/// sampling loop never waits on it. Missing LED or missing permissions
/// disable the feature with one warning.
pub struct StatusLed {
    inner: Option<Arc<LedInner>>,
}

struct LedInner {
    path: PathBuf,
    original_trigger: Option<String>,
    // serializes overlapping blink patterns
    blinking: Mutex<()>,
}

impl StatusLed {
    pub fn new(cfg: Option<&LedConfig>) -> Self {
        let Some(cfg) = cfg else {
            return Self { inner: None };
        };
        if !cfg.enabled {
            info!("LED status indicator disabled");
            return Self { inner: None };
        }

        let path = PathBuf::from("/sys/class/leds").join(&cfg.name);
        let trigger_path = path.join("trigger");
        let original_trigger = match std::fs::read_to_string(&trigger_path) {
            Ok(contents) => parse_active_trigger(&contents),
            Err(e) => {
                warn!("LED {} not found, status indicator disabled: {e}", cfg.name);
                return Self { inner: None };
            }
        };
        if let Err(e) = std::fs::write(&trigger_path, "none") {
            warn!("no permission to control LED {}: {e}", cfg.name);
            return Self { inner: None };
        }
        info!(
            "LED {} initialized (original trigger: {})",
            cfg.name,
            original_trigger.as_deref().unwrap_or("unknown")
        );
        Self {
            inner: Some(Arc::new(LedInner {
                path,
                original_trigger,
                blinking: Mutex::new(()),
            })),
        }
    }

    /// Long blink at service start.
    pub fn startup(&self) {
        self.blink(500, 0, 1);
    }

    /// Single short blink per successful sample.
    pub fn heartbeat(&self) {
        self.blink(50, 0, 1);
    }

    /// Rapid triple blink on an error.
    pub fn error(&self) {
        self.blink(100, 100, 3);
    }

    fn blink(&self, on_ms: u64, off_ms: u64, count: u32) {
        let Some(inner) = self.inner.clone() else {
            return;
        };
        std::thread::spawn(move || {
            let _guard = inner.blinking.lock();
            for _ in 0..count {
                inner.set_brightness(1);
                std::thread::sleep(Duration::from_millis(on_ms));
                inner.set_brightness(0);
                if off_ms > 0 {
                    std::thread::sleep(Duration::from_millis(off_ms));
                }
            }
        });
    }

    /// Restores the trigger saved at startup.
    pub fn stop(&self) {
        let Some(inner) = &self.inner else { return };
        let Some(trigger) = &inner.original_trigger else {
            return;
        };
        match std::fs::write(inner.path.join("trigger"), trigger) {
            Ok(()) => info!("LED trigger restored to {trigger}"),
            Err(e) => warn!("failed to restore LED trigger: {e}"),
        }
    }
}

impl LedInner {
    fn set_brightness(&self, value: u8) {
        // LED write failures are not worth surfacing mid-blink
        let _ = std::fs::write(self.path.join("brightness"), value.to_string());
    }
}

/// The active trigger is the bracketed entry of the sysfs trigger list.
fn parse_active_trigger(contents: &str) -> Option<String> {
    contents
        .split_whitespace()
        .find(|part| part.starts_with('[') && part.ends_with(']'))
        .map(|part| part[1..part.len() - 1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_the_bracketed_trigger() {
        assert_eq!(
            parse_active_trigger("none rc-feedback [mmc0] heartbeat"),
            Some("mmc0".to_string())
        );
    }

    #[test]
    fn no_brackets_means_no_trigger() {
        assert_eq!(parse_active_trigger("none mmc0 heartbeat"), None);
    }
}
