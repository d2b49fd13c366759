use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::error;

use edgesense::AppConfig;

fn main() {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("EDGESENSE_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::load_from_file(&config_path)
        .unwrap_or_else(|e| panic!("Failed to load config: {e}"));

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .unwrap_or_else(|e| panic!("Failed to install signal handler: {e}"));

    if let Err(e) = edgesense::run(config, shutdown) {
        error!("collector failed: {e}");
        std::process::exit(1);
    }
}
