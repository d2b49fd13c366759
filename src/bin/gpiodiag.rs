use edgesense::backend::chips;
use edgesense::{BackendSelector, CounterState, Edge, GpioPolicy, LineConfig, Pull, PulseCounter};

/// Probes each compiled-in backend family and attempts a transient claim
/// of the given lines (default: common BCM pins), printing which
/// family/chip accepted each one. Claims are released immediately.
fn main() {
    env_logger::init();

    let mut lines: Vec<u32> = std::env::args()
        .skip(1)
        .filter_map(|arg| arg.parse().ok())
        .collect();
    if lines.is_empty() {
        lines = vec![4, 17, 27, 22];
    }

    let discovered = chips::discover();
    if discovered.is_empty() {
        println!("Found chips: NONE");
    } else {
        println!(
            "Found chips: {}",
            discovered
                .iter()
                .map(|c| c.path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let selector = BackendSelector::with_default_backends();
    println!("Backend availability:");
    for (family, result) in selector.probe_report() {
        match result {
            Ok(()) => println!("  {family}: available"),
            Err(e) => println!("  {family}: {e}"),
        }
    }

    let policy = GpioPolicy::default();
    let mut results: Vec<(u32, Option<String>)> = Vec::new();
    for line in lines {
        let mut counter = PulseCounter::new(LineConfig {
            name: format!("diag-{line}"),
            gpio: line,
            pull: Pull::Up,
            edge: Edge::Falling,
            debounce_us: 0,
        });
        counter.start(&selector, &policy);
        let via = counter.bound_via().map(str::to_string);
        if counter.state() == CounterState::Bound {
            counter.stop();
        }
        results.push((line, via));
    }

    println!("Summary:");
    for (line, via) in results {
        match via {
            Some(via) => println!("  Line {line} claimed via {via}"),
            None => println!("  Line {line} not claimed by any backend"),
        }
    }
}
