//! Subscriber setup for the binary. The library only emits `tracing` events.
//!
//! Output goes to stderr so stdout stays comparable across runs. `RUST_LOG`
//! overrides the level passed in, e.g.
//!
//! ```bash
//! RUST_LOG=broker_sim::tandem=trace broker-sim tandem --arrival-rate 100 ...
//! ```

use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LEVEL: &str = "warn";

/// Installs the global subscriber. A second call is a no-op.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("broker_sim={}", level)));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .with(filter)
        .try_init();
}
