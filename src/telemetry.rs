//! Tracing setup for the authorization core.
//!
//! The core never chooses a subscriber for its embedder; [`init_tracing`] is
//! offered as a convenience for binaries and tests, wiring `tracing-subscriber`'s
//! `fmt` layer with `EnvFilter` (respecting `RUST_LOG`, defaulting to `info`).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a process-wide `tracing` subscriber suitable for local development
/// and tests. Safe to call more than once; subsequent calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
