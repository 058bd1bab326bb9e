//! Structured logging setup for the CLI binary.
//!
//! Shaped after `env-tracing-logger`'s `init()` (a `tracing-subscriber`
//! `fmt` layer gated by an `EnvFilter`), reimplemented locally rather than
//! pulled in as a path dependency (see DESIGN.md) so the verbosity count
//! from repeated `-v` flags can set the default level `RUST_LOG` overrides.

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `verbosity` is the number of
/// times `-v`/`--verbose` was passed on the command line; it only sets the
/// *default* level, `RUST_LOG` always wins when set.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}
