//! Logging setup built on `tracing`/`tracing-subscriber`.
//!
//! Verbosity is driven by the CLI's `-v`/`-vv` flags and `--quiet`, with
//! `RUST_LOG` always taking precedence when set.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber for the `bd` binary.
///
/// `verbose` maps to the default log level when `RUST_LOG` is unset:
/// 0 -> warn, 1 -> info, 2 -> debug, 3+ -> trace. `quiet` forces error-only
/// output regardless of `verbose`. `json` switches to JSON-formatted events,
/// useful when `bd` is invoked by tooling that parses stderr.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_logging(
    verbose: u8,
    quiet: bool,
    json: Option<bool>,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    if json.unwrap_or(false) {
        subscriber.json().try_init()
    } else {
        subscriber.without_time().try_init()
    }
}

/// Initialize a best-effort subscriber for unit/integration tests.
///
/// Swallows the "already initialized" error so it is safe to call from
/// every test that wants logging visible under `--nocapture`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
