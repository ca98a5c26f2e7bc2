//! Log output for the `matrixci` command.
//!
//! Build, combination and trigger lifecycle records come from [`crate::obs`]
//! and carry an `event` field (`build.started`, `combination.finished`,
//! `trigger.fired`, ...) so a `--json` log stream can be filtered by kind.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber for one `matrixci` invocation.
///
/// `json` follows the CLI's `--json` flag and `level` its `--verbose` flag
/// (DEBUG instead of INFO); `RUST_LOG` overrides `level` when set. Logs go
/// to stderr because stdout carries the expansion listing and the build
/// report. Later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
