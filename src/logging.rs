//! Logging setup
//!
//! The crate logs through the `log` facade. Embedders that have no logger of
//! their own can call [`init`] once with the `[logging]` section of their
//! configuration; `RUST_LOG` still takes precedence over the configured level.

use crate::config::LoggingConfig;
use log::debug;

/// Installs an `env_logger` backend.
///
/// Returns `false` if a logger was already installed, which is not an error:
/// the embedding process or a previous call won.
pub fn init(config: &LoggingConfig) -> bool {
    let installed = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.filter()),
    )
    .format_timestamp_millis()
    .try_init()
    .is_ok();

    if installed {
        debug!("📝 Logging initialized at '{}'", config.filter());
    }
    installed
}

/// Test helper: routes log output through the test harness capture.
#[cfg(test)]
pub(crate) fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}
