//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence; otherwise the default level applies to the
//! whole process.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Default log level when `RUST_LOG` is unset.
pub const DEFAULT_LEVEL: LevelFilter = LevelFilter::INFO;

/// Level used for the verbose flag.
pub const VERBOSE_LEVEL: LevelFilter = LevelFilter::DEBUG;

/// Builds the filter: `RUST_LOG` if set, else `level`.
pub fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Installs a fmt subscriber writing to stderr.
///
/// Returns false if a global subscriber was already installed.
pub fn init(verbose: bool) -> bool {
    let level = if verbose { VERBOSE_LEVEL } else { DEFAULT_LEVEL };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let _ = init(false);
        assert!(!init(true));
    }
}
