/*
 * logging.rs
 *
 * cronwrap's own diagnostics go through tracing, to stderr, filtered by
 * --log-level / CRONWRAP_LOG. Default is warn: cron mails anything on
 * stderr, so a clean run has to stay silent.
 *
 * The lines scripts depend on (lock skip message, "timeout => kill -9")
 * are plain println!/eprintln! and don't go through here.
 */

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Fallback when the filter string doesn't parse.
pub const DEFAULT_FILTER: &str = "warn";

/* parse a filter directive, falling back to warn on garbage */
#[must_use]
pub fn env_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(directive: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(directive))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_filter() {
        let filter = env_filter("cronwrap=debug");
        assert!(filter.to_string().contains("debug"));
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        let filter = env_filter("cronwrap=notalevel");
        assert_eq!(filter.to_string(), DEFAULT_FILTER);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init("warn");
        init("debug");
    }
}
