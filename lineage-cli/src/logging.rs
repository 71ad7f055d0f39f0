//! Structured JSON logging on standard error.

use std::io;

use structured_logger::{Builder, json::new_writer};

/// Environment variable selecting the log level.
pub const LOG_LEVEL_ENV: &str = "LINEAGE_LOG";

const DEFAULT_LOG_LEVEL: &str = "info";

fn log_level(raw: Option<&str>) -> &str {
    match raw.map(str::trim) {
        Some(level) if !level.is_empty() => level,
        _ => DEFAULT_LOG_LEVEL,
    }
}

/// Install the JSON logger at the level named by [`LOG_LEVEL_ENV`].
///
/// Call once, before any analysis runs.
pub fn init_logging() {
    let raw = std::env::var(LOG_LEVEL_ENV).ok();
    Builder::with_level(log_level(raw.as_deref()))
        .with_target_writer("*", new_writer(io::stderr()))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, "info")]
    #[case(Some(""), "info")]
    #[case(Some("  "), "info")]
    #[case(Some("debug"), "debug")]
    #[case(Some(" warn "), "warn")]
    fn level_falls_back_to_info(#[case] raw: Option<&str>, #[case] expected: &str) {
        assert_eq!(log_level(raw), expected);
    }
}
