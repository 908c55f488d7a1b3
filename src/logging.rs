//! Process-wide log setup.
//!
//! The library only emits `tracing` events; nothing is printed until the
//! application installs a subscriber. These helpers install a
//! `tracing-subscriber` fmt subscriber whose filter comes from `RUST_LOG`
//! when set, else from the level passed in. Each returns `false` when a
//! global subscriber was already installed, so calling twice is harmless.

use tracing_subscriber::EnvFilter;

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Human-readable output to stderr.
pub fn init(default_level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// One JSON object per event, for log shippers.
pub fn init_json(default_level: &str) -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter(default_level))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Route events through the test harness's captured output.
pub fn init_for_tests() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        // whichever call wins, later ones must not panic
        let _ = init_for_tests();
        assert!(!init("info"));
        assert!(!init_json("info"));
    }
}
