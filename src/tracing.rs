use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Installs the global fmt subscriber used by every binary in the crate.
///
/// `RUST_LOG` takes precedence; otherwise `default_filter` applies (for example
/// `"info,travel_import=debug"`). Set `LOG_PLAIN=1` to drop colours and source
/// locations when output goes to a file or a CI log.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    crate::util::env::init_env();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let plain = crate::util::env::env_flag("LOG_PLAIN", false);

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(!plain)
        .with_file(!plain)
        .with_line_number(!plain)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_is_loaded_before_the_filter_is_read() {
        // Another test may already own the global subscriber.
        let _ = init_tracing("warn");
        assert!(crate::util::env::env_loaded());
    }
}
