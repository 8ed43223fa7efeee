use tracing_subscriber::EnvFilter;

fn filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    })
}

/// Installs the global subscriber. `RUST_LOG` wins over `verbosity`.
/// Logs go to stderr so stdout stays clean for the report.
pub fn init(verbosity: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbosity))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Like [`init`], but tolerates a subscriber already being installed.
pub fn try_init(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbosity))
        .with_target(false)
        .with_test_writer()
        .try_init();
}
