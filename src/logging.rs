use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber, writing to stderr so stdout only carries
/// command output. `RUST_LOG` wins over `verbosity` when set.
pub fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "colombia_hsp=info",
        1 => "colombia_hsp=debug",
        _ => "colombia_hsp=trace",
    }
}
