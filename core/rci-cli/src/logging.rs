//! Stderr logging for the CLI. Quiet by default; `RCI_LOG` takes `EnvFilter` directives.

use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "RCI_LOG";

pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
