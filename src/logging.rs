//! Tracing subscriber setup.

use crate::config::Environment;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
fn default_directive(env: Environment) -> &'static str {
    match env {
        Environment::Local | Environment::Dev => "keyturn=debug,tower_http=info,info",
        Environment::Prod => "info",
    }
}

/// Install the global subscriber. `RUST_LOG` takes priority over the
/// environment's default level. Prod logs are compact and uncoloured.
pub fn init(env: Environment) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(env)));

    let installed = match env {
        Environment::Prod => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_ansi(false)
            .with_target(false)
            .try_init(),
        Environment::Local | Environment::Dev => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}
