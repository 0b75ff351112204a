use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the stderr logging stack for the given service.
///
/// Output goes to stderr so command output on stdout (dry-run listings, JSON) stays
/// machine readable.
pub fn install(service_name: &str, filter: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(filter).map_err(|err| anyhow!("invalid log filter `{filter}`: {err}"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .map_err(|err| anyhow!("failed to install {service_name} logging: {err}"))
}
