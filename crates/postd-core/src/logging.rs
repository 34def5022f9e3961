use crate::Result;

/// Initialize tracing for the dispatcher binaries.
///
/// Default: info for our crates, warn for everything else.
/// Can be overridden with `RUST_LOG`. Logs go to stderr so stdout stays
/// machine-readable for `postd invoke`.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,postd=info,postd_core=info,postd_reddit=info,postd_github=info,{service_name}=info"
        ))
    });

    // A second init (tests, embedded use) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .try_init();

    Ok(())
}
