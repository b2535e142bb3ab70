use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for a verbosity count (`-v` repeats)
pub fn default_filter(verbose: u8) -> &'static str
{
    match verbose
    {
        0 => "taskctx=warn",
        1 => "taskctx=info",
        2 => "taskctx=debug",
        _ => "taskctx=trace",
    }
}

/// Install the global stderr subscriber. `RUST_LOG` wins over `verbose`.
/// Safe to call more than once; later calls are ignored.
pub fn init(
    verbose: u8,
    no_color: bool,
)
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(!no_color),
        )
        .try_init();
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn verbosity_raises_level()
    {
        assert_eq!(default_filter(0), "taskctx=warn");
        assert_eq!(default_filter(2), "taskctx=debug");
        assert_eq!(default_filter(9), "taskctx=trace");
    }
}
