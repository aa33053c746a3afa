use chrono::Local;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{AppError, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "streambox=info,streambox_engine=info,m3u=info";

/// Timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

fn filter_for(verbose: u8, quiet: bool) -> EnvFilter {
    if quiet {
        return EnvFilter::new("error");
    }
    match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        1 => EnvFilter::new("streambox=debug,streambox_engine=debug,m3u=debug"),
        _ => EnvFilter::new("streambox=trace,streambox_engine=trace,m3u=trace,reqwest=debug"),
    }
}

pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter_for(verbose, quiet))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}
