//! Logging bootstrap: `tracing` + `tracing-subscriber`, one of text/JSON/
//! pretty formatting selected by CLI flag, verbosity by `RUST_LOG` or
//! `--log-level`.

use tracing_subscriber::EnvFilter;

use super::args::{Args, LogFormat};
use crate::config::VERSION;

pub fn init_logging(args: &Args) {
    let filter = EnvFilter::from_default_env().add_directive(args.log_level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!args.no_color);

    match args.log_format {
        LogFormat::Structured => subscriber.json().init(),
        LogFormat::Debug => subscriber.pretty().init(),
        LogFormat::Text => subscriber.init(),
    }

    tracing::info!("starting syncbox-core (version {VERSION})");
}
