//! Thin process entry point: initializes logging, loads configuration,
//! constructs the connection registry, and would hand off to a websocket
//! accept loop. The accept loop itself is the external websocket framing
//! layer (§1, out of scope) — this binary is a runnable demonstration of
//! the wiring, not a production server.

use syncbox_core::app::{self, Args};
use syncbox_core::config::Config;
use syncbox_core::push::PushTuning;
use syncbox_core::registry::ConnectionRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Args = app::parse();
    app::init_logging(&args);

    let config = Config::load(args.config_file.as_deref()).await?;
    config.show();

    let tuning = PushTuning::from(&config.general);
    let registry = ConnectionRegistry::new();
    tracing::info!("connection registry constructed, listening on {}:{}", config.general.host, config.general.port);

    // The websocket accept loop that would register connections into
    // `registry` and feed committed transactions to
    // `syncbox_core::dispatcher::on_transaction_committed` lives outside
    // this crate (§1). It would build each `Connection` with
    // `Connection::with_tuning(..., tuning)` so a deployment's
    // `rollbackThreshold`/`bundleTrigger`/`scanPageSize` overrides reach the
    // push pipeline. Nothing left to drive without it.
    let _ = (registry, tuning);

    Ok(())
}
