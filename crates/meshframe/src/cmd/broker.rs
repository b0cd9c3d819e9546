use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meshframe_broker::{Broker, BrokerConfig};
use tracing::info;

use crate::cmd::BrokerArgs;
use crate::exit::{broker_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_stats, OutputFormat};

pub fn run(args: BrokerArgs, format: OutputFormat) -> CliResult<i32> {
    let config = broker_config(&args);
    let broker = Broker::bind(&args.socket, config).map_err(|err| broker_error("bind failed", err))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(shutdown.clone())?;
    info!(socket = ?args.socket, "press Ctrl-C to stop");

    let stats = broker
        .run(shutdown)
        .map_err(|err| broker_error("broker failed", err))?;
    print_stats(&stats, format);
    Ok(SUCCESS)
}

fn broker_config(args: &BrokerArgs) -> BrokerConfig {
    let defaults = BrokerConfig::default();
    BrokerConfig {
        max_clients: args.max_clients.unwrap_or(defaults.max_clients),
        max_subscriptions_per_client: args
            .max_subscriptions
            .unwrap_or(defaults.max_subscriptions_per_client),
        socket_mode: args.mode.unwrap_or(defaults.socket_mode),
        ..defaults
    }
}

pub fn install_ctrlc_handler(shutdown: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
