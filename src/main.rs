use clap::Parser;
use log::{error, info};
use tokio::sync::mpsc;

mod config;
mod engine;
mod error;
mod estimator;
mod manager;
mod messages;
mod mqtt;
mod scheduler;
mod selector;
mod store;

/// Estimates which room each tracked device is in from base station distance reports
#[derive(Parser, Debug)]
#[command(name = "presence-rs", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    builder.parse_filters(if debug { "debug" } else { "info" });
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = config::AppConfig::load(&args.config)?;

    init_logging(args.debug || config.debug.unwrap_or(false));
    info!("Initializing presence-rs from {}", args.config);

    let engine = match engine::PresenceEngine::from_config(&config) {
        Ok(engine) => engine,
        Err(err) => {
            error!("Not starting: {}", err);
            return Ok(());
        }
    };
    for device in engine.devices() {
        info!("Tracking {} as {}", device.id, device.entity_id);
    }

    let (mqtt_client, mut eventloop) = mqtt::MqttClient::new(&config.mqtt);
    mqtt_client.subscribe().await?;

    let (tx, rx) = mpsc::channel(100);

    let listener = mqtt_client.clone();
    tokio::task::spawn(async move {
        listener.event_loop(&mut eventloop, tx).await;
    });

    let core = manager::Manager::new(engine, mqtt_client);
    let mqtt_client = core.run_loop(rx).await;

    mqtt_client.disconnect().await?;

    Ok(())
}
