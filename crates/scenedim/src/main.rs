use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use scenedim::Actuator;
use scenedim::Config;
use scenedim::Dimmer;
use scenedim::Engine;
use scenedim::config::LoggingConfig;
use scenedim::integrations::mqtt::MqttIntegration;
use scenedim::integrations::mqtt::RumqttcClient;
use tokio::sync::oneshot;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// How long to wait for in-flight light commands on exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Ramp lights up and down while scene switches are held
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config files, merged in order
    #[arg(default_value = "scenedim.toml")]
    config: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (config, diagnostics) = match Config::from_files(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging);

    if !diagnostics.is_empty() {
        tracing::warn!("{}", scenedim::format_diagnostics(&diagnostics));
    }

    tracing::info!("scenedim starting");
    tracing::info!("Loaded config from: {:?}", args.config);

    let mqtt_config = config
        .mqtt
        .as_ref()
        .context("no [mqtt] section configured; scenedim needs a broker to talk to")?;

    if config.dimmers.is_empty() {
        tracing::warn!("No dimmers configured, scene events will be ignored");
    }

    let mut engine = Engine::new();

    let client = RumqttcClient::new(mqtt_config).context("Failed to create MQTT client")?;
    let mqtt = MqttIntegration::setup(client, mqtt_config, engine.bus())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to set up MQTT integration: {}", e))?;
    let mqtt = Arc::new(mqtt);
    let actuator: Arc<dyn Actuator> = mqtt.clone();

    for dimmer_config in config.dimmers {
        tracing::debug!("Setting up dimmer: {}", dimmer_config.switch_id);
        engine.add_dimmer(Dimmer::new(dimmer_config, Arc::clone(&actuator)));
    }

    let engine = Arc::new(engine);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(shutdown_rx).await })
    };

    tracing::info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }

    shutdown_tx.send(()).ok();
    if let Err(e) = runner.await {
        tracing::error!("Engine task failed: {}", e);
    }

    if !engine.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!(
            "Some lights did not answer within {:?}; exiting anyway",
            SHUTDOWN_GRACE
        );
    }
    mqtt.shutdown();

    tracing::info!("scenedim shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = Targets::new()
        .with_default(LevelFilter::from(logging.level))
        .with_targets(
            logging
                .overrides
                .iter()
                .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
        );

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}
