#[cfg(target_os = "linux")]
mod bluez;
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
mod camera;
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
mod config;

use camsim_gatt::GattError;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run().await.inspect_err(|e| error!("startup failed: {e}"))?;
    Ok(())
}

#[cfg(target_os = "linux")]
async fn run() -> Result<(), GattError> {
    use std::sync::Arc;

    use camsim_gatt::{CancellationToken, FileSink};

    info!("Starting BLE peripheral...");
    let config = config::Config::from_env();

    let sink = FileSink::open(&config.command_log)?;
    info!("Recording commands to {}", sink.path().display());

    let mut peripheral = camsim_gatt::Peripheral::new(bluez::BluezPlatform::new(), camera::identity(), Arc::new(sink));
    peripheral.build_topology(camera::topology()?).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupted"),
                Err(e) => error!("cannot listen for ctrl-c: {e}"),
            }
            shutdown.cancel();
        }
    });

    peripheral.publish(shutdown).await
}

#[cfg(not(target_os = "linux"))]
async fn run() -> Result<(), GattError> {
    info!("Starting BLE peripheral...");
    Err(GattError::AdapterUnavailable(
        "only the BlueZ backend is supported".to_string(),
    ))
}
